use http::Method;

use crate::handler::http::rule::MatchRules;

/// authorize checks the request method equals the rule's method, and the role claim is one of the
/// rule's roles. Both comparisons are exact; the claim is a single role, never split.
pub fn authorize(method: &Method, role_claim: &str, match_rules: &MatchRules) -> bool {
    method.as_str() == match_rules.method
        && match_rules.roles.iter().any(|role| role == role_claim)
}

#[cfg(test)]
mod tests {
    use http::Method;
    use test_case::test_case;

    use super::authorize;
    use crate::handler::http::rule::MatchRules;

    fn match_rules(method: &str, roles: &[&str]) -> MatchRules {
        MatchRules {
            method: method.to_string(),
            roles: roles.iter().map(ToString::to_string).collect(),
        }
    }

    #[test_case(Method::GET, "admin" => true ; "admin")]
    #[test_case(Method::GET, "viewer" => true ; "viewer")]
    #[test_case(Method::POST, "admin" => false ; "wrong method")]
    #[test_case(Method::GET, "editor" => false ; "unknown role")]
    #[test_case(Method::GET, "" => false ; "empty role")]
    #[test_case(Method::GET, "viewer,admin" => false ; "joined roles")]
    #[test_case(Method::GET, "Admin" => false ; "role case")]
    fn test_authorize(method: Method, role: &str) -> bool {
        authorize(&method, role, &match_rules("GET", &["viewer", "admin"]))
    }

    #[test]
    fn test_method_case_sensitive() {
        let rules = match_rules("get", &["admin"]);
        assert!(!authorize(&Method::GET, "admin", &rules));
    }

    #[test]
    fn test_no_roles() {
        let rules = match_rules("GET", &[]);
        assert!(!authorize(&Method::GET, "", &rules));
        assert!(!authorize(&Method::GET, "admin", &rules));
    }
}
