use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Rule describes how a request on a given path is authorized, validated, transformed and
/// steered to its upstream.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Rule {
    /// A disabled rule behaves exactly like a missing one.
    #[serde(default = "enabled_by_default", deserialize_with = "bool_or_string")]
    pub enabled: bool,
    #[serde(rename = "matchRules")]
    pub match_rules: MatchRules,
    pub operation: Operation,
    /// Required shape of the request body, checked by [crate::handler::http::template::matches].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<JsonTransforms>,
}

/// MatchRules is the constraint a request must satisfy to invoke the rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct MatchRules {
    pub method: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Operation {
    /// Upstream target, either relative to the configured upstream or an absolute URL.
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct JsonTransforms {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_server: Option<TransformSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_client: Option<TransformSpec>,
}

/// TransformSpec lists the key operations applied to a JSON body. All `set` entries run
/// first, in order, then all `del` entries.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct TransformSpec {
    #[serde(default)]
    pub set: Vec<Map<String, Value>>,
    #[serde(default)]
    pub del: Vec<String>,
}

/// RuleEnvelope is the body the rule store answers with.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RuleEnvelope {
    pub rule: Rule,
}

impl Rule {
    pub fn to_server(&self) -> Option<&TransformSpec> {
        self.json.as_ref().and_then(|json| json.to_server.as_ref())
    }

    pub fn to_client(&self) -> Option<&TransformSpec> {
        self.json.as_ref().and_then(|json| json.to_client.as_ref())
    }
}

fn enabled_by_default() -> bool {
    true
}

/// Rule stores written for the nginx gateway serialise the flag as `"true"` / `"false"`.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::Text(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid enabled flag `{}`",
                other
            ))),
        },
    }
}
