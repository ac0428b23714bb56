use std::mem::discriminant;

use serde_json::{Map, Value};
use tracing::{trace, warn};

/// Deepest object nesting a template may describe. Deeper templates never match.
pub const MAX_TEMPLATE_DEPTH: usize = 32;

/// matches checks the payload carries every key of the template, each with the same JSON kind
/// as the template value. Nested template objects are checked recursively; keys the template
/// does not mention are ignored.
pub fn matches(payload: &Value, template: &Map<String, Value>) -> bool {
    match_at(payload, template, "", 1)
}

fn match_at(payload: &Value, template: &Map<String, Value>, prefix: &str, depth: usize) -> bool {
    if depth > MAX_TEMPLATE_DEPTH {
        warn!("template nested deeper than {} at [{}]", MAX_TEMPLATE_DEPTH, prefix);
        return false;
    }

    for (key, expected) in template {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        let actual = match payload.get(key) {
            Some(actual) => actual,
            None => {
                warn!("property [{}] missing", path);
                return false;
            }
        };

        if discriminant(actual) != discriminant(expected) {
            warn!(
                "property [{}] type wrong: expected {}, got {}",
                path,
                kind(expected),
                kind(actual)
            );
            return false;
        }

        if let Value::Object(nested) = expected {
            if !match_at(actual, nested, &path, depth + 1) {
                return false;
            }
        }

        trace!("property [{}] ok", path);
    }
    true
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
