use std::collections::HashSet;

use anyhow::anyhow;
use json_patch::{AddOperation, Patch, PatchOperation, RemoveOperation};
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::handler::http::rule::TransformSpec;

/// apply_transform applies the `set` entries of `spec` in order, then its `del` entries in
/// order, to the top-level keys of the payload.
///
/// The transform is compiled into a JSON patch and applied in one step, so the payload is either
/// fully transformed or returned as an error untouched.
pub fn apply_transform(mut payload: Value, spec: &TransformSpec) -> anyhow::Result<Value> {
    let operations = match payload.as_object() {
        Some(object) => compile(object, spec),
        None => return Err(anyhow!("json payload is not an object")),
    };
    debug!("applying {} json operations", operations.len());
    json_patch::patch(&mut payload, &Patch(operations))?;
    Ok(payload)
}

/// compile turns `spec` into patch operations against an object holding `object`'s keys.
fn compile(object: &Map<String, Value>, spec: &TransformSpec) -> Vec<PatchOperation> {
    let mut present: HashSet<&str> = object.keys().map(String::as_str).collect();
    let mut operations = vec![];

    for entry in &spec.set {
        for (key, value) in entry {
            trace!("set [{} = {}]", key, value);
            operations.extend(set_or_delete(&mut present, key, Some(value)));
        }
    }
    for key in &spec.del {
        trace!("del [{}]", key);
        operations.extend(set_or_delete(&mut present, key, None));
    }
    operations
}

/// set_or_delete yields the operation for one key: with a value the key is overwritten or
/// inserted, without one it is removed when present. Removing an absent key yields nothing.
fn set_or_delete<'a>(
    present: &mut HashSet<&'a str>,
    key: &'a str,
    value: Option<&Value>,
) -> Option<PatchOperation> {
    match value {
        Some(value) => {
            present.insert(key);
            Some(PatchOperation::Add(AddOperation {
                path: pointer(key),
                value: value.clone(),
            }))
        }
        None if present.remove(key) => {
            Some(PatchOperation::Remove(RemoveOperation { path: pointer(key) }))
        }
        None => None,
    }
}

/// pointer escapes a top-level key into a JSON pointer (RFC 6901).
fn pointer(key: &str) -> String {
    format!("/{}", key.replace('~', "~0").replace('/', "~1"))
}
