// src/job/identity.rs

use serde_json::Value;

use crate::job::model::WorkDescriptor;

/// Identity key derived from the exact work of a job: function name,
/// positional arguments and keyword arguments (sorted by key).
///
/// Two jobs calling the same function with the same arguments get the same
/// key, so delaying the second one while the first is still queued is a
/// no-op.
pub fn identity_exact(work: &WorkDescriptor) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(work.function.as_bytes());
    hasher.update(b"\0");
    hasher.update(Value::Array(work.args.clone()).to_string().as_bytes());
    hasher.update(b"\0");

    let mut keys: Vec<&String> = work.kwargs.keys().collect();
    keys.sort();
    for key in keys {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(work.kwargs[key.as_str()].to_string().as_bytes());
        hasher.update(b";");
    }

    hasher.finalize().to_hex().to_string()
}
