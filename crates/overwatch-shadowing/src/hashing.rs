//! Canonical serialization and SHA-256 fingerprinting of descriptors.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::descriptor::ToolDescriptor;

/// Lowercase hex SHA-256 of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Serialize a value with mapping keys sorted lexicographically at every
/// nesting level; arrays keep their order.
///
/// Two schemas that differ only in key order canonicalize identically,
/// so their hashes agree across implementations that share this form.
#[must_use]
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // String keys always serialize.
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(*key) {
                    write_canonical(inner, out);
                }
            }
            out.push('}');
        },
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        },
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// The three digests identifying a tool definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolHashes {
    /// SHA-256 of the canonical schema.
    pub schema_hash: String,
    /// SHA-256 of the description bytes.
    pub description_hash: String,
    /// SHA-256 over `name`, schema hash, and description hash, joined
    /// with `:`.
    pub combined_hash: String,
}

/// Fingerprint a descriptor.
///
/// `combined = SHA-256(name ":" schema_hash ":" description_hash)`,
/// where the inner digests are lowercase hex.
#[must_use]
pub fn hash_tool(descriptor: &ToolDescriptor) -> ToolHashes {
    let schema_hash = sha256_hex(canonical_json(&descriptor.input_schema).as_bytes());
    let description_hash = sha256_hex(descriptor.description.as_bytes());
    let combined_input = format!("{}:{schema_hash}:{description_hash}", descriptor.name);
    let combined_hash = sha256_hex(combined_input.as_bytes());
    ToolHashes {
        schema_hash,
        description_hash,
        combined_hash,
    }
}
