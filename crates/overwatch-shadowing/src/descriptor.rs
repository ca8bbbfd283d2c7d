//! Tool descriptor model and structural validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Longest accepted tool name, in characters, after trimming.
pub const MAX_NAME_LEN: usize = 256;
/// Longest accepted description, in characters.
pub const MAX_DESCRIPTION_LEN: usize = 10_000;
/// Deepest accepted schema nesting; every nested mapping or array
/// counts one level.
pub const MAX_SCHEMA_DEPTH: usize = 20;

/// A tool definition as advertised by an upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name; non-empty, at most [`MAX_NAME_LEN`] characters.
    pub name: String,
    /// Human-readable description; at most [`MAX_DESCRIPTION_LEN`]
    /// characters.
    #[serde(default)]
    pub description: String,
    /// JSON schema for the tool's arguments.
    #[serde(rename = "inputSchema", alias = "input_schema", default = "empty_schema")]
    pub input_schema: Value,
}

fn empty_schema() -> Value {
    Value::Object(Map::new())
}

impl ToolDescriptor {
    /// Validate a raw descriptor value.
    ///
    /// Malformed descriptors never enter the registry; the returned
    /// reason feeds a malformed-descriptor finding.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the value is structurally
    /// invalid: not a mapping, missing or empty name, oversized name or
    /// description, non-mapping schema, or schema nested deeper than
    /// [`MAX_SCHEMA_DEPTH`].
    pub fn validate(value: &Value) -> Result<Self, String> {
        let Value::Object(map) = value else {
            return Err("tool descriptor is not a mapping".to_string());
        };

        let name = match map.get("name") {
            Some(Value::String(name)) => name,
            Some(_) => return Err("tool name is not a string".to_string()),
            None => return Err("tool descriptor has no name".to_string()),
        };
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err("tool name is empty".to_string());
        }
        if trimmed.chars().count() > MAX_NAME_LEN {
            return Err(format!("tool name exceeds {MAX_NAME_LEN} characters"));
        }

        let description = match map.get("description") {
            Some(Value::String(d)) => d.clone(),
            Some(Value::Null) | None => String::new(),
            Some(_) => return Err("tool description is not a string".to_string()),
        };
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(format!(
                "tool description exceeds {MAX_DESCRIPTION_LEN} characters"
            ));
        }

        let input_schema = match map.get("inputSchema").or_else(|| map.get("input_schema")) {
            Some(schema @ Value::Object(_)) => {
                let depth = schema_depth(schema);
                if depth > MAX_SCHEMA_DEPTH {
                    return Err(format!(
                        "input schema nests {depth} levels, deeper than {MAX_SCHEMA_DEPTH}"
                    ));
                }
                schema.clone()
            },
            Some(Value::Null) | None => empty_schema(),
            Some(_) => return Err("input schema is not a mapping".to_string()),
        };

        Ok(Self {
            name: trimmed.to_string(),
            description,
            input_schema,
        })
    }
}

/// Nesting depth of a schema value: each mapping or array counts one
/// level; scalars count none.
fn schema_depth(value: &Value) -> usize {
    match value {
        Value::Object(map) => {
            let inner = map.values().map(schema_depth).max().unwrap_or(0);
            inner.saturating_add(1)
        },
        Value::Array(items) => {
            let inner = items.iter().map(schema_depth).max().unwrap_or(0);
            inner.saturating_add(1)
        },
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_valid_descriptor() {
        let desc = ToolDescriptor::validate(&json!({
            "name": "read_file",
            "description": "Reads a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}}
        }))
        .unwrap();
        assert_eq!(desc.name, "read_file");
    }

    #[test]
    fn test_missing_schema_defaults_to_empty_mapping() {
        let desc = ToolDescriptor::validate(&json!({"name": "ping"})).unwrap();
        assert_eq!(desc.input_schema, json!({}));
        assert_eq!(desc.description, "");
    }

    #[test]
    fn test_non_mapping_rejected() {
        assert!(ToolDescriptor::validate(&json!("just a string")).is_err());
        assert!(ToolDescriptor::validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_name_rules() {
        assert!(ToolDescriptor::validate(&json!({})).is_err());
        assert!(ToolDescriptor::validate(&json!({"name": 42})).is_err());
        assert!(ToolDescriptor::validate(&json!({"name": "   "})).is_err());
        assert!(ToolDescriptor::validate(&json!({"name": "x".repeat(257)})).is_err());
        assert!(ToolDescriptor::validate(&json!({"name": "x".repeat(256)})).is_ok());
    }

    #[test]
    fn test_name_is_trimmed() {
        let desc = ToolDescriptor::validate(&json!({"name": "  spaced  "})).unwrap();
        assert_eq!(desc.name, "spaced");
    }

    #[test]
    fn test_description_length_limit() {
        let long = "d".repeat(10_001);
        assert!(ToolDescriptor::validate(&json!({"name": "t", "description": long})).is_err());
    }

    #[test]
    fn test_schema_depth_limit() {
        // Build a schema nested 21 levels deep.
        let mut schema = json!({});
        for _ in 0..21 {
            schema = json!({"nested": schema});
        }
        let err =
            ToolDescriptor::validate(&json!({"name": "deep", "inputSchema": schema})).unwrap_err();
        assert!(err.contains("deeper"));

        // 19 nested mappings inside the top-level one is fine.
        let mut schema = json!({});
        for _ in 0..19 {
            schema = json!({"nested": schema});
        }
        assert!(ToolDescriptor::validate(&json!({"name": "ok", "inputSchema": schema})).is_ok());
    }

    #[test]
    fn test_arrays_count_toward_depth() {
        assert_eq!(schema_depth(&json!({"a": [{"b": 1}]})), 3);
        assert_eq!(schema_depth(&json!("scalar")), 0);
    }

    #[test]
    fn test_non_mapping_schema_rejected() {
        assert!(
            ToolDescriptor::validate(&json!({"name": "t", "inputSchema": "not a map"})).is_err()
        );
    }
}
