//! Minimal JSON-Schema argument validation: object shape, required
//! properties, and primitive types. Anything deeper is the handler's
//! problem (it deserializes into its own request type).

use serde_json::Value;

/// Validate `args` against an object schema. Returns the first violation
/// as a human-readable message.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(obj) = args.as_object() else {
        return Err(format!("arguments must be an object, got {}", type_name(args)));
    };

    let properties = schema.get("properties").and_then(Value::as_object);

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !obj.contains_key(name) {
                return Err(format!("missing required argument: {name}"));
            }
        }
    }

    if let Some(props) = properties {
        for (name, value) in obj {
            let Some(prop_schema) = props.get(name) else {
                continue; // unknown keys pass through
            };
            if let Some(expected) = prop_schema.get("type").and_then(Value::as_str) {
                if !type_matches(expected, value) {
                    return Err(format!(
                        "argument '{name}' must be {expected}, got {}",
                        type_name(value)
                    ));
                }
            }
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": { "type": "string" },
                "timeout_sec": { "type": "integer" },
                "verbose": { "type": "boolean" }
            },
            "required": ["command"]
        })
    }

    #[test]
    fn valid_args_pass() {
        let args = serde_json::json!({"command": "ls", "timeout_sec": 5});
        assert!(validate_args(&schema(), &args).is_ok());
    }

    #[test]
    fn missing_required_rejected() {
        let args = serde_json::json!({"timeout_sec": 5});
        let err = validate_args(&schema(), &args).unwrap_err();
        assert!(err.contains("command"));
    }

    #[test]
    fn wrong_type_rejected() {
        let args = serde_json::json!({"command": 42});
        let err = validate_args(&schema(), &args).unwrap_err();
        assert!(err.contains("must be string"));
    }

    #[test]
    fn non_object_args_rejected() {
        let err = validate_args(&schema(), &serde_json::json!("ls")).unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let args = serde_json::json!({"command": "ls", "extra": [1, 2]});
        assert!(validate_args(&schema(), &args).is_ok());
    }
}
