//! Checker for the JSON-schema subset tools declare their parameters in
//!
//! Supported keywords: `type` (object, string, integer, number, boolean,
//! array), `properties`, `required`, `enum`, `items` and
//! `additionalProperties: false`.

use serde_json::{Map, Value};

const KNOWN_TYPES: &[&str] = &["object", "string", "integer", "number", "boolean", "array"];

/// Check a tool's parameter declaration once, at registration.
pub fn validate_declaration(schema: &Value) -> Result<(), String> {
    let obj = schema
        .as_object()
        .ok_or_else(|| "parameters must be a JSON object".to_string())?;

    if obj.get("type").and_then(Value::as_str) != Some("object") {
        return Err("parameters must have \"type\": \"object\"".to_string());
    }

    let empty = Map::new();
    let properties = match obj.get("properties") {
        None => &empty,
        Some(Value::Object(props)) => props,
        Some(_) => return Err("\"properties\" must be an object".to_string()),
    };

    for (name, prop) in properties {
        check_property(name, prop)?;
    }

    if let Some(required) = obj.get("required") {
        let list = required
            .as_array()
            .ok_or_else(|| "\"required\" must be an array".to_string())?;
        for key in list {
            let key = key
                .as_str()
                .ok_or_else(|| "\"required\" entries must be strings".to_string())?;
            if !properties.contains_key(key) {
                return Err(format!("required key '{}' is not declared", key));
            }
        }
    }

    Ok(())
}

fn check_property(name: &str, prop: &Value) -> Result<(), String> {
    let prop = prop
        .as_object()
        .ok_or_else(|| format!("property '{}' must be an object", name))?;
    if let Some(ty) = prop.get("type") {
        let ty = ty
            .as_str()
            .ok_or_else(|| format!("property '{}' type must be a string", name))?;
        if !KNOWN_TYPES.contains(&ty) {
            return Err(format!("property '{}' has unsupported type '{}'", name, ty));
        }
    }
    if let Some(values) = prop.get("enum") {
        if !values.is_array() {
            return Err(format!("property '{}' enum must be an array", name));
        }
    }
    if let Some(items) = prop.get("items") {
        check_property(&format!("{}[]", name), items)?;
    }
    Ok(())
}

/// Check call arguments against a declaration.
pub fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    check_value("arguments", schema, args)
}

fn check_value(at: &str, schema: &Value, value: &Value) -> Result<(), String> {
    if let Some(ty) = schema.get("type").and_then(Value::as_str) {
        if !type_matches(ty, value) {
            return Err(format!(
                "{} must be {} {}, got {}",
                at,
                article(ty),
                ty,
                type_name(value)
            ));
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            let options: Vec<String> = allowed.iter().map(Value::to_string).collect();
            return Err(format!("{} must be one of {}", at, options.join(", ")));
        }
    }

    if let Value::Object(map) = value {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            for key in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(key) {
                    return Err(format!("missing required argument '{}'", key));
                }
            }
        }

        if let Some(props) = properties {
            for (key, v) in map {
                match props.get(key) {
                    Some(prop_schema) => check_value(key, prop_schema, v)?,
                    None if schema.get("additionalProperties") == Some(&Value::Bool(false)) => {
                        return Err(format!("unexpected argument '{}'", key));
                    }
                    None => {}
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            check_value(&format!("{}[{}]", at, i), item_schema, item)?;
        }
    }

    Ok(())
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn article(ty: &str) -> &'static str {
    if ty.starts_with(['a', 'e', 'i', 'o', 'u']) {
        "an"
    } else {
        "a"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "limit": { "type": "integer" },
                "mode": { "type": "string", "enum": ["fast", "slow"] },
                "tags": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    #[test]
    fn test_declaration_ok() {
        assert!(validate_declaration(&schema()).is_ok());
        assert!(validate_declaration(&json!({"type": "object"})).is_ok());
    }

    #[test]
    fn test_declaration_errors() {
        assert!(validate_declaration(&json!("nope")).is_err());
        assert!(validate_declaration(&json!({"type": "string"})).is_err());
        assert!(validate_declaration(&json!({"type": "object", "properties": []})).is_err());
        let undeclared = json!({
            "type": "object",
            "properties": {"a": {"type": "string"}},
            "required": ["b"]
        });
        assert!(validate_declaration(&undeclared)
            .unwrap_err()
            .contains("'b'"));
        let bad_type = json!({
            "type": "object",
            "properties": {"a": {"type": "date"}}
        });
        assert!(validate_declaration(&bad_type).is_err());
    }

    #[test]
    fn test_args_ok() {
        let args = json!({"path": "a.txt", "limit": 5, "mode": "fast", "tags": ["x"]});
        assert!(validate_args(&schema(), &args).is_ok());
    }

    #[test]
    fn test_args_missing_required() {
        let err = validate_args(&schema(), &json!({"limit": 1})).unwrap_err();
        assert_eq!(err, "missing required argument 'path'");
    }

    #[test]
    fn test_args_wrong_types() {
        let err = validate_args(&schema(), &json!({"path": 3})).unwrap_err();
        assert_eq!(err, "path must be a string, got integer");

        let err = validate_args(&schema(), &json!({"path": "a", "limit": 1.5})).unwrap_err();
        assert_eq!(err, "limit must be an integer, got number");

        let err = validate_args(&schema(), &json!({"path": "a", "tags": [1]})).unwrap_err();
        assert!(err.starts_with("tags[0]"));

        let err = validate_args(&schema(), &json!([1])).unwrap_err();
        assert!(err.contains("must be an object"));
    }

    #[test]
    fn test_args_enum_and_extra() {
        let err = validate_args(&schema(), &json!({"path": "a", "mode": "medium"})).unwrap_err();
        assert!(err.contains("one of"));

        let err = validate_args(&schema(), &json!({"path": "a", "color": "red"})).unwrap_err();
        assert_eq!(err, "unexpected argument 'color'");
    }
}
