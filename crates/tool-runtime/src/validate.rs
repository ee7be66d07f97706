//! Argument-shape checks run before a tool is invoked.
//!
//! Supports the JSON Schema subset tools declare: `type` (single or list),
//! `required`, `properties`, `enum` and `additionalProperties: false`.

use serde_json::Value;

pub fn validate_arguments(schema: &Value, input: &Value) -> Result<(), String> {
    check_type(schema, input, "arguments")?;

    let Some(obj) = input.as_object() else {
        return Ok(());
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match obj.get(name) {
                None | Some(Value::Null) => {
                    return Err(format!("missing required argument '{name}'"));
                }
                Some(_) => {}
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        match properties.and_then(|p| p.get(key)) {
            Some(prop) => {
                if value.is_null() {
                    continue;
                }
                check_type(prop, value, key)?;
                if let Some(allowed) = prop.get("enum").and_then(Value::as_array) {
                    if !allowed.contains(value) {
                        return Err(format!("argument '{key}' must be one of {}", Value::Array(allowed.clone())));
                    }
                }
            }
            None if closed => return Err(format!("unexpected argument '{key}'")),
            None => {}
        }
    }
    Ok(())
}

fn check_type(schema: &Value, value: &Value, label: &str) -> Result<(), String> {
    let accepted: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => return Ok(()),
    };
    if accepted.iter().any(|t| matches_type(t, value)) {
        Ok(())
    } else {
        Err(format!(
            "'{label}' must be of type {}, got {}",
            accepted.join(" or "),
            type_name(value)
        ))
    }
}

fn matches_type(ty: &str, value: &Value) -> bool {
    match ty {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "null" => value.is_null(),
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
