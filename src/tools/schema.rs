//! Argument validation against a tool's parameter schema.
//!
//! Covers the JSON Schema subset tool declarations use in practice: `type`
//! (including type arrays), `properties`, `required`, `enum`, `items`,
//! `minimum`/`maximum`, `minLength`/`maxLength`, `pattern` and
//! `additionalProperties: false`. Unknown keywords are ignored.
//!
//! Every problem is collected rather than stopping at the first, so the model
//! sees all of them in a single tool result.

use regex::Regex;
use serde_json::{Map, Value};

/// Validate `args` against `schema`.
///
/// Returns the list of problems, each prefixed with the JSON path of the
/// offending value (`$` is the root).
///
/// # Example
/// ```
/// use agentrun::tools::schema::validate_arguments;
/// use serde_json::json;
///
/// let schema = json!({
///     "type": "object",
///     "properties": { "key": { "type": "string" } },
///     "required": ["key"]
/// });
/// assert!(validate_arguments(&schema, &json!({"key": "expert1"})).is_ok());
///
/// let problems = validate_arguments(&schema, &json!({})).unwrap_err();
/// assert_eq!(problems, vec!["$: missing required property 'key'".to_string()]);
/// ```
pub fn validate_arguments(schema: &Value, args: &Value) -> Result<(), Vec<String>> {
    let mut problems = Vec::new();
    check(schema, args, "$", &mut problems);
    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems)
    }
}

fn check(schema: &Value, value: &Value, path: &str, problems: &mut Vec<String>) {
    let Some(schema) = schema.as_object() else {
        // `true`, `{}` or anything non-object accepts everything
        return;
    };

    if let Some(expected) = schema.get("type") {
        if !type_matches(expected, value) {
            problems.push(format!(
                "{}: expected {}, got {}",
                path,
                describe_type(expected),
                json_type(value)
            ));
            // Further keywords assume the declared type
            return;
        }
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            let allowed: Vec<String> = options.iter().map(Value::to_string).collect();
            problems.push(format!(
                "{}: {} is not one of [{}]",
                path,
                value,
                allowed.join(", ")
            ));
        }
    }

    match value {
        Value::Object(map) => check_object(schema, map, path, problems),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (i, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, i), problems);
                }
            }
        }
        Value::String(s) => check_string(schema, s, path, problems),
        Value::Number(n) => {
            if let Some(x) = n.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
                    if x < min {
                        problems.push(format!("{}: {} is less than minimum {}", path, n, min));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
                    if x > max {
                        problems.push(format!("{}: {} is greater than maximum {}", path, n, max));
                    }
                }
            }
        }
        Value::Bool(_) | Value::Null => {}
    }
}

fn check_object(
    schema: &Map<String, Value>,
    map: &Map<String, Value>,
    path: &str,
    problems: &mut Vec<String>,
) {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                problems.push(format!("{}: missing required property '{}'", path, name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, val) in map {
        match properties.and_then(|p| p.get(key)) {
            Some(prop_schema) => check(prop_schema, val, &format!("{}.{}", path, key), problems),
            None if closed => {
                problems.push(format!("{}: unexpected property '{}'", path, key));
            }
            None => {}
        }
    }
}

fn check_string(schema: &Map<String, Value>, s: &str, path: &str, problems: &mut Vec<String>) {
    let len = s.chars().count() as u64;
    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if len < min {
            problems.push(format!("{}: length {} is shorter than {}", path, len, min));
        }
    }
    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if len > max {
            problems.push(format!("{}: length {} is longer than {}", path, len, max));
        }
    }
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) if !re.is_match(s) => {
                problems.push(format!("{}: does not match pattern '{}'", path, pattern));
            }
            Ok(_) => {}
            Err(e) => problems.push(format!("{}: schema pattern is invalid: {}", path, e)),
        }
    }
}

fn type_matches(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(t) => single_type_matches(t, value),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .any(|t| single_type_matches(t, value)),
        _ => true,
    }
}

fn single_type_matches(t: &str, value: &Value) -> bool {
    match t {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
            }
            _ => false,
        },
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(t) => t.clone(),
        Value::Array(types) => types
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(" or "),
        other => other.to_string(),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
