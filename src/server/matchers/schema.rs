use regex::Regex;
use serde_json::{Map, Value};

use crate::server::matchers::{definition::PatternDefinition, Error, MatchResult};

/// Validates JSON documents against a JSON schema.
///
/// Supported keywords: `type`, `enum`, `const`, `required`, `properties`,
/// `additionalProperties`, `items`, `minItems`, `maxItems`, `minLength`, `maxLength`,
/// `pattern`, `minimum`, `maximum`, `exclusiveMinimum`, `exclusiveMaximum`, `allOf`, `anyOf`,
/// `oneOf` and `not`. Unknown keywords are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonSchemaPattern {
    schema: Value,
}

impl JsonSchemaPattern {
    pub fn new(schema: Value) -> Result<Self, Error> {
        check_schema(&schema, "#")?;
        Ok(Self { schema })
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn evaluate(&self, actual: &str) -> MatchResult {
        let document: Value = match serde_json::from_str(actual) {
            Ok(value) => value,
            Err(_) => return MatchResult::NO_MATCH,
        };

        let mut errors = Vec::new();
        validate(&self.schema, &document, "$", &mut errors);

        if errors.is_empty() {
            return MatchResult::EXACT;
        }

        tracing::trace!("JSON schema violations: {}", errors.join("; "));
        let count = errors.len() as f64;
        MatchResult::mismatch(count / (count + 1.0))
    }

    pub(crate) fn write_definition(&self, def: &mut PatternDefinition) {
        def.matches_json_schema = Some(self.schema.clone());
    }
}

fn check_schema(schema: &Value, location: &str) -> Result<(), Error> {
    let object = match schema {
        Value::Bool(_) => return Ok(()),
        Value::Object(object) => object,
        _ => {
            return Err(Error::InvalidJsonSchema(format!(
                "{}: a schema must be an object or a boolean",
                location
            )))
        }
    };

    if let Some(pattern) = object.get("pattern") {
        let pattern = pattern.as_str().ok_or_else(|| {
            Error::InvalidJsonSchema(format!("{}/pattern: must be a string", location))
        })?;
        Regex::new(pattern).map_err(|e| {
            Error::InvalidJsonSchema(format!("{}/pattern: {}", location, e))
        })?;
    }

    if let Some(Value::Object(properties)) = object.get("properties") {
        for (name, sub_schema) in properties {
            check_schema(sub_schema, &format!("{}/properties/{}", location, name))?;
        }
    }

    for keyword in ["items", "additionalProperties", "not"] {
        if let Some(sub_schema) = object.get(keyword) {
            check_schema(sub_schema, &format!("{}/{}", location, keyword))?;
        }
    }

    for keyword in ["allOf", "anyOf", "oneOf"] {
        if let Some(sub_schemas) = object.get(keyword) {
            let sub_schemas = sub_schemas.as_array().ok_or_else(|| {
                Error::InvalidJsonSchema(format!("{}/{}: must be an array", location, keyword))
            })?;
            for (i, sub_schema) in sub_schemas.iter().enumerate() {
                check_schema(sub_schema, &format!("{}/{}/{}", location, keyword, i))?;
            }
        }
    }

    Ok(())
}

fn validate(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let schema = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            errors.push(format!("{}: no value is allowed", path));
            return;
        }
        Value::Object(schema) => schema,
        _ => return,
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };

        if !allowed.is_empty() && !allowed.iter().any(|t| has_type(value, t)) {
            errors.push(format!("{}: expected type {}", path, allowed.join(" or ")));
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            errors.push(format!("{}: not one of the enumerated values", path));
        }
    }

    if let Some(expected) = schema.get("const") {
        if expected != value {
            errors.push(format!("{}: expected {}", path, expected));
        }
    }

    match value {
        Value::Object(object) => validate_object(schema, object, path, errors),
        Value::Array(items) => validate_array(schema, items, path, errors),
        Value::String(s) => validate_string(schema, s, path, errors),
        Value::Number(n) => {
            if let Some(n) = n.as_f64() {
                validate_number(schema, n, path, errors)
            }
        }
        _ => {}
    }

    validate_combinators(schema, value, path, errors);
}

fn has_type(value: &Value, expected: &str) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => match value {
            Value::Number(n) => n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0),
            _ => false,
        },
        _ => false,
    }
}

fn validate_object(
    schema: &Map<String, Value>,
    object: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !object.contains_key(name) {
                errors.push(format!("{}: missing required property '{}'", path, name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);

    for (name, value) in object {
        let child_path = format!("{}.{}", path, name);
        match properties.and_then(|p| p.get(name)) {
            Some(property_schema) => validate(property_schema, value, &child_path, errors),
            None => {
                if let Some(additional) = schema.get("additionalProperties") {
                    validate(additional, value, &child_path, errors);
                }
            }
        }
    }
}

fn validate_array(
    schema: &Map<String, Value>,
    items: &[Value],
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(min) = schema.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            errors.push(format!("{}: expected at least {} items", path, min));
        }
    }

    if let Some(max) = schema.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            errors.push(format!("{}: expected at most {} items", path, max));
        }
    }

    if let Some(item_schema) = schema.get("items") {
        for (i, item) in items.iter().enumerate() {
            validate(item_schema, item, &format!("{}[{}]", path, i), errors);
        }
    }
}

fn validate_string(schema: &Map<String, Value>, s: &str, path: &str, errors: &mut Vec<String>) {
    let length = s.chars().count() as u64;

    if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
        if length < min {
            errors.push(format!("{}: shorter than {}", path, min));
        }
    }

    if let Some(max) = schema.get("maxLength").and_then(Value::as_u64) {
        if length > max {
            errors.push(format!("{}: longer than {}", path, max));
        }
    }

    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        // Patterns were validated when the schema was built.
        if let Ok(re) = Regex::new(pattern) {
            if !re.is_match(s) {
                errors.push(format!("{}: does not match '{}'", path, pattern));
            }
        }
    }
}

fn validate_number(schema: &Map<String, Value>, n: f64, path: &str, errors: &mut Vec<String>) {
    let bound = |keyword: &str| schema.get(keyword).and_then(Value::as_f64);

    if let Some(min) = bound("minimum") {
        if n < min {
            errors.push(format!("{}: less than {}", path, min));
        }
    }

    if let Some(max) = bound("maximum") {
        if n > max {
            errors.push(format!("{}: greater than {}", path, max));
        }
    }

    if let Some(min) = bound("exclusiveMinimum") {
        if n <= min {
            errors.push(format!("{}: not greater than {}", path, min));
        }
    }

    if let Some(max) = bound("exclusiveMaximum") {
        if n >= max {
            errors.push(format!("{}: not less than {}", path, max));
        }
    }
}

fn validate_combinators(
    schema: &Map<String, Value>,
    value: &Value,
    path: &str,
    errors: &mut Vec<String>,
) {
    let passes = |sub_schema: &Value| {
        let mut sub_errors = Vec::new();
        validate(sub_schema, value, path, &mut sub_errors);
        sub_errors.is_empty()
    };

    if let Some(Value::Array(sub_schemas)) = schema.get("allOf") {
        for sub_schema in sub_schemas {
            validate(sub_schema, value, path, errors);
        }
    }

    if let Some(Value::Array(sub_schemas)) = schema.get("anyOf") {
        if !sub_schemas.iter().any(passes) {
            errors.push(format!("{}: matches none of anyOf", path));
        }
    }

    if let Some(Value::Array(sub_schemas)) = schema.get("oneOf") {
        let passing = sub_schemas.iter().filter(|s| passes(s)).count();
        if passing != 1 {
            errors.push(format!("{}: matches {} of oneOf, expected exactly 1", path, passing));
        }
    }

    if let Some(sub_schema) = schema.get("not") {
        if passes(sub_schema) {
            errors.push(format!("{}: must not match the 'not' schema", path));
        }
    }
}
