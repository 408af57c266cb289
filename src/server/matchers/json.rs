use std::sync::Arc;

use assert_json_diff::{assert_json_matches_no_panic, CompareMode, Config};
use serde_json::Value;
use serde_json_path::JsonPath;

use crate::server::matchers::{
    definition::{ExpressionDefinition, PatternDefinition},
    multi_value::maximum_matching,
    Error, MatchResult, StringValuePattern,
};

/// Structural JSON equality, optionally lenient about array order and extra elements.
#[derive(Debug, Clone)]
pub struct JsonEqualityPattern {
    expected: Value,
    ignore_array_order: bool,
    ignore_extra_elements: bool,
}

impl JsonEqualityPattern {
    pub fn new(expected: Value) -> Self {
        Self {
            expected,
            ignore_array_order: false,
            ignore_extra_elements: false,
        }
    }

    pub fn ignoring_array_order(mut self, ignore: bool) -> Self {
        self.ignore_array_order = ignore;
        self
    }

    pub fn ignoring_extra_elements(mut self, ignore: bool) -> Self {
        self.ignore_extra_elements = ignore;
        self
    }

    pub fn expected(&self) -> &Value {
        &self.expected
    }

    pub fn evaluate(&self, actual: &str) -> MatchResult {
        let actual: Value = match serde_json::from_str(actual) {
            Ok(value) => value,
            Err(_) => return MatchResult::NO_MATCH,
        };

        if self.ignore_array_order
            && self.ignore_extra_elements
            && includes_unordered(&self.expected, &actual)
        {
            return MatchResult::EXACT;
        }

        let (expected, actual) = if self.ignore_array_order {
            (sort_arrays(&self.expected), sort_arrays(&actual))
        } else {
            (self.expected.clone(), actual)
        };

        let mode = if self.ignore_extra_elements {
            CompareMode::Inclusive
        } else {
            CompareMode::Strict
        };

        match assert_json_matches_no_panic(&actual, &expected, Config::new(mode)) {
            Ok(()) if !(self.ignore_array_order && self.ignore_extra_elements) => MatchResult::EXACT,
            Ok(()) => MatchResult::mismatch(0.0),
            Err(differences) => {
                let count = differences
                    .split("\n\n")
                    .filter(|d| !d.trim().is_empty())
                    .count()
                    .max(1);

                MatchResult::mismatch(count as f64 / leaf_count(&expected).max(1) as f64)
            }
        }
    }

    pub(crate) fn write_definition(&self, def: &mut PatternDefinition) {
        def.equal_to_json = Some(self.expected.clone());
        if self.ignore_array_order {
            def.ignore_array_order = Some(true);
        }
        if self.ignore_extra_elements {
            def.ignore_extra_elements = Some(true);
        }
    }
}

fn sort_arrays(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.iter().map(sort_arrays).collect();
            items.sort_by_cached_key(|v| v.to_string());
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sort_arrays(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Whether `actual` contains everything in `expected`. Objects may carry extra keys, arrays
/// extra items, and each expected item needs its own actual item in any position.
fn includes_unordered(expected: &Value, actual: &Value) -> bool {
    match (expected, actual) {
        (Value::Object(expected), Value::Object(actual)) => expected.iter().all(|(key, value)| {
            actual
                .get(key)
                .map_or(false, |other| includes_unordered(value, other))
        }),
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() > actual.len() {
                return false;
            }

            let edges: Vec<Vec<bool>> = expected
                .iter()
                .map(|e| actual.iter().map(|a| includes_unordered(e, a)).collect())
                .collect();

            maximum_matching(&edges, actual.len()) == expected.len()
        }
        (Value::Number(expected), Value::Number(actual)) => expected.as_f64() == actual.as_f64(),
        (expected, actual) => expected == actual,
    }
}

fn leaf_count(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.iter().map(leaf_count).sum::<usize>().max(1),
        Value::Object(map) => map.values().map(leaf_count).sum::<usize>().max(1),
        _ => 1,
    }
}

/// Matches documents for which a JSONPath expression yields a result, optionally requiring the
/// result to satisfy a further pattern.
#[derive(Debug, Clone)]
pub struct JsonPathPattern {
    expression: String,
    path: Arc<JsonPath>,
    value_pattern: Option<Box<StringValuePattern>>,
}

impl JsonPathPattern {
    pub fn new(expression: &str, value_pattern: Option<StringValuePattern>) -> Result<Self, Error> {
        let path = JsonPath::parse(expression)
            .map_err(|e| Error::InvalidJsonPath(expression.to_string(), e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            path: Arc::new(path),
            value_pattern: value_pattern.map(Box::new),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn evaluate(&self, actual: &str) -> MatchResult {
        let document: Value = match serde_json::from_str(actual) {
            Ok(value) => value,
            Err(_) => return MatchResult::NO_MATCH,
        };

        self.evaluate_value(&document)
    }

    pub fn evaluate_value(&self, document: &Value) -> MatchResult {
        let nodes = self.path.query(document).all();

        let pattern = match &self.value_pattern {
            None => return MatchResult::of(!nodes.is_empty()),
            Some(pattern) => pattern,
        };

        if nodes.is_empty() {
            return pattern.evaluate(None);
        }

        let mut candidates: Vec<String> = nodes.iter().map(|v| render(v)).collect();
        if nodes.len() > 1 {
            let all = Value::Array(nodes.iter().map(|v| (*v).clone()).collect());
            candidates.push(all.to_string());
        }

        MatchResult::any(candidates.iter().map(|c| pattern.evaluate(Some(c))))
    }

    pub fn describe(&self) -> String {
        match &self.value_pattern {
            None => self.expression.clone(),
            Some(p) => format!("{} {}", self.expression, p),
        }
    }

    pub(crate) fn write_definition(&self, def: &mut PatternDefinition) {
        def.matches_json_path = Some(ExpressionDefinition::new(
            &self.expression,
            self.value_pattern.as_deref(),
        ));
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
