//! The declarative (JSON / YAML) shape of patterns. Definitions are plain data; `compile`
//! validates them and builds the matching structures, and every compiled pattern converts back
//! into the definition it came from.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::server::matchers::{
    date::{DateTimeComparison, DateTimePattern, DateTimeUnit, Truncation},
    json::{JsonEqualityPattern, JsonPathPattern},
    multi_value::MultiValuePattern,
    pattern::StubRegex,
    schema::JsonSchemaPattern,
    xml::XPathPattern,
    Error, StringValuePattern,
};

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_insensitive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub does_not_contain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub does_not_match: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub absent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to_json: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_array_order: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore_extra_elements: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches_json_path: Option<ExpressionDefinition>,
    #[serde(
        rename = "matchesXPath",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub matches_x_path: Option<ExpressionDefinition>,
    #[serde(
        rename = "xPathNamespaces",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub x_path_namespaces: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub equal_to_date_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_offset: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_offset_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncate_actual: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_equal_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matches_json_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub and: Option<Vec<PatternDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub or: Option<Vec<PatternDefinition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not: Option<Box<PatternDefinition>>,
}

impl PatternDefinition {
    fn operators(&self) -> Vec<&'static str> {
        let mut operators = Vec::new();
        let mut check = |present: bool, name: &'static str| {
            if present {
                operators.push(name);
            }
        };

        check(self.equal_to.is_some(), "equalTo");
        check(self.contains.is_some(), "contains");
        check(self.does_not_contain.is_some(), "doesNotContain");
        check(self.matches.is_some(), "matches");
        check(self.does_not_match.is_some(), "doesNotMatch");
        check(self.absent == Some(true), "absent");
        check(self.equal_to_json.is_some(), "equalToJson");
        check(self.matches_json_path.is_some(), "matchesJsonPath");
        check(self.matches_x_path.is_some(), "matchesXPath");
        check(self.before.is_some(), "before");
        check(self.after.is_some(), "after");
        check(self.equal_to_date_time.is_some(), "equalToDateTime");
        check(self.binary_equal_to.is_some(), "binaryEqualTo");
        check(self.matches_json_schema.is_some(), "matchesJsonSchema");
        check(self.and.is_some(), "and");
        check(self.or.is_some(), "or");
        check(self.not.is_some(), "not");

        operators
    }

    /// Validates the definition and builds the pattern it describes. Exactly one operator must
    /// be present.
    pub fn compile(&self) -> Result<StringValuePattern, Error> {
        match self.operators().as_slice() {
            [] => {
                return Err(Error::InvalidDefinition(
                    "a pattern needs exactly one operator, found none".to_string(),
                ))
            }
            [_] => {}
            many => {
                return Err(Error::InvalidDefinition(format!(
                    "a pattern needs exactly one operator, found: {}",
                    many.join(", ")
                )))
            }
        }

        if let Some(expected) = &self.equal_to {
            return Ok(StringValuePattern::EqualTo {
                expected: expected.clone(),
                case_insensitive: self.case_insensitive.unwrap_or(false),
            });
        }

        if let Some(expected) = &self.contains {
            return Ok(StringValuePattern::Contains(expected.clone()));
        }

        if let Some(expected) = &self.does_not_contain {
            return Ok(StringValuePattern::DoesNotContain(expected.clone()));
        }

        if let Some(expression) = &self.matches {
            return Ok(StringValuePattern::Matches(StubRegex::new(expression)?));
        }

        if let Some(expression) = &self.does_not_match {
            return Ok(StringValuePattern::DoesNotMatch(StubRegex::new(expression)?));
        }

        if self.absent == Some(true) {
            return Ok(StringValuePattern::Absent);
        }

        if let Some(expected) = &self.equal_to_json {
            // A JSON document given as a string is parsed, anything else is taken literally.
            let expected = match expected {
                Value::String(s) => serde_json::from_str(s).map_err(|e| {
                    Error::InvalidDefinition(format!("equalToJson is not valid JSON: {}", e))
                })?,
                other => other.clone(),
            };

            return Ok(StringValuePattern::EqualToJson(
                JsonEqualityPattern::new(expected)
                    .ignoring_array_order(self.ignore_array_order.unwrap_or(false))
                    .ignoring_extra_elements(self.ignore_extra_elements.unwrap_or(false)),
            ));
        }

        if let Some(expression) = &self.matches_json_path {
            let (expression, value_pattern) = expression.compile("matchesJsonPath")?;
            return Ok(StringValuePattern::MatchesJsonPath(JsonPathPattern::new(
                &expression,
                value_pattern,
            )?));
        }

        if let Some(expression) = &self.matches_x_path {
            let (expression, value_pattern) = expression.compile("matchesXPath")?;
            return Ok(StringValuePattern::MatchesXPath(XPathPattern::new(
                &expression,
                self.x_path_namespaces.clone().unwrap_or_default(),
                value_pattern,
            )?));
        }

        if let Some(expected) = &self.before {
            return self.compile_date_time(DateTimeComparison::Before, expected);
        }

        if let Some(expected) = &self.after {
            return self.compile_date_time(DateTimeComparison::After, expected);
        }

        if let Some(expected) = &self.equal_to_date_time {
            return self.compile_date_time(DateTimeComparison::EqualTo, expected);
        }

        if let Some(encoded) = &self.binary_equal_to {
            let bytes = BASE64.decode(encoded).map_err(|e| {
                Error::InvalidDefinition(format!("binaryEqualTo is not valid base64: {}", e))
            })?;
            return Ok(StringValuePattern::BinaryEqualTo(bytes.into()));
        }

        if let Some(schema) = &self.matches_json_schema {
            return Ok(StringValuePattern::MatchesJsonSchema(JsonSchemaPattern::new(
                schema.clone(),
            )?));
        }

        if let Some(definitions) = &self.and {
            return Ok(StringValuePattern::And(compile_all(definitions, "and")?));
        }

        if let Some(definitions) = &self.or {
            return Ok(StringValuePattern::Or(compile_all(definitions, "or")?));
        }

        match &self.not {
            Some(definition) => Ok(StringValuePattern::Not(Box::new(
                definition.compile().map_err(|e| e.at("not"))?,
            ))),
            None => Err(Error::InvalidDefinition("unknown operator".to_string())),
        }
    }

    fn compile_date_time(
        &self,
        comparison: DateTimeComparison,
        expected: &str,
    ) -> Result<StringValuePattern, Error> {
        let mut pattern = DateTimePattern::with_expected_format(
            comparison,
            expected,
            self.expected_format.as_deref(),
        )?;

        if let Some(format) = &self.actual_format {
            pattern = pattern.with_actual_format(format.clone());
        }

        if let Some(amount) = self.expected_offset {
            let unit_name = self.expected_offset_unit.as_deref().unwrap_or("days");
            let unit = DateTimeUnit::parse(unit_name).ok_or_else(|| {
                Error::InvalidDateTime(unit_name.to_string(), "unknown offset unit".to_string())
            })?;
            pattern = pattern.with_offset(amount, unit);
        }

        if let Some(truncation) = &self.truncate_expected {
            pattern = pattern.truncate_expected(parse_truncation(truncation)?);
        }

        if let Some(truncation) = &self.truncate_actual {
            pattern = pattern.truncate_actual(parse_truncation(truncation)?);
        }

        Ok(StringValuePattern::DateTime(pattern))
    }
}

fn parse_truncation(value: &str) -> Result<Truncation, Error> {
    Truncation::parse(value).ok_or_else(|| {
        Error::InvalidDateTime(value.to_string(), "unknown truncation".to_string())
    })
}

fn compile_all(
    definitions: &[PatternDefinition],
    operator: &str,
) -> Result<Vec<StringValuePattern>, Error> {
    if definitions.is_empty() {
        return Err(Error::InvalidDefinition(format!(
            "'{}' needs at least one pattern",
            operator
        )));
    }

    definitions
        .iter()
        .enumerate()
        .map(|(i, d)| d.compile().map_err(|e| e.at(format!("{}[{}]", operator, i))))
        .collect()
}

impl From<&StringValuePattern> for PatternDefinition {
    fn from(pattern: &StringValuePattern) -> Self {
        let mut def = PatternDefinition::default();

        match pattern {
            StringValuePattern::EqualTo {
                expected,
                case_insensitive,
            } => {
                def.equal_to = Some(expected.clone());
                if *case_insensitive {
                    def.case_insensitive = Some(true);
                }
            }
            StringValuePattern::Contains(expected) => def.contains = Some(expected.clone()),
            StringValuePattern::DoesNotContain(expected) => {
                def.does_not_contain = Some(expected.clone())
            }
            StringValuePattern::Matches(re) => def.matches = Some(re.as_str().to_string()),
            StringValuePattern::DoesNotMatch(re) => {
                def.does_not_match = Some(re.as_str().to_string())
            }
            StringValuePattern::Absent => def.absent = Some(true),
            StringValuePattern::EqualToJson(p) => p.write_definition(&mut def),
            StringValuePattern::MatchesJsonPath(p) => p.write_definition(&mut def),
            StringValuePattern::MatchesXPath(p) => p.write_definition(&mut def),
            StringValuePattern::DateTime(p) => p.write_definition(&mut def),
            StringValuePattern::BinaryEqualTo(bytes) => {
                def.binary_equal_to = Some(BASE64.encode(bytes))
            }
            StringValuePattern::MatchesJsonSchema(p) => p.write_definition(&mut def),
            StringValuePattern::And(patterns) => {
                def.and = Some(patterns.iter().map(PatternDefinition::from).collect())
            }
            StringValuePattern::Or(patterns) => {
                def.or = Some(patterns.iter().map(PatternDefinition::from).collect())
            }
            StringValuePattern::Not(p) => {
                def.not = Some(Box::new(PatternDefinition::from(p.as_ref())))
            }
        }

        def
    }
}

/// A JSONPath or XPath expression, either bare or with a pattern the selected value must
/// satisfy, e.g. `{"expression": "$.name", "equalTo": "ann"}`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ExpressionDefinition {
    Expression(String),
    WithPattern {
        expression: String,
        #[serde(flatten)]
        pattern: Box<PatternDefinition>,
    },
}

impl ExpressionDefinition {
    pub fn new(expression: &str, pattern: Option<&StringValuePattern>) -> Self {
        match pattern {
            None => ExpressionDefinition::Expression(expression.to_string()),
            Some(p) => ExpressionDefinition::WithPattern {
                expression: expression.to_string(),
                pattern: Box::new(PatternDefinition::from(p)),
            },
        }
    }

    fn compile(&self, operator: &str) -> Result<(String, Option<StringValuePattern>), Error> {
        match self {
            ExpressionDefinition::Expression(expression) => Ok((expression.clone(), None)),
            ExpressionDefinition::WithPattern {
                expression,
                pattern,
            } if pattern.operators().is_empty() => Ok((expression.clone(), None)),
            ExpressionDefinition::WithPattern {
                expression,
                pattern,
            } => {
                let compiled = pattern.compile().map_err(|e| e.at(operator))?;
                Ok((expression.clone(), Some(compiled)))
            }
        }
    }
}

/// The definition of a pattern over a multi-valued field (headers, query and form
/// parameters).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum MultiValuePatternDefinition {
    HasExactly {
        #[serde(rename = "hasExactly")]
        has_exactly: Vec<PatternDefinition>,
    },
    Includes {
        includes: Vec<PatternDefinition>,
    },
    Single(PatternDefinition),
}

impl MultiValuePatternDefinition {
    pub fn compile(&self) -> Result<MultiValuePattern, Error> {
        match self {
            MultiValuePatternDefinition::Single(def) => Ok(MultiValuePattern::Single(def.compile()?)),
            MultiValuePatternDefinition::HasExactly { has_exactly } => Ok(
                MultiValuePattern::HasExactly(compile_all(has_exactly, "hasExactly")?),
            ),
            MultiValuePatternDefinition::Includes { includes } => Ok(MultiValuePattern::Includes(
                compile_all(includes, "includes")?,
            )),
        }
    }
}

impl From<&MultiValuePattern> for MultiValuePatternDefinition {
    fn from(pattern: &MultiValuePattern) -> Self {
        match pattern {
            MultiValuePattern::Single(p) => MultiValuePatternDefinition::Single(p.into()),
            MultiValuePattern::HasExactly(patterns) => MultiValuePatternDefinition::HasExactly {
                has_exactly: patterns.iter().map(PatternDefinition::from).collect(),
            },
            MultiValuePattern::Includes(patterns) => MultiValuePatternDefinition::Includes {
                includes: patterns.iter().map(PatternDefinition::from).collect(),
            },
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MultipartPatternDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_type: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, MultiValuePatternDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_patterns: Vec<PatternDefinition>,
}

/// The declarative request pattern. At most one of the URL fields may be set.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPatternDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_path_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<PatternDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, MultiValuePatternDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query_parameters: BTreeMap<String, MultiValuePatternDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub form_parameters: BTreeMap<String, MultiValuePatternDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cookies: BTreeMap<String, PatternDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub path_parameters: BTreeMap<String, PatternDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body_patterns: Vec<PatternDefinition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multipart_patterns: Vec<MultipartPatternDefinition>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn compile(value: Value) -> Result<StringValuePattern, Error> {
        serde_json::from_value::<PatternDefinition>(value)
            .unwrap()
            .compile()
    }

    #[test]
    fn compiles_simple_operators() {
        assert!(compile(json!({"equalTo": "a"}))
            .unwrap()
            .evaluate(Some("a"))
            .is_exact_match());
        assert!(compile(json!({"equalTo": "A", "caseInsensitive": true}))
            .unwrap()
            .evaluate(Some("a"))
            .is_exact_match());
        assert!(compile(json!({"matches": "[0-9]+"}))
            .unwrap()
            .evaluate(Some("123"))
            .is_exact_match());
        assert!(compile(json!({"absent": true}))
            .unwrap()
            .evaluate(None)
            .is_exact_match());
    }

    #[test]
    fn equal_to_json_accepts_strings_and_values() {
        let from_string = compile(json!({"equalToJson": "{\"a\": 1}"})).unwrap();
        let from_value = compile(json!({"equalToJson": {"a": 1}})).unwrap();

        assert!(from_string.evaluate(Some(r#"{"a":1}"#)).is_exact_match());
        assert_eq!(from_string, from_value);
    }

    #[test]
    fn json_path_with_sub_pattern() {
        let p = compile(json!({"matchesJsonPath": {"expression": "$.name", "contains": "nn"}}))
            .unwrap();
        assert!(p.evaluate(Some(r#"{"name":"ann"}"#)).is_exact_match());

        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(
            back,
            json!({"matchesJsonPath": {"expression": "$.name", "contains": "nn"}})
        );
    }

    #[test]
    fn date_time_with_offset_and_truncation() {
        let p = compile(json!({
            "equalToDateTime": "2021-01-31T10:00:00Z",
            "expectedOffset": 1,
            "expectedOffsetUnit": "days",
            "truncateExpected": "first day of month"
        }))
        .unwrap();

        assert!(p.evaluate(Some("2021-02-01T00:00:00Z")).is_exact_match());
    }

    #[test]
    fn date_time_with_expected_format_round_trips() {
        let definition = json!({
            "before": "01/06/2021",
            "expectedFormat": "%d/%m/%Y",
            "actualFormat": "%d/%m/%Y"
        });

        let p = compile(definition.clone()).unwrap();
        assert!(p.evaluate(Some("31/05/2021")).is_exact_match());
        assert!(!p.evaluate(Some("02/06/2021")).is_exact_match());

        assert_eq!(serde_json::to_value(&p).unwrap(), definition);
    }

    #[test]
    fn rejects_zero_or_several_operators() {
        assert!(matches!(compile(json!({})), Err(Error::InvalidDefinition(_))));
        assert!(matches!(
            compile(json!({"equalTo": "a", "contains": "b"})),
            Err(Error::InvalidDefinition(_))
        ));
    }

    #[test]
    fn nested_errors_name_their_position() {
        let err = compile(json!({"or": [{"equalTo": "a"}, {"matches": "("}]})).unwrap_err();
        assert_eq!(err.field(), Some("or[1]"));
        assert!(matches!(err.root_cause(), Error::InvalidRegex(_, _)));
    }

    #[test]
    fn binary_equal_to_is_base64() {
        let p = compile(json!({"binaryEqualTo": "AQID"})).unwrap();
        assert!(p.evaluate_bytes(Some(&[1, 2, 3])).is_exact_match());
        assert!(compile(json!({"binaryEqualTo": "!!"})).is_err());
    }

    #[test]
    fn multi_value_definitions() {
        let def: MultiValuePatternDefinition =
            serde_json::from_value(json!({"hasExactly": [{"equalTo": "a"}, {"equalTo": "b"}]}))
                .unwrap();
        assert!(matches!(def, MultiValuePatternDefinition::HasExactly { .. }));

        let def: MultiValuePatternDefinition =
            serde_json::from_value(json!({"includes": [{"equalTo": "a"}]})).unwrap();
        assert!(matches!(def, MultiValuePatternDefinition::Includes { .. }));

        let def: MultiValuePatternDefinition =
            serde_json::from_value(json!({"contains": "a"})).unwrap();
        assert!(matches!(def, MultiValuePatternDefinition::Single(_)));
    }
}
