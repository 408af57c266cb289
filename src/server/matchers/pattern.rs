use std::{collections::BTreeMap, fmt};

use bytes::Bytes;
use regex::Regex;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::server::matchers::{
    comparison::{
        bytes_distance, distance_for_substring, normalize, regex_unmatched_length,
        string_contains, string_distance, string_equals,
    },
    date::{DateTimeComparison, DateTimePattern},
    definition::PatternDefinition,
    json::{JsonEqualityPattern, JsonPathPattern},
    schema::JsonSchemaPattern,
    xml::XPathPattern,
    Error, MatchResult,
};

/// A regular expression that must match the whole value. The unanchored form is kept to grade
/// partial matches.
#[derive(Debug, Clone)]
pub struct StubRegex {
    source: String,
    anchored: Regex,
    search: Regex,
}

impl StubRegex {
    pub fn new(expression: &str) -> Result<Self, Error> {
        let invalid = |e: regex::Error| Error::InvalidRegex(expression.to_string(), e.to_string());

        let search = Regex::new(expression).map_err(invalid)?;
        let anchored = Regex::new(&format!("^(?:{})$", expression)).map_err(invalid)?;

        Ok(Self {
            source: expression.to_string(),
            anchored,
            search,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, value: &str) -> bool {
        self.anchored.is_match(value)
    }

    /// Share of `value` that the expression does not cover.
    pub fn distance(&self, value: &str) -> f64 {
        if self.is_match(value) {
            return 0.0;
        }

        if value.is_empty() {
            return 1.0;
        }

        normalize(regex_unmatched_length(value, &self.search), value.len())
    }
}

impl PartialEq for StubRegex {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

/// A single predicate over one string or byte value.
#[derive(Debug, Clone)]
pub enum StringValuePattern {
    EqualTo {
        expected: String,
        case_insensitive: bool,
    },
    Contains(String),
    DoesNotContain(String),
    Matches(StubRegex),
    DoesNotMatch(StubRegex),
    Absent,
    EqualToJson(JsonEqualityPattern),
    MatchesJsonPath(JsonPathPattern),
    MatchesXPath(XPathPattern),
    DateTime(DateTimePattern),
    BinaryEqualTo(Bytes),
    MatchesJsonSchema(JsonSchemaPattern),
    And(Vec<StringValuePattern>),
    Or(Vec<StringValuePattern>),
    Not(Box<StringValuePattern>),
}

impl StringValuePattern {
    /// Evaluates the pattern against a value that may be absent.
    pub fn evaluate(&self, value: Option<&str>) -> MatchResult {
        match self {
            StringValuePattern::Absent => MatchResult::of(value.is_none()),
            StringValuePattern::And(patterns) => {
                MatchResult::all(patterns.iter().map(|p| p.evaluate(value)))
            }
            StringValuePattern::Or(patterns) => {
                MatchResult::any(patterns.iter().map(|p| p.evaluate(value)))
            }
            StringValuePattern::Not(pattern) => {
                MatchResult::of(!pattern.evaluate(value).is_exact_match())
            }
            _ => match value {
                None => MatchResult::NO_MATCH,
                Some(v) => self.evaluate_present(v),
            },
        }
    }

    /// Evaluates the pattern against raw bytes. Only `BinaryEqualTo` looks at the bytes
    /// directly, every other operator sees the lossily decoded text.
    pub fn evaluate_bytes(&self, value: Option<&[u8]>) -> MatchResult {
        match self {
            StringValuePattern::BinaryEqualTo(expected) => match value {
                None => MatchResult::NO_MATCH,
                Some(actual) if actual == expected.as_ref() => MatchResult::EXACT,
                Some(actual) => MatchResult::mismatch(bytes_distance(expected, actual)),
            },
            StringValuePattern::And(patterns) => {
                MatchResult::all(patterns.iter().map(|p| p.evaluate_bytes(value)))
            }
            StringValuePattern::Or(patterns) => {
                MatchResult::any(patterns.iter().map(|p| p.evaluate_bytes(value)))
            }
            StringValuePattern::Not(pattern) => {
                MatchResult::of(!pattern.evaluate_bytes(value).is_exact_match())
            }
            _ => {
                let text = value.map(String::from_utf8_lossy);
                self.evaluate(text.as_deref())
            }
        }
    }

    fn evaluate_present(&self, value: &str) -> MatchResult {
        match self {
            StringValuePattern::EqualTo {
                expected,
                case_insensitive,
            } => {
                if string_equals(!case_insensitive, expected, value) {
                    MatchResult::EXACT
                } else {
                    MatchResult::mismatch(string_distance(!case_insensitive, expected, value))
                }
            }
            StringValuePattern::Contains(expected) => {
                if string_contains(true, expected, value) {
                    MatchResult::EXACT
                } else {
                    MatchResult::mismatch(distance_for_substring(true, expected, value))
                }
            }
            StringValuePattern::DoesNotContain(expected) => {
                MatchResult::of(!string_contains(true, expected, value))
            }
            StringValuePattern::Matches(re) => {
                if re.is_match(value) {
                    MatchResult::EXACT
                } else {
                    MatchResult::mismatch(re.distance(value))
                }
            }
            StringValuePattern::DoesNotMatch(re) => MatchResult::of(!re.is_match(value)),
            StringValuePattern::EqualToJson(p) => p.evaluate(value),
            StringValuePattern::MatchesJsonPath(p) => p.evaluate(value),
            StringValuePattern::MatchesXPath(p) => p.evaluate(value),
            StringValuePattern::DateTime(p) => p.evaluate(value),
            StringValuePattern::MatchesJsonSchema(p) => p.evaluate(value),
            StringValuePattern::BinaryEqualTo(_) => self.evaluate_bytes(Some(value.as_bytes())),
            StringValuePattern::Absent
            | StringValuePattern::And(_)
            | StringValuePattern::Or(_)
            | StringValuePattern::Not(_) => self.evaluate(Some(value)),
        }
    }

    /// Combines both patterns so that both must match. Nested conjunctions are flattened.
    pub fn and(self, other: StringValuePattern) -> StringValuePattern {
        match self {
            StringValuePattern::And(mut patterns) => {
                patterns.push(other);
                StringValuePattern::And(patterns)
            }
            pattern => StringValuePattern::And(vec![pattern, other]),
        }
    }

    /// Combines both patterns so that either may match. Nested disjunctions are flattened.
    pub fn or(self, other: StringValuePattern) -> StringValuePattern {
        match self {
            StringValuePattern::Or(mut patterns) => {
                patterns.push(other);
                StringValuePattern::Or(patterns)
            }
            pattern => StringValuePattern::Or(vec![pattern, other]),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, StringValuePattern::Absent)
    }

    /// The operator name as used in definitions, e.g. `equalTo`.
    pub fn operator(&self) -> &'static str {
        match self {
            StringValuePattern::EqualTo {
                case_insensitive: true,
                ..
            } => "equalToIgnoreCase",
            StringValuePattern::EqualTo { .. } => "equalTo",
            StringValuePattern::Contains(_) => "contains",
            StringValuePattern::DoesNotContain(_) => "doesNotContain",
            StringValuePattern::Matches(_) => "matches",
            StringValuePattern::DoesNotMatch(_) => "doesNotMatch",
            StringValuePattern::Absent => "absent",
            StringValuePattern::EqualToJson(_) => "equalToJson",
            StringValuePattern::MatchesJsonPath(_) => "matchesJsonPath",
            StringValuePattern::MatchesXPath(_) => "matchesXPath",
            StringValuePattern::DateTime(p) => p.comparison().operator(),
            StringValuePattern::BinaryEqualTo(_) => "binaryEqualTo",
            StringValuePattern::MatchesJsonSchema(_) => "matchesJsonSchema",
            StringValuePattern::And(_) => "and",
            StringValuePattern::Or(_) => "or",
            StringValuePattern::Not(_) => "not",
        }
    }

    /// The expected value rendered for diagnostics.
    pub fn expected(&self) -> String {
        match self {
            StringValuePattern::EqualTo { expected, .. }
            | StringValuePattern::Contains(expected)
            | StringValuePattern::DoesNotContain(expected) => expected.clone(),
            StringValuePattern::Matches(re) | StringValuePattern::DoesNotMatch(re) => {
                re.as_str().to_string()
            }
            StringValuePattern::Absent => "(absent)".to_string(),
            StringValuePattern::EqualToJson(p) => p.expected().to_string(),
            StringValuePattern::MatchesJsonPath(p) => p.describe(),
            StringValuePattern::MatchesXPath(p) => p.describe(),
            StringValuePattern::DateTime(p) => p.describe(),
            StringValuePattern::BinaryEqualTo(bytes) => format!("{} bytes", bytes.len()),
            StringValuePattern::MatchesJsonSchema(p) => p.schema().to_string(),
            StringValuePattern::And(patterns) => join(patterns, " AND "),
            StringValuePattern::Or(patterns) => join(patterns, " OR "),
            StringValuePattern::Not(pattern) => format!("not({})", pattern),
        }
    }

    /// Number of leaf predicates, used to rank how constrained a stub is.
    pub fn predicate_count(&self) -> usize {
        match self {
            StringValuePattern::And(patterns) | StringValuePattern::Or(patterns) => {
                patterns.iter().map(|p| p.predicate_count()).sum()
            }
            StringValuePattern::Not(pattern) => pattern.predicate_count(),
            _ => 1,
        }
    }
}

fn join(patterns: &[StringValuePattern], separator: &str) -> String {
    patterns
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

impl fmt::Display for StringValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StringValuePattern::And(_) | StringValuePattern::Or(_) => {
                write!(f, "({})", self.expected())
            }
            StringValuePattern::Not(_) | StringValuePattern::Absent => {
                write!(f, "{}", self.expected())
            }
            _ => write!(f, "{} {}", self.operator(), self.expected()),
        }
    }
}

impl PartialEq for StringValuePattern {
    fn eq(&self, other: &Self) -> bool {
        PatternDefinition::from(self) == PatternDefinition::from(other)
    }
}

impl Serialize for StringValuePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        PatternDefinition::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StringValuePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PatternDefinition::deserialize(deserializer)?
            .compile()
            .map_err(D::Error::custom)
    }
}

// *************************************************************************************************
// Constructors
// *************************************************************************************************
pub fn equal_to<S: Into<String>>(value: S) -> StringValuePattern {
    StringValuePattern::EqualTo {
        expected: value.into(),
        case_insensitive: false,
    }
}

pub fn equal_to_ignore_case<S: Into<String>>(value: S) -> StringValuePattern {
    StringValuePattern::EqualTo {
        expected: value.into(),
        case_insensitive: true,
    }
}

pub fn containing<S: Into<String>>(value: S) -> StringValuePattern {
    StringValuePattern::Contains(value.into())
}

pub fn not_containing<S: Into<String>>(value: S) -> StringValuePattern {
    StringValuePattern::DoesNotContain(value.into())
}

pub fn matching(expression: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::Matches(StubRegex::new(expression)?))
}

pub fn not_matching(expression: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::DoesNotMatch(StubRegex::new(expression)?))
}

pub fn absent() -> StringValuePattern {
    StringValuePattern::Absent
}

pub fn equal_to_json(value: Value) -> StringValuePattern {
    StringValuePattern::EqualToJson(JsonEqualityPattern::new(value))
}

pub fn equal_to_json_lenient(
    value: Value,
    ignore_array_order: bool,
    ignore_extra_elements: bool,
) -> StringValuePattern {
    StringValuePattern::EqualToJson(
        JsonEqualityPattern::new(value)
            .ignoring_array_order(ignore_array_order)
            .ignoring_extra_elements(ignore_extra_elements),
    )
}

pub fn matching_json_path(expression: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::MatchesJsonPath(JsonPathPattern::new(
        expression, None,
    )?))
}

pub fn matching_json_path_with(
    expression: &str,
    value_pattern: StringValuePattern,
) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::MatchesJsonPath(JsonPathPattern::new(
        expression,
        Some(value_pattern),
    )?))
}

pub fn matching_xpath(expression: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::MatchesXPath(XPathPattern::new(
        expression,
        BTreeMap::new(),
        None,
    )?))
}

pub fn matching_xpath_with(
    expression: &str,
    namespaces: BTreeMap<String, String>,
    value_pattern: Option<StringValuePattern>,
) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::MatchesXPath(XPathPattern::new(
        expression,
        namespaces,
        value_pattern,
    )?))
}

pub fn before(expected: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::DateTime(DateTimePattern::new(
        DateTimeComparison::Before,
        expected,
    )?))
}

pub fn after(expected: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::DateTime(DateTimePattern::new(
        DateTimeComparison::After,
        expected,
    )?))
}

pub fn equal_to_date_time(expected: &str) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::DateTime(DateTimePattern::new(
        DateTimeComparison::EqualTo,
        expected,
    )?))
}

pub fn binary_equal_to<B: Into<Bytes>>(value: B) -> StringValuePattern {
    StringValuePattern::BinaryEqualTo(value.into())
}

pub fn matching_json_schema(schema: Value) -> Result<StringValuePattern, Error> {
    Ok(StringValuePattern::MatchesJsonSchema(JsonSchemaPattern::new(
        schema,
    )?))
}

pub fn not(pattern: StringValuePattern) -> StringValuePattern {
    StringValuePattern::Not(Box::new(pattern))
}
