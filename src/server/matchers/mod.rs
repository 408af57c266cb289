use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use thiserror::Error;

use crate::common::data::{Diff, DiffResult, Tokenizer};

pub mod comparison;
pub mod date;
pub mod definition;
pub mod json;
pub mod multi_value;
pub mod multipart;
pub mod pattern;
pub mod request;
pub mod schema;
pub mod url;
pub mod xml;

pub use multi_value::MultiValuePattern;
pub use multipart::{MultipartMatchingType, MultipartPattern};
pub use pattern::StringValuePattern;
pub use request::{RequestMatchResult, RequestPattern, SubMatch};
pub use self::url::UrlPattern;

/// Smallest distance reported for a value that does not match. Keeps `distance == 0` reserved
/// for exact matches even when a graded metric rounds to zero.
pub const MIN_MISMATCH_DISTANCE: f64 = 0.001;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid regular expression '{0}': {1}")]
    InvalidRegex(String, String),
    #[error("invalid JSONPath expression '{0}': {1}")]
    InvalidJsonPath(String, String),
    #[error("invalid XPath expression '{0}': {1}")]
    InvalidXPath(String, String),
    #[error("invalid date/time expression '{0}': {1}")]
    InvalidDateTime(String, String),
    #[error("invalid JSON schema: {0}")]
    InvalidJsonSchema(String),
    #[error("invalid pattern definition: {0}")]
    InvalidDefinition(String),
    #[error("only one URL matching variant may be set, found: {}", .0.join(", "))]
    ConflictingUrlVariants(Vec<String>),
    #[error("{field}: {source}")]
    InvalidField {
        field: String,
        #[source]
        source: Box<Error>,
    },
}

pub type PatternError = Error;

impl Error {
    /// Prefixes the error with the field it was found at, e.g. `headers.X-Token`.
    pub fn at<S: Into<String>>(self, field: S) -> Error {
        let field = field.into();
        match self {
            Error::InvalidField {
                field: inner,
                source,
            } => Error::InvalidField {
                field: format!("{}.{}", field, inner),
                source,
            },
            other => Error::InvalidField {
                field,
                source: Box::new(other),
            },
        }
    }

    /// The offending field path, if known.
    pub fn field(&self) -> Option<&str> {
        match self {
            Error::InvalidField { field, .. } => Some(field),
            _ => None,
        }
    }

    /// The error without its field information.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::InvalidField { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// The outcome of evaluating a pattern: a distance in `[0, 1]` where `0` is an exact match and
/// `1` means no similarity at all.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    distance: f64,
}

impl MatchResult {
    pub const EXACT: MatchResult = MatchResult { distance: 0.0 };
    pub const NO_MATCH: MatchResult = MatchResult { distance: 1.0 };

    pub fn exact() -> Self {
        Self::EXACT
    }

    pub fn no_match() -> Self {
        Self::NO_MATCH
    }

    pub fn of(matches: bool) -> Self {
        if matches {
            Self::EXACT
        } else {
            Self::NO_MATCH
        }
    }

    /// A graded result. Values outside `[0, 1]` are clamped and non-finite values count as no
    /// match.
    pub fn partial(distance: f64) -> Self {
        if !distance.is_finite() {
            return Self::NO_MATCH;
        }

        Self {
            distance: distance.clamp(0.0, 1.0),
        }
    }

    /// A graded result for a value known not to match.
    pub fn mismatch(distance: f64) -> Self {
        if !distance.is_finite() {
            return Self::NO_MATCH;
        }

        Self::partial(distance.max(MIN_MISMATCH_DISTANCE))
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    pub fn is_exact_match(&self) -> bool {
        self.distance == 0.0
    }

    /// All results must match: the largest distance wins.
    pub fn all<I: IntoIterator<Item = MatchResult>>(results: I) -> Self {
        results
            .into_iter()
            .map(|r| r.distance)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
            .map_or(Self::EXACT, Self::partial)
    }

    /// Any result may match: the smallest distance wins.
    pub fn any<I: IntoIterator<Item = MatchResult>>(results: I) -> Self {
        results
            .into_iter()
            .map(|r| r.distance)
            .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.min(d))))
            .map_or(Self::NO_MATCH, Self::partial)
    }

    /// Weighted arithmetic mean of `(result, weight)` pairs. An empty input is an exact match.
    pub fn weighted_mean<I: IntoIterator<Item = (MatchResult, f64)>>(results: I) -> Self {
        let (sum, total) = results
            .into_iter()
            .fold((0.0, 0.0), |(sum, total), (r, w)| (sum + r.distance * w, total + w));

        if total <= 0.0 {
            return Self::EXACT;
        }

        Self::partial(sum / total)
    }
}

pub fn diff_str(base: &str, edit: &str, tokenizer: Tokenizer) -> DiffResult {
    let changes = match tokenizer {
        Tokenizer::Line => TextDiff::from_lines(base, edit),
        Tokenizer::Word => TextDiff::from_words(base, edit),
        Tokenizer::Character => TextDiff::from_chars(base, edit),
    };

    DiffResult {
        tokenizer,
        distance: changes.ratio(),
        differences: changes
            .iter_all_changes()
            .map(|change| match change.tag() {
                ChangeTag::Equal => Diff::Same(change.to_string_lossy().to_string()),
                ChangeTag::Insert => Diff::Add(change.to_string_lossy().to_string()),
                ChangeTag::Delete => Diff::Rem(change.to_string_lossy().to_string()),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_results_stay_in_range() {
        assert_eq!(MatchResult::partial(1.7).distance(), 1.0);
        assert_eq!(MatchResult::partial(-0.5).distance(), 0.0);
        assert_eq!(MatchResult::partial(f64::NAN).distance(), 1.0);
        assert!(!MatchResult::mismatch(0.0).is_exact_match());
    }

    #[test]
    fn combinators_use_min_and_max() {
        let a = MatchResult::partial(0.2);
        let b = MatchResult::partial(0.6);

        assert_eq!(MatchResult::all([a, b]).distance(), 0.6);
        assert_eq!(MatchResult::any([a, b]).distance(), 0.2);
        assert!(MatchResult::all(Vec::new()).is_exact_match());
    }

    #[test]
    fn weighted_mean_is_exact_only_if_all_parts_are() {
        let mean = MatchResult::weighted_mean([(MatchResult::EXACT, 10.0), (MatchResult::NO_MATCH, 1.0)]);
        assert!(!mean.is_exact_match());
        assert!((mean.distance() - 1.0 / 11.0).abs() < 1e-9);
    }

    #[test]
    fn field_paths_nest() {
        let err = Error::InvalidRegex("(".into(), "unclosed".into())
            .at("X-Token")
            .at("headers");

        assert_eq!(err.field(), Some("headers.X-Token"));
        assert!(matches!(err.root_cause(), Error::InvalidRegex(_, _)));
    }
}
