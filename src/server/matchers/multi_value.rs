use std::fmt;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::server::matchers::{
    definition::MultiValuePatternDefinition, MatchResult, StringValuePattern,
};

/// A pattern over a field that may carry several values, such as a repeated header or query
/// parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum MultiValuePattern {
    /// At least one value must satisfy the pattern. No values at all are evaluated as an
    /// absent value.
    Single(StringValuePattern),
    /// The values must pair up one-to-one with the patterns, in any order.
    HasExactly(Vec<StringValuePattern>),
    /// Every pattern must be satisfied by some value. Extra values are allowed.
    Includes(Vec<StringValuePattern>),
}

impl MultiValuePattern {
    pub fn evaluate<S: AsRef<str>>(&self, values: &[S]) -> MatchResult {
        match self {
            MultiValuePattern::Single(pattern) => best_of(pattern, values),
            MultiValuePattern::Includes(patterns) => MatchResult::weighted_mean(
                patterns.iter().map(|p| (best_of(p, values), 1.0)),
            ),
            MultiValuePattern::HasExactly(patterns) => has_exactly(patterns, values),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, MultiValuePattern::Single(p) if p.is_absent())
    }

    pub fn operator(&self) -> &'static str {
        match self {
            MultiValuePattern::Single(p) => p.operator(),
            MultiValuePattern::HasExactly(_) => "hasExactly",
            MultiValuePattern::Includes(_) => "includes",
        }
    }

    pub fn expected(&self) -> String {
        match self {
            MultiValuePattern::Single(p) => p.expected(),
            MultiValuePattern::HasExactly(patterns) | MultiValuePattern::Includes(patterns) => {
                patterns
                    .iter()
                    .map(|p| p.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            }
        }
    }

    pub fn predicate_count(&self) -> usize {
        match self {
            MultiValuePattern::Single(p) => p.predicate_count(),
            MultiValuePattern::HasExactly(patterns) | MultiValuePattern::Includes(patterns) => {
                patterns.iter().map(|p| p.predicate_count()).sum()
            }
        }
    }
}

fn best_of<S: AsRef<str>>(pattern: &StringValuePattern, values: &[S]) -> MatchResult {
    if values.is_empty() {
        return pattern.evaluate(None);
    }

    MatchResult::any(values.iter().map(|v| pattern.evaluate(Some(v.as_ref()))))
}

fn has_exactly<S: AsRef<str>>(patterns: &[StringValuePattern], values: &[S]) -> MatchResult {
    let results: Vec<Vec<MatchResult>> = patterns
        .iter()
        .map(|p| values.iter().map(|v| p.evaluate(Some(v.as_ref()))).collect())
        .collect();

    let exact: Vec<Vec<bool>> = results
        .iter()
        .map(|row| row.iter().map(|r| r.is_exact_match()).collect())
        .collect();

    if patterns.len() == values.len() && maximum_matching(&exact, values.len()) == patterns.len() {
        return MatchResult::EXACT;
    }

    let closeness = MatchResult::weighted_mean(results.iter().map(|row| {
        let best = if row.is_empty() {
            MatchResult::NO_MATCH
        } else {
            MatchResult::any(row.iter().copied())
        };
        (best, 1.0)
    }));

    let longest = patterns.len().max(values.len()).max(1);
    let count_gap = patterns.len().abs_diff(values.len()) as f64 / longest as f64;

    MatchResult::mismatch(closeness.distance().max(count_gap))
}

/// Size of a maximum bipartite matching between patterns (rows) and values (columns), using
/// augmenting paths.
pub(crate) fn maximum_matching(edges: &[Vec<bool>], value_count: usize) -> usize {
    fn augment(
        row: usize,
        edges: &[Vec<bool>],
        seen: &mut [bool],
        owner: &mut [Option<usize>],
    ) -> bool {
        for col in 0..owner.len() {
            if edges[row][col] && !seen[col] {
                seen[col] = true;
                let free = match owner[col] {
                    None => true,
                    Some(other) => augment(other, edges, seen, owner),
                };
                if free {
                    owner[col] = Some(row);
                    return true;
                }
            }
        }
        false
    }

    let mut owner = vec![None; value_count];
    (0..edges.len())
        .filter(|&row| {
            let mut seen = vec![false; value_count];
            augment(row, edges, &mut seen, &mut owner)
        })
        .count()
}

impl fmt::Display for MultiValuePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultiValuePattern::Single(p) => write!(f, "{}", p),
            other => write!(f, "{} [{}]", other.operator(), other.expected()),
        }
    }
}

impl From<StringValuePattern> for MultiValuePattern {
    fn from(pattern: StringValuePattern) -> Self {
        MultiValuePattern::Single(pattern)
    }
}

impl Serialize for MultiValuePattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MultiValuePatternDefinition::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MultiValuePattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        MultiValuePatternDefinition::deserialize(deserializer)?
            .compile()
            .map_err(D::Error::custom)
    }
}

pub fn having_exactly(patterns: Vec<StringValuePattern>) -> MultiValuePattern {
    MultiValuePattern::HasExactly(patterns)
}

pub fn including(patterns: Vec<StringValuePattern>) -> MultiValuePattern {
    MultiValuePattern::Includes(patterns)
}
