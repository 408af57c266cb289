use std::collections::BTreeMap;

use crate::{
    common::data::RequestPart,
    server::matchers::{
        comparison::string_distance,
        definition::{MultipartPatternDefinition, PatternDefinition},
        Error, MatchResult, MultiValuePattern, StringValuePattern,
    },
};

/// Whether one or every multipart part has to satisfy a [`MultipartPattern`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultipartMatchingType {
    #[default]
    Any,
    All,
}

impl MultipartMatchingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MultipartMatchingType::Any => "ANY",
            MultipartMatchingType::All => "ALL",
        }
    }
}

/// Predicates over the decoded parts of a multipart request body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultipartPattern {
    name: Option<String>,
    matching_type: MultipartMatchingType,
    headers: BTreeMap<String, MultiValuePattern>,
    body_patterns: Vec<StringValuePattern>,
}

impl MultipartPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matching_type(mut self, matching_type: MultipartMatchingType) -> Self {
        self.matching_type = matching_type;
        self
    }

    pub fn with_header<S: Into<String>, P: Into<MultiValuePattern>>(
        mut self,
        name: S,
        pattern: P,
    ) -> Self {
        self.headers.insert(name.into(), pattern.into());
        self
    }

    pub fn with_body(mut self, pattern: StringValuePattern) -> Self {
        self.body_patterns.push(pattern);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn predicate_count(&self) -> usize {
        self.name.iter().count()
            + self
                .headers
                .values()
                .map(|p| p.predicate_count())
                .sum::<usize>()
            + self
                .body_patterns
                .iter()
                .map(|p| p.predicate_count())
                .sum::<usize>()
    }

    /// A request without parts never matches.
    pub fn evaluate(&self, parts: &[RequestPart]) -> MatchResult {
        if parts.is_empty() {
            return MatchResult::NO_MATCH;
        }

        let results = parts.iter().map(|part| self.evaluate_part(part));
        match self.matching_type {
            MultipartMatchingType::Any => MatchResult::any(results),
            MultipartMatchingType::All => MatchResult::all(results),
        }
    }

    pub fn evaluate_part(&self, part: &RequestPart) -> MatchResult {
        let mut results = Vec::new();

        if let Some(expected) = &self.name {
            let result = match &part.name {
                Some(actual) if actual == expected => MatchResult::EXACT,
                Some(actual) => MatchResult::mismatch(string_distance(true, expected, actual)),
                None => MatchResult::NO_MATCH,
            };
            results.push(result);
        }

        for (name, pattern) in &self.headers {
            results.push(pattern.evaluate(part.header_values(name).as_slice()));
        }

        for pattern in &self.body_patterns {
            results.push(pattern.evaluate_bytes(Some(&part.body)));
        }

        MatchResult::weighted_mean(results.into_iter().map(|r| (r, 1.0)))
    }

    pub fn describe(&self) -> String {
        let mut description = Vec::new();

        if let Some(name) = &self.name {
            description.push(format!("name = {}", name));
        }
        for (name, pattern) in &self.headers {
            description.push(format!("{}: {}", name, pattern));
        }
        for pattern in &self.body_patterns {
            description.push(format!("body {}", pattern));
        }

        format!("{} part [{}]", self.matching_type.as_str(), description.join(", "))
    }
}

impl TryFrom<&MultipartPatternDefinition> for MultipartPattern {
    type Error = Error;

    fn try_from(def: &MultipartPatternDefinition) -> Result<Self, Self::Error> {
        let matching_type = match def.matching_type.as_deref().map(str::to_uppercase) {
            None => MultipartMatchingType::Any,
            Some(t) if t == "ANY" => MultipartMatchingType::Any,
            Some(t) if t == "ALL" => MultipartMatchingType::All,
            Some(other) => {
                return Err(Error::InvalidDefinition(format!(
                    "unknown multipart matching type '{}', expected ANY or ALL",
                    other
                ))
                .at("matchingType"))
            }
        };

        let mut headers = BTreeMap::new();
        for (name, pattern) in &def.headers {
            let compiled = pattern
                .compile()
                .map_err(|e| e.at(name.clone()).at("headers"))?;
            headers.insert(name.clone(), compiled);
        }

        let body_patterns = def
            .body_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| p.compile().map_err(|e| e.at(format!("bodyPatterns[{}]", i))))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: def.name.clone(),
            matching_type,
            headers,
            body_patterns,
        })
    }
}

impl From<&MultipartPattern> for MultipartPatternDefinition {
    fn from(pattern: &MultipartPattern) -> Self {
        Self {
            name: pattern.name.clone(),
            matching_type: Some(pattern.matching_type.as_str().to_string()),
            headers: pattern
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.into()))
                .collect(),
            body_patterns: pattern
                .body_patterns
                .iter()
                .map(PatternDefinition::from)
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::matchers::pattern::{containing, equal_to};

    fn parts() -> Vec<RequestPart> {
        vec![
            RequestPart::new("meta", "{\"kind\":\"report\"}")
                .with_header("Content-Type", "application/json"),
            RequestPart::new("file", "col1,col2").with_header("Content-Type", "text/csv"),
        ]
    }

    #[test]
    fn any_part_may_match() {
        let p = MultipartPattern::new()
            .with_name("file")
            .with_header("content-type", equal_to("text/csv"))
            .with_body(containing("col2"));

        assert!(p.evaluate(&parts()).is_exact_match());
    }

    #[test]
    fn all_parts_must_match() {
        let p = MultipartPattern::new()
            .matching_type(MultipartMatchingType::All)
            .with_header("Content-Type", equal_to("text/csv"));
        assert!(!p.evaluate(&parts()).is_exact_match());

        let p = MultipartPattern::new()
            .matching_type(MultipartMatchingType::All)
            .with_body(containing("o"));
        assert!(p.evaluate(&parts()).is_exact_match());
    }

    #[test]
    fn no_parts_never_match() {
        let p = MultipartPattern::new().with_name("file");
        assert_eq!(p.evaluate(&[]), MatchResult::NO_MATCH);
    }

    #[test]
    fn definition_rejects_unknown_matching_type() {
        let def = MultipartPatternDefinition {
            matching_type: Some("SOME".to_string()),
            ..Default::default()
        };
        let err = MultipartPattern::try_from(&def).unwrap_err();
        assert_eq!(err.field(), Some("matchingType"));
    }
}
