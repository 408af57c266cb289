use std::{collections::BTreeMap, fmt};

use crate::{
    common::data::HttpRequest,
    server::matchers::{
        comparison::string_distance,
        definition::RequestPatternDefinition,
        pattern::StubRegex,
        Error, MatchResult,
    },
};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A URL path with named parameters such as `/users/{id}/orders/{orderId}`. A parameter
/// always spans a whole path segment. Everything else is a literal, compared verbatim.
#[derive(Clone)]
pub struct PathTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn new(template: &str) -> Result<Self, Error> {
        let invalid = |msg: &str| Error::InvalidDefinition(format!("{}: {}", template, msg));

        if !template.starts_with('/') {
            return Err(invalid("a path template must start with '/'"));
        }

        let mut segments = Vec::new();

        for raw in template[1..].split('/') {
            if raw.contains(['{', '}']) {
                let name = raw
                    .strip_prefix('{')
                    .and_then(|r| r.strip_suffix('}'))
                    .filter(|n| !n.is_empty() && !n.contains(['{', '}', ':', '*']))
                    .ok_or_else(|| invalid("a path parameter must span a whole segment"))?;

                if segments.contains(&Segment::Param(name.to_string())) {
                    return Err(invalid("path parameter names must be unique"));
                }

                segments.push(Segment::Param(name.to_string()));
            } else {
                segments.push(Segment::Literal(raw.to_string()));
            }
        }

        Ok(Self {
            source: template.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn parameter_names(&self) -> Vec<&str> {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Param(name) => Some(name.as_str()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    /// The named parameters extracted from `path`, or `None` if the path does not fit the
    /// template.
    pub fn parameters(&self, path: &str) -> Option<BTreeMap<String, String>> {
        let actual: Vec<&str> = path.strip_prefix('/')?.split('/').collect();
        if actual.len() != self.segments.len() {
            return None;
        }

        let mut params = BTreeMap::new();
        for (segment, value) in self.segments.iter().zip(actual) {
            match segment {
                Segment::Literal(expected) if expected != value => return None,
                Segment::Literal(_) => {}
                Segment::Param(_) if value.is_empty() => return None,
                Segment::Param(name) => {
                    params.insert(name.clone(), value.to_string());
                }
            }
        }

        Some(params)
    }

    pub fn evaluate(&self, path: &str) -> MatchResult {
        if self.parameters(path).is_some() {
            return MatchResult::EXACT;
        }

        MatchResult::mismatch(self.distance(path))
    }

    fn distance(&self, path: &str) -> f64 {
        let actual: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let longest = self.segments.len().max(actual.len());
        let shortest = self.segments.len().min(actual.len());

        let mut mismatched = (longest - shortest) as f64;
        for (segment, value) in self.segments.iter().zip(actual.iter()) {
            mismatched += match segment {
                Segment::Param(_) if value.is_empty() => 1.0,
                Segment::Param(_) => 0.0,
                Segment::Literal(expected) => string_distance(true, expected, value),
            };
        }

        if longest == 0 {
            return 0.0;
        }

        (mismatched / longest as f64).clamp(0.0, 1.0)
    }
}

impl PartialEq for PathTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for PathTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathTemplate").field(&self.source).finish()
    }
}

/// How a request pattern selects URLs. Exactly one variant applies per pattern.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum UrlPattern {
    #[default]
    Any,
    /// Equality on path and query string.
    Url(String),
    /// Equality on the path only.
    UrlPath(String),
    UrlPathTemplate(PathTemplate),
    /// Regular expression over the path only.
    UrlPathPattern(StubRegex),
    /// Regular expression over path and query string.
    UrlPattern(StubRegex),
}

impl UrlPattern {
    /// How constrained the variant is. Exact URLs rank highest, `Any` lowest.
    pub fn specificity(&self) -> u8 {
        match self {
            UrlPattern::Url(_) => 5,
            UrlPattern::UrlPath(_) => 4,
            UrlPattern::UrlPathTemplate(_) => 3,
            UrlPattern::UrlPathPattern(_) => 2,
            UrlPattern::UrlPattern(_) => 1,
            UrlPattern::Any => 0,
        }
    }

    pub fn is_any(&self) -> bool {
        matches!(self, UrlPattern::Any)
    }

    pub fn operator(&self) -> &'static str {
        match self {
            UrlPattern::Any => "anyUrl",
            UrlPattern::Url(_) => "url",
            UrlPattern::UrlPath(_) => "urlPath",
            UrlPattern::UrlPathTemplate(_) => "urlPathTemplate",
            UrlPattern::UrlPathPattern(_) => "urlPathPattern",
            UrlPattern::UrlPattern(_) => "urlPattern",
        }
    }

    pub fn expected(&self) -> String {
        match self {
            UrlPattern::Any => "(any)".to_string(),
            UrlPattern::Url(url) | UrlPattern::UrlPath(url) => url.clone(),
            UrlPattern::UrlPathTemplate(template) => template.as_str().to_string(),
            UrlPattern::UrlPathPattern(re) | UrlPattern::UrlPattern(re) => re.as_str().to_string(),
        }
    }

    /// The part of the request this variant looks at.
    pub fn actual<'a>(&self, request: &'a HttpRequest) -> &'a str {
        match self {
            UrlPattern::Any | UrlPattern::Url(_) | UrlPattern::UrlPattern(_) => request.url(),
            UrlPattern::UrlPath(_)
            | UrlPattern::UrlPathTemplate(_)
            | UrlPattern::UrlPathPattern(_) => request.path(),
        }
    }

    pub fn evaluate(&self, request: &HttpRequest) -> MatchResult {
        let actual = self.actual(request);

        match self {
            UrlPattern::Any => MatchResult::EXACT,
            UrlPattern::Url(expected) | UrlPattern::UrlPath(expected) => {
                if expected == actual {
                    MatchResult::EXACT
                } else {
                    MatchResult::mismatch(string_distance(true, expected, actual))
                }
            }
            UrlPattern::UrlPathTemplate(template) => template.evaluate(actual),
            UrlPattern::UrlPathPattern(re) | UrlPattern::UrlPattern(re) => {
                if re.is_match(actual) {
                    MatchResult::EXACT
                } else {
                    MatchResult::mismatch(re.distance(actual))
                }
            }
        }
    }

    /// Parameters a path template extracted from the request. Empty for other variants.
    pub fn path_parameters(&self, request: &HttpRequest) -> BTreeMap<String, String> {
        match self {
            UrlPattern::UrlPathTemplate(template) => {
                template.parameters(request.path()).unwrap_or_default()
            }
            _ => BTreeMap::new(),
        }
    }

    pub(crate) fn from_definition(def: &RequestPatternDefinition) -> Result<Self, Error> {
        let variants: Vec<(&str, &String)> = [
            ("url", &def.url),
            ("urlPath", &def.url_path),
            ("urlPathTemplate", &def.url_path_template),
            ("urlPathPattern", &def.url_path_pattern),
            ("urlPattern", &def.url_pattern),
        ]
        .into_iter()
        .filter_map(|(name, value)| value.as_ref().map(|v| (name, v)))
        .collect();

        let result = match variants.as_slice() {
            [] => Ok(UrlPattern::Any),
            [(name, value)] => {
                let value = value.to_string();
                let pattern = match *name {
                    "url" => UrlPattern::Url(value),
                    "urlPath" => UrlPattern::UrlPath(value),
                    "urlPathTemplate" => UrlPattern::UrlPathTemplate(PathTemplate::new(&value)?),
                    "urlPathPattern" => UrlPattern::UrlPathPattern(StubRegex::new(&value)?),
                    _ => UrlPattern::UrlPattern(StubRegex::new(&value)?),
                };
                Ok(pattern)
            }
            many => Err(Error::ConflictingUrlVariants(
                many.iter().map(|(name, _)| name.to_string()).collect(),
            )),
        };

        result.map_err(|e| match e {
            Error::ConflictingUrlVariants(_) => e,
            other => other.at(variants.first().map_or("url", |(name, _)| *name)),
        })
    }

    pub(crate) fn write_definition(&self, def: &mut RequestPatternDefinition) {
        let expected = Some(self.expected());
        match self {
            UrlPattern::Any => {}
            UrlPattern::Url(_) => def.url = expected,
            UrlPattern::UrlPath(_) => def.url_path = expected,
            UrlPattern::UrlPathTemplate(_) => def.url_path_template = expected,
            UrlPattern::UrlPathPattern(_) => def.url_path_pattern = expected,
            UrlPattern::UrlPattern(_) => def.url_pattern = expected,
        }
    }
}

impl fmt::Display for UrlPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.operator(), self.expected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new("GET", url)
    }

    #[test]
    fn url_equality_includes_the_query() {
        let p = UrlPattern::Url("/a?b=1".to_string());
        assert!(p.evaluate(&get("/a?b=1")).is_exact_match());
        assert!(!p.evaluate(&get("/a")).is_exact_match());

        let p = UrlPattern::UrlPath("/a".to_string());
        assert!(p.evaluate(&get("/a?b=1")).is_exact_match());
    }

    #[test]
    fn regex_variants() {
        let p = UrlPattern::UrlPathPattern(StubRegex::new("/items/[0-9]+").unwrap());
        assert!(p.evaluate(&get("/items/12?x=y")).is_exact_match());
        assert!(!p.evaluate(&get("/items/ab")).is_exact_match());

        let p = UrlPattern::UrlPattern(StubRegex::new("/items\\?page=[0-9]").unwrap());
        assert!(p.evaluate(&get("/items?page=2")).is_exact_match());
    }

    #[test]
    fn path_templates_extract_parameters() {
        let p = UrlPattern::UrlPathTemplate(PathTemplate::new("/users/{id}/orders/{orderId}").unwrap());
        let request = get("/users/7/orders/42?verbose=1");

        assert!(p.evaluate(&request).is_exact_match());

        let params = p.path_parameters(&request);
        assert_eq!(params.get("id").map(String::as_str), Some("7"));
        assert_eq!(params.get("orderId").map(String::as_str), Some("42"));

        assert!(!p.evaluate(&get("/users/7/invoices/42")).is_exact_match());
        assert!(!p.evaluate(&get("/users/7/orders")).is_exact_match());
    }

    #[test]
    fn literal_segments_are_compared_verbatim() {
        let colon = PathTemplate::new("/files/v1:list").unwrap();
        assert!(colon.evaluate("/files/v1:list").is_exact_match());
        assert!(!colon.evaluate("/files/v1anything").is_exact_match());
        assert_eq!(colon.parameters("/files/v1:list"), Some(BTreeMap::new()));
        assert_eq!(colon.parameters("/files/v1anything"), None);

        let star = PathTemplate::new("/static/*").unwrap();
        assert!(star.evaluate("/static/*").is_exact_match());
        assert!(!star.evaluate("/static/a").is_exact_match());
        assert!(!star.evaluate("/static/a/b/c").is_exact_match());

        let mixed = PathTemplate::new("/q/{id}/a+b").unwrap();
        assert_eq!(mixed.parameter_names(), vec!["id"]);
        let params = mixed.parameters("/q/9/a+b").unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("id").map(String::as_str), Some("9"));
    }

    #[test]
    fn parameters_must_not_be_empty() {
        let p = PathTemplate::new("/users/{id}").unwrap();
        assert!(p.parameters("/users/").is_none());
        assert!(!p.evaluate("/users/").is_exact_match());
    }

    #[test]
    fn invalid_templates_are_rejected() {
        assert!(PathTemplate::new("users/{id}").is_err());
        assert!(PathTemplate::new("/users/{id}.json").is_err());
        assert!(PathTemplate::new("/a/{x}/b/{x}").is_err());
    }

    #[test]
    fn longer_paths_are_near_misses() {
        let p = UrlPattern::UrlPath("/foo".to_string());
        let near = p.evaluate(&get("/foo/extra"));
        let far = p.evaluate(&get("/completely/unrelated/location"));

        assert!(!near.is_exact_match());
        assert!(near.distance() < far.distance());
    }

    #[test]
    fn specificity_order() {
        let exact = UrlPattern::Url("/a".to_string());
        let regex = UrlPattern::UrlPathPattern(StubRegex::new("/.*").unwrap());
        assert!(exact.specificity() > regex.specificity());
        assert!(regex.specificity() > UrlPattern::Any.specificity());
    }

    #[test]
    fn conflicting_variants_are_rejected() {
        let def = RequestPatternDefinition {
            url: Some("/a".to_string()),
            url_path_pattern: Some("/.*".to_string()),
            ..Default::default()
        };

        match UrlPattern::from_definition(&def) {
            Err(Error::ConflictingUrlVariants(names)) => {
                assert_eq!(names, vec!["url".to_string(), "urlPathPattern".to_string()])
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
