use std::collections::BTreeMap;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

use crate::{
    common::data::{FieldDiff, HttpRequest, Tokenizer},
    server::matchers::{
        definition::{
            MultiValuePatternDefinition, MultipartPatternDefinition, PatternDefinition,
            RequestPatternDefinition,
        },
        diff_str, Error, MatchResult, MultiValuePattern, MultipartPattern, StringValuePattern,
        UrlPattern,
    },
};

const URL_WEIGHT: f64 = 10.0;
const METHOD_WEIGHT: f64 = 3.0;
const DEFAULT_WEIGHT: f64 = 1.0;

/// The outcome of evaluating one declared field of a [`RequestPattern`].
#[derive(Debug, Clone, PartialEq)]
pub struct SubMatch {
    pub field: String,
    pub operator: String,
    pub expected: String,
    pub actual: Option<String>,
    pub result: MatchResult,
    pub weight: f64,
}

impl SubMatch {
    pub fn new<F: Into<String>, O: Into<String>, E: Into<String>>(
        field: F,
        operator: O,
        expected: E,
        actual: Option<String>,
        result: MatchResult,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            expected: expected.into(),
            actual,
            result,
            weight: DEFAULT_WEIGHT,
        }
    }

    pub fn weighted(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn to_diff(&self) -> FieldDiff {
        let is_exact_match = self.result.is_exact_match();

        let diff = match &self.actual {
            Some(actual) if !is_exact_match => {
                let tokenizer = if self.expected.contains('\n') || actual.contains('\n') {
                    Tokenizer::Line
                } else {
                    Tokenizer::Character
                };
                Some(diff_str(&self.expected, actual, tokenizer))
            }
            _ => None,
        };

        FieldDiff {
            field: self.field.clone(),
            operator: self.operator.clone(),
            expected: self.expected.clone(),
            actual: self.actual.clone(),
            distance: self.result.distance(),
            is_exact_match,
            diff,
        }
    }
}

/// Field-by-field evaluation of a request against a [`RequestPattern`]. The overall result is
/// the weighted mean of all declared fields and is exact only if every field is.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMatchResult {
    sub_matches: Vec<SubMatch>,
    result: MatchResult,
}

impl RequestMatchResult {
    pub fn new(sub_matches: Vec<SubMatch>) -> Self {
        let result =
            MatchResult::weighted_mean(sub_matches.iter().map(|s| (s.result, s.weight)));
        Self {
            sub_matches,
            result,
        }
    }

    /// Adds a further field, recomputing the aggregate.
    pub fn with(mut self, sub_match: SubMatch) -> Self {
        self.sub_matches.push(sub_match);
        Self::new(self.sub_matches)
    }

    pub fn result(&self) -> MatchResult {
        self.result
    }

    pub fn distance(&self) -> f64 {
        self.result.distance()
    }

    pub fn is_exact_match(&self) -> bool {
        self.result.is_exact_match()
    }

    pub fn sub_matches(&self) -> &[SubMatch] {
        &self.sub_matches
    }

    pub fn to_diffs(&self) -> Vec<FieldDiff> {
        self.sub_matches.iter().map(SubMatch::to_diff).collect()
    }
}

/// A composite predicate over an HTTP request. Undeclared fields are not evaluated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestPattern {
    method: Option<String>,
    url: UrlPattern,
    host: Option<StringValuePattern>,
    port: Option<u16>,
    scheme: Option<String>,
    headers: BTreeMap<String, MultiValuePattern>,
    query_parameters: BTreeMap<String, MultiValuePattern>,
    form_parameters: BTreeMap<String, MultiValuePattern>,
    cookies: BTreeMap<String, StringValuePattern>,
    path_parameters: BTreeMap<String, StringValuePattern>,
    body_patterns: Vec<StringValuePattern>,
    multipart_patterns: Vec<MultipartPattern>,
}

impl RequestPattern {
    /// A pattern that matches every request.
    pub fn any() -> Self {
        Self::default()
    }

    /// `ANY` as method matches every method.
    pub fn new<M: AsRef<str>>(method: M, url: UrlPattern) -> Self {
        Self::any().with_method(method).with_url(url)
    }

    pub fn with_method<M: AsRef<str>>(mut self, method: M) -> Self {
        let method = method.as_ref().to_uppercase();
        self.method = if method == "ANY" { None } else { Some(method) };
        self
    }

    pub fn with_url(mut self, url: UrlPattern) -> Self {
        self.url = url;
        self
    }

    pub fn with_host(mut self, pattern: StringValuePattern) -> Self {
        self.host = Some(pattern);
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_scheme<S: Into<String>>(mut self, scheme: S) -> Self {
        self.scheme = Some(scheme.into().to_lowercase());
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

    pub fn with_query_param<S: Into<String>, P: Into<MultiValuePattern>>(
        mut self,
        name: S,
        pattern: P,
    ) -> Self {
        self.query_parameters.insert(name.into(), pattern.into());
        self
    }

    pub fn with_form_param<S: Into<String>, P: Into<MultiValuePattern>>(
        mut self,
        name: S,
        pattern: P,
    ) -> Self {
        self.form_parameters.insert(name.into(), pattern.into());
        self
    }

    pub fn with_cookie<S: Into<String>>(mut self, name: S, pattern: StringValuePattern) -> Self {
        self.cookies.insert(name.into(), pattern);
        self
    }

    /// Requires a path template URL to extract the named parameter.
    pub fn with_path_param<S: Into<String>>(
        mut self,
        name: S,
        pattern: StringValuePattern,
    ) -> Self {
        self.path_parameters.insert(name.into(), pattern);
        self
    }

    pub fn with_body(mut self, pattern: StringValuePattern) -> Self {
        self.body_patterns.push(pattern);
        self
    }

    pub fn with_multipart(mut self, pattern: MultipartPattern) -> Self {
        self.multipart_patterns.push(pattern);
        self
    }

    pub fn method(&self) -> Option<&str> {
        self.method.as_deref()
    }

    pub fn url(&self) -> &UrlPattern {
        &self.url
    }

    /// Number of declared leaf predicates, the URL included.
    pub fn predicate_count(&self) -> usize {
        let multi = |m: &BTreeMap<String, MultiValuePattern>| {
            m.values().map(|p| p.predicate_count()).sum::<usize>()
        };
        let single = |m: &BTreeMap<String, StringValuePattern>| {
            m.values().map(|p| p.predicate_count()).sum::<usize>()
        };

        usize::from(self.method.is_some())
            + usize::from(!self.url.is_any())
            + self.host.as_ref().map_or(0, |p| p.predicate_count())
            + usize::from(self.port.is_some())
            + usize::from(self.scheme.is_some())
            + multi(&self.headers)
            + multi(&self.query_parameters)
            + multi(&self.form_parameters)
            + single(&self.cookies)
            + single(&self.path_parameters)
            + self
                .body_patterns
                .iter()
                .map(|p| p.predicate_count())
                .sum::<usize>()
            + self
                .multipart_patterns
                .iter()
                .map(|p| p.predicate_count())
                .sum::<usize>()
    }

    pub fn matches(&self, request: &HttpRequest) -> bool {
        self.evaluate(request).is_exact_match()
    }

    /// Evaluates every declared field. Never fails: unparsable or missing values are
    /// non-matches.
    pub fn evaluate(&self, request: &HttpRequest) -> RequestMatchResult {
        let mut sub_matches = Vec::new();

        if let Some(method) = &self.method {
            sub_matches.push(
                SubMatch::new(
                    "method",
                    "equalTo",
                    method.clone(),
                    Some(request.method().to_string()),
                    MatchResult::of(method.eq_ignore_ascii_case(request.method())),
                )
                .weighted(METHOD_WEIGHT),
            );
        }

        if !self.url.is_any() {
            sub_matches.push(
                SubMatch::new(
                    "url",
                    self.url.operator(),
                    self.url.expected(),
                    Some(self.url.actual(request).to_string()),
                    self.url.evaluate(request),
                )
                .weighted(URL_WEIGHT),
            );
        }

        if let Some(scheme) = &self.scheme {
            sub_matches.push(SubMatch::new(
                "scheme",
                "equalTo",
                scheme.clone(),
                Some(request.scheme().to_string()),
                MatchResult::of(scheme.eq_ignore_ascii_case(request.scheme())),
            ));
        }

        if let Some(pattern) = &self.host {
            let host = request.host();
            sub_matches.push(SubMatch::new(
                "host",
                pattern.operator(),
                pattern.expected(),
                host.clone(),
                pattern.evaluate(host.as_deref()),
            ));
        }

        if let Some(port) = self.port {
            sub_matches.push(SubMatch::new(
                "port",
                "equalTo",
                port.to_string(),
                Some(request.port().to_string()),
                MatchResult::of(port == request.port()),
            ));
        }

        for (name, pattern) in &self.headers {
            let values = request.header_values(name);
            sub_matches.push(multi_value_sub_match("headers", name, pattern, values.as_slice()));
        }

        for (name, pattern) in &self.query_parameters {
            let values = request.query_values(name);
            sub_matches.push(multi_value_sub_match("queryParameters", name, pattern, values.as_slice()));
        }

        for (name, pattern) in &self.form_parameters {
            let values = request.form_values(name);
            sub_matches.push(multi_value_sub_match("formParameters", name, pattern, values.as_slice()));
        }

        for (name, pattern) in &self.cookies {
            let value = request.cookie_value(name);
            sub_matches.push(SubMatch::new(
                format!("cookies.{}", name),
                pattern.operator(),
                pattern.expected(),
                value.clone(),
                pattern.evaluate(value.as_deref()),
            ));
        }

        if !self.path_parameters.is_empty() {
            let parameters = self.url.path_parameters(request);
            for (name, pattern) in &self.path_parameters {
                let value = parameters.get(name).cloned();
                sub_matches.push(SubMatch::new(
                    format!("pathParameters.{}", name),
                    pattern.operator(),
                    pattern.expected(),
                    value.clone(),
                    pattern.evaluate(value.as_deref()),
                ));
            }
        }

        if !self.body_patterns.is_empty() {
            let body = request.body_str();
            for pattern in &self.body_patterns {
                sub_matches.push(SubMatch::new(
                    "body",
                    pattern.operator(),
                    pattern.expected(),
                    Some(body.to_string()),
                    pattern.evaluate_bytes(Some(request.body())),
                ));
            }
        }

        if !self.multipart_patterns.is_empty() {
            let parts = request.parts();
            let names: Vec<&str> = parts.iter().filter_map(|p| p.name.as_deref()).collect();
            for pattern in &self.multipart_patterns {
                sub_matches.push(SubMatch::new(
                    "multipart",
                    "multipart",
                    pattern.describe(),
                    Some(format!("{} part(s): {}", parts.len(), names.join(", "))),
                    pattern.evaluate(parts),
                ));
            }
        }

        let result = RequestMatchResult::new(sub_matches);
        tracing::trace!(
            "Evaluated {} against pattern: distance {}",
            request.summary(),
            result.distance()
        );
        result
    }
}

fn multi_value_sub_match<S: AsRef<str>>(
    group: &str,
    name: &str,
    pattern: &MultiValuePattern,
    values: &[S],
) -> SubMatch {
    let actual = if values.is_empty() {
        None
    } else {
        Some(
            values
                .iter()
                .map(|v| v.as_ref())
                .collect::<Vec<_>>()
                .join(", "),
        )
    };

    SubMatch::new(
        format!("{}.{}", group, name),
        pattern.operator(),
        pattern.expected(),
        actual,
        pattern.evaluate(values),
    )
}

fn compile_multi_value_map(
    group: &str,
    definitions: &BTreeMap<String, MultiValuePatternDefinition>,
) -> Result<BTreeMap<String, MultiValuePattern>, Error> {
    definitions
        .iter()
        .map(|(name, def)| {
            def.compile()
                .map(|p| (name.clone(), p))
                .map_err(|e| e.at(name.clone()).at(group))
        })
        .collect()
}

fn compile_map(
    group: &str,
    definitions: &BTreeMap<String, PatternDefinition>,
) -> Result<BTreeMap<String, StringValuePattern>, Error> {
    definitions
        .iter()
        .map(|(name, def)| {
            def.compile()
                .map(|p| (name.clone(), p))
                .map_err(|e| e.at(name.clone()).at(group))
        })
        .collect()
}

impl TryFrom<&RequestPatternDefinition> for RequestPattern {
    type Error = Error;

    fn try_from(def: &RequestPatternDefinition) -> Result<Self, Self::Error> {
        let url = UrlPattern::from_definition(def)?;

        let path_parameters = compile_map("pathParameters", &def.path_parameters)?;
        if !path_parameters.is_empty() {
            let template = match &url {
                UrlPattern::UrlPathTemplate(template) => template,
                _ => {
                    return Err(Error::InvalidDefinition(
                        "path parameters require a urlPathTemplate".to_string(),
                    )
                    .at("pathParameters"))
                }
            };

            let known = template.parameter_names();
            if let Some(unknown) = path_parameters.keys().find(|k| !known.contains(&k.as_str())) {
                return Err(Error::InvalidDefinition(format!(
                    "'{}' is not a parameter of {}",
                    unknown,
                    template.as_str()
                ))
                .at(unknown.clone())
                .at("pathParameters"));
            }
        }

        let host = def
            .host
            .as_ref()
            .map(|h| h.compile().map_err(|e| e.at("host")))
            .transpose()?;

        let body_patterns = def
            .body_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| p.compile().map_err(|e| e.at(format!("bodyPatterns[{}]", i))))
            .collect::<Result<Vec<_>, _>>()?;

        let multipart_patterns = def
            .multipart_patterns
            .iter()
            .enumerate()
            .map(|(i, p)| {
                MultipartPattern::try_from(p).map_err(|e| e.at(format!("multipartPatterns[{}]", i)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut pattern = RequestPattern {
            url,
            host,
            port: def.port,
            headers: compile_multi_value_map("headers", &def.headers)?,
            query_parameters: compile_multi_value_map("queryParameters", &def.query_parameters)?,
            form_parameters: compile_multi_value_map("formParameters", &def.form_parameters)?,
            cookies: compile_map("cookies", &def.cookies)?,
            path_parameters,
            body_patterns,
            multipart_patterns,
            ..RequestPattern::default()
        };

        if let Some(method) = &def.method {
            pattern = pattern.with_method(method);
        }

        if let Some(scheme) = &def.scheme {
            pattern = pattern.with_scheme(scheme.clone());
        }

        Ok(pattern)
    }
}

impl TryFrom<RequestPatternDefinition> for RequestPattern {
    type Error = Error;

    fn try_from(def: RequestPatternDefinition) -> Result<Self, Self::Error> {
        RequestPattern::try_from(&def)
    }
}

impl From<&RequestPattern> for RequestPatternDefinition {
    fn from(pattern: &RequestPattern) -> Self {
        let mut def = RequestPatternDefinition {
            method: Some(pattern.method.clone().unwrap_or_else(|| "ANY".to_string())),
            host: pattern.host.as_ref().map(PatternDefinition::from),
            port: pattern.port,
            scheme: pattern.scheme.clone(),
            headers: multi_value_definitions(&pattern.headers),
            query_parameters: multi_value_definitions(&pattern.query_parameters),
            form_parameters: multi_value_definitions(&pattern.form_parameters),
            cookies: definitions(&pattern.cookies),
            path_parameters: definitions(&pattern.path_parameters),
            body_patterns: pattern
                .body_patterns
                .iter()
                .map(PatternDefinition::from)
                .collect(),
            multipart_patterns: pattern
                .multipart_patterns
                .iter()
                .map(MultipartPatternDefinition::from)
                .collect(),
            ..RequestPatternDefinition::default()
        };

        pattern.url.write_definition(&mut def);
        def
    }
}

fn multi_value_definitions(
    patterns: &BTreeMap<String, MultiValuePattern>,
) -> BTreeMap<String, MultiValuePatternDefinition> {
    patterns
        .iter()
        .map(|(k, v)| (k.clone(), v.into()))
        .collect()
}

fn definitions(
    patterns: &BTreeMap<String, StringValuePattern>,
) -> BTreeMap<String, PatternDefinition> {
    patterns
        .iter()
        .map(|(k, v)| (k.clone(), v.into()))
        .collect()
}

impl Serialize for RequestPattern {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        RequestPatternDefinition::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RequestPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let def = RequestPatternDefinition::deserialize(deserializer)?;
        RequestPattern::try_from(&def).map_err(D::Error::custom)
    }
}
