//! Shorthands for building stubs in code.
//!
//! ```
//! use stubwire::api::stub::*;
//! use stubwire::server::matchers::pattern::equal_to;
//!
//! let stub = stub_for(get(url_path_equal_to("/orders")).with_header("Accept", equal_to("application/json")))
//!     .will_return(a_response(200).with_json_body(serde_json::json!([])));
//!
//! assert_eq!(stub.response.status, 200);
//! ```

use crate::{
    common::data::ResponseDefinition,
    server::{
        matchers::{pattern::StubRegex, url::PathTemplate, PatternError, RequestPattern, UrlPattern},
        stub::StubMapping,
    },
};

/// A stub that answers `200 OK` with an empty body until told otherwise.
pub fn stub_for(request: RequestPattern) -> StubMapping {
    StubMapping::new(request, ResponseDefinition::ok())
}

pub fn a_response(status: u16) -> ResponseDefinition {
    ResponseDefinition::new(status)
}

pub fn ok() -> ResponseDefinition {
    ResponseDefinition::ok()
}

pub fn get(url: UrlPattern) -> RequestPattern {
    RequestPattern::new("GET", url)
}

pub fn post(url: UrlPattern) -> RequestPattern {
    RequestPattern::new("POST", url)
}

pub fn put(url: UrlPattern) -> RequestPattern {
    RequestPattern::new("PUT", url)
}

pub fn patch(url: UrlPattern) -> RequestPattern {
    RequestPattern::new("PATCH", url)
}

pub fn delete(url: UrlPattern) -> RequestPattern {
    RequestPattern::new("DELETE", url)
}

/// Matches every method.
pub fn any(url: UrlPattern) -> RequestPattern {
    RequestPattern::any().with_url(url)
}

/// Path and query must equal `url`.
pub fn url_equal_to<S: Into<String>>(url: S) -> UrlPattern {
    UrlPattern::Url(url.into())
}

/// The path must equal `path`, the query is ignored.
pub fn url_path_equal_to<S: Into<String>>(path: S) -> UrlPattern {
    UrlPattern::UrlPath(path.into())
}

/// Path and query must match `expression`.
pub fn url_matching(expression: &str) -> Result<UrlPattern, PatternError> {
    Ok(UrlPattern::UrlPattern(StubRegex::new(expression)?))
}

pub fn url_path_matching(expression: &str) -> Result<UrlPattern, PatternError> {
    Ok(UrlPattern::UrlPathPattern(StubRegex::new(expression)?))
}

/// A path with `{name}` placeholders, e.g. `/orders/{id}`.
pub fn url_path_template(template: &str) -> Result<UrlPattern, PatternError> {
    Ok(UrlPattern::UrlPathTemplate(PathTemplate::new(template)?))
}

pub fn any_url() -> UrlPattern {
    UrlPattern::Any
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{common::data::HttpRequest, server::resolver::Stub};

    #[test]
    fn url_shorthands_map_to_their_variants() {
        assert_eq!(url_equal_to("/a?b=c"), UrlPattern::Url("/a?b=c".to_string()));
        assert_eq!(any_url(), UrlPattern::Any);
        assert!(url_matching("(").is_err());
        assert!(url_path_template("/orders/{id}").is_ok());
    }

    #[test]
    fn built_stubs_match_requests() {
        let stub = stub_for(get(url_path_template("/orders/{id}").unwrap()))
            .will_return(a_response(201));

        assert!(stub.evaluate(&HttpRequest::new("GET", "/orders/7")).is_exact_match());
        assert!(!stub.evaluate(&HttpRequest::new("POST", "/orders/7")).is_exact_match());
        assert_eq!(stub.response.status, 201);

        let anything = stub_for(any(any_url()));
        assert!(anything.evaluate(&HttpRequest::new("DELETE", "/x")).is_exact_match());
    }
}
