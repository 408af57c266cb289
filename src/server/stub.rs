use std::convert::TryFrom;

use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    common::data::{HttpRequest, ResponseDefinition},
    server::{
        matchers::{definition::RequestPatternDefinition, RequestMatchResult, RequestPattern},
        resolver::{Specificity, Stub, DEFAULT_PRIORITY},
        scenario::ScenarioSpec,
        state::Error,
    },
};

/// A registered rule mapping a request pattern to a response definition.
#[derive(Debug, Clone, PartialEq)]
pub struct StubMapping {
    pub id: Uuid,
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub request: RequestPattern,
    pub response: ResponseDefinition,
    pub scenario: Option<ScenarioSpec>,
    pub persistent: bool,
    pub metadata: Option<Value>,
}

impl StubMapping {
    /// Creates a stub with a fresh id.
    pub fn new(request: RequestPattern, response: ResponseDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            priority: None,
            request,
            response,
            scenario: None,
            persistent: false,
            metadata: None,
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn will_return(mut self, response: ResponseDefinition) -> Self {
        self.response = response;
        self
    }

    pub fn in_scenario<S: Into<String>>(mut self, name: S) -> Self {
        let spec = match self.scenario.take() {
            Some(mut spec) => {
                spec.name = name.into();
                spec
            }
            None => ScenarioSpec::new(name),
        };
        self.scenario = Some(spec);
        self
    }

    /// Requires the scenario to be in `state`. Has no effect before [`StubMapping::in_scenario`].
    pub fn when_scenario_state_is<S: Into<String>>(mut self, state: S) -> Self {
        if let Some(spec) = self.scenario.as_mut() {
            spec.required_state = Some(state.into());
        }
        self
    }

    /// Moves the scenario to `state` once this stub matched. Has no effect before
    /// [`StubMapping::in_scenario`].
    pub fn will_set_state_to<S: Into<String>>(mut self, state: S) -> Self {
        if let Some(spec) = self.scenario.as_mut() {
            spec.new_state = Some(state.into());
        }
        self
    }

    pub fn persistent(mut self, persistent: bool) -> Self {
        self.persistent = persistent;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

impl Stub for StubMapping {
    type Input = HttpRequest;

    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn priority(&self) -> i32 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    fn specificity(&self) -> Specificity {
        Specificity {
            url_rank: self.request.url().specificity(),
            predicates: self.request.predicate_count(),
        }
    }

    fn scenario(&self) -> Option<&ScenarioSpec> {
        self.scenario.as_ref()
    }

    fn evaluate(&self, input: &HttpRequest) -> RequestMatchResult {
        self.request.evaluate(input)
    }

    fn is_persistent(&self) -> bool {
        self.persistent
    }
}

/// The declarative, serializable shape of a [`StubMapping`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StubMappingDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default)]
    pub request: RequestPatternDefinition,
    #[serde(default)]
    pub response: ResponseDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub persistent: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// Builds the scenario part of a stub from its flat definition fields.
pub(crate) fn scenario_from_fields(
    name: Option<&String>,
    required_state: Option<&String>,
    new_state: Option<&String>,
) -> Result<Option<ScenarioSpec>, Error> {
    match name {
        Some(name) if name.trim().is_empty() => Err(Error::InvalidStubDefinition(
            "scenarioName must not be empty".to_string(),
        )),
        Some(name) => Ok(Some(ScenarioSpec {
            name: name.clone(),
            required_state: required_state.cloned(),
            new_state: new_state.cloned(),
        })),
        None if required_state.is_some() || new_state.is_some() => {
            Err(Error::InvalidStubDefinition(
                "a scenario state was given without a scenarioName".to_string(),
            ))
        }
        None => Ok(None),
    }
}

impl TryFrom<&StubMappingDefinition> for StubMapping {
    type Error = Error;

    fn try_from(def: &StubMappingDefinition) -> Result<Self, Self::Error> {
        let request = RequestPattern::try_from(&def.request).map_err(|e| e.at("request"))?;

        Ok(StubMapping {
            id: def.id.unwrap_or_else(Uuid::new_v4),
            name: def.name.clone(),
            priority: def.priority,
            request,
            response: def.response.clone(),
            scenario: scenario_from_fields(
                def.scenario_name.as_ref(),
                def.required_scenario_state.as_ref(),
                def.new_scenario_state.as_ref(),
            )?,
            persistent: def.persistent,
            metadata: def.metadata.clone(),
        })
    }
}

impl TryFrom<StubMappingDefinition> for StubMapping {
    type Error = Error;

    fn try_from(def: StubMappingDefinition) -> Result<Self, Self::Error> {
        StubMapping::try_from(&def)
    }
}

impl From<&StubMapping> for StubMappingDefinition {
    fn from(stub: &StubMapping) -> Self {
        let scenario = stub.scenario.as_ref();
        StubMappingDefinition {
            id: Some(stub.id),
            name: stub.name.clone(),
            priority: stub.priority,
            request: RequestPatternDefinition::from(&stub.request),
            response: stub.response.clone(),
            scenario_name: scenario.map(|s| s.name.clone()),
            required_scenario_state: scenario.and_then(|s| s.required_state.clone()),
            new_scenario_state: scenario.and_then(|s| s.new_state.clone()),
            persistent: stub.persistent,
            metadata: stub.metadata.clone(),
        }
    }
}

impl Serialize for StubMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StubMappingDefinition::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for StubMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let def = StubMappingDefinition::deserialize(deserializer)?;
        StubMapping::try_from(&def).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::server::matchers::{pattern::equal_to, UrlPattern};

    #[test]
    fn parses_a_json_definition() {
        let stub: StubMapping = serde_json::from_value(json!({
            "name": "create order",
            "priority": 1,
            "request": {
                "method": "POST",
                "urlPath": "/orders",
                "headers": { "Content-Type": { "contains": "json" } }
            },
            "response": { "status": 201, "jsonBody": { "id": 7 } },
            "scenarioName": "orders",
            "requiredScenarioState": "Started",
            "newScenarioState": "Created",
            "metadata": { "team": "checkout" }
        }))
        .unwrap();

        assert_eq!(stub.name.as_deref(), Some("create order"));
        assert_eq!(stub.priority(), 1);
        assert_eq!(stub.response.status, 201);
        assert_eq!(stub.specificity().url_rank, 4);
        assert_eq!(
            stub.scenario,
            Some(ScenarioSpec::new("orders").requiring("Started").moving_to("Created"))
        );

        let request = HttpRequest::new("POST", "/orders")
            .with_header("content-type", "application/json");
        assert!(stub.evaluate(&request).is_exact_match());
    }

    #[test]
    fn invalid_patterns_name_the_field() {
        let def: StubMappingDefinition = serde_json::from_value(json!({
            "request": {
                "urlPath": "/a",
                "headers": { "X-Token": { "matches": "([a-z" } }
            }
        }))
        .unwrap();

        match StubMapping::try_from(&def).unwrap_err() {
            Error::InvalidPattern { field, .. } => assert_eq!(field, "request.headers.X-Token"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn scenario_state_requires_a_scenario_name() {
        let def = StubMappingDefinition {
            required_scenario_state: Some("Started".to_string()),
            ..Default::default()
        };

        assert!(matches!(
            StubMapping::try_from(&def),
            Err(Error::InvalidStubDefinition(_))
        ));
    }

    #[test]
    fn serializes_back_to_the_definition_shape() {
        let stub = StubMapping::new(
            RequestPattern::new("GET", UrlPattern::Url("/a?b=c".to_string()))
                .with_header("Accept", equal_to("text/plain")),
            ResponseDefinition::ok().with_body("hi"),
        )
        .in_scenario("flow")
        .will_set_state_to("Next");

        let value = serde_json::to_value(&stub).unwrap();
        assert_eq!(value["request"]["url"], "/a?b=c");
        assert_eq!(value["request"]["headers"]["Accept"]["equalTo"], "text/plain");
        assert_eq!(value["scenarioName"], "flow");
        assert_eq!(value["newScenarioState"], "Next");
        assert!(value.get("persistent").is_none());

        let parsed: StubMapping = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, stub);
    }
}
