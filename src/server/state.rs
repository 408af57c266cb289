use std::{
    convert::TryFrom,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::{
    common::data::{HttpRequest, MessageServeEvent, ServeEvent, SubEvent, SubEventKind},
    server::{
        journal,
        journal::Journal,
        listener::{Listeners, ServeEventListener},
        matchers::{PatternError, RequestPattern, StringValuePattern},
        messaging::{
            deliveries, Channel, ChannelMessage, ChannelRegistry, Delivery, MessageStubMapping,
            MessageStubMappingDefinition,
        },
        near_miss::{NearMiss, NearMissCalculator, RequestNearMiss, DEFAULT_NEAR_MISS_LIMIT},
        resolver::{Resolution, Stub, StubResolver},
        scenario,
        scenario::{Scenario, Scenarios, Transition},
        store,
        store::StubStore,
        stub::{StubMapping, StubMappingDefinition},
    },
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("invalid pattern at '{field}': {source}")]
    InvalidPattern {
        field: String,
        #[source]
        source: PatternError,
    },
    #[error("invalid stub definition: {0}")]
    InvalidStubDefinition(String),
    #[error("a stub with id {0} already exists")]
    DuplicateStubId(Uuid),
    #[error("no stub with id {0}")]
    StubNotFound(Uuid),
    #[error("no scenario named '{0}'")]
    ScenarioNotFound(String),
    #[error("no open channel with id {0}")]
    ChannelNotFound(Uuid),
    #[error("cannot convert: {0}")]
    DataConversionError(String),
}

impl From<PatternError> for Error {
    fn from(err: PatternError) -> Self {
        let root = err.root_cause().clone();
        match (err.field(), root) {
            (_, PatternError::ConflictingUrlVariants(_)) => {
                Error::InvalidStubDefinition(err.to_string())
            }
            (Some(field), source) => Error::InvalidPattern {
                field: field.to_string(),
                source,
            },
            (None, source) => Error::InvalidPattern {
                field: String::new(),
                source,
            },
        }
    }
}

impl From<store::Error> for Error {
    fn from(err: store::Error) -> Self {
        match err {
            store::Error::DuplicateStubId(id) => Error::DuplicateStubId(id),
            store::Error::StubNotFound(id) => Error::StubNotFound(id),
        }
    }
}

impl From<scenario::Error> for Error {
    fn from(err: scenario::Error) -> Self {
        match err {
            scenario::Error::ScenarioNotFound(name) => Error::ScenarioNotFound(name),
        }
    }
}

/// The result of serving one HTTP request.
#[derive(Debug)]
pub enum ServeOutcome {
    Matched {
        stub: Arc<StubMapping>,
        transition: Option<Transition>,
        event: Arc<ServeEvent>,
    },
    Unmatched {
        near_misses: Vec<NearMiss<StubMapping>>,
        event: Arc<ServeEvent>,
    },
}

impl ServeOutcome {
    pub fn event(&self) -> &Arc<ServeEvent> {
        match self {
            ServeOutcome::Matched { event, .. } | ServeOutcome::Unmatched { event, .. } => event,
        }
    }

    pub fn stub(&self) -> Option<&Arc<StubMapping>> {
        match self {
            ServeOutcome::Matched { stub, .. } => Some(stub),
            ServeOutcome::Unmatched { .. } => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, ServeOutcome::Matched { .. })
    }
}

/// The result of receiving one channel message.
#[derive(Debug)]
pub enum MessageOutcome {
    Matched {
        stub: Arc<MessageStubMapping>,
        deliveries: Vec<Delivery>,
        transition: Option<Transition>,
        event: Arc<MessageServeEvent>,
    },
    Unmatched {
        near_misses: Vec<NearMiss<MessageStubMapping>>,
        event: Arc<MessageServeEvent>,
    },
}

impl MessageOutcome {
    pub fn is_matched(&self) -> bool {
        matches!(self, MessageOutcome::Matched { .. })
    }
}

/// An unmatched logged request together with the stubs that came closest.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmatchedRequest {
    pub request: HttpRequest,
    pub near_misses: Vec<NearMiss<StubMapping>>,
}

pub trait StateManager {
    /// Removes non-persistent stubs, clears the journals and resets all scenarios.
    fn reset(&self);
    /// Removes every stub and registers the default stubs again.
    fn reset_to_defaults(&self);

    fn add_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error>;
    fn add_stub_definition(
        &self,
        definition: StubMappingDefinition,
    ) -> Result<Arc<StubMapping>, Error>;
    /// Registers a persistent stub that [`StateManager::reset_to_defaults`] restores.
    fn add_default_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error>;
    fn replace_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error>;
    fn read_stub(&self, id: Uuid) -> Option<Arc<StubMapping>>;
    fn list_stubs(&self) -> Vec<Arc<StubMapping>>;
    fn remove_stub(&self, id: Uuid) -> Result<Arc<StubMapping>, Error>;
    /// Removes the stubs whose request pattern equals `pattern`.
    fn remove_stubs_matching(&self, pattern: &RequestPattern) -> Vec<Arc<StubMapping>>;
    /// Removes every stub that is not persistent.
    fn reset_stubs(&self);
    fn find_stubs_by_metadata(&self, pattern: &StringValuePattern) -> Vec<Arc<StubMapping>>;
    fn remove_stubs_by_metadata(&self, pattern: &StringValuePattern) -> Vec<Arc<StubMapping>>;

    fn list_scenarios(&self) -> Vec<Scenario>;
    fn get_scenario(&self, name: &str) -> Option<Scenario>;
    fn set_scenario_state(&self, name: &str, state: &str) -> Result<(), Error>;
    fn reset_scenario(&self, name: &str) -> Result<(), Error>;
    fn reset_scenarios(&self);

    fn serve(&self, request: HttpRequest) -> ServeOutcome;

    fn requests(&self) -> Vec<Arc<ServeEvent>>;
    fn unmatched_requests(&self) -> Vec<Arc<ServeEvent>>;
    fn find_requests(&self, pattern: &RequestPattern) -> Vec<Arc<ServeEvent>>;
    fn clear_requests(&self);

    fn near_misses_for_request(&self, request: &HttpRequest) -> Vec<NearMiss<StubMapping>>;
    fn near_misses_for_pattern(&self, pattern: &RequestPattern) -> Vec<RequestNearMiss>;
    fn unmatched_near_misses(&self) -> Vec<UnmatchedRequest>;

    fn open_channel(&self, request: HttpRequest) -> Arc<Channel>;
    fn close_channel(&self, id: Uuid) -> Result<Arc<Channel>, Error>;
    fn list_channels(&self) -> Vec<Arc<Channel>>;

    fn add_message_stub(&self, stub: MessageStubMapping)
        -> Result<Arc<MessageStubMapping>, Error>;
    fn add_message_stub_definition(
        &self,
        definition: MessageStubMappingDefinition,
    ) -> Result<Arc<MessageStubMapping>, Error>;
    fn list_message_stubs(&self) -> Vec<Arc<MessageStubMapping>>;
    fn remove_message_stub(&self, id: Uuid) -> Result<Arc<MessageStubMapping>, Error>;
    fn reset_message_stubs(&self);

    fn receive_message(&self, channel_id: Uuid, body: Bytes) -> Result<MessageOutcome, Error>;
    fn messages(&self) -> Vec<Arc<MessageServeEvent>>;

    fn register_listener(&self, listener: Arc<dyn ServeEventListener>);
}

/// The per-server state: stubs, scenarios, journals and open channels.
pub struct HttpStubStateManager {
    stubs: StubStore<StubMapping>,
    message_stubs: StubStore<MessageStubMapping>,
    scenarios: Scenarios,
    requests: Journal<ServeEvent>,
    messages: Journal<MessageServeEvent>,
    channels: ChannelRegistry,
    listeners: Listeners,
    near_miss: NearMissCalculator,
    defaults: RwLock<Vec<StubMapping>>,
}

impl HttpStubStateManager {
    pub fn new(journal_limit: usize, near_miss_limit: usize) -> Self {
        Self {
            stubs: StubStore::new(),
            message_stubs: StubStore::new(),
            scenarios: Scenarios::new(),
            requests: Journal::new(journal_limit),
            messages: Journal::new(journal_limit),
            channels: ChannelRegistry::new(),
            listeners: Listeners::new(),
            near_miss: NearMissCalculator::new(near_miss_limit),
            defaults: RwLock::new(Vec::new()),
        }
    }

    fn register_scenario<S: Stub>(&self, stub: &S) {
        if let Some(spec) = stub.scenario() {
            self.scenarios.on_stub_added(stub.id(), spec);
        }
    }

    fn forget_scenarios<S: Stub>(&self, removed: &[Arc<S>]) {
        for stub in removed {
            if let Some(spec) = stub.scenario() {
                self.scenarios.on_stub_removed(stub.id(), spec);
            }
        }
    }

    fn remove_stubs_where<F: Fn(&StubMapping) -> bool>(&self, predicate: F) -> Vec<Arc<StubMapping>> {
        let removed = self.stubs.remove_matching(predicate);
        self.forget_scenarios(&removed);
        removed
    }

    fn metadata_matches(stub: &StubMapping, pattern: &StringValuePattern) -> bool {
        stub.metadata
            .as_ref()
            .and_then(|m| serde_json::to_string(m).ok())
            .map_or(false, |m| pattern.evaluate(Some(&m)).is_exact_match())
    }
}

impl Default for HttpStubStateManager {
    fn default() -> Self {
        HttpStubStateManager::new(journal::UNBOUNDED, DEFAULT_NEAR_MISS_LIMIT)
    }
}

impl StateManager for HttpStubStateManager {
    fn reset(&self) {
        self.reset_stubs();
        self.reset_message_stubs();
        self.scenarios.reset();
        self.requests.clear();
        self.messages.clear();
        tracing::debug!("Reset server state");
    }

    fn reset_to_defaults(&self) {
        self.remove_stubs_where(|_| true);
        self.reset_message_stubs();
        self.scenarios.clear();
        self.requests.clear();
        self.messages.clear();

        let defaults = self
            .defaults
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        for stub in defaults {
            let id = stub.id;
            match self.stubs.add(stub) {
                Ok(stub) => self.register_scenario(stub.as_ref()),
                Err(err) => tracing::warn!("Cannot restore default stub {}: {}", id, err),
            }
        }

        tracing::debug!("Reset server state to defaults");
    }

    fn add_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error> {
        let stub = self.stubs.add(stub)?;
        self.register_scenario(stub.as_ref());

        tracing::debug!("Adding new stub with id={}", stub.id);
        Ok(stub)
    }

    fn add_stub_definition(
        &self,
        definition: StubMappingDefinition,
    ) -> Result<Arc<StubMapping>, Error> {
        self.add_stub(StubMapping::try_from(definition)?)
    }

    fn add_default_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error> {
        let stub = stub.persistent(true);
        let added = self.add_stub(stub.clone())?;

        self.defaults
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(stub);

        Ok(added)
    }

    fn replace_stub(&self, stub: StubMapping) -> Result<Arc<StubMapping>, Error> {
        let previous = self
            .stubs
            .find_by_id(stub.id)
            .ok_or(Error::StubNotFound(stub.id))?;

        // Register the new scenario first so a scenario shared by both versions survives.
        self.register_scenario(&stub);
        let replaced = self.stubs.replace(stub)?;
        if let Some(spec) = previous.scenario() {
            let still_member = replaced.scenario().map_or(false, |s| s.name == spec.name);
            if !still_member {
                self.scenarios.on_stub_removed(previous.id, spec);
            }
        }

        tracing::debug!("Replaced stub with id={}", replaced.id);
        Ok(replaced)
    }

    fn read_stub(&self, id: Uuid) -> Option<Arc<StubMapping>> {
        self.stubs.find_by_id(id)
    }

    fn list_stubs(&self) -> Vec<Arc<StubMapping>> {
        self.stubs.list()
    }

    fn remove_stub(&self, id: Uuid) -> Result<Arc<StubMapping>, Error> {
        let removed = self.stubs.remove(id).ok_or(Error::StubNotFound(id))?;
        self.forget_scenarios(std::slice::from_ref(&removed));

        tracing::debug!("Deleted stub with id={}", id);
        Ok(removed)
    }

    fn remove_stubs_matching(&self, pattern: &RequestPattern) -> Vec<Arc<StubMapping>> {
        self.remove_stubs_where(|stub| &stub.request == pattern)
    }

    fn reset_stubs(&self) {
        let removed = self.remove_stubs_where(|stub| !stub.is_persistent());
        tracing::trace!("Deleted {} non-persistent stub(s)", removed.len());
    }

    fn find_stubs_by_metadata(&self, pattern: &StringValuePattern) -> Vec<Arc<StubMapping>> {
        self.stubs
            .list()
            .into_iter()
            .filter(|stub| Self::metadata_matches(stub, pattern))
            .collect()
    }

    fn remove_stubs_by_metadata(&self, pattern: &StringValuePattern) -> Vec<Arc<StubMapping>> {
        self.remove_stubs_where(|stub| Self::metadata_matches(stub, pattern))
    }

    fn list_scenarios(&self) -> Vec<Scenario> {
        self.scenarios.all()
    }

    fn get_scenario(&self, name: &str) -> Option<Scenario> {
        self.scenarios.get(name)
    }

    fn set_scenario_state(&self, name: &str, state: &str) -> Result<(), Error> {
        Ok(self.scenarios.set_state(name, state)?)
    }

    fn reset_scenario(&self, name: &str) -> Result<(), Error> {
        Ok(self.scenarios.reset_scenario(name)?)
    }

    fn reset_scenarios(&self) {
        self.scenarios.reset();
    }

    fn serve(&self, request: HttpRequest) -> ServeOutcome {
        let resolution = StubResolver::new(&self.stubs, &self.scenarios).resolve(&request);

        match resolution {
            Some(Resolution {
                stub, transition, ..
            }) => {
                tracing::debug!(
                    "Matched stub with id={} to the following request: {}",
                    stub.id,
                    request.summary()
                );

                let mut event =
                    ServeEvent::new(request, Some(stub.id), Some(stub.response.clone()));
                if let Some(t) = &transition {
                    event = event.with_sub_event(SubEvent::new(
                        SubEventKind::ScenarioTransition,
                        format!("Scenario '{}' moved from '{}' to '{}'", t.scenario, t.from, t.to),
                    ));
                }

                let event = self.requests.record(event);
                self.listeners.stub_matched(&event, &stub);

                ServeOutcome::Matched {
                    stub,
                    transition,
                    event,
                }
            }
            None => {
                tracing::debug!(
                    "Could not match any stub to the following request: {}",
                    request.summary()
                );

                let near_misses = self
                    .near_miss
                    .near_misses(&request, &self.stubs, &self.scenarios);

                let event = ServeEvent::new(request, None, None).with_sub_event(SubEvent::new(
                    SubEventKind::RequestNotMatched,
                    format!("Request was not matched, {} near miss(es)", near_misses.len()),
                ));

                let event = self.requests.record(event);
                self.listeners.request_unmatched(&event);

                ServeOutcome::Unmatched { near_misses, event }
            }
        }
    }

    fn requests(&self) -> Vec<Arc<ServeEvent>> {
        self.requests.all()
    }

    fn unmatched_requests(&self) -> Vec<Arc<ServeEvent>> {
        self.requests.filter(|e| !e.was_matched())
    }

    fn find_requests(&self, pattern: &RequestPattern) -> Vec<Arc<ServeEvent>> {
        self.requests.filter(|e| pattern.matches(&e.request))
    }

    fn clear_requests(&self) {
        self.requests.clear();
    }

    fn near_misses_for_request(&self, request: &HttpRequest) -> Vec<NearMiss<StubMapping>> {
        self.near_miss
            .near_misses(request, &self.stubs, &self.scenarios)
    }

    fn near_misses_for_pattern(&self, pattern: &RequestPattern) -> Vec<RequestNearMiss> {
        self.near_miss
            .near_misses_for_pattern(pattern, &self.requests.all())
    }

    fn unmatched_near_misses(&self) -> Vec<UnmatchedRequest> {
        self.unmatched_requests()
            .into_iter()
            .map(|event| UnmatchedRequest {
                near_misses: self.near_misses_for_request(&event.request),
                request: event.request.clone(),
            })
            .collect()
    }

    fn open_channel(&self, request: HttpRequest) -> Arc<Channel> {
        self.channels.open(request)
    }

    fn close_channel(&self, id: Uuid) -> Result<Arc<Channel>, Error> {
        self.channels.close(id).ok_or(Error::ChannelNotFound(id))
    }

    fn list_channels(&self) -> Vec<Arc<Channel>> {
        self.channels.list()
    }

    fn add_message_stub(
        &self,
        stub: MessageStubMapping,
    ) -> Result<Arc<MessageStubMapping>, Error> {
        let stub = self.message_stubs.add(stub)?;
        self.register_scenario(stub.as_ref());

        tracing::debug!("Adding new message stub with id={}", stub.id);
        Ok(stub)
    }

    fn add_message_stub_definition(
        &self,
        definition: MessageStubMappingDefinition,
    ) -> Result<Arc<MessageStubMapping>, Error> {
        self.add_message_stub(MessageStubMapping::try_from(&definition)?)
    }

    fn list_message_stubs(&self) -> Vec<Arc<MessageStubMapping>> {
        self.message_stubs.list()
    }

    fn remove_message_stub(&self, id: Uuid) -> Result<Arc<MessageStubMapping>, Error> {
        let removed = self.message_stubs.remove(id).ok_or(Error::StubNotFound(id))?;
        self.forget_scenarios(std::slice::from_ref(&removed));
        Ok(removed)
    }

    fn reset_message_stubs(&self) {
        let removed = self.message_stubs.remove_matching(|_| true);
        self.forget_scenarios(&removed);
    }

    fn receive_message(&self, channel_id: Uuid, body: Bytes) -> Result<MessageOutcome, Error> {
        let channel = self
            .channels
            .get(channel_id)
            .ok_or(Error::ChannelNotFound(channel_id))?;
        let message = ChannelMessage::new(channel, body);

        let resolution =
            StubResolver::new(&self.message_stubs, &self.scenarios).resolve(&message);

        let outcome = match resolution {
            Some(Resolution {
                stub, transition, ..
            }) => {
                let deliveries = deliveries(&stub.actions, &message.channel, &self.channels);

                let event = MessageServeEvent::new(
                    channel_id,
                    message.body_str(),
                    Some(stub.id),
                    deliveries.iter().map(|d| d.channel_id).collect(),
                );
                let event = self.messages.record(event);
                self.listeners.message_matched(&event, &stub);

                tracing::debug!(
                    "Matched message stub with id={}, {} delivery(ies)",
                    stub.id,
                    deliveries.len()
                );

                MessageOutcome::Matched {
                    stub,
                    deliveries,
                    transition,
                    event,
                }
            }
            None => {
                let near_misses =
                    self.near_miss
                        .near_misses(&message, &self.message_stubs, &self.scenarios);

                let event =
                    MessageServeEvent::new(channel_id, message.body_str(), None, Vec::new());
                let event = self.messages.record(event);
                self.listeners.message_unmatched(&event);

                tracing::debug!("Could not match any message stub on channel {}", channel_id);

                MessageOutcome::Unmatched { near_misses, event }
            }
        };

        Ok(outcome)
    }

    fn messages(&self) -> Vec<Arc<MessageServeEvent>> {
        self.messages.all()
    }

    fn register_listener(&self, listener: Arc<dyn ServeEventListener>) {
        self.listeners.register(listener);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        common::data::ResponseDefinition,
        server::{
            matchers::{
                pattern::{equal_to, matching_json_path_with},
                UrlPattern,
            },
            scenario::STARTED,
        },
    };

    fn stub(path: &str) -> StubMapping {
        StubMapping::new(
            RequestPattern::new("GET", UrlPattern::UrlPath(path.to_string())),
            ResponseDefinition::ok(),
        )
    }

    #[test]
    fn serve_records_matched_and_unmatched_requests() {
        let state = HttpStubStateManager::default();
        let added = state.add_stub(stub("/a")).unwrap();

        let outcome = state.serve(HttpRequest::new("GET", "/a"));
        assert_eq!(outcome.stub().map(|s| s.id), Some(added.id));

        let outcome = state.serve(HttpRequest::new("GET", "/b"));
        match outcome {
            ServeOutcome::Unmatched { near_misses, .. } => assert_eq!(near_misses.len(), 1),
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(state.requests().len(), 2);
        assert_eq!(state.unmatched_requests().len(), 1);
        assert_eq!(state.unmatched_near_misses()[0].near_misses.len(), 1);
    }

    #[test]
    fn duplicate_ids_leave_the_store_unchanged() {
        let state = HttpStubStateManager::default();
        let first = state.add_stub(stub("/a")).unwrap();

        let err = state.add_stub(stub("/b").with_id(first.id)).unwrap_err();
        assert_eq!(err, Error::DuplicateStubId(first.id));
        assert_eq!(state.list_stubs().len(), 1);
        assert_eq!(state.list_stubs()[0].request.url().expected(), "/a");
    }

    #[test]
    fn reset_keeps_persistent_stubs() {
        let state = HttpStubStateManager::default();
        state.add_stub(stub("/temp")).unwrap();
        let kept = state.add_stub(stub("/kept").persistent(true)).unwrap();
        state.serve(HttpRequest::new("GET", "/kept"));

        state.reset();

        let remaining: Vec<_> = state.list_stubs().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![kept.id]);
        assert!(state.requests().is_empty());
    }

    #[test]
    fn reset_to_defaults_restores_default_stubs() {
        let state = HttpStubStateManager::default();
        let default = state.add_default_stub(stub("/default")).unwrap();
        assert!(default.persistent);

        state.remove_stub(default.id).unwrap();
        state.add_stub(stub("/other")).unwrap();

        state.reset_to_defaults();

        let remaining: Vec<_> = state.list_stubs().iter().map(|s| s.id).collect();
        assert_eq!(remaining, vec![default.id]);
    }

    #[test]
    fn metadata_queries() {
        let state = HttpStubStateManager::default();
        state
            .add_stub(stub("/a").with_metadata(json!({"team": "checkout"})))
            .unwrap();
        state
            .add_stub(stub("/b").with_metadata(json!({"team": "search"})))
            .unwrap();
        state.add_stub(stub("/c")).unwrap();

        let pattern = matching_json_path_with("$.team", equal_to("checkout")).unwrap();
        assert_eq!(state.find_stubs_by_metadata(&pattern).len(), 1);

        let removed = state.remove_stubs_by_metadata(&pattern);
        assert_eq!(removed.len(), 1);
        assert_eq!(state.list_stubs().len(), 2);
    }

    #[test]
    fn remove_stubs_by_request_pattern() {
        let state = HttpStubStateManager::default();
        state.add_stub(stub("/a")).unwrap();
        state.add_stub(stub("/a")).unwrap();
        state.add_stub(stub("/b")).unwrap();

        let pattern = RequestPattern::new("GET", UrlPattern::UrlPath("/a".to_string()));
        assert_eq!(state.remove_stubs_matching(&pattern).len(), 2);
        assert_eq!(state.list_stubs().len(), 1);
    }

    #[test]
    fn scenario_lifecycle_follows_its_stubs() {
        let state = HttpStubStateManager::default();
        let stub = state
            .add_stub(
                stub("/a")
                    .in_scenario("flow")
                    .when_scenario_state_is(STARTED)
                    .will_set_state_to("Done"),
            )
            .unwrap();

        let outcome = state.serve(HttpRequest::new("GET", "/a"));
        match outcome {
            ServeOutcome::Matched { transition, event, .. } => {
                assert_eq!(transition.map(|t| t.to), Some("Done".to_string()));
                assert_eq!(event.sub_events[0].kind, SubEventKind::ScenarioTransition);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert_eq!(state.get_scenario("flow").unwrap().state, "Done");
        assert!(!state.serve(HttpRequest::new("GET", "/a")).is_matched());

        state.reset_scenario("flow").unwrap();
        assert!(state.serve(HttpRequest::new("GET", "/a")).is_matched());

        state.remove_stub(stub.id).unwrap();
        assert!(state.get_scenario("flow").is_none());
        assert_eq!(
            state.set_scenario_state("flow", "x"),
            Err(Error::ScenarioNotFound("flow".to_string()))
        );
    }

    #[test]
    fn replacing_a_stub_keeps_its_place() {
        let state = HttpStubStateManager::default();
        let first = state.add_stub(stub("/a")).unwrap();
        state.add_stub(stub("/a")).unwrap();

        let replacement = stub("/a").with_id(first.id).with_name("replaced");
        state.replace_stub(replacement).unwrap();

        let outcome = state.serve(HttpRequest::new("GET", "/a"));
        assert_eq!(outcome.stub().and_then(|s| s.name.clone()), Some("replaced".into()));

        let unknown = stub("/x");
        assert!(matches!(
            state.replace_stub(unknown),
            Err(Error::StubNotFound(_))
        ));
    }

    #[test]
    fn messages_are_matched_and_delivered() {
        let state = HttpStubStateManager::default();
        let origin = state.open_channel(HttpRequest::new("GET", "/chat"));
        let other = state.open_channel(HttpRequest::new("GET", "/chat"));

        let chat = RequestPattern::any().with_url(UrlPattern::UrlPath("/chat".to_string()));
        state
            .add_message_stub(
                MessageStubMapping::new()
                    .with_body(equal_to("hello"))
                    .broadcast(chat, "someone said hello"),
            )
            .unwrap();

        match state.receive_message(origin.id, Bytes::from("hello")).unwrap() {
            MessageOutcome::Matched { deliveries, .. } => {
                let targets: Vec<_> = deliveries.iter().map(|d| d.channel_id).collect();
                assert_eq!(targets, vec![origin.id, other.id]);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        assert!(!state
            .receive_message(origin.id, Bytes::from("bye"))
            .unwrap()
            .is_matched());
        assert_eq!(state.messages().len(), 2);

        state.close_channel(other.id).unwrap();
        assert_eq!(
            state.receive_message(other.id, Bytes::from("hello")).unwrap_err(),
            Error::ChannelNotFound(other.id)
        );
    }

    #[test]
    fn invalid_definitions_are_rejected() {
        let state = HttpStubStateManager::default();
        let def: StubMappingDefinition = serde_json::from_value(json!({
            "request": { "url": "/a", "urlPath": "/a" }
        }))
        .unwrap();

        assert!(matches!(
            state.add_stub_definition(def),
            Err(Error::InvalidStubDefinition(_))
        ));
        assert!(state.list_stubs().is_empty());
    }
}
