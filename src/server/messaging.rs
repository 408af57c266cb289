use std::{
    convert::TryFrom,
    sync::{Arc, RwLock},
};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    common::data::HttpRequest,
    server::{
        matchers::{
            definition::{PatternDefinition, RequestPatternDefinition},
            RequestMatchResult, RequestPattern, StringValuePattern, SubMatch,
        },
        resolver::{Specificity, Stub, DEFAULT_PRIORITY},
        scenario::ScenarioSpec,
        state::Error,
        stub::scenario_from_fields,
    },
};

/// An open message channel, identified by the request that opened it.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub id: Uuid,
    pub request: HttpRequest,
    pub opened_at: DateTime<Utc>,
}

/// The channels that are currently open.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<Vec<Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, request: HttpRequest) -> Arc<Channel> {
        self.open_with_id(Uuid::new_v4(), request)
    }

    /// Opens a channel under a caller-chosen id. An open channel with the same id is
    /// replaced.
    pub fn open_with_id(&self, id: Uuid, request: HttpRequest) -> Arc<Channel> {
        let channel = Arc::new(Channel {
            id,
            request,
            opened_at: Utc::now(),
        });

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.retain(|c| c.id != id);
        channels.push(channel.clone());

        tracing::debug!("Opened channel {} for {}", id, channel.request.summary());
        channel
    }

    pub fn close(&self, id: Uuid) -> Option<Arc<Channel>> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        let position = channels.iter().position(|c| c.id == id)?;

        tracing::debug!("Closed channel {}", id);
        Some(channels.remove(position))
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Open channels in the order they were opened.
    pub fn list(&self) -> Vec<Arc<Channel>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Open channels whose opening request matches the pattern.
    pub fn matching(&self, pattern: &RequestPattern) -> Vec<Arc<Channel>> {
        self.list()
            .into_iter()
            .filter(|c| pattern.matches(&c.request))
            .collect()
    }

    pub fn clear(&self) {
        self.channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn len(&self) -> usize {
        self.channels.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message received on a channel.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub channel: Arc<Channel>,
    pub body: Bytes,
}

impl ChannelMessage {
    pub fn new<B: Into<Bytes>>(channel: Arc<Channel>, body: B) -> Self {
        Self {
            channel,
            body: body.into(),
        }
    }

    pub fn body_str(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// What a message stub does once it matched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MessageAction {
    /// Replies on the channel the message came in on.
    #[serde(rename = "send")]
    SendToOriginator { body: String },
    /// Sends to every open channel whose opening request matches `channels`.
    #[serde(rename = "broadcast")]
    SendToMatchingChannels { channels: RequestPattern, body: String },
}

/// A message addressed to one channel.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub channel_id: Uuid,
    pub body: String,
}

/// Resolves actions to concrete deliveries against the channels open right now.
pub fn deliveries(
    actions: &[MessageAction],
    origin: &Channel,
    registry: &ChannelRegistry,
) -> Vec<Delivery> {
    let mut result = Vec::new();

    for action in actions {
        match action {
            MessageAction::SendToOriginator { body } => result.push(Delivery {
                channel_id: origin.id,
                body: body.clone(),
            }),
            MessageAction::SendToMatchingChannels { channels, body } => {
                result.extend(registry.matching(channels).iter().map(|c| Delivery {
                    channel_id: c.id,
                    body: body.clone(),
                }))
            }
        }
    }

    result
}

/// A message stub: selects on the channel's opening request and the message body.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageStubMapping {
    pub id: Uuid,
    pub name: Option<String>,
    pub priority: Option<i32>,
    pub channel_pattern: Option<RequestPattern>,
    pub body_pattern: Option<StringValuePattern>,
    pub actions: Vec<MessageAction>,
    pub scenario: Option<ScenarioSpec>,
    pub metadata: Option<Value>,
}

impl MessageStubMapping {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: None,
            priority: None,
            channel_pattern: None,
            body_pattern: None,
            actions: Vec::new(),
            scenario: None,
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

    pub fn on_channel(mut self, pattern: RequestPattern) -> Self {
        self.channel_pattern = Some(pattern);
        self
    }

    pub fn with_body(mut self, pattern: StringValuePattern) -> Self {
        self.body_pattern = Some(pattern);
        self
    }

    pub fn reply<S: Into<String>>(mut self, body: S) -> Self {
        self.actions
            .push(MessageAction::SendToOriginator { body: body.into() });
        self
    }

    pub fn broadcast<S: Into<String>>(mut self, channels: RequestPattern, body: S) -> Self {
        self.actions.push(MessageAction::SendToMatchingChannels {
            channels,
            body: body.into(),
        });
        self
    }

    pub fn in_scenario(mut self, spec: ScenarioSpec) -> Self {
        self.scenario = Some(spec);
        self
    }
}

impl Default for MessageStubMapping {
    fn default() -> Self {
        Self::new()
    }
}

impl Stub for MessageStubMapping {
    type Input = ChannelMessage;

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
        let channel = self.channel_pattern.as_ref();
        Specificity {
            url_rank: channel.map_or(0, |p| p.url().specificity()),
            predicates: channel.map_or(0, |p| p.predicate_count())
                + self.body_pattern.as_ref().map_or(0, |p| p.predicate_count()),
        }
    }

    fn scenario(&self) -> Option<&ScenarioSpec> {
        self.scenario.as_ref()
    }

    fn evaluate(&self, input: &ChannelMessage) -> RequestMatchResult {
        let mut sub_matches = Vec::new();

        if let Some(pattern) = &self.channel_pattern {
            let channel_result = pattern.evaluate(&input.channel.request);
            sub_matches.extend(channel_result.sub_matches().iter().map(|s| {
                let mut s = s.clone();
                s.field = format!("channel.{}", s.field);
                s
            }));
        }

        if let Some(pattern) = &self.body_pattern {
            sub_matches.push(SubMatch::new(
                "message.body",
                pattern.operator(),
                pattern.expected(),
                Some(input.body_str()),
                pattern.evaluate_bytes(Some(&input.body)),
            ));
        }

        RequestMatchResult::new(sub_matches)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageStubMappingDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_pattern: Option<RequestPatternDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_pattern: Option<PatternDefinition>,
    #[serde(default)]
    pub actions: Vec<MessageAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_scenario_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl TryFrom<&MessageStubMappingDefinition> for MessageStubMapping {
    type Error = Error;

    fn try_from(def: &MessageStubMappingDefinition) -> Result<Self, Self::Error> {
        let channel_pattern = match &def.channel_pattern {
            Some(p) => Some(RequestPattern::try_from(p).map_err(|e| e.at("channelPattern"))?),
            None => None,
        };

        let body_pattern = match &def.body_pattern {
            Some(p) => Some(p.compile().map_err(|e| e.at("bodyPattern"))?),
            None => None,
        };

        Ok(MessageStubMapping {
            id: def.id.unwrap_or_else(Uuid::new_v4),
            name: def.name.clone(),
            priority: def.priority,
            channel_pattern,
            body_pattern,
            actions: def.actions.clone(),
            scenario: scenario_from_fields(
                def.scenario_name.as_ref(),
                def.required_scenario_state.as_ref(),
                def.new_scenario_state.as_ref(),
            )?,
            metadata: def.metadata.clone(),
        })
    }
}

impl From<&MessageStubMapping> for MessageStubMappingDefinition {
    fn from(stub: &MessageStubMapping) -> Self {
        let scenario = stub.scenario.as_ref();
        MessageStubMappingDefinition {
            id: Some(stub.id),
            name: stub.name.clone(),
            priority: stub.priority,
            channel_pattern: stub.channel_pattern.as_ref().map(RequestPatternDefinition::from),
            body_pattern: stub.body_pattern.as_ref().map(PatternDefinition::from),
            actions: stub.actions.clone(),
            scenario_name: scenario.map(|s| s.name.clone()),
            required_scenario_state: scenario.and_then(|s| s.required_state.clone()),
            new_scenario_state: scenario.and_then(|s| s.new_state.clone()),
            metadata: stub.metadata.clone(),
        }
    }
}

impl Serialize for MessageStubMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        MessageStubMappingDefinition::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MessageStubMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let def = MessageStubMappingDefinition::deserialize(deserializer)?;
        MessageStubMapping::try_from(&def).map_err(D::Error::custom)
    }
}
