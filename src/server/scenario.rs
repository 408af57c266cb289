use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The state every scenario starts in.
pub const STARTED: &str = "Started";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("no scenario named '{0}'")]
    ScenarioNotFound(String),
}

/// How a stub takes part in a scenario: the state it requires to be eligible and the state it
/// moves the scenario to once it matched.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<String>,
}

impl ScenarioSpec {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            required_state: None,
            new_state: None,
        }
    }

    pub fn requiring<S: Into<String>>(mut self, state: S) -> Self {
        self.required_state = Some(state.into());
        self
    }

    pub fn moving_to<S: Into<String>>(mut self, state: S) -> Self {
        self.new_state = Some(state.into());
        self
    }

    /// A stub without a required state is eligible in every state.
    pub fn permits(&self, current_state: &str) -> bool {
        self.required_state
            .as_deref()
            .map_or(true, |required| required == current_state)
    }
}

/// A state change applied as part of a match.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub scenario: String,
    pub from: String,
    pub to: String,
}

/// Admin view of a scenario.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub name: String,
    pub state: String,
    pub possible_states: BTreeSet<String>,
    pub mappings: Vec<Uuid>,
}

#[derive(Debug)]
struct ScenarioEntry {
    state: String,
    stubs: BTreeMap<Uuid, ScenarioSpec>,
}

impl ScenarioEntry {
    fn new() -> Self {
        Self {
            state: STARTED.to_string(),
            stubs: BTreeMap::new(),
        }
    }

    fn possible_states(&self) -> BTreeSet<String> {
        let mut states = BTreeSet::new();
        states.insert(STARTED.to_string());
        for spec in self.stubs.values() {
            states.extend(spec.required_state.iter().cloned());
            states.extend(spec.new_state.iter().cloned());
        }
        states
    }
}

/// The per-server scenario state store. A scenario exists while at least one stub refers to
/// it. All state changes, including the check-and-transition done during matching, happen
/// under one lock, so transitions are linearizable per scenario.
#[derive(Debug, Default)]
pub struct Scenarios {
    inner: Mutex<BTreeMap<String, ScenarioEntry>>,
}

impl Scenarios {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, ScenarioEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn on_stub_added(&self, stub_id: Uuid, spec: &ScenarioSpec) {
        let mut scenarios = self.lock();
        let entry = scenarios
            .entry(spec.name.clone())
            .or_insert_with(ScenarioEntry::new);
        entry.stubs.insert(stub_id, spec.clone());
    }

    /// Forgets the stub. The scenario goes away with its last stub.
    pub fn on_stub_removed(&self, stub_id: Uuid, spec: &ScenarioSpec) {
        let mut scenarios = self.lock();

        let now_empty = match scenarios.get_mut(&spec.name) {
            Some(entry) => {
                entry.stubs.remove(&stub_id);
                entry.stubs.is_empty()
            }
            None => false,
        };

        if now_empty {
            tracing::debug!("Removing scenario '{}' with its last stub", spec.name);
            scenarios.remove(&spec.name);
        }
    }

    /// The current state of a scenario. Unknown scenarios are in `Started`.
    pub fn state_of(&self, name: &str) -> String {
        self.lock()
            .get(name)
            .map_or_else(|| STARTED.to_string(), |e| e.state.clone())
    }

    pub fn is_eligible(&self, spec: Option<&ScenarioSpec>) -> bool {
        match spec {
            None => true,
            Some(spec) => spec.permits(&self.state_of(&spec.name)),
        }
    }

    /// Any state string is accepted.
    pub fn set_state(&self, name: &str, state: &str) -> Result<(), Error> {
        let mut scenarios = self.lock();
        let entry = scenarios
            .get_mut(name)
            .ok_or_else(|| Error::ScenarioNotFound(name.to_string()))?;

        tracing::debug!("Setting scenario '{}' to state '{}'", name, state);
        entry.state = state.to_string();
        Ok(())
    }

    pub fn reset(&self) {
        for entry in self.lock().values_mut() {
            entry.state = STARTED.to_string();
        }
        tracing::debug!("Reset all scenarios");
    }

    pub fn reset_scenario(&self, name: &str) -> Result<(), Error> {
        self.set_state(name, STARTED)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn all(&self) -> Vec<Scenario> {
        self.lock()
            .iter()
            .map(|(name, entry)| Scenario {
                name: name.clone(),
                state: entry.state.clone(),
                possible_states: entry.possible_states(),
                mappings: entry.stubs.keys().copied().collect(),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<Scenario> {
        self.all().into_iter().find(|s| s.name == name)
    }

    /// Picks the first candidate whose scenario precondition holds and applies its
    /// transition, all under one lock. Candidates must already be in preference order.
    pub fn claim_first<'a, T, F>(
        &self,
        candidates: &'a [T],
        spec_of: F,
    ) -> Option<(&'a T, Option<Transition>)>
    where
        F: Fn(&T) -> Option<&ScenarioSpec>,
    {
        let mut scenarios = self.lock();

        for candidate in candidates {
            let spec = match spec_of(candidate) {
                None => return Some((candidate, None)),
                Some(spec) => spec,
            };

            let current = scenarios
                .get(&spec.name)
                .map_or(STARTED, |e| e.state.as_str())
                .to_string();

            if !spec.permits(&current) {
                tracing::trace!(
                    "Skipping candidate: scenario '{}' is in state '{}'",
                    spec.name,
                    current
                );
                continue;
            }

            let transition = match &spec.new_state {
                None => None,
                Some(new_state) => {
                    let entry = scenarios
                        .entry(spec.name.clone())
                        .or_insert_with(ScenarioEntry::new);
                    entry.state = new_state.clone();

                    tracing::debug!(
                        "Scenario '{}' moved from '{}' to '{}'",
                        spec.name,
                        current,
                        new_state
                    );

                    Some(Transition {
                        scenario: spec.name.clone(),
                        from: current,
                        to: new_state.clone(),
                    })
                }
            };

            return Some((candidate, transition));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(required: &str, new_state: Option<&str>) -> ScenarioSpec {
        let spec = ScenarioSpec::new("checkout").requiring(required);
        match new_state {
            Some(s) => spec.moving_to(s),
            None => spec,
        }
    }

    #[test]
    fn scenarios_start_in_started() {
        let scenarios = Scenarios::new();
        scenarios.on_stub_added(Uuid::new_v4(), &spec(STARTED, Some("Paid")));

        assert_eq!(scenarios.state_of("checkout"), STARTED);
        assert_eq!(scenarios.state_of("unknown"), STARTED);

        let all = scenarios.all();
        assert_eq!(all.len(), 1);
        assert!(all[0].possible_states.contains("Paid"));
    }

    #[test]
    fn claim_applies_the_transition_once() {
        let scenarios = Scenarios::new();
        let a = spec(STARTED, Some("Paid"));
        scenarios.on_stub_added(Uuid::new_v4(), &a);

        let candidates = vec![a.clone()];
        let (_, transition) = scenarios.claim_first(&candidates, |s| Some(s)).unwrap();
        assert_eq!(
            transition,
            Some(Transition {
                scenario: "checkout".into(),
                from: STARTED.into(),
                to: "Paid".into()
            })
        );

        assert!(scenarios.claim_first(&candidates, |s| Some(s)).is_none());
        assert_eq!(scenarios.state_of("checkout"), "Paid");
    }

    #[test]
    fn candidates_without_scenario_are_always_eligible() {
        let scenarios = Scenarios::new();
        let candidates = vec![1, 2];
        let (picked, transition) = scenarios.claim_first(&candidates, |_| None).unwrap();
        assert_eq!(*picked, 1);
        assert!(transition.is_none());
    }

    #[test]
    fn set_and_reset() {
        let scenarios = Scenarios::new();
        scenarios.on_stub_added(Uuid::new_v4(), &spec(STARTED, None));

        scenarios.set_state("checkout", "anything goes").unwrap();
        assert_eq!(scenarios.state_of("checkout"), "anything goes");

        scenarios.reset();
        assert_eq!(scenarios.state_of("checkout"), STARTED);

        assert_eq!(
            scenarios.set_state("missing", "x"),
            Err(Error::ScenarioNotFound("missing".into()))
        );
    }

    #[test]
    fn scenario_disappears_with_its_last_stub() {
        let scenarios = Scenarios::new();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let s = spec(STARTED, None);

        scenarios.on_stub_added(first, &s);
        scenarios.on_stub_added(second, &s);

        scenarios.on_stub_removed(first, &s);
        assert!(scenarios.get("checkout").is_some());

        scenarios.on_stub_removed(second, &s);
        assert!(scenarios.get("checkout").is_none());
    }
}
