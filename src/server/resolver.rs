use std::{cmp::Ordering, sync::Arc};

use uuid::Uuid;

use crate::server::{
    matchers::RequestMatchResult,
    scenario::{ScenarioSpec, Scenarios, Transition},
    store::{StubEntry, StubStore},
};

/// Priority of stubs that do not declare one. Lower values win.
pub const DEFAULT_PRIORITY: i32 = 5;

/// How constrained a stub's pattern is: the URL variant rank first, then the number of
/// declared predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    pub url_rank: u8,
    pub predicates: usize,
}

/// Anything the resolver can select: HTTP stubs and message stubs.
pub trait Stub: Send + Sync {
    type Input: ?Sized;

    fn id(&self) -> Uuid;

    fn name(&self) -> Option<&str>;

    /// The effective priority, [`DEFAULT_PRIORITY`] when none was declared.
    fn priority(&self) -> i32;

    fn specificity(&self) -> Specificity;

    fn scenario(&self) -> Option<&ScenarioSpec>;

    fn evaluate(&self, input: &Self::Input) -> RequestMatchResult;

    fn is_persistent(&self) -> bool {
        false
    }
}

/// The stub selected for an input.
#[derive(Debug)]
pub struct Resolution<S> {
    pub stub: Arc<S>,
    pub result: RequestMatchResult,
    pub transition: Option<Transition>,
}

/// Orders exact-match candidates: lowest priority value, then highest specificity, then
/// earliest registration.
pub fn compare_candidates<S: Stub>(a: &StubEntry<S>, b: &StubEntry<S>) -> Ordering {
    a.stub
        .priority()
        .cmp(&b.stub.priority())
        .then_with(|| b.stub.specificity().cmp(&a.stub.specificity()))
        .then_with(|| a.seq.cmp(&b.seq))
}

/// Selects the best exactly matching, currently eligible stub.
pub struct StubResolver<'a, S> {
    store: &'a StubStore<S>,
    scenarios: &'a Scenarios,
}

impl<'a, S: Stub> StubResolver<'a, S> {
    pub fn new(store: &'a StubStore<S>, scenarios: &'a Scenarios) -> Self {
        Self { store, scenarios }
    }

    /// Never fails: an input that no stub matches yields `None`.
    pub fn resolve(&self, input: &S::Input) -> Option<Resolution<S>> {
        let snapshot = self.store.snapshot();

        let mut candidates: Vec<(StubEntry<S>, RequestMatchResult)> = snapshot
            .iter()
            .filter(|entry| self.scenarios.is_eligible(entry.stub.scenario()))
            .filter_map(|entry| {
                let result = entry.stub.evaluate(input);
                if result.is_exact_match() {
                    Some((entry.clone(), result))
                } else {
                    None
                }
            })
            .collect();

        if candidates.is_empty() {
            return None;
        }

        candidates.sort_by(|(a, _), (b, _)| compare_candidates(a, b));

        // Eligibility is checked again under the scenario lock, a concurrent match may have
        // moved a scenario on since the filter above.
        let (picked, transition) = self
            .scenarios
            .claim_first(&candidates, |(entry, _)| entry.stub.scenario())?;

        let (entry, result) = picked;
        tracing::debug!(
            "Selected stub {} out of {} exact candidate(s)",
            entry.stub.id(),
            candidates.len()
        );

        Some(Resolution {
            stub: entry.stub.clone(),
            result: result.clone(),
            transition,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::matchers::{MatchResult, SubMatch};

    /// A stub over plain strings, enough to exercise selection without HTTP.
    #[derive(Debug)]
    pub(crate) struct TextStub {
        pub id: Uuid,
        pub expected: String,
        pub priority: Option<i32>,
        pub url_rank: u8,
        pub scenario: Option<ScenarioSpec>,
    }

    impl TextStub {
        pub fn new(expected: &str) -> Self {
            Self {
                id: Uuid::new_v4(),
                expected: expected.to_string(),
                priority: None,
                url_rank: 1,
                scenario: None,
            }
        }
    }

    impl Stub for TextStub {
        type Input = str;

        fn id(&self) -> Uuid {
            self.id
        }

        fn name(&self) -> Option<&str> {
            None
        }

        fn priority(&self) -> i32 {
            self.priority.unwrap_or(DEFAULT_PRIORITY)
        }

        fn specificity(&self) -> Specificity {
            Specificity {
                url_rank: self.url_rank,
                predicates: 1,
            }
        }

        fn scenario(&self) -> Option<&ScenarioSpec> {
            self.scenario.as_ref()
        }

        fn evaluate(&self, input: &str) -> RequestMatchResult {
            let result = if input.starts_with(&self.expected) {
                MatchResult::EXACT
            } else {
                MatchResult::NO_MATCH
            };

            RequestMatchResult::new(vec![SubMatch::new(
                "text",
                "startsWith",
                self.expected.clone(),
                Some(input.to_string()),
                result,
            )])
        }
    }

    #[test]
    fn explicit_priority_wins() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();

        let mut low = TextStub::new("a");
        low.priority = Some(10);
        let mut high = TextStub::new("a");
        high.priority = Some(1);
        let high_id = high.id;

        store.add(low).unwrap();
        store.add(high).unwrap();

        let resolution = StubResolver::new(&store, &scenarios).resolve("abc").unwrap();
        assert_eq!(resolution.stub.id, high_id);
    }

    #[test]
    fn specificity_then_registration_order() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();

        let first = TextStub::new("a");
        let first_id = first.id;
        let second = TextStub::new("a");
        let mut specific = TextStub::new("a");
        specific.url_rank = 5;
        let specific_id = specific.id;

        store.add(first).unwrap();
        store.add(second).unwrap();

        let resolver = StubResolver::new(&store, &scenarios);
        assert_eq!(resolver.resolve("a").unwrap().stub.id, first_id);

        store.add(specific).unwrap();
        assert_eq!(resolver.resolve("a").unwrap().stub.id, specific_id);
    }

    #[test]
    fn no_exact_match_resolves_to_none() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();
        store.add(TextStub::new("abc")).unwrap();

        assert!(StubResolver::new(&store, &scenarios).resolve("xyz").is_none());
    }
}
