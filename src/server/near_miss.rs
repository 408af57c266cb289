use std::{cmp::Ordering, sync::Arc};

use serde::Serialize;

use crate::{
    common::data::{FieldDiff, HttpRequest, ServeEvent},
    server::{
        matchers::{MatchResult, RequestMatchResult, RequestPattern, SubMatch},
        resolver::Stub,
        scenario::Scenarios,
        store::StubStore,
    },
};

pub const DEFAULT_NEAR_MISS_LIMIT: usize = 3;

/// A registered stub that came close to matching an input.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NearMiss<S> {
    pub stub: Arc<S>,
    pub distance: f64,
    pub diff: Vec<FieldDiff>,
}

/// A logged request that came close to matching a pattern.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestNearMiss {
    pub request: HttpRequest,
    pub distance: f64,
    pub diff: Vec<FieldDiff>,
}

/// Ranks candidates by the same distance the resolver uses. Results are ordered by ascending
/// distance. Equal distances keep registration (or logging) order.
#[derive(Debug, Clone, Copy)]
pub struct NearMissCalculator {
    limit: usize,
}

impl Default for NearMissCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_MISS_LIMIT)
    }
}

impl NearMissCalculator {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Evaluates every registered stub, regardless of scenario eligibility. A stub gated by a
    /// scenario state gets an extra `scenario` row in its diff.
    pub fn near_misses<S: Stub>(
        &self,
        input: &S::Input,
        store: &StubStore<S>,
        scenarios: &Scenarios,
    ) -> Vec<NearMiss<S>> {
        let snapshot = store.snapshot();

        let candidates = snapshot.iter().map(|entry| {
            let mut result = entry.stub.evaluate(input);

            if let Some(spec) = entry.stub.scenario() {
                if let Some(required) = &spec.required_state {
                    let current = scenarios.state_of(&spec.name);
                    let permitted = spec.permits(&current);
                    result = result.with(SubMatch::new(
                        "scenario",
                        "equalTo",
                        format!("{}: {}", spec.name, required),
                        Some(format!("{}: {}", spec.name, current)),
                        MatchResult::of(permitted),
                    ));
                }
            }

            (entry.stub.clone(), result)
        });

        self.rank(candidates)
            .into_iter()
            .map(|(stub, result)| NearMiss {
                stub,
                distance: result.distance(),
                diff: result.to_diffs(),
            })
            .collect()
    }

    /// Finds the logged requests closest to a pattern, e.g. to explain why an expected request
    /// never arrived.
    pub fn near_misses_for_pattern(
        &self,
        pattern: &RequestPattern,
        events: &[Arc<ServeEvent>],
    ) -> Vec<RequestNearMiss> {
        let candidates = events
            .iter()
            .map(|event| (event.clone(), pattern.evaluate(&event.request)));

        self.rank(candidates)
            .into_iter()
            .map(|(event, result)| RequestNearMiss {
                request: event.request.clone(),
                distance: result.distance(),
                diff: result.to_diffs(),
            })
            .collect()
    }

    fn rank<T, I>(&self, candidates: I) -> Vec<(T, RequestMatchResult)>
    where
        I: Iterator<Item = (T, RequestMatchResult)>,
    {
        let mut ranked: Vec<(T, RequestMatchResult)> = candidates.collect();

        // Stable sort, ties keep their input order.
        ranked.sort_by(|(_, a), (_, b)| {
            a.distance()
                .partial_cmp(&b.distance())
                .unwrap_or(Ordering::Equal)
        });
        ranked.truncate(self.limit);

        tracing::trace!("Ranked {} near miss candidate(s)", ranked.len());
        ranked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{
        resolver::tests::TextStub,
        scenario::{ScenarioSpec, STARTED},
    };

    #[test]
    fn sorts_by_distance_and_truncates() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();

        store.add(TextStub::new("zzz")).unwrap();
        let close = TextStub::new("abd");
        let close_id = close.id;
        store.add(close).unwrap();
        store.add(TextStub::new("qqq")).unwrap();

        // TextStub reports 0 or 1 only, so the stub that matches comes first.
        let calculator = NearMissCalculator::new(2);
        let misses = calculator.near_misses("abd!", &store, &scenarios);

        assert_eq!(misses.len(), 2);
        assert_eq!(misses[0].stub.id, close_id);
        assert_eq!(misses[0].distance, 0.0);
    }

    #[test]
    fn equal_distances_keep_registration_order() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();

        let ids: Vec<_> = (0..3)
            .map(|i| {
                let stub = TextStub::new(&format!("x{}", i));
                let id = stub.id;
                store.add(stub).unwrap();
                id
            })
            .collect();

        let misses = NearMissCalculator::new(10).near_misses("nope", &store, &scenarios);
        let ranked: Vec<_> = misses.iter().map(|m| m.stub.id).collect();
        assert_eq!(ranked, ids);
    }

    #[test]
    fn ineligible_scenario_stubs_are_reported_with_a_scenario_row() {
        let store = StubStore::new();
        let scenarios = Scenarios::new();

        let mut stub = TextStub::new("a");
        let spec = ScenarioSpec::new("flow").requiring("Done");
        scenarios.on_stub_added(stub.id, &spec);
        stub.scenario = Some(spec);
        store.add(stub).unwrap();

        let misses = NearMissCalculator::default().near_misses("a", &store, &scenarios);
        assert_eq!(misses.len(), 1);
        assert!(misses[0].distance > 0.0);

        let row = misses[0].diff.iter().find(|d| d.field == "scenario").unwrap();
        assert_eq!(row.expected, "flow: Done");
        assert_eq!(row.actual.as_deref(), Some(&*format!("flow: {}", STARTED)));
    }

    #[test]
    fn closest_logged_requests_for_a_pattern() {
        use crate::server::matchers::UrlPattern;

        let events: Vec<Arc<ServeEvent>> = ["/orders/1", "/customers", "/orders"]
            .iter()
            .map(|url| Arc::new(ServeEvent::new(HttpRequest::new("GET", *url), None, None)))
            .collect();

        let pattern = RequestPattern::new("GET", UrlPattern::UrlPath("/orders".to_string()));
        let misses = NearMissCalculator::new(2).near_misses_for_pattern(&pattern, &events);

        assert_eq!(misses.len(), 2);
        assert_eq!(misses[0].request.url(), "/orders");
        assert_eq!(misses[0].distance, 0.0);
        assert_eq!(misses[1].request.url(), "/orders/1");
    }
}
