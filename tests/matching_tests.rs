use std::sync::{Arc, Barrier};

use stubwire::{
    api::stub::*,
    server::matchers::pattern::{absent, containing, equal_to, matching},
    HttpRequest, HttpStubStateManager, ServeOutcome, StateManager, StubMapping, STARTED,
};

fn matched_name(outcome: &ServeOutcome) -> Option<String> {
    outcome.stub().and_then(|s| s.name.clone())
}

#[test]
fn pattern_distances_stay_in_range_and_combine() {
    let values = ["", "one", "two", "a much longer value with one inside"];
    let a = equal_to("one");
    let b = containing("one");

    for value in values {
        for pattern in [&a, &b] {
            let result = pattern.evaluate(Some(value));
            assert!((0.0..=1.0).contains(&result.distance()));
            assert_eq!(result.is_exact_match(), result.distance() == 0.0);
        }

        let da = a.evaluate(Some(value)).distance();
        let db = b.evaluate(Some(value)).distance();

        let and = a.clone().and(b.clone()).evaluate(Some(value)).distance();
        let or = a.clone().or(b.clone()).evaluate(Some(value)).distance();
        assert_eq!(and, da.max(db));
        assert_eq!(or, da.min(db));
    }

    let optional = equal_to("one").or(absent());
    assert!(optional.evaluate(None).is_exact_match());
    assert!(optional.evaluate(Some("one")).is_exact_match());
    assert!(!optional.evaluate(Some("two")).is_exact_match());
}

#[test]
fn a_stub_matches_requests_satisfying_every_predicate() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(
            stub_for(get(url_path_equal_to("/a")).with_header("X", equal_to("1"))).with_name("a"),
        )
        .unwrap();

    let hit = state.serve(HttpRequest::new("GET", "/a").with_header("X", "1"));
    assert_eq!(matched_name(&hit).as_deref(), Some("a"));

    let wrong_value = state.serve(HttpRequest::new("GET", "/a").with_header("X", "2"));
    assert!(!wrong_value.is_matched());

    let missing = state.serve(HttpRequest::new("GET", "/a"));
    assert!(!missing.is_matched());
}

#[test]
fn explicit_priority_wins() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(stub_for(get(url_equal_to("/p"))).with_priority(10).with_name("low"))
        .unwrap();
    state
        .add_stub(stub_for(get(url_equal_to("/p"))).with_priority(1).with_name("high"))
        .unwrap();

    for _ in 0..3 {
        let outcome = state.serve(HttpRequest::new("GET", "/p"));
        assert_eq!(matched_name(&outcome).as_deref(), Some("high"));
    }
}

#[test]
fn the_more_specific_url_wins_without_priorities() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(stub_for(get(url_path_matching("/orders/.*").unwrap())).with_name("regex"))
        .unwrap();
    state
        .add_stub(stub_for(get(url_equal_to("/orders/1"))).with_name("exact"))
        .unwrap();

    let outcome = state.serve(HttpRequest::new("GET", "/orders/1"));
    assert_eq!(matched_name(&outcome).as_deref(), Some("exact"));

    let outcome = state.serve(HttpRequest::new("GET", "/orders/2"));
    assert_eq!(matched_name(&outcome).as_deref(), Some("regex"));
}

#[test]
fn equally_specific_stubs_resolve_in_registration_order() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(stub_for(get(url_equal_to("/same"))).with_name("first"))
        .unwrap();
    state
        .add_stub(stub_for(get(url_equal_to("/same"))).with_name("second"))
        .unwrap();

    let outcome = state.serve(HttpRequest::new("GET", "/same"));
    assert_eq!(matched_name(&outcome).as_deref(), Some("first"));
}

#[test]
fn scenario_moves_from_one_stub_to_the_next() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(
            stub_for(get(url_equal_to("/todo")))
                .with_name("A")
                .in_scenario("todo")
                .when_scenario_state_is(STARTED)
                .will_set_state_to("S2"),
        )
        .unwrap();
    state
        .add_stub(
            stub_for(get(url_equal_to("/todo")))
                .with_name("B")
                .in_scenario("todo")
                .when_scenario_state_is("S2"),
        )
        .unwrap();

    let first = state.serve(HttpRequest::new("GET", "/todo"));
    assert_eq!(matched_name(&first).as_deref(), Some("A"));
    assert_eq!(state.get_scenario("todo").unwrap().state, "S2");

    let second = state.serve(HttpRequest::new("GET", "/todo"));
    assert_eq!(matched_name(&second).as_deref(), Some("B"));

    state.reset_scenarios();
    let again = state.serve(HttpRequest::new("GET", "/todo"));
    assert_eq!(matched_name(&again).as_deref(), Some("A"));
}

#[test]
fn near_misses_rank_the_closer_stub_first() {
    let state = HttpStubStateManager::default();
    state
        .add_stub(stub_for(post(url_equal_to("/completely/unrelated/resource"))).with_name("other"))
        .unwrap();
    state
        .add_stub(stub_for(get(url_equal_to("/foo"))).with_name("foo"))
        .unwrap();

    let outcome = state.serve(HttpRequest::new("GET", "/foo/extra"));
    let near_misses = match outcome {
        ServeOutcome::Unmatched { near_misses, .. } => near_misses,
        ServeOutcome::Matched { .. } => panic!("nothing should match /foo/extra"),
    };

    assert_eq!(near_misses.len(), 2);
    assert_eq!(near_misses[0].stub.name.as_deref(), Some("foo"));
    assert!(near_misses[0].distance > 0.0);
    assert!(near_misses[0].distance <= near_misses[1].distance);

    let url_row = near_misses[0]
        .diff
        .iter()
        .find(|d| d.field == "url")
        .unwrap();
    assert!(!url_row.is_exact_match);
    assert_eq!(url_row.actual.as_deref(), Some("/foo/extra"));
}

#[test]
fn matching_is_idempotent_and_removal_unmatches() {
    let state = HttpStubStateManager::default();
    let stub = state
        .add_stub(stub_for(get(url_path_equal_to("/items"))).with_name("items"))
        .unwrap();

    let request = || HttpRequest::new("GET", "/items?page=2");
    let first = state.serve(request());
    let second = state.serve(request());
    assert_eq!(first.stub().map(|s| s.id), second.stub().map(|s| s.id));

    state.remove_stub(stub.id).unwrap();
    assert!(!state.serve(request()).is_matched());
    assert!(state.remove_stub(stub.id).is_err());
}

#[test]
fn concurrent_requests_claim_a_single_use_transition_once() {
    const THREADS: usize = 16;

    let state = Arc::new(HttpStubStateManager::default());
    state
        .add_stub(
            stub_for(post(url_equal_to("/redeem")))
                .in_scenario("voucher")
                .when_scenario_state_is(STARTED)
                .will_set_state_to("Done"),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let state = state.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                barrier.wait();
                state.serve(HttpRequest::new("POST", "/redeem")).is_matched()
            })
        })
        .collect();

    let matched = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|matched| *matched)
        .count();

    assert_eq!(matched, 1);
    assert_eq!(state.get_scenario("voucher").unwrap().state, "Done");
    assert_eq!(state.unmatched_requests().len(), THREADS - 1);
}

#[test]
fn invalid_patterns_are_rejected_at_construction() {
    assert!(matching("[unclosed").is_err());
    assert!(url_path_template("/orders/{").is_err());
}

#[test]
fn definitions_round_trip_through_json() {
    let json = serde_json::json!({
        "name": "search",
        "priority": 2,
        "request": {
            "method": "GET",
            "urlPath": "/search",
            "queryParameters": { "q": { "contains": "rust" } }
        },
        "response": { "status": 200, "jsonBody": { "hits": 1 } }
    });

    let stub: StubMapping = serde_json::from_value(json).unwrap();
    let state = HttpStubStateManager::default();
    state.add_stub(stub.clone()).unwrap();

    let outcome = state.serve(HttpRequest::new("GET", "/search?q=rustlang"));
    assert_eq!(matched_name(&outcome).as_deref(), Some("search"));

    let back: StubMapping = serde_json::from_value(serde_json::to_value(&stub).unwrap()).unwrap();
    assert_eq!(back, stub);
}
