use bytes::Bytes;

use stubwire::{
    api::stub::*,
    server::matchers::pattern::{equal_to, matching},
    HttpRequest, HttpStubStateManager, MessageOutcome, MessageStubMapping, ScenarioSpec,
    StateManager,
};

fn deliveries(outcome: MessageOutcome) -> Vec<(uuid::Uuid, String)> {
    match outcome {
        MessageOutcome::Matched { deliveries, .. } => deliveries
            .into_iter()
            .map(|d| (d.channel_id, d.body))
            .collect(),
        MessageOutcome::Unmatched { .. } => panic!("message was not matched"),
    }
}

#[test]
fn replies_go_to_the_originating_channel() {
    let state = HttpStubStateManager::default();
    state
        .add_message_stub(
            MessageStubMapping::new()
                .with_body(equal_to("ping"))
                .reply("pong"),
        )
        .unwrap();

    let channel = state.open_channel(HttpRequest::new("GET", "/ws"));
    let outcome = state
        .receive_message(channel.id, Bytes::from_static(b"ping"))
        .unwrap();

    assert_eq!(deliveries(outcome), vec![(channel.id, "pong".to_string())]);
}

#[test]
fn broadcasts_reach_only_open_matching_channels() {
    let state = HttpStubStateManager::default();
    state
        .add_message_stub(
            MessageStubMapping::new()
                .with_body(matching("announce:.*").unwrap())
                .broadcast(get(url_path_equal_to("/rooms/blue")), "hello blue"),
        )
        .unwrap();

    let sender = state.open_channel(HttpRequest::new("GET", "/rooms/red"));
    let blue_one = state.open_channel(HttpRequest::new("GET", "/rooms/blue?user=1"));
    let blue_two = state.open_channel(HttpRequest::new("GET", "/rooms/blue?user=2"));

    state.close_channel(blue_two.id).unwrap();

    let outcome = state
        .receive_message(sender.id, Bytes::from_static(b"announce:lunch"))
        .unwrap();
    assert_eq!(deliveries(outcome), vec![(blue_one.id, "hello blue".to_string())]);
}

#[test]
fn channel_patterns_select_which_stubs_apply() {
    let state = HttpStubStateManager::default();
    state
        .add_message_stub(
            MessageStubMapping::new()
                .with_name("admin")
                .on_channel(get(url_path_equal_to("/admin")))
                .reply("admin reply"),
        )
        .unwrap();

    let user = state.open_channel(HttpRequest::new("GET", "/user"));
    let outcome = state
        .receive_message(user.id, Bytes::from_static(b"anything"))
        .unwrap();
    assert!(!outcome.is_matched());

    let admin = state.open_channel(HttpRequest::new("GET", "/admin"));
    let outcome = state
        .receive_message(admin.id, Bytes::from_static(b"anything"))
        .unwrap();
    assert!(outcome.is_matched());
    assert_eq!(state.messages().len(), 2);
}

#[test]
fn message_priorities_and_scenarios_follow_http_rules() {
    let state = HttpStubStateManager::default();
    state
        .add_message_stub(
            MessageStubMapping::new()
                .with_priority(5)
                .with_body(equal_to("next"))
                .reply("generic"),
        )
        .unwrap();
    state
        .add_message_stub(
            MessageStubMapping::new()
                .with_priority(1)
                .with_body(equal_to("next"))
                .in_scenario(ScenarioSpec::new("steps").requiring("Started").moving_to("Two"))
                .reply("step one"),
        )
        .unwrap();

    let channel = state.open_channel(HttpRequest::new("GET", "/ws"));

    let first = state
        .receive_message(channel.id, Bytes::from_static(b"next"))
        .unwrap();
    assert_eq!(deliveries(first)[0].1, "step one");

    let second = state
        .receive_message(channel.id, Bytes::from_static(b"next"))
        .unwrap();
    assert_eq!(deliveries(second)[0].1, "generic");
}

#[test]
fn messages_on_closed_channels_are_rejected() {
    let state = HttpStubStateManager::default();
    let channel = state.open_channel(HttpRequest::new("GET", "/ws"));
    state.close_channel(channel.id).unwrap();

    assert!(state
        .receive_message(channel.id, Bytes::from_static(b"late"))
        .is_err());
}
