//! `stubwire` is an HTTP stub server with a ranked request matching engine.
//!
//! Stubs pair a [`RequestPattern`] with a [`ResponseDefinition`]. When a request arrives, every
//! stub is scored by how far the request is from its pattern, and the closest exact match
//! wins. Ties are broken by priority, then by how specific the pattern is, then by
//! registration order. When nothing matches, the same scores explain which stubs came
//! closest, field by field.
//!
//! Stubs can take part in scenarios, small state machines that make a stub eligible only in a
//! given state and move the scenario on once it matched. Message stubs apply the same
//! matching to messages sent over open channels.
//!
//! # Getting Started
//! ```
//! use stubwire::{api::stub::*, HttpRequest, HttpStubStateManager, StateManager};
//!
//! let state = HttpStubStateManager::default();
//! state
//!     .add_stub(stub_for(get(url_path_equal_to("/ping"))).will_return(ok().with_body("pong")))
//!     .unwrap();
//!
//! let outcome = state.serve(HttpRequest::new("GET", "/ping"));
//! assert!(outcome.is_matched());
//! ```
//!
//! To serve over HTTP, build a server with [`StubServerBuilder`]. Stubs can then also be
//! managed through the JSON admin routes under `/__admin/`.
pub mod api;
pub mod common;
pub mod server;

pub use common::data::{HttpRequest, ResponseDefinition, ServeEvent};
pub use server::{
    matchers::{MatchResult, RequestPattern, StringValuePattern, UrlPattern},
    messaging::MessageStubMapping,
    scenario::{ScenarioSpec, STARTED},
    state::{MessageOutcome, ServeOutcome},
    stub::StubMapping,
    HttpStubServer, HttpStubStateManager, StateManager, StubServer, StubServerBuilder,
};
