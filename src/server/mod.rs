pub mod builder;
pub mod handler;
pub mod journal;
pub mod listener;
pub mod matchers;
pub mod messaging;
pub mod near_miss;
pub mod persistence;
pub mod resolver;
pub mod scenario;
#[allow(clippy::module_inception)]
pub mod server;
pub mod state;
pub mod store;
pub mod stub;

pub use builder::StubServerBuilder;
pub use handler::StubHandler;
pub use server::{StubServer, StubServerConfig};
pub use state::{HttpStubStateManager, StateManager};

/// The server a default [`StubServerBuilder`] builds.
pub type HttpStubServer = StubServer<StubHandler<HttpStubStateManager>>;
