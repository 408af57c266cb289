use std::{error::Error, path::PathBuf, sync::Arc};

use crate::{
    api::output::NearMissFormatter,
    server::{
        handler::StubHandler,
        journal::UNBOUNDED,
        listener::ServeEventListener,
        near_miss::DEFAULT_NEAR_MISS_LIMIT,
        persistence::load_default_stubs,
        server::{StubServer, StubServerConfig},
        state::{HttpStubStateManager, StateManager},
        HttpStubServer,
    },
};

/// Configures a [`StubServer`]. Every setting has a plain setter and an `_option` variant
/// that leaves the default in place when given `None`, which suits values coming from
/// command line flags or environment variables.
#[derive(Default)]
pub struct StubServerBuilder {
    port: Option<u16>,
    expose: Option<bool>,
    journal_limit: Option<usize>,
    near_miss_limit: Option<usize>,
    stub_dir: Option<PathBuf>,
    listeners: Vec<Arc<dyn ServeEventListener>>,
    formatter: Option<Arc<dyn NearMissFormatter>>,
}

impl StubServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The port to listen on. Without one, a random free port is used.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn port_option(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    /// Listen on all interfaces instead of the loopback interface only.
    pub fn expose(mut self, enabled: bool) -> Self {
        self.expose = Some(enabled);
        self
    }

    pub fn expose_option(mut self, enabled: Option<bool>) -> Self {
        self.expose = enabled;
        self
    }

    /// How many serve events the request and message journals keep. `0` disables them.
    pub fn journal_limit(mut self, limit: usize) -> Self {
        self.journal_limit = Some(limit);
        self
    }

    pub fn journal_limit_option(mut self, limit: Option<usize>) -> Self {
        self.journal_limit = limit;
        self
    }

    /// How many near misses are reported for an unmatched request.
    pub fn near_miss_limit(mut self, limit: usize) -> Self {
        self.near_miss_limit = Some(limit);
        self
    }

    pub fn near_miss_limit_option(mut self, limit: Option<usize>) -> Self {
        self.near_miss_limit = limit;
        self
    }

    /// A directory of stub definition files that are loaded as default stubs.
    pub fn stub_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.stub_dir = Some(dir.into());
        self
    }

    pub fn stub_dir_option<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.stub_dir = dir.map(Into::into);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ServeEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    pub fn listener_option(self, listener: Option<Arc<dyn ServeEventListener>>) -> Self {
        match listener {
            Some(listener) => self.listener(listener),
            None => self,
        }
    }

    /// How unmatched requests are explained in the 404 body. Plain text by default.
    pub fn near_miss_formatter(mut self, formatter: Arc<dyn NearMissFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    pub fn near_miss_formatter_option(
        mut self,
        formatter: Option<Arc<dyn NearMissFormatter>>,
    ) -> Self {
        self.formatter = formatter;
        self
    }

    /// Builds the state manager this configuration describes.
    pub fn build_state(&self) -> HttpStubStateManager {
        HttpStubStateManager::new(
            self.journal_limit.unwrap_or(UNBOUNDED),
            self.near_miss_limit.unwrap_or(DEFAULT_NEAR_MISS_LIMIT),
        )
    }

    pub fn build(self) -> Result<HttpStubServer, Box<dyn Error>> {
        let state = Arc::new(self.build_state());
        self.build_with_state(state)
    }

    /// Builds a server around an existing state manager, so callers can keep a handle to
    /// it and register stubs without going through the admin routes.
    pub fn build_with_state<S>(
        self,
        state: Arc<S>,
    ) -> Result<StubServer<StubHandler<S>>, Box<dyn Error>>
    where
        S: StateManager + Send + Sync + 'static,
    {
        if let Some(dir) = self.stub_dir {
            load_default_stubs(dir, state.as_ref())?;
        }

        for listener in self.listeners {
            state.register_listener(listener);
        }

        let handler = match self.formatter {
            Some(formatter) => StubHandler::with_formatter(state, formatter),
            None => StubHandler::new(state),
        };

        Ok(StubServer::new(
            Box::new(handler),
            StubServerConfig {
                static_port: self.port,
                expose: self.expose.unwrap_or(false),
            },
        ))
    }
}
