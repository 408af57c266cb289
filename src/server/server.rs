use std::{
    future::{pending, Future},
    net::SocketAddr,
    sync::Arc,
};

use futures_util::FutureExt;
use http::{uri::Scheme, Request, StatusCode, Uri};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::{
    body::{Bytes, Incoming},
    service::service_fn,
    Response,
};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto::Builder as ServerBuilder,
};
use thiserror::Error;
use tokio::{
    net::{TcpListener, TcpStream},
    sync::oneshot::Sender,
    task::spawn,
};

use crate::server::{
    handler,
    handler::Handler,
    server::Error::{
        BufferError, LocalSocketAddrError, PublishSocketAddrError, RouterError,
        ServerConnectionError, SocketBindError, UriNormalizationError,
    },
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot bind to socket addr {0}: {1}")]
    SocketBindError(SocketAddr, std::io::Error),
    #[error("cannot parse socket address: {0}")]
    SocketAddrParseError(#[from] std::net::AddrParseError),
    #[error("cannot obtain local address: {0}")]
    LocalSocketAddrError(std::io::Error),
    #[error("cannot publish the bound TCP address {0}")]
    PublishSocketAddrError(SocketAddr),
    #[error("buffering error: {0}")]
    BufferError(hyper::Error),
    #[error("HTTP error: {0}")]
    HTTPError(#[from] http::Error),
    #[error("cannot normalize request URI: {0}")]
    UriNormalizationError(String),
    #[error("cannot process request: {0}")]
    RouterError(#[from] handler::Error),
    #[error("server error: {0}")]
    ServerConnectionError(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Default)]
pub struct StubServerConfig {
    pub static_port: Option<u16>,
    pub expose: bool,
}

/// Accepts TCP connections and hands every buffered request to a [`Handler`].
pub struct StubServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    handler: Box<H>,
    config: StubServerConfig,
}

impl<H> StubServer<H>
where
    H: Handler + Send + Sync + 'static,
{
    pub fn new(handler: Box<H>, config: StubServerConfig) -> Self {
        StubServer { handler, config }
    }

    /// Runs until the process ends.
    pub async fn start(self) -> Result<(), Error> {
        self.start_with_signals(None, pending()).await
    }

    /// Runs until `shutdown` resolves. The bound address is sent to `socket_addr_sender`
    /// before the first connection is accepted, which makes port `0` usable in tests.
    pub async fn start_with_signals<F>(
        self,
        socket_addr_sender: Option<Sender<SocketAddr>>,
        shutdown: F,
    ) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let host = if self.config.expose {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        };
        let addr: SocketAddr =
            format!("{}:{}", host, self.config.static_port.unwrap_or(0)).parse()?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| SocketBindError(addr, e))?;

        let local_addr = listener.local_addr().map_err(LocalSocketAddrError)?;
        if let Some(sender) = socket_addr_sender {
            sender.send(local_addr).map_err(PublishSocketAddrError)?;
        }

        tracing::info!("Listening on {}", local_addr);
        self.run_accept_loop(listener, shutdown).await
    }

    pub async fn run_accept_loop<F>(self, listener: TcpListener, shutdown: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let shutdown = shutdown.shared();
        let server = Arc::new(self);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((tcp_stream, remote_address)) => {
                            let server = server.clone();
                            spawn(async move {
                                if let Err(err) = server.handle_tcp_stream(tcp_stream, remote_address).await {
                                    tracing::error!("{:?}", err);
                                }
                            });
                        },
                        Err(err) => {
                            tracing::error!("TCP error: {:?}", err);
                        },
                    };
                }
                _ = shutdown.clone() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn service(
        self: Arc<Self>,
        req: Request<Incoming>,
    ) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
        tracing::trace!("New HTTP request received: {}", req.uri());

        let mut req = match buffer_request(req).await {
            Ok(req) => req,
            Err(err) => {
                return error_response(StatusCode::INTERNAL_SERVER_ERROR, BufferError(err));
            }
        };

        if let Err(err) = normalize_absolute_uri(&mut req) {
            return error_response(StatusCode::BAD_REQUEST, err);
        }

        match self.handler.handle(req).await {
            Ok(response) => to_service_response(response),
            Err(err) => error_response(StatusCode::INTERNAL_SERVER_ERROR, RouterError(err)),
        }
    }

    async fn handle_tcp_stream(
        self: Arc<Self>,
        tcp_stream: TcpStream,
        remote_address: SocketAddr,
    ) -> Result<(), Error> {
        tracing::trace!("New TCP connection from {}", remote_address);

        let mut server_builder = ServerBuilder::new(TokioExecutor::new());
        server_builder.http1().preserve_header_case(true);
        #[cfg(feature = "http2")]
        server_builder.http2();

        server_builder
            .serve_connection_with_upgrades(
                TokioIo::new(tcp_stream),
                service_fn(|req| self.clone().service(req)),
            )
            .await
            .map_err(ServerConnectionError)
    }
}

async fn buffer_request(req: Request<Incoming>) -> Result<Request<Bytes>, hyper::Error> {
    let (parts, body) = req.into_parts();
    let body = body.collect().await?.to_bytes();
    Ok(Request::from_parts(parts, body))
}

/// Rewrites origin-form URIs (`/path`) into absolute form using the `Host` header, so host
/// and port predicates can read them from the URI.
fn normalize_absolute_uri(req: &mut Request<Bytes>) -> Result<(), Error> {
    if req.uri().authority().is_some() {
        return Ok(());
    }

    let host = match req.headers().get(http::header::HOST) {
        Some(value) => value
            .to_str()
            .map_err(|err| UriNormalizationError(err.to_string()))?
            .to_string(),
        None => return Ok(()),
    };

    let mut parts = req.uri().clone().into_parts();
    parts.scheme = Some(Scheme::HTTP);
    parts.authority = Some(
        host.parse()
            .map_err(|err: http::uri::InvalidUri| UriNormalizationError(err.to_string()))?,
    );
    if parts.path_and_query.is_none() {
        parts.path_and_query = Some(http::uri::PathAndQuery::from_static("/"));
    }

    *req.uri_mut() =
        Uri::from_parts(parts).map_err(|err| UriNormalizationError(err.to_string()))?;
    Ok(())
}

fn full<T: Into<Bytes>>(chunk: T) -> BoxBody<Bytes, hyper::Error> {
    Full::new(chunk.into())
        .map_err(|never| match never {})
        .boxed()
}

fn error_response(
    code: StatusCode,
    err: Error,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    tracing::error!("failed to process request: {}", err);
    Ok(Response::builder()
        .status(code)
        .body(full(err.to_string()))?)
}

fn to_service_response(
    response: Response<Bytes>,
) -> Result<Response<BoxBody<Bytes, hyper::Error>>, Error> {
    let (parts, body) = response.into_parts();
    Ok(Response::from_parts(parts, full(body)))
}
