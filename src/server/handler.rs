use std::{
    convert::{TryFrom, TryInto},
    fmt::{Debug, Display},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use hyper::{Method, Request, Response};
use path_tree::{Path, PathTree};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::{
    api::output::{NearMissFormatter, PlainTextNearMissFormatter},
    common::data::{Error as DataError, HttpRequest, ServeEvent},
    server::{
        handler::Error::{
            ParamError, ParamFormatError, RequestBodyDeserializeError, RequestConversionError,
            ResponseBodyConversionError, ResponseBodySerializeError,
        },
        matchers::{
            definition::{PatternDefinition, RequestPatternDefinition},
            RequestPattern,
        },
        messaging::{Delivery, MessageStubMappingDefinition},
        state,
        state::{MessageOutcome, ServeOutcome, StateManager},
        stub::{StubMapping, StubMappingDefinition},
    },
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot deserialize request body: {0}")]
    RequestBodyDeserializeError(serde_json::Error),
    #[error("cannot serialize response body: {0}")]
    ResponseBodySerializeError(serde_json::Error),
    #[error("cannot convert response body: {0}")]
    ResponseBodyConversionError(http::Error),
    #[error("expected URL parameters not found")]
    ParamError,
    #[error("URL parameter format is invalid: {0}")]
    ParamFormatError(String),
    #[error("cannot modify state: {0}")]
    StateManagerError(#[from] state::Error),
    #[error("cannot convert request to internal data structure: {0}")]
    RequestConversionError(String),
    #[error("cannot build stub response: {0}")]
    StubResponseError(DataError),
}

enum RoutePath {
    Ping,
    Reset,
    MappingCollection,
    MappingsReset,
    MappingsRemove,
    MappingsFindByMetadata,
    MappingsRemoveByMetadata,
    SingleMapping,
    ScenarioCollection,
    ScenariosReset,
    ScenarioState,
    RequestCollection,
    RequestsFind,
    RequestsCount,
    UnmatchedRequests,
    UnmatchedNearMisses,
    NearMissesForRequest,
    NearMissesForPattern,
    MessageMappingCollection,
    SingleMessageMapping,
    ChannelCollection,
    SingleChannel,
    ChannelMessages,
}

#[derive(Serialize, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

impl ErrorResponse {
    pub fn new<T: ToString>(message: &T) -> ErrorResponse {
        ErrorResponse {
            message: message.to_string(),
        }
    }
}

#[derive(Serialize)]
struct Collection<T> {
    items: Vec<T>,
    total: usize,
}

impl<T> Collection<T> {
    fn of(items: Vec<T>) -> Self {
        let total = items.len();
        Self { items, total }
    }
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

#[derive(Deserialize)]
struct ScenarioStateUpdate {
    #[serde(default)]
    state: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MessageOutcomeResponse {
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stub_id: Option<Uuid>,
    deliveries: Vec<Delivery>,
}

#[async_trait]
pub trait Handler {
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error>;
}

/// Routes `/__admin/` requests to the state manager and serves stubs for everything else.
pub struct StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    path_tree: PathTree<RoutePath>,
    state: Arc<S>,
    formatter: Arc<dyn NearMissFormatter>,
}

#[async_trait]
impl<S> Handler for StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    async fn handle(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        tracing::trace!("Routing incoming request: {:?}", req);

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if let Some((matched_path, params)) = self.path_tree.find(&path) {
            let routed = match matched_path {
                RoutePath::Ping => match method {
                    Method::GET => Some(self.handle_ping()),
                    _ => None,
                },
                RoutePath::Reset => match method {
                    Method::POST => Some(self.handle_reset()),
                    _ => None,
                },
                RoutePath::MappingCollection => match method {
                    Method::GET => Some(self.handle_list_mappings()),
                    Method::POST => Some(self.handle_add_mapping(req)),
                    Method::DELETE => Some(self.handle_reset_mappings()),
                    _ => None,
                },
                RoutePath::MappingsReset => match method {
                    Method::POST => Some(self.handle_reset_mappings_to_defaults()),
                    _ => None,
                },
                RoutePath::MappingsRemove => match method {
                    Method::POST => Some(self.handle_remove_mappings_matching(req)),
                    _ => None,
                },
                RoutePath::MappingsFindByMetadata => match method {
                    Method::POST => Some(self.handle_find_by_metadata(req)),
                    _ => None,
                },
                RoutePath::MappingsRemoveByMetadata => match method {
                    Method::POST => Some(self.handle_remove_by_metadata(req)),
                    _ => None,
                },
                RoutePath::SingleMapping => match method {
                    Method::GET => Some(self.handle_read_mapping(params)),
                    Method::PUT => Some(self.handle_replace_mapping(params, req)),
                    Method::DELETE => Some(self.handle_remove_mapping(params)),
                    _ => None,
                },
                RoutePath::ScenarioCollection => match method {
                    Method::GET => Some(self.handle_list_scenarios()),
                    _ => None,
                },
                RoutePath::ScenariosReset => match method {
                    Method::POST => Some(self.handle_reset_scenarios()),
                    _ => None,
                },
                RoutePath::ScenarioState => match method {
                    Method::PUT => Some(self.handle_set_scenario_state(params, req)),
                    _ => None,
                },
                RoutePath::RequestCollection => match method {
                    Method::GET => Some(self.handle_list_requests()),
                    Method::DELETE => Some(self.handle_clear_requests()),
                    _ => None,
                },
                RoutePath::RequestsFind => match method {
                    Method::POST => Some(self.handle_find_requests(req)),
                    _ => None,
                },
                RoutePath::RequestsCount => match method {
                    Method::POST => Some(self.handle_count_requests(req)),
                    _ => None,
                },
                RoutePath::UnmatchedRequests => match method {
                    Method::GET => Some(self.handle_unmatched_requests()),
                    _ => None,
                },
                RoutePath::UnmatchedNearMisses => match method {
                    Method::GET => Some(self.handle_unmatched_near_misses()),
                    _ => None,
                },
                RoutePath::NearMissesForRequest => match method {
                    Method::POST => Some(self.handle_near_misses_for_request(req)),
                    _ => None,
                },
                RoutePath::NearMissesForPattern => match method {
                    Method::POST => Some(self.handle_near_misses_for_pattern(req)),
                    _ => None,
                },
                RoutePath::MessageMappingCollection => match method {
                    Method::GET => Some(self.handle_list_message_mappings()),
                    Method::POST => Some(self.handle_add_message_mapping(req)),
                    Method::DELETE => Some(self.handle_reset_message_mappings()),
                    _ => None,
                },
                RoutePath::SingleMessageMapping => match method {
                    Method::DELETE => Some(self.handle_remove_message_mapping(params)),
                    _ => None,
                },
                RoutePath::ChannelCollection => match method {
                    Method::GET => Some(self.handle_list_channels()),
                    Method::POST => Some(self.handle_open_channel(req)),
                    _ => None,
                },
                RoutePath::SingleChannel => match method {
                    Method::DELETE => Some(self.handle_close_channel(params)),
                    _ => None,
                },
                RoutePath::ChannelMessages => match method {
                    Method::POST => Some(self.handle_channel_message(params, req)),
                    _ => None,
                },
            };

            return match routed {
                Some(result) => result.or_else(error_response),
                None => response(
                    StatusCode::METHOD_NOT_ALLOWED,
                    Some(ErrorResponse::new(&format!("{} is not supported here", method))),
                ),
            };
        }

        self.catch_all(req).await
    }
}

impl<S> StubHandler<S>
where
    S: StateManager + Send + Sync + 'static,
{
    pub fn new(state: Arc<S>) -> Self {
        Self::with_formatter(state, Arc::new(PlainTextNearMissFormatter))
    }

    pub fn with_formatter(state: Arc<S>, formatter: Arc<dyn NearMissFormatter>) -> Self {
        let mut path_tree: PathTree<RoutePath> = PathTree::new();
        #[allow(unused_must_use)]
        {
            path_tree.insert("/__admin/ping", RoutePath::Ping);
            path_tree.insert("/__admin/reset", RoutePath::Reset);
            path_tree.insert("/__admin/mappings", RoutePath::MappingCollection);
            path_tree.insert("/__admin/mappings/reset", RoutePath::MappingsReset);
            path_tree.insert("/__admin/mappings/remove", RoutePath::MappingsRemove);
            path_tree.insert(
                "/__admin/mappings/find-by-metadata",
                RoutePath::MappingsFindByMetadata,
            );
            path_tree.insert(
                "/__admin/mappings/remove-by-metadata",
                RoutePath::MappingsRemoveByMetadata,
            );
            path_tree.insert("/__admin/mappings/:id", RoutePath::SingleMapping);
            path_tree.insert("/__admin/scenarios", RoutePath::ScenarioCollection);
            path_tree.insert("/__admin/scenarios/reset", RoutePath::ScenariosReset);
            path_tree.insert("/__admin/scenarios/:name/state", RoutePath::ScenarioState);
            path_tree.insert("/__admin/requests", RoutePath::RequestCollection);
            path_tree.insert("/__admin/requests/find", RoutePath::RequestsFind);
            path_tree.insert("/__admin/requests/count", RoutePath::RequestsCount);
            path_tree.insert("/__admin/requests/unmatched", RoutePath::UnmatchedRequests);
            path_tree.insert(
                "/__admin/requests/unmatched/near-misses",
                RoutePath::UnmatchedNearMisses,
            );
            path_tree.insert(
                "/__admin/near-misses/request",
                RoutePath::NearMissesForRequest,
            );
            path_tree.insert(
                "/__admin/near-misses/request-pattern",
                RoutePath::NearMissesForPattern,
            );
            path_tree.insert(
                "/__admin/message-mappings",
                RoutePath::MessageMappingCollection,
            );
            path_tree.insert(
                "/__admin/message-mappings/:id",
                RoutePath::SingleMessageMapping,
            );
            path_tree.insert("/__admin/channels", RoutePath::ChannelCollection);
            path_tree.insert("/__admin/channels/:id", RoutePath::SingleChannel);
            path_tree.insert("/__admin/channels/:id/messages", RoutePath::ChannelMessages);
        }

        Self {
            path_tree,
            state,
            formatter,
        }
    }

    fn handle_ping(&self) -> Result<Response<Bytes>, Error> {
        response::<()>(StatusCode::OK, None)
    }

    fn handle_reset(&self) -> Result<Response<Bytes>, Error> {
        self.state.reset();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_list_mappings(&self) -> Result<Response<Bytes>, Error> {
        response(StatusCode::OK, Some(Collection::of(self.state.list_stubs())))
    }

    fn handle_add_mapping(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let definition: StubMappingDefinition = parse_json_body(req)?;
        let stub = self.state.add_stub_definition(definition)?;
        response(StatusCode::CREATED, Some(stub))
    }

    fn handle_reset_mappings(&self) -> Result<Response<Bytes>, Error> {
        self.state.reset_stubs();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_reset_mappings_to_defaults(&self) -> Result<Response<Bytes>, Error> {
        self.state.reset_to_defaults();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_remove_mappings_matching(
        &self,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let pattern = parse_request_pattern(req)?;
        let removed = self.state.remove_stubs_matching(&pattern);
        response(StatusCode::OK, Some(Collection::of(removed)))
    }

    fn handle_find_by_metadata(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let definition: PatternDefinition = parse_json_body(req)?;
        let pattern = definition.compile().map_err(state::Error::from)?;
        let found = self.state.find_stubs_by_metadata(&pattern);
        response(StatusCode::OK, Some(Collection::of(found)))
    }

    fn handle_remove_by_metadata(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let definition: PatternDefinition = parse_json_body(req)?;
        let pattern = definition.compile().map_err(state::Error::from)?;
        let removed = self.state.remove_stubs_by_metadata(&pattern);
        response(StatusCode::OK, Some(Collection::of(removed)))
    }

    fn handle_read_mapping(&self, params: Path) -> Result<Response<Bytes>, Error> {
        let id: Uuid = param("id", params)?;
        match self.state.read_stub(id) {
            Some(stub) => response(StatusCode::OK, Some(stub)),
            None => Err(state::Error::StubNotFound(id).into()),
        }
    }

    fn handle_replace_mapping(
        &self,
        params: Path,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let id: Uuid = param("id", params)?;
        let definition: StubMappingDefinition = parse_json_body(req)?;
        let stub = StubMapping::try_from(definition)?.with_id(id);
        let replaced = self.state.replace_stub(stub)?;
        response(StatusCode::OK, Some(replaced))
    }

    fn handle_remove_mapping(&self, params: Path) -> Result<Response<Bytes>, Error> {
        self.state.remove_stub(param("id", params)?)?;
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_list_scenarios(&self) -> Result<Response<Bytes>, Error> {
        response(StatusCode::OK, Some(Collection::of(self.state.list_scenarios())))
    }

    fn handle_reset_scenarios(&self) -> Result<Response<Bytes>, Error> {
        self.state.reset_scenarios();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_set_scenario_state(
        &self,
        params: Path,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let name: String = param("name", params)?;
        let update: ScenarioStateUpdate = if req.body().is_empty() {
            ScenarioStateUpdate { state: None }
        } else {
            parse_json_body(req)?
        };

        match update.state {
            Some(state) => self.state.set_scenario_state(&name, &state)?,
            None => self.state.reset_scenario(&name)?,
        }

        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_list_requests(&self) -> Result<Response<Bytes>, Error> {
        response(StatusCode::OK, Some(Collection::of(self.state.requests())))
    }

    fn handle_clear_requests(&self) -> Result<Response<Bytes>, Error> {
        self.state.clear_requests();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_find_requests(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let pattern = parse_request_pattern(req)?;
        let found = self.state.find_requests(&pattern);
        response(StatusCode::OK, Some(Collection::of(found)))
    }

    fn handle_count_requests(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let pattern = parse_request_pattern(req)?;
        let count = self.state.find_requests(&pattern).len();
        response(StatusCode::OK, Some(CountResponse { count }))
    }

    fn handle_unmatched_requests(&self) -> Result<Response<Bytes>, Error> {
        let unmatched: Vec<Arc<ServeEvent>> = self.state.unmatched_requests();
        response(StatusCode::OK, Some(Collection::of(unmatched)))
    }

    fn handle_unmatched_near_misses(&self) -> Result<Response<Bytes>, Error> {
        response(
            StatusCode::OK,
            Some(Collection::of(self.state.unmatched_near_misses())),
        )
    }

    fn handle_near_misses_for_request(
        &self,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let request: HttpRequest = parse_json_body(req)?;
        let near_misses = self.state.near_misses_for_request(&request);
        response(StatusCode::OK, Some(Collection::of(near_misses)))
    }

    fn handle_near_misses_for_pattern(
        &self,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let pattern = parse_request_pattern(req)?;
        let near_misses = self.state.near_misses_for_pattern(&pattern);
        response(StatusCode::OK, Some(Collection::of(near_misses)))
    }

    fn handle_list_message_mappings(&self) -> Result<Response<Bytes>, Error> {
        response(
            StatusCode::OK,
            Some(Collection::of(self.state.list_message_stubs())),
        )
    }

    fn handle_add_message_mapping(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let definition: MessageStubMappingDefinition = parse_json_body(req)?;
        let stub = self.state.add_message_stub_definition(definition)?;
        response(StatusCode::CREATED, Some(stub))
    }

    fn handle_reset_message_mappings(&self) -> Result<Response<Bytes>, Error> {
        self.state.reset_message_stubs();
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_remove_message_mapping(&self, params: Path) -> Result<Response<Bytes>, Error> {
        self.state.remove_message_stub(param("id", params)?)?;
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_list_channels(&self) -> Result<Response<Bytes>, Error> {
        response(StatusCode::OK, Some(Collection::of(self.state.list_channels())))
    }

    fn handle_open_channel(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let request: HttpRequest = parse_json_body(req)?;
        let channel = self.state.open_channel(request);
        response(StatusCode::CREATED, Some(channel))
    }

    fn handle_close_channel(&self, params: Path) -> Result<Response<Bytes>, Error> {
        self.state.close_channel(param("id", params)?)?;
        response::<()>(StatusCode::NO_CONTENT, None)
    }

    fn handle_channel_message(
        &self,
        params: Path,
        req: Request<Bytes>,
    ) -> Result<Response<Bytes>, Error> {
        let channel_id: Uuid = param("id", params)?;
        let outcome = self.state.receive_message(channel_id, req.into_body())?;

        let body = match outcome {
            MessageOutcome::Matched {
                stub, deliveries, ..
            } => MessageOutcomeResponse {
                matched: true,
                stub_id: Some(stub.id),
                deliveries,
            },
            MessageOutcome::Unmatched { .. } => MessageOutcomeResponse {
                matched: false,
                stub_id: None,
                deliveries: Vec::new(),
            },
        };

        response(StatusCode::OK, Some(body))
    }

    async fn catch_all(&self, req: Request<Bytes>) -> Result<Response<Bytes>, Error> {
        let request: HttpRequest = (&req)
            .try_into()
            .map_err(|err: DataError| RequestConversionError(err.to_string()))?;

        match self.state.serve(request) {
            ServeOutcome::Matched { stub, .. } => {
                let definition = &stub.response;
                let res: Response<Bytes> =
                    definition.try_into().map_err(Error::StubResponseError)?;

                if let Some(millis) = definition.fixed_delay_milliseconds {
                    tokio::time::sleep(Duration::from_millis(millis)).await;
                }

                Ok(res)
            }
            ServeOutcome::Unmatched { near_misses, event } => {
                tracing::debug!("No stub matched {}", event.request.summary());

                let body = self.formatter.format(&event.request, &near_misses);
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .header("content-type", self.formatter.content_type())
                    .body(Bytes::from(body))
                    .map_err(ResponseBodyConversionError)
            }
        }
    }
}

fn parse_request_pattern(req: Request<Bytes>) -> Result<RequestPattern, Error> {
    let definition: RequestPatternDefinition = parse_json_body(req)?;
    Ok(RequestPattern::try_from(definition).map_err(state::Error::from)?)
}

fn error_response(err: Error) -> Result<Response<Bytes>, Error> {
    let status = match &err {
        Error::StateManagerError(state_err) => match state_err {
            state::Error::StubNotFound(_)
            | state::Error::ScenarioNotFound(_)
            | state::Error::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            state::Error::DuplicateStubId(_) => StatusCode::CONFLICT,
            _ => StatusCode::BAD_REQUEST,
        },
        Error::RequestBodyDeserializeError(_)
        | Error::ParamError
        | Error::ParamFormatError(_)
        | Error::RequestConversionError(_) => StatusCode::BAD_REQUEST,
        _ => return Err(err),
    };

    tracing::debug!("Admin request failed with {}: {}", status, err);
    response(status, Some(ErrorResponse::new(&err)))
}

fn param<T>(name: &str, tree_path: Path) -> Result<T, Error>
where
    T: FromStr,
    T::Err: Debug + Display,
{
    for (n, v) in tree_path.params() {
        if n.eq(name) {
            let parse_result: Result<T, T::Err> = v.parse::<T>();
            let parsed_value = parse_result.map_err(|e| ParamFormatError(format!("{}", e)))?;
            return Ok(parsed_value);
        }
    }

    Err(ParamError)
}

fn response<T>(status: StatusCode, body: Option<T>) -> Result<Response<Bytes>, Error>
where
    T: Serialize,
{
    let mut builder = Response::builder().status(status);

    if let Some(body_obj) = body {
        builder = builder.header("content-type", "application/json");

        let body_bytes = serde_json::to_vec(&body_obj).map_err(ResponseBodySerializeError)?;

        return builder
            .body(Bytes::from(body_bytes))
            .map_err(ResponseBodyConversionError);
    }

    builder
        .body(Bytes::new())
        .map_err(ResponseBodyConversionError)
}

fn parse_json_body<T>(req: Request<Bytes>) -> Result<T, Error>
where
    T: DeserializeOwned,
{
    let body: T =
        serde_json::from_slice(req.body().as_ref()).map_err(RequestBodyDeserializeError)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::server::state::HttpStubStateManager;

    fn handler() -> StubHandler<HttpStubStateManager> {
        StubHandler::new(Arc::new(HttpStubStateManager::default()))
    }

    fn request(method: &str, uri: &str, body: Value) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Bytes> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::new())
            .unwrap()
    }

    fn json_body(res: &Response<Bytes>) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[tokio::test]
    async fn adds_lists_and_serves_a_mapping() {
        let handler = handler();

        let res = handler
            .handle(request(
                "POST",
                "/__admin/mappings",
                json!({
                    "request": { "method": "GET", "urlPath": "/hello" },
                    "response": { "status": 200, "body": "world" }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let id = json_body(&res)["id"].as_str().unwrap().to_string();

        let res = handler.handle(empty("GET", "/__admin/mappings")).await.unwrap();
        assert_eq!(json_body(&res)["total"], 1);

        let res = handler.handle(empty("GET", "/hello?x=1")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"world");

        let res = handler
            .handle(empty("GET", &format!("/__admin/mappings/{}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = handler
            .handle(empty("DELETE", &format!("/__admin/mappings/{}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = handler
            .handle(empty("DELETE", &format!("/__admin/mappings/{}", id)))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_patterns_are_rejected_with_the_field_path() {
        let res = handler()
            .handle(request(
                "POST",
                "/__admin/mappings",
                json!({
                    "request": { "urlPath": "/a", "headers": { "X-Token": { "matches": "(" } } }
                }),
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let message = json_body(&res)["message"].as_str().unwrap().to_string();
        assert!(message.contains("request.headers.X-Token"), "{}", message);
    }

    #[tokio::test]
    async fn unmatched_requests_get_a_near_miss_report() {
        let handler = handler();
        handler
            .handle(request(
                "POST",
                "/__admin/mappings",
                json!({ "request": { "method": "GET", "url": "/orders" } }),
            ))
            .await
            .unwrap();

        let res = handler.handle(empty("GET", "/order")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let body = String::from_utf8(res.body().to_vec()).unwrap();
        assert!(body.contains("Request was not matched"));
        assert!(body.contains("/orders"));

        let res = handler
            .handle(empty("GET", "/__admin/requests/unmatched"))
            .await
            .unwrap();
        assert_eq!(json_body(&res)["total"], 1);
    }

    #[tokio::test]
    async fn scenario_state_can_be_set_and_reset() {
        let handler = handler();
        handler
            .handle(request(
                "POST",
                "/__admin/mappings",
                json!({
                    "scenarioName": "checkout",
                    "requiredScenarioState": "Paid",
                    "request": { "urlPath": "/status" },
                    "response": { "body": "paid" }
                }),
            ))
            .await
            .unwrap();

        let res = handler.handle(empty("GET", "/status")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let res = handler
            .handle(request(
                "PUT",
                "/__admin/scenarios/checkout/state",
                json!({ "state": "Paid" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);

        let res = handler.handle(empty("GET", "/status")).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);

        let res = handler
            .handle(empty("PUT", "/__admin/scenarios/unknown/state"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn duplicate_ids_conflict() {
        let handler = handler();
        let definition = json!({
            "id": "5d7d8bd6-5b6b-4e3c-9d2a-1f9b8a6e0c11",
            "request": { "urlPath": "/a" }
        });

        let res = handler
            .handle(request("POST", "/__admin/mappings", definition.clone()))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);

        let res = handler
            .handle(request("POST", "/__admin/mappings", definition))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn channel_messages_are_matched() {
        let handler = handler();

        handler
            .handle(request(
                "POST",
                "/__admin/message-mappings",
                json!({
                    "bodyPattern": { "equalTo": "ping" },
                    "actions": [{ "type": "send", "body": "pong" }]
                }),
            ))
            .await
            .unwrap();

        let res = handler
            .handle(request(
                "POST",
                "/__admin/channels",
                json!({ "scheme": "http", "method": "GET", "url": "/ws" }),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let channel_id = json_body(&res)["id"].as_str().unwrap().to_string();

        let res = handler
            .handle(
                Request::builder()
                    .method("POST")
                    .uri(format!("/__admin/channels/{}/messages", channel_id))
                    .body(Bytes::from_static(b"ping"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let body = json_body(&res);
        assert_eq!(body["matched"], true);
        assert_eq!(body["deliveries"][0]["body"], "pong");
        assert_eq!(body["deliveries"][0]["channelId"], channel_id.as_str());
    }

    #[tokio::test]
    async fn unsupported_methods_on_admin_routes() {
        let res = handler().handle(empty("PATCH", "/__admin/mappings")).await.unwrap();
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
