// File: src/fetcher.rs
// Purpose: How the resource cache obtains values

use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use tower::{Service, ServiceExt};
use tracing::warn;

use crate::cookie::CookieDefaults;
use crate::error::ServerError;
use crate::functions::{CallContext, FunctionTable};
use crate::protocol::{CallRequest, CallResponse, ResourceKey};
use crate::rpc::RPC_PATH;
use crate::scope::RequestScope;

/// Largest RPC response body accepted
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Runs the server function behind a resource key
///
/// Implementations never fail: transport problems are reported in the
/// response's `error` field like any other error.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> CallResponse;
}

// ============================================================================
// In-process (server render)
// ============================================================================

/// Calls the [`FunctionTable`] directly
///
/// Used while rendering on the server. With a [`RequestScope`] attached,
/// every call's cookies and value are also queued for the HTML stream.
#[derive(Debug, Clone)]
pub struct InProcessFetcher {
    table: Arc<FunctionTable>,
    request_cookies: BTreeMap<String, String>,
    defaults: CookieDefaults,
    production: bool,
    scope: Option<RequestScope>,
}

impl InProcessFetcher {
    pub fn new(table: Arc<FunctionTable>) -> Self {
        Self {
            table,
            request_cookies: BTreeMap::new(),
            defaults: CookieDefaults::default(),
            production: false,
            scope: None,
        }
    }

    pub fn with_cookies(mut self, cookies: BTreeMap<String, String>) -> Self {
        self.request_cookies = cookies;
        self
    }

    pub fn with_defaults(mut self, defaults: CookieDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    pub fn with_production(mut self, production: bool) -> Self {
        self.production = production;
        self
    }

    pub fn with_scope(mut self, scope: RequestScope) -> Self {
        self.scope = Some(scope);
        self
    }
}

#[async_trait]
impl Fetcher for InProcessFetcher {
    async fn fetch(&self, key: &ResourceKey) -> CallResponse {
        let ctx = CallContext::new(self.request_cookies.clone(), self.defaults.clone());
        let response = self
            .table
            .call(key.function_id(), key.args().to_vec(), ctx.clone(), self.production)
            .await;
        if let Some(scope) = &self.scope {
            scope.record_call(key, &ctx.cookies_set(), &response);
        }
        response
    }
}

// ============================================================================
// RPC (client)
// ============================================================================

/// Posts calls to the RPC endpoint through any HTTP service
///
/// The service only needs to accept axum requests, which covers an axum
/// `Router` in tests as well as an HTTP client wrapped as a tower service.
#[derive(Debug, Clone)]
pub struct RpcFetcher<S> {
    service: S,
    endpoint: String,
    cookie_header: Option<String>,
}

impl<S> RpcFetcher<S> {
    pub fn new(service: S) -> Self {
        Self {
            service,
            endpoint: RPC_PATH.to_string(),
            cookie_header: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sends this `Cookie` header with every call
    pub fn with_cookie_header(mut self, header: impl Into<String>) -> Self {
        self.cookie_header = Some(header.into());
        self
    }
}

impl<S> RpcFetcher<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Display + Send,
{
    async fn round_trip(&self, key: &ResourceKey) -> Result<CallResponse, ServerError> {
        let body = serde_json::to_vec(&CallRequest {
            id: key.function_id().to_string(),
            args: key.args().to_vec(),
        })
        .map_err(ServerError::unexpected)?;

        let mut request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint.as_str())
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookies) = &self.cookie_header {
            request = request.header(header::COOKIE, cookies.as_str());
        }
        let request = request.body(Body::from(body)).map_err(ServerError::unexpected)?;

        let response = self
            .service
            .clone()
            .oneshot(request)
            .await
            .map_err(ServerError::unexpected)?;
        let bytes = axum::body::to_bytes(response.into_body(), MAX_RESPONSE_BYTES)
            .await
            .map_err(ServerError::unexpected)?;
        serde_json::from_slice(&bytes).map_err(ServerError::unexpected)
    }
}

#[async_trait]
impl<S> Fetcher for RpcFetcher<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + Sync + 'static,
    S::Future: Send,
    S::Error: Display + Send,
{
    async fn fetch(&self, key: &ResourceKey) -> CallResponse {
        match self.round_trip(key).await {
            Ok(response) => response,
            Err(err) => {
                warn!(resource = %key, "rpc call failed: {}", err);
                CallResponse::error(err.to_payload(false))
            }
        }
    }
}
