// File: src/rpc.rs
// Purpose: HTTP endpoint for client-side server function calls

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tracing::{debug, warn};

use crate::config::RuntimeOptions;
use crate::cookie::{parse_cookie_header, SetCookie};
use crate::error::{ServerError, BAD_REQUEST_ERROR, NOT_FOUND_ERROR};
use crate::functions::{CallContext, FunctionTable};
use crate::protocol::{CallRequest, CallResponse};

/// Path of the RPC endpoint
pub const RPC_PATH: &str = "/_tessera/rpc";

#[derive(Debug, Clone)]
pub struct RpcState {
    pub table: Arc<FunctionTable>,
    pub options: RuntimeOptions,
}

/// Router serving `POST /_tessera/rpc`
///
/// Merge it into the application router. Every request gets a JSON
/// [`CallResponse`] back, errors included.
pub fn rpc_router(table: Arc<FunctionTable>, options: RuntimeOptions) -> Router {
    Router::new()
        .route(RPC_PATH, post(handle_rpc))
        .with_state(RpcState { table, options })
}

pub async fn handle_rpc(State(state): State<RpcState>, headers: HeaderMap, body: Bytes) -> Response {
    let production = state.options.production;

    let request: CallRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!("malformed rpc request: {}", err);
            let error = ServerError::BadRequest(err.to_string()).to_payload(production);
            return envelope(CallResponse::error(error), &[]);
        }
    };

    let cookies = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(parse_cookie_header)
        .unwrap_or_default();

    debug!(function = %request.id, args = request.args.len(), "rpc call");
    let ctx = CallContext::new(cookies, state.options.cookies.clone());
    let response = state.table.call(&request.id, request.args, ctx.clone(), production).await;
    envelope(response, &ctx.cookies_set())
}

fn envelope(response: CallResponse, cookies: &[SetCookie]) -> Response {
    let status = match response.error.as_ref().map(|e| e.name.as_str()) {
        Some(NOT_FOUND_ERROR) => StatusCode::NOT_FOUND,
        Some(BAD_REQUEST_ERROR) => StatusCode::BAD_REQUEST,
        _ => StatusCode::OK,
    };

    let set_cookies: Vec<HeaderValue> = cookies
        .iter()
        .filter_map(|cookie| HeaderValue::from_str(&cookie.to_header()).ok())
        .collect();

    let mut http = (status, Json(response)).into_response();
    for value in set_cookies {
        http.headers_mut().append(header::SET_COOKIE, value);
    }
    http
}
