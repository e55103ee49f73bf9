// File: src/ssr.rs
// Purpose: Turns a rendered HTML stream into an HTTP response

use std::convert::Infallible;
use std::fmt::Display;

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::{stream, Stream, StreamExt};
use tracing::error;

use crate::error::correlation_id;
use crate::inject::StreamInjector;
use crate::protocol::Redirect;
use crate::scope::RequestScope;

const HTML: &str = "text/html; charset=utf-8";

/// Streams a server render with fragments injected
///
/// The first chunk is awaited before anything is sent: it is the shell. A
/// redirect recorded by then becomes a `303 See Other` instead of the page.
/// If rendering fails before the shell, an inline error page is returned;
/// a failure later in the stream ends the page with an inline error notice.
pub async fn respond<S, E>(render: S, scope: RequestScope, production: bool) -> Response
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    let mut render = render;
    let shell = match render.next().await {
        Some(Ok(chunk)) => Some(chunk),
        Some(Err(err)) => {
            return error_page(&err, production);
        }
        None => None,
    };

    if let Some(redirect) = scope.redirect() {
        return redirect_response(&redirect);
    }

    let Some(shell) = shell else {
        return html_response(Body::empty());
    };

    let rest = guard_errors(render, production);
    let html = stream::once(async move { Ok::<_, Infallible>(shell) }).chain(rest);
    html_response(Body::from_stream(StreamInjector::new(Box::pin(html), scope)))
}

/// Replaces the first stream error with an inline notice and stops there
fn guard_errors<S, E>(render: S, production: bool) -> impl Stream<Item = Result<Bytes, Infallible>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: Display + Send + 'static,
{
    render.scan(false, move |failed, chunk| {
        let item = if *failed {
            None
        } else {
            match chunk {
                Ok(bytes) => Some(Ok(bytes)),
                Err(err) => {
                    *failed = true;
                    Some(Ok(Bytes::from(inline_error(&err, production))))
                }
            }
        };
        futures::future::ready(item)
    })
}

fn html_response(body: Body) -> Response {
    let mut response = Response::new(body);
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML));
    response
}

fn redirect_response(redirect: &Redirect) -> Response {
    match HeaderValue::from_str(&redirect.url) {
        Ok(location) => {
            let mut response = StatusCode::SEE_OTHER.into_response();
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(_) => {
            error!(url = %redirect.url, "redirect target is not a valid header value");
            (StatusCode::INTERNAL_SERVER_ERROR, "invalid redirect target").into_response()
        }
    }
}

fn error_message(err: &impl Display, production: bool) -> String {
    let id = correlation_id();
    error!(correlation_id = %id, "render failed: {}", err);
    if production {
        format!("Internal server error (ref {})", id)
    } else {
        format!("{} (ref {})", err, id)
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn inline_error(err: &impl Display, production: bool) -> String {
    format!(
        "<div data-tessera-error role=\"alert\">{}</div>",
        escape_html(&error_message(err, production))
    )
}

fn error_page(err: &impl Display, production: bool) -> Response {
    let body = format!(
        "<!DOCTYPE html><html><head><title>Error</title></head><body>{}</body></html>",
        inline_error(err, production)
    );
    let mut response = html_response(Body::from(body));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}
