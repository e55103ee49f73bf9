// File: src/inject.rs
// Purpose: Splices queued fragments into a streaming HTML response

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use serde_json::Value;
use tracing::trace;

use crate::scope::{Fragment, RequestScope};

/// Chunk endings after which fragments may be inserted
pub const DEFAULT_MARKERS: [&str; 4] = ["</head>", "</script>", "</template>", "</div>"];

/// Global dispatcher the injected scripts call
pub const DISPATCHER: &str = "__tessera";

/// Queues dispatcher calls until the client runtime installs the real one
pub const PRELUDE: &str = "<script>window.__tessera=window.__tessera||function(){(window.__tesseraQueue=window.__tesseraQueue||[]).push(Array.prototype.slice.call(arguments))}</script>";

/// Escapes serialized JSON for use inside a `<script>` element
///
/// ```
/// use tessera_runtime::inject::escape_script_json;
///
/// assert_eq!(escape_script_json("\"</script>\""), "\"\\u003c/script\\u003e\"");
/// ```
pub fn escape_script_json(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c => out.push(c),
        }
    }
    out
}

/// Renders a fragment as a dispatcher call
pub fn fragment_script(fragment: &Fragment) -> String {
    let action = escape_script_json(&Value::String(fragment.action().to_string()).to_string());
    let args = escape_script_json(&fragment.args().to_string());
    format!("<script>{}({},{})</script>", DISPATCHER, action, args)
}

/// Wraps a renderer's byte stream and injects [`RequestScope`] fragments
///
/// Fragments are flushed after any chunk that ends with one of the
/// markers, and once more when the inner stream ends. After a redirect
/// fragment has gone out, resource fragments are dropped.
pub struct StreamInjector<S> {
    inner: S,
    scope: RequestScope,
    markers: Vec<String>,
    prelude_sent: bool,
    redirected: bool,
    finished: bool,
}

impl<S> StreamInjector<S> {
    pub fn new(inner: S, scope: RequestScope) -> Self {
        Self {
            inner,
            scope,
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
            prelude_sent: false,
            redirected: false,
            finished: false,
        }
    }

    pub fn with_markers<I, M>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<String>,
    {
        self.markers = markers.into_iter().map(Into::into).collect();
        self
    }

    fn ends_with_marker(&self, chunk: &[u8]) -> bool {
        self.markers.iter().any(|m| chunk.ends_with(m.as_bytes()))
    }

    /// Scripts for everything queued so far
    fn flush(&mut self) -> String {
        let fragments = self.scope.drain();
        let mut out = String::new();
        for fragment in fragments {
            if self.redirected && fragment.is_resource() {
                trace!(action = fragment.action(), "dropping fragment after redirect");
                continue;
            }
            if matches!(fragment, Fragment::Redirect(_)) {
                self.redirected = true;
            }
            if !self.prelude_sent {
                out.push_str(PRELUDE);
                self.prelude_sent = true;
            }
            out.push_str(&fragment_script(&fragment));
        }
        out
    }
}

impl<S, E> Stream for StreamInjector<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                if !self.ends_with_marker(&chunk) {
                    return Poll::Ready(Some(Ok(chunk)));
                }
                let scripts = self.flush();
                if scripts.is_empty() {
                    return Poll::Ready(Some(Ok(chunk)));
                }
                let mut out = BytesMut::with_capacity(chunk.len() + scripts.len());
                out.extend_from_slice(&chunk);
                out.extend_from_slice(scripts.as_bytes());
                Poll::Ready(Some(Ok(out.freeze())))
            }
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => {
                self.finished = true;
                let scripts = self.flush();
                if scripts.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Bytes::from(scripts))))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
