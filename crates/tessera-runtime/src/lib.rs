//! # Tessera Runtime
//!
//! What the build output runs against:
//!
//! - [`ResourceCache`]: server function results keyed by function id and
//!   arguments, with shared in-flight fetches, lazy expiry, invalidation
//!   and optimistic edits
//! - [`FunctionTable`] and the RPC endpoint ([`rpc_router`]) that executes
//!   calls by id
//! - [`RequestScope`] and [`StreamInjector`]: out-of-band state spliced
//!   into a streaming server render
//! - [`Navigator`]: navigation events over a pluggable [`History`]
//!
//! During a server render the cache fetches through an
//! [`InProcessFetcher`], which also records every call into the request's
//! scope; in the browser the same cache fetches over RPC.
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::{json, Value};
//! use tessera_runtime::{CallContext, FunctionTable, InProcessFetcher, ResourceCache};
//!
//! # tokio_test_main();
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn tokio_test_main() {
//! let mut table = FunctionTable::new();
//! let id = table.register_export("lib/math.js", "double", |_ctx: CallContext, args: Vec<Value>| async move {
//!     Ok(json!(args[0].as_i64().unwrap_or(0) * 2))
//! });
//!
//! let cache = ResourceCache::new(Arc::new(InProcessFetcher::new(Arc::new(table))));
//! assert_eq!(cache.get(&id, vec![json!(21)]).load().await.unwrap(), json!(42));
//! # }
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

mod cache;
mod config;
mod cookie;
mod error;
mod fetcher;
mod functions;
pub mod inject;
mod navigation;
mod protocol;
mod rpc;
mod scope;
pub mod ssr;

pub use cache::{Matcher, Read, Resource, ResourceCache, Status, Subscription, Suspense};
pub use config::{RuntimeOptions, PRODUCTION_ENV};
pub use cookie::{parse_cookie_header, CookieDefaults, SetCookie};
pub use error::{correlation_id, ErrorPayload, ServerError, CORRELATION_ID_LEN};
pub use fetcher::{Fetcher, InProcessFetcher, RpcFetcher};
pub use functions::{CallContext, FunctionTable, ServerFuture};
pub use inject::StreamInjector;
pub use navigation::{History, MemoryHistory, NavigationBus, NavigationEvent, Navigator};
pub use protocol::{CallRequest, CallResponse, Redirect, RedirectMode, ResourceKey};
pub use rpc::{handle_rpc, rpc_router, RpcState, RPC_PATH};
pub use scope::{Fragment, RequestScope};
