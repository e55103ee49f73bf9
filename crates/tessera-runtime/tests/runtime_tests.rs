// Integration tests for the resource cache, RPC endpoint and SSR injection

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tessera_runtime::{
    rpc_router, ssr, CallContext, CallResponse, Fetcher, FunctionTable, InProcessFetcher,
    Matcher, MemoryHistory, NavigationBus, Navigator, Read, Redirect, RequestScope, Resource,
    ResourceCache, ResourceKey, RpcFetcher, RuntimeOptions, Subscription, RPC_PATH,
};
use tokio::sync::mpsc;
use tower::ServiceExt;

// ============================================================================
// Helpers
// ============================================================================

type Respond = Box<dyn Fn(&ResourceKey, usize) -> CallResponse + Send + Sync>;

/// Fetcher answering from a closure of (key, call number)
struct Scripted {
    calls: AtomicUsize,
    delay: Duration,
    respond: Respond,
}

impl Scripted {
    fn new(respond: impl Fn(&ResourceKey, usize) -> CallResponse + Send + Sync + 'static) -> Arc<Self> {
        Self::slow(Duration::ZERO, respond)
    }

    fn slow(
        delay: Duration,
        respond: impl Fn(&ResourceKey, usize) -> CallResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            respond: Box::new(respond),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for Scripted {
    async fn fetch(&self, key: &ResourceKey) -> CallResponse {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        (self.respond)(key, n)
    }
}

fn counting() -> Arc<Scripted> {
    Scripted::new(|_, n| CallResponse::value(json!(n)))
}

/// Lets spawned fetches run
async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

fn watch(resource: &Resource) -> (Subscription, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = resource.subscribe(move |_| {
        let _ = tx.send(());
    });
    (subscription, rx)
}

fn ready(resource: &Resource) -> Option<Value> {
    match resource.read() {
        Read::Ready(value) => Some(value),
        _ => None,
    }
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn rpc_request(body: impl Into<Body>) -> Request<Body> {
    Request::post(RPC_PATH)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, "session=abc")
        .body(body.into())
        .unwrap()
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_identical_loads_fetch_once() {
    let fetcher = Scripted::slow(Duration::from_millis(50), |_, n| CallResponse::value(json!(n)));
    let cache = ResourceCache::new(fetcher.clone());

    let first = cache.get("fn_posts", vec![json!({"page": 1})]);
    let second = cache.get("fn_posts", vec![json!({"page": 1})]);
    let (a, b) = tokio::join!(first.load(), second.load());

    assert_eq!(a.unwrap(), json!(1));
    assert_eq!(b.unwrap(), json!(1));
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(cache.fetch_count(), 1);
}

#[tokio::test]
async fn test_different_args_are_different_resources() {
    let fetcher = counting();
    let cache = ResourceCache::new(fetcher.clone());

    cache.get("fn_post", vec![json!(1)]).load().await.unwrap();
    cache.get("fn_post", vec![json!(2)]).load().await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_watched_resource_refetches_on_invalidate() {
    let fetcher = counting();
    let cache = ResourceCache::new(fetcher.clone());
    let todos = cache.get("fn_todos", vec![json!("inbox")]);
    assert_eq!(todos.load().await.unwrap(), json!(1));

    let (_subscription, mut changes) = watch(&todos);
    assert_eq!(cache.invalidate(&Matcher::Prefix(vec![json!("fn_todos")])), 1);

    // stale value stays readable while the refetch runs
    assert_eq!(ready(&todos), Some(json!(1)));
    changes.recv().await.unwrap();
    assert_eq!(ready(&todos), Some(json!(2)));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test]
async fn test_unwatched_resource_refetches_on_next_read() {
    let fetcher = counting();
    let cache = ResourceCache::new(fetcher.clone());
    let todos = cache.get("fn_todos", vec![]);
    todos.load().await.unwrap();

    cache.invalidate(&Matcher::All);
    settle().await;
    assert_eq!(fetcher.calls(), 1);

    assert_eq!(ready(&todos), Some(json!(1)));
    settle().await;
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(ready(&todos), Some(json!(2)));
}

#[tokio::test]
async fn test_predicate_and_prefix_matchers() {
    let cache = ResourceCache::new(counting());
    let mut held = Vec::new();
    for (id, arg) in [("fn_post", 1), ("fn_post", 2), ("fn_user", 1)] {
        let resource = cache.get(id, vec![json!(arg)]);
        resource.load().await.unwrap();
        held.push(resource);
    }

    assert_eq!(cache.invalidate(&Matcher::Prefix(vec![json!("fn_post"), json!(2)])), 1);
    assert_eq!(cache.invalidate(&Matcher::function("fn_post")), 2);
    assert_eq!(
        cache.invalidate(&Matcher::predicate(|key| key.args() == [json!(1)])),
        2
    );
    assert_eq!(cache.invalidate(&Matcher::All), 3);
}

#[tokio::test]
async fn test_cache_does_not_grow_with_dropped_resources() {
    let cache = ResourceCache::new(counting());
    for page in 0..50 {
        cache.get("fn_feed", vec![json!(page)]).load().await.unwrap();
    }
    assert_eq!(cache.len(), 50);

    assert_eq!(cache.invalidate(&Matcher::function("fn_feed")), 50);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_invalidation_during_fetch_is_not_lost() {
    let fetcher = Scripted::slow(Duration::from_millis(10), |_, n| CallResponse::value(json!(n)));
    let cache = ResourceCache::new(fetcher.clone());
    let resource = cache.get("fn_feed", vec![]);
    let (_subscription, mut changes) = watch(&resource);

    cache.invalidate(&Matcher::All);
    changes.recv().await.unwrap();
    assert_eq!(ready(&resource), Some(json!(1)));

    changes.recv().await.unwrap();
    assert_eq!(ready(&resource), Some(json!(2)));
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_expiration_boundary() {
    let fetcher = Scripted::new(|_, n| CallResponse {
        expire: Some(5.0),
        ..CallResponse::value(json!(n))
    });
    let cache = ResourceCache::new(fetcher.clone());
    let clock = cache.get("fn_clock", vec![]);
    assert_eq!(clock.load().await.unwrap(), json!(1));
    let (_subscription, mut changes) = watch(&clock);

    tokio::time::advance(Duration::from_millis(4_999)).await;
    assert_eq!(ready(&clock), Some(json!(1)));
    settle().await;
    assert_eq!(fetcher.calls(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_eq!(ready(&clock), Some(json!(1)));
    changes.recv().await.unwrap();
    assert_eq!(fetcher.calls(), 2);
    assert_eq!(ready(&clock), Some(json!(2)));
}

#[tokio::test]
async fn test_zero_expire_is_due_on_next_read() {
    let fetcher = Scripted::new(|_, n| CallResponse {
        expire: Some(0.0),
        ..CallResponse::value(json!(n))
    });
    let cache = ResourceCache::new(fetcher.clone());
    let resource = cache.get("fn_now", vec![]);
    resource.load().await.unwrap();

    assert_eq!(ready(&resource), Some(json!(1)));
    settle().await;
    assert_eq!(fetcher.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_absent_expire_never_due() {
    let fetcher = counting();
    let cache = ResourceCache::new(fetcher.clone());
    let resource = cache.get("fn_config", vec![]);
    resource.load().await.unwrap();

    tokio::time::advance(Duration::from_secs(24 * 60 * 60)).await;
    assert_eq!(ready(&resource), Some(json!(1)));
    settle().await;
    assert_eq!(fetcher.calls(), 1);
}

#[tokio::test]
async fn test_error_response_fails_reads() {
    let fetcher = Scripted::new(|_, _| {
        CallResponse::error(tessera_runtime::ServerError::operational("GONE", "post removed").to_payload(true))
    });
    let cache = ResourceCache::new(fetcher);
    let err = cache.get("fn_post", vec![json!(9)]).load().await.unwrap_err();
    assert_eq!(err.code(), Some("GONE"));
}

// ============================================================================
// Server functions through the cache
// ============================================================================

#[tokio::test]
async fn test_mutation_side_effects() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut table = FunctionTable::new();

    let todos_counter = counter.clone();
    let todos_id = table.register_export("lib/todos.js", "listTodos", move |_ctx: CallContext, _args: Vec<Value>| {
        let n = todos_counter.fetch_add(1, Ordering::SeqCst) + 1;
        async move { Ok(json!(n)) }
    });
    let invalidates = todos_id.clone();
    let add_id = table.register_export("lib/todos.js", "addTodo", move |ctx: CallContext, args: Vec<Value>| {
        let prefix = vec![json!(invalidates.clone())];
        async move {
            ctx.invalidate(prefix);
            ctx.set_cookie("flash", "added");
            ctx.redirect(Redirect::push("/todos"));
            Ok(args[0].clone())
        }
    });

    let cache = ResourceCache::new(Arc::new(InProcessFetcher::new(Arc::new(table))));
    let todos = cache.get(&todos_id, vec![]);
    assert_eq!(todos.load().await.unwrap(), json!(1));
    let (_subscription, mut changes) = watch(&todos);
    let mut cookies = cache.subscribe_cookies();

    let added = cache.get(&add_id, vec![json!("milk")]).load().await.unwrap();
    assert_eq!(added, json!("milk"));
    assert_eq!(cookies.recv().await.unwrap(), vec!["flash".to_string()]);

    changes.recv().await.unwrap();
    assert_eq!(ready(&todos), Some(json!(2)));

    let history = Arc::new(MemoryHistory::new("/todos/new"));
    let navigator = Navigator::new(history.clone(), NavigationBus::new());
    let redirect = cache.take_redirect().unwrap();
    navigator.apply_redirect(&redirect);
    assert_eq!(navigator.current_url(), "/todos");
    assert_eq!(cache.take_redirect(), None);
}

// ============================================================================
// RPC endpoint
// ============================================================================

fn rpc_table() -> (FunctionTable, String) {
    let mut table = FunctionTable::new();
    let id = table.register_export("lib/session.js", "whoami", |ctx: CallContext, args: Vec<Value>| async move {
        ctx.set_cookie("seen", "yes");
        Ok(json!({ "session": ctx.cookie("session"), "args": args }))
    });
    (table, id)
}

#[tokio::test]
async fn test_rpc_call() {
    let (table, id) = rpc_table();
    let app = rpc_router(Arc::new(table), RuntimeOptions::default());

    let body = json!({ "id": id, "args": [1, "two"] }).to_string();
    let response = app.oneshot(rpc_request(body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::SET_COOKIE],
        "seen=yes; Path=/; HttpOnly; SameSite=Lax"
    );
    let json = body_json(response).await;
    assert_eq!(json["value"], json!({ "session": "abc", "args": [1, "two"] }));
    assert_eq!(json["cookies"], json!(["seen"]));
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn test_rpc_body_never_carries_cookie_values() {
    let mut table = FunctionTable::new();
    let id = table.register_export("lib/auth.js", "login", |ctx: CallContext, _args: Vec<Value>| async move {
        ctx.set_cookie("session", "s3cr3t-token");
        Ok(Value::Null)
    });
    let app = rpc_router(Arc::new(table), RuntimeOptions::default());

    let response = app
        .oneshot(rpc_request(json!({ "id": id }).to_string()))
        .await
        .unwrap();
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("session=s3cr3t-token;"));
    assert!(set_cookie.contains("HttpOnly"));

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(!text.contains("s3cr3t-token"), "cookie value in rpc body: {}", text);
    let json: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(json, json!({ "value": null, "cookies": ["session"] }));
}

#[tokio::test]
async fn test_rpc_unknown_id() {
    let (table, _) = rpc_table();
    let app = rpc_router(Arc::new(table), RuntimeOptions::default());

    let response = app
        .oneshot(rpc_request(json!({ "id": "fn_nope" }).to_string()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"]["name"], "NotFound");
}

#[tokio::test]
async fn test_rpc_malformed_body() {
    let (table, _) = rpc_table();
    let app = rpc_router(Arc::new(table), RuntimeOptions::default());

    let response = app.oneshot(rpc_request("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"]["name"], "BadRequest");
}

#[tokio::test]
async fn test_rpc_fetcher_round_trip() {
    let (table, id) = rpc_table();
    let app = rpc_router(Arc::new(table), RuntimeOptions::default());
    let fetcher = RpcFetcher::new(app).with_cookie_header("session=xyz");
    let cache = ResourceCache::new(Arc::new(fetcher));

    let value = cache.get(&id, vec![]).load().await.unwrap();
    assert_eq!(value, json!({ "session": "xyz", "args": [] }));
}

// ============================================================================
// Server render
// ============================================================================

#[tokio::test]
async fn test_server_render_injects_call_results() {
    let (table, id) = rpc_table();
    let scope = RequestScope::new();
    let fetcher = InProcessFetcher::new(Arc::new(table)).with_scope(scope.clone());
    let cache = ResourceCache::new(Arc::new(fetcher));
    cache.get(&id, vec![]).load().await.unwrap();

    let chunks: Vec<Result<&'static str, std::convert::Infallible>> = vec![
        Ok("<html><head><title>t</title></head>"),
        Ok("<body><main>hi</main>"),
        Ok("</body></html>"),
    ];
    let render = futures::stream::iter(
        chunks
            .into_iter()
            .map(|chunk| chunk.map(|s| bytes::Bytes::from_static(s.as_bytes())))
            .collect::<Vec<_>>(),
    );
    let response = ssr::respond(render, scope, false).await;
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    let head_end = html.find("</head>").unwrap();
    let cookie = html.find("\"setCookie\"").unwrap();
    let value = html.find("\"setResourceValue\"").unwrap();
    assert!(head_end < cookie);
    assert!(cookie < value);
    assert!(html.ends_with("</body></html>"));
}
