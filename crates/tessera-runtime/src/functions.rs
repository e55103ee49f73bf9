// File: src/functions.rs
// Purpose: Server function table and per-call context

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tessera_transform::{function_id, DEFAULT_ID_PREFIX};
use tracing::debug;

use crate::cookie::{CookieDefaults, SetCookie};
use crate::error::ServerError;
use crate::protocol::{CallResponse, Redirect};

/// Boxed future returned by a registered server function
pub type ServerFuture = BoxFuture<'static, Result<Value, ServerError>>;

type Handler = Arc<dyn Fn(CallContext, Vec<Value>) -> ServerFuture + Send + Sync>;

// ============================================================================
// Call Context
// ============================================================================

#[derive(Debug, Default)]
struct Effects {
    cookies: Vec<SetCookie>,
    invalidations: Vec<Vec<Value>>,
    expire: Option<f64>,
    redirect: Option<Redirect>,
}

/// What a running server function can see and change
///
/// Cheap to clone; every clone records into the same call.
#[derive(Debug, Clone)]
pub struct CallContext {
    request_cookies: Arc<BTreeMap<String, String>>,
    defaults: Arc<CookieDefaults>,
    effects: Arc<Mutex<Effects>>,
}

impl CallContext {
    pub fn new(request_cookies: BTreeMap<String, String>, defaults: CookieDefaults) -> Self {
        Self {
            request_cookies: Arc::new(request_cookies),
            defaults: Arc::new(defaults),
            effects: Arc::new(Mutex::new(Effects::default())),
        }
    }

    fn effects(&self) -> MutexGuard<'_, Effects> {
        self.effects.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current value of a cookie, including changes made during this call
    pub fn cookie(&self, name: &str) -> Option<String> {
        if let Some(set) = self.effects().cookies.iter().rev().find(|c| c.name == name) {
            return set.value.clone();
        }
        self.request_cookies.get(name).cloned()
    }

    /// Sets a cookie with the configured defaults
    pub fn set_cookie(&self, name: impl Into<String>, value: impl Into<String>) {
        let cookie = SetCookie::new(name, value, &self.defaults);
        self.set_cookie_with(cookie);
    }

    pub fn set_cookie_with(&self, cookie: SetCookie) {
        let mut effects = self.effects();
        effects.cookies.retain(|c| c.name != cookie.name);
        effects.cookies.push(cookie);
    }

    pub fn delete_cookie(&self, name: impl Into<String>) {
        let cookie = SetCookie::removal(name, &self.defaults);
        self.set_cookie_with(cookie);
    }

    /// Asks the caller to invalidate every resource under `prefix`
    ///
    /// The prefix is positional over `[function_id, ...args]`.
    pub fn invalidate(&self, prefix: Vec<Value>) {
        self.effects().invalidations.push(prefix);
    }

    /// Marks the returned value due for revalidation after `seconds`
    pub fn expire(&self, seconds: f64) {
        self.effects().expire = Some(seconds.max(0.0));
    }

    pub fn redirect(&self, redirect: Redirect) {
        self.effects().redirect = Some(redirect);
    }

    pub fn cookies_set(&self) -> Vec<SetCookie> {
        self.effects().cookies.clone()
    }

    /// Packs a call outcome together with the recorded side effects
    ///
    /// The response names the changed cookies only; the cookies themselves
    /// stay readable through [`cookies_set`](Self::cookies_set) for the
    /// transport to deliver.
    pub fn into_response(self, result: Result<Value, ServerError>, production: bool) -> CallResponse {
        let mut effects = self.effects();
        let (value, error) = match result {
            Ok(value) => (value, None),
            Err(err) => (Value::Null, Some(err.to_payload(production))),
        };
        let invalidations = std::mem::take(&mut effects.invalidations);
        CallResponse {
            value,
            cookies: effects.cookies.iter().map(|c| c.name.clone()).collect(),
            expire: effects.expire.take(),
            invalidations: (!invalidations.is_empty()).then_some(invalidations),
            redirect: effects.redirect.take(),
            error,
        }
    }
}

// ============================================================================
// Function Table
// ============================================================================

/// Server functions callable by id
///
/// Ids registered through [`register_export`](Self::register_export) are
/// derived exactly like the build's registry transform derives them, so a
/// client holding an id from the compiled bundle reaches the right function.
#[derive(Clone)]
pub struct FunctionTable {
    id_prefix: String,
    functions: HashMap<String, Handler>,
}

impl Default for FunctionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FunctionTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.functions.keys().collect();
        ids.sort();
        f.debug_struct("FunctionTable")
            .field("id_prefix", &self.id_prefix)
            .field("functions", &ids)
            .finish()
    }
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::with_id_prefix(DEFAULT_ID_PREFIX)
    }

    pub fn with_id_prefix(prefix: impl Into<String>) -> Self {
        Self {
            id_prefix: prefix.into(),
            functions: HashMap::new(),
        }
    }

    /// Registers a function under an explicit id
    pub fn register<F, Fut>(&mut self, id: impl Into<String>, f: F)
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServerError>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |ctx, args| f(ctx, args).boxed());
        self.functions.insert(id.into(), handler);
    }

    /// Registers an export of a project file and returns its id
    ///
    /// ```
    /// use serde_json::json;
    /// use tessera_runtime::FunctionTable;
    ///
    /// let mut table = FunctionTable::new();
    /// let id = table.register_export("lib/posts.js", "getPosts", |_ctx, _args| async {
    ///     Ok(json!([]))
    /// });
    /// assert_eq!(id, tessera_transform::function_id("fn_", "lib/posts.js", "getPosts"));
    /// assert!(table.contains(&id));
    /// ```
    pub fn register_export<F, Fut>(&mut self, relative_path: &str, export_name: &str, f: F) -> String
    where
        F: Fn(CallContext, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ServerError>> + Send + 'static,
    {
        let id = function_id(&self.id_prefix, relative_path, export_name);
        debug!(function = %id, file = relative_path, export = export_name, "registered server function");
        self.register(id.clone(), f);
        id
    }

    pub fn contains(&self, id: &str) -> bool {
        self.functions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Runs a function; a panic inside it becomes [`ServerError::Unexpected`]
    pub async fn invoke(&self, id: &str, args: Vec<Value>, ctx: CallContext) -> Result<Value, ServerError> {
        let handler = self
            .functions
            .get(id)
            .cloned()
            .ok_or_else(|| ServerError::NotFound(id.to_string()))?;

        match AssertUnwindSafe(handler(ctx, args)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "server function panicked".to_string());
                Err(ServerError::unexpected(message))
            }
        }
    }

    /// Runs a function and packs the outcome for the wire
    ///
    /// Never fails; errors end up in the response's `error` field and are
    /// logged according to their kind.
    pub async fn call(&self, id: &str, args: Vec<Value>, ctx: CallContext, production: bool) -> CallResponse {
        let result = self.invoke(id, args, ctx.clone()).await;
        if let Err(err) = &result {
            err.log(id);
        }
        ctx.into_response(result, production)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn context() -> CallContext {
        let mut cookies = BTreeMap::new();
        cookies.insert("session".to_string(), "abc".to_string());
        CallContext::new(cookies, CookieDefaults::default())
    }

    #[tokio::test]
    async fn test_call_collects_effects() {
        let mut table = FunctionTable::new();
        table.register("fn_login", |ctx: CallContext, args: Vec<Value>| async move {
            ctx.set_cookie("session", "xyz");
            ctx.invalidate(vec![json!("fn_user")]);
            ctx.expire(30.0);
            ctx.redirect(Redirect::push("/account"));
            Ok(json!({ "user": args[0] }))
        });

        let ctx = context();
        let response = table.call("fn_login", vec![json!("ada")], ctx.clone(), false).await;
        assert_eq!(response.value, json!({"user": "ada"}));
        assert_eq!(response.cookies, vec!["session".to_string()]);
        assert_eq!(ctx.cookies_set()[0].value.as_deref(), Some("xyz"));
        assert_eq!(response.invalidations, Some(vec![vec![json!("fn_user")]]));
        assert_eq!(response.expire, Some(30.0));
        assert_eq!(response.redirect, Some(Redirect::push("/account")));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn test_cookie_reads_see_own_writes() {
        let ctx = context();
        assert_eq!(ctx.cookie("session").as_deref(), Some("abc"));
        ctx.set_cookie("session", "new");
        assert_eq!(ctx.cookie("session").as_deref(), Some("new"));
        ctx.delete_cookie("session");
        assert_eq!(ctx.cookie("session"), None);
        assert_eq!(ctx.cookies_set().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let table = FunctionTable::new();
        let response = table.call("fn_missing", vec![], context(), true).await;
        assert_eq!(response.error.map(|e| e.name).as_deref(), Some("NotFound"));
    }

    #[tokio::test]
    async fn test_panic_becomes_unexpected_error() {
        let mut table = FunctionTable::new();
        table.register("fn_boom", |_ctx: CallContext, _args: Vec<Value>| async move {
            if true {
                panic!("database exploded");
            }
            Ok(Value::Null)
        });

        let response = table.call("fn_boom", vec![], context(), true).await;
        let error = response.error.expect("error payload");
        assert_eq!(error.name, "UnexpectedError");
        assert!(!error.message.contains("database exploded"));
        assert_eq!(error.correlation_id.map(|id| id.len()), Some(8));
    }

    #[tokio::test]
    async fn test_operational_error_keeps_code() {
        let mut table = FunctionTable::new();
        table.register("fn_post", |_ctx: CallContext, _args: Vec<Value>| async move {
            Err::<Value, _>(ServerError::operational("NOT_FOUND", "no such post"))
        });

        let response = table.call("fn_post", vec![json!(7)], context(), true).await;
        let error = response.error.expect("error payload");
        assert_eq!(error.code.as_deref(), Some("NOT_FOUND"));
        assert_eq!(error.message, "no such post");
    }
}
