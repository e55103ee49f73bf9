// File: src/scope.rs
// Purpose: Per-request queue of out-of-band fragments for the HTML stream

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{json, Value};

use crate::cookie::SetCookie;
use crate::error::ErrorPayload;
use crate::protocol::{CallResponse, Redirect, ResourceKey};

/// State change the client must apply, delivered inside the HTML stream
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    SetCookie(SetCookie),
    SetResourceValue {
        id: String,
        args: Vec<Value>,
        value: Value,
    },
    SetResourceError {
        id: String,
        args: Vec<Value>,
        error: ErrorPayload,
    },
    Redirect(Redirect),
}

impl Fragment {
    /// Dispatcher action name
    pub fn action(&self) -> &'static str {
        match self {
            Fragment::SetCookie(_) => "setCookie",
            Fragment::SetResourceValue { .. } => "setResourceValue",
            Fragment::SetResourceError { .. } => "setResourceError",
            Fragment::Redirect(_) => "redirect",
        }
    }

    /// Arguments passed to the dispatcher
    pub fn args(&self) -> Value {
        match self {
            Fragment::SetCookie(cookie) => json!([cookie]),
            Fragment::SetResourceValue { id, args, value } => json!([id, args, value]),
            Fragment::SetResourceError { id, args, error } => json!([id, args, error]),
            Fragment::Redirect(redirect) => json!([redirect]),
        }
    }

    pub fn is_resource(&self) -> bool {
        matches!(
            self,
            Fragment::SetResourceValue { .. } | Fragment::SetResourceError { .. }
        )
    }
}

#[derive(Debug, Default)]
struct ScopeState {
    queue: VecDeque<Fragment>,
    redirect: Option<Redirect>,
}

/// Fragments produced while one request renders
///
/// Clones share the same queue. The first redirect pushed is remembered so
/// the response layer can still turn it into an HTTP redirect.
#[derive(Debug, Clone, Default)]
pub struct RequestScope {
    state: Arc<Mutex<ScopeState>>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, fragment: Fragment) {
        let mut state = self.state();
        if let Fragment::Redirect(redirect) = &fragment {
            if state.redirect.is_none() {
                state.redirect = Some(redirect.clone());
            }
        }
        state.queue.push_back(fragment);
    }

    /// Queues everything a finished call produced
    ///
    /// Cookie fragments always precede the call's value so the client has
    /// the cookies before anything rendered from that value runs.
    pub fn record_call(&self, key: &ResourceKey, cookies: &[SetCookie], response: &CallResponse) {
        for cookie in cookies {
            self.push(Fragment::SetCookie(cookie.clone()));
        }
        let id = key.function_id().to_string();
        let args = key.args().to_vec();
        match &response.error {
            Some(error) => self.push(Fragment::SetResourceError {
                id,
                args,
                error: error.clone(),
            }),
            None => self.push(Fragment::SetResourceValue {
                id,
                args,
                value: response.value.clone(),
            }),
        }
        if let Some(redirect) = &response.redirect {
            self.push(Fragment::Redirect(redirect.clone()));
        }
    }

    /// Takes every queued fragment
    pub fn drain(&self) -> Vec<Fragment> {
        self.state().queue.drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.state().queue.is_empty()
    }

    /// First redirect recorded during this request
    pub fn redirect(&self) -> Option<Redirect> {
        self.state().redirect.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cookie::CookieDefaults;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cookies_precede_value() {
        let scope = RequestScope::new();
        let key = ResourceKey::new("fn_login", vec![json!("ada")]);
        let cookies = vec![SetCookie::new("session", "1", &CookieDefaults::default())];
        let response = CallResponse {
            value: json!(true),
            cookies: vec!["session".to_string()],
            redirect: Some(Redirect::push("/home")),
            ..CallResponse::default()
        };
        scope.record_call(&key, &cookies, &response);

        let actions: Vec<&str> = scope.drain().iter().map(Fragment::action).collect();
        assert_eq!(actions, vec!["setCookie", "setResourceValue", "redirect"]);
        assert!(scope.is_empty());
        assert_eq!(scope.redirect(), Some(Redirect::push("/home")));
    }

    #[test]
    fn test_first_redirect_wins() {
        let scope = RequestScope::new();
        scope.push(Fragment::Redirect(Redirect::push("/a")));
        scope.push(Fragment::Redirect(Redirect::replace("/b")));
        assert_eq!(scope.redirect().map(|r| r.url), Some("/a".to_string()));
    }
}
