// File: src/navigation.rs
// Purpose: Client-side navigation events over a history adapter

use std::sync::{Arc, Mutex, MutexGuard};

use tessera_router::{Params, Router};
use tokio::sync::broadcast;
use tracing::debug;

use crate::protocol::{Redirect, RedirectMode};

const BUS_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationEvent {
    Push { url: String },
    Replace { url: String },
    /// The platform moved back or forward
    Pop { url: String },
}

impl NavigationEvent {
    pub fn url(&self) -> &str {
        match self {
            NavigationEvent::Push { url }
            | NavigationEvent::Replace { url }
            | NavigationEvent::Pop { url } => url,
        }
    }
}

/// Broadcasts navigation events to every subscriber
#[derive(Debug, Clone)]
pub struct NavigationBus {
    sender: broadcast::Sender<NavigationEvent>,
}

impl Default for NavigationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl NavigationBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavigationEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event; returns how many subscribers received it
    pub fn publish(&self, event: NavigationEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }
}

/// Platform history API
pub trait History: Send + Sync {
    fn push(&self, url: &str);
    fn replace(&self, url: &str);
    fn current(&self) -> String;
}

/// History kept in memory, for tests and non-browser hosts
#[derive(Debug)]
pub struct MemoryHistory {
    entries: Mutex<Vec<String>>,
}

impl MemoryHistory {
    pub fn new(initial: impl Into<String>) -> Self {
        Self {
            entries: Mutex::new(vec![initial.into()]),
        }
    }

    fn entries(&self) -> MutexGuard<'_, Vec<String>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Steps back one entry and returns the new current url
    pub fn back(&self) -> Option<String> {
        let mut entries = self.entries();
        if entries.len() < 2 {
            return None;
        }
        entries.pop();
        entries.last().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

impl History for MemoryHistory {
    fn push(&self, url: &str) {
        self.entries().push(url.to_string());
    }

    fn replace(&self, url: &str) {
        let mut entries = self.entries();
        match entries.last_mut() {
            Some(last) => *last = url.to_string(),
            None => entries.push(url.to_string()),
        }
    }

    fn current(&self) -> String {
        self.entries().last().cloned().unwrap_or_else(|| "/".to_string())
    }
}

/// Applies navigations through a [`History`] and announces them
pub struct Navigator {
    history: Arc<dyn History>,
    bus: NavigationBus,
    router: Option<Router>,
}

impl Navigator {
    pub fn new(history: Arc<dyn History>, bus: NavigationBus) -> Self {
        Self {
            history,
            bus,
            router: None,
        }
    }

    /// Resolves urls against this route table in [`current_route`](Self::current_route)
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn bus(&self) -> &NavigationBus {
        &self.bus
    }

    pub fn push(&self, url: &str) {
        debug!(url, "navigate");
        self.history.push(url);
        self.bus.publish(NavigationEvent::Push { url: url.to_string() });
    }

    pub fn replace(&self, url: &str) {
        debug!(url, "navigate (replace)");
        self.history.replace(url);
        self.bus.publish(NavigationEvent::Replace { url: url.to_string() });
    }

    /// Announces a back/forward move the platform already performed
    pub fn pop(&self, url: &str) {
        self.bus.publish(NavigationEvent::Pop { url: url.to_string() });
    }

    /// Follows a redirect returned by a server function
    pub fn apply_redirect(&self, redirect: &Redirect) {
        match redirect.mode {
            RedirectMode::Push => self.push(&redirect.url),
            RedirectMode::Replace => self.replace(&redirect.url),
        }
    }

    pub fn current_url(&self) -> String {
        self.history.current()
    }

    /// Route id and parameters for the current url
    pub fn current_route(&self) -> Option<(String, Params)> {
        let router = self.router.as_ref()?;
        let url = self.history.current();
        router
            .resolve(&url)
            .map(|resolved| (resolved.route.id.clone(), resolved.params))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_redirect_maps_onto_history() {
        let history = Arc::new(MemoryHistory::new("/"));
        let navigator = Navigator::new(history.clone(), NavigationBus::new());
        let mut events = navigator.bus().subscribe();

        navigator.apply_redirect(&Redirect::push("/login"));
        navigator.apply_redirect(&Redirect::replace("/login?next=%2F"));

        assert_eq!(history.len(), 2);
        assert_eq!(navigator.current_url(), "/login?next=%2F");
        assert_eq!(events.try_recv().unwrap(), NavigationEvent::Push { url: "/login".into() });
        assert_eq!(
            events.try_recv().unwrap(),
            NavigationEvent::Replace { url: "/login?next=%2F".into() }
        );
    }

    #[test]
    fn test_pop_publishes_without_touching_history() {
        let history = Arc::new(MemoryHistory::new("/"));
        let navigator = Navigator::new(history.clone(), NavigationBus::new());
        navigator.push("/a");
        let mut events = navigator.bus().subscribe();

        let url = history.back().unwrap();
        navigator.pop(&url);
        assert_eq!(events.try_recv().unwrap().url(), "/");
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_publish_without_subscribers() {
        assert_eq!(NavigationBus::new().publish(NavigationEvent::Pop { url: "/".into() }), 0);
    }
}
