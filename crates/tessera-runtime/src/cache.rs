// File: src/cache.rs
// Purpose: Suspense-compatible resource cache with lazy revalidation

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::ServerError;
use crate::fetcher::Fetcher;
use crate::protocol::{CallResponse, Redirect, ResourceKey};
use crate::scope::Fragment;

type FetchTask = Shared<BoxFuture<'static, ()>>;
type Watcher = Arc<dyn Fn(&ResourceKey) + Send + Sync>;

const EVENT_CAPACITY: usize = 64;

// ============================================================================
// Public types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Pending,
    Ready,
    Error,
}

/// Outcome of a synchronous read
#[derive(Debug)]
pub enum Read {
    Ready(Value),
    Failed(ServerError),
    /// No value yet; await the suspense, then read again
    Suspend(Suspense),
}

/// Resolves when the in-flight fetch it was taken from settles
///
/// Every reader suspended on the same resource shares one fetch.
#[must_use = "a suspense does nothing unless awaited"]
pub struct Suspense {
    task: FetchTask,
}

impl fmt::Debug for Suspense {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Suspense").finish_non_exhaustive()
    }
}

impl Future for Suspense {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.task.poll_unpin(cx)
    }
}

/// Selects resources to invalidate
#[derive(Clone)]
pub enum Matcher {
    All,
    Predicate(Arc<dyn Fn(&ResourceKey) -> bool + Send + Sync>),
    /// Positional prefix over `[function_id, ...args]`
    Prefix(Vec<Value>),
}

impl Matcher {
    pub fn predicate(f: impl Fn(&ResourceKey) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Predicate(Arc::new(f))
    }

    /// Every resource of one function
    pub fn function(function_id: &str) -> Self {
        Matcher::Prefix(vec![Value::String(function_id.to_string())])
    }

    pub fn matches(&self, key: &ResourceKey) -> bool {
        match self {
            Matcher::All => true,
            Matcher::Predicate(f) => f(key),
            Matcher::Prefix(prefix) => key.matches_prefix(prefix),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::All => write!(f, "All"),
            Matcher::Predicate(_) => write!(f, "Predicate(..)"),
            Matcher::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
        }
    }
}

// ============================================================================
// Entries
// ============================================================================

#[derive(Debug)]
enum State {
    Pending,
    Ready(Value),
    Failed(ServerError),
}

struct Slot {
    state: State,
    dirty: bool,
    expires_at: Option<Instant>,
    /// Bumped by every invalidation; a fetch started before the latest
    /// invalidation leaves the slot dirty when it lands
    generation: u64,
    in_flight: Option<FetchTask>,
    /// A reader has seen a settled value
    read: bool,
}

impl Slot {
    fn is_due(&self, now: Instant) -> bool {
        self.dirty || self.is_expired(now)
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| now >= at)
    }

    /// Stores a value from outside the fetch path
    ///
    /// Clears any expiry from an earlier response and supersedes a fetch
    /// already in flight.
    fn replace(&mut self, state: State) {
        self.state = state;
        self.dirty = false;
        self.expires_at = None;
        self.generation += 1;
    }
}

struct Entry {
    key: ResourceKey,
    slot: Mutex<Slot>,
    watchers: Mutex<Vec<(u64, Watcher)>>,
}

impl Entry {
    fn new(key: ResourceKey) -> Self {
        Self {
            key,
            slot: Mutex::new(Slot {
                state: State::Pending,
                dirty: false,
                expires_at: None,
                generation: 0,
                in_flight: None,
                read: false,
            }),
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn watchers(&self) -> MutexGuard<'_, Vec<(u64, Watcher)>> {
        self.watchers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_watched(&self) -> bool {
        !self.watchers().is_empty()
    }

    /// Calls every watcher once, outside any lock
    fn notify(&self) {
        let watchers: Vec<Watcher> = self.watchers().iter().map(|(_, w)| w.clone()).collect();
        for watcher in watchers {
            watcher(&self.key);
        }
    }
}

// ============================================================================
// Cache
// ============================================================================

struct CacheShared {
    fetcher: Arc<dyn Fetcher>,
    entries: Mutex<HashMap<ResourceKey, Arc<Entry>>>,
    next_watcher: AtomicU64,
    fetches: AtomicUsize,
    cookies: broadcast::Sender<Vec<String>>,
    redirects: broadcast::Sender<Redirect>,
    last_redirect: Mutex<Option<Redirect>>,
}

impl CacheShared {
    fn entries(&self) -> MutexGuard<'_, HashMap<ResourceKey, Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn entry(&self, key: ResourceKey) -> Arc<Entry> {
        self.entries()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Entry::new(key)))
            .clone()
    }

    fn lookup(&self, key: &ResourceKey) -> Option<Arc<Entry>> {
        self.entries().get(key).cloned()
    }

    /// Drops entries nothing refers to any more
    ///
    /// An entry goes only when the map holds its last reference (no handle,
    /// no fetch in flight), nobody watches it, a reader has already seen
    /// its value, and `stale` selects it.
    fn evict(&self, stale: impl Fn(&ResourceKey, &Slot) -> bool) -> usize {
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|key, entry| {
            if Arc::strong_count(entry) > 1 || entry.is_watched() {
                return true;
            }
            let slot = entry.slot();
            !(slot.read && stale(key, &slot))
        });
        let evicted = before - entries.len();
        if evicted > 0 {
            trace!(evicted, remaining = entries.len(), "evicted idle resources");
        }
        evicted
    }

    /// Returns the in-flight fetch for an entry, starting one if needed
    ///
    /// The fetch is spawned onto the current tokio runtime when there is
    /// one, so background revalidation progresses without a reader.
    fn fetch(self: &Arc<Self>, entry: &Arc<Entry>, slot: &mut Slot) -> FetchTask {
        if let Some(task) = &slot.in_flight {
            return task.clone();
        }

        let started = slot.generation;
        let shared = self.clone();
        let target = entry.clone();
        let task = async move {
            let response = shared.fetcher.fetch(&target.key).await;
            shared.settle(&target, started, response);
        }
        .boxed()
        .shared();

        slot.in_flight = Some(task.clone());
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!(resource = %entry.key, "fetching resource");

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(task.clone());
        }
        task
    }

    /// Applies a fetch result and its side effects
    fn settle(self: &Arc<Self>, entry: &Arc<Entry>, started: u64, response: CallResponse) {
        let CallResponse {
            value,
            cookies,
            expire,
            invalidations,
            redirect,
            error,
        } = response;

        let still_dirty = {
            let mut slot = entry.slot();
            slot.in_flight = None;
            slot.state = match error {
                Some(payload) => State::Failed(ServerError::from(payload)),
                None => State::Ready(value),
            };
            slot.expires_at = expire
                .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
                .map(|seconds| Instant::now() + Duration::from_secs_f64(seconds));
            slot.dirty = slot.generation != started;
            slot.dirty
        };
        trace!(resource = %entry.key, "resource settled");
        entry.notify();

        if !cookies.is_empty() {
            let _ = self.cookies.send(cookies);
        }
        if let Some(redirect) = redirect {
            self.record_redirect(redirect);
        }
        for prefix in invalidations.unwrap_or_default() {
            self.invalidate(&Matcher::Prefix(prefix), false);
        }

        if still_dirty && entry.is_watched() {
            let mut slot = entry.slot();
            self.fetch(entry, &mut slot);
        }
    }

    fn record_redirect(&self, redirect: Redirect) {
        debug!(url = %redirect.url, "redirect requested");
        *self.last_redirect.lock().unwrap_or_else(|p| p.into_inner()) = Some(redirect.clone());
        let _ = self.redirects.send(redirect);
    }

    fn invalidate(self: &Arc<Self>, matcher: &Matcher, discard: bool) -> usize {
        let evicted = self.evict(|key, _| matcher.matches(key));
        let targets: Vec<Arc<Entry>> = self
            .entries()
            .values()
            .filter(|entry| matcher.matches(&entry.key))
            .cloned()
            .collect();

        for entry in &targets {
            let watched = entry.is_watched();
            {
                let mut slot = entry.slot();
                slot.generation += 1;
                slot.dirty = true;
                if discard {
                    slot.state = State::Pending;
                }
                if watched {
                    self.fetch(entry, &mut slot);
                }
            }
            if discard {
                entry.notify();
            }
        }

        if !targets.is_empty() {
            debug!(count = targets.len(), discard, "invalidated resources");
        }
        evicted + targets.len()
    }
}

/// Cache of server function results keyed by function id and arguments
///
/// Cheap to clone; clones share entries.
#[derive(Clone)]
pub struct ResourceCache {
    shared: Arc<CacheShared>,
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceCache")
            .field("entries", &self.len())
            .field("fetches", &self.fetch_count())
            .finish()
    }
}

impl ResourceCache {
    pub fn new(fetcher: Arc<dyn Fetcher>) -> Self {
        let (cookies, _) = broadcast::channel(EVENT_CAPACITY);
        let (redirects, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            shared: Arc::new(CacheShared {
                fetcher,
                entries: Mutex::new(HashMap::new()),
                next_watcher: AtomicU64::new(0),
                fetches: AtomicUsize::new(0),
                cookies,
                redirects,
                last_redirect: Mutex::new(None),
            }),
        }
    }

    /// Returns the resource for a call, fetching it if nothing is cached
    ///
    /// Calling this twice with equal arguments yields handles to the same
    /// resource and never starts a second fetch.
    pub fn get(&self, function_id: &str, args: Vec<Value>) -> Resource {
        let key = ResourceKey::new(function_id, args);
        if self.shared.lookup(&key).is_none() {
            self.evict_expired();
        }
        let entry = self.shared.entry(key);
        {
            let mut slot = entry.slot();
            if matches!(slot.state, State::Pending) {
                self.shared.fetch(&entry, &mut slot);
            }
        }
        Resource {
            entry,
            shared: self.shared.clone(),
        }
    }

    /// Replaces a value without fetching
    ///
    /// The new value has no expiry.
    pub fn set(&self, function_id: &str, args: Vec<Value>, value: Value) {
        let entry = self.shared.entry(ResourceKey::new(function_id, args));
        entry.slot().replace(State::Ready(value));
        entry.notify();
    }

    /// Mutates a copy of the current value and stores it
    ///
    /// Returns false when the resource has no value to edit.
    pub fn edit(&self, function_id: &str, args: Vec<Value>, mutator: impl FnOnce(&mut Value)) -> bool {
        let Some(entry) = self.shared.lookup(&ResourceKey::new(function_id, args)) else {
            return false;
        };
        {
            let mut slot = entry.slot();
            let State::Ready(current) = &slot.state else {
                return false;
            };
            let mut next = current.clone();
            mutator(&mut next);
            slot.state = State::Ready(next);
        }
        entry.notify();
        true
    }

    /// Marks matching resources dirty; stale values stay readable
    ///
    /// Watched resources refetch right away, the rest on their next read.
    pub fn invalidate(&self, matcher: &Matcher) -> usize {
        self.shared.invalidate(matcher, false)
    }

    /// Like [`invalidate`](Self::invalidate), but drops the stale values
    /// so reads suspend until the replacement lands
    pub fn invalidate_discard(&self, matcher: &Matcher) -> usize {
        self.shared.invalidate(matcher, true)
    }

    /// Applies a fragment streamed from the server render
    pub fn apply_fragment(&self, fragment: Fragment) {
        match fragment {
            Fragment::SetResourceValue { id, args, value } => self.set(&id, args, value),
            Fragment::SetResourceError { id, args, error } => {
                let entry = self.shared.entry(ResourceKey::new(id, args));
                entry.slot().replace(State::Failed(ServerError::from(error)));
                entry.notify();
            }
            Fragment::SetCookie(cookie) => {
                let _ = self.shared.cookies.send(vec![cookie.name]);
            }
            Fragment::Redirect(redirect) => self.shared.record_redirect(redirect),
        }
    }

    /// Receives the names of cookies changed by calls
    pub fn subscribe_cookies(&self) -> broadcast::Receiver<Vec<String>> {
        self.shared.cookies.subscribe()
    }

    /// Receives redirects requested by calls
    pub fn subscribe_redirects(&self) -> broadcast::Receiver<Redirect> {
        self.shared.redirects.subscribe()
    }

    /// Takes the most recent redirect requested by a call
    pub fn take_redirect(&self) -> Option<Redirect> {
        self.shared
            .last_redirect
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
    }

    /// Drops expired entries that no handle, fetch or watcher still uses
    ///
    /// Runs on its own whenever [`get`](Self::get) adds a new key.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        self.shared.evict(|_, slot| slot.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.shared.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetches started since the cache was created
    pub fn fetch_count(&self) -> usize {
        self.shared.fetches.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Resource handle
// ============================================================================

/// Handle to one cached resource
#[derive(Clone)]
pub struct Resource {
    entry: Arc<Entry>,
    shared: Arc<CacheShared>,
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("key", &self.entry.key)
            .field("status", &self.status())
            .finish()
    }
}

impl Resource {
    pub fn key(&self) -> &ResourceKey {
        &self.entry.key
    }

    pub fn status(&self) -> Status {
        match self.entry.slot().state {
            State::Pending => Status::Pending,
            State::Ready(_) => Status::Ready,
            State::Failed(_) => Status::Error,
        }
    }

    /// Whether both handles point at the same cache entry
    pub fn same_as(&self, other: &Resource) -> bool {
        Arc::ptr_eq(&self.entry, &other.entry)
    }

    /// Reads the current value
    ///
    /// A dirty or expired value is still returned; a background refetch is
    /// started alongside.
    pub fn read(&self) -> Read {
        let mut slot = self.entry.slot();
        let current = match &slot.state {
            State::Pending => None,
            State::Ready(value) => Some(Read::Ready(value.clone())),
            State::Failed(err) => Some(Read::Failed(err.clone())),
        };

        match current {
            None => Read::Suspend(Suspense {
                task: self.shared.fetch(&self.entry, &mut slot),
            }),
            Some(read) => {
                slot.read = true;
                if slot.is_due(Instant::now()) {
                    self.shared.fetch(&self.entry, &mut slot);
                }
                read
            }
        }
    }

    /// Reads, waiting out suspensions
    pub async fn load(&self) -> Result<Value, ServerError> {
        loop {
            match self.read() {
                Read::Ready(value) => return Ok(value),
                Read::Failed(err) => return Err(err),
                Read::Suspend(suspense) => suspense.await,
            }
        }
    }

    /// Registers a callback run whenever the resource's value changes
    ///
    /// While at least one subscription is alive, invalidation refetches
    /// immediately. Dropping the subscription unregisters the callback.
    pub fn subscribe(&self, callback: impl Fn(&ResourceKey) + Send + Sync + 'static) -> Subscription {
        let id = self.shared.next_watcher.fetch_add(1, Ordering::Relaxed);
        self.entry.watchers().push((id, Arc::new(callback)));
        Subscription {
            entry: Arc::downgrade(&self.entry),
            id,
        }
    }
}

/// Watcher registration; dropping it unsubscribes
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    entry: Weak<Entry>,
    id: u64,
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(entry) = self.entry.upgrade() {
            entry.watchers().retain(|(id, _)| *id != self.id);
        }
    }
}
