//! Framework-agnostic reactive query binding.
//!
//! # Design
//! A `Query` wraps a zero-argument fetcher and keeps a `QueryState` that UI
//! adapters read with `state()` or observe with `subscribe()`. Fetches are
//! started on construction (when enabled), by `refetch()`, by an optional
//! interval, and by `FocusEvents` notifications. Every fetch takes a new
//! generation number; only the newest generation may settle the state or fire
//! callbacks, so a slow earlier fetch can never overwrite a later one.
//!
//! `data` survives the start of a refetch. Cancelled requests are swallowed:
//! they clear `loading` but never populate `error` or call `on_error`.
//!
//! Every fetch, including the one behind `refetch()`, runs as a spawned task
//! on the ambient Tokio runtime, so dropping a `refetch()` future never
//! strands `loading`. Interval and focus tasks are spawned the same way, so
//! an enabled `Query` must be created inside a runtime. They are aborted by
//! `dispose()` and on drop.
//!
//! Listener delivery is serialized: snapshots reach listeners in the order
//! the state changed. Listeners therefore must not call `mutate`,
//! `mutate_with` or `set_enabled` on the query they observe.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::envelope::ApiResponse;
use crate::error::ApiError;
use crate::registry::lock;

pub type Fetcher<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<ApiResponse<T>, ApiError>> + Send + Sync>;
type Callback<A> = Arc<dyn Fn(&A) + Send + Sync>;
type Listener<T> = Arc<dyn Fn(&QueryState<T>) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryState<T> {
    pub data: Option<T>,
    pub loading: bool,
    pub error: Option<ApiError>,
}

impl<T> QueryState<T> {
    pub fn status(&self) -> QueryStatus {
        if self.loading {
            QueryStatus::Loading
        } else if self.error.is_some() {
            QueryStatus::Error
        } else if self.data.is_some() {
            QueryStatus::Success
        } else {
            QueryStatus::Idle
        }
    }
}

/// Source of window-focus events. UI adapters call `notify()` from their
/// focus handler; every `Query` built with it refetches once per event.
#[derive(Debug, Clone)]
pub struct FocusEvents {
    sender: broadcast::Sender<()>,
}

impl Default for FocusEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl FocusEvents {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(16);
        Self { sender }
    }

    pub fn notify(&self) {
        // No receivers just means no query is listening.
        let _ = self.sender.send(());
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }
}

pub struct QueryOptions<T> {
    enabled: bool,
    initial_data: Option<T>,
    refetch_interval: Option<Duration>,
    focus: Option<FocusEvents>,
    on_success: Option<Callback<T>>,
    on_error: Option<Callback<ApiError>>,
}

impl<T> Default for QueryOptions<T> {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_data: None,
            refetch_interval: None,
            focus: None,
            on_success: None,
            on_error: None,
        }
    }
}

impl<T> QueryOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn initial_data(mut self, data: T) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn refetch_interval(mut self, interval: Duration) -> Self {
        self.refetch_interval = Some(interval);
        self
    }

    pub fn refetch_on_window_focus(mut self, focus: &FocusEvents) -> Self {
        self.focus = Some(focus.clone());
        self
    }

    pub fn on_success(mut self, callback: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ApiError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

struct Shared<T> {
    fetcher: Fetcher<T>,
    state: Mutex<QueryState<T>>,
    listeners: Mutex<Vec<(u64, Listener<T>)>>,
    delivery: Mutex<()>,
    next_listener: AtomicU64,
    generation: AtomicU64,
    on_success: Option<Callback<T>>,
    on_error: Option<Callback<ApiError>>,
}

impl<T: Clone + Send + Sync + 'static> Shared<T> {
    fn update(&self, change: impl FnOnce(&mut QueryState<T>)) {
        // Held across snapshot and dispatch so deliveries follow state order.
        let _delivery = lock(&self.delivery);
        let snapshot = {
            let mut state = lock(&self.state);
            change(&mut state);
            state.clone()
        };
        let listeners: Vec<Listener<T>> = lock(&self.listeners).iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }

    /// Invalidate every outstanding fetch.
    fn supersede(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }

    async fn fetch(self: Arc<Self>) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.update(|state| {
            state.loading = true;
            state.error = None;
        });

        let result = (self.fetcher)().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::trace!(generation, "discarding superseded query result");
            return;
        }

        match result {
            Ok(response) => {
                let data = response.into_data();
                self.update(|state| {
                    state.loading = false;
                    if let Some(data) = &data {
                        state.data = Some(data.clone());
                    }
                });
                if let (Some(data), Some(callback)) = (&data, &self.on_success) {
                    callback(data);
                }
            }
            Err(err) if err.is_cancelled() => {
                tracing::debug!(error = %err, "query fetch cancelled");
                self.update(|state| state.loading = false);
            }
            Err(err) => {
                self.update(|state| {
                    state.loading = false;
                    state.error = Some(err.clone());
                });
                if let Some(callback) = &self.on_error {
                    callback(&err);
                }
            }
        }
    }
}

/// Releases a listener registered with `Query::subscribe` when dropped.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct Query<T> {
    shared: Arc<Shared<T>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    enabled: AtomicBool,
    refetch_interval: Option<Duration>,
    focus: Option<FocusEvents>,
}

impl<T: Clone + Send + Sync + 'static> Query<T> {
    pub fn new<F, Fut>(fetcher: F, options: QueryOptions<T>) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse<T>, ApiError>> + Send + 'static,
    {
        let fetcher: Fetcher<T> = Arc::new(move || fetcher().boxed());
        let shared = Arc::new(Shared {
            fetcher,
            state: Mutex::new(QueryState {
                data: options.initial_data,
                loading: false,
                error: None,
            }),
            listeners: Mutex::new(Vec::new()),
            delivery: Mutex::new(()),
            next_listener: AtomicU64::new(0),
            generation: AtomicU64::new(0),
            on_success: options.on_success,
            on_error: options.on_error,
        });
        let query = Self {
            shared,
            tasks: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(options.enabled),
            refetch_interval: options.refetch_interval,
            focus: options.focus,
        };
        if options.enabled {
            // Loading is visible before the spawned fetch gets polled.
            lock(&query.shared.state).loading = true;
            query.start();
        }
        query
    }

    pub fn state(&self) -> QueryState<T> {
        lock(&self.shared.state).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Register `listener` for every state change.
    pub fn subscribe(&self, listener: impl Fn(&QueryState<T>) + Send + Sync + 'static) -> Subscription {
        let id = self.shared.next_listener.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        let shared = Arc::downgrade(&self.shared);
        Subscription {
            release: Some(Box::new(move || {
                if let Some(shared) = shared.upgrade() {
                    lock(&shared.listeners).retain(|(other, _)| *other != id);
                }
            })),
        }
    }

    /// Fetch now and return the state once this fetch settles. The fetch
    /// keeps running if the returned future is dropped.
    pub async fn refetch(&self) -> QueryState<T> {
        if let Err(err) = tokio::spawn(self.shared.clone().fetch()).await {
            tracing::warn!(error = %err, "query fetch task failed");
        }
        self.state()
    }

    /// Replace `data` locally without touching `loading` or the network.
    pub fn mutate(&self, data: T) {
        self.shared.update(|state| state.data = Some(data));
    }

    /// Like `mutate`, deriving the new value from the current one. The
    /// updater runs under the state lock and must not call back into the query.
    pub fn mutate_with(&self, updater: impl FnOnce(Option<&T>) -> T) {
        self.shared.update(|state| {
            let next = updater(state.data.as_ref());
            state.data = Some(next);
        });
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was_enabled = self.enabled.swap(enabled, Ordering::SeqCst);
        match (was_enabled, enabled) {
            (false, true) => self.start(),
            (true, false) => {
                self.stop();
                self.shared.update(|state| state.loading = false);
            }
            _ => {}
        }
    }

    /// Stop all triggers and drop every listener.
    pub fn dispose(&self) {
        self.stop();
        lock(&self.shared.listeners).clear();
    }

    fn start(&self) {
        let mut tasks = lock(&self.tasks);
        tasks.push(tokio::spawn(self.shared.clone().fetch()));

        if let Some(period) = self.refetch_interval {
            let shared = self.shared.clone();
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    tokio::spawn(shared.clone().fetch());
                }
            }));
        }

        if let Some(focus) = &self.focus {
            // Subscribe before spawning so no event between here and the
            // task's first poll is lost.
            let mut events = focus.subscribe();
            let shared = self.shared.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(()) | Err(RecvError::Lagged(_)) => {
                            tokio::spawn(shared.clone().fetch());
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
            }));
        }
    }

    fn stop(&self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.shared.supersede();
    }
}

impl<T> Drop for Query<T> {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
    }
}
