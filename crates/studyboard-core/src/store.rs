//! Synchronization store: the process-wide cache of study summaries and
//! study details.
//!
//! Readers get `Arc` snapshots that never change under them. Writers (fetch
//! completions, `create_study`) swap in a new snapshot under a short-held
//! lock and then publish a [`StoreEvent`] to subscribers. Every fetch is
//! sequenced per cache key, see [`crate::sequence`].

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, trace, warn};

use crate::client::{BackendClient, HttpBackendClient};
use crate::config::StoreConfig;
use crate::error::{Result, StudyboardError};
use crate::models::{validate_summaries, NewStudy, StudyDetail, StudyDirection, StudyId, StudySummary};
use crate::notify::{Notifier, Severity, TracingNotifier};
use crate::poller::PollHandle;
use crate::sequence::{Admission, RequestSequencer, Ticket, Verdict};

static GLOBAL: OnceLock<SyncStore> = OnceLock::new();

/// Cache entries that are fetched and sequenced independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Summaries,
    Detail(StudyId),
}

/// Published to subscribers after the cache changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEvent {
    SummariesChanged,
    DetailChanged(StudyId),
}

/// Result of reading a study detail.
#[derive(Debug, Clone, PartialEq)]
pub enum DetailView {
    /// Not cached yet; a fetch is in flight.
    Pending,
    Ready(Arc<StudyDetail>),
}

impl DetailView {
    pub fn ready(&self) -> Option<&Arc<StudyDetail>> {
        match self {
            DetailView::Ready(detail) => Some(detail),
            DetailView::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, DetailView::Pending)
    }
}

/// What a refresh call did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The response replaced the cached snapshot.
    Applied,
    /// Another request for the same key was in flight; nothing was sent.
    Suppressed,
    /// A newer response had already been applied; this one was dropped.
    Discarded,
    /// The request failed; the cached snapshot was kept.
    Failed,
}

type Callback = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

struct CacheState {
    summaries: Arc<[StudySummary]>,
    summaries_requested: bool,
    details: HashMap<StudyId, Arc<StudyDetail>>,
    requests: RequestSequencer<CacheKey>,
}

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

struct Inner {
    client: Arc<dyn BackendClient>,
    notifier: Arc<dyn Notifier>,
    config: StoreConfig,
    state: Mutex<CacheState>,
    subscribers: Mutex<Subscribers>,
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Subscribers> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Shared handle to the cache. Cloning is cheap; all clones see the same data.
#[derive(Clone)]
pub struct SyncStore {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("SyncStore")
            .field("base_url", &self.inner.config.base_url)
            .field("summaries", &state.summaries.len())
            .field("details", &state.details.len())
            .field("subscribers", &self.inner.lock_subscribers().callbacks.len())
            .finish()
    }
}

impl SyncStore {
    pub fn new(
        client: Arc<dyn BackendClient>,
        notifier: Arc<dyn Notifier>,
        config: StoreConfig,
    ) -> Self {
        let state = CacheState {
            summaries: Arc::from(Vec::new()),
            summaries_requested: false,
            details: HashMap::new(),
            requests: RequestSequencer::new(),
        };
        Self {
            inner: Arc::new(Inner {
                client,
                notifier,
                config,
                state: Mutex::new(state),
                subscribers: Mutex::new(Subscribers::default()),
            }),
        }
    }

    /// Store talking HTTP to `config.base_url`, reporting through tracing.
    pub fn connect(config: StoreConfig) -> Result<Self> {
        let client = HttpBackendClient::new(&config)?;
        Ok(Self::new(Arc::new(client), Arc::new(TracingNotifier), config))
    }

    /// Registers `store` as the process-wide instance. Fails with the store
    /// back if one is already installed.
    pub fn install_global(store: SyncStore) -> std::result::Result<(), SyncStore> {
        GLOBAL.set(store)
    }

    pub fn global() -> Option<&'static SyncStore> {
        GLOBAL.get()
    }

    /// Returns the process-wide instance, creating it with `init` on first access.
    pub fn global_or_init(init: impl FnOnce() -> SyncStore) -> &'static SyncStore {
        GLOBAL.get_or_init(init)
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.inner.lock_state()
    }

    // ─── Reads ───────────────────────────────────────────────────────────────

    /// Current summaries snapshot, possibly empty. The first call for this
    /// store starts a background fetch.
    pub fn summaries(&self) -> Arc<[StudySummary]> {
        let Ok(runtime) = Handle::try_current() else {
            warn!("no tokio runtime; study list fetch not started");
            return self.lock_state().summaries.clone();
        };
        let (snapshot, flight) = {
            let mut state = self.lock_state();
            let flight = if state.summaries_requested {
                None
            } else {
                state.summaries_requested = true;
                state
                    .requests
                    .begin(CacheKey::Summaries, Admission::IfIdle)
            };
            (state.summaries.clone(), flight)
        };
        if let Some(ticket) = flight {
            let store = self.clone();
            let flight = InFlight::new(&self.inner, ticket);
            runtime.spawn(async move { store.complete_summaries(flight).await });
        }
        snapshot
    }

    /// Cached detail, or `Pending` after starting a fetch.
    pub fn detail(&self, study_id: StudyId) -> DetailView {
        if let Some(detail) = self.cached_detail(study_id) {
            return DetailView::Ready(detail);
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(study_id, "no tokio runtime; study fetch not started");
            return DetailView::Pending;
        };
        if let Some(flight) = self.begin(CacheKey::Detail(study_id), Admission::IfIdle) {
            let store = self.clone();
            runtime.spawn(async move { store.complete_detail(study_id, flight).await });
        }
        DetailView::Pending
    }

    /// Cached detail without side effects.
    pub fn cached_detail(&self, study_id: StudyId) -> Option<Arc<StudyDetail>> {
        self.lock_state().details.get(&study_id).cloned()
    }

    // ─── Refreshes ───────────────────────────────────────────────────────────

    /// Fetches the study list; suppressed while another list fetch is in flight.
    pub async fn refresh_summaries(&self) -> RefreshOutcome {
        self.lock_state().summaries_requested = true;
        match self.begin(CacheKey::Summaries, Admission::IfIdle) {
            Some(flight) => self.complete_summaries(flight).await,
            None => {
                debug!("study list refresh suppressed: request in flight");
                RefreshOutcome::Suppressed
            }
        }
    }

    /// Re-fetches a study; suppressed while another fetch of it is in flight.
    pub async fn refresh_detail(&self, study_id: StudyId) -> RefreshOutcome {
        match self.begin(CacheKey::Detail(study_id), Admission::IfIdle) {
            Some(flight) => self.complete_detail(study_id, flight).await,
            None => {
                debug!(study_id, "study refresh suppressed: request in flight");
                RefreshOutcome::Suppressed
            }
        }
    }

    /// Re-fetches a study even if a fetch is in flight. The newest request wins.
    pub async fn force_refresh_detail(&self, study_id: StudyId) -> RefreshOutcome {
        match self.begin(CacheKey::Detail(study_id), Admission::Always) {
            Some(flight) => self.complete_detail(study_id, flight).await,
            None => RefreshOutcome::Suppressed,
        }
    }

    fn begin(&self, key: CacheKey, admission: Admission) -> Option<InFlight> {
        let ticket = self.lock_state().requests.begin(key, admission)?;
        trace!(?key, token = ticket.token, "request issued");
        Some(InFlight::new(&self.inner, ticket))
    }

    async fn complete_summaries(&self, flight: InFlight) -> RefreshOutcome {
        let result = self.inner.client.list_studies().await.and_then(|list| {
            validate_summaries(&list)?;
            Ok(list)
        });
        match result {
            Ok(list) => {
                let count = list.len();
                let verdict = {
                    let mut state = self.lock_state();
                    let verdict = flight.finish(&mut state.requests);
                    if verdict == Verdict::Apply {
                        state.summaries = Arc::from(list);
                    }
                    verdict
                };
                debug!(studies = count, ?verdict, "study list fetched");
                self.settle(verdict, StoreEvent::SummariesChanged)
            }
            Err(err) => {
                flight.abandon();
                warn!(error = %err, "failed to fetch study list");
                self.inner.notifier.notify(
                    &format!("Failed to fetch study list: {err}"),
                    Severity::Error,
                );
                RefreshOutcome::Failed
            }
        }
    }

    async fn complete_detail(&self, study_id: StudyId, flight: InFlight) -> RefreshOutcome {
        let result = self.inner.client.get_study(study_id).await.and_then(|detail| {
            detail.validate(study_id)?;
            Ok(detail)
        });
        match result {
            Ok(detail) => {
                let trials = detail.trials.len();
                let verdict = {
                    let mut state = self.lock_state();
                    let verdict = flight.finish(&mut state.requests);
                    if verdict == Verdict::Apply {
                        state.details.insert(study_id, Arc::new(detail));
                    }
                    verdict
                };
                debug!(study_id, trials, ?verdict, "study fetched");
                self.settle(verdict, StoreEvent::DetailChanged(study_id))
            }
            Err(err) => {
                flight.abandon();
                warn!(study_id, error = %err, "failed to fetch study");
                self.inner.notifier.notify(
                    &format!("Failed to fetch study (id={study_id}): {err}"),
                    Severity::Error,
                );
                RefreshOutcome::Failed
            }
        }
    }

    fn settle(&self, verdict: Verdict, event: StoreEvent) -> RefreshOutcome {
        match verdict {
            Verdict::Apply => {
                self.publish(event);
                RefreshOutcome::Applied
            }
            Verdict::Stale => {
                debug!(?event, "stale response discarded");
                RefreshOutcome::Discarded
            }
        }
    }

    // ─── Mutations ───────────────────────────────────────────────────────────

    /// Creates a study and appends its summary to the cached list.
    ///
    /// On failure the cache is left untouched and the error is both notified
    /// and returned.
    pub async fn create_study(
        &self,
        name: &str,
        direction: StudyDirection,
    ) -> Result<StudySummary> {
        let name = name.trim();
        if name.is_empty() {
            let err = StudyboardError::InvalidInput("study name must not be empty".into());
            self.inner
                .notifier
                .notify(&format!("Failed to create study: {err}"), Severity::Error);
            return Err(err);
        }

        let request = NewStudy {
            name: name.to_string(),
            direction,
        };
        match self.inner.client.create_study(request).await {
            Ok(summary) => {
                {
                    let mut state = self.lock_state();
                    // An older list fetch must not drop the new study.
                    state.requests.supersede(CacheKey::Summaries);
                    let mut next = state.summaries.to_vec();
                    match next.iter_mut().find(|s| s.study_id == summary.study_id) {
                        Some(existing) => *existing = summary.clone(),
                        None => next.push(summary.clone()),
                    }
                    state.summaries = Arc::from(next);
                }
                info!(study_id = summary.study_id, study_name = name, %direction, "study created");
                self.publish(StoreEvent::SummariesChanged);
                self.inner.notifier.notify(
                    &format!(
                        "Created study \"{}\" (id={})",
                        summary.study_name, summary.study_id
                    ),
                    Severity::Success,
                );
                Ok(summary)
            }
            Err(err) => {
                warn!(study_name = name, error = %err, "failed to create study");
                self.inner.notifier.notify(
                    &format!("Failed to create study \"{name}\": {err}"),
                    Severity::Error,
                );
                Err(err)
            }
        }
    }

    // ─── Polling ─────────────────────────────────────────────────────────────

    /// Polls `study_id` at the configured interval until all its trials are
    /// terminal or the handle is dropped.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn watch_detail(&self, study_id: StudyId) -> PollHandle {
        self.watch_detail_every(study_id, self.inner.config.poll_interval())
    }

    pub fn watch_detail_every(&self, study_id: StudyId, interval: Duration) -> PollHandle {
        PollHandle::spawn(self.clone(), study_id, interval)
    }

    // ─── Subscriptions ───────────────────────────────────────────────────────

    /// Registers `callback` for every cache change. The callback runs on the
    /// task that applied the change, after the store's lock is released.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut subscribers = self.inner.lock_subscribers();
        let id = subscribers.next_id;
        subscribers.next_id += 1;
        subscribers.callbacks.push((id, Arc::new(callback)));
        Subscription {
            store: Arc::downgrade(&self.inner),
            id: Some(id),
        }
    }

    /// Cache changes as an async stream. Dropping the stream unsubscribes.
    pub fn events(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |event: &StoreEvent| {
            let _ = tx.send(*event);
        });
        EventStream {
            events: UnboundedReceiverStream::new(rx),
            _subscription: subscription,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_subscribers().callbacks.len()
    }

    fn publish(&self, event: StoreEvent) {
        let callbacks: Vec<Callback> = self
            .inner
            .lock_subscribers()
            .callbacks
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        trace!(?event, subscribers = callbacks.len(), "publishing");
        for callback in callbacks {
            callback(&event);
        }
    }
}

/// Keeps a request's in-flight slot until it is finished or abandoned.
/// Dropping it unfinished (e.g. a cancelled task) abandons the request.
struct InFlight {
    inner: Arc<Inner>,
    ticket: Option<Ticket<CacheKey>>,
}

impl InFlight {
    fn new(inner: &Arc<Inner>, ticket: Ticket<CacheKey>) -> Self {
        Self {
            inner: Arc::clone(inner),
            ticket: Some(ticket),
        }
    }

    /// Caller holds the state lock.
    fn finish(mut self, requests: &mut RequestSequencer<CacheKey>) -> Verdict {
        match self.ticket.take() {
            Some(ticket) => requests.finish(&ticket),
            None => Verdict::Stale,
        }
    }

    fn abandon(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.inner.lock_state().requests.abandon(&ticket);
        }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.release();
    }
}

/// Registration of a store callback. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<Inner>,
    id: Option<u64>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(id) = self.id.take() else { return };
        if let Some(inner) = self.store.upgrade() {
            inner.lock_subscribers().callbacks.retain(|(i, _)| *i != id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Stream of [`StoreEvent`]s returned by [`SyncStore::events`].
pub struct EventStream {
    events: UnboundedReceiverStream<StoreEvent>,
    _subscription: Subscription,
}

impl Stream for EventStream {
    type Item = StoreEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StoreEvent>> {
        Pin::new(&mut self.get_mut().events).poll_next(cx)
    }
}
