//! Test backends and fixtures shared by the integration suites.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tokio::sync::oneshot;

use studyboard_core::{
    BackendClient, MemoryNotifier, NewStudy, Result, StoreConfig, StudyDetail, StudyDirection,
    StudyId, StudySummary, StudyboardError, SyncStore, Trial, TrialState,
};

pub fn summary(study_id: StudyId, name: &str) -> StudySummary {
    StudySummary {
        study_id,
        study_name: name.to_string(),
        direction: StudyDirection::Minimize,
        best_trial: None,
        user_attrs: vec![],
        system_attrs: vec![],
        datetime_start: None,
    }
}

pub fn detail(study_id: StudyId, name: &str, states: &[TrialState]) -> StudyDetail {
    let trials = states
        .iter()
        .enumerate()
        .map(|(i, state)| Trial {
            trial_id: study_id * 100 + i as u64,
            number: i as u64,
            state: *state,
            value: state.is_terminal().then_some(i as f64),
            params: vec![],
            intermediate_values: vec![],
            user_attrs: vec![],
            datetime_start: None,
            datetime_complete: None,
        })
        .collect();
    StudyDetail {
        study_id,
        name: name.to_string(),
        direction: Some(StudyDirection::Minimize),
        trials,
    }
}

fn backend_down(what: &str) -> StudyboardError {
    StudyboardError::Status {
        status: 503,
        message: format!("{what} unavailable"),
    }
}

/// Polls `cond` between scheduler yields until it holds.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("condition not reached");
}

pub fn store_with(backend: Arc<dyn BackendClient>) -> (SyncStore, Arc<MemoryNotifier>) {
    let notifier = Arc::new(MemoryNotifier::new());
    let store = SyncStore::new(backend, notifier.clone(), StoreConfig::default());
    (store, notifier)
}

// ─── Scripted backend: answers immediately ───────────────────────────────────

/// Replies in order; the last reply repeats. `None` is a backend failure.
struct Script<T> {
    replies: VecDeque<Option<T>>,
    calls: usize,
}

impl<T: Clone> Script<T> {
    fn new(replies: Vec<Option<T>>) -> Self {
        Self {
            replies: replies.into(),
            calls: 0,
        }
    }

    fn next(&mut self, what: &str) -> Result<T> {
        self.calls += 1;
        let reply = if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        };
        match reply {
            Some(Some(value)) => Ok(value),
            _ => Err(backend_down(what)),
        }
    }
}

pub struct ScriptedBackend {
    summaries: Mutex<Script<Vec<StudySummary>>>,
    details: Mutex<Script<StudyDetail>>,
    created: Mutex<Script<StudySummary>>,
    create_requests: Mutex<Vec<NewStudy>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(Script::new(vec![Some(vec![])])),
            details: Mutex::new(Script::new(vec![None])),
            created: Mutex::new(Script::new(vec![None])),
            create_requests: Mutex::new(vec![]),
        }
    }

    pub fn with_summaries(self, replies: Vec<Option<Vec<StudySummary>>>) -> Self {
        *self.summaries.lock().unwrap() = Script::new(replies);
        self
    }

    pub fn with_details(self, replies: Vec<Option<StudyDetail>>) -> Self {
        *self.details.lock().unwrap() = Script::new(replies);
        self
    }

    pub fn with_created(self, replies: Vec<Option<StudySummary>>) -> Self {
        *self.created.lock().unwrap() = Script::new(replies);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.summaries.lock().unwrap().calls
    }

    pub fn detail_calls(&self) -> usize {
        self.details.lock().unwrap().calls
    }

    pub fn create_requests(&self) -> Vec<NewStudy> {
        self.create_requests.lock().unwrap().clone()
    }
}

impl BackendClient for ScriptedBackend {
    fn list_studies(&self) -> BoxFuture<'_, Result<Vec<StudySummary>>> {
        let reply = self.summaries.lock().unwrap().next("study list");
        async move { reply }.boxed()
    }

    fn get_study(&self, _study_id: StudyId) -> BoxFuture<'_, Result<StudyDetail>> {
        let reply = self.details.lock().unwrap().next("study");
        async move { reply }.boxed()
    }

    fn create_study(&self, request: NewStudy) -> BoxFuture<'_, Result<StudySummary>> {
        self.create_requests.lock().unwrap().push(request);
        let reply = self.created.lock().unwrap().next("create");
        async move { reply }.boxed()
    }
}

// ─── Gated backend: the test decides when and in which order calls resolve ───

type Gate<T> = Option<oneshot::Sender<Result<T>>>;

#[derive(Default)]
pub struct GatedBackend {
    list: Mutex<Vec<Gate<Vec<StudySummary>>>>,
    detail: Mutex<Vec<(StudyId, Gate<StudyDetail>)>>,
    create: Mutex<Vec<(NewStudy, Gate<StudySummary>)>>,
}

fn gated<T: Send + 'static>(rx: oneshot::Receiver<Result<T>>) -> BoxFuture<'static, Result<T>> {
    async move { rx.await.unwrap_or_else(|_| Err(backend_down("gate"))) }.boxed()
}

impl GatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_calls(&self) -> usize {
        self.list.lock().unwrap().len()
    }

    pub fn detail_calls(&self) -> usize {
        self.detail.lock().unwrap().len()
    }

    pub fn create_calls(&self) -> usize {
        self.create.lock().unwrap().len()
    }

    pub fn resolve_list(&self, call: usize, reply: Result<Vec<StudySummary>>) {
        let tx = self.list.lock().unwrap()[call].take().expect("list call already resolved");
        let _ = tx.send(reply);
    }

    pub fn resolve_detail(&self, call: usize, reply: Result<StudyDetail>) {
        let tx = self.detail.lock().unwrap()[call]
            .1
            .take()
            .expect("detail call already resolved");
        let _ = tx.send(reply);
    }

    pub fn resolve_create(&self, call: usize, reply: Result<StudySummary>) {
        let tx = self.create.lock().unwrap()[call]
            .1
            .take()
            .expect("create call already resolved");
        let _ = tx.send(reply);
    }
}

impl BackendClient for GatedBackend {
    fn list_studies(&self) -> BoxFuture<'_, Result<Vec<StudySummary>>> {
        let (tx, rx) = oneshot::channel();
        self.list.lock().unwrap().push(Some(tx));
        gated(rx)
    }

    fn get_study(&self, study_id: StudyId) -> BoxFuture<'_, Result<StudyDetail>> {
        let (tx, rx) = oneshot::channel();
        self.detail.lock().unwrap().push((study_id, Some(tx)));
        gated(rx)
    }

    fn create_study(&self, request: NewStudy) -> BoxFuture<'_, Result<StudySummary>> {
        let (tx, rx) = oneshot::channel();
        self.create.lock().unwrap().push((request, Some(tx)));
        gated(rx)
    }
}

pub fn shared<B: BackendClient + 'static>(backend: &Arc<B>) -> Arc<dyn BackendClient> {
    Arc::clone(backend) as Arc<dyn BackendClient>
}
