//! Detail poller: keeps a study's cached detail fresh while any of its
//! trials can still change.
//!
//! The loop refreshes once immediately, then once per interval, and exits on
//! its own when the cached detail is settled. Cancellation only interrupts
//! the wait between ticks; a refresh already in flight completes into the
//! shared cache.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::models::StudyId;
use crate::store::SyncStore;

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Why a poll loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollExit {
    /// Every trial reached a terminal state.
    Settled,
    Cancelled,
}

/// Owner of a running poll loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct PollHandle {
    study_id: StudyId,
    cancel: CancellationToken,
    task: Option<JoinHandle<PollExit>>,
}

impl PollHandle {
    pub(crate) fn spawn(store: SyncStore, study_id: StudyId, period: Duration) -> Self {
        let period = period.max(MIN_POLL_INTERVAL);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll_loop(store, study_id, period, cancel.clone()));
        info!(
            study_id,
            interval_ms = period.as_millis() as u64,
            "polling started"
        );
        Self {
            study_id,
            cancel,
            task: Some(task),
        }
    }

    pub fn study_id(&self) -> StudyId {
        self.study_id
    }

    /// Stops the timer. Safe to call more than once.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Waits for the loop to end and reports why. A loop that panicked is
    /// logged and reported as cancelled.
    pub async fn wait(mut self) -> PollExit {
        let Some(task) = self.task.take() else {
            return PollExit::Cancelled;
        };
        match task.await {
            Ok(exit) => exit,
            Err(err) => {
                warn!(study_id = self.study_id, error = %err, "poll task ended abnormally");
                PollExit::Cancelled
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    store: SyncStore,
    study_id: StudyId,
    period: Duration,
    cancel: CancellationToken,
) -> PollExit {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!(study_id, "polling cancelled");
                return PollExit::Cancelled;
            }
            _ = ticker.tick() => {}
        }

        let outcome = store.refresh_detail(study_id).await;
        trace!(study_id, ?outcome, "poll tick");

        if store
            .cached_detail(study_id)
            .is_some_and(|detail| detail.is_settled())
        {
            info!(study_id, "all trials finished; polling stopped");
            return PollExit::Settled;
        }
    }
}
