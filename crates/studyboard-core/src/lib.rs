//! studyboard-core: client-side synchronization layer for a study dashboard.
//!
//! The central piece is [`SyncStore`]: one cache of study summaries and study
//! details shared by every view. Reads return immutable snapshots; fetches
//! are deduplicated and sequenced per key so an old response never replaces
//! a newer one; failures are reported through a [`Notifier`] and never clear
//! cached data.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod poller;
pub mod sequence;
pub mod store;

pub use client::{BackendClient, HttpBackendClient};
pub use config::StoreConfig;
pub use error::{Result, StudyboardError};
pub use models::{
    Attribute, IntermediateValue, NewStudy, ParamValue, StateCounts, StudyDetail, StudyDirection,
    StudyId, StudySummary, Trial, TrialId, TrialParam, TrialState,
};
pub use notify::{MemoryNotifier, Notifier, Severity, TracingNotifier};
pub use poller::{PollExit, PollHandle};
pub use store::{DetailView, EventStream, RefreshOutcome, StoreEvent, Subscription, SyncStore};
