//! Data models for studies and trials as served by the backend.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyboardError};

pub type StudyId = u64;
pub type TrialId = u64;

/// Optimization direction of a study.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StudyDirection {
    #[default]
    #[serde(alias = "MINIMIZE")]
    Minimize,
    #[serde(alias = "MAXIMIZE")]
    Maximize,
}

impl StudyDirection {
    /// Returns true when `candidate` is strictly better than `incumbent`.
    pub fn improves(self, candidate: f64, incumbent: f64) -> bool {
        match self {
            StudyDirection::Minimize => candidate < incumbent,
            StudyDirection::Maximize => candidate > incumbent,
        }
    }
}

impl std::fmt::Display for StudyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StudyDirection::Minimize => write!(f, "minimize"),
            StudyDirection::Maximize => write!(f, "maximize"),
        }
    }
}

impl std::str::FromStr for StudyDirection {
    type Err = StudyboardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "minimize" | "min" => Ok(StudyDirection::Minimize),
            "maximize" | "max" => Ok(StudyDirection::Maximize),
            other => Err(StudyboardError::InvalidInput(format!(
                "unknown direction '{other}'"
            ))),
        }
    }
}

/// State of a trial.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TrialState {
    #[serde(alias = "running", alias = "RUNNING")]
    Running,
    #[serde(alias = "complete", alias = "COMPLETE")]
    Complete,
    #[serde(alias = "pruned", alias = "PRUNED")]
    Pruned,
    #[serde(rename = "Fail", alias = "fail", alias = "Failed", alias = "failed", alias = "FAIL")]
    Failed,
    /// Queued but not yet started.
    #[serde(alias = "waiting", alias = "WAITING")]
    Waiting,
}

impl TrialState {
    pub const ALL: [TrialState; 5] = [
        TrialState::Running,
        TrialState::Waiting,
        TrialState::Complete,
        TrialState::Pruned,
        TrialState::Failed,
    ];

    /// Terminal trials never change again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TrialState::Complete | TrialState::Pruned | TrialState::Failed
        )
    }
}

impl std::fmt::Display for TrialState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrialState::Running => write!(f, "running"),
            TrialState::Complete => write!(f, "complete"),
            TrialState::Pruned => write!(f, "pruned"),
            TrialState::Failed => write!(f, "failed"),
            TrialState::Waiting => write!(f, "waiting"),
        }
    }
}

/// A user or system attribute attached to a study or trial.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

/// A sampled parameter value. Supports int, float, bool or text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}
impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}
impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}
impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Bool(v) => write!(f, "{v}"),
            ParamValue::Text(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrialParam {
    pub name: String,
    pub value: ParamValue,
}

/// An intermediate objective value reported at `step`, used for pruning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IntermediateValue {
    pub step: u64,
    pub value: f64,
}

/// One evaluation within a study.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trial {
    pub trial_id: TrialId,
    /// Zero-based position of the trial within its study.
    pub number: u64,
    pub state: TrialState,
    /// Objective value; absent until the trial completes.
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub params: Vec<TrialParam>,
    #[serde(default)]
    pub intermediate_values: Vec<IntermediateValue>,
    #[serde(default)]
    pub user_attrs: Vec<Attribute>,
    #[serde(default)]
    pub datetime_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub datetime_complete: Option<DateTime<Utc>>,
}

impl Trial {
    /// Renders params as `name: value, ...` in backend order.
    pub fn params_label(&self) -> String {
        self.params
            .iter()
            .map(|p| format!("{}: {}", p.name, p.value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Summary row of a study as listed by `GET /studies`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudySummary {
    pub study_id: StudyId,
    pub study_name: String,
    pub direction: StudyDirection,
    #[serde(default)]
    pub best_trial: Option<Trial>,
    pub user_attrs: Vec<Attribute>,
    pub system_attrs: Vec<Attribute>,
    #[serde(default)]
    pub datetime_start: Option<DateTime<Utc>>,
}

impl StudySummary {
    pub fn best_value(&self) -> Option<f64> {
        self.best_trial.as_ref().and_then(|t| t.value)
    }
}

/// Full trial listing of a single study.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StudyDetail {
    pub study_id: StudyId,
    pub name: String,
    #[serde(default)]
    pub direction: Option<StudyDirection>,
    pub trials: Vec<Trial>,
}

/// Number of trials per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateCounts {
    pub running: usize,
    pub waiting: usize,
    pub complete: usize,
    pub pruned: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn get(&self, state: TrialState) -> usize {
        match state {
            TrialState::Running => self.running,
            TrialState::Waiting => self.waiting,
            TrialState::Complete => self.complete,
            TrialState::Pruned => self.pruned,
            TrialState::Failed => self.failed,
        }
    }
}

impl std::fmt::Display for StateCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = TrialState::ALL
            .iter()
            .filter(|s| self.get(**s) > 0)
            .map(|s| format!("{} {}", self.get(*s), s))
            .collect();
        if parts.is_empty() {
            write!(f, "no trials")
        } else {
            write!(f, "{}", parts.join(", "))
        }
    }
}

impl StudyDetail {
    /// True when no trial can change any more. A study without trials is settled.
    pub fn is_settled(&self) -> bool {
        self.trials.iter().all(|t| t.state.is_terminal())
    }

    pub fn trial(&self, trial_id: TrialId) -> Option<&Trial> {
        self.trials.iter().find(|t| t.trial_id == trial_id)
    }

    pub fn state_counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for trial in &self.trials {
            match trial.state {
                TrialState::Running => counts.running += 1,
                TrialState::Waiting => counts.waiting += 1,
                TrialState::Complete => counts.complete += 1,
                TrialState::Pruned => counts.pruned += 1,
                TrialState::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Best completed trial according to the study direction (minimize if unknown).
    pub fn best_trial(&self) -> Option<&Trial> {
        let direction = self.direction.unwrap_or_default();
        let mut best: Option<(&Trial, f64)> = None;
        for trial in &self.trials {
            if trial.state != TrialState::Complete {
                continue;
            }
            let Some(value) = trial.value.filter(|v| !v.is_nan()) else {
                continue;
            };
            match best {
                Some((_, incumbent)) if !direction.improves(value, incumbent) => {}
                _ => best = Some((trial, value)),
            }
        }
        best.map(|(trial, _)| trial)
    }

    /// Rejects details that do not belong to `expected` or repeat a trial id.
    pub fn validate(&self, expected: StudyId) -> Result<()> {
        if self.study_id != expected {
            return Err(StudyboardError::Malformed(format!(
                "requested study {expected} but received study {}",
                self.study_id
            )));
        }
        let mut seen = HashSet::with_capacity(self.trials.len());
        for trial in &self.trials {
            if !seen.insert(trial.trial_id) {
                return Err(StudyboardError::Malformed(format!(
                    "duplicate trial_id {} in study {}",
                    trial.trial_id, self.study_id
                )));
            }
        }
        Ok(())
    }
}

/// Rejects a summaries listing that repeats a study id.
pub fn validate_summaries(summaries: &[StudySummary]) -> Result<()> {
    let mut seen = HashSet::with_capacity(summaries.len());
    for summary in summaries {
        if !seen.insert(summary.study_id) {
            return Err(StudyboardError::Malformed(format!(
                "duplicate study_id {} in study list",
                summary.study_id
            )));
        }
    }
    Ok(())
}

/// Body of `POST /studies`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewStudy {
    pub name: String,
    pub direction: StudyDirection,
}
