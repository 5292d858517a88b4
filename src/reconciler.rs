//! Job status reconciliation
//!
//! Reduces the raw counters and timestamps the API server reports for a Job
//! into one coarse state. The rules are evaluated in order, first match wins:
//!
//! 1. any succeeded pod: `Completed`
//! 2. any failed pod: `Failed`
//! 3. any active pod, or started but not finished: `Running`
//! 4. otherwise: `Unknown`
//!
//! A Job that has both succeeded and failed pods (retries) reads as
//! `Completed`.

use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use serde::{Deserialize, Serialize};

/// Coarse lifecycle state of a Job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Pods are running or the job has started
    Running,
    /// At least one pod succeeded
    Completed,
    /// At least one pod failed and none succeeded
    Failed,
    /// Nothing has happened yet
    Unknown,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// The status fields of a Job that matter for classification
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatusSnapshot {
    /// Job name
    pub name: String,
    /// Job namespace
    pub namespace: String,
    /// Pods currently running
    pub active: u32,
    /// Pods that succeeded
    pub succeeded: u32,
    /// Pods that failed
    pub failed: u32,
    /// When the job controller started the job
    pub start_time: Option<DateTime<Utc>>,
    /// When the job finished
    pub completion_time: Option<DateTime<Utc>>,
}

fn count(value: Option<i32>) -> u32 {
    value.and_then(|v| u32::try_from(v).ok()).unwrap_or(0)
}

impl JobStatusSnapshot {
    /// Capture a snapshot from a Job as read from the API server
    ///
    /// Missing counters read as zero.
    pub fn from_job(job: &Job) -> Self {
        let status = job.status.as_ref();
        Self {
            name: job.metadata.name.clone().unwrap_or_default(),
            namespace: job.metadata.namespace.clone().unwrap_or_default(),
            active: count(status.and_then(|s| s.active)),
            succeeded: count(status.and_then(|s| s.succeeded)),
            failed: count(status.and_then(|s| s.failed)),
            start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
            completion_time: status.and_then(|s| s.completion_time.as_ref()).map(|t| t.0),
        }
    }

    /// Classify this snapshot
    pub fn state(&self) -> JobState {
        classify(self)
    }
}

/// Reduce a status snapshot to a [`JobState`]
pub fn classify(snapshot: &JobStatusSnapshot) -> JobState {
    if snapshot.succeeded > 0 {
        JobState::Completed
    } else if snapshot.failed > 0 {
        JobState::Failed
    } else if snapshot.active > 0
        || (snapshot.start_time.is_some() && snapshot.completion_time.is_none())
    {
        JobState::Running
    } else {
        JobState::Unknown
    }
}
