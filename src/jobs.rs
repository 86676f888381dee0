//! Job records, the job state machine and the job store contract.
//!
//! A job moves `pending -> running -> completed | failed`. Every change goes
//! through [`Job::apply`], which enforces the state machine: progress never
//! decreases, reaches 1.0 only on completion, and terminal states are final.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{JobError, PipelineError};
use crate::geo::{BoundingBox, GeoPoint};
use crate::route::RouteResult;

/// Opaque job identifier (UUID v4).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why a job failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The trail provider could not deliver data.
    DataUnavailable,
    /// The area contains no routable trail data.
    EmptyGraph,
    /// Unexpected fault inside a pipeline stage.
    Internal,
    /// The process stopped before the job finished.
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind:?}: {message}")]
pub struct JobFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for JobFailure {
    fn from(err: PipelineError) -> Self {
        let kind = match &err {
            PipelineError::DataUnavailable(_) => FailureKind::DataUnavailable,
            PipelineError::EmptyGraph => FailureKind::EmptyGraph,
            PipelineError::Internal(_) => FailureKind::Internal,
        };
        Self::new(kind, err.to_string())
    }
}

/// What a client asks for: routes from `start` to every POI of `poi_kind`
/// inside `search_box`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequest {
    pub start: GeoPoint,
    pub search_box: BoundingBox,
    pub poi_kind: String,
}

impl RouteRequest {
    pub fn new(start: GeoPoint, search_box: BoundingBox, poi_kind: impl Into<String>) -> Self {
        Self {
            start,
            search_box,
            poi_kind: poi_kind.into(),
        }
    }

    /// Search the square around `start` reachable within `radius_km`.
    pub fn around(start: GeoPoint, radius_km: f64, poi_kind: impl Into<String>) -> Self {
        Self::new(start, BoundingBox::around(start, radius_km), poi_kind)
    }
}

/// A change requested by the pipeline running a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Start,
    Progress(f64),
    Complete(RouteResult),
    Fail(JobFailure),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("job is already {0}")]
    Terminal(JobStatus),
    #[error("cannot {action} a {status} job")]
    Invalid {
        action: &'static str,
        status: JobStatus,
    },
    #[error("progress {0} outside [0, 1)")]
    ProgressOutOfRange(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub request: RouteRequest,
    pub status: JobStatus,
    pub progress: f64,
    pub result: Option<RouteResult>,
    pub error: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: JobId, request: RouteRequest, now: DateTime<Utc>) -> Self {
        Self {
            id,
            request,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Time from submission to completion, once terminal.
    pub fn processing_time(&self) -> Option<Duration> {
        self.completed_at.map(|done| done - self.created_at)
    }

    pub fn apply(&mut self, transition: Transition, now: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal(self.status));
        }

        match transition {
            Transition::Start => {
                if self.status != JobStatus::Pending {
                    return Err(TransitionError::Invalid {
                        action: "start",
                        status: self.status,
                    });
                }
                self.status = JobStatus::Running;
            }
            Transition::Progress(value) => {
                if self.status != JobStatus::Running {
                    return Err(TransitionError::Invalid {
                        action: "advance",
                        status: self.status,
                    });
                }
                if !(0.0..1.0).contains(&value) {
                    return Err(TransitionError::ProgressOutOfRange(value));
                }
                self.progress = self.progress.max(value);
            }
            Transition::Complete(result) => {
                if self.status != JobStatus::Running {
                    return Err(TransitionError::Invalid {
                        action: "complete",
                        status: self.status,
                    });
                }
                self.status = JobStatus::Completed;
                self.progress = 1.0;
                self.result = Some(result);
                self.completed_at = Some(now);
            }
            Transition::Fail(failure) => {
                self.status = JobStatus::Failed;
                self.error = Some(failure);
                self.completed_at = Some(now);
            }
        }

        self.updated_at = now;
        Ok(())
    }
}

/// Storage for job records. Implementations must make `update` atomic with
/// respect to `get` so readers never observe a half-applied change.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: Job) -> Result<(), JobError>;

    fn get(&self, id: &JobId) -> Option<Job>;

    /// Mutate one job under the store's lock and return the updated copy.
    fn update(&self, id: &JobId, change: &mut dyn FnMut(&mut Job)) -> Result<Job, JobError>;

    fn list(&self) -> Vec<Job>;

    /// Remove jobs created more than `age` before `now`. Returns the count.
    fn cleanup_older_than(&self, age: Duration, now: DateTime<Utc>) -> usize;

    /// Fail every job left pending or running by a previous process.
    fn reconcile_orphans(&self, now: DateTime<Utc>) -> usize {
        let mut reconciled = 0;
        for job in self.list() {
            if job.status.is_terminal() {
                continue;
            }
            let failure = JobFailure::new(
                FailureKind::Interrupted,
                "job was interrupted before it finished",
            );
            let mut applied = false;
            let outcome = self.update(&job.id, &mut |job: &mut Job| {
                applied = job.apply(Transition::Fail(failure.clone()), now).is_ok();
            });
            if outcome.is_ok() && applied {
                tracing::warn!(job_id = %job.id, status = %job.status, "marked orphaned job as failed");
                reconciled += 1;
            }
        }
        reconciled
    }
}

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: Job) -> Result<(), JobError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        if jobs.contains_key(&job.id) {
            return Err(JobError::AlreadyExists(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn update(&self, id: &JobId, change: &mut dyn FnMut(&mut Job)) -> Result<Job, JobError> {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let job = jobs.get_mut(id).ok_or_else(|| JobError::NotFound(id.clone()))?;
        change(job);
        Ok(job.clone())
    }

    fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    fn cleanup_older_than(&self, age: Duration, now: DateTime<Utc>) -> usize {
        let Some(cutoff) = now.checked_sub_signed(age) else {
            return 0;
        };
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at >= cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::info!(removed, "cleaned up old jobs");
        }
        removed
    }
}
