use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, VanityError};
use crate::search::{DerivationParams, Match, PatternKind, SearchMode, SearchRequest};

pub const MAX_JOB_ID_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Active,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Active => write!(f, "active"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// What the submitter asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub requester_key: String,
    pub subject_key: String,
    pub target_pattern: String,
    #[serde(default)]
    pub pattern_kind: PatternKind,
    #[serde(default)]
    pub mode: SearchMode,
    pub max_attempts: u64,
    pub submitted_at: DateTime<Utc>,
    /// Identity the admission gate attributed the request to
    pub submitter: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub address: String,
    pub params: DerivationParams,
    pub attempts: u64,
    pub elapsed_ms: u64,
}

impl JobResult {
    pub fn from_match(m: Match, elapsed_ms: u64) -> Self {
        Self {
            address: m.address,
            params: m.params,
            attempts: m.attempts,
            elapsed_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub request_id: Uuid,
    pub status: JobStatus,
    pub request: JobRequest,
    pub result: Option<JobResult>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: String, request: JobRequest) -> Self {
        Self {
            id,
            request_id: Uuid::new_v4(),
            status: JobStatus::Pending,
            request,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Pending-queue score: submission time in milliseconds.
    pub fn score(&self) -> i64 {
        self.request.submitted_at.timestamp_millis()
    }

    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.started_at = Some(now);
    }

    pub fn complete(&mut self, result: JobResult, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.result = Some(result);
        self.error = None;
        self.completed_at = Some(now);
    }

    pub fn fail(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.result = None;
        self.error = Some(error);
        self.completed_at = Some(now);
    }

    /// Return a stranded active job to the queue.
    pub fn repend(&mut self) {
        self.status = JobStatus::Pending;
        self.started_at = None;
    }

    pub fn search_request(&self, program_id: &str) -> SearchRequest {
        SearchRequest {
            program_id: program_id.to_string(),
            requester_key: self.request.requester_key.clone(),
            subject_key: self.request.subject_key.clone(),
            pattern: self.request.target_pattern.clone(),
            pattern_kind: self.request.pattern_kind,
            mode: self.request.mode,
            max_attempts: self.request.max_attempts,
        }
    }
}

/// Job ids are chosen by submitters and used verbatim in store keys.
pub fn validate_job_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(VanityError::InvalidJobId(format!(
            "length must be 1..={}",
            MAX_JOB_ID_LEN
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(VanityError::InvalidJobId(
            "only ASCII letters, digits, '-' and '_' are allowed".to_string(),
        ));
    }
    Ok(())
}
