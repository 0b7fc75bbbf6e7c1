use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{SchedulerConfig, SearchConfig};
use crate::error::{Result, VanityError};
use crate::scheduler::job::{validate_job_id, Job, JobRequest, JobStatus};
use crate::search::{base58, Pattern, PatternKind, SearchMode};
use crate::store::JobStore;

/// Body of a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    /// Submitter-chosen id; generated when absent
    #[serde(default)]
    pub job_id: Option<String>,
    pub requester_key: String,
    pub subject_key: String,
    pub target_pattern: String,
    #[serde(default)]
    pub max_attempts: Option<u64>,
    #[serde(default)]
    pub pattern_kind: PatternKind,
    #[serde(default)]
    pub mode: SearchMode,
}

/// Submission and status lookup over the shared job store.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    config: SchedulerConfig,
    max_pattern_len: usize,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, config: SchedulerConfig, search: &SearchConfig) -> Self {
        Self {
            store,
            config,
            max_pattern_len: search.max_pattern_len,
        }
    }

    /// Validate a submission, write its pending record and enqueue it.
    ///
    /// Nothing is written when validation fails. A duplicate id is rejected
    /// with [`VanityError::JobExists`] while the earlier record is live.
    /// When the enqueue fails the record is deleted again, so the same id
    /// can be resubmitted.
    pub async fn submit(&self, submission: Submission, submitter: &str) -> Result<Job> {
        let request = self.validate(&submission, submitter)?;
        let id = match submission.job_id {
            Some(id) => {
                validate_job_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };

        let job = Job::new(id, request);
        let ttl = self.config.record_ttl(JobStatus::Pending);
        if !self.store.create_record(&job, ttl).await? {
            return Err(VanityError::JobExists(job.id));
        }
        if let Err(e) = self.store.insert_pending(&job.id, job.score()).await {
            if let Err(cleanup) = self.store.delete_record(&job.id).await {
                tracing::warn!(
                    job_id = %job.id,
                    error = %cleanup,
                    "Failed to remove record of unqueued job"
                );
            }
            return Err(e);
        }

        tracing::info!(
            job_id = %job.id,
            request_id = %job.request_id,
            submitter = %submitter,
            pattern = %job.request.target_pattern,
            max_attempts = job.request.max_attempts,
            "Job submitted"
        );
        Ok(job)
    }

    pub async fn status(&self, id: &str) -> Result<Job> {
        validate_job_id(id)?;
        self.store
            .read_record(id)
            .await?
            .ok_or_else(|| VanityError::JobNotFound(id.to_string()))
    }

    fn validate(&self, submission: &Submission, submitter: &str) -> Result<JobRequest> {
        base58::decode_key(&submission.requester_key)?;
        base58::decode_key(&submission.subject_key)?;
        let pattern = Pattern::new(&submission.target_pattern, submission.pattern_kind)?;
        if pattern.len() > self.max_pattern_len {
            return Err(VanityError::InvalidPattern(format!(
                "longer than {} characters",
                self.max_pattern_len
            )));
        }

        let max_attempts = submission
            .max_attempts
            .unwrap_or(self.config.default_max_attempts);
        if max_attempts == 0 || max_attempts > self.config.max_attempts_limit {
            return Err(VanityError::InvalidRequest(format!(
                "max_attempts must be in 1..={}",
                self.config.max_attempts_limit
            )));
        }

        Ok(JobRequest {
            requester_key: submission.requester_key.clone(),
            subject_key: submission.subject_key.clone(),
            target_pattern: submission.target_pattern.clone(),
            pattern_kind: submission.pattern_kind,
            mode: submission.mode,
            max_attempts,
            submitted_at: Utc::now(),
            submitter: submitter.to_string(),
        })
    }
}
