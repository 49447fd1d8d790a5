//! Inference job lifecycle types.
//!
//! A job is born when a triggered user message has been persisted and its
//! prompt assembled. It moves through Queued → Running and ends in exactly
//! one terminal state: Succeeded, Failed, TimedOut, or Cancelled.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::ConversationId;

/// Unique identifier for an inference job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a job currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Queued | JobStatus::Running)
    }
}

/// Sampling parameters passed through to the model runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateParams {
    /// Temperature (0.0 = deterministic).
    #[serde(default = "default_temperature")]
    pub temperature: f64,

    /// Hard cap on generated tokens.
    pub max_tokens: usize,
}

fn default_temperature() -> f64 {
    0.8
}

/// Everything the scheduler needs to run one generation.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub job_id: JobId,
    pub conversation_id: ConversationId,

    /// The fully assembled prompt, frozen at submission time.
    pub prompt: String,

    pub params: GenerateParams,
    pub submitted_at: DateTime<Utc>,
}

impl JobSpec {
    pub fn new(conversation_id: ConversationId, prompt: String, params: GenerateParams) -> Self {
        Self {
            job_id: JobId::new(),
            conversation_id,
            prompt,
            params,
            submitted_at: Utc::now(),
        }
    }
}

/// Why a job ended without a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobFailure {
    /// The generation exceeded the configured wall-clock deadline.
    Timeout,

    /// The model runtime returned an error.
    Runtime(String),

    /// The job was cancelled while still queued.
    Cancelled,
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobFailure::Timeout => write!(f, "generation timed out"),
            JobFailure::Runtime(msg) => write!(f, "runtime failure: {msg}"),
            JobFailure::Cancelled => write!(f, "cancelled before running"),
        }
    }
}

/// Terminal result of one job, handed to the completion sink.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub conversation_id: ConversationId,
    pub result: std::result::Result<Completion, JobFailure>,
    pub finished_at: DateTime<Utc>,
}

impl JobOutcome {
    pub fn status(&self) -> JobStatus {
        match &self.result {
            Ok(_) => JobStatus::Succeeded,
            Err(JobFailure::Timeout) => JobStatus::TimedOut,
            Err(JobFailure::Runtime(_)) => JobStatus::Failed,
            Err(JobFailure::Cancelled) => JobStatus::Cancelled,
        }
    }
}

/// A successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text, already stripped of stop tags.
    pub text: String,

    /// Tokens produced by the model.
    pub tokens_generated: usize,

    /// Wall-clock generation time.
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        for status in [
            JobStatus::Succeeded,
            JobStatus::Failed,
            JobStatus::TimedOut,
            JobStatus::Cancelled,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn outcome_status_tracks_result() {
        let outcome = JobOutcome {
            job_id: JobId::new(),
            conversation_id: ConversationId::from("chan-1"),
            result: Err(JobFailure::Timeout),
            finished_at: Utc::now(),
        };
        assert_eq!(outcome.status(), JobStatus::TimedOut);

        let outcome = JobOutcome {
            job_id: JobId::new(),
            conversation_id: ConversationId::from("chan-1"),
            result: Ok(Completion {
                text: "hi".into(),
                tokens_generated: 1,
                duration_ms: 12,
            }),
            finished_at: Utc::now(),
        };
        assert_eq!(outcome.status(), JobStatus::Succeeded);
    }
}
