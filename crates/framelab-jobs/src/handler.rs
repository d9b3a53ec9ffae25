//! Job handler trait and execution context.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use framelab_core::{Error, Job, JobType, Result};

/// Context provided to job handlers.
pub struct JobContext {
    /// The job being processed.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The user this job belongs to, if any.
    pub fn user_id(&self) -> Option<Uuid> {
        self.job.user_id
    }

    /// Get the job payload.
    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }

    /// Extract a UUID field from the payload.
    pub fn payload_uuid(&self, field: &str) -> Result<Uuid> {
        let value = self
            .payload()
            .and_then(|p| p.get(field))
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Job(format!("payload missing field '{field}'")))?;
        Uuid::parse_str(value).map_err(|e| Error::Job(format!("invalid uuid in '{field}': {e}")))
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed permanently.
    Failed(String),
    /// Job hit a transient error and should be retried.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    /// Check if this handler can process the given job type.
    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}

/// No-op handler for testing.
pub struct NoOpHandler {
    job_type: JobType,
}

impl NoOpHandler {
    pub fn new(job_type: JobType) -> Self {
        Self { job_type }
    }
}

#[async_trait]
impl JobHandler for NoOpHandler {
    fn job_type(&self) -> JobType {
        self.job_type
    }

    async fn execute(&self, _ctx: JobContext) -> JobResult {
        JobResult::Success(None)
    }
}

#[cfg(test)]
pub(crate) fn test_job(job_type: JobType, payload: Option<JsonValue>) -> Job {
    Job {
        id: Uuid::new_v4(),
        user_id: Some(Uuid::new_v4()),
        job_type,
        status: framelab_core::JobStatus::Pending,
        priority: job_type.default_priority(),
        payload,
        result: None,
        error_message: None,
        retry_count: 0,
        max_retries: framelab_core::defaults::JOB_MAX_RETRIES,
        run_at: chrono::Utc::now(),
        created_at: chrono::Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_job_context_accessors() {
        let job = test_job(JobType::DispatchReminder, Some(json!({"count": 2})));
        let ctx = JobContext::new(job.clone());
        assert_eq!(ctx.user_id(), job.user_id);
        assert_eq!(ctx.payload().unwrap()["count"], 2);
    }

    #[test]
    fn test_payload_uuid_extraction() {
        let id = Uuid::new_v4();
        let job = test_job(
            JobType::AnonymizeAccount,
            Some(json!({"deletion_id": id.to_string()})),
        );
        let ctx = JobContext::new(job);
        assert_eq!(ctx.payload_uuid("deletion_id").unwrap(), id);
        assert!(matches!(
            ctx.payload_uuid("missing").unwrap_err(),
            Error::Job(_)
        ));
    }

    #[test]
    fn test_payload_uuid_rejects_garbage() {
        let job = test_job(
            JobType::AnonymizeAccount,
            Some(json!({"deletion_id": "not-a-uuid"})),
        );
        let ctx = JobContext::new(job);
        assert!(matches!(
            ctx.payload_uuid("deletion_id").unwrap_err(),
            Error::Job(_)
        ));
    }

    #[tokio::test]
    async fn test_noop_handler() {
        let handler = NoOpHandler::new(JobType::DispatchReminder);
        assert!(handler.can_handle(JobType::DispatchReminder));
        assert!(!handler.can_handle(JobType::AnonymizeAccount));

        let ctx = JobContext::new(test_job(JobType::DispatchReminder, None));
        let result = handler.execute(ctx).await;
        assert!(matches!(result, JobResult::Success(None)));
    }
}
