use std::time::Duration;
use tracing::warn;

use crate::config::PersistenceConfig;
use crate::repo::{JobRecord, JobStore, PersistenceError};

/// Write `record`, retrying with exponential backoff.
///
/// `on_attempt` sees the 1-based attempt number before each write. Returns the
/// number of attempts the successful write took, or the last error.
pub(crate) async fn persist_with_retry(
    store: &dyn JobStore,
    record: &JobRecord,
    policy: &PersistenceConfig,
    mut on_attempt: impl FnMut(u32),
) -> Result<u32, PersistenceError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = Duration::from_millis(policy.initial_backoff_ms);
    let mut attempt = 1;
    loop {
        on_attempt(attempt);
        match store.persist(record).await {
            Ok(()) => return Ok(attempt),
            Err(err) if attempt < max_attempts => {
                warn!(
                    job_id = %record.metadata.job_id,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %err,
                    "job persistence failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AssetId, JobRequest, ObjectiveType, OptimizationJob};
    use crate::repo::MockJobStore;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn record() -> JobRecord {
        let request = JobRequest::new(ObjectiveType::CostMinimization, 3600, 3600, vec![AssetId::new("bat")]);
        let mut job = OptimizationJob::new(request, Utc::now(), Duration::from_secs(1));
        job.state = crate::domain::JobState::Failed;
        JobRecord::from_job(&job)
    }

    fn policy(max_attempts: u32) -> PersistenceConfig {
        PersistenceConfig {
            max_attempts,
            initial_backoff_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_retries_until_store_accepts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut store = MockJobStore::new();
        store.expect_persist().times(2).returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PersistenceError::Write("connection reset".to_string()))
            } else {
                Ok(())
            }
        });

        let mut seen = Vec::new();
        let attempts = persist_with_retry(&store, &record(), &policy(5), |n| seen.push(n))
            .await
            .unwrap();
        assert_eq!(attempts, 2);
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mut store = MockJobStore::new();
        store
            .expect_persist()
            .times(3)
            .returning(|_| Err(PersistenceError::Write("disk full".to_string())));

        let err = persist_with_retry(&store, &record(), &policy(3), |_| {}).await.unwrap_err();
        assert!(matches!(err, PersistenceError::Write(msg) if msg == "disk full"));
    }
}
