//! Background job table. Each job runs on its own tokio task, gated by a
//! semaphore of `workers` permits, and leaves `Running` exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, Semaphore};
use tracing::{error, info};

use harbor_core::types::generate_id;
use harbor_core::Result;

use crate::indexing::IndexingReport;
use crate::search::SearchResultEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Index,
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Running,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum JobOutput {
    Indexing(IndexingReport),
    Search(Vec<SearchResultEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub result: Option<JobOutput>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    Running,
    Done(JobOutput),
    Error(String),
    NotFound,
}

#[derive(Clone)]
pub struct JobRegistry {
    jobs: Arc<RwLock<HashMap<String, JobRecord>>>,
    permits: Arc<Semaphore>,
}

impl JobRegistry {
    pub fn new(workers: usize) -> Self {
        Self { jobs: Arc::new(RwLock::new(HashMap::new())), permits: Arc::new(Semaphore::new(workers.max(1))) }
    }

    /// Register the job as `Running` and spawn it. Returns without waiting.
    pub async fn submit<F>(&self, kind: JobKind, job: F) -> String
    where
        F: Future<Output = Result<JobOutput>> + Send + 'static,
    {
        let id = generate_id();
        let record = JobRecord {
            id: id.clone(),
            kind,
            state: JobState::Running,
            result: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        self.jobs.write().await.insert(id.clone(), record);
        info!(job_id = %id, ?kind, "job submitted");

        let jobs = self.jobs.clone();
        let permits = self.permits.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            let outcome = match permits.acquire_owned().await {
                // the inner task turns a panic into a JoinError instead of a lost job
                Ok(_permit) => match tokio::spawn(job).await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(e) => Err(format!("job panicked: {e}")),
                },
                Err(e) => Err(format!("worker pool closed: {e}")),
            };
            finish(&jobs, &job_id, outcome).await;
        });
        id
    }

    /// Side-effect free status lookup.
    pub async fn poll(&self, id: &str) -> PollStatus {
        match self.jobs.read().await.get(id) {
            None => PollStatus::NotFound,
            Some(record) => match (record.state, &record.result, &record.error) {
                (JobState::Running, _, _) => PollStatus::Running,
                (JobState::Done, Some(output), _) => PollStatus::Done(output.clone()),
                (JobState::Error, _, Some(message)) => PollStatus::Error(message.clone()),
                _ => PollStatus::Error("job finished without a result".to_string()),
            },
        }
    }

    pub async fn record(&self, id: &str) -> Option<JobRecord> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Every job, oldest first.
    pub async fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.jobs.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.started_at);
        records
    }

    /// Poll until the job leaves `Running` or `timeout` elapses.
    pub async fn wait(&self, id: &str, timeout: Duration) -> PollStatus {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = self.poll(id).await;
            if status != PollStatus::Running || tokio::time::Instant::now() >= deadline {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn finish(jobs: &RwLock<HashMap<String, JobRecord>>, id: &str, outcome: std::result::Result<JobOutput, String>) {
    let mut jobs = jobs.write().await;
    let Some(record) = jobs.get_mut(id) else {
        return;
    };
    if record.state != JobState::Running {
        return;
    }
    record.finished_at = Some(Utc::now());
    match outcome {
        Ok(output) => {
            record.state = JobState::Done;
            record.result = Some(output);
            info!(job_id = %id, "job done");
        }
        Err(message) => {
            record.state = JobState::Error;
            error!(job_id = %id, error = %message, "job failed");
            record.error = Some(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::Error;

    fn report(indexed: usize) -> JobOutput {
        JobOutput::Indexing(IndexingReport { collection: "c".into(), indexed, failed: vec![] })
    }

    #[tokio::test]
    async fn jobs_transition_once() {
        let jobs = JobRegistry::new(2);
        let ok = jobs.submit(JobKind::Index, async { Ok(report(3)) }).await;
        let failed = jobs
            .submit(JobKind::Search, async { Err(Error::NotFound("collection \"nope\"".into())) })
            .await;

        assert_eq!(jobs.wait(&ok, Duration::from_secs(5)).await, PollStatus::Done(report(3)));
        match jobs.wait(&failed, Duration::from_secs(5)).await {
            PollStatus::Error(message) => assert!(message.contains("nope")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(jobs.poll("missing").await, PollStatus::NotFound);
        assert_eq!(jobs.list().await.len(), 2);
    }

    #[tokio::test]
    async fn panicking_job_becomes_error() {
        let jobs = JobRegistry::new(1);
        let id = jobs
            .submit(JobKind::Index, async {
                if report(0) != report(1) {
                    panic!("boom");
                }
                Ok(report(0))
            })
            .await;
        assert!(matches!(jobs.wait(&id, Duration::from_secs(5)).await, PollStatus::Error(m) if m.contains("panicked")));
        let record = jobs.record(&id).await.unwrap();
        assert_eq!(record.state, JobState::Error);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn running_job_polls_as_running() {
        let jobs = JobRegistry::new(1);
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let id = jobs
            .submit(JobKind::Search, async move {
                let _ = rx.await;
                Ok(JobOutput::Search(vec![]))
            })
            .await;
        assert_eq!(jobs.poll(&id).await, PollStatus::Running);
        tx.send(()).unwrap();
        assert_eq!(jobs.wait(&id, Duration::from_secs(5)).await, PollStatus::Done(JobOutput::Search(vec![])));
    }
}
