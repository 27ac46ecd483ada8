//! Post-acknowledgment phase of event processing.
//!
//! The webhook handler enqueues accepted events here and responds 200
//! immediately; a dispatcher hands each event to its own task. Failures on
//! this side of the ack boundary cannot reach the bus, so they are logged
//! and kept inspectable through the job-status ledger.

use crate::{
    models::{ApiError, PipelineReport, ProductEvent},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};
use tokio::{
    sync::{Mutex, mpsc, mpsc::error::TrySendError},
    task::JoinHandle,
};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<JobLedger>>,
}

struct Job {
    id: Uuid,
    event: ProductEvent,
}

pub struct QueueOptions {
    pub capacity: usize,
    pub history: usize,
}

impl QueueOptions {
    pub fn from_env() -> Self {
        Self {
            capacity: env_usize("QUEUE_CAPACITY", 64),
            history: env_usize("JOB_HISTORY_LIMIT", 256),
        }
    }
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Completed { result: PipelineReport },
    Failed { error: String, stage: String },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

/// Status map with a bounded memory footprint: terminal states are kept in
/// arrival order and the oldest are evicted past the history limit, so a
/// long-running consumer does not grow one entry per event forever.
#[derive(Default)]
struct JobLedger {
    entries: HashMap<Uuid, JobState>,
    terminal: VecDeque<Uuid>,
}

impl JobLedger {
    fn set(&mut self, id: Uuid, state: JobState) {
        self.entries.insert(id, state);
    }

    fn finish(&mut self, id: Uuid, state: JobState, keep: usize) {
        self.entries.insert(id, state);
        self.terminal.push_back(id);
        while self.terminal.len() > keep {
            if let Some(evicted) = self.terminal.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    fn remove(&mut self, id: Uuid) {
        self.entries.remove(&id);
    }
}

impl JobQueue {
    pub fn spawn(pipeline: Pipeline) -> (Self, JoinHandle<()>) {
        Self::spawn_with(pipeline, QueueOptions::from_env())
    }

    pub fn spawn_with(pipeline: Pipeline, options: QueueOptions) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(options.capacity.max(1));
        let statuses = Arc::new(Mutex::new(JobLedger::default()));
        let statuses_bg = statuses.clone();
        let history = options.history.max(1);

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // Each event is an independent unit of work: it gets its own
                // task so one slow pipeline neither delays the ack of later
                // deliveries nor serializes unrelated events.
                let pipeline = pipeline.clone();
                let statuses = statuses_bg.clone();
                tokio::spawn(async move {
                    {
                        let mut guard = statuses.lock().await;
                        guard.set(job.id, JobState::Running);
                    }

                    let product_id = job.event.product_id.clone();
                    let result = pipeline.run(job.event).await;
                    let mut guard = statuses.lock().await;
                    match result {
                        Ok(report) => {
                            info!(
                                target = "pixelphraser.jobs",
                                job_id = %job.id,
                                product_id = %report.product_id,
                                category = %report.category,
                                "pipeline completed",
                            );
                            guard.finish(job.id, JobState::Completed { result: report }, history);
                        }
                        Err(err) => {
                            // The ack is long gone; the log line and the
                            // status ledger are the only places this failure
                            // is visible.
                            error!(
                                target = "pixelphraser.jobs",
                                job_id = %job.id,
                                product_id = %product_id,
                                stage = err.stage(),
                                kind = ?err.kind(),
                                error = %err,
                                "pipeline failed after ack",
                            );
                            guard.finish(
                                job.id,
                                JobState::Failed {
                                    error: err.detail().to_string(),
                                    stage: err.stage().to_string(),
                                },
                                history,
                            );
                        }
                    }
                });
            }
        });

        (Self { tx, statuses }, handle)
    }

    /// Hands an accepted event to the dispatcher without ever waiting on a
    /// full queue: the caller is still pre-ack and must answer the bus
    /// within its deadline, so saturation surfaces as an error the handler
    /// maps to a 5xx (and the bus redelivers).
    pub async fn enqueue(&self, event: ProductEvent) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.set(id, JobState::Queued);
        }
        if let Err(err) = self.tx.try_send(Job { id, event }) {
            self.statuses.lock().await.remove(id);
            return Err(match err {
                TrySendError::Full(_) => ApiError {
                    error: "queue_full".into(),
                    detail: Some("pipeline backlog at capacity".into()),
                },
                TrySendError::Closed(_) => ApiError {
                    error: "queue_send_failed".into(),
                    detail: Some("worker not available".into()),
                },
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.entries.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::{
        FakeAnalyzer, FakeCategories, FakeGenerator, FakeStore, sample_event,
    };
    use std::time::Duration;

    fn fast_pipeline() -> Pipeline {
        Pipeline::new(
            Arc::new(FakeCategories::with_key("clothing")),
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeGenerator::default()),
            Arc::new(FakeStore::default()),
        )
    }

    #[tokio::test]
    async fn terminal_jobs_are_pruned_to_history_limit() {
        let (queue, _worker) = JobQueue::spawn_with(
            fast_pipeline(),
            QueueOptions {
                capacity: 16,
                history: 2,
            },
        );

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(queue.enqueue(sample_event()).await.expect("enqueue"));
        }

        for _ in 0..200 {
            let mut terminal = 0;
            let mut live = 0;
            for id in &ids {
                match queue.get(*id).await {
                    Some(info) => match info.state {
                        JobState::Completed { .. } | JobState::Failed { .. } => terminal += 1,
                        _ => live += 1,
                    },
                    None => {}
                }
            }
            if live == 0 && terminal == 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("ledger never pruned down to the history limit");
    }

    #[tokio::test]
    async fn saturated_queue_refuses_instead_of_blocking() {
        let (queue, _worker) = JobQueue::spawn_with(
            fast_pipeline(),
            QueueOptions {
                capacity: 1,
                history: 8,
            },
        );

        let err = tokio::time::timeout(Duration::from_secs(1), async {
            for _ in 0..8 {
                if let Err(err) = queue.enqueue(sample_event()).await {
                    return err;
                }
            }
            panic!("queue never reported saturation");
        })
        .await
        .expect("enqueue must not block on a full queue");

        assert_eq!(err.error, "queue_full");
    }

    #[tokio::test]
    async fn enqueue_fails_when_worker_is_gone() {
        let (queue, worker) = JobQueue::spawn_with(
            fast_pipeline(),
            QueueOptions {
                capacity: 4,
                history: 4,
            },
        );
        worker.abort();
        let _ = worker.await;

        let err = queue
            .enqueue(sample_event())
            .await
            .expect_err("worker gone");
        assert_eq!(err.error, "queue_send_failed");
    }
}
