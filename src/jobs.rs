//! Background bulk jobs. A single worker drains an mpsc queue; job states
//! live in a shared map so `GET /jobs/{id}` can report queued, live progress,
//! or the final envelope.

use crate::batch::Progress;
use crate::error::SyncEnvelope;
use crate::models::{ApiError, BulkRequest, Marketplace};
use crate::orchestrator;
use crate::store::Store;
use serde::Serialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};
use uuid::Uuid;

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobState>>>,
}

struct Job {
    id: Uuid,
    marketplace: Marketplace,
    request: BulkRequest,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running {
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<Progress>,
    },
    Completed {
        result: SyncEnvelope,
    },
    Failed {
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
    },
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobQueue {
    pub fn spawn(store: Option<Arc<Store>>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(queue_capacity_from_env());
        let statuses = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                {
                    let mut guard = statuses_bg.lock().await;
                    guard.insert(job.id, JobState::Running { progress: None });
                }

                let (progress_tx, mut progress_rx) =
                    watch::channel(Progress { done: 0, total: 0 });
                let mirror_statuses = statuses_bg.clone();
                let job_id = job.id;
                let mirror = tokio::spawn(async move {
                    while progress_rx.changed().await.is_ok() {
                        let progress = *progress_rx.borrow();
                        let mut guard = mirror_statuses.lock().await;
                        guard.insert(
                            job_id,
                            JobState::Running {
                                progress: Some(progress),
                            },
                        );
                    }
                });

                let envelope = orchestrator::run_bulk(
                    store.as_deref(),
                    job.marketplace,
                    job.request,
                    Some(progress_tx),
                )
                .await;
                // the progress sender is dropped inside run_bulk, which ends
                // the mirror loop; wait so no stale Running state lands after
                // the final one
                let _ = mirror.await;

                let state = if envelope.success {
                    JobState::Completed { result: envelope }
                } else {
                    JobState::Failed {
                        error: envelope
                            .error
                            .unwrap_or_else(|| "bulk job failed".to_string()),
                        error_type: envelope.error_type,
                    }
                };
                let mut guard = statuses_bg.lock().await;
                guard.insert(job.id, state);
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue_bulk(
        &self,
        marketplace: Marketplace,
        request: BulkRequest,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.insert(id, JobState::Queued);
        }
        let job = Job {
            id,
            marketplace,
            request,
        };
        self.tx.send(job).await.map_err(|_| ApiError {
            error: "queue_send_failed".into(),
            detail: Some("worker not available".into()),
        })?;
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).cloned().map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}

fn queue_capacity_from_env() -> usize {
    std::env::var("QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StockLine;
    use std::collections::BTreeMap;
    use std::time::Duration;

    #[tokio::test]
    async fn job_runs_to_a_terminal_state() {
        let (queue, _worker) = JobQueue::spawn(None);
        // empty credential bundle: items fail fast, the batch still completes
        let id = queue
            .enqueue_bulk(
                Marketplace::Etsy,
                BulkRequest {
                    action: "bulk_update_stock".into(),
                    connection_id: None,
                    credentials: Some(BTreeMap::new()),
                    products: Vec::new(),
                    stock: vec![StockLine {
                        sku: "A".into(),
                        quantity: 3,
                    }],
                },
            )
            .await
            .unwrap();

        let mut state = None;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            match queue.get(id).await.map(|info| info.state) {
                Some(JobState::Completed { result }) => {
                    state = Some(result);
                    break;
                }
                Some(JobState::Failed { .. }) => panic!("batch should complete with item errors"),
                _ => continue,
            }
        }
        let envelope = state.expect("job never finished");
        assert!(envelope.success);
        let data = envelope.data.unwrap();
        assert_eq!(data["total"], serde_json::json!(1));
        assert_eq!(data["failed"], serde_json::json!(1));
    }

    #[tokio::test]
    async fn bad_action_surfaces_as_failed_job() {
        let (queue, _worker) = JobQueue::spawn(None);
        let id = queue
            .enqueue_bulk(
                Marketplace::Shopify,
                BulkRequest {
                    action: "fetch_orders".into(),
                    connection_id: None,
                    credentials: Some(BTreeMap::new()),
                    products: Vec::new(),
                    stock: Vec::new(),
                },
            )
            .await
            .unwrap();
        let mut failed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if let Some(JobState::Failed { error_type, .. }) =
                queue.get(id).await.map(|info| info.state)
            {
                assert_eq!(error_type.as_deref(), Some("UNSUPPORTED_ACTION"));
                failed = true;
                break;
            }
        }
        assert!(failed, "job never failed");
    }

    #[tokio::test]
    async fn unknown_job_id_is_none() {
        let (queue, _worker) = JobQueue::spawn(None);
        assert!(queue.get(Uuid::new_v4()).await.is_none());
    }
}
