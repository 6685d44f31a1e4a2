use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::models::BatchItemResult;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::warn;

/// Concurrency window for multi-item marketplace operations. Deliberately
/// small to stay under marketplace rate limits.
pub const DEFAULT_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}

/// Descriptor attached to each batch input so failures stay attributable
/// after the payload has been consumed by the operation.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub id: String,
    pub label: String,
}

impl BatchItem {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

/// Run `op` over every item with a bounded concurrency window.
///
/// One item's failure never aborts the rest; the output has exactly one entry
/// per input, in input order. `progress` (when supplied) receives a
/// `{done, total}` update each time an item finishes, so a caller can render
/// a live counter. An empty item set is `NO_PRODUCTS`.
pub async fn run<T, F, Fut>(
    items: Vec<(BatchItem, T)>,
    limit: usize,
    progress: Option<watch::Sender<Progress>>,
    op: F,
) -> SyncResult<Vec<BatchItemResult>>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = SyncResult<()>> + Send + 'static,
{
    let total = items.len();
    if total == 0 {
        return Err(SyncError::new(
            ErrorKind::NoProducts,
            "bulk operation received no items",
        ));
    }

    if let Some(tx) = &progress {
        let _ = tx.send(Progress { done: 0, total });
    }

    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let mut set: JoinSet<(usize, BatchItemResult)> = JoinSet::new();
    let mut descriptors = Vec::with_capacity(total);

    for (index, (descriptor, payload)) in items.into_iter().enumerate() {
        descriptors.push(descriptor.clone());
        let semaphore = semaphore.clone();
        let op = op.clone();
        set.spawn(async move {
            // closed only if the set is aborted, which we never do
            let _permit = semaphore.acquire_owned().await;
            let result = match op(payload).await {
                Ok(()) => BatchItemResult {
                    item_id: descriptor.id,
                    item_label: descriptor.label,
                    success: true,
                    error: None,
                },
                Err(err) => BatchItemResult {
                    item_id: descriptor.id,
                    item_label: descriptor.label,
                    success: false,
                    error: Some(err.message().to_string()),
                },
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<BatchItemResult>> = (0..total).map(|_| None).collect();
    let mut done = 0usize;
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(err) => {
                warn!(target: "pazarsync.batch", error = %err, "batch task panicked");
            }
        }
        done += 1;
        if let Some(tx) = &progress {
            let _ = tx.send(Progress { done, total });
        }
    }

    // a panicked task still yields an entry for its item
    let results = slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| BatchItemResult {
                item_id: descriptors[index].id.clone(),
                item_label: descriptors[index].label.clone(),
                success: false,
                error: Some("item processing aborted unexpectedly".to_string()),
            })
        })
        .collect();
    Ok(results)
}

/// Summarize a finished batch for the response payload.
pub fn summarize(results: &[BatchItemResult]) -> serde_json::Value {
    let succeeded = results.iter().filter(|item| item.success).count();
    serde_json::json!({
        "total": results.len(),
        "succeeded": succeeded,
        "failed": results.len() - succeeded,
        "items": results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn items(n: usize) -> Vec<(BatchItem, usize)> {
        (0..n)
            .map(|i| (BatchItem::new(format!("sku-{i}"), format!("Item {i}")), i))
            .collect()
    }

    #[tokio::test]
    async fn one_failure_does_not_shrink_the_result() {
        let results = run(items(5), DEFAULT_WINDOW, None, |i| async move {
            if i == 2 {
                Err(SyncError::api("marketplace rejected item"))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().filter(|r| r.success).count(), 4);
        let failed = &results[2];
        assert_eq!(failed.item_id, "sku-2");
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("marketplace rejected item"));
    }

    #[tokio::test]
    async fn results_preserve_input_order() {
        let results = run(items(8), 2, None, |i| async move {
            // later items finish first
            tokio::time::sleep(std::time::Duration::from_millis((8 - i) as u64)).await;
            Ok(())
        })
        .await
        .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.item_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "sku-0", "sku-1", "sku-2", "sku-3", "sku-4", "sku-5", "sku-6", "sku-7"
            ]
        );
    }

    #[tokio::test]
    async fn progress_counter_reaches_total() {
        let (tx, rx) = watch::channel(Progress { done: 0, total: 0 });
        let results = run(items(5), DEFAULT_WINDOW, Some(tx), |i| async move {
            if i == 2 {
                Err(SyncError::with_status(
                    ErrorKind::ConnectionError,
                    "simulated outage",
                    500,
                ))
            } else {
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(*rx.borrow(), Progress { done: 5, total: 5 });
    }

    #[tokio::test]
    async fn concurrency_never_exceeds_window() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_op = running.clone();
        let peak_op = peak.clone();
        let results = run(items(12), 3, None, move |_| {
            let running = running_op.clone();
            let peak = peak_op.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .await
        .unwrap();
        assert_eq!(results.len(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn empty_batch_is_no_products() {
        let err = run(Vec::<(BatchItem, usize)>::new(), 3, None, |_| async { Ok(()) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoProducts);
    }
}
