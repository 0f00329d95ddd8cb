//! Chunked, retried bulk writes against the index store.
//!
//! Items are split into `BATCH_LIMIT`-sized chunks dispatched with a small
//! concurrency cap. Each chunk retries unprocessed items and retryable errors
//! with backoff; when the budget runs out the caller gets a retryable error.

use cellstore_core::error::{CellstoreError, Result};
use cellstore_core::models::{Item, ItemKey};
use cellstore_core::ports::{IndexStore, BATCH_LIMIT};
use std::future::Future;
use std::sync::Arc;

use crate::fanout::fan_out;
use crate::retry::RetryPolicy;

/// Bulk writer with a retry budget
#[derive(Clone)]
pub struct BatchWriter {
    store: Arc<dyn IndexStore>,
    policy: RetryPolicy,
    concurrency: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn IndexStore>, policy: RetryPolicy, concurrency: usize) -> Self {
        Self { store, policy, concurrency: concurrency.max(1) }
    }

    /// Write every item, unguarded
    pub async fn put_all(&self, items: Vec<Item>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        let total = items.len();
        let chunks = chunked(items);
        let outcome = fan_out(chunks, self.concurrency, |chunk| {
            let store = self.store.clone();
            let policy = self.policy;
            async move {
                retry_batch(chunk, policy, |pending| {
                    let store = store.clone();
                    async move { store.batch_put(pending).await }
                })
                .await
            }
        })
        .await;
        tracing::debug!(items = total, failed_chunks = outcome.errors.len(), "Batch put");
        outcome.into_result().map(|_| ())
    }

    /// Delete every key; absent keys are fine
    pub async fn delete_all(&self, keys: Vec<ItemKey>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let total = keys.len();
        let chunks = chunked(keys);
        let outcome = fan_out(chunks, self.concurrency, |chunk| {
            let store = self.store.clone();
            let policy = self.policy;
            async move {
                retry_batch(chunk, policy, |pending| {
                    let store = store.clone();
                    async move { store.batch_delete(pending).await }
                })
                .await
            }
        })
        .await;
        tracing::debug!(items = total, failed_chunks = outcome.errors.len(), "Batch delete");
        outcome.into_result().map(|_| ())
    }
}

fn chunked<T>(items: Vec<T>) -> Vec<Vec<T>> {
    let mut chunks = Vec::with_capacity(items.len().div_ceil(BATCH_LIMIT));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        chunks.push(iter.by_ref().take(BATCH_LIMIT).collect());
    }
    chunks
}

/// Submit `items` until the store has processed all of them or the attempt
/// budget is spent
pub async fn retry_batch<T, F, Fut>(items: Vec<T>, policy: RetryPolicy, mut submit: F) -> Result<()>
where
    T: Clone,
    F: FnMut(Vec<T>) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut pending = items;
    let mut last_error: Option<CellstoreError> = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.backoff(attempt - 1, pending.len() as u64)).await;
        }
        match submit(pending.clone()).await {
            Ok(unprocessed) if unprocessed.is_empty() => return Ok(()),
            Ok(unprocessed) => {
                tracing::debug!(
                    attempt,
                    unprocessed = unprocessed.len(),
                    "Batch partially processed, retrying"
                );
                pending = unprocessed;
                last_error = None;
            }
            Err(e) if e.is_retryable() => {
                tracing::debug!(attempt, error = %e, "Batch failed with retryable error");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(match last_error {
        Some(CellstoreError::Transient(reason)) => CellstoreError::Transient(reason),
        Some(e) => CellstoreError::Throttled(format!(
            "{} items still pending after {} attempts: {}",
            pending.len(),
            policy.max_attempts,
            e
        )),
        None => CellstoreError::Throttled(format!(
            "{} items unprocessed after {} attempts",
            pending.len(),
            policy.max_attempts
        )),
    })
}
