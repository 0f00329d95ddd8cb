//! Bounded-concurrency fan-out.
//!
//! Every sibling runs to completion before errors are reported, so one
//! failing sub-operation never cancels the others.

use cellstore_core::error::{CellstoreError, Result};
use futures::stream::{self, StreamExt};
use std::future::Future;

/// Outcome of a fan-out, in input order
#[derive(Debug)]
pub struct FanOut<T> {
    pub results: Vec<T>,
    /// Failures with the input position that produced them
    pub errors: Vec<(usize, CellstoreError)>,
}

impl<T> FanOut<T> {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// All results, or the first failure by input position
    pub fn into_result(self) -> Result<Vec<T>> {
        match self.errors.into_iter().next() {
            Some((_, error)) => Err(error),
            None => Ok(self.results),
        }
    }
}

/// Run `f` over `items` with at most `limit` futures in flight
pub async fn fan_out<I, F, Fut, T>(items: I, limit: usize, mut f: F) -> FanOut<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let tasks: Vec<_> = items
        .into_iter()
        .enumerate()
        .map(|(position, item)| {
            let task = f(item);
            async move { (position, task.await) }
        })
        .collect();

    let mut completed = stream::iter(tasks)
        .buffer_unordered(limit.max(1))
        .collect::<Vec<_>>()
        .await;
    completed.sort_by_key(|(position, _)| *position);

    let mut outcome = FanOut { results: Vec::with_capacity(completed.len()), errors: Vec::new() };
    for (position, result) in completed {
        match result {
            Ok(value) => outcome.results.push(value),
            Err(error) => outcome.errors.push((position, error)),
        }
    }
    outcome
}
