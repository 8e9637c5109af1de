//! Bounded worker pool over independent units of work.
//!
//! A unit that fails (or panics) is recorded and never stops its siblings.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure<U> {
    pub unit: U,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOutcome<U, R> {
    pub succeeded: Vec<R>,
    pub failed: Vec<UnitFailure<U>>,
}

impl<U, R> Default for PoolOutcome<U, R> {
    fn default() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<U, R> PoolOutcome<U, R> {
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Runs every unit through `work` with at most `concurrency` in flight.
/// Results arrive in completion order.
pub async fn run_all<U, R, F, Fut>(units: Vec<U>, concurrency: usize, work: F) -> PoolOutcome<U, R>
where
    U: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(U) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    run_pass(units, concurrency, Arc::new(work)).await
}

/// [`run_all`], then exactly one more pass over the units that failed.
pub async fn run_with_retry<U, R, F, Fut>(
    units: Vec<U>,
    concurrency: usize,
    work: F,
) -> PoolOutcome<U, R>
where
    U: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(U) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let work = Arc::new(work);
    let mut outcome = run_pass(units, concurrency, Arc::clone(&work)).await;
    if outcome.failed.is_empty() {
        return outcome;
    }

    let retry_units = std::mem::take(&mut outcome.failed)
        .into_iter()
        .map(|f| f.unit)
        .collect::<Vec<_>>();
    tracing::info!(units = retry_units.len(), "retrying failed units");
    let retried = run_pass(retry_units, concurrency, work).await;
    outcome.succeeded.extend(retried.succeeded);
    outcome.failed = retried.failed;
    outcome
}

async fn run_pass<U, R, F, Fut>(units: Vec<U>, concurrency: usize, work: Arc<F>) -> PoolOutcome<U, R>
where
    U: Clone + Send + 'static,
    R: Send + 'static,
    F: Fn(U) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
{
    let concurrency = concurrency.max(1);
    let mut outcome = PoolOutcome::default();
    let mut join_set = tokio::task::JoinSet::new();
    let mut in_flight: HashMap<tokio::task::Id, U> = HashMap::new();
    let mut pending = units.into_iter();

    loop {
        while join_set.len() < concurrency {
            let Some(unit) = pending.next() else {
                break;
            };
            let work = Arc::clone(&work);
            let task_unit = unit.clone();
            let handle = join_set.spawn(async move { work(task_unit).await });
            in_flight.insert(handle.id(), unit);
        }

        let Some(joined) = join_set.join_next_with_id().await else {
            break;
        };
        match joined {
            Ok((id, Ok(result))) => {
                in_flight.remove(&id);
                outcome.succeeded.push(result);
            }
            Ok((id, Err(err))) => {
                if let Some(unit) = in_flight.remove(&id) {
                    outcome.failed.push(UnitFailure {
                        unit,
                        error: format!("{err:#}"),
                    });
                }
            }
            Err(join_err) => {
                if let Some(unit) = in_flight.remove(&join_err.id()) {
                    tracing::error!(error = %join_err, "unit task panicked");
                    outcome.failed.push(UnitFailure {
                        unit,
                        error: format!("unit task failed: {join_err}"),
                    });
                }
            }
        }
    }

    outcome
}
