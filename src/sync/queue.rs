//! Bounded-concurrency runner for independent units of work.

use anyhow::Result;
use futures::future::BoxFuture;
use futures::{stream, FutureExt, StreamExt};
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::warn;

type Unit<'a> = Box<dyn FnOnce() -> BoxFuture<'a, Result<()>> + Send + 'a>;

/// A unit that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Label the unit was enqueued with.
    pub label: String,
    /// Rendered error chain or panic message.
    pub error: String,
}

/// Outcome of [`WorkQueue::execute`].
#[derive(Debug, Default)]
pub struct QueueReport {
    /// Units that ran to completion, successfully or not.
    pub completed: usize,
    pub failures: Vec<UnitFailure>,
}

impl QueueReport {
    pub fn succeeded(&self) -> usize {
        self.completed - self.failures.len()
    }
}

/// Runs queued async units with at most `concurrency` in flight.
///
/// Units run on the task that awaits [`WorkQueue::execute`], so they may
/// borrow from the caller. Completion order is unspecified. A failing or
/// panicking unit is recorded and never stops its siblings.
pub struct WorkQueue<'a> {
    concurrency: usize,
    units: Vec<(String, Unit<'a>)>,
}

impl<'a> WorkQueue<'a> {
    /// Create a queue. A concurrency of zero is treated as one.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            units: Vec::new(),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Add a unit. Nothing runs until [`WorkQueue::execute`].
    pub fn enqueue<F, Fut>(&mut self, label: impl Into<String>, unit: F)
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        self.units
            .push((label.into(), Box::new(move || unit().boxed())));
    }

    /// Run every unit and wait for all of them.
    pub async fn execute(self) -> QueueReport {
        let outcomes: Vec<(String, Result<(), String>)> = stream::iter(self.units)
            .map(|(label, unit)| async move {
                let outcome = AssertUnwindSafe(async move { unit().await })
                    .catch_unwind()
                    .await;
                let outcome = match outcome {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!("{:#}", e)),
                    Err(panic) => Err(format!("unit panicked: {}", panic_message(&*panic))),
                };
                (label, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = QueueReport::default();
        for (label, outcome) in outcomes {
            report.completed += 1;
            if let Err(error) = outcome {
                warn!(unit = %label, %error, "Unit of work failed");
                report.failures.push(UnitFailure { label, error });
            }
        }
        report
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
