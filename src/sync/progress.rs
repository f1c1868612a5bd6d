//! Progress reporting for synchronization runs.

use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// Point-in-time progress snapshot of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynchronizeEvent {
    /// Units finished so far.
    pub completed: usize,
    /// Units in the run, fixed once enumeration completes.
    pub total: usize,
    /// Percentage in `0..=100`.
    pub progress: u8,
    /// Time since the run started.
    pub duration: Duration,
}

impl SynchronizeEvent {
    pub fn is_final(&self) -> bool {
        self.completed >= self.total
    }
}

/// Observer for [`SynchronizeEvent`]s.
///
/// Called synchronously once per finished unit, including units that were
/// skipped or failed. Events of one run have strictly increasing
/// `completed`; nothing is promised about which document each event
/// belongs to.
pub trait SynchronizeListener: Send + Sync {
    fn on_event(&self, event: SynchronizeEvent);
}

impl<F> SynchronizeListener for F
where
    F: Fn(SynchronizeEvent) + Send + Sync,
{
    fn on_event(&self, event: SynchronizeEvent) {
        self(event)
    }
}

/// Forward events into an unbounded channel.
pub fn channel_listener(tx: mpsc::UnboundedSender<SynchronizeEvent>) -> impl SynchronizeListener {
    move |event: SynchronizeEvent| {
        // A dropped receiver only means nobody is watching
        let _ = tx.send(event);
    }
}

/// Percentage of `completed` over `total`, rounded. An empty run is done.
pub fn percentage(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = completed.min(total);
    ((completed as f64 * 100.0 / total as f64).round()) as u8
}

/// Turns a completed count into [`SynchronizeEvent`]s for one run.
#[derive(Debug, Clone, Copy)]
pub struct ProgressTracker {
    total: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize, started: Instant) -> Self {
        Self { total, started }
    }

    /// Start tracking now.
    pub fn start(total: usize) -> Self {
        Self::new(total, Instant::now())
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn snapshot(&self, completed: usize) -> SynchronizeEvent {
        SynchronizeEvent {
            completed,
            total: self.total,
            progress: percentage(completed, self.total),
            duration: self.started.elapsed(),
        }
    }
}
