// ABOUTME: Progress events emitted by a synchronisation run and the observers that receive them
// ABOUTME: Delivery is fire-and-forget; a reporter can never block or fail the engine

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::feed::{ChangeType, Watermark};

/// Something that happened during a run, in the order it happened.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    TableListLoaded {
        count: usize,
    },
    PhaseStarted {
        table: String,
        /// One-based position of the table in the catalog.
        index: usize,
        total: usize,
        change_type: ChangeType,
    },
    /// A page was applied; `applied` counts records so far in the phase.
    RowApplied {
        table: String,
        change_type: ChangeType,
        applied: usize,
        total: usize,
    },
    Completed {
        watermark: Watermark,
    },
    Cancelled,
    Error {
        message: String,
    },
}

impl SyncEvent {
    /// Whether this event ends the run. Exactly one is emitted per run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SyncEvent::Completed { .. } | SyncEvent::Cancelled | SyncEvent::Error { .. }
        )
    }
}

impl fmt::Display for SyncEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncEvent::TableListLoaded { count } => {
                write!(f, "Table list downloaded: {} tables found.", count)
            }
            SyncEvent::PhaseStarted {
                table,
                index,
                total,
                change_type,
            } => write!(
                f,
                "{} (table {}/{}): {}",
                table,
                index,
                total,
                change_type.description()
            ),
            SyncEvent::RowApplied { applied, total, .. } => write!(f, "[{}/{}]", applied, total),
            SyncEvent::Completed { .. } => f.write_str("Update complete!"),
            SyncEvent::Cancelled => f.write_str("Update cancelled!"),
            SyncEvent::Error { message } => f.write_str(message),
        }
    }
}

/// Observer of a run's progress.
///
/// Called inline from the engine task, so implementations must return
/// promptly and swallow their own delivery failures.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: SyncEvent);
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for &T {
    fn report(&self, event: SyncEvent) {
        (**self).report(event)
    }
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for Box<T> {
    fn report(&self, event: SyncEvent) {
        (**self).report(event)
    }
}

impl<T: ProgressReporter + ?Sized> ProgressReporter for Arc<T> {
    fn report(&self, event: SyncEvent) {
        (**self).report(event)
    }
}

/// Forwards events over an unbounded channel to another task.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, event: SyncEvent) {
        // A dropped receiver just means nobody is watching any more
        let _ = self.tx.send(event);
    }
}

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, event: SyncEvent) {
        match &event {
            SyncEvent::RowApplied {
                table, change_type, ..
            } => tracing::debug!("{} {}: {}", table, change_type, event),
            SyncEvent::Cancelled => tracing::warn!("{}", event),
            SyncEvent::Error { .. } => tracing::error!("{}", event),
            _ => tracing::info!("{}", event),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _event: SyncEvent) {}
}
