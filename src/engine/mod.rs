// ABOUTME: SyncEngine pulls added/updated/deleted change pages for every table into the local store
// ABOUTME: One transaction spans the whole run; cancellation and failures roll everything back

pub mod progress;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};

use crate::error::SyncError;
use crate::feed::{ChangeFeedClient, ChangeRecord, ChangeType, TableCatalog, Watermark};
use crate::policy::SyncPolicy;
use crate::statement::StatementBuilder;
use crate::store::{LocalStore, PreparedStatement, RunTransaction};

pub use progress::{
    ChannelReporter, NoopReporter, ProgressReporter, SyncEvent, TracingReporter,
};

/// Shared cooperative cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Illegal run state transition from {from:?} to {to:?}")]
pub struct InvalidTransition {
    pub from: RunState,
    pub to: RunState,
}

/// Statistics from a synchronisation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub tables_synced: usize,
    pub rows_added: u64,
    pub rows_updated: u64,
    pub rows_deleted: u64,
    pub pages_fetched: usize,
    /// Phases ended early by a failure page, as `table:phase`.
    pub skipped_phases: Vec<String>,
    pub duration_ms: u64,
}

impl SyncStats {
    pub fn rows_applied(&self) -> u64 {
        self.rows_added + self.rows_updated + self.rows_deleted
    }

    fn record_rows(&mut self, change_type: ChangeType, rows: usize) {
        let rows = rows as u64;
        match change_type {
            ChangeType::Added => self.rows_added += rows,
            ChangeType::Updated => self.rows_updated += rows,
            ChangeType::Deleted => self.rows_deleted += rows,
        }
    }
}

/// How a run ended. Rows are only visible in the store for `Completed`.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Completed {
        /// Persist this as the next run's `since`.
        watermark: Watermark,
        stats: SyncStats,
    },
    Cancelled {
        stats: SyncStats,
    },
    Failed {
        message: String,
        stats: SyncStats,
    },
}

impl SyncOutcome {
    pub fn state(&self) -> RunState {
        match self {
            SyncOutcome::Completed { .. } => RunState::Completed,
            SyncOutcome::Cancelled { .. } => RunState::Cancelled,
            SyncOutcome::Failed { .. } => RunState::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SyncOutcome::Completed { .. })
    }

    pub fn watermark(&self) -> Option<Watermark> {
        match self {
            SyncOutcome::Completed { watermark, .. } => Some(*watermark),
            _ => None,
        }
    }

    pub fn stats(&self) -> &SyncStats {
        match self {
            SyncOutcome::Completed { stats, .. }
            | SyncOutcome::Cancelled { stats }
            | SyncOutcome::Failed { stats, .. } => stats,
        }
    }

    /// The terminal progress event for this outcome.
    pub fn event(&self) -> SyncEvent {
        match self {
            SyncOutcome::Completed { watermark, .. } => SyncEvent::Completed {
                watermark: *watermark,
            },
            SyncOutcome::Cancelled { .. } => SyncEvent::Cancelled,
            SyncOutcome::Failed { message, .. } => SyncEvent::Error {
                message: message.clone(),
            },
        }
    }
}

/// Why a run stopped before committing.
#[derive(Debug)]
enum Interrupt {
    Cancelled,
    Failed(SyncError),
}

impl From<SyncError> for Interrupt {
    fn from(e: SyncError) -> Self {
        Interrupt::Failed(e)
    }
}

/// Bookkeeping for a single run: state, cancellation, watermark and stats.
#[derive(Debug)]
pub struct SyncRun {
    state: RunState,
    cancel: CancelFlag,
    watermark: Watermark,
    started: Instant,
    stats: SyncStats,
}

impl SyncRun {
    pub fn new(cancel: CancelFlag) -> Self {
        Self {
            state: RunState::Idle,
            cancel,
            watermark: Watermark::epoch(),
            started: Instant::now(),
            stats: SyncStats::default(),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    /// Watermark a successful run reports; captured on entering `Running`.
    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn transition(&mut self, to: RunState) -> Result<(), InvalidTransition> {
        let legal = match (self.state, to) {
            (RunState::Idle, RunState::Running) => true,
            (RunState::Running, next) => next.is_terminal(),
            _ => false,
        };
        if !legal {
            return Err(InvalidTransition {
                from: self.state,
                to,
            });
        }
        if to == RunState::Running {
            self.watermark = Watermark::now();
            self.started = Instant::now();
        }
        self.state = to;
        Ok(())
    }

    fn finish(&mut self, result: Result<(), Interrupt>) -> SyncOutcome {
        self.stats.duration_ms = self.started.elapsed().as_millis() as u64;
        let stats = self.stats.clone();

        let (next, outcome) = match result {
            Ok(()) => (
                RunState::Completed,
                SyncOutcome::Completed {
                    watermark: self.watermark,
                    stats: stats.clone(),
                },
            ),
            Err(Interrupt::Cancelled) => (
                RunState::Cancelled,
                SyncOutcome::Cancelled {
                    stats: stats.clone(),
                },
            ),
            Err(Interrupt::Failed(e)) => (
                RunState::Failed,
                SyncOutcome::Failed {
                    message: e.to_string(),
                    stats: stats.clone(),
                },
            ),
        };

        match self.transition(next) {
            Ok(()) => outcome,
            Err(e) => SyncOutcome::Failed {
                message: e.to_string(),
                stats,
            },
        }
    }
}

/// SyncEngine reconciles the local store with the remote change feed.
///
/// For every catalog table it runs three phases (added, updated, deleted),
/// paging through the feed until each phase is exhausted. A failure page
/// only ends its own phase; a transport error, a malformed payload, a store
/// error, an aborted feed or cancellation ends the whole run and nothing
/// the run applied is kept.
pub struct SyncEngine<F, C> {
    feed: F,
    catalog: C,
    policy: SyncPolicy,
}

impl<F, C> SyncEngine<F, C>
where
    F: ChangeFeedClient,
    C: TableCatalog,
{
    pub fn new(feed: F, catalog: C, policy: SyncPolicy) -> Self {
        Self {
            feed,
            catalog,
            policy,
        }
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    /// Run one synchronisation of changes made after `since`.
    ///
    /// Never returns an error: every problem becomes a `Failed` outcome, and
    /// exactly one terminal event is reported.
    pub async fn run<S, R>(
        &self,
        store: &mut S,
        since: Watermark,
        reporter: &R,
        cancel: &CancelFlag,
    ) -> SyncOutcome
    where
        S: LocalStore,
        R: ProgressReporter + ?Sized,
    {
        let mut run = SyncRun::new(cancel.clone());
        let result = match run.transition(RunState::Running) {
            Ok(()) => {
                tracing::info!("Starting synchronisation of changes since {}", since);
                self.sync_all(store, since, reporter, &mut run).await
            }
            Err(e) => Err(Interrupt::Failed(SyncError::Store(e.to_string()))),
        };

        let outcome = run.finish(result);
        let stats = outcome.stats();
        match &outcome {
            SyncOutcome::Completed { watermark, .. } => tracing::info!(
                "Synchronisation complete: {} tables, {} added, {} updated, {} deleted in {}ms (next watermark {})",
                stats.tables_synced,
                stats.rows_added,
                stats.rows_updated,
                stats.rows_deleted,
                stats.duration_ms,
                watermark
            ),
            SyncOutcome::Cancelled { .. } => tracing::warn!(
                "Synchronisation cancelled after {}ms, rolled back {} rows",
                stats.duration_ms,
                stats.rows_applied()
            ),
            SyncOutcome::Failed { message, .. } => {
                tracing::error!("Synchronisation failed, rolled back: {}", message)
            }
        }

        reporter.report(outcome.event());
        outcome
    }

    async fn sync_all<S, R>(
        &self,
        store: &mut S,
        since: Watermark,
        reporter: &R,
        run: &mut SyncRun,
    ) -> Result<(), Interrupt>
    where
        S: LocalStore,
        R: ProgressReporter + ?Sized,
    {
        if run.is_cancel_requested() {
            return Err(Interrupt::Cancelled);
        }

        let tables = self.catalog.list_tables().await;
        tracing::info!("Table list downloaded: {} tables", tables.len());
        reporter.report(SyncEvent::TableListLoaded {
            count: tables.len(),
        });

        let mut txn = RunTransaction::begin(store)?;
        let total = tables.len();

        for (i, table) in tables.iter().enumerate() {
            if self.policy.skips_table(table) {
                tracing::info!("Skipping table '{}' (excluded from synchronisation)", table);
                continue;
            }

            for change_type in ChangeType::ALL {
                reporter.report(SyncEvent::PhaseStarted {
                    table: table.clone(),
                    index: i + 1,
                    total,
                    change_type,
                });
                self.sync_phase(&mut txn, table, change_type, since, reporter, run)
                    .await?;
            }
            run.stats.tables_synced += 1;
        }

        txn.commit()?;
        Ok(())
    }

    /// Page through one (table, change type) pair until it is exhausted.
    async fn sync_phase<S, R>(
        &self,
        txn: &mut RunTransaction<'_, S>,
        table: &str,
        change_type: ChangeType,
        since: Watermark,
        reporter: &R,
        run: &mut SyncRun,
    ) -> Result<(), Interrupt>
    where
        S: LocalStore,
        R: ProgressReporter + ?Sized,
    {
        let builder = StatementBuilder::new(&self.policy);
        let mut offset = 0usize;
        let mut count = 0usize;
        let mut total = 1usize;

        while offset + count < total {
            if run.is_cancel_requested() {
                return Err(Interrupt::Cancelled);
            }

            offset += count;
            let page = match self
                .feed
                .fetch_page(change_type, table, since, offset)
                .await?
            {
                Some(page) => page,
                None => {
                    tracing::warn!(
                        "Update server abandoned the run while fetching {} rows for '{}'",
                        change_type,
                        table
                    );
                    return Err(Interrupt::Cancelled);
                }
            };
            run.stats.pages_fetched += 1;

            if !page.is_success() {
                tracing::warn!(
                    "Update server reported a failure for {} rows of '{}', skipping phase",
                    change_type,
                    table
                );
                run.stats
                    .skipped_phases
                    .push(format!("{}:{}", table, change_type));
                return Ok(());
            }

            if page.count == 0 || page.records.is_empty() {
                tracing::debug!("No more {} rows for '{}'", change_type, table);
                return Ok(());
            }

            tracing::debug!(
                "Fetched {} {} rows for '{}' at offset {} of {}",
                page.records.len(),
                change_type,
                table,
                offset,
                page.total_count
            );

            let applied = apply_page(
                txn.store(),
                &builder,
                table,
                change_type,
                &page.records,
                &run.cancel,
            )?;
            run.stats.record_rows(change_type, applied);

            // Advance by what was received so a lying count can never stall paging
            count = page.records.len();
            total = page.total_count;
            reporter.report(SyncEvent::RowApplied {
                table: table.to_string(),
                change_type,
                applied: offset + count,
                total,
            });
        }

        Ok(())
    }
}

impl<F, C> SyncEngine<F, C>
where
    F: ChangeFeedClient + 'static,
    C: TableCatalog + 'static,
{
    /// Move the engine and store onto a background task.
    pub fn spawn<S, R>(self, mut store: S, since: Watermark, reporter: R) -> SyncHandle<S>
    where
        S: LocalStore + 'static,
        R: ProgressReporter + 'static,
    {
        let cancel = CancelFlag::new();
        let flag = cancel.clone();
        let task = tokio::spawn(async move {
            let outcome = self.run(&mut store, since, &reporter, &flag).await;
            (outcome, store)
        });
        SyncHandle { cancel, task }
    }
}

/// A run executing on a background task.
pub struct SyncHandle<S> {
    cancel: CancelFlag,
    task: JoinHandle<(SyncOutcome, S)>,
}

impl<S> SyncHandle<S> {
    /// Ask the run to stop before its next fetch or record.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run, getting the store back.
    pub async fn join(self) -> Result<(SyncOutcome, S), JoinError> {
        self.task.await
    }
}

/// Apply every record of a page with one statement.
///
/// Kept synchronous so the borrowed statement never lives across an await.
fn apply_page<S: LocalStore>(
    store: &mut S,
    builder: &StatementBuilder<'_>,
    table: &str,
    change_type: ChangeType,
    records: &[ChangeRecord],
    cancel: &CancelFlag,
) -> Result<usize, Interrupt> {
    let Some(first) = records.first() else {
        return Ok(0);
    };
    let plan = builder.build(change_type, table, &first.field_names())?;
    let mut statement = store.prepare(&plan.sql)?;

    for record in records {
        if cancel.is_cancelled() {
            return Err(Interrupt::Cancelled);
        }
        plan.bind(&mut statement, record)?;
        statement.execute()?;
    }

    Ok(records.len())
}
