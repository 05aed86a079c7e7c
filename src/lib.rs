// ABOUTME: Library root for aquatest-sync, the incremental AquaTest database synchroniser
// ABOUTME: Exports the change feed, local store, statement builder and sync engine modules

pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod policy;
pub mod state;
pub mod statement;
pub mod store;
pub mod utils;

pub use config::{Config, ServerConfig};
pub use engine::{
    CancelFlag, ProgressReporter, RunState, SyncEngine, SyncEvent, SyncHandle, SyncOutcome,
    SyncRun, SyncStats,
};
pub use error::SyncError;
pub use feed::{ChangeFeedClient, ChangeRecord, ChangeType, Page, PageStatus, TableCatalog, Watermark};
pub use policy::SyncPolicy;
pub use store::{LocalStore, PreparedStatement, SqliteStore};
