//! Kuro Core - scanning, reconciliation and consistency checking of a manga
//! content tree against its relational index.

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod health;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod reconcile;
pub mod scanner;
pub mod store;

pub use cache::{Clock, ManualClock, ScanCache, SystemClock};
pub use config::{default_config_path, load_file_config, DbConfig, FileConfig, IndexerConfig};
pub use engine::{Engine, IndexOutcome, IndexRequest, Indexed, TriggerResponse};
pub use error::AppError;
pub use health::{BrokenChapter, HealthReport};
pub use ledger::{RunHandle, RunHistory, RunKind, RunLedger, RunRecord, RunStatus};
pub use models::{Chapter, DatabaseStats, IndexView, Page, Removed, Title};
pub use reconcile::{ReconcileReport, ReconcileStats, Reconciler, Scope};
pub use scanner::{Scanner, Snapshot};
pub use store::IndexStore;
