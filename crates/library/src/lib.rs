mod cache;
pub mod catalog;
pub mod classify;
pub mod config;
mod error;
pub mod genre;
pub mod reconcile;
pub mod scanner;
pub mod status;
pub mod sync;

pub use catalog::{Catalog, CategorySummary, GenreChange, GenreRenormalization};
pub use classify::{classify_path, PathClassification, PathClassifier};
pub use config::{config_path_from_env, load_config, resolve_path, ConfigError, ScanConfig};
pub use error::LibraryError;
pub use genre::normalize_genre;
pub use reconcile::{reconcile, FieldSource, FileFacts, Reconciled};
pub use scanner::ScanManager;
pub use status::{CancelToken, ScanPhase, ScanSession, ScanStatus, StatusHandle};
pub use sync::{CatalogSync, Prober, RecordStore, SyncReport, SystemProber, ROOT_GROUP};
