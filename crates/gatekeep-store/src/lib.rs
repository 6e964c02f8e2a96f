// ABOUTME: Persistence layer for gatekeep, moving resource group configurations in and out of SQLite.
// ABOUTME: Provides the store trait and adapter, the transactional importer, and the tree-rebuilding exporter.

pub mod exporter;
pub mod importer;
pub mod sqlite;

pub use exporter::{ExportError, Exporter};
pub use importer::{ImportError, Importer};
pub use sqlite::{ResourceGroupStore, SqliteStore, StoreError};
