// ABOUTME: SQLite-backed resource group store behind the ResourceGroupStore trait.
// ABOUTME: Provides parametrized statements, generated-key inserts, transaction scope, and schema bootstrap.

use std::path::Path;

use gatekeep_core::row::{GroupRow, NewGroup, SelectorRow};
use rusqlite::{Connection, params};
use thiserror::Error;

/// Errors from the storage transport.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// The relational store contract the importer and exporter are written
/// against: environment-scoped deletes, generated-key inserts, ordered
/// loads, and an explicit transaction scope. Tests substitute an
/// in-memory database through the same trait.
pub trait ResourceGroupStore {
    fn begin(&mut self) -> Result<(), StoreError>;
    fn commit(&mut self) -> Result<(), StoreError>;
    fn rollback(&mut self) -> Result<(), StoreError>;

    /// Replace the deployment-wide cpu_quota_period property: the old
    /// row is always removed, a new one is written only when a value is
    /// given. Not environment scoped.
    fn replace_cpu_quota_period(&mut self, value: Option<&str>) -> Result<(), StoreError>;

    /// Delete every resource group row for one environment. Selector
    /// rows and descendant rows go with them via cascading deletes.
    fn delete_groups(&mut self, environment: &str) -> Result<(), StoreError>;

    /// Insert one group row and return its generated id.
    fn insert_group(&mut self, group: &NewGroup) -> Result<i64, StoreError>;

    fn insert_selector(&mut self, selector: &SelectorRow) -> Result<(), StoreError>;

    /// Load all group rows for an environment, in no guaranteed order.
    fn load_groups(&mut self, environment: &str) -> Result<Vec<GroupRow>, StoreError>;

    /// Load an environment's selector rows ordered by descending
    /// priority (highest first). Selector rows whose group row is gone
    /// are included so callers can reject them.
    fn load_selectors(&mut self, environment: &str) -> Result<Vec<SelectorRow>, StoreError>;

    /// Load every stored cpu_quota_period value. Callers enforce the
    /// zero-or-one invariant.
    fn load_cpu_quota_period(&mut self) -> Result<Vec<String>, StoreError>;
}

/// A SQLite-backed implementation of [`ResourceGroupStore`].
pub struct SqliteStore {
    pub(crate) conn: Connection,
}

impl SqliteStore {
    /// Open or create a resource groups database at the given path.
    /// Bootstraps the schema if it does not exist yet.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    /// Open a fresh in-memory database. Used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS resource_groups (
                resource_group_id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                soft_memory_limit TEXT NOT NULL,
                max_queued INTEGER NOT NULL,
                soft_concurrency_limit INTEGER,
                hard_concurrency_limit INTEGER NOT NULL,
                scheduling_policy TEXT,
                scheduling_weight INTEGER,
                jmx_export INTEGER NOT NULL DEFAULT 0,
                soft_cpu_limit TEXT,
                hard_cpu_limit TEXT,
                parent INTEGER REFERENCES resource_groups (resource_group_id) ON DELETE CASCADE,
                environment TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS selectors (
                resource_group_id INTEGER NOT NULL
                    REFERENCES resource_groups (resource_group_id) ON DELETE CASCADE,
                priority INTEGER NOT NULL,
                user_regex TEXT,
                user_group_regex TEXT,
                source_regex TEXT,
                query_type TEXT,
                client_tags TEXT,
                selector_resource_estimate TEXT
            );

            CREATE TABLE IF NOT EXISTS resource_groups_global_properties (
                name TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self { conn })
    }
}

impl ResourceGroupStore for SqliteStore {
    fn begin(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("ROLLBACK;")?;
        Ok(())
    }

    fn replace_cpu_quota_period(&mut self, value: Option<&str>) -> Result<(), StoreError> {
        self.conn
            .execute("DELETE FROM resource_groups_global_properties", [])?;
        if let Some(value) = value {
            self.conn.execute(
                "INSERT INTO resource_groups_global_properties (name, value)
                 VALUES ('cpu_quota_period', ?1)",
                params![value],
            )?;
        }
        Ok(())
    }

    fn delete_groups(&mut self, environment: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM resource_groups WHERE environment = ?1",
            params![environment],
        )?;
        Ok(())
    }

    fn insert_group(&mut self, group: &NewGroup) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO resource_groups (name, soft_memory_limit, max_queued,
                soft_concurrency_limit, hard_concurrency_limit, scheduling_policy,
                scheduling_weight, jmx_export, soft_cpu_limit, hard_cpu_limit,
                parent, environment)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                group.name,
                group.soft_memory_limit,
                group.max_queued,
                group.soft_concurrency_limit,
                group.hard_concurrency_limit,
                group.scheduling_policy,
                group.scheduling_weight,
                group.jmx_export,
                group.soft_cpu_limit,
                group.hard_cpu_limit,
                group.parent,
                group.environment,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_selector(&mut self, selector: &SelectorRow) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO selectors (resource_group_id, priority, user_regex,
                user_group_regex, source_regex, query_type, client_tags,
                selector_resource_estimate)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                selector.resource_group_id,
                selector.priority,
                selector.user_regex,
                selector.user_group_regex,
                selector.source_regex,
                selector.query_type,
                selector.client_tags,
                selector.resource_estimate,
            ],
        )?;
        Ok(())
    }

    fn load_groups(&mut self, environment: &str) -> Result<Vec<GroupRow>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT resource_group_id, name, soft_memory_limit, max_queued,
                soft_concurrency_limit, hard_concurrency_limit, scheduling_policy,
                scheduling_weight, jmx_export, soft_cpu_limit, hard_cpu_limit, parent
             FROM resource_groups
             WHERE environment = ?1",
        )?;

        let rows = stmt.query_map(params![environment], |row| {
            Ok(GroupRow {
                id: row.get(0)?,
                name: row.get(1)?,
                soft_memory_limit: row.get(2)?,
                max_queued: row.get(3)?,
                soft_concurrency_limit: row.get(4)?,
                hard_concurrency_limit: row.get(5)?,
                scheduling_policy: row.get(6)?,
                scheduling_weight: row.get(7)?,
                jmx_export: row.get(8)?,
                soft_cpu_limit: row.get(9)?,
                hard_cpu_limit: row.get(10)?,
                parent: row.get(11)?,
            })
        })?;

        let mut groups = Vec::new();
        for row in rows {
            groups.push(row?);
        }
        Ok(groups)
    }

    fn load_selectors(&mut self, environment: &str) -> Result<Vec<SelectorRow>, StoreError> {
        // LEFT JOIN so a selector whose group row vanished still loads
        // (with no environment to claim it) instead of disappearing;
        // the exporter rejects such rows as corrupt.
        let mut stmt = self.conn.prepare(
            "SELECT S.resource_group_id, S.priority, S.user_regex, S.user_group_regex,
                S.source_regex, S.query_type, S.client_tags, S.selector_resource_estimate
             FROM selectors S
             LEFT JOIN resource_groups R ON (S.resource_group_id = R.resource_group_id)
             WHERE R.environment = ?1 OR R.resource_group_id IS NULL
             ORDER BY S.priority DESC",
        )?;

        let rows = stmt.query_map(params![environment], |row| {
            Ok(SelectorRow {
                resource_group_id: row.get(0)?,
                priority: row.get(1)?,
                user_regex: row.get(2)?,
                user_group_regex: row.get(3)?,
                source_regex: row.get(4)?,
                query_type: row.get(5)?,
                client_tags: row.get(6)?,
                resource_estimate: row.get(7)?,
            })
        })?;

        let mut selectors = Vec::new();
        for row in rows {
            selectors.push(row?);
        }
        Ok(selectors)
    }

    fn load_cpu_quota_period(&mut self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT value FROM resource_groups_global_properties WHERE name = 'cpu_quota_period'",
        )?;

        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut values = Vec::new();
        for row in rows {
            values.push(row?);
        }
        Ok(values)
    }
}
