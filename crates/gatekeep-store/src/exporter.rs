// ABOUTME: Read path: rebuilds the nested resource group tree from unordered parent-pointer rows.
// ABOUTME: Uses an id-indexed arena with pending-children counters; dequeues are bounded by row count so corrupt data cannot loop.

use std::collections::{HashMap, VecDeque};

use gatekeep_core::model::{ManagerSpec, ResourceGroupIdTemplate, ResourceGroupSpec, SelectorSpec};
use gatekeep_core::row::{GroupRow, RowError};
use gatekeep_core::units::TimeSpan;
use thiserror::Error;

use crate::sqlite::{ResourceGroupStore, StoreError};

/// Errors that abort an export.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("corrupt resource group state: {0}")]
    Corrupt(String),
}

impl From<RowError> for ExportError {
    fn from(e: RowError) -> Self {
        ExportError::Corrupt(e.to_string())
    }
}

/// Rebuilds a [`ManagerSpec`] from one environment's stored rows.
pub struct Exporter<'a, S: ResourceGroupStore> {
    store: &'a mut S,
}

impl<'a, S: ResourceGroupStore> Exporter<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Load the environment's rows and reconstruct the tree, the
    /// selectors (in stored priority order, highest first), and the
    /// global cpu quota period.
    pub fn export(&mut self, environment: &str) -> Result<ManagerSpec, ExportError> {
        let rows = self.store.load_groups(environment)?;

        let mut arena: HashMap<i64, GroupRow> = HashMap::with_capacity(rows.len());
        let mut roots: Vec<i64> = Vec::new();
        let mut children: HashMap<i64, Vec<i64>> = HashMap::new();
        for row in rows {
            match row.parent {
                Some(parent) => children.entry(parent).or_default().push(row.id),
                None => roots.push(row.id),
            }
            arena.insert(row.id, row);
        }
        // Generated ids ascend in insertion order, so sorting recovers
        // the original sibling order from an unordered load.
        roots.sort_unstable();
        for siblings in children.values_mut() {
            siblings.sort_unstable();
        }

        let templates = assign_templates(&arena, &roots, &children)?;
        let root_groups = build_tree(arena, &roots, &children)?;

        let selector_rows = self.store.load_selectors(environment)?;
        let mut selectors: Vec<SelectorSpec> = Vec::with_capacity(selector_rows.len());
        for row in selector_rows {
            let group = templates
                .get(&row.resource_group_id)
                .cloned()
                .ok_or_else(|| {
                    ExportError::Corrupt(format!(
                        "selector row references resource group id {} with no backing row",
                        row.resource_group_id
                    ))
                })?;
            selectors.push(row.into_spec(group)?);
        }

        let cpu_quota_period = self.load_quota_period()?;

        tracing::info!(
            "exported {} root groups and {} selectors for environment {}",
            root_groups.len(),
            selectors.len(),
            environment
        );

        Ok(ManagerSpec {
            root_groups,
            selectors,
            cpu_quota_period,
        })
    }

    fn load_quota_period(&mut self) -> Result<Option<TimeSpan>, ExportError> {
        let mut values = self.store.load_cpu_quota_period()?;
        match values.len() {
            0 => Ok(None),
            1 => {
                let value = values.remove(0);
                let period = value.parse::<TimeSpan>().map_err(|e| {
                    ExportError::Corrupt(format!("invalid cpu_quota_period value \"{value}\": {e}"))
                })?;
                Ok(Some(period))
            }
            n => Err(ExportError::Corrupt(format!(
                "expected zero or one cpu_quota_period rows, found {n}"
            ))),
        }
    }
}

/// Walk the children map down from the roots, giving every reachable
/// node its dotted path. Rows the walk never reaches sit on a cycle or
/// hang off a missing parent; either way the stored tree is corrupt.
fn assign_templates(
    arena: &HashMap<i64, GroupRow>,
    roots: &[i64],
    children: &HashMap<i64, Vec<i64>>,
) -> Result<HashMap<i64, ResourceGroupIdTemplate>, ExportError> {
    let mut templates: HashMap<i64, ResourceGroupIdTemplate> = HashMap::with_capacity(arena.len());
    let mut queue: VecDeque<i64> = roots.iter().copied().collect();

    while let Some(id) = queue.pop_front() {
        let row = arena.get(&id).ok_or_else(|| {
            ExportError::Corrupt(format!("resource group row {id} referenced but not loaded"))
        })?;
        let template = match row.parent {
            None => ResourceGroupIdTemplate::root(row.name.as_str()),
            // Parents are enqueued before their children, so the
            // parent's template is always present here.
            Some(parent) => templates
                .get(&parent)
                .ok_or_else(|| {
                    ExportError::Corrupt(format!("parent {parent} of row {id} has no id template"))
                })?
                .child(row.name.as_str()),
        };
        templates.insert(id, template);

        if let Some(kids) = children.get(&id) {
            queue.extend(kids.iter().copied());
        }
    }

    if templates.len() != arena.len() {
        return Err(ExportError::Corrupt(format!(
            "{} of {} resource group rows unreachable from any root (cycle or orphaned parent pointer)",
            arena.len() - templates.len(),
            arena.len()
        )));
    }
    Ok(templates)
}

/// Build specs leaves-first. A node enters the worklist once its
/// pending-children counter hits zero, so every subgroup is already
/// built when its parent is finalized, regardless of load order.
fn build_tree(
    mut arena: HashMap<i64, GroupRow>,
    roots: &[i64],
    children: &HashMap<i64, Vec<i64>>,
) -> Result<Vec<ResourceGroupSpec>, ExportError> {
    let total = arena.len();
    let mut pending: HashMap<i64, usize> = HashMap::with_capacity(total);
    for id in arena.keys() {
        pending.insert(*id, children.get(id).map_or(0, Vec::len));
    }

    let mut leaves: Vec<i64> = pending
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(id, _)| *id)
        .collect();
    leaves.sort_unstable();
    let mut worklist: VecDeque<i64> = leaves.into();

    let mut built: HashMap<i64, ResourceGroupSpec> = HashMap::new();
    let mut dequeued = 0usize;
    while let Some(id) = worklist.pop_front() {
        dequeued += 1;
        if dequeued > total {
            return Err(ExportError::Corrupt(format!(
                "tree build exceeded {total} steps for {total} rows"
            )));
        }

        let row = arena.remove(&id).ok_or_else(|| {
            ExportError::Corrupt(format!("resource group row {id} finalized twice"))
        })?;
        let parent = row.parent;

        let sub_groups = match children.get(&id) {
            Some(kids) => {
                let mut sub_groups = Vec::with_capacity(kids.len());
                for child in kids {
                    sub_groups.push(built.remove(child).ok_or_else(|| {
                        ExportError::Corrupt(format!("subgroup row {child} of group {id} was never built"))
                    })?);
                }
                sub_groups
            }
            None => Vec::new(),
        };
        built.insert(id, row.into_spec(sub_groups)?);

        if let Some(parent_id) = parent {
            let count = pending.get_mut(&parent_id).ok_or_else(|| {
                ExportError::Corrupt(format!("parent {parent_id} of row {id} not loaded"))
            })?;
            *count -= 1;
            if *count == 0 {
                worklist.push_back(parent_id);
            }
        }
    }

    let mut root_groups = Vec::with_capacity(roots.len());
    for id in roots {
        root_groups.push(built.remove(id).ok_or_else(|| {
            ExportError::Corrupt(format!("root resource group row {id} was never built"))
        })?);
    }
    Ok(root_groups)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importer::Importer;
    use crate::sqlite::SqliteStore;
    use gatekeep_core::codec::parse_str;
    use gatekeep_core::row::NewGroup;

    fn import(store: &mut SqliteStore, document: &str, environment: &str) {
        let spec = parse_str(document).unwrap();
        Importer::new(store).import(&spec, environment).unwrap();
    }

    fn plain_group(name: &str, parent: Option<i64>) -> NewGroup {
        NewGroup {
            name: name.to_string(),
            soft_memory_limit: "50%".to_string(),
            max_queued: 10,
            soft_concurrency_limit: None,
            hard_concurrency_limit: 5,
            scheduling_policy: None,
            scheduling_weight: None,
            jmx_export: false,
            soft_cpu_limit: None,
            hard_cpu_limit: None,
            parent,
            environment: "test".to_string(),
        }
    }

    const NESTED: &str = r#"{
        "rootGroups": [
            {
                "name": "global",
                "softMemoryLimit": "80%",
                "hardConcurrencyLimit": 100,
                "maxQueued": 1000,
                "schedulingPolicy": "weighted",
                "schedulingWeight": 10,
                "jmxExport": true,
                "softCpuLimit": "30m",
                "hardCpuLimit": "1h",
                "subGroups": [
                    {"name": "adhoc", "softMemoryLimit": "10%", "hardConcurrencyLimit": 5, "maxQueued": 20,
                     "subGroups": [{"name": "${USER}", "softMemoryLimit": "5%", "hardConcurrencyLimit": 1, "maxQueued": 5}]},
                    {"name": "etl", "softMemoryLimit": "1GB", "hardConcurrencyLimit": 10, "maxQueued": 100}
                ]
            },
            {"name": "admin", "softMemoryLimit": "10%", "hardConcurrencyLimit": 2, "maxQueued": 5, "softConcurrencyLimit": 1}
        ],
        "selectors": [
            {"user": "bob", "clientTags": ["adhoc"], "group": "global.adhoc.${USER}"},
            {"source": "etl-pipeline", "queryType": "INSERT", "group": "global.etl"},
            {"group": "admin"}
        ],
        "cpuQuotaPeriod": "1h"
    }"#;

    #[test]
    fn export_round_trips_an_imported_tree() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, NESTED, "test");

        let expected = parse_str(NESTED).unwrap();
        let exported = Exporter::new(&mut store).export("test").unwrap();

        assert_eq!(exported, expected);
    }

    #[test]
    fn export_rebuilds_id_template_paths() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        import(&mut store, NESTED, "test");

        let exported = Exporter::new(&mut store).export("test").unwrap();
        let paths: Vec<String> = exported
            .selectors
            .iter()
            .map(|s| s.group.to_string())
            .collect();
        assert_eq!(paths, vec!["global.adhoc.${USER}", "global.etl", "admin"]);
    }

    #[test]
    fn export_of_empty_environment_is_empty() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        let exported = Exporter::new(&mut store).export("nothing-here").unwrap();

        assert!(exported.root_groups.is_empty());
        assert!(exported.selectors.is_empty());
        assert!(exported.cpu_quota_period.is_none());
    }

    #[test]
    fn export_orders_roots_and_siblings_by_insertion() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let first = store.insert_group(&plain_group("first", None)).unwrap();
        store.insert_group(&plain_group("child-a", Some(first))).unwrap();
        store.insert_group(&plain_group("child-b", Some(first))).unwrap();
        store.insert_group(&plain_group("second", None)).unwrap();

        let exported = Exporter::new(&mut store).export("test").unwrap();
        let names: Vec<&str> = exported.root_groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let child_names: Vec<&str> = exported.root_groups[0]
            .sub_groups
            .iter()
            .map(|g| g.name.as_str())
            .collect();
        assert_eq!(child_names, vec!["child-a", "child-b"]);
    }

    #[test]
    fn parent_pointer_cycle_is_detected() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        let a = store.insert_group(&plain_group("a", None)).unwrap();
        let b = store.insert_group(&plain_group("b", Some(a))).unwrap();
        store
            .conn
            .execute(
                "UPDATE resource_groups SET parent = ?1 WHERE resource_group_id = ?2",
                rusqlite::params![b, a],
            )
            .unwrap();

        let err = Exporter::new(&mut store).export("test").unwrap_err();
        assert!(matches!(err, ExportError::Corrupt(ref msg) if msg.contains("unreachable")));
    }

    #[test]
    fn orphaned_parent_pointer_is_detected() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.insert_group(&plain_group("ok", None)).unwrap();
        let orphan = store.insert_group(&plain_group("orphan", None)).unwrap();
        store.conn.execute_batch("PRAGMA foreign_keys=OFF;").unwrap();
        store
            .conn
            .execute(
                "UPDATE resource_groups SET parent = 9999 WHERE resource_group_id = ?1",
                rusqlite::params![orphan],
            )
            .unwrap();

        let err = Exporter::new(&mut store).export("test").unwrap_err();
        assert!(matches!(err, ExportError::Corrupt(_)));
    }

    #[test]
    fn dangling_selector_reference_is_detected() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.insert_group(&plain_group("g", None)).unwrap();
        store.conn.execute_batch("PRAGMA foreign_keys=OFF;").unwrap();
        store
            .conn
            .execute(
                "INSERT INTO selectors (resource_group_id, priority) VALUES (9999, 1)",
                [],
            )
            .unwrap();

        let err = Exporter::new(&mut store).export("test").unwrap_err();
        assert!(matches!(err, ExportError::Corrupt(ref msg) if msg.contains("9999")));
    }

    #[test]
    fn corrupt_limit_column_is_detected() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.insert_group(&plain_group("g", None)).unwrap();
        store
            .conn
            .execute(
                "UPDATE resource_groups SET soft_memory_limit = 'garbage'",
                [],
            )
            .unwrap();

        let err = Exporter::new(&mut store).export("test").unwrap_err();
        assert!(matches!(err, ExportError::Corrupt(ref msg) if msg.contains("soft_memory_limit")));
    }

    #[test]
    fn corrupt_quota_period_is_detected() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.replace_cpu_quota_period(Some("nonsense")).unwrap();

        let err = Exporter::new(&mut store).export("test").unwrap_err();
        assert!(matches!(err, ExportError::Corrupt(ref msg) if msg.contains("cpu_quota_period")));
    }
}
