// ABOUTME: Write path: replaces one environment's stored resource groups with a parsed spec tree.
// ABOUTME: Runs the whole replacement in a single transaction; selector targets resolve by full dotted path.

use std::collections::HashMap;

use gatekeep_core::model::{ManagerSpec, ResourceGroupIdTemplate, ResourceGroupSpec};
use gatekeep_core::row::{NewGroup, RowError, SelectorRow};
use thiserror::Error;

use crate::sqlite::{ResourceGroupStore, StoreError};

/// Errors that abort an import. The transaction is rolled back; no
/// partial rows survive.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid selector: {0}")]
    Row(#[from] RowError),

    #[error("selector references unknown resource group \"{0}\"")]
    UnresolvedGroup(String),
}

/// Imports a [`ManagerSpec`] into the store, replacing whatever the
/// target environment held before. Other environments are untouched.
pub struct Importer<'a, S: ResourceGroupStore> {
    store: &'a mut S,
}

impl<'a, S: ResourceGroupStore> Importer<'a, S> {
    pub fn new(store: &'a mut S) -> Self {
        Self { store }
    }

    /// Atomically replace the environment's configuration: the global
    /// cpu quota period, the group tree, and the selectors. A failure
    /// anywhere rolls the whole replacement back.
    pub fn import(&mut self, spec: &ManagerSpec, environment: &str) -> Result<(), ImportError> {
        self.store.begin()?;
        match self.run(spec, environment) {
            Ok(()) => {
                self.store.commit()?;
                tracing::info!(
                    "imported {} root groups and {} selectors for environment {}",
                    spec.root_groups.len(),
                    spec.selectors.len(),
                    environment
                );
                Ok(())
            }
            Err(e) => {
                if let Err(rollback_err) = self.store.rollback() {
                    tracing::error!("rollback failed after import error: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn run(&mut self, spec: &ManagerSpec, environment: &str) -> Result<(), ImportError> {
        // The quota period is deployment-wide, shared by every environment
        let quota = spec.cpu_quota_period.map(|period| period.to_string());
        self.store.replace_cpu_quota_period(quota.as_deref())?;

        self.store.delete_groups(environment)?;

        let mut group_ids: HashMap<ResourceGroupIdTemplate, i64> = HashMap::new();
        for group in &spec.root_groups {
            self.insert_tree(group, None, None, environment, &mut group_ids)?;
        }

        let total = spec.selectors.len() as i64;
        for (position, selector) in spec.selectors.iter().enumerate() {
            let group_id = *group_ids
                .get(&selector.group)
                .ok_or_else(|| ImportError::UnresolvedGroup(selector.group.to_string()))?;
            if selector.user_group.is_some() {
                tracing::warn!(
                    "selector for group {} has a userGroup predicate, which the \
                     database-backed scheduler does not evaluate",
                    selector.group
                );
            }
            let priority = total - position as i64;
            self.store
                .insert_selector(&SelectorRow::from_spec(selector, group_id, priority)?)?;
        }

        Ok(())
    }

    // Depth-first so a node's generated id exists before its children
    // insert, and input order is insertion order.
    fn insert_tree(
        &mut self,
        group: &ResourceGroupSpec,
        parent_id: Option<i64>,
        parent_path: Option<&ResourceGroupIdTemplate>,
        environment: &str,
        group_ids: &mut HashMap<ResourceGroupIdTemplate, i64>,
    ) -> Result<(), ImportError> {
        let path = match parent_path {
            Some(parent) => parent.child(group.name.as_str()),
            None => ResourceGroupIdTemplate::root(group.name.as_str()),
        };

        let id = self
            .store
            .insert_group(&NewGroup::from_spec(group, parent_id, environment))?;
        group_ids.insert(path.clone(), id);

        for sub_group in &group.sub_groups {
            self.insert_tree(sub_group, Some(id), Some(&path), environment, group_ids)?;
        }
        Ok(())
    }
}
