// ABOUTME: Flat database row shapes for resource groups and selectors, plus row/tree field conversions.
// ABOUTME: Rows carry limit columns as the same rendered strings the database stores; parents are numeric ids, not objects.

use thiserror::Error;

use crate::model::{ResourceGroupIdTemplate, ResourceGroupSpec, SelectorSpec};
use crate::units::UnitError;

/// Errors from converting between rows and spec nodes.
#[derive(Debug, Error)]
pub enum RowError {
    #[error("invalid soft_memory_limit column: {0}")]
    MemoryLimit(UnitError),

    #[error("invalid cpu limit column: {0}")]
    CpuLimit(UnitError),

    #[error("invalid scheduling_policy column: {0}")]
    SchedulingPolicy(#[from] crate::model::InvalidSchedulingPolicy),

    #[error("invalid client_tags column: {0}")]
    ClientTags(#[from] serde_json::Error),
}

/// A resource group row as read back from storage: the generated id,
/// the limit columns, and the parent pointer. The environment column is
/// part of the query, not the row.
#[derive(Debug, Clone)]
pub struct GroupRow {
    pub id: i64,
    pub name: String,
    pub soft_memory_limit: String,
    pub max_queued: u32,
    pub soft_concurrency_limit: Option<u32>,
    pub hard_concurrency_limit: u32,
    pub scheduling_policy: Option<String>,
    pub scheduling_weight: Option<u32>,
    pub jmx_export: bool,
    pub soft_cpu_limit: Option<String>,
    pub hard_cpu_limit: Option<String>,
    pub parent: Option<i64>,
}

impl GroupRow {
    /// Rebuild a spec node from this row and its already-built subgroups.
    /// Fails when a stored column no longer parses as the value type it
    /// was rendered from.
    pub fn into_spec(self, sub_groups: Vec<ResourceGroupSpec>) -> Result<ResourceGroupSpec, RowError> {
        Ok(ResourceGroupSpec {
            name: self.name,
            soft_memory_limit: self
                .soft_memory_limit
                .parse()
                .map_err(RowError::MemoryLimit)?,
            hard_concurrency_limit: self.hard_concurrency_limit,
            max_queued: self.max_queued,
            soft_concurrency_limit: self.soft_concurrency_limit,
            scheduling_policy: self
                .scheduling_policy
                .as_deref()
                .map(str::parse)
                .transpose()?,
            scheduling_weight: self.scheduling_weight,
            jmx_export: if self.jmx_export { Some(true) } else { None },
            soft_cpu_limit: self
                .soft_cpu_limit
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(RowError::CpuLimit)?,
            hard_cpu_limit: self
                .hard_cpu_limit
                .as_deref()
                .map(str::parse)
                .transpose()
                .map_err(RowError::CpuLimit)?,
            sub_groups,
        })
    }
}

/// A resource group row about to be inserted: no id yet, parent already
/// resolved to a generated id, environment tag attached.
#[derive(Debug, Clone)]
pub struct NewGroup {
    pub name: String,
    pub soft_memory_limit: String,
    pub max_queued: u32,
    pub soft_concurrency_limit: Option<u32>,
    pub hard_concurrency_limit: u32,
    pub scheduling_policy: Option<String>,
    pub scheduling_weight: Option<u32>,
    pub jmx_export: bool,
    pub soft_cpu_limit: Option<String>,
    pub hard_cpu_limit: Option<String>,
    pub parent: Option<i64>,
    pub environment: String,
}

impl NewGroup {
    /// Render a spec node into its column values. Limits become the same
    /// strings the JSON form uses; an absent jmxExport stores as false.
    pub fn from_spec(spec: &ResourceGroupSpec, parent: Option<i64>, environment: &str) -> Self {
        Self {
            name: spec.name.clone(),
            soft_memory_limit: spec.soft_memory_limit.to_string(),
            max_queued: spec.max_queued,
            soft_concurrency_limit: spec.soft_concurrency_limit,
            hard_concurrency_limit: spec.hard_concurrency_limit,
            scheduling_policy: spec.scheduling_policy.map(|p| p.to_string()),
            scheduling_weight: spec.scheduling_weight,
            jmx_export: spec.jmx_export.unwrap_or(false),
            soft_cpu_limit: spec.soft_cpu_limit.map(|l| l.to_string()),
            hard_cpu_limit: spec.hard_cpu_limit.map(|l| l.to_string()),
            parent,
            environment: environment.to_string(),
        }
    }
}

/// A selector row. The same shape serves insert and read: the target
/// group's generated id, the derived priority, and the nullable
/// predicate columns. Client tags are stored as a JSON array string;
/// the resource estimate column exists in the schema but is never
/// populated by this loader.
#[derive(Debug, Clone)]
pub struct SelectorRow {
    pub resource_group_id: i64,
    pub priority: i64,
    pub user_regex: Option<String>,
    pub user_group_regex: Option<String>,
    pub source_regex: Option<String>,
    pub query_type: Option<String>,
    pub client_tags: Option<String>,
    pub resource_estimate: Option<String>,
}

impl SelectorRow {
    /// Render a selector into its columns. An empty client tag list
    /// stores as NULL, matching the absent case.
    pub fn from_spec(
        spec: &SelectorSpec,
        resource_group_id: i64,
        priority: i64,
    ) -> Result<Self, RowError> {
        let client_tags = match &spec.client_tags {
            Some(tags) if !tags.is_empty() => Some(serde_json::to_string(tags)?),
            _ => None,
        };
        Ok(Self {
            resource_group_id,
            priority,
            user_regex: spec.user.clone(),
            user_group_regex: spec.user_group.clone(),
            source_regex: spec.source.clone(),
            query_type: spec.query_type.clone(),
            client_tags,
            resource_estimate: None,
        })
    }

    /// Rebuild a selector from this row and its target group's resolved
    /// id template.
    pub fn into_spec(self, group: ResourceGroupIdTemplate) -> Result<SelectorSpec, RowError> {
        let client_tags = self
            .client_tags
            .as_deref()
            .map(serde_json::from_str::<Vec<String>>)
            .transpose()?;
        Ok(SelectorSpec {
            user: self.user_regex,
            user_group: self.user_group_regex,
            source: self.source_regex,
            query_type: self.query_type,
            client_tags,
            group,
        })
    }
}
