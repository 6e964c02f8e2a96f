// ABOUTME: Defines the resource group configuration tree: ManagerSpec, ResourceGroupSpec, and SelectorSpec.
// ABOUTME: These types carry the JSON document form; unknown document fields are rejected during deserialization.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::units::{MemoryLimit, TimeSpan};

/// The root of a resource group configuration: the group tree, the
/// routing selectors in priority order (earlier entries match first),
/// and the optional cluster-wide CPU quota period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManagerSpec {
    #[serde(default)]
    pub root_groups: Vec<ResourceGroupSpec>,
    #[serde(default)]
    pub selectors: Vec<SelectorSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_quota_period: Option<TimeSpan>,
}

/// One node of the admission-control hierarchy. Subgroups are owned by
/// their parent; a group's full identity is the dotted path of names
/// from its root (see [`ResourceGroupIdTemplate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub soft_memory_limit: MemoryLimit,
    pub hard_concurrency_limit: u32,
    pub max_queued: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_concurrency_limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_policy: Option<SchedulingPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduling_weight: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jmx_export: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soft_cpu_limit: Option<TimeSpan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hard_cpu_limit: Option<TimeSpan>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_groups: Vec<ResourceGroupSpec>,
}

impl ResourceGroupSpec {
    /// Create a group with the required fields. Optional fields default
    /// to None and the subgroup list starts empty.
    pub fn new(
        name: impl Into<String>,
        soft_memory_limit: MemoryLimit,
        hard_concurrency_limit: u32,
        max_queued: u32,
    ) -> Self {
        Self {
            name: name.into(),
            soft_memory_limit,
            hard_concurrency_limit,
            max_queued,
            soft_concurrency_limit: None,
            scheduling_policy: None,
            scheduling_weight: None,
            jmx_export: None,
            soft_cpu_limit: None,
            hard_cpu_limit: None,
            sub_groups: Vec::new(),
        }
    }
}

/// How queries queued in one group are admitted relative to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    Fair,
    Weighted,
    WeightedFair,
    QueryPriority,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid scheduling policy \"{0}\"")]
pub struct InvalidSchedulingPolicy(String);

impl FromStr for SchedulingPolicy {
    type Err = InvalidSchedulingPolicy;

    // Case-insensitive so rows written by the original uppercase-storing
    // loader still parse.
    fn from_str(s: &str) -> Result<Self, InvalidSchedulingPolicy> {
        match s.to_ascii_lowercase().as_str() {
            "fair" => Ok(SchedulingPolicy::Fair),
            "weighted" => Ok(SchedulingPolicy::Weighted),
            "weighted_fair" => Ok(SchedulingPolicy::WeightedFair),
            "query_priority" => Ok(SchedulingPolicy::QueryPriority),
            _ => Err(InvalidSchedulingPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SchedulingPolicy::Fair => "fair",
            SchedulingPolicy::Weighted => "weighted",
            SchedulingPolicy::WeightedFair => "weighted_fair",
            SchedulingPolicy::QueryPriority => "query_priority",
        };
        f.write_str(s)
    }
}

/// A routing predicate mapping matching queries to a target group.
/// Every predicate field is optional; the target group path is not.
/// The list position within [`ManagerSpec::selectors`] implies the
/// selector's priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SelectorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_tags: Option<Vec<String>>,
    pub group: ResourceGroupIdTemplate,
}

impl SelectorSpec {
    /// Create a selector with no predicates, matching everything, that
    /// routes to the given group.
    pub fn for_group(group: ResourceGroupIdTemplate) -> Self {
        Self {
            user: None,
            user_group: None,
            source: None,
            query_type: None,
            client_tags: None,
            group,
        }
    }
}

/// The dotted path of group names from a root to a node, e.g.
/// "global.adhoc.${USER}". Uniquely identifies a node within one
/// environment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceGroupIdTemplate(Vec<String>);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid resource group id template \"{0}\"")]
pub struct InvalidIdTemplate(String);

impl ResourceGroupIdTemplate {
    /// A single-segment path for a root group.
    pub fn root(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Extend this path with a child group's name.
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl FromStr for ResourceGroupIdTemplate {
    type Err = InvalidIdTemplate;

    fn from_str(s: &str) -> Result<Self, InvalidIdTemplate> {
        if s.is_empty() {
            return Err(InvalidIdTemplate(s.to_string()));
        }
        let segments: Vec<String> = s.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(InvalidIdTemplate(s.to_string()));
        }
        Ok(Self(segments))
    }
}

impl fmt::Display for ResourceGroupIdTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl Serialize for ResourceGroupIdTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ResourceGroupIdTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_new_sets_required_fields() {
        let group = ResourceGroupSpec::new("adhoc", "50%".parse().unwrap(), 10, 100);

        assert_eq!(group.name, "adhoc");
        assert_eq!(group.soft_memory_limit, MemoryLimit::Fraction(0.5));
        assert_eq!(group.hard_concurrency_limit, 10);
        assert_eq!(group.max_queued, 100);
        assert!(group.soft_concurrency_limit.is_none());
        assert!(group.scheduling_policy.is_none());
        assert!(group.jmx_export.is_none());
        assert!(group.sub_groups.is_empty());
    }

    #[test]
    fn id_template_path_building() {
        let root = ResourceGroupIdTemplate::root("global");
        let leaf = root.child("adhoc").child("${USER}");

        assert_eq!(leaf.to_string(), "global.adhoc.${USER}");
        assert_eq!(leaf.segments().len(), 3);
    }

    #[test]
    fn id_template_parse_round_trip() {
        let template: ResourceGroupIdTemplate = "g1.g1a".parse().unwrap();
        assert_eq!(template.segments(), ["g1", "g1a"]);
        assert_eq!(template.to_string(), "g1.g1a");
    }

    #[test]
    fn id_template_rejects_empty_segments() {
        assert!("".parse::<ResourceGroupIdTemplate>().is_err());
        assert!("g1..g2".parse::<ResourceGroupIdTemplate>().is_err());
        assert!(".g1".parse::<ResourceGroupIdTemplate>().is_err());
    }

    #[test]
    fn scheduling_policy_parse_is_case_insensitive() {
        assert_eq!(
            "WEIGHTED_FAIR".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::WeightedFair
        );
        assert_eq!(
            "fair".parse::<SchedulingPolicy>().unwrap(),
            SchedulingPolicy::Fair
        );
        assert!("round_robin".parse::<SchedulingPolicy>().is_err());
    }

    #[test]
    fn scheduling_policy_display_matches_wire_form() {
        assert_eq!(SchedulingPolicy::QueryPriority.to_string(), "query_priority");
        assert_eq!(
            serde_json::to_string(&SchedulingPolicy::QueryPriority).unwrap(),
            "\"query_priority\""
        );
    }

    #[test]
    fn selector_serde_skips_absent_predicates() {
        let selector = SelectorSpec::for_group("g1.g1a".parse().unwrap());
        let json = serde_json::to_string(&selector).unwrap();

        assert_eq!(json, r#"{"group":"g1.g1a"}"#);
    }

    #[test]
    fn manager_spec_serde_round_trip() {
        let mut root = ResourceGroupSpec::new("global", "80%".parse().unwrap(), 100, 1000);
        root.scheduling_policy = Some(SchedulingPolicy::Weighted);
        root.sub_groups
            .push(ResourceGroupSpec::new("adhoc", "10%".parse().unwrap(), 5, 20));

        let spec = ManagerSpec {
            root_groups: vec![root],
            selectors: vec![SelectorSpec {
                user: Some("bob".to_string()),
                ..SelectorSpec::for_group("global.adhoc".parse().unwrap())
            }],
            cpu_quota_period: Some("1h".parse().unwrap()),
        };

        let json = serde_json::to_string(&spec).unwrap();
        let parsed: ManagerSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, spec);
    }
}
