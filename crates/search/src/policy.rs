//! Which collections take part in free-text filtering.

use std::collections::BTreeSet;

pub const PIPELINE_GROUP: &str = "tekton.dev";
pub const TRIGGERS_GROUP: &str = "triggers.tekton.dev";
/// Dashboard-extension resources are never text-filtered.
pub const DASHBOARD_GROUP: &str = "dashboard.tekton.dev";

const PIPELINE_KINDS: &[&str] =
    &["Pipeline", "PipelineRun", "Task", "TaskRun", "ClusterTask", "CustomRun", "Run", "StepAction"];
const TRIGGERS_KINDS: &[&str] = &[
    "EventListener",
    "Trigger",
    "TriggerBinding",
    "ClusterTriggerBinding",
    "TriggerTemplate",
    "Interceptor",
    "ClusterInterceptor",
];

/// Lower-case and drop a plural `s`, so `PipelineRun` and `pipelineruns` compare equal.
fn normalize_kind(kind: &str) -> String {
    let k = kind.trim().to_ascii_lowercase();
    match k.strip_suffix('s') {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => k,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPolicy {
    allowed: BTreeSet<(String, String)>,
}

impl Default for FilterPolicy {
    fn default() -> Self {
        let mut p = Self::empty();
        for k in PIPELINE_KINDS.iter() {
            p = p.allow(PIPELINE_GROUP, k);
        }
        for k in TRIGGERS_KINDS.iter() {
            p = p.allow(TRIGGERS_GROUP, k);
        }
        p
    }
}

impl FilterPolicy {
    pub fn empty() -> Self {
        Self { allowed: BTreeSet::new() }
    }

    pub fn allow(mut self, group: &str, kind: &str) -> Self {
        self.allowed.insert((group.to_ascii_lowercase(), normalize_kind(kind)));
        self
    }

    pub fn is_filterable(&self, group: &str, kind: &str) -> bool {
        let group = group.to_ascii_lowercase();
        if group == DASHBOARD_GROUP {
            return false;
        }
        self.allowed.contains(&(group, normalize_kind(kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_covers_pipeline_and_trigger_groups() {
        let p = FilterPolicy::default();
        assert!(p.is_filterable("tekton.dev", "PipelineRun"));
        assert!(p.is_filterable("tekton.dev", "pipelineruns"));
        assert!(p.is_filterable("triggers.tekton.dev", "EventListener"));
        assert!(!p.is_filterable("", "ConfigMap"));
        assert!(!p.is_filterable("tekton.dev", "Secret"));
    }

    #[test]
    fn dashboard_group_is_always_exempt() {
        let p = FilterPolicy::default().allow(DASHBOARD_GROUP, "Extension");
        assert!(!p.is_filterable("dashboard.tekton.dev", "Extension"));
        let custom = FilterPolicy::empty().allow("", "ConfigMap");
        assert!(custom.is_filterable("", "configmaps"));
    }
}
