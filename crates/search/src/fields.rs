//! Auxiliary searchable fields of a resource (everything except its name).
//!
//! Two kinds of entries are produced:
//! - *terms*: label keys, values and `key=value` / `key:value` pairs. These match only as
//!   whole terms, so a short token such as `pr` does not pull in every resource labelled
//!   `env=prod`.
//! - *text*: everything else (kind, namespace, annotations, refs, params, condition
//!   messages, ...) matched by substring.
//!
//! `apiVersion` (and owner-reference `apiVersion`) is never indexed: group names like
//! `tekton.dev` would make the common term "dev" match every resource.

use pipedash_core::Resource;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Term,
    Text,
}

#[derive(Default)]
struct FieldSink {
    out: Vec<(FieldKind, String)>,
}

impl FieldSink {
    fn push(&mut self, kind: FieldKind, s: &str) {
        if !s.is_empty() {
            self.out.push((kind, s.to_string()));
        }
    }

    fn text(&mut self, s: Option<&str>) {
        if let Some(s) = s {
            self.push(FieldKind::Text, s);
        }
    }

    fn term(&mut self, s: &str) {
        self.push(FieldKind::Term, s);
    }

    fn value(&mut self, v: &Value) {
        match v {
            Value::Null => {}
            Value::String(s) => self.push(FieldKind::Text, s),
            // objects and arrays render as compact JSON, scalars as their text
            other => self.push(FieldKind::Text, &other.to_string()),
        }
    }
}

fn str_at<'a>(v: &'a Value, pointer: &str) -> Option<&'a str> {
    v.pointer(pointer).and_then(Value::as_str)
}

fn array_at<'a>(v: &'a Value, pointer: &str) -> &'a [Value] {
    v.pointer(pointer).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn collect(r: &Resource) -> Vec<(FieldKind, String)> {
    let mut sink = FieldSink::default();
    let meta = &r.metadata;

    sink.text(Some(r.kind.as_str()));
    sink.text(meta.generate_name.as_deref());
    sink.text(meta.namespace.as_deref());
    sink.text(meta.uid.as_deref());

    if let Some(labels) = &meta.labels {
        for (k, v) in labels.iter() {
            sink.term(k);
            sink.term(v);
            sink.term(&format!("{}={}", k, v));
            sink.term(&format!("{}:{}", k, v));
        }
    }
    if let Some(annotations) = &meta.annotations {
        for (k, v) in annotations.iter() {
            sink.text(Some(k.as_str()));
            sink.text(Some(v.as_str()));
        }
    }
    if let Some(owners) = &meta.owner_references {
        for o in owners.iter() {
            sink.text(Some(o.kind.as_str()));
            sink.text(Some(o.name.as_str()));
        }
    }

    let spec = &r.spec;
    sink.text(str_at(spec, "/serviceAccountName"));
    sink.text(str_at(spec, "/taskRunTemplate/serviceAccountName"));
    sink.text(str_at(spec, "/pipelineRef/name"));
    sink.text(str_at(spec, "/taskRef/name"));
    sink.text(str_at(spec, "/taskRef/kind"));
    for p in array_at(spec, "/params") {
        sink.text(str_at(p, "/name"));
        if let Some(v) = p.get("value") {
            sink.value(v);
        }
    }
    for w in array_at(spec, "/workspaces") {
        sink.text(str_at(w, "/name"));
        sink.text(str_at(w, "/persistentVolumeClaim/claimName"));
        sink.text(str_at(w, "/configMap/name"));
        sink.text(str_at(w, "/secret/secretName"));
    }

    let status = &r.status;
    for c in array_at(status, "/conditions") {
        sink.text(str_at(c, "/reason"));
        sink.text(str_at(c, "/message"));
    }
    sink.text(str_at(status, "/podName"));
    for c in array_at(status, "/childReferences") {
        sink.text(str_at(c, "/name"));
        sink.text(str_at(c, "/pipelineTaskName"));
    }

    sink.out
}

/// Unordered bag of every non-empty searchable string of `r` (name excluded).
pub fn searchable_fields(r: &Resource) -> Vec<String> {
    collect(r).into_iter().map(|(_, s)| s).collect()
}

/// Lower-cased auxiliary fields prepared for token lookups.
#[derive(Debug, Clone, Default)]
pub struct FieldBag {
    terms: Vec<String>,
    haystack: String,
}

impl FieldBag {
    pub fn build(r: &Resource) -> Self {
        let mut terms = Vec::new();
        let mut texts = Vec::new();
        for (kind, s) in collect(r) {
            match kind {
                FieldKind::Term => terms.push(s.to_lowercase()),
                FieldKind::Text => texts.push(s),
            }
        }
        Self { terms, haystack: texts.join(" ").to_lowercase() }
    }

    /// Space-joined, lower-cased descriptive fields.
    pub fn haystack(&self) -> &str {
        &self.haystack
    }

    /// `token` must already be lower-cased.
    pub fn contains(&self, token: &str) -> bool {
        self.terms.iter().any(|t| t == token) || self.haystack.contains(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipedash_core::{ObjectMeta, OwnerReference};
    use std::collections::BTreeMap;

    fn run() -> Resource {
        Resource {
            api_version: "tekton.dev/v1".into(),
            kind: "PipelineRun".into(),
            metadata: ObjectMeta {
                name: Some("build-pr-1".into()),
                generate_name: Some("build-pr-".into()),
                namespace: Some("ci".into()),
                uid: Some("uid-1".into()),
                labels: Some(BTreeMap::from([("env".to_string(), "prod".to_string())])),
                annotations: Some(BTreeMap::from([("note".to_string(), "Nightly release build".to_string())])),
                owner_references: Some(vec![OwnerReference {
                    api_version: "triggers.tekton.dev/v1beta1".into(),
                    kind: "EventListener".into(),
                    name: "github-listener".into(),
                    uid: "owner-1".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            },
            spec: serde_json::json!({
                "pipelineRef": { "name": "build-pipeline" },
                "taskRunTemplate": { "serviceAccountName": "builder" },
                "params": [
                    { "name": "revision", "value": "main" },
                    { "name": "matrix", "value": { "os": "linux" } },
                    { "name": "retries", "value": 3 },
                    { "name": "nothing", "value": null }
                ],
                "workspaces": [ { "name": "source", "persistentVolumeClaim": { "claimName": "src-pvc" } } ]
            }),
            status: serde_json::json!({
                "conditions": [ { "reason": "Succeeded", "message": "Tasks Completed: 2" } ]
            }),
        }
    }

    #[test]
    fn collects_metadata_and_domain_fields() {
        let fields = searchable_fields(&run());
        for expected in [
            "PipelineRun", "build-pr-", "ci", "uid-1", "env", "prod", "env=prod", "env:prod", "note", "Nightly release build",
            "EventListener", "github-listener", "build-pipeline", "builder", "revision", "main",
            "{\"os\":\"linux\"}", "3", "source", "src-pvc", "Succeeded", "Tasks Completed: 2",
        ] {
            assert!(fields.iter().any(|f| f == expected), "missing {expected}: {fields:?}");
        }
        assert!(fields.iter().all(|f| !f.is_empty()));
    }

    #[test]
    fn api_groups_are_not_indexed() {
        let fields = searchable_fields(&run());
        assert!(fields.iter().all(|f| !f.contains("tekton.dev")));
        let bag = FieldBag::build(&run());
        assert!(!bag.contains("dev"));
    }

    #[test]
    fn label_terms_match_whole_only() {
        let bag = FieldBag::build(&run());
        assert!(bag.contains("env=prod"));
        assert!(bag.contains("prod"));
        assert!(!bag.contains("pro"));
        assert!(!bag.contains("env=pr"));
        assert!(bag.contains("completed"));
    }

    #[test]
    fn annotations_match_by_substring() {
        let bag = FieldBag::build(&run());
        assert!(bag.contains("release"));
        assert!(bag.contains("nightly release"));
        assert!(bag.contains("not"));
        assert!(!bag.contains("weekly"));
    }

    #[test]
    fn empty_resource_has_no_fields() {
        assert!(searchable_fields(&Resource::default()).is_empty());
        assert_eq!(FieldBag::build(&Resource::default()).haystack(), "");
    }
}
