//! pipedash core types: resources, resource versions, update events and collection identity.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ListMeta, ObjectMeta, OwnerReference};
use kube::core::GroupVersionKind;
use serde::{Deserialize, Serialize};

pub mod listeners;

pub use listeners::{Listeners, Subscription};

/// Query parameter carrying the upstream label selector in a [`CollectionKey`].
pub const LABEL_SELECTOR_PARAM: &str = "labelSelector";

/// One managed item (pipeline run, task run, trigger, ...) as served by the cluster API.
///
/// Every field is optional on the wire; missing fields deserialize to their empty form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_metadata")]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub spec: serde_json::Value,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub status: serde_json::Value,
}

impl Resource {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    pub fn namespace(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata.uid.as_deref().filter(|u| !u.is_empty())
    }

    pub fn resource_version(&self) -> Option<ResourceVersion> {
        self.metadata
            .resource_version
            .as_deref()
            .filter(|v| !v.is_empty())
            .map(ResourceVersion::from)
    }

    /// API group parsed from `apiVersion` (empty for the core group).
    pub fn group(&self) -> &str {
        match self.api_version.split_once('/') {
            Some((group, _)) => group,
            None => "",
        }
    }

    /// Label pairs in key order; empty when the resource carries none.
    pub fn labels(&self) -> impl Iterator<Item = (&str, &str)> {
        self.metadata
            .labels
            .iter()
            .flat_map(|m| m.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }
}

/// `ObjectMeta` with `null` (or scalar) label and annotation values read as text, `null`
/// becoming the empty string. Clusters and hand-written lists do send these.
fn lenient_metadata<'de, D>(deserializer: D) -> Result<ObjectMeta, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde_json::Value;

    let mut raw = Value::deserialize(deserializer)?;
    if raw.is_null() {
        return Ok(ObjectMeta::default());
    }
    for field in ["labels", "annotations"] {
        if let Some(Value::Object(map)) = raw.get_mut(field) {
            for v in map.values_mut() {
                let text = match v {
                    Value::Null => String::new(),
                    Value::Bool(b) => b.to_string(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                *v = Value::String(text);
            }
        }
    }
    serde_json::from_value(raw).map_err(serde::de::Error::custom)
}

/// Monotonic per-object version used to reject stale update events.
///
/// Versions compare by `(length, text)` after leading zeros are stripped: numeric order
/// for digit strings of any length, and one total order when digits and other text mix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ResourceVersion {
    fn from(v: &str) -> Self {
        Self(v.to_string())
    }
}

impl From<String> for ResourceVersion {
    fn from(v: String) -> Self {
        Self(v)
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ResourceVersion {
    fn significant(&self) -> &str {
        self.0.trim_start_matches('0')
    }
}

impl Ord for ResourceVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b) = (self.significant(), other.significant());
        a.len().cmp(&b.len()).then_with(|| a.cmp(b))
    }
}

impl PartialOrd for ResourceVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ResourceVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ResourceVersion {}

/// Operation carried by a live update event.
///
/// Kubernetes watch tags (`ADDED`, `MODIFIED`, `DELETED`) are accepted as aliases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOp {
    #[serde(alias = "Created", alias = "ADDED")]
    Created,
    #[serde(alias = "Updated", alias = "MODIFIED")]
    Updated,
    #[serde(alias = "Deleted", alias = "DELETED")]
    Deleted,
}

impl EventOp {
    pub const TAGS: &'static [&'static str] =
        &["created", "Created", "ADDED", "updated", "Updated", "MODIFIED", "deleted", "Deleted", "DELETED"];

    pub fn is_known_tag(tag: &str) -> bool {
        Self::TAGS.contains(&tag)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEvent {
    #[serde(alias = "type")]
    pub operation: EventOp,
    #[serde(alias = "object")]
    pub resource: Resource,
}

impl ResourceEvent {
    pub fn new(operation: EventOp, resource: Resource) -> Self {
        Self { operation, resource }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid collection key: {0} (expect v1/Kind or group/v1/Kind)")]
    InvalidKey(String),
}

/// Identity of a collection: `(group, version, kind, query-parameters)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CollectionKey {
    pub group: String,
    pub version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl CollectionKey {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into(), ..Default::default() }
    }

    /// Parse `v1/Kind` or `group/v1/Kind`.
    pub fn parse(key: &str) -> Result<Self, CoreError> {
        let parts: Vec<&str> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new("", *version, *kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new(*group, *version, *kind)),
            _ => Err(CoreError::InvalidKey(key.to_string())),
        }
    }

    /// Key derived from a resource's `apiVersion` and `kind`, if both are present.
    pub fn for_resource(r: &Resource) -> Option<Self> {
        if r.api_version.is_empty() || r.kind.is_empty() {
            return None;
        }
        let (group, version) = match r.api_version.split_once('/') {
            Some((g, v)) => (g, v),
            None => ("", r.api_version.as_str()),
        };
        Some(Self::new(group, version, r.kind.as_str()))
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Replace the upstream label selector; an empty selector removes the parameter.
    pub fn with_label_selector(mut self, selector: &str) -> Self {
        if selector.is_empty() {
            self.params.remove(LABEL_SELECTOR_PARAM);
        } else {
            self.params.insert(LABEL_SELECTOR_PARAM.to_string(), selector.to_string());
        }
        self
    }

    pub fn label_selector(&self) -> Option<&str> {
        self.params.get(LABEL_SELECTOR_PARAM).map(String::as_str)
    }

    pub fn gvk(&self) -> GroupVersionKind {
        GroupVersionKind { group: self.group.clone(), version: self.version.clone(), kind: self.kind.clone() }
    }

    pub fn gvk_key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

impl From<GroupVersionKind> for CollectionKey {
    fn from(gvk: GroupVersionKind) -> Self {
        Self::new(gvk.group, gvk.version, gvk.kind)
    }
}

impl fmt::Display for CollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gvk_key())?;
        if let Some(ns) = &self.namespace {
            write!(f, " ns={}", ns)?;
        }
        for (k, v) in self.params.iter() {
            write!(f, " {}={}", k, v)?;
        }
        Ok(())
    }
}

pub mod prelude {
    pub use super::{CollectionKey, EventOp, ListMeta, ObjectMeta, Resource, ResourceEvent, ResourceVersion};
}
