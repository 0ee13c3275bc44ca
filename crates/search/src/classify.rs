//! Decide whether raw filter input is a label selector or a free-text query, and keep the
//! set of active label filters.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

/// Kubernetes caps label values at 63 characters.
pub const MAX_LABEL_VALUE_LEN: usize = 63;

// key:value pairs joined by commas; whitespace is only tolerated around the commas
static LABEL_SELECTOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_./-]+:[A-Za-z0-9_./-]+(\s*,\s*[A-Za-z0-9_./-]+:[A-Za-z0-9_./-]+)*$")
        .expect("label selector pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelPair {
    pub key: String,
    pub value: String,
}

impl LabelPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Parse the selector form `key=value`.
    pub fn parse(s: &str) -> Option<Self> {
        let (k, v) = s.split_once('=')?;
        if k.is_empty() {
            return None;
        }
        Some(Self::new(k, v))
    }
}

impl fmt::Display for LabelPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Empty or whitespace-only input.
    Empty,
    /// Normalized `key=value` pairs, duplicates removed (first occurrence kept).
    LabelSelector(Vec<LabelPair>),
    /// The trimmed input.
    FreeText(String),
}

pub fn is_label_selector(raw: &str) -> bool {
    LABEL_SELECTOR_RE.is_match(raw.trim())
}

pub fn classify(raw: &str) -> QueryKind {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return QueryKind::Empty;
    }
    if !LABEL_SELECTOR_RE.is_match(trimmed) {
        return QueryKind::FreeText(trimmed.to_string());
    }
    let compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    let mut pairs: Vec<LabelPair> = Vec::new();
    for item in compact.split(',') {
        if let Some((k, v)) = item.split_once(':') {
            let pair = LabelPair::new(k, v);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    }
    QueryKind::LabelSelector(pairs)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LabelFilterError {
    #[error("label value for \"{key}\" is {len} characters long; the maximum is {max}")]
    ValueTooLong { key: String, len: usize, max: usize },
    #[error("filter \"{0}\" is already applied")]
    Duplicate(String),
}

/// Active label filters, in the order they were added. Rendered upstream as a
/// `labelSelector`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelFilterSet {
    filters: Vec<LabelPair>,
}

impl LabelFilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from an upstream selector (`a=b,c=d`); malformed entries are skipped.
    pub fn from_selector(selector: &str) -> Self {
        let mut set = Self::new();
        for item in selector.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(pair) = LabelPair::parse(item) {
                if !set.filters.contains(&pair) {
                    set.filters.push(pair);
                }
            }
        }
        set
    }

    /// Validate every pair, then add them all. On error nothing changes.
    pub fn merge(&mut self, pairs: &[LabelPair]) -> Result<(), LabelFilterError> {
        for pair in pairs.iter() {
            let len = pair.value.chars().count();
            if len > MAX_LABEL_VALUE_LEN {
                return Err(LabelFilterError::ValueTooLong { key: pair.key.clone(), len, max: MAX_LABEL_VALUE_LEN });
            }
            if self.filters.contains(pair) {
                return Err(LabelFilterError::Duplicate(pair.to_string()));
            }
        }
        for pair in pairs.iter() {
            if !self.filters.contains(pair) {
                self.filters.push(pair.clone());
            }
        }
        Ok(())
    }

    pub fn remove(&mut self, pair: &LabelPair) -> bool {
        let before = self.filters.len();
        self.filters.retain(|p| p != pair);
        before != self.filters.len()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
    }

    pub fn filters(&self) -> &[LabelPair] {
        &self.filters
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn selector(&self) -> String {
        self.filters.iter().map(LabelPair::to_string).collect::<Vec<_>>().join(",")
    }
}
