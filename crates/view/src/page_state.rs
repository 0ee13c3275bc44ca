//! Addressable page state: the `q` parameter that lets a view be reopened with the same
//! query.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use metrics::counter;
use tracing::{debug, warn};

pub const QUERY_PARAM: &str = "q";

#[derive(Debug, thiserror::Error)]
pub enum PageStateError {
    #[error("reading page state {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("writing page state {path}: {source}")]
    Write { path: PathBuf, source: std::io::Error },
    #[error("page state {path} is not valid JSON: {source}")]
    Decode { path: PathBuf, source: serde_json::Error },
}

/// Where the published query is mirrored. Writing an empty query removes the parameter.
pub trait PageState: Send + Sync {
    fn read_query(&self) -> Option<String>;
    fn write_query(&self, query: &str);
}

/// No addressable state (headless use): reads nothing, writes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPageState;

impl PageState for NoPageState {
    fn read_query(&self) -> Option<String> {
        None
    }
    fn write_query(&self, _query: &str) {}
}

#[derive(Debug, Default)]
pub struct MemoryPageState {
    params: Mutex<BTreeMap<String, String>>,
}

impl MemoryPageState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(query: &str) -> Self {
        let me = Self::new();
        me.write_query(query);
        me
    }

    pub fn params(&self) -> BTreeMap<String, String> {
        self.params.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

impl PageState for MemoryPageState {
    fn read_query(&self) -> Option<String> {
        self.params.lock().unwrap_or_else(|p| p.into_inner()).get(QUERY_PARAM).cloned()
    }

    fn write_query(&self, query: &str) {
        set_param(&mut self.params.lock().unwrap_or_else(|p| p.into_inner()), query);
    }
}

fn set_param(params: &mut BTreeMap<String, String>, query: &str) {
    if query.is_empty() {
        params.remove(QUERY_PARAM);
    } else {
        params.insert(QUERY_PARAM.to_string(), query.to_string());
    }
}

/// Page parameters kept in a small JSON object on disk, so a later run resumes the last
/// query. I/O failures are logged and otherwise ignored by the trait methods.
#[derive(Debug, Clone)]
pub struct FilePageState {
    path: PathBuf,
}

impl FilePageState {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as no parameters.
    pub fn load(&self) -> Result<BTreeMap<String, String>, PageStateError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => return Err(PageStateError::Read { path: self.path.clone(), source }),
        };
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&raw).map_err(|source| PageStateError::Decode { path: self.path.clone(), source })
    }

    pub fn store(&self, params: &BTreeMap<String, String>) -> Result<(), PageStateError> {
        let write_err = |source: std::io::Error| PageStateError::Write { path: self.path.clone(), source };
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(write_err)?;
        }
        let body = serde_json::to_string_pretty(params)
            .map_err(|source| PageStateError::Decode { path: self.path.clone(), source })?;
        std::fs::write(&self.path, body).map_err(write_err)?;
        counter!("page_state_writes_total", 1u64);
        Ok(())
    }
}

impl PageState for FilePageState {
    fn read_query(&self) -> Option<String> {
        match self.load() {
            Ok(params) => params.get(QUERY_PARAM).cloned().filter(|q| !q.is_empty()),
            Err(e) => {
                warn!(error = %e, "ignoring unreadable page state");
                None
            }
        }
    }

    fn write_query(&self, query: &str) {
        let mut params = self.load().unwrap_or_else(|e| {
            warn!(error = %e, "page state unreadable; starting fresh");
            BTreeMap::new()
        });
        set_param(&mut params, query);
        match self.store(&params) {
            Ok(()) => debug!(path = %self.path.display(), "page state written"),
            Err(e) => warn!(error = %e, "page state not written"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state() -> PathBuf {
        let f = format!(
            "pipedash-test-{}.json",
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().as_nanos()
        );
        std::env::temp_dir().join(f)
    }

    #[test]
    fn memory_state_drops_empty_query() {
        let s = MemoryPageState::with_query("build");
        assert_eq!(s.read_query().as_deref(), Some("build"));
        s.write_query("");
        assert_eq!(s.read_query(), None);
        assert!(s.params().is_empty());
    }

    #[test]
    fn file_state_round_trips_and_keeps_other_params() {
        let path = temp_state();
        let s = FilePageState::new(&path);
        assert_eq!(s.read_query(), None);
        let mut params = BTreeMap::new();
        params.insert("namespace".to_string(), "ci".to_string());
        s.store(&params).unwrap();

        s.write_query("pr -lint");
        assert_eq!(FilePageState::new(&path).read_query().as_deref(), Some("pr -lint"));
        s.write_query("");
        let left = s.load().unwrap();
        assert_eq!(left.get("namespace").map(String::as_str), Some("ci"));
        assert!(!left.contains_key(QUERY_PARAM));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn corrupt_file_reads_as_nothing() {
        let path = temp_state();
        std::fs::write(&path, "{not json").unwrap();
        let s = FilePageState::new(&path);
        assert!(matches!(s.load(), Err(PageStateError::Decode { .. })));
        assert_eq!(s.read_query(), None);
        s.write_query("main");
        assert_eq!(s.read_query().as_deref(), Some("main"));
        let _ = std::fs::remove_file(&path);
    }
}
