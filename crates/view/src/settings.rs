//! Runtime settings read from `PIPEDASH_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 300;
pub const DEFAULT_QUEUE_CAP: usize = 2048;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Delay between the last keystroke and the published query.
    pub debounce_ms: u64,
    /// Capacity of the live-update ingest queue.
    pub queue_cap: usize,
    /// Where the file-backed page state keeps the last query.
    pub state_path: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self { debounce_ms: DEFAULT_DEBOUNCE_MS, queue_cap: DEFAULT_QUEUE_CAP, state_path: default_state_path() }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Malformed or zero values fall back to the defaults.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let debounce_ms = get("PIPEDASH_DEBOUNCE_MS")
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(DEFAULT_DEBOUNCE_MS);
        let queue_cap = get("PIPEDASH_QUEUE_CAP")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_QUEUE_CAP);
        let state_path = get("PIPEDASH_STATE")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_state_path);
        Self { debounce_ms, queue_cap, state_path }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

fn default_state_path() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".pipedash").join("state.json"),
        None => PathBuf::from("pipedash-state.json"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn reads_overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("PIPEDASH_DEBOUNCE_MS", "120"),
            ("PIPEDASH_QUEUE_CAP", "64"),
            ("PIPEDASH_STATE", "/tmp/pd.json"),
        ]));
        assert_eq!(s.debounce(), Duration::from_millis(120));
        assert_eq!(s.queue_cap, 64);
        assert_eq!(s.state_path, PathBuf::from("/tmp/pd.json"));
    }

    #[test]
    fn bad_values_fall_back() {
        let s = Settings::from_lookup(lookup(&[("PIPEDASH_DEBOUNCE_MS", "soon"), ("PIPEDASH_QUEUE_CAP", "0")]));
        assert_eq!(s.debounce_ms, DEFAULT_DEBOUNCE_MS);
        assert_eq!(s.queue_cap, DEFAULT_QUEUE_CAP);
        assert!(s.state_path.ends_with("state.json"));
    }
}
