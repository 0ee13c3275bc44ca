use smallvec::SmallVec;

/// Separators between name segments (`build-pr_1.deploy/main`). Runs of them collapse.
pub const NAME_DELIMITERS: [char; 4] = ['-', '_', '.', '/'];

fn is_delimiter(c: char) -> bool {
    NAME_DELIMITERS.contains(&c)
}

/// Lower-cased views of a resource name used for substring matching across naming
/// conventions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameIndex {
    /// Full name, lower-cased.
    pub raw: String,
    /// Non-empty segments between delimiter runs.
    pub parts: SmallVec<[String; 8]>,
    /// `raw` with every delimiter removed.
    pub joined: String,
}

impl NameIndex {
    pub fn new(name: Option<&str>) -> Self {
        let raw = name.unwrap_or("").to_lowercase();
        let parts = raw.split(is_delimiter).filter(|p| !p.is_empty()).map(str::to_string).collect();
        let joined = raw.chars().filter(|c| !is_delimiter(*c)).collect();
        Self { raw, parts, joined }
    }

    /// True if `token` (already lower-cased) occurs in the raw or joined form or any part.
    pub fn contains(&self, token: &str) -> bool {
        self.raw.contains(token) || self.joined.contains(token) || self.parts.iter().any(|p| p.contains(token))
    }
}

pub fn name_index(name: Option<&str>) -> NameIndex {
    NameIndex::new(name)
}
