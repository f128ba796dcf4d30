//! Tag store model (§3 Data model, §4.1 Tag store).
//!
//! A tag name is a dotted path such as `proj.cfg.name`; an absent tag is
//! distinct from a tag whose value is the empty string, so tag values live
//! in a `HashMap` rather than defaulting missing entries to `""`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub type TagValue = String;

/// A dotted tag name, e.g. `foo.bar.baz`. Stored as the full dotted string;
/// `segments()` is used by the scanner/writeback to walk directory
/// components without re-parsing at every call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagName(String);

impl TagName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// The leaf (rightmost) dotted component.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }

    /// True if this is an input pattern ending in `.*`, meaning "every tag
    /// under this prefix".
    pub fn is_glob(&self) -> bool {
        self.0.ends_with(".*")
    }

    /// For a glob pattern `foo.*`, the prefix `foo.` that concrete tag names
    /// must start with to match (also matches the bare `foo` tag itself per
    /// the scanner's namespace-descent semantics).
    pub fn glob_prefix(&self) -> &str {
        debug_assert!(self.is_glob());
        &self.0[..self.0.len() - 1]
    }

    /// True if `self` (used as an input pattern) matches the concrete
    /// `candidate` tag name: exact match, or glob-suffix match on `.*`.
    pub fn matches(&self, candidate: &TagName) -> bool {
        if self.is_glob() {
            let prefix = self.glob_prefix();
            candidate.0.starts_with(prefix) || candidate.0 == prefix[..prefix.len() - 1]
        } else {
            self.0 == candidate.0
        }
    }

    /// Filesystem path for this tag name under `object_root`: all but the
    /// last dotted segment become nested directories, the last segment
    /// becomes the file `#<leaf>`.
    pub fn to_path(&self, object_root: &Path) -> PathBuf {
        let mut segments: Vec<&str> = self.segments().collect();
        let leaf = segments.pop().unwrap_or("");
        let mut path = object_root.to_path_buf();
        for segment in segments {
            path.push(segment);
        }
        path.push(format!("#{leaf}"));
        path
    }
}

impl From<String> for TagName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TagName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for TagName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical identity for an object across scanner → reader → evaluator →
/// writeback, so the path isn't re-allocated/re-compared at every stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(PathBuf);

impl ObjectId {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// An object: a directory plus its loaded tags.
#[derive(Debug, Clone, Default)]
pub struct Object {
    pub tags: HashMap<TagName, TagValue>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &TagName) -> Option<&TagValue> {
        self.tags.get(name)
    }

    pub fn has(&self, pattern: &TagName) -> bool {
        if pattern.is_glob() {
            self.tags.keys().any(|tag| pattern.matches(tag))
        } else {
            self.tags.contains_key(pattern)
        }
    }

    /// All concrete tag names bound by an input pattern (exact name, or
    /// every tag under a `.*` prefix).
    pub fn matching<'a>(&'a self, pattern: &'a TagName) -> impl Iterator<Item = &'a TagName> + 'a {
        self.tags.keys().filter(move |tag| pattern.matches(tag))
    }

    pub fn set(&mut self, name: TagName, value: TagValue) {
        self.tags.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_tag_matches_itself_only() {
        let x = TagName::new("x");
        assert!(x.matches(&TagName::new("x")));
        assert!(!x.matches(&TagName::new("x.y")));
    }

    #[test]
    fn glob_matches_nested_and_bare() {
        let pattern = TagName::new("proj.*");
        assert!(pattern.matches(&TagName::new("proj.cfg")));
        assert!(pattern.matches(&TagName::new("proj.cfg.name")));
        assert!(pattern.matches(&TagName::new("proj")));
        assert!(!pattern.matches(&TagName::new("projx")));
    }

    #[test]
    fn leaf_and_path_roundtrip() {
        let name = TagName::new("foo.bar.baz");
        assert_eq!(name.leaf(), "baz");
        let root = Path::new("/obj");
        assert_eq!(name.to_path(root), root.join("foo").join("bar").join("#baz"));
    }

    #[test]
    fn absent_tag_is_distinct_from_empty_value() {
        let mut object = Object::new();
        assert!(object.get(&TagName::new("k")).is_none());
        object.set(TagName::new("k"), String::new());
        assert_eq!(object.get(&TagName::new("k")), Some(&String::new()));
    }
}
