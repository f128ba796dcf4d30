//! Filesystem scanner (§4.3): recursively enumerates `#<tag>`-files under
//! an object root, yielding `(tag-name, absolute-path)` pairs.
//!
//! Walking is delegated to `walkdir`, the same crate the pack's storage
//! examples use for directory enumeration; symlinks (to files or
//! directories) are excluded entirely rather than followed, matching §4.3's
//! "ignoring symbolic links entirely".

use std::path::{Path, PathBuf};

use tracing::instrument;
use walkdir::WalkDir;

use crate::errors::EvalError;
use crate::tag_store::TagName;

/// One discovered tag file under an object root.
#[derive(Debug, Clone)]
pub struct ScannedTag {
    pub tag_name: TagName,
    pub path: PathBuf,
}

/// Enumerates every `#<tag>` file reachable under `object_root`, building
/// the dotted tag name from the directory segments walked plus the file's
/// `#`-stripped basename (§4.3: `<obj>/foo/#bar` ⇒ `foo.bar`).
#[instrument(skip_all, fields(object_root = %object_root.display()))]
pub fn scan_object(object_root: &Path) -> Result<Vec<ScannedTag>, EvalError> {
    if !object_root.is_dir() {
        return Err(EvalError::ObjectNotFound(object_root.to_path_buf()));
    }

    let mut found = Vec::new();
    let walker = WalkDir::new(object_root).follow_links(false).into_iter();
    for entry in walker.filter_entry(|e| !is_symlink(e)) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if is_symlink(&entry) || !entry.file_type().is_file() {
            continue;
        }
        let Some(basename) = entry.path().file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(leaf) = basename.strip_prefix('#') else {
            continue;
        };
        let Ok(relative_dir) = entry
            .path()
            .parent()
            .unwrap_or(object_root)
            .strip_prefix(object_root)
        else {
            continue;
        };
        let mut segments: Vec<String> = relative_dir
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        segments.push(leaf.to_string());
        found.push(ScannedTag {
            tag_name: TagName::new(segments.join(".")),
            path: entry.path().to_path_buf(),
        });
    }
    Ok(found)
}

fn is_symlink(entry: &walkdir::DirEntry) -> bool {
    entry.path_is_symlink()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn nests_dotted_names_from_directory_segments() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("#baz"), "v").unwrap();
        fs::create_dir_all(dir.path().join("foo/bar")).unwrap();
        fs::write(dir.path().join("foo/#bar"), "v").unwrap();
        fs::write(dir.path().join("foo/bar/#qux"), "v").unwrap();

        let mut names: Vec<String> = scan_object(dir.path())
            .unwrap()
            .into_iter()
            .map(|t| t.tag_name.as_str().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec!["baz".to_string(), "foo.bar".to_string(), "foo.bar.qux".to_string()]);
    }

    #[test]
    fn symlinks_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("#real"), "v").unwrap();
        let target = dir.path().join("#real");
        #[cfg(unix)]
        std::os::unix::fs::symlink(&target, dir.path().join("#linked")).unwrap();

        let names: Vec<String> = scan_object(dir.path())
            .unwrap()
            .into_iter()
            .map(|t| t.tag_name.as_str().to_string())
            .collect();
        assert_eq!(names, vec!["real".to_string()]);
    }

    #[test]
    fn missing_object_root_is_fatal_for_that_object() {
        let err = scan_object(Path::new("/nonexistent/does/not/exist")).unwrap_err();
        assert!(matches!(err, EvalError::ObjectNotFound(_)));
    }
}
