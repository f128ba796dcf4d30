//! Writeback (§4.8): persists changed tags for one object back to its
//! directory, plus the `#errors` tag summarizing the object's error list.

use std::collections::HashMap;
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use tracing::instrument;

use crate::tag_store::{ObjectId, TagName, TagValue};

/// Writes every `(name, value)` in `changed` under `object_id`'s directory,
/// per §4.8: nested directories for all but the last dotted segment, the
/// file `#<leaf>` for the last; an all-whitespace value deletes the file
/// instead of writing it; written files get user+group read/write
/// permissions. `errors` is serialized into the `#errors` tag the same way.
#[instrument(skip_all, fields(object = %object_id, changed = changed.len()))]
pub fn write_object(object_id: &ObjectId, changed: &HashMap<TagName, TagValue>, errors: &[String]) -> io::Result<()> {
    for (tag_name, value) in changed {
        write_tag(object_id.path(), tag_name, value)?;
    }
    let errors_value = errors.join("\n");
    write_tag(object_id.path(), &TagName::new("errors"), &errors_value)?;
    Ok(())
}

fn write_tag(object_root: &Path, tag_name: &TagName, value: &str) -> io::Result<()> {
    let path = tag_name.to_path(object_root);
    if value.trim().is_empty() {
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    } else {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        atomic_write(&path, value.as_bytes())?;
        set_read_write_permissions(&path)
    }
}

/// Writes via a temp file in the same directory, then renames into place,
/// so a reader never observes a partially-written tag value.
fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "tag path has no file name"))?;
    let tmp_path = parent.join(format!(".{file_name}.tmp"));
    std::fs::write(&tmp_path, contents)?;
    std::fs::rename(&tmp_path, path)
}

#[cfg(unix)]
fn set_read_write_permissions(path: &Path) -> io::Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))
}

#[cfg(not(unix))]
fn set_read_write_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_nested_tags_and_deletes_whitespace_values() {
        let dir = tempfile::tempdir().unwrap();
        let object_id = ObjectId::new(dir.path());
        let mut changed = HashMap::new();
        changed.insert(TagName::new("foo.bar"), "value".to_string());
        changed.insert(TagName::new("blank"), "   ".to_string());
        write_object(&object_id, &changed, &[]).unwrap();

        assert_eq!(std::fs::read_to_string(dir.path().join("foo/#bar")).unwrap(), "value");
        assert!(!dir.path().join("#blank").exists());
        // An empty error list joins to "", which is all-whitespace, so no
        // #errors file is written at all.
        assert!(!dir.path().join("#errors").exists());
    }

    #[test]
    fn errors_are_newline_joined() {
        let dir = tempfile::tempdir().unwrap();
        let object_id = ObjectId::new(dir.path());
        write_object(&object_id, &HashMap::new(), &["first".to_string(), "second".to_string()]).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("#errors")).unwrap(),
            "first\nsecond"
        );
    }
}
