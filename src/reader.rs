//! Concurrent tag reader (§4.4, §5): populates the per-object tag map from
//! the scanner's `(tag-name, path)` stream under a bounded number of
//! concurrent file reads.
//!
//! The source system drives this with a cooperative single-threaded event
//! loop and a `channels_limit`/`channels_threshold` refill rule; §9 notes
//! that in a systems language "a bounded semaphore guarding file-open count
//! plus a task per read is equivalent ... so long as refill is driven by
//! reader completion, not polling." We follow that guidance literally: an
//! `Arc<Semaphore>` sized to `channels_limit` gates concurrent reads, and a
//! permit freeing up *is* the refill step — there's no separate
//! `channels_threshold` poll to reproduce once dispatch is permit-driven.
//! The whole reader is expected to run on a current-thread `tokio` runtime
//! (§5: "single-threaded cooperative"), with CPU-bound evaluation handed
//! off to the `rayon` worker pool instead.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::instrument;

use crate::scanner::ScannedTag;
use crate::tag_store::{Object, TagName, TagValue};

/// `threshold = floor(limit * 5/6)` (§4.4, §5), retained for parity with
/// the resource-bounds contract even though a semaphore-gated dispatch
/// doesn't need a separate refill threshold to decide when to admit the
/// next read (see module docs).
pub fn channels_threshold(channels_limit: usize) -> usize {
    channels_limit * 5 / 6
}

/// Reads every tag in `scanned` concurrently, bounded to `channels_limit`
/// simultaneous open files, and returns the populated object. A file that
/// can't be opened or read is silently absent from the result (§4.4: "no
/// error is surfaced by the reader alone").
#[instrument(skip_all, fields(tags = scanned.len(), channels_limit))]
pub async fn read_tags(scanned: Vec<ScannedTag>, channels_limit: usize) -> Object {
    let semaphore = Arc::new(Semaphore::new(channels_limit.max(1)));
    let mut jobs: JoinSet<(TagName, Option<TagValue>)> = JoinSet::new();
    for tag in scanned {
        let semaphore = Arc::clone(&semaphore);
        jobs.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore never closed");
            let value = read_one(&tag.path).await;
            (tag.tag_name, value)
        });
    }

    let mut object = Object::new();
    while let Some(joined) = jobs.join_next().await {
        if let Ok((tag_name, Some(value))) = joined {
            object.set(tag_name, value);
        }
    }
    object
}

async fn read_one(path: &PathBuf) -> Option<TagValue> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => Some(strip_trailing_newline(contents)),
        Err(_) => None,
    }
}

fn strip_trailing_newline(mut s: String) -> String {
    if s.ends_with('\n') {
        s.pop();
        if s.ends_with('\r') {
            s.pop();
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn reads_tags_and_strips_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "hello\n").unwrap();
        fs::write(dir.path().join("b"), "world").unwrap();
        let scanned = vec![
            ScannedTag {
                tag_name: TagName::new("a"),
                path: dir.path().join("a"),
            },
            ScannedTag {
                tag_name: TagName::new("b"),
                path: dir.path().join("b"),
            },
        ];
        let object = read_tags(scanned, 4).await;
        assert_eq!(object.get(&TagName::new("a")), Some(&"hello".to_string()));
        assert_eq!(object.get(&TagName::new("b")), Some(&"world".to_string()));
    }

    #[tokio::test]
    async fn unreadable_tag_is_silently_absent() {
        let dir = tempfile::tempdir().unwrap();
        let scanned = vec![ScannedTag {
            tag_name: TagName::new("missing"),
            path: dir.path().join("does-not-exist"),
        }];
        let object = read_tags(scanned, 4).await;
        assert!(!object.has(&TagName::new("missing")));
    }

    #[test]
    fn threshold_is_five_sixths_floor() {
        assert_eq!(channels_threshold(256), 213);
        assert_eq!(channels_threshold(6), 5);
    }
}
