//! Spill file record format (§6 "Batch emitted artifacts"): one
//! newline-delimited JSON [`ObjectResult`] per object, written by a single
//! writer (§5) as worker jobs complete, so a caller can stream results
//! without holding the whole batch in memory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::evaluator::{EvalResult, ProfilingKey, TraceEntry, TraceOutcome};
use crate::rule::RuleId;
use crate::tag_store::{ObjectId, TagName, TagValue};

#[derive(Debug, Serialize, Deserialize)]
pub struct ObjectResult {
    pub object_path: String,
    pub initial_tags: HashMap<String, TagValue>,
    pub changed_tags: HashMap<String, TagValue>,
    pub errors: Vec<String>,
    pub trace_log: Vec<TraceRecord>,
    pub rule_log: HashMap<String, Vec<String>>,
    pub property_log: HashMap<String, Vec<String>>,
    pub profiling: HashMap<String, u128>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace_index: usize,
    pub rule_id: u32,
    pub summary: String,
}

impl ObjectResult {
    pub fn from_eval(
        object_id: &ObjectId,
        initial_tags: &HashMap<TagName, TagValue>,
        result: &EvalResult,
    ) -> Self {
        Self {
            object_path: object_id.path().display().to_string(),
            initial_tags: initial_tags.iter().map(|(k, v)| (k.as_str().to_string(), v.clone())).collect(),
            changed_tags: result
                .changed
                .iter()
                .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                .collect(),
            errors: result.errors.iter().map(ToString::to_string).collect(),
            trace_log: result.trace_log.iter().map(trace_record).collect(),
            rule_log: result
                .rule_log
                .iter()
                .map(|(id, entries)| (id.to_string(), entries.clone()))
                .collect(),
            property_log: result
                .property_log
                .iter()
                .map(|(tag, entries)| (tag.as_str().to_string(), entries.clone()))
                .collect(),
            profiling: result
                .profiling
                .iter()
                .map(|(key, duration)| (profiling_key_name(*key), duration.as_millis()))
                .collect(),
        }
    }
}

fn trace_record(entry: &TraceEntry) -> TraceRecord {
    let summary = match &entry.outcome {
        TraceOutcome::SkippedMissingInputs { missing } => format!(
            "skipped: missing inputs {}",
            missing.iter().map(TagName::as_str).collect::<Vec<_>>().join(", ")
        ),
        TraceOutcome::SkippedCondition { index, source } => format!("skipped: condition {index} requires: {source}"),
        TraceOutcome::Exception { message } => match message {
            Some(m) => format!("exception: {m}"),
            None => "exception".to_string(),
        },
        TraceOutcome::Ran { writes } => format!("ran, {} write(s)", writes.len()),
    };
    TraceRecord {
        trace_index: entry.trace_index,
        rule_id: entry.rule_id.0,
        summary,
    }
}

fn profiling_key_name(key: ProfilingKey) -> String {
    match key {
        ProfilingKey::Rule(RuleId(id)) => id.to_string(),
        ProfilingKey::Total => "total".to_string(),
    }
}

/// Appends one record as a single JSON line to `writer`.
pub fn append_record<W: std::io::Write>(writer: &mut W, record: &ObjectResult) -> Result<(), crate::errors::EngineError> {
    serde_json::to_writer(&mut *writer, record)?;
    writer
        .write_all(b"\n")
        .map_err(|e| crate::errors::EngineError::SpillFileIo(std::path::PathBuf::from("<spill>"), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let record = ObjectResult {
            object_path: "/o".to_string(),
            initial_tags: HashMap::new(),
            changed_tags: [("y".to_string(), "42".to_string())].into_iter().collect(),
            errors: Vec::new(),
            trace_log: Vec::new(),
            rule_log: HashMap::new(),
            property_log: HashMap::new(),
            profiling: HashMap::new(),
        };
        let mut buf = Vec::new();
        append_record(&mut buf, &record).unwrap();
        let line = String::from_utf8(buf).unwrap();
        assert!(line.ends_with('\n'));
        let parsed: ObjectResult = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed.changed_tags.get("y"), Some(&"42".to_string()));
    }
}
