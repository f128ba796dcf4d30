//! Result renderer (§4.7): composes the human-readable `mash.log` report
//! from one object's evaluation output.
//!
//! Section order matches §4.7 exactly: summary, errors, updated tags,
//! execution trace, rule evaluations, property evaluations, profiling,
//! rule definitions.

use std::collections::HashMap;

use itertools::Itertools;

use crate::errors::EvalError;
use crate::evaluator::{EvalResult, ProfilingKey, TraceOutcome};
use crate::rule::registry::RuleRegistry;
use crate::rule::RuleId;
use crate::tag_store::{ObjectId, TagName, TagValue};

const TRUNCATE_AT: usize = 32;

/// Truncates a rendered value to 29 characters plus `...` once it exceeds
/// 32 characters (§4.7).
pub fn truncate_for_display(value: &str) -> String {
    if value.chars().count() <= TRUNCATE_AT {
        value.to_string()
    } else {
        format!("{}...", value.chars().take(29).collect::<String>())
    }
}

pub fn rule_reference(id: RuleId, name: &str) -> String {
    format!("{id}.\"{name}\"")
}

pub fn render_report(object_id: &ObjectId, initial_tags: &HashMap<TagName, TagValue>, result: &EvalResult, registry: &RuleRegistry) -> String {
    let mut out = String::new();

    render_summary(&mut out, object_id, result);
    render_errors(&mut out, result, registry);
    render_updated_tags(&mut out, initial_tags, result);
    render_trace(&mut out, result, registry);
    render_rule_evaluations(&mut out, result, registry);
    render_property_evaluations(&mut out, result, registry);
    render_profiling(&mut out, result, registry);
    render_rule_definitions(&mut out, registry);

    out
}

fn render_summary(out: &mut String, object_id: &ObjectId, result: &EvalResult) {
    out.push_str(&format!("=== {} ===\n", object_id.path().display()));
    out.push_str(&format!(
        "{} tag(s) changed, {} error(s), {} trace step(s)\n\n",
        result.changed.len(),
        result.errors.len(),
        result.trace_log.len()
    ));
}

fn render_errors(out: &mut String, result: &EvalResult, registry: &RuleRegistry) {
    if result.errors.is_empty() {
        return;
    }
    out.push_str("-- Errors --\n");
    for error in &result.errors {
        out.push_str(&format!("  {}\n", format_error(error, registry)));
    }
    out.push('\n');
}

fn format_error(error: &EvalError, registry: &RuleRegistry) -> String {
    match error.rule() {
        Some(rule_ref) => format!(
            "[{}] {}",
            rule_reference(rule_ref.id, rule_name_or(registry, rule_ref.id, &rule_ref.name)),
            error
        ),
        None => error.to_string(),
    }
}

fn rule_name_or<'a>(registry: &'a RuleRegistry, id: RuleId, fallback: &'a str) -> &'a str {
    registry.get(id).map(|r| r.name.as_str()).filter(|n| !n.is_empty()).unwrap_or(fallback)
}

fn render_updated_tags(out: &mut String, initial_tags: &HashMap<TagName, TagValue>, result: &EvalResult) {
    if result.changed.is_empty() {
        return;
    }
    out.push_str("-- Updated tags --\n");
    for tag in result.changed.keys().sorted_by_key(|t| t.as_str().to_string()) {
        let new_value = &result.changed[tag];
        match initial_tags.get(tag) {
            Some(old) => out.push_str(&format!(
                "  {tag} = {} (was {})\n",
                truncate_for_display(new_value),
                truncate_for_display(old)
            )),
            None => out.push_str(&format!("  {tag} = {} (new)\n", truncate_for_display(new_value))),
        }
    }
    out.push('\n');
}

fn render_trace(out: &mut String, result: &EvalResult, registry: &RuleRegistry) {
    out.push_str("-- Execution trace --\n");
    for entry in &result.trace_log {
        let rule_display = registry
            .get(entry.rule_id)
            .map(|r| rule_reference(entry.rule_id, &r.display_name()))
            .unwrap_or_else(|| entry.rule_id.to_string());
        let detail = match &entry.outcome {
            TraceOutcome::SkippedMissingInputs { missing } => format!(
                "skipped, missing inputs: {}",
                missing.iter().map(TagName::as_str).join(", ")
            ),
            TraceOutcome::SkippedCondition { index, source } => format!("skipped, condition {index}: {source}"),
            TraceOutcome::Exception { message } => match message {
                Some(m) => format!("exception: {m}"),
                None => "exception".to_string(),
            },
            TraceOutcome::Ran { writes } => {
                if writes.is_empty() {
                    "ran, no writes".to_string()
                } else {
                    writes
                        .iter()
                        .map(|w| format!("{} = {}", w.tag_name, truncate_for_display(&w.value)))
                        .join(", ")
                }
            }
        };
        out.push_str(&format!("  [{}] {rule_display}: {detail}\n", entry.trace_index));
    }
    out.push('\n');
}

fn render_rule_evaluations(out: &mut String, result: &EvalResult, registry: &RuleRegistry) {
    out.push_str("-- Rule evaluations --\n");
    for rule in registry.all_rules() {
        out.push_str(&format!("  {}\n", rule_reference(rule.id, &rule.display_name())));
        if let Some(entries) = result.rule_log.get(&rule.id) {
            for entry in entries {
                out.push_str(&format!("    {entry}\n"));
            }
        }
    }
    out.push('\n');
}

fn render_property_evaluations(out: &mut String, result: &EvalResult, registry: &RuleRegistry) {
    out.push_str("-- Property evaluations --\n");
    for tag in result.property_log.keys().sorted_by_key(|t| t.as_str().to_string()) {
        out.push_str(&format!("  {tag}\n"));
        let readers: Vec<String> = registry
            .all_rules()
            .filter(|r| r.inputs.iter().any(|p| p.matches(tag)))
            .map(|r| rule_reference(r.id, &r.display_name()))
            .collect();
        let writers: Vec<String> = registry
            .all_rules()
            .filter(|r| r.outputs.contains(tag))
            .map(|r| rule_reference(r.id, &r.display_name()))
            .collect();
        out.push_str(&format!("    writers: {}\n", writers.join(", ")));
        out.push_str(&format!("    readers: {}\n", readers.join(", ")));
        for entry in &result.property_log[tag] {
            out.push_str(&format!("    {entry}\n"));
        }
    }
    out.push('\n');
}

fn render_profiling(out: &mut String, result: &EvalResult, registry: &RuleRegistry) {
    out.push_str("-- Profiling --\n");
    let mut entries: Vec<(String, u128)> = result
        .profiling
        .iter()
        .map(|(key, duration)| (profiling_label(*key, registry), duration.as_millis()))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1));
    for (label, ms) in entries {
        out.push_str(&format!("  {label}: {ms}ms\n"));
    }
    out.push('\n');
}

fn profiling_label(key: ProfilingKey, registry: &RuleRegistry) -> String {
    match key {
        ProfilingKey::Total => "total".to_string(),
        ProfilingKey::Rule(id) => registry
            .get(id)
            .map(|r| rule_reference(id, &r.display_name()))
            .unwrap_or_else(|| id.to_string()),
    }
}

fn render_rule_definitions(out: &mut String, registry: &RuleRegistry) {
    out.push_str("-- Rule definitions --\n");
    for rule in registry.all_rules() {
        out.push_str(&format!(
            "  {} in={:?} out={:?} source={}\n",
            rule_reference(rule.id, &rule.display_name()),
            rule.inputs.iter().map(TagName::as_str).collect::<Vec<_>>(),
            rule.outputs.iter().map(TagName::as_str).collect::<Vec<_>>(),
            rule.source_file.display()
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_long_values() {
        let long = "a".repeat(40);
        let truncated = truncate_for_display(&long);
        assert_eq!(truncated.len(), 32);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn short_values_pass_through() {
        assert_eq!(truncate_for_display("short"), "short");
    }

    #[test]
    fn rule_reference_uses_id_dot_quoted_name() {
        assert_eq!(rule_reference(RuleId(3), "My Rule"), "3.\"My Rule\"");
    }
}
