//! Worklist fixed-point evaluator (§3 "Evaluator state", §4.5, §8 P1-P7).
//!
//! One [`evaluate_object`] call owns its [`EvaluatorState`] exclusively for
//! the duration of a single object's evaluation (§3: "the evaluator state
//! is owned exclusively by a single worker"), so there is no locking inside
//! this module — the worker pool (§4.6) is what gives each call its own
//! copy of the initial tag map.

pub mod builtins;

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, instrument, trace};

use crate::errors::EvalError;
use crate::rule::lang::{BlockOutcome, Scope, Value};
use crate::rule::registry::RuleRegistry;
use crate::rule::{Body, Condition, Rule, RuleId};
use crate::tag_store::{Object, ObjectId, TagName, TagValue};

use self::builtins::ObjectBuiltins;

/// Step cap guarding against pathological reactivation cycles (§9 open
/// question: "the source has no explicit step cap ... a port should add a
/// configurable cap"). Exposed via `RunSettings` as `max_steps`; this is
/// just the fallback when nothing overrides it.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

#[derive(Debug, Clone)]
pub enum TraceOutcome {
    SkippedMissingInputs { missing: Vec<TagName> },
    SkippedCondition { index: usize, source: String },
    Exception { message: Option<String> },
    Ran { writes: Vec<WriteNote> },
}

#[derive(Debug, Clone)]
pub struct WriteNote {
    pub tag_name: TagName,
    pub value: TagValue,
    pub unchanged: bool,
    pub conflict: Option<(RuleId, usize)>,
}

#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub trace_index: usize,
    pub rule_id: RuleId,
    pub outcome: TraceOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfilingKey {
    Rule(RuleId),
    Total,
}

pub struct EvaluatorState {
    pub context: HashMap<TagName, TagValue>,
    pub trace_log: Vec<TraceEntry>,
    pub rule_log: HashMap<RuleId, Vec<String>>,
    pub property_log: HashMap<TagName, Vec<String>>,
    pub property_writers: HashMap<TagName, Vec<(RuleId, usize)>>,
    pub errors: Vec<EvalError>,
    pub profiling: HashMap<ProfilingKey, Duration>,
    worklist: VecDeque<RuleId>,
    pending: HashSet<RuleId>,
    max_steps: usize,
}

/// Result of evaluating one object: the final context, everything logged
/// along the way, and the pruned `changed` set (§4.5 "Result pruning").
pub struct EvalResult {
    pub context: HashMap<TagName, TagValue>,
    pub changed: HashMap<TagName, TagValue>,
    pub trace_log: Vec<TraceEntry>,
    pub rule_log: HashMap<RuleId, Vec<String>>,
    pub property_log: HashMap<TagName, Vec<String>>,
    pub errors: Vec<EvalError>,
    pub profiling: HashMap<ProfilingKey, Duration>,
}

impl EvalResult {
    /// Synthesizes the result for an object whose root directory couldn't
    /// be scanned (§4.4: "scanner finds a directory that does not exist ->
    /// fatal ObjectNotFound error for that object"). No rule runs against
    /// it, but `error` is still carried through so it reaches writeback,
    /// the rendered report, and the spill record like any other error.
    pub fn object_not_found(error: EvalError) -> Self {
        Self {
            context: HashMap::new(),
            changed: HashMap::new(),
            trace_log: Vec::new(),
            rule_log: HashMap::new(),
            property_log: HashMap::new(),
            errors: vec![error],
            profiling: HashMap::new(),
        }
    }
}

#[instrument(skip_all, fields(object = %object_id))]
pub fn evaluate_object(object_id: &ObjectId, initial: &Object, registry: &RuleRegistry, max_steps: usize) -> EvalResult {
    let mut state = EvaluatorState {
        context: initial.tags.clone(),
        trace_log: Vec::new(),
        rule_log: HashMap::new(),
        property_log: HashMap::new(),
        property_writers: HashMap::new(),
        errors: Vec::new(),
        profiling: HashMap::new(),
        worklist: registry.all_rule_ids().collect(),
        pending: registry.all_rule_ids().collect(),
        max_steps,
    };

    while let Some(rule_id) = state.worklist.pop_front() {
        state.pending.remove(&rule_id);
        let trace_index = state.trace_log.len();
        if trace_index >= state.max_steps {
            state.errors.push(EvalError::NonConvergence { steps: trace_index });
            break;
        }
        let Some(rule) = registry.get(rule_id) else { continue };
        step(&mut state, object_id, rule, registry, trace_index);
    }

    let changed: HashMap<TagName, TagValue> = state
        .context
        .iter()
        .filter(|(tag, value)| initial.tags.get(*tag) != Some(*value))
        .map(|(tag, value)| (tag.clone(), value.clone()))
        .collect();

    EvalResult {
        context: state.context,
        changed,
        trace_log: state.trace_log,
        rule_log: state.rule_log,
        property_log: state.property_log,
        errors: state.errors,
        profiling: state.profiling,
    }
}

#[instrument(skip_all, fields(object = %object_id, rule = %rule.id, step = trace_index))]
fn step(state: &mut EvaluatorState, object_id: &ObjectId, rule: &Rule, registry: &RuleRegistry, trace_index: usize) {
    // 1. Bind inputs.
    let mut vars: HashMap<String, Value> = HashMap::new();
    let mut missing = Vec::new();
    for pattern in &rule.inputs {
        let mut matched_any = false;
        let mut matched_tags: Vec<&TagName> = state.context.keys().filter(|t| pattern.matches(t)).collect();
        matched_tags.sort();
        for tag in matched_tags {
            matched_any = true;
            let value = state.context[tag].clone();
            vars.insert(tag.leaf().to_string(), Value::from_tag_value(&value));
        }
        if !matched_any {
            missing.push(pattern.clone());
        }
    }
    if !missing.is_empty() {
        trace!(rule = %rule.id, missing = ?missing, "skipping rule: missing inputs");
        record(
            state,
            rule.id,
            trace_index,
            TraceOutcome::SkippedMissingInputs { missing: missing.clone() },
            format!(
                "not evaluated because inputs are missing: {}",
                missing.iter().map(TagName::as_str).collect::<Vec<_>>().join(", ")
            ),
        );
        return;
    }

    // 2. Check conditions.
    let builtins = ObjectBuiltins {
        rule,
        object_id,
        context: &state.context,
    };
    for (index, condition) in rule.conditions.iter().enumerate() {
        let scope = Scope::new(vars.clone(), &builtins);
        let passed = match condition {
            Condition::If { expr, .. } => scope.eval_expr(expr).map(|v| v.as_bool()).unwrap_or(false),
            Condition::When { stmt, .. } => eval_when(&scope, stmt),
        };
        if !passed {
            trace!(rule = %rule.id, condition = index, source = condition.source(), "skipping rule: guard failed");
            record(
                state,
                rule.id,
                trace_index,
                TraceOutcome::SkippedCondition {
                    index,
                    source: condition.source().to_string(),
                },
                format!("condition {index} requires: {}", condition.source()),
            );
            return;
        }
    }

    // 3. Run body.
    let started = Instant::now();
    let outcome = run_body(rule, &vars, &builtins);
    let elapsed = started.elapsed();
    *state.profiling.entry(ProfilingKey::Rule(rule.id)).or_default() += elapsed;
    *state.profiling.entry(ProfilingKey::Total).or_default() += elapsed;

    match outcome {
        BodyOutcome::Exception(message) => {
            record(
                state,
                rule.id,
                trace_index,
                TraceOutcome::Exception { message: message.clone() },
                match &message {
                    Some(m) => format!("exception: {m}"),
                    None => "exception".to_string(),
                },
            );
        }
        BodyOutcome::Error(message) => {
            state.errors.push(EvalError::RuleBodyError {
                trace_index,
                rule: rule_ref(rule),
                message,
            });
        }
        BodyOutcome::Outputs { values, allow_partial } => {
            // 4/5. Normalize, merge, record problems.
            let mut writes = Vec::new();
            let mut missing_outputs = Vec::new();
            for out in &rule.outputs {
                match values.get(out.leaf()) {
                    Some(value) => writes.push((out.clone(), value.as_string())),
                    None if allow_partial => {}
                    None => missing_outputs.push(out.clone()),
                }
            }
            if !missing_outputs.is_empty() && !allow_partial {
                for tag in &missing_outputs {
                    state.errors.push(EvalError::MissingOutput {
                        trace_index,
                        rule: rule_ref(rule),
                        tag_name: tag.as_str().to_string(),
                    });
                }
                record(
                    state,
                    rule.id,
                    trace_index,
                    TraceOutcome::Ran { writes: Vec::new() },
                    format!(
                        "didn't set output {}",
                        missing_outputs.iter().map(TagName::as_str).collect::<Vec<_>>().join(", ")
                    ),
                );
                return;
            }
            let notes = merge_outputs(state, registry, rule, trace_index, writes);
            record(
                state,
                rule.id,
                trace_index,
                TraceOutcome::Ran { writes: notes },
                "ran".to_string(),
            );
        }
    }
}

fn eval_when(scope: &Scope, stmt: &crate::rule::lang::Stmt) -> bool {
    use crate::rule::lang::Stmt;
    match stmt {
        Stmt::Expr(expr) => scope.eval_expr(expr).map(|v| v.as_bool()).unwrap_or(false),
        _ => {
            let mut scope_clone = Scope::new(scope.vars.clone(), scope.builtins);
            !matches!(scope_clone.run_block(std::slice::from_ref(stmt)), Ok(BlockOutcome::Exception(_)) | Err(_))
        }
    }
}

enum BodyOutcome {
    Outputs { values: HashMap<String, Value>, allow_partial: bool },
    Exception(Option<String>),
    Error(String),
}

fn run_body(rule: &Rule, vars: &HashMap<String, Value>, builtins: &ObjectBuiltins) -> BodyOutcome {
    match &rule.body {
        Body::Block(stmts) => {
            let mut scope = Scope::new(vars.clone(), builtins);
            match scope.run_block(stmts) {
                Ok(BlockOutcome::Completed(locals)) => BodyOutcome::Outputs {
                    values: locals,
                    allow_partial: false,
                },
                Ok(BlockOutcome::Continue(locals)) => BodyOutcome::Outputs {
                    values: locals,
                    allow_partial: true,
                },
                Ok(BlockOutcome::Exception(message)) => BodyOutcome::Exception(message),
                Err(message) => BodyOutcome::Error(message),
            }
        }
        Body::Claim { expr, source } => {
            let scope = Scope::new(vars.clone(), builtins);
            match scope.eval_expr(expr) {
                Ok(value) if value.as_bool() => BodyOutcome::Outputs {
                    values: HashMap::new(),
                    allow_partial: true,
                },
                Ok(_) => BodyOutcome::Error(format!("Claim violated: {source}")),
                Err(message) => BodyOutcome::Error(message),
            }
        }
        Body::Map(table) => {
            let key: Vec<String> = rule
                .inputs
                .iter()
                .map(|input| vars.get(input.leaf()).map(Value::as_string).unwrap_or_default())
                .collect();
            match table.iter().find(|(in_tuple, _)| in_tuple == &key) {
                Some((_, out_tuple)) => {
                    let values = rule
                        .outputs
                        .iter()
                        .zip(out_tuple.iter())
                        .map(|(name, value)| (name.leaf().to_string(), Value::Str(value.clone())))
                        .collect();
                    BodyOutcome::Outputs {
                        values,
                        allow_partial: false,
                    }
                }
                None => BodyOutcome::Exception(None),
            }
        }
    }
}

fn merge_outputs(
    state: &mut EvaluatorState,
    registry: &RuleRegistry,
    rule: &Rule,
    trace_index: usize,
    writes: Vec<(TagName, TagValue)>,
) -> Vec<WriteNote> {
    let mut notes = Vec::new();
    for (tag_name, value) in writes {
        debug!(rule = %rule.id, tag = %tag_name, value = %value, "merging output");
        let previous_value = state.context.get(&tag_name).cloned();
        let previous_writer = state.property_writers.get(&tag_name).and_then(|w| w.last()).copied();
        state
            .property_writers
            .entry(tag_name.clone())
            .or_default()
            .push((rule.id, trace_index));

        if previous_value.as_ref() == Some(&value) {
            state
                .property_log
                .entry(tag_name.clone())
                .or_default()
                .push(format!("{trace_index}: written but unchanged by {}", rule.display_name()));
            notes.push(WriteNote {
                tag_name,
                value,
                unchanged: true,
                conflict: None,
            });
            continue;
        }

        let conflict = previous_writer.filter(|(writer_id, _)| *writer_id != rule.id);
        if let Some((previous_id, previous_trace_index)) = conflict {
            let previous_rule = crate::errors::RuleRef {
                id: previous_id,
                name: registry.get(previous_id).map(Rule::display_name).unwrap_or_default(),
            };
            debug!(
                rule = %rule.id,
                tag = %tag_name,
                previous_rule = previous_id.0,
                previous_trace_index,
                "write conflict"
            );
            state.errors.push(EvalError::WriteConflict {
                trace_index,
                rule: rule_ref(rule),
                tag_name: tag_name.as_str().to_string(),
                previous_writer: previous_rule,
                previous_trace_index,
            });
            state.property_log.entry(tag_name.clone()).or_default().push(format!(
                "{trace_index}: write conflict with rule {previous_id} written at step {previous_trace_index}"
            ));
        }

        state.context.insert(tag_name.clone(), value.clone());
        for dependent in registry.rules_by_input(&tag_name) {
            state.push_worklist(dependent);
        }

        notes.push(WriteNote {
            tag_name,
            value,
            unchanged: false,
            conflict,
        });
    }
    notes
}

impl EvaluatorState {
    fn push_worklist(&mut self, id: RuleId) {
        if self.pending.insert(id) {
            self.worklist.push_back(id);
        }
    }
}

fn record(state: &mut EvaluatorState, rule_id: RuleId, trace_index: usize, outcome: TraceOutcome, note: String) {
    state.trace_log.push(TraceEntry {
        trace_index,
        rule_id,
        outcome,
    });
    state.rule_log.entry(rule_id).or_default().push(note);
}

fn rule_ref(rule: &Rule) -> crate::errors::RuleRef {
    crate::errors::RuleRef {
        id: rule.id,
        name: rule.display_name(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::compiler::{compile_source, RuleIdAllocator};
    use std::path::Path;

    fn compile(src: &str) -> RuleRegistry {
        let mut registry = RuleRegistry::new();
        let mut ids = RuleIdAllocator::new();
        compile_source(Path::new("#test"), src, &mut ids, &mut registry).unwrap();
        registry
    }

    fn object(tags: &[(&str, &str)]) -> Object {
        let mut object = Object::new();
        for (name, value) in tags {
            object.set(TagName::new(*name), value.to_string());
        }
        object
    }

    #[test]
    fn no_rules_yields_no_changes() {
        let registry = RuleRegistry::new();
        let object = object(&[("k", "v")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert!(result.changed.is_empty());
    }

    #[test]
    fn simple_default_rule_computes_output() {
        let registry = compile("using { in {x} } define { rule out {y} always { set y [expr {$x + 1}] } }");
        let object = object(&[("x", "41")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert_eq!(result.changed.get(&TagName::new("y")), Some(&"42".to_string()));
    }

    #[test]
    fn map_rule_with_missing_key_writes_nothing_and_records_no_error() {
        let registry = compile("rule in {color} out {hex} map { {red} {#f00}  {green} {#0f0} }");
        let object = object(&[("color", "blue")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert!(result.changed.is_empty());
        assert!(result.errors.is_empty());
    }

    #[test]
    fn claim_violation_records_rule_body_error_and_no_tag_changes() {
        let registry = compile("rule in {count} always claim {$count >= 0}");
        let object = object(&[("count", "-3")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert!(result.changed.is_empty());
        assert_eq!(result.errors.len(), 1);
        assert!(matches!(result.errors[0], EvalError::RuleBodyError { .. }));
    }

    #[test]
    fn write_conflict_keeps_later_writers_value_and_logs_conflict() {
        let registry = compile(
            r#"
            using { in {seed} } define {
                rule out {color} always { set color "red" }
                rule out {color} always { set color "blue" }
            }
            "#,
        );
        let object = object(&[("seed", "1")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert_eq!(result.context.get(&TagName::new("color")), Some(&"blue".to_string()));
        assert!(result.errors.iter().any(|e| matches!(e, EvalError::WriteConflict { .. })));
    }

    #[test]
    fn reactivation_propagates_through_dependent_rule() {
        let registry = compile(
            r#"
            rule in {y} out {z} always { set z [expr {$y + 1}] }
            rule in {x} out {y} always { set y [expr {$x * 2}] }
            "#,
        );
        let object = object(&[("x", "5")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        assert_eq!(result.changed.get(&TagName::new("y")), Some(&"10".to_string()));
        assert_eq!(result.changed.get(&TagName::new("z")), Some(&"11".to_string()));
        // B (z-from-y) is declared first, so its first pop is skipped for
        // missing input y; A then writes y, reactivating B.
        let z_entries = result.rule_log.values().flatten().filter(|s| s.contains("missing")).count();
        assert_eq!(z_entries, 1);
    }

    #[test]
    fn write_of_unchanged_value_does_not_reactivate_dependents() {
        let registry = compile(
            r#"
            rule in {x} out {y} always { set y "same" }
            rule in {y} out {z} always { set z "derived" }
            "#,
        );
        let object = object(&[("x", "1"), ("y", "same")]);
        let result = evaluate_object(&ObjectId::new("/o"), &object, &registry, DEFAULT_MAX_STEPS);
        // y never changes, so its dependent rule runs exactly once via the
        // initial worklist seeding, not via reactivation.
        assert_eq!(result.changed.get(&TagName::new("z")), Some(&"derived".to_string()));
        assert!(!result.changed.contains_key(&TagName::new("y")));
    }
}
