//! Error taxonomy for the tag engine.
//!
//! `EngineError` covers whole-run or whole-file failures that abort the
//! unit of work they occur in (a rules file, a config load, a spill file).
//! `EvalError` covers the per-object error kinds from the design doc's
//! error handling section: these are always accumulated onto an object's
//! result and never abort a batch.

use std::path::PathBuf;

use thiserror::Error;

use crate::rule::RuleId;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("rules directory not found: {0}")]
    RulesDirNotFound(PathBuf),

    #[error("{file}: syntax error{at}: {message}")]
    SyntaxError {
        file: PathBuf,
        at: LocationSuffix,
        message: String,
    },

    #[error("failed to read rules file {0}: {1}")]
    RulesFileIo(PathBuf, #[source] std::io::Error),

    #[error("failed to write spill file {0}: {1}")]
    SpillFileIo(PathBuf, #[source] std::io::Error),

    #[error("failed to serialize object result: {0}")]
    SpillFileSerialize(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Renders as e.g. " at line 12" or "" when no location is known.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocationSuffix(pub Option<usize>);

impl std::fmt::Display for LocationSuffix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            Some(line) => write!(f, " at line {line}"),
            None => Ok(()),
        }
    }
}

/// A reference to a rule for use in rendered error/trace text:
/// `<id>."<name>"`.
#[derive(Debug, Clone)]
pub struct RuleRef {
    pub id: RuleId,
    pub name: String,
}

impl std::fmt::Display for RuleRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.\"{}\"", self.id, self.name)
    }
}

/// One error accumulated during a single object's evaluation. Never aborts
/// the batch; always collected into the object's `errors` list.
#[derive(Debug, Clone, Error)]
pub enum EvalError {
    #[error("object not found: {0}")]
    ObjectNotFound(PathBuf),

    #[error("{message}")]
    RuleBodyError {
        trace_index: usize,
        rule: RuleRef,
        message: String,
    },

    #[error("didn't set output {tag_name}")]
    MissingOutput {
        trace_index: usize,
        rule: RuleRef,
        tag_name: String,
    },

    #[error("write conflict on {tag_name}: previously written by {previous_writer} at step {previous_trace_index}")]
    WriteConflict {
        trace_index: usize,
        rule: RuleRef,
        tag_name: String,
        previous_writer: RuleRef,
        previous_trace_index: usize,
    },

    #[error("evaluation did not converge after {steps} steps")]
    NonConvergence { steps: usize },
}

impl EvalError {
    pub fn trace_index(&self) -> Option<usize> {
        match self {
            EvalError::ObjectNotFound(_) => None,
            EvalError::RuleBodyError { trace_index, .. }
            | EvalError::MissingOutput { trace_index, .. }
            | EvalError::WriteConflict { trace_index, .. } => Some(*trace_index),
            EvalError::NonConvergence { .. } => None,
        }
    }

    pub fn rule(&self) -> Option<&RuleRef> {
        match self {
            EvalError::RuleBodyError { rule, .. }
            | EvalError::MissingOutput { rule, .. }
            | EvalError::WriteConflict { rule, .. } => Some(rule),
            EvalError::ObjectNotFound(_) | EvalError::NonConvergence { .. } => None,
        }
    }

    pub fn tag_name(&self) -> Option<&str> {
        match self {
            EvalError::MissingOutput { tag_name, .. } | EvalError::WriteConflict { tag_name, .. } => {
                Some(tag_name.as_str())
            }
            _ => None,
        }
    }
}
