//! Rule model & compiler (§4.1, §4.2).
//!
//! A `Rule` is the compiled form of one surface `rule { ... }` declaration:
//! inputs, outputs, guards and a body, per spec §3's `Rule` record. The
//! surface grammar is handled by [`compiler`]; the small expression
//! language rule bodies are written in lives in [`lang`]; this module holds
//! the compiled data shapes plus the using-context stack (§4.1) both of
//! those feed into.

pub mod compiler;
pub mod lang;
pub mod registry;

use std::path::PathBuf;

use crate::tag_store::TagName;

/// Opaque, run-stable rule identifier. The exact scheme is unspecified by
/// the design (only that it's collision-free and stable); we assign a
/// monotonically increasing counter at `add_rule` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(pub u32);

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Default,
    Claim,
    Map,
}

/// One guard on a rule: either a verbatim boolean `if` expression, or a
/// `when` statement whose result is coerced to a boolean. `always` adds no
/// condition at all.
#[derive(Debug, Clone)]
pub enum Condition {
    If { expr: lang::Expr, source: String },
    When { stmt: lang::Stmt, source: String },
}

impl Condition {
    pub fn source(&self) -> &str {
        match self {
            Condition::If { source, .. } | Condition::When { source, .. } => source,
        }
    }
}

/// The compiled callable body, tagged by `RuleKind` (§9: "represent `body`
/// as a tagged variant ... plus a compiled closure").
#[derive(Debug, Clone)]
pub enum Body {
    Block(Vec<lang::Stmt>),
    Claim { expr: lang::Expr, source: String },
    Map(Vec<(Vec<String>, Vec<String>)>),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub id: RuleId,
    pub name: String,
    pub source_file: PathBuf,
    pub inputs: Vec<TagName>,
    pub outputs: Vec<TagName>,
    pub conditions: Vec<Condition>,
    pub kind: RuleKind,
    pub body: Body,
}

impl Rule {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            format!("Unnamed Rule ({})", self.id)
        } else {
            self.name.clone()
        }
    }
}

/// One frame of the using-context stack (§3, §4.1, §9): accumulated
/// `in`/`out`/`conditions` prepended to every rule declared inside the
/// frame. Frames compose — entering a nested `using` prepends onto the
/// parent frame's accumulation rather than replacing it.
#[derive(Debug, Clone, Default)]
pub struct UsingFrame {
    pub inputs: Vec<TagName>,
    pub outputs: Vec<TagName>,
    pub conditions: Vec<Condition>,
}

/// Explicit scoped-acquisition stack (§9: "enter on `using`, guaranteed
/// release on all exit paths"). `push`/`pop` are always paired by the
/// caller inside a single parse pass, so there is no async/panic unwind
/// concern here the way there would be with a process-wide global.
#[derive(Debug, Default)]
pub struct UsingStack {
    frames: Vec<UsingFrame>,
}

impl UsingStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: UsingFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) {
        self.frames.pop();
    }

    /// The effective (inputs, outputs, conditions) prefix accumulated by
    /// composing every frame currently on the stack, outermost first.
    pub fn effective_prefix(&self) -> UsingFrame {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        let mut conditions = Vec::new();
        for frame in &self.frames {
            inputs.extend(frame.inputs.iter().cloned());
            outputs.extend(frame.outputs.iter().cloned());
            conditions.extend(frame.conditions.iter().cloned());
        }
        UsingFrame {
            inputs,
            outputs,
            conditions,
        }
    }
}

/// Built-ins exposed to rule bodies (§4.1): `rule_file`, `rule_name`,
/// `object_relative_path`, `has`, plus the `exception` control-flow signal
/// (handled directly as a `Stmt::Exception`, not a call).
pub trait Builtins {
    fn call(&self, name: &str, args: &[lang::Value], scope: &lang::Scope) -> Result<lang::Value, String>;
}

/// A no-op `Builtins` used where only pure arithmetic/string evaluation is
/// exercised (e.g. compiler unit tests).
pub struct NullBuiltins;

impl Builtins for NullBuiltins {
    fn call(&self, name: &str, _args: &[lang::Value], _scope: &lang::Scope) -> Result<lang::Value, String> {
        Err(format!("unknown function: {name}"))
    }
}

/// Dedup a sequence while preserving first-occurrence order (§3: "`in` and
/// `conditions` are deduplicated preserving first occurrence").
pub fn dedup_preserve_order<T: Clone + PartialEq>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}
