//! Rule registry (§3, §4.2): the indexed collection of compiled rules the
//! evaluator dispatches against.

use std::collections::HashMap;

use super::{Rule, RuleId};
use crate::errors::{EngineError, LocationSuffix};
use crate::tag_store::TagName;

#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: HashMap<RuleId, Rule>,
    insertion_order: Vec<RuleId>,
    by_input: HashMap<TagName, Vec<RuleId>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a compiled rule. Fails with `SyntaxError` if the rule's id
    /// already exists in this registry (ids must be unique within a run).
    /// Updates `by_input` for every `in` pattern and ensures an entry
    /// exists for every `out` name too, so lookups never fail (§3).
    pub fn add_rule(&mut self, rule: Rule) -> Result<(), EngineError> {
        if self.rules.contains_key(&rule.id) {
            return Err(EngineError::SyntaxError {
                file: rule.source_file.clone(),
                at: LocationSuffix(None),
                message: format!("duplicate rule id {}", rule.id),
            });
        }
        self.insertion_order.push(rule.id);
        for input in &rule.inputs {
            self.by_input.entry(input.clone()).or_default().push(rule.id);
        }
        for output in &rule.outputs {
            self.by_input.entry(output.clone()).or_default();
        }
        self.rules.insert(rule.id, rule);
        Ok(())
    }

    pub fn get(&self, id: RuleId) -> Option<&Rule> {
        self.rules.get(&id)
    }

    /// The ordered set of rule ids whose `in` contains `tag_name` (exact
    /// match, or glob-suffix match on a pattern ending in `.*`).
    ///
    /// Walks `insertion_order` rather than `by_input` directly: `by_input`
    /// keys on the pattern text, so iterating its `HashMap` would hand back
    /// matches in the hasher's (per-process-random) order whenever more
    /// than one pattern matches the same tag. Registration order is what
    /// §8 P5 means by "identical inputs yield identical trace logs" when
    /// rules are given in a fixed order.
    pub fn rules_by_input(&self, tag_name: &TagName) -> Vec<RuleId> {
        self.insertion_order
            .iter()
            .copied()
            .filter(|id| {
                self.rules[id].inputs.iter().any(|pattern| pattern.matches(tag_name))
            })
            .collect()
    }

    pub fn all_rules(&self) -> impl Iterator<Item = &Rule> {
        self.insertion_order.iter().filter_map(|id| self.rules.get(id))
    }

    pub fn all_rule_ids(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.insertion_order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{Body, RuleKind};
    use std::path::PathBuf;

    fn rule(id: u32, inputs: &[&str], outputs: &[&str]) -> Rule {
        Rule {
            id: RuleId(id),
            name: String::new(),
            source_file: PathBuf::from("#test"),
            inputs: inputs.iter().map(|s| TagName::new(*s)).collect(),
            outputs: outputs.iter().map(|s| TagName::new(*s)).collect(),
            conditions: Vec::new(),
            kind: RuleKind::Default,
            body: Body::Block(Vec::new()),
        }
    }

    #[test]
    fn by_input_covers_outputs_with_empty_set() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(rule(0, &["x"], &["y"])).unwrap();
        assert_eq!(registry.rules_by_input(&TagName::new("y")), Vec::<RuleId>::new());
        assert_eq!(registry.rules_by_input(&TagName::new("x")), vec![RuleId(0)]);
    }

    #[test]
    fn glob_input_matches_nested_tag() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(rule(0, &["proj.*"], &["summary"])).unwrap();
        assert_eq!(registry.rules_by_input(&TagName::new("proj.name")), vec![RuleId(0)]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = RuleRegistry::new();
        registry.add_rule(rule(0, &["x"], &["y"])).unwrap();
        let err = registry.add_rule(rule(0, &["a"], &["b"])).unwrap_err();
        assert!(matches!(err, EngineError::SyntaxError { .. }));
    }
}
