//! The four built-ins exposed to rule bodies (§4.1): `rule_file`,
//! `rule_name`, `object_relative_path`, `has`. `exception` is handled
//! directly as a [`crate::rule::lang::Stmt::Exception`], not a call
//! through this trait.

use std::path::PathBuf;

use crate::rule::lang::{Scope, Value};
use crate::rule::{Builtins, Rule};
use crate::tag_store::{ObjectId, TagName, TagValue};
use std::collections::HashMap;

pub struct ObjectBuiltins<'a> {
    pub rule: &'a Rule,
    pub object_id: &'a ObjectId,
    pub context: &'a HashMap<TagName, TagValue>,
}

impl<'a> Builtins for ObjectBuiltins<'a> {
    fn call(&self, name: &str, args: &[Value], _scope: &Scope) -> Result<Value, String> {
        match name {
            "rule_file" => Ok(Value::Str(self.rule.source_file.display().to_string())),
            "rule_name" => Ok(Value::Str(self.rule.display_name())),
            "object_relative_path" => {
                let mut path = self.object_id.path().to_path_buf();
                for arg in args {
                    path = join_segment(path, &arg.as_string());
                }
                Ok(Value::Str(path.display().to_string()))
            }
            "has" => {
                let tag = args
                    .first()
                    .ok_or_else(|| "has() requires one argument".to_string())?
                    .as_string();
                let pattern = TagName::new(tag);
                let found = if pattern.is_glob() {
                    self.context.keys().any(|t| pattern.matches(t))
                } else {
                    self.context.contains_key(&pattern)
                };
                Ok(Value::Bool(found))
            }
            other => Err(format!("unknown function: {other}")),
        }
    }
}

fn join_segment(mut path: PathBuf, segment: &str) -> PathBuf {
    path.push(segment);
    path
}
