//! Integration coverage for the literal boundary scenarios: real
//! `tempfile`-backed object directories, scanned and read from disk, then
//! evaluated against a compiled ruleset.

use std::fs;
use std::path::Path;

use tag_engine::errors::EvalError;
use tag_engine::evaluator::{evaluate_object, DEFAULT_MAX_STEPS};
use tag_engine::reader::read_tags;
use tag_engine::rule::compiler::{compile_source, RuleIdAllocator};
use tag_engine::rule::registry::RuleRegistry;
use tag_engine::scanner::scan_object;
use tag_engine::tag_store::{ObjectId, TagName};

fn compile(src: &str) -> RuleRegistry {
    let mut registry = RuleRegistry::new();
    let mut ids = RuleIdAllocator::new();
    compile_source(Path::new("#rules"), src, &mut ids, &mut registry).unwrap();
    registry
}

fn scan_and_read(dir: &Path) -> tag_engine::tag_store::Object {
    let scanned = scan_object(dir).unwrap();
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(read_tags(scanned, 64))
}

#[test]
fn scenario_1_no_rules_one_tag() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#k"), "v").unwrap();

    let registry = RuleRegistry::new();
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert!(result.changed.is_empty());
    assert_eq!(object.get(&TagName::new("k")), Some(&"v".to_string()));
}

#[test]
fn scenario_2_simple_default_rule() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#x"), "41").unwrap();

    let registry = compile("using { in {x} } define { rule out {y} always { set y [expr {$x + 1}] } }");
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert_eq!(result.changed.get(&TagName::new("y")), Some(&"42".to_string()));
}

#[test]
fn scenario_3_mapping_rule_missing_key() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#color"), "blue").unwrap();

    let registry = compile("rule in {color} out {hex} map { {red} {#f00}  {green} {#0f0} }");
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert!(result.changed.is_empty());
    assert!(result.errors.is_empty());
    assert!(result.context.get(&TagName::new("hex")).is_none());
}

#[test]
fn scenario_4_claim_violation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#count"), "-3").unwrap();

    let registry = compile("rule in {count} always claim {$count >= 0}");
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert!(result.changed.is_empty());
    assert_eq!(result.errors.len(), 1);
    assert!(matches!(&result.errors[0], EvalError::RuleBodyError { message, .. } if message.contains("Claim violated")));
}

#[test]
fn scenario_5_write_conflict() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#seed"), "1").unwrap();

    let registry = compile(
        r#"
        using { in {seed} } define {
            rule out {color} always { set color "red" }
            rule out {color} always { set color "blue" }
        }
        "#,
    );
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert_eq!(result.context.get(&TagName::new("color")), Some(&"blue".to_string()));
    assert_eq!(result.errors.iter().filter(|e| matches!(e, EvalError::WriteConflict { .. })).count(), 1);
}

#[test]
fn scenario_6_reactivation() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#x"), "5").unwrap();

    let registry = compile(
        r#"
        rule in {y} out {z} always { set z [expr {$y + 1}] }
        rule in {x} out {y} always { set y [expr {$x * 2}] }
        "#,
    );
    let object = scan_and_read(dir.path());
    let result = evaluate_object(&ObjectId::new(dir.path()), &object, &registry, DEFAULT_MAX_STEPS);

    assert_eq!(result.changed.get(&TagName::new("y")), Some(&"10".to_string()));
    assert_eq!(result.changed.get(&TagName::new("z")), Some(&"11".to_string()));
}
