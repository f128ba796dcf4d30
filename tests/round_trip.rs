//! Round-trip / idempotence properties (§8 R1, R2).

use std::fs;
use std::path::Path;

use tag_engine::evaluator::{evaluate_object, DEFAULT_MAX_STEPS};
use tag_engine::reader::read_tags;
use tag_engine::rule::compiler::{compile_source, RuleIdAllocator};
use tag_engine::rule::registry::RuleRegistry;
use tag_engine::scanner::scan_object;
use tag_engine::tag_store::{ObjectId, TagName};
use tag_engine::writeback::write_object;

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
fn r1_writeback_then_rescan_matches_initial_union_changed() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#x"), "41").unwrap();
    let object_id = ObjectId::new(dir.path());

    let registry = compile("using { in {x} } define { rule out {y} always { set y [expr {$x + 1}] } }");
    let initial = scan_and_read(dir.path());
    let result = evaluate_object(&object_id, &initial, &registry, DEFAULT_MAX_STEPS);

    write_object(&object_id, &result.changed, &[]).unwrap();

    let rescanned = scan_and_read(dir.path());
    assert_eq!(rescanned.get(&TagName::new("x")), Some(&"41".to_string()));
    assert_eq!(rescanned.get(&TagName::new("y")), Some(&"42".to_string()));
}

#[test]
fn r2_second_evaluation_is_a_fixed_point() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#x"), "41").unwrap();
    let object_id = ObjectId::new(dir.path());

    let registry = compile("using { in {x} } define { rule out {y} always { set y [expr {$x + 1}] } }");
    let initial = scan_and_read(dir.path());
    let first = evaluate_object(&object_id, &initial, &registry, DEFAULT_MAX_STEPS);
    write_object(&object_id, &first.changed, &[]).unwrap();

    let second_initial = scan_and_read(dir.path());
    let second = evaluate_object(&object_id, &second_initial, &registry, DEFAULT_MAX_STEPS);

    assert!(second.changed.is_empty());
}

#[test]
fn whitespace_value_deletes_the_tag_file_on_writeback() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("#stale"), "old").unwrap();
    let object_id = ObjectId::new(dir.path());

    let mut changed = std::collections::HashMap::new();
    changed.insert(TagName::new("stale"), "   ".to_string());
    write_object(&object_id, &changed, &[]).unwrap();

    assert!(!dir.path().join("#stale").exists());
}
