//! tag-engine: infers properties of directory-based objects by applying
//! declarative rules to filesystem-materialized tags.
//!
//! Data flow (§2): paths -> [`scanner`] -> [`reader`] -> per-object tag map
//! -> [`evaluator`] (against a [`rule::registry::RuleRegistry`]) -> result
//! stream ([`spill`]) -> [`renderer`] + [`writeback`].

pub mod config;
pub mod csv_out;
pub mod errors;
pub mod evaluator;
pub mod reader;
pub mod renderer;
pub mod rule;
pub mod scanner;
pub mod spill;
pub mod tag_store;
pub mod worker_pool;
pub mod writeback;

#[cfg(feature = "toggleable-procs")]
pub mod toggleable_procs;

use std::fs;
use std::io::BufWriter;
use std::path::Path;

use tracing::{info, instrument};

use crate::config::RunSettings;
use crate::errors::EngineError;
use crate::rule::compiler::{compile_source, RuleIdAllocator};
use crate::rule::registry::RuleRegistry;
use crate::tag_store::ObjectId;
use crate::worker_pool::RunOutcome;

/// Loads every rules file (basename starting with `#`, per §6) found
/// (non-recursively) under each of `rules_dirs`, compiling them in order
/// into one shared [`RuleRegistry`]. Syntax errors abort the whole load
/// (§7: "syntax errors surface to the caller at rules-load time").
#[instrument(skip_all, fields(dirs = rules_dirs.len()))]
pub fn load_rules(rules_dirs: &[impl AsRef<Path>]) -> Result<RuleRegistry, EngineError> {
    let mut registry = RuleRegistry::new();
    let mut ids = RuleIdAllocator::new();
    for dir in rules_dirs {
        let dir = dir.as_ref();
        let entries = fs::read_dir(dir).map_err(|_| EngineError::RulesDirNotFound(dir.to_path_buf()))?;
        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('#')))
            .collect();
        paths.sort();
        for path in paths {
            let source = fs::read_to_string(&path).map_err(|e| EngineError::RulesFileIo(path.clone(), e))?;
            compile_source(&path, &source, &mut ids, &mut registry)?;
            info!(file = %path.display(), "loaded rules file");
        }
    }
    Ok(registry)
}

/// Runs a complete batch: load rules, evaluate every object, stream
/// results to a spill file, and optionally write a CSV summary (§6).
/// Per-object writeback and `mash.log` rendering (§4.8, §4.7) happen
/// inside [`worker_pool::run_batches`] itself, gated by
/// `settings.write_results`, since that's where the real per-object
/// [`evaluator::EvalResult`] — not a re-hydrated spill record — is in
/// scope.
#[instrument(skip_all, fields(objects = objects.len()))]
pub fn run(objects: &[ObjectId], settings: &RunSettings, spill_path: &Path) -> Result<RunOutcome, EngineError> {
    let registry = load_rules(&settings.rules_dirs)?;

    let spill_file = fs::File::create(spill_path).map_err(|e| EngineError::SpillFileIo(spill_path.to_path_buf(), e))?;
    let mut writer = BufWriter::new(spill_file);
    let outcome = worker_pool::run_batches(objects, &registry, settings, &mut writer)?;

    if let Some(csv_path) = &settings.csv_out {
        let mut csv_file =
            fs::File::create(csv_path).map_err(|e| EngineError::SpillFileIo(csv_path.clone(), e))?;
        csv_out::write_csv(&mut csv_file, &outcome.results)
            .map_err(|e| EngineError::SpillFileIo(csv_path.clone(), e))?;
    }

    Ok(outcome)
}
