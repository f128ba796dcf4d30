//! Worker pool (§4.6): dispatches one evaluator job per object across a
//! bounded pool of threads and streams serialized results to a spill file.
//!
//! Scanning and reading are `tokio`-async (§4.4); evaluation is CPU-bound
//! and runs on a `rayon` thread pool (§5: "embarrassingly parallel...
//! independent workers, each doing a purely CPU-bound fixed-point loop").
//! Each batch scans+reads all its objects first, then dispatches one
//! evaluation job per object round-robin across `rayon` workers, then
//! awaits every job in the batch before moving to the next one (§4.6).

use std::io::Write;
use std::sync::Arc;

use crossbeam_channel::unbounded;
use dashmap::DashSet;
use tracing::{debug_span, instrument};

use crate::config::RunSettings;
use crate::errors::{EngineError, EvalError};
use crate::evaluator::{evaluate_object, EvalResult};
use crate::reader::read_tags;
use crate::renderer::render_report;
use crate::rule::registry::RuleRegistry;
use crate::scanner::scan_object;
use crate::spill::{append_record, ObjectResult};
use crate::tag_store::ObjectId;
use crate::writeback::write_object;

pub struct RunOutcome {
    pub results: Vec<ObjectResult>,
}

/// Runs every object in `objects` through scan -> read -> evaluate,
/// batched per `settings.batch_size` and parallelized per
/// `settings.worker_threads`, streaming one record per object to
/// `spill_writer` as each job completes.
#[instrument(skip_all, fields(objects = objects.len()))]
pub fn run_batches<W: Write>(
    objects: &[ObjectId],
    registry: &RuleRegistry,
    settings: &RunSettings,
    spill_writer: &mut W,
) -> Result<RunOutcome, EngineError> {
    let (worker_threads, batch_size) = settings.clamp_to_batch(objects.len());
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(worker_threads.max(1))
        .build()
        .expect("build rayon worker pool");

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("current-thread tokio runtime");

    // Tracks objects already dispatched across every batch in this run, so a
    // path listed twice (e.g. via duplicate stdin lines) is only evaluated
    // and written back once; shared across `rayon` worker threads.
    let seen = Arc::new(DashSet::new());

    let mut results = Vec::with_capacity(objects.len());
    for batch in objects.chunks(batch_size.max(1)) {
        let _span = debug_span!("batch", size = batch.len()).entered();
        let loaded = rt.block_on(load_batch(batch, settings.channels_limit));

        let (tx, rx) = unbounded();
        pool.scope(|scope| {
            for (object_id, scanned) in loaded {
                let tx = tx.clone();
                let seen = Arc::clone(&seen);
                scope.spawn(move |_| {
                    if !seen.insert(object_id.clone()) {
                        tracing::debug!(object = %object_id, "skipping duplicate object in this run");
                        return;
                    }
                    let empty_tags = crate::tag_store::Object::new();
                    let (tags, eval) = match &scanned {
                        Ok(tags) => (tags, evaluate_object(&object_id, tags, registry, settings.max_steps)),
                        Err(error) => (&empty_tags, EvalResult::object_not_found(error.clone())),
                    };
                    if settings.write_results {
                        let errors: Vec<String> = eval.errors.iter().map(ToString::to_string).collect();
                        if let Err(e) = write_object(&object_id, &eval.changed, &errors) {
                            tracing::warn!(object = %object_id, error = %e, "writeback failed");
                        }
                        let report = render_report(&object_id, &tags.tags, &eval, registry);
                        if let Err(e) = std::fs::write(object_id.path().join("mash.log"), report) {
                            tracing::warn!(object = %object_id, error = %e, "failed to write mash.log");
                        }
                    }
                    let record = ObjectResult::from_eval(&object_id, &tags.tags, &eval);
                    let _ = tx.send(record);
                });
            }
        });
        drop(tx);
        for record in rx {
            append_record(spill_writer, &record)?;
            results.push(record);
        }
    }

    Ok(RunOutcome { results })
}

async fn load_batch(
    batch: &[ObjectId],
    channels_limit: usize,
) -> Vec<(ObjectId, Result<crate::tag_store::Object, EvalError>)> {
    let mut loaded = Vec::with_capacity(batch.len());
    for object_id in batch {
        match scan_object(object_id.path()) {
            Ok(scanned) => {
                let tags = read_tags(scanned, channels_limit).await;
                loaded.push((object_id.clone(), Ok(tags)));
            }
            Err(error) => {
                loaded.push((object_id.clone(), Err(error)));
            }
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::compiler::{compile_source, RuleIdAllocator};
    use std::fs;

    #[test]
    fn evaluates_a_batch_and_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let object_dir = dir.path().join("obj1");
        fs::create_dir_all(&object_dir).unwrap();
        fs::write(object_dir.join("#x"), "41").unwrap();

        let mut registry = RuleRegistry::new();
        let mut ids = RuleIdAllocator::new();
        compile_source(
            std::path::Path::new("#rules"),
            "using { in {x} } define { rule out {y} always { set y [expr {$x + 1}] } }",
            &mut ids,
            &mut registry,
        )
        .unwrap();

        let settings = RunSettings {
            worker_threads: 2,
            batch_size: 2,
            ..RunSettings::default()
        };
        let mut spill = Vec::new();
        let outcome = run_batches(&[ObjectId::new(object_dir)], &registry, &settings, &mut spill).unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].changed_tags.get("y"), Some(&"42".to_string()));
        assert!(!spill.is_empty());
    }
}
