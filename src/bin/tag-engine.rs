//! CLI entry point (§6): parses arguments, resolves the layered config,
//! collects object paths from args or stdin, and runs the engine.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use colored::Colorize;
use tag_engine::config::{resolve_settings, Args, Source};
use tag_engine::tag_store::ObjectId;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let settings = match resolve_settings(&args, None) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{} {err}", "tag-engine:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let objects = match collect_objects(&args, &settings) {
        Ok(objects) => objects,
        Err(err) => {
            eprintln!("{} {err}", "tag-engine:".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let spill_path = PathBuf::from("tagengine.spill");
    match tag_engine::run(&objects, &settings, &spill_path) {
        Ok(outcome) => {
            let errored = outcome.results.iter().filter(|r| !r.errors.is_empty()).count();
            let summary = format!("processed {} object(s), {errored} with errors", outcome.results.len());
            if errored == 0 {
                println!("{}", summary.green());
            } else {
                println!("{}", summary.yellow());
            }
            ExitCode::SUCCESS
        }
        Err(err) => {
            eprintln!("{} {err}", "tag-engine:".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn collect_objects(args: &Args, settings: &tag_engine::config::RunSettings) -> io::Result<Vec<ObjectId>> {
    match &settings.source {
        Source::Args => Ok(args.objects.iter().cloned().map(ObjectId::new).collect()),
        Source::Stdin => {
            let stdin = io::stdin();
            let mut objects = Vec::new();
            for line in stdin.lock().lines() {
                objects.push(ObjectId::new(line?));
            }
            Ok(objects)
        }
    }
}
