//! Batch sweep over the upload directory.
//!
//! Collects the files in `[uploads].dir` that match `include_globs` (top
//! level only, sorted by name) and analyzes them one after another. A failed
//! file is logged and counted; the sweep always moves on to the next one.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::AnalysisResult;
use crate::orchestrator::{AnalyzeRequest, Orchestrator};
use crate::progress::ProgressMode;

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Files directly inside `dir` whose name matches one of `include_globs`.
pub fn collect_uploads(dir: &Path, include_globs: &[String]) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        bail!("upload directory does not exist: {}", dir.display());
    }

    let include_set = build_globset(include_globs)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if include_set.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }

    files.sort();
    Ok(files)
}

/// Analyze `files` in order with the orchestrator's default settings.
///
/// `on_file` sees each file's result as soon as it is known.
pub async fn sweep_files(
    orchestrator: &Orchestrator,
    files: &[PathBuf],
    mut on_file: impl FnMut(&Path, &AnalysisResult),
) -> SweepSummary {
    let mut summary = SweepSummary::default();

    for path in files {
        summary.processed += 1;
        let result = orchestrator.analyze(&AnalyzeRequest::new(path)).await;
        on_file(path, &result);
        if result.success {
            summary.succeeded += 1;
            info!(path = %path.display(), chars = result.answer.chars().count(), "report analyzed");
        } else {
            summary.failed += 1;
            error!(path = %path.display(), error = %result.error, "report analysis failed");
        }
    }

    summary
}

/// CLI entry point for `report-analyst sweep`.
pub async fn run_sweep(config: &Config, progress: ProgressMode) -> Result<SweepSummary> {
    let files = collect_uploads(&config.uploads.dir, &config.uploads.include_globs)?;
    if files.is_empty() {
        println!(
            "No files matching {:?} in {}",
            config.uploads.include_globs,
            config.uploads.dir.display()
        );
        return Ok(SweepSummary::default());
    }

    info!(count = files.len(), dir = %config.uploads.dir.display(), "starting sweep");
    let orchestrator = Orchestrator::from_config(config)?.with_progress(progress.reporter());

    let summary = sweep_files(&orchestrator, &files, |path, result| {
        let label = if result.success { "ok    " } else { "FAILED" };
        println!("{}  {}", label, path.display());
    })
    .await;

    println!(
        "Sweep complete: {} processed, {} succeeded, {} failed",
        summary.processed, summary.succeeded, summary.failed
    );
    Ok(summary)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
