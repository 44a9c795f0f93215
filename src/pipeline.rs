//! Batch runner: fetch, pick an extractor, extract, discover resources, once
//! per identifier on a bounded worker pool. A failure is recorded against its
//! identifier and the batch moves on.

use crate::config::PROGRESS_INTERVAL;
use crate::error::{ExtractionError, FetchError};
use crate::extract::Extraction;
use crate::factory::ExtractorFactory;
use crate::fetch::{FetchedMetadata, MetadataFetcher, Transport};
use crate::models::Resource;
use crate::stats::{BatchStats, StatsSnapshot};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rustc_hash::FxHashSet;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Extract,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRecord {
    pub identifier: String,
    pub source: FetchedMetadata,
    pub extraction: Extraction,
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetFailure {
    pub identifier: String,
    pub stage: Stage,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub records: Vec<DatasetRecord>,
    pub failures: Vec<DatasetFailure>,
    pub stats: StatsSnapshot,
    pub elapsed_secs: f64,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.records.len() + self.failures.len()
    }

    /// True when there was work and none of it succeeded.
    pub fn all_failed(&self) -> bool {
        self.records.is_empty() && !self.failures.is_empty()
    }
}

/// Reads one identifier per line. Blank lines and `#` comments are skipped,
/// repeats are dropped keeping the first occurrence.
pub fn load_identifiers(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read identifier file: {}", path.display()))?;

    let mut seen = FxHashSet::default();
    let mut identifiers = Vec::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if seen.insert(line.to_string()) {
            identifiers.push(line.to_string());
        } else {
            debug!(identifier = line, "skipping repeated identifier");
        }
    }
    info!(count = identifiers.len(), path = %path.display(), "loaded identifiers");
    Ok(identifiers)
}

pub fn run_batch<T: Transport>(
    identifiers: &[String],
    fetcher: &MetadataFetcher<T>,
    factory: &ExtractorFactory,
    workers: usize,
) -> Result<BatchReport> {
    let started = Instant::now();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("geometa-worker-{i}"))
        .build()
        .context("Failed to build worker pool")?;

    let stats = BatchStats::new();
    let pb = make_progress_bar(identifiers.len() as u64);
    info!(identifiers = identifiers.len(), workers, "starting batch");

    let outcomes: Vec<Result<DatasetRecord, DatasetFailure>> = pool.install(|| {
        identifiers
            .par_iter()
            .map(|identifier| {
                let outcome = process_one(identifier, fetcher, factory, &stats);
                if let Err(failure) = &outcome {
                    stats.inc_failed();
                    warn!(
                        identifier = %failure.identifier,
                        stage = ?failure.stage,
                        reason = %failure.reason,
                        "dataset failed"
                    );
                }
                pb.inc(1);
                if stats.processed() % PROGRESS_INTERVAL == 0 {
                    pb.set_message(format!("{} failed", stats.failed()));
                }
                outcome
            })
            .collect()
    });
    pb.finish_and_clear();

    let (records, failures): (Vec<_>, Vec<_>) = outcomes.into_iter().partition(Result::is_ok);
    let records: Vec<DatasetRecord> = records.into_iter().filter_map(Result::ok).collect();
    let failures: Vec<DatasetFailure> = failures.into_iter().filter_map(Result::err).collect();

    let report = BatchReport {
        records,
        failures,
        stats: stats.snapshot(),
        elapsed_secs: started.elapsed().as_secs_f64(),
    };
    info!(
        extracted = report.stats.extracted,
        failed = report.stats.failed,
        duration_secs = report.elapsed_secs,
        "batch complete"
    );
    Ok(report)
}

fn process_one<T: Transport>(
    identifier: &str,
    fetcher: &MetadataFetcher<T>,
    factory: &ExtractorFactory,
    stats: &BatchStats,
) -> Result<DatasetRecord, DatasetFailure> {
    let fail = |stage, reason: String| DatasetFailure {
        identifier: identifier.to_string(),
        stage,
        reason,
    };

    let source = fetcher
        .fetch(identifier)
        .map_err(|e: FetchError| fail(Stage::Fetch, e.to_string()))?;
    stats.inc_fetched();

    let extractor = factory
        .create_extractor_by_format(source.format.as_str())
        .or_else(|_| factory.extractor_for(&source.path))
        .map_err(|e: ExtractionError| fail(Stage::Extract, e.to_string()))?;
    let extraction = extractor
        .extract(&source.path)
        .map_err(|e| fail(Stage::Extract, e.to_string()))?;
    let resources = extractor.extract_resources(&source.path);

    stats.inc_extracted();
    stats.add_placeholders(extraction.placeholders().count() as u64);
    stats.add_resources(resources.len() as u64);
    debug!(
        identifier,
        format = %source.format,
        gaps = extraction.gaps.len(),
        resources = resources.len(),
        "dataset extracted"
    );

    Ok(DatasetRecord {
        identifier: identifier.to_string(),
        source,
        extraction,
        resources,
    })
}

fn make_progress_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} datasets {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
    pb.set_style(style);
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}
