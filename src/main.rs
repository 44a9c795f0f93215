use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use geometa::config::{DEFAULT_CATALOGUE, DEFAULT_MAX_RETRIES, DEFAULT_TIMEOUT_SECS, DEFAULT_WORKERS};
use geometa::extract::{Extraction, ExtractorConfig};
use geometa::factory::ExtractorFactory;
use geometa::fetch::{FetchConfig, MetadataFetcher, MetadataFormat};
use geometa::models::Resource;
use geometa::pipeline;
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "geometa")]
#[command(about = "Fetch and normalize geospatial dataset metadata")]
struct Cli {
    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract canonical metadata from local files and print it as JSON
    Extract(ExtractArgs),
    /// Download the metadata record for one dataset identifier
    Fetch(FetchArgs),
    /// Fetch and extract every identifier listed in a file
    Batch(BatchArgs),
}

#[derive(Args)]
struct ExtractArgs {
    /// Metadata files (.json, .xml, .jsonld, .ttl)
    #[arg(required = true)]
    paths: Vec<PathBuf>,

    /// Fail on missing mandatory fields instead of using placeholders
    #[arg(long)]
    strict: bool,

    /// Also list downloadable resources referenced by each record
    #[arg(long)]
    resources: bool,

    /// Force a format token (json, xml, jsonld, rdf) instead of dispatching on extension
    #[arg(long)]
    format: Option<String>,
}

#[derive(Args)]
struct FetchArgs {
    /// Dataset identifier, usually a UUID
    identifier: String,

    #[command(flatten)]
    remote: RemoteArgs,
}

#[derive(Args)]
struct BatchArgs {
    /// File with one identifier per line (blank lines and # comments ignored)
    identifiers: PathBuf,

    #[command(flatten)]
    remote: RemoteArgs,

    /// Concurrent fetch-and-extract workers
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// Fail on missing mandatory fields instead of using placeholders
    #[arg(long)]
    strict: bool,

    /// Write the full batch report as JSON to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct RemoteArgs {
    /// Catalogue whose URL conventions to use (ceh, ceda)
    #[arg(long, default_value = DEFAULT_CATALOGUE)]
    catalogue: String,

    /// Preferred metadata format (json or xml)
    #[arg(long)]
    format: Option<MetadataFormat>,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Retries after HTTP 429 or 5xx responses
    #[arg(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    /// Directory for downloaded metadata files (default: system temp dir)
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

impl RemoteArgs {
    fn to_config(&self) -> FetchConfig {
        let defaults = FetchConfig::default();
        FetchConfig {
            catalogue: self.catalogue.clone(),
            timeout: Duration::from_secs(self.timeout),
            max_retries: self.max_retries,
            preferred_format: self.format,
            download_dir: self.out_dir.clone().unwrap_or(defaults.download_dir),
            backoff: defaults.backoff,
        }
    }
}

#[derive(Serialize)]
struct ExtractedFile<'a> {
    path: &'a Path,
    #[serde(flatten)]
    extraction: Extraction,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<Vec<Resource>>,
}

fn extract_file<'a>(
    factory: &ExtractorFactory,
    path: &'a Path,
    format: Option<&str>,
    with_resources: bool,
) -> Result<ExtractedFile<'a>> {
    let extractor = match format {
        Some(token) => factory.create_extractor_by_format(token)?,
        None => factory.extractor_for(path)?,
    };
    let extraction = extractor.extract(path)?;
    for gap in &extraction.gaps {
        warn!(path = %path.display(), "{gap}");
    }
    let resources = with_resources.then(|| extractor.extract_resources(path));
    Ok(ExtractedFile {
        path,
        extraction,
        resources,
    })
}

fn run_extract(args: ExtractArgs) -> Result<()> {
    let config = if args.strict {
        ExtractorConfig::strict()
    } else {
        ExtractorConfig::lenient()
    };
    let factory = ExtractorFactory::with_defaults(config);

    let results: Vec<(&PathBuf, Result<ExtractedFile>)> = args
        .paths
        .par_iter()
        .map(|path| {
            let result = extract_file(&factory, path, args.format.as_deref(), args.resources);
            (path, result)
        })
        .collect();

    let mut extracted = Vec::new();
    let mut failed = 0usize;
    for (path, result) in results {
        match result {
            Ok(file) => extracted.push(file),
            Err(e) => {
                failed += 1;
                error!(path = %path.display(), "{:#}", e);
                eprintln!("Error: {}: {:#}", path.display(), e);
            }
        }
    }

    let json = serde_json::to_string_pretty(&extracted).context("Failed to serialize records")?;
    println!("{json}");

    info!(extracted = extracted.len(), failed, "extraction finished");
    if extracted.is_empty() {
        bail!("all {failed} files failed to extract");
    }
    Ok(())
}

fn run_fetch(args: FetchArgs) -> Result<()> {
    let fetcher = MetadataFetcher::new(args.remote.to_config())?;
    let fetched = fetcher
        .fetch(&args.identifier)
        .with_context(|| format!("Failed to fetch {}", args.identifier))?;

    println!("{}\t{}", fetched.path.display(), fetched.format);
    info!(url = %fetched.url, bytes = fetched.bytes, "fetch complete");
    Ok(())
}

fn run_batch(args: BatchArgs) -> Result<()> {
    let identifiers = pipeline::load_identifiers(&args.identifiers)?;
    if identifiers.is_empty() {
        warn!(path = %args.identifiers.display(), "no identifiers to process");
        return Ok(());
    }

    let fetcher = MetadataFetcher::new(args.remote.to_config())?;
    let config = if args.strict {
        ExtractorConfig::strict()
    } else {
        ExtractorConfig::lenient()
    };
    let factory = ExtractorFactory::with_defaults(config);

    let start = Instant::now();
    let report = pipeline::run_batch(&identifiers, &fetcher, &factory, args.workers)?;

    if let Some(output) = &args.output {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        fs::write(output, json)
            .with_context(|| format!("Failed to write report: {}", output.display()))?;
    }

    for failure in &report.failures {
        eprintln!(
            "Failed: {} ({:?}): {}",
            failure.identifier, failure.stage, failure.reason
        );
    }

    println!();
    println!("=== Summary ===");
    println!("Total time:         {:.2}s", start.elapsed().as_secs_f64());
    println!("Identifiers:        {}", report.total());
    println!("Fetched:            {}", report.stats.fetched);
    println!("Extracted:          {}", report.stats.extracted);
    println!("Failed:             {}", report.stats.failed);
    println!("Placeholders used:  {}", report.stats.placeholders);
    println!("Resources found:    {}", report.stats.resources);

    if report.all_failed() {
        bail!("all {} identifiers failed", report.total());
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let result = match cli.command {
        Commands::Extract(args) => run_extract(args),
        Commands::Fetch(args) => run_fetch(args),
        Commands::Batch(args) => run_batch(args),
    };

    match result {
        Ok(()) => {
            info!("Completed successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Error: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
