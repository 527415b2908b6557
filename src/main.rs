// Command line entry point for the screenshot annotator

use labelingo::{
    cli::Args,
    core::Config,
    orchestration::BatchOrchestrator,
    services::{build_providers, ResponseCache},
    utils::Metrics,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration, CLI flags win over the environment
    let mut config = Config::new().context("Failed to load configuration")?;
    args.apply_to(&mut config);

    let filter = EnvFilter::new(format!(
        "labelingo={}",
        match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = Arc::new(config);
    let metrics = Metrics::new();

    // Clearing needs the on-disk store even when lookups are bypassed
    let cache = if config.cache_enabled() || args.clear_cache {
        ResponseCache::open(config.cache_dir(), Some(metrics.clone())).await
    } else {
        ResponseCache::disabled()
    };

    if args.clear_cache {
        cache.clear_all();
        cache.flush().await.context("Failed to clear the response cache")?;
        if args.images.is_empty() {
            return Ok(());
        }
    }

    let (entries, size_mb) = cache.stats().await;
    info!("Response cache: {} entries ({:.2} MB)", entries, size_mb);

    let jobs = args.jobs(config.output_format())?;
    let providers = build_providers(&config.analysis);
    let orchestrator = BatchOrchestrator::new(config.clone(), providers, cache, metrics.clone());

    let result = orchestrator
        .process_batch(jobs, &args.processing_config())
        .await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        for page in &result.results {
            match (&page.output_path, &page.error) {
                (Some(output), _) => {
                    println!(
                        "✓ {} → {} ({} regions, {:.0}ms)",
                        page.filename,
                        output.display(),
                        page.regions,
                        page.processing_time_ms
                    );
                    if let Some(reason) = &page.fallback_reason {
                        warn!("{}: wrote SVG instead ({})", page.filename, reason);
                    }
                }
                (None, error) => {
                    println!(
                        "✗ {}: {}",
                        page.filename,
                        error.as_deref().unwrap_or("unknown error")
                    );
                }
            }
        }
        println!(
            "{} of {} images annotated in {:.0}ms",
            result.successful, result.total, result.processing_time_ms
        );
    }

    if args.stats {
        println!("{}", serde_json::to_string_pretty(&metrics.snapshot())?);
    }

    if result.has_failures() {
        std::process::exit(1);
    }

    Ok(())
}
