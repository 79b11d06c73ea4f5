//! Enrichment CLI
//!
//! Reads a JSON array of `{name, location, postcode}` records, enriches them
//! from every source that has credentials configured, and writes a JSON run
//! report.
//!
//! Usage:
//!   cargo run --features cli --bin enrich -- \
//!     --input playgrounds.json \
//!     --output enriched.json \
//!     --config enrich.yaml \
//!     --cache-dir .cache/enrich
//!
//! API keys come from the environment (a `.env` file is honoured):
//!   GOOGLE_PLACES_API_KEY, TRIPADVISOR_API_KEY

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use place_enrich::config::SourceSettings;
use place_enrich::io::{JsonRecordLoader, JsonResultSink, RecordLoader, ResultSink};
use place_enrich::source::{council, places, reviews};
use place_enrich::{
    CacheStore, CouncilScraper, EnrichmentConfig, FileCacheStore, MemoryCacheStore, Orchestrator,
    PlacesClient, ReviewSiteClient, SourceClient, SourceId,
};

/// Enrich location records from external sources
#[derive(Parser, Debug)]
#[command(name = "enrich")]
#[command(about = "Enrich location records from Places, review-site and council sources")]
struct Args {
    /// Input JSON file (array of {name, location, postcode})
    #[arg(long, short = 'i')]
    input: PathBuf,

    /// Output JSON file for the run report
    #[arg(long, short = 'o')]
    output: PathBuf,

    /// YAML configuration file
    #[arg(long, short = 'c', env = "ENRICH_CONFIG")]
    config: Option<PathBuf>,

    /// Persistent cache directory (overrides config)
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Re-fetch every record, ignoring cached entries
    #[arg(long)]
    refresh: bool,

    /// Concurrent workers (overrides config)
    #[arg(long, short = 'w')]
    workers: Option<usize>,
}

fn api_key(settings: &SourceSettings, default_var: &str) -> Option<String> {
    let var = settings.api_key_env.as_deref().unwrap_or(default_var);
    std::env::var(var).ok().filter(|k| !k.trim().is_empty())
}

/// Build every source that is enabled and has what it needs to run
fn build_sources(config: &EnrichmentConfig) -> Result<Vec<Arc<dyn SourceClient>>> {
    let mut clients: Vec<Arc<dyn SourceClient>> = Vec::new();

    let settings = config.source_settings(&SourceId::from(places::SOURCE_ID));
    if settings.enabled {
        match api_key(&settings, "GOOGLE_PLACES_API_KEY") {
            Some(key) => {
                let mut client = PlacesClient::new(key).context("Failed to create Places client")?;
                if let Some(base) = &settings.base_url {
                    client = client.with_base_url(base);
                }
                clients.push(Arc::new(client));
            }
            None => tracing::warn!("No Places API key set, skipping source"),
        }
    }

    let settings = config.source_settings(&SourceId::from(reviews::SOURCE_ID));
    if settings.enabled {
        match api_key(&settings, "TRIPADVISOR_API_KEY") {
            Some(key) => {
                let mut client =
                    ReviewSiteClient::new(key).context("Failed to create review-site client")?;
                if let Some(base) = &settings.base_url {
                    client = client.with_base_url(base);
                }
                clients.push(Arc::new(client));
            }
            None => tracing::warn!("No review-site API key set, skipping source"),
        }
    }

    let settings = config.source_settings(&SourceId::from(council::SOURCE_ID));
    if settings.enabled {
        match &settings.url_template {
            Some(template) => clients.push(Arc::new(
                CouncilScraper::new(template.clone()).context("Invalid council url_template")?,
            )),
            None => tracing::warn!("No council url_template configured, skipping source"),
        }
    }

    Ok(clients)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => EnrichmentConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => EnrichmentConfig::default(),
    };
    if let Some(workers) = args.workers {
        config = config.with_workers(workers);
    }
    if let Some(dir) = args.cache_dir {
        config.cache.directory = Some(dir);
    }
    config.cache.refresh |= args.refresh;

    let store: Arc<dyn CacheStore> = match &config.cache.directory {
        Some(dir) => Arc::new(
            FileCacheStore::open(dir)
                .await
                .with_context(|| format!("Failed to open cache at {}", dir.display()))?,
        ),
        None => Arc::new(MemoryCacheStore::new()),
    };

    let mut builder = Orchestrator::builder(config.clone()).cache_store(store);
    for client in build_sources(&config)? {
        builder = builder.source_arc(client);
    }
    let orchestrator = builder.build().context("Failed to build orchestrator")?;

    let shutdown = orchestrator.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing in-flight records");
            shutdown.trigger();
        }
    });

    let records = JsonRecordLoader::new(&args.input)
        .load()
        .await
        .with_context(|| format!("Failed to read {}", args.input.display()))?;

    let report = orchestrator.run(records).await;

    JsonResultSink::new(&args.output)
        .write(&report)
        .await
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("\nRun {}", report.run_id);
    print!("{}", report.stats);
    Ok(())
}
