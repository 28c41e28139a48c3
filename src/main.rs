use site_extractor::extraction::PerplexityClient;
use site_extractor::{
    Config, ExtractionPipeline, InMemoryStore, PipelineError, ProcessingQueue, SiteCatalog,
};

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: site-extractor <image>... | site-extractor vat <partita-iva>";

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!(
        "Starting construction site extractor v{}",
        env!("CARGO_PKG_VERSION")
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        bail!(USAGE);
    }

    let config = Config::from_env().context("Failed to load configuration")?;
    info!("Configuration loaded successfully");
    info!("  +- Image base directory: {}", config.image_base_dir);
    info!("  +-------- Vision provider: {}", config.vision_provider);
    info!("  +------- Enrichment mode: {}", config.enrichment_mode);
    info!("  +------------ Queue size: {}", config.queue_size);

    match args.as_slice() {
        [command, vat_number] if command == "vat" => lookup_vat(&config, vat_number).await,
        paths => process_images(&config, paths).await,
    }
}

fn init_logging() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "site_extractor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn lookup_vat(config: &Config, vat_number: &str) -> Result<()> {
    let Some(key) = config.perplexity_key() else {
        bail!("PERPLEXITY_API_KEY is required for VAT lookups");
    };

    let client = PerplexityClient::new(
        config.perplexity_api_url.clone(),
        key.to_string(),
        config.perplexity_model.clone(),
        config.request_timeout(),
    )?;

    let lookup = client.lookup_vat_number(vat_number).await;
    println!("{}", serde_json::to_string_pretty(&lookup)?);
    Ok(())
}

async fn process_images(config: &Config, paths: &[String]) -> Result<()> {
    let store = Arc::new(InMemoryStore::new());
    let pipeline = ExtractionPipeline::from_config(config, store.clone())
        .context("Failed to initialize extraction pipeline")?;
    let ledger = pipeline.ledger().clone();
    let catalog = SiteCatalog::new(store, pipeline.images().clone());

    let queue = ProcessingQueue::from_config(config, pipeline);
    info!(
        "Processing {} image(s), up to {} at a time",
        paths.len(),
        config.max_concurrent_pipelines
    );

    let mut handles = Vec::with_capacity(paths.len());
    for path in paths {
        handles.push((path, queue.submit_wait(path.as_str()).await?));
    }

    let mut failures = 0usize;
    let collect = async {
        for (path, handle) in handles {
            match handle.wait().await? {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(e) => {
                    failures += 1;
                    print_failure(path, &e)?;
                }
            }
        }
        anyhow::Ok(())
    };

    tokio::select! {
        result = collect => result?,
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C, abandoning remaining images");
        }
    }
    queue.shutdown().await;

    let summary = json!({
        "queue": queue.stats(),
        "sites": catalog.stats().await?,
        "costs": ledger.summary().await?,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if failures > 0 {
        error!("{} of {} image(s) failed", failures, paths.len());
    }
    Ok(())
}

fn print_failure(path: &str, e: &PipelineError) -> Result<()> {
    let failure = json!({
        "image": path,
        "site_id": e.site_id(),
        "error": e.to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&failure)?);
    Ok(())
}
