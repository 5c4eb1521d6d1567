use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

mod accuracy;
mod api;
mod config;
mod db;
mod error;
mod extract;
mod fetch;
mod jobs;
mod odds;
mod predict;
mod provider;
mod reconcile;
mod time;

use api::AppState;
use config::{Command, Config, SweepKind};
use db::models::MatchSource;
use db::Database;
use fetch::{DocumentFetcher, HttpFetcher, Pacer};
use jobs::{run_scheduler, Feed, Pipeline, ProviderFeed, ScrapeFeed};
use odds::{OddsResolver, ProviderOdds, ScrapedOdds};
use predict::HttpScoringClient;
use provider::{CredentialPool, ProviderApi, ProviderClient};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let db = Database::open(&config.database_path)?;
    info!("Database opened: {}", config.database_path);

    let pipeline = Arc::new(build_pipeline(&config, db.clone())?);

    match config.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve(&config, db, pipeline).await,
        Command::Sweep { kind } => {
            let report = match kind {
                SweepKind::Coarse => pipeline.coarse_sweep_with_retry(Utc::now()).await?,
                SweepKind::Fine => pipeline.fine_sweep(Utc::now()).await?,
            };
            info!("{:?} sweep finished: {:?}", kind, report);
            Ok(())
        }
        Command::Backfill { from, to } => {
            let report = pipeline.backfill(from, to, Utc::now()).await?;
            info!("Backfill {}..={} finished: {:?}", from, to, report);
            Ok(())
        }
    }
}

/// Wire feeds, odds sources and the scoring client into one pipeline.
fn build_pipeline(config: &Config, db: Database) -> Result<Pipeline> {
    let retry = config.request_retry();
    let (pace_min, pace_max) = config.pacing();
    let fetcher: Arc<dyn DocumentFetcher> = Arc::new(HttpFetcher::new()?);

    let mut feeds: Vec<Arc<dyn Feed>> = Vec::new();
    let mut resolver = OddsResolver::new(db.clone(), &config.reference_bookmaker);

    // The scraper comes first so it supplies the ranking snapshot when enabled.
    if !config.scrape_disabled {
        let base = config.scrape_url()?;
        feeds.push(Arc::new(ScrapeFeed::new(
            db.clone(),
            fetcher.clone(),
            base.clone(),
            Pacer::new(pace_min, pace_max),
            retry,
            config.ranking_page_limit,
        )));
        resolver = resolver.with_source(
            MatchSource::Scrape,
            Arc::new(ScrapedOdds::new(fetcher, base, Pacer::new(pace_min, pace_max))),
        );
    }

    if let Some(credentials) = CredentialPool::new(config.provider_keys.clone()) {
        let provider: Arc<dyn ProviderApi> = Arc::new(ProviderClient::new(
            &config.provider_base_url,
            credentials,
            retry,
        )?);
        feeds.push(Arc::new(ProviderFeed::new(db.clone(), provider.clone())));
        resolver = resolver.with_source(MatchSource::Provider, Arc::new(ProviderOdds::new(provider)));
    }

    info!(
        "Configured {} feed(s): {}",
        feeds.len(),
        feeds.iter().map(|f| f.name()).collect::<Vec<_>>().join(", ")
    );

    let scorer = Arc::new(HttpScoringClient::new(&config.scoring_url, retry)?);
    Ok(Pipeline::new(
        db,
        feeds,
        Arc::new(resolver),
        scorer,
        config.pipeline_settings(),
    ))
}

async fn serve(config: &Config, db: Database, pipeline: Arc<Pipeline>) -> Result<()> {
    let state = AppState {
        db,
        job_state: pipeline.subscribe(),
    };
    let app = api::router(state);
    let addr: SocketAddr = config.api_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    match pipeline.last_coarse_run() {
        Ok(Some(day)) => info!("Last coarse sweep ran for {}", day),
        Ok(None) => info!("No coarse sweep recorded yet"),
        Err(e) => error!("Could not read job history: {}", e),
    }

    tokio::spawn(run_scheduler(
        pipeline,
        config.coarse_time()?,
        config.fine_interval(),
    ));

    // Serve the API (blocks until shutdown)
    axum::serve(listener, app).await?;
    Ok(())
}
