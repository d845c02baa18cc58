use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use enrich_client::EnrichClient;
use fetcher_client::FetchClient;
use railbird_common::{Config, Entity, ScanOptions, StopReason, TriggerSource};
use railbird_events::ProgressFeed;
use railbird_store::SweepDb;
use railbird_sweep::coordinator::{CoordinatorConfig, SweepCoordinator, TriggerRequest};
use railbird_sweep::engine::{EngineConfig, SweepDeps};
use railbird_sweep::traits::{EventSink, GameEnricher, SweepStore, TournamentFetcher};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("railbird=info".parse()?))
        .init();

    info!("Railbird sweep starting...");

    let config = Config::from_env();
    config.log_redacted();

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;

    let db = SweepDb::new(pool.clone());
    db.migrate().await.context("Migrations failed")?;

    // Cold start: seed the default entity from env if it isn't stored yet.
    if let Some(ref entity_id) = config.default_entity_id {
        if db.get_entity(entity_id).await?.is_none() {
            let base_url = std::env::var("DEFAULT_ENTITY_BASE_URL")
                .context("DEFAULT_ENTITY_BASE_URL required to seed a new entity")?;
            let path_template = std::env::var("DEFAULT_ENTITY_PATH_TEMPLATE")
                .unwrap_or_else(|_| "/tournaments/{id}".to_string());
            let name = std::env::var("DEFAULT_ENTITY_NAME")
                .unwrap_or_else(|_| entity_id.clone());

            info!(entity = %entity_id, base_url = %base_url, "Seeding entity from environment");
            db.upsert_entity(&Entity {
                id: entity_id.clone(),
                name,
                base_url,
                path_template,
            })
            .await?;
        }
    }

    let deps = SweepDeps {
        fetcher: Arc::new(FetchClient::new(&config.fetcher_url)) as Arc<dyn TournamentFetcher>,
        enricher: Arc::new(EnrichClient::new(&config.enrich_url)) as Arc<dyn GameEnricher>,
        events: Arc::new(ProgressFeed::new(pool)) as Arc<dyn EventSink>,
        store: Arc::new(db) as Arc<dyn SweepStore>,
    };

    let coordinator = SweepCoordinator::new(
        deps,
        EngineConfig::from_config(&config),
        CoordinatorConfig::from_config(&config),
        None,
    );

    // Options come from SWEEP_OPTIONS (JSON, same shape as a trigger
    // payload) or default to an AUTO sweep from the cursor.
    let options: ScanOptions = match std::env::var("SWEEP_OPTIONS") {
        Ok(raw) => serde_json::from_str(&raw).context("SWEEP_OPTIONS is not valid JSON")?,
        Err(_) => ScanOptions {
            scraper_api_key: config.scraper_api_key.clone(),
            ..Default::default()
        },
    };

    let report = coordinator
        .trigger(TriggerRequest {
            entity_id: None,
            payload: None,
            trigger: TriggerSource::Manual,
            options,
            resume: None,
        })
        .await?;

    println!("{}", report.job.counters);
    info!(stop_reason = %report.stop_reason, job_id = %report.job.id, "Sweep finished");

    if report.stop_reason == StopReason::Error {
        std::process::exit(1);
    }
    Ok(())
}
