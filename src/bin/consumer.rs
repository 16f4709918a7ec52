use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use prodimg::config::Config;
use prodimg::db;
use prodimg::services::queue::{Consumer, Pipeline, RedisJobChannel};
use prodimg::services::{HttpImageTransformer, SqliteProductStore};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prodimg=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    let db_pool = match db::init_db(&config.database_url).await {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!("Errore inizializzazione database: {}", e);
            std::process::exit(1);
        }
    };

    let transformer = match HttpImageTransformer::new(config.fetch_timeout()) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!("Creazione client HTTP fallita: {}", e);
            std::process::exit(1);
        }
    };

    let channel = match RedisJobChannel::connect(config.redis_settings()).await {
        Ok(channel) => Arc::new(channel),
        Err(e) => {
            tracing::error!("Connessione a Redis fallita: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = tokio::fs::create_dir_all(&config.output_dir).await {
        tracing::error!(
            "Impossibile creare la directory {}: {}",
            config.output_dir.display(),
            e
        );
        std::process::exit(1);
    }

    let pipeline = Pipeline::new(
        Arc::new(SqliteProductStore::new(db_pool)),
        Arc::new(transformer),
        config.pipeline_settings(),
    );
    let consumer = Consumer::new(
        channel,
        config.queue_name.clone(),
        Arc::new(pipeline),
        config.consumer_settings(),
    );

    tracing::info!("========================================");
    tracing::info!("  Prodimg consumer v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("========================================");
    tracing::info!("Coda: {} (consumer {})", config.queue_name, config.consumer_name);
    tracing::info!(
        "Larghezza {}px, qualità {}, output in {}",
        config.target_width,
        config.image_quality,
        config.output_dir.display()
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Segnale di arresto ricevuto");
            }
            shutdown.cancel();
        }
    });

    match consumer.run(shutdown).await {
        Ok(report) => tracing::info!("Report finale: {:?}", report),
        Err(e) => {
            tracing::error!("Consumer terminato con errore: {}", e);
            std::process::exit(1);
        }
    }
}
