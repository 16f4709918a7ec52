use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use prodimg::config::Config;
use prodimg::db;
use prodimg::models::*;
use prodimg::routes::{self, AppState};
use prodimg::services::queue::{Producer, RedisJobChannel};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Prodimg API",
        version = "1.0.0",
        description = "Creazione prodotti con elaborazione asincrona delle immagini",
        license(name = "MIT"),
    ),
    paths(
        prodimg::routes::products::create_product,
        prodimg::routes::products::get_product,
        prodimg::routes::health::health_check,
    ),
    components(schemas(
        CreateProductRequest,
        ProductCreatedResponse,
        ProductResponse,
        HealthResponse,
        ErrorResponse,
    )),
    tags(
        (name = "Prodotti", description = "Creazione e consultazione prodotti"),
        (name = "Sistema", description = "Health check e info"),
    ),
    servers(
        (url = "http://localhost:3000", description = "Server locale"),
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Carica variabili da .env
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "prodimg=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();

    tracing::info!("Connessione al database: {}", config.database_url);
    let db_pool = match db::init_db(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database SQLite inizializzato");
            pool
        }
        Err(e) => {
            tracing::error!("Errore inizializzazione database: {}", e);
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

    let producer = match Producer::new(channel, &config.queue_name).await {
        Ok(producer) => producer,
        Err(e) => {
            tracing::error!("Dichiarazione della coda {} fallita: {}", config.queue_name, e);
            std::process::exit(1);
        }
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(routes::create_router(AppState {
            db: db_pool,
            producer,
        }))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let addr: SocketAddr = match format!("{}:{}", config.host, config.port).parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Indirizzo non valido {}:{}: {}", config.host, config.port, e);
            std::process::exit(1);
        }
    };

    tracing::info!("========================================");
    tracing::info!("  Prodimg producer v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("========================================");
    tracing::info!("Server: http://{}", addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui/", addr);
    tracing::info!("Coda: {}", config.queue_name);
    tracing::info!("----------------------------------------");
    tracing::info!("  POST /api/v1/products         - Crea prodotto");
    tracing::info!("  GET  /api/v1/products/:id     - Stato prodotto");
    tracing::info!("  GET  /api/v1/health           - Health check");
    tracing::info!("----------------------------------------");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Bind su {} fallito: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server terminato con errore: {}", e);
        std::process::exit(1);
    }
}
