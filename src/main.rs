use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use sqlx::{postgres::PgPoolOptions, PgPool};
use tokio::net::TcpListener;
use tower_http::{
    compression::CompressionLayer, limit::RequestBodyLimitLayer,
    validate_request::ValidateRequestHeaderLayer,
};
use tracing_subscriber::{
    fmt::{writer::BoxMakeWriter, Layer},
    layer::SubscriberExt,
    EnvFilter, Registry,
};

use textpay::db::ledger::LedgerRepository;
use textpay::db::otps::OtpRepository;
use textpay::db::sessions::{SessionRepository, SessionStore};
use textpay::engine::{Engine, EngineConfig};
use textpay::providers::banks::CachedBankDirectory;
use textpay::providers::sandbox::{
    SandboxBankFeed, SandboxIdentityVerifier, SandboxMoneyMovement, SandboxNotifier,
    SharedSecretVerifier,
};
use textpay::routes;
use textpay::routes::auth::AuthService;

const SESSION_SWEEP_SECS: u64 = 60;
const BANK_CACHE_TTL_SECS: u64 = 60 * 60 * 24;

#[tokio::main]
async fn main() {
    // mandatory fields
    let db_url = dotenv::var("DATABASE_URL").unwrap();
    // optional fields
    let jwt_secret = dotenv::var("JWT_SECRET").unwrap_or("your-jwt-secret".to_string());
    let webhook_secret =
        dotenv::var("PAYMENT_WEBHOOK_SECRET").unwrap_or("whsec_sandbox".to_string());
    let max_connection_pooling = dotenv::var("MAX_CONNECTION_POOLING")
        .unwrap_or("5".to_string())
        .parse::<u32>()
        .unwrap();
    let port = dotenv::var("PORT")
        .unwrap_or("3000".to_string())
        .parse::<u16>()
        .unwrap();
    let log_file = dotenv::var("LOG_FILE").unwrap_or("textpay.log".to_string());
    let ussd_service_code = dotenv::var("USSD_SERVICE_CODE").unwrap_or("*347*456#".to_string());

    // add tracing layers: JSON file log plus human-readable stdout
    let file_appender = tracing_appender::rolling::never(".", &log_file);
    let (file_writer, _file_guard) = tracing_appender::non_blocking(file_appender);
    let (stdout_writer, _stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_layer = Layer::new()
        .json()
        .with_writer(BoxMakeWriter::new(move || file_writer.clone()));
    let stdout_layer = Layer::new().with_writer(BoxMakeWriter::new(move || stdout_writer.clone()));

    let subscriber = Registry::default()
        .with(EnvFilter::from_default_env())
        .with(file_layer)
        .with(stdout_layer);

    tracing::subscriber::set_global_default(subscriber).expect("Unable to set global subscriber");

    let database_pool = match process_database(&db_url, max_connection_pooling).await {
        Ok(db) => {
            tracing::info!("Connected to database");
            db
        }
        Err(err) => {
            tracing::error!("Failed to connect to database: {}", err);
            process::exit(1);
        }
    };

    let listener = match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(port) => {
            tracing::info!("Listening on port: {}", port.local_addr().unwrap().port());
            port
        }
        Err(err) => {
            tracing::error!("Failed to bind to port: {}", err);
            process::exit(1);
        }
    };

    let config = EngineConfig {
        ussd_service_code,
        ..EngineConfig::default()
    };
    let router = process_begin(database_pool, jwt_secret, webhook_secret, config);
    tracing::info!("Routes constructed successfully");

    //start the http service
    let http_service = axum::serve(listener, router);
    if let Err(err) = http_service.await {
        tracing::error!("Failed to start server: {}", err);
        process::exit(1);
    }
}

fn process_begin(
    db_pool: PgPool,
    jwt_secret: String,
    webhook_secret: String,
    config: EngineConfig,
) -> Router {
    let ledger = Arc::new(LedgerRepository::new(db_pool.clone()));
    let sessions = Arc::new(SessionRepository::new(db_pool.clone()));
    let otps = Arc::new(OtpRepository::new(db_pool));

    let notifier = Arc::new(SandboxNotifier::new());
    let banks = Arc::new(CachedBankDirectory::new(
        Arc::new(SandboxBankFeed),
        Duration::from_secs(BANK_CACHE_TTL_SECS),
    ));
    let engine = Arc::new(Engine::new(
        ledger.clone(),
        sessions.clone(),
        otps,
        notifier,
        banks.clone(),
        Arc::new(SandboxMoneyMovement),
        Arc::new(SandboxIdentityVerifier),
        config,
    ));
    let auth_service = Arc::new(AuthService::new(ledger.clone(), jwt_secret));
    let webhook_verifier = Arc::new(SharedSecretVerifier::new(webhook_secret));

    // sweep expired sessions so abandoned payments free the phone's slot
    let sweep_store = sessions.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(SESSION_SWEEP_SECS));
        loop {
            ticker.tick().await;
            match sweep_store.purge_expired().await {
                Ok(0) => {}
                Ok(n) => tracing::debug!("Purged {n} expired sessions"),
                Err(err) => tracing::warn!("Session sweep failed: {err}"),
            }
        }
    });

    let auth_routes = routes::auth::auth_routes(auth_service.clone());
    // no Accept gate on the wallet group: its history endpoint speaks SSE
    let wallet_routes = routes::wallet::wallet_routes(auth_service, ledger)
        .route_layer(CompressionLayer::new().gzip(true));
    let bank_routes = routes::banks::bank_routes(banks)
        .route_layer(ValidateRequestHeaderLayer::accept("application/json"));

    let gateway_routes = routes::webhook::gateway_routes(engine.clone());
    let payment_routes = routes::webhook::payment_webhook_routes(engine, webhook_verifier);

    Router::new()
        .nest("/v1", auth_routes)
        .nest("/v1", wallet_routes)
        .nest("/v1", bank_routes)
        .merge(gateway_routes)
        .merge(payment_routes)
        .merge(routes::webhook::health_routes())
        .route_layer(RequestBodyLimitLayer::new(1024 * 64)) //64KB limit
}

async fn process_database(url: &str, max_conn_pool: u32) -> Result<PgPool, String> {
    // create a connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(max_conn_pool)
        .connect(url)
        .await
        .map_err(|err| format!("Failed to connect to database: {}", err))?;

    match sqlx::migrate!("./migrations").run(&db_pool).await {
        Ok(_) => {
            tracing::info!("Migrations run successfully");
        }
        Err(err) => {
            // if it fails we assume to continue believing that the database is already migrated
            tracing::warn!("Failed to run migrations: {err}");
        }
    }

    Ok(db_pool)
}
