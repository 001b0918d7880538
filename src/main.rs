//! Operator Hub - operator registry engine
//!
//! Boots logging and settings, connects to PostgreSQL, makes sure the
//! registry schema exists and checks that the lifecycle engine can read the
//! registry and the market.

use operator_hub::collaborators::Collaborators;
use operator_hub::config::Settings;
use operator_hub::models::OperatorQuery;
use operator_hub::state::{AppState, SharedState};
use operator_hub::store::PgStore;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Identity used for the startup wiring check
const SYSTEM_USER: &str = "system";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("🚀 Starting Operator Hub...");

    let settings = Settings::load()?;
    info!("📋 Configuration loaded successfully");

    let store = match PgStore::connect(&settings.database).await {
        Ok(store) => {
            info!("✅ Database pool created successfully");
            store
        }
        Err(e) => {
            error!("❌ FATAL: Failed to initialize database pool: {}", e);
            error!("DATABASE_URL (or DB_HOST/DB_NAME) must point at a reachable database");
            return Err(e);
        }
    };

    store.bootstrap_schema().await?;

    let state: SharedState<PgStore> = Arc::new(AppState::new(
        settings.clone(),
        store,
        Collaborators::default(),
    ));

    let registry = state
        .lifecycle
        .list_operators(SYSTEM_USER, OperatorQuery::default())
        .await?;
    let market = state
        .lifecycle
        .list_market(SYSTEM_USER, OperatorQuery::default())
        .await?;

    info!("📦 Registry holds {} operator(s)", registry.total);
    info!("🛒 Market lists {} published release(s)", market.total);
    info!(
        "⚙️  Resolver: page size {}, concurrency {}, export deadline {:?}",
        settings.resolver.page_size,
        settings.resolver.max_concurrency,
        settings.resolver.export_timeout()
    );
    info!("👋 Operator Hub engine ready");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,operator_hub=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}
