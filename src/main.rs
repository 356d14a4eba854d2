//! Entry point: load config, wire dependencies, and run the server.

use auth_service::auth::{AuthService, TokenCodec};
use auth_service::config::{Config, StorageBackend};
use auth_service::db::{self, PgStore};
use auth_service::repositories::{MemoryStore, TokenRepository, UserRepository};
use auth_service::services::notifier::LinkBuilder;
use auth_service::services::{EmailNotifier, LogMailer, TokenLedger, UserAdminService};
use auth_service::{create_app, AppState};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::debug!(?config, "configuration loaded");

    let (users, tokens) = match config.storage {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&config.database_url).await?;
            db::run_migrations(&pool).await?;
            let store = Arc::new(PgStore::new(pool));
            let users: Arc<dyn UserRepository> = store.clone();
            let tokens: Arc<dyn TokenRepository> = store;
            (users, tokens)
        }
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let users: Arc<dyn UserRepository> = store.clone();
            let tokens: Arc<dyn TokenRepository> = store;
            (users, tokens)
        }
    };

    let (notifier, queue) = EmailNotifier::new(
        LinkBuilder {
            public_url: config.public_url.clone(),
            frontend_url: config.frontend_url.clone(),
        },
        config.notify_queue_size,
    );
    EmailNotifier::spawn_workers(queue, Arc::new(LogMailer), config.notify_workers);

    let codec = TokenCodec::new(&config.jwt_access_secret, &config.jwt_refresh_secret);
    let ledger = TokenLedger::new(tokens);
    let auth = AuthService::new(
        users.clone(),
        ledger.clone(),
        codec,
        Arc::new(notifier),
        config.frontend_url.clone(),
    );
    let user_admin = UserAdminService::new(users);

    if let Some(admin) = &config.bootstrap_admin {
        user_admin
            .ensure_admin(&admin.username, &admin.email, &admin.password)
            .await
            .map_err(|e| anyhow::anyhow!("bootstrap admin: {}", e))?;
    }

    if config.token_sweep_interval_secs > 0 {
        let period = Duration::from_secs(config.token_sweep_interval_secs);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                match ledger.purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::info!(purged, "expired tokens purged"),
                    Err(e) => tracing::warn!(error = %e, "token sweep failed"),
                }
            }
        });
    }

    let app = create_app(AppState::new(auth, user_admin))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
