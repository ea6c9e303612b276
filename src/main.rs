//! Depot Server
//!
//! A self-hosted project file host with resumable chunked uploads,
//! per-project permissions and streaming downloads.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use depot_server::auth::AuthService;
use depot_server::config::{Config, DEFAULT_SECRET_KEY};
use depot_server::db::{self, UserRepository};
use depot_server::routes;
use depot_server::state::AppState;
use depot_server::storage::ProjectStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "depot_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();

    let config = Config::from_env().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config from env: {}, using defaults", e);
        Config::default()
    });

    tracing::info!("Starting Depot Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Upload root: {}", config.storage.upload_dir.display());
    tracing::info!(
        chunk_size = config.upload.chunk_size,
        max_file_size = config.upload.max_file_size,
        "Upload limits"
    );
    if config.auth.secret_key == DEFAULT_SECRET_KEY {
        tracing::warn!("SECRET_KEY is not set; access tokens are signed with the built-in default");
    }
    if config.auth.trust_user_header {
        tracing::warn!("Trusting the x-user-id header; only run behind an authenticating proxy");
    }

    let storage = ProjectStorage::open(&config.storage.upload_dir)
        .await
        .context("Failed to initialize upload directory")?;

    // Initialize database
    let db_pool = db::create_pool(&config.database.url)
        .await
        .context("Failed to initialize database")?;
    tracing::info!("Database initialized at {}", config.database.url);

    if let Some(username) = config.admin.username.as_deref() {
        let users = UserRepository::new(&db_pool);
        let admin = users
            .ensure_admin(username)
            .await
            .context("Failed to provision admin user")?;

        if let Some(password) = config.admin.password.as_deref() {
            let password_hash = AuthService::new(&config.auth)
                .hash_password(password)
                .await
                .context("Failed to hash admin password")?;
            users
                .set_password_hash(admin.id, &password_hash)
                .await
                .context("Failed to set admin password")?;
        }
        tracing::info!(user_id = admin.id, username = %admin.username, "Admin user ready");
    }

    let sweep_interval = Duration::from_secs(config.upload.sweep_interval_secs);
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid listen address")?;

    // Create application state
    let app_state = AppState::new(config, db_pool, storage);
    let sweeper = app_state.sweeper().start(sweep_interval);

    let app = routes::app(app_state);

    // Start server with graceful shutdown
    tracing::info!("Depot Server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweeper.abort();
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
