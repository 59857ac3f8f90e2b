//! HTTP front end.
//!
//! Routes map onto the report functions in [`crate::dashboard`]. Each request
//! that touches the store opens its own connection on the blocking pool and
//! drops it before the response is sent.

mod error;
mod handlers;
pub mod session;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::Config;
use crate::dashboard::ReportSettings;
use crate::error::Result;
use crate::snapshot::TrendCache;
use crate::storage::Storage;

pub use error::ApiError;
pub use session::SessionStore;

/// Shared state handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    config: Arc<Config>,
    settings: ReportSettings,
    db_path: Arc<PathBuf>,
    cache: Arc<TrendCache>,
    sessions: Arc<SessionStore>,
}

impl AppState {
    /// Build the state from a configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            settings: ReportSettings::from_config(&config)?,
            db_path: Arc::new(config.database_path()),
            cache: Arc::new(TrendCache::new()),
            sessions: Arc::new(SessionStore::new(config.session_ttl())),
            config: Arc::new(config),
        })
    }

    /// Database the handlers connect to.
    #[must_use]
    pub fn database_path(&self) -> &Path {
        &self.db_path
    }

    /// Run `f` against a fresh store connection on the blocking pool.
    async fn with_storage<T, F>(&self, f: F) -> std::result::Result<T, ApiError>
    where
        F: FnOnce(&mut Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = Arc::clone(&self.db_path);
        let result = tokio::task::spawn_blocking(move || {
            let mut storage = Storage::connect(path.as_path())?;
            f(&mut storage)
        })
        .await?;
        Ok(result?)
    }
}

/// The application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/login", post(handlers::login))
        .route("/logout", get(handlers::logout).post(handlers::logout))
        .route("/dashboard-data", get(handlers::dashboard_data))
        .route("/api/history", get(handlers::history))
        .route("/api/daily-trend", get(handlers::daily_trend))
        .route("/update", post(handlers::update))
        .route("/reset", post(handlers::reset))
        .with_state(state)
}

/// Initialize the store and serve until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the configuration is invalid, the store cannot be
/// initialized, or the listener fails.
pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::new(config)?;
    let addr = state.config.bind_addr()?;

    let storage = Storage::open(state.database_path())?;
    info!(
        path = %storage.path().display(),
        measurements = storage.count()?,
        "Storage ready"
    );
    drop(storage);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
