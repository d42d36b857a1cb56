//! OIT field agent /v1: REST surface over sampling sessions
//!
//! Every open visit is one `SamplingSession`. Captures, judge verdicts and
//! syncs all go through the session, so the HTTP layer only translates.
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

pub use config::{AgentConfig, ConfigError};
pub use error::ApiError;
pub use state::{AppState, Collaborators, StartupError};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/v1/visits/unsynced", get(handlers::list_unsynced))
        .route("/v1/visits/{id}/open", post(handlers::open_visit))
        .route("/v1/visits/{id}", get(handlers::get_visit).delete(handlers::close_visit))
        .route("/v1/visits/{id}/steps", post(handlers::capture))
        .route("/v1/visits/{id}/validation/retry", post(handlers::retry_validation))
        .route("/v1/visits/{id}/redo/{index}", post(handlers::redo_step))
        .route("/v1/visits/{id}/navigate", post(handlers::navigate))
        .route("/v1/visits/{id}/save-progress", post(handlers::save_progress))
        .route("/v1/visits/{id}/reset", post(handlers::reset))
        .route("/v1/connectivity", post(handlers::set_connectivity))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(thiserror::Error, Debug)]
pub enum ServeError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("SERVE/{0}")]
    Io(#[from] std::io::Error),
}

pub async fn run(config: AgentConfig) -> Result<(), ServeError> {
    let state = AppState::from_config(&config)?;

    // Pendências de sessões anteriores sobem assim que o agente inicia online
    let pending = state.reconciler.sync_unsynced().await;
    if !pending.is_empty() {
        tracing::info!(visits = pending.len(), "startup sync attempted");
    }

    let app = create_app(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("OIT agent listening on {}", config.listen_addr);
    axum::serve(listener, app).await?;
    Ok(())
}
