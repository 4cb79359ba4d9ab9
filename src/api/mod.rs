mod handlers;

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::adapters::AdapterRegistry;
use crate::db::Database;
use crate::enforcement::EnforcementEngine;

/// Shared state for every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub engine: Arc<EnforcementEngine>,
}

impl AppState {
    pub fn new(db: Database, engine: EnforcementEngine) -> Self {
        Self {
            db,
            engine: Arc::new(engine),
        }
    }

    fn registry(&self) -> &Arc<AdapterRegistry> {
        self.engine.registry()
    }
}

pub fn create_router(state: AppState) -> Router {
    let api = Router::new()
        // Platforms
        .route("/platforms", get(handlers::list_platforms))
        .route("/platforms/{id}", get(handlers::get_platform))
        // Children
        .route("/children/{id}/enforce", post(handlers::enforce_child))
        .route("/children/{id}/jobs", get(handlers::list_child_jobs))
        .route("/children/{id}/compiled-policy", get(handlers::get_compiled_policy))
        // Jobs
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/retry", post(handlers::retry_job))
        // Linked accounts
        .route("/accounts/{id}/verify", post(handlers::verify_account))
        .route("/accounts/{id}", delete(handlers::unlink_account))
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
