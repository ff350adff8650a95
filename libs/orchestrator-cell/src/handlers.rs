// libs/orchestrator-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::State,
    response::Json,
    Extension,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use shared_config::AppConfig;
use shared_models::{auth::User, error::AppError};

use crate::services::worker::SchedulerWorkerService;

#[derive(Clone)]
pub struct SchedulerState {
    pub config: Arc<AppConfig>,
    pub worker: Arc<SchedulerWorkerService>,
}

impl SchedulerState {
    pub fn new(config: Arc<AppConfig>, worker: Arc<SchedulerWorkerService>) -> Self {
        Self { config, worker }
    }
}

/// Last report per sweep plus cumulative counters (admin only).
pub async fn get_scheduler_stats(
    State(state): State<SchedulerState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    if !user.has_role("admin") {
        warn!("Scheduler stats refused for user {}", user.id);
        return Err(AppError::Forbidden("Admin role required".to_string()));
    }
    info!("Scheduler stats request from user: {}", user.id);

    let stats = state.worker.stats().await;

    Ok(Json(json!({
        "success": true,
        "stats": stats
    })))
}
