//! HTTP request handlers.

use super::AppState;
use crate::db::{CheckRecord, Checkpoint, DbError};
use crate::outage::OutageState;
use crate::scheduler::CycleError;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

fn db_error(e: DbError) -> Response {
    let status = match &e {
        DbError::NotFound => StatusCode::NOT_FOUND,
        DbError::DuplicateName(_) | DbError::CheckpointInUse(_) => StatusCode::CONFLICT,
        DbError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

/// Largest number of rows a history query returns.
const MAX_LIMIT: i64 = 10_000;

/// Start of a window reaching `hours` back from now, `None` when out of range.
fn hours_ago(hours: i64) -> Option<DateTime<Utc>> {
    let window = ChronoDuration::try_hours(hours.max(0))?;
    Utc::now().checked_sub_signed(window)
}

fn window_start(hours: i64) -> Result<DateTime<Utc>, Response> {
    hours_ago(hours).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("hours out of range: {}", hours),
        )
            .into_response()
    })
}

fn clamp_limit(limit: i64) -> i64 {
    limit.clamp(1, MAX_LIMIT)
}

// ============================================================================
// API: Checkpoints
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListCheckpointsQuery {
    #[serde(default)]
    pub name: Option<String>,
}

pub async fn handle_list_checkpoints(
    State(state): State<AppState>,
    Query(query): Query<ListCheckpointsQuery>,
) -> impl IntoResponse {
    let listed = match query.name {
        Some(name) => state.store.get_checkpoint_by_name(&name).map(|c| vec![c]),
        None => state.store.list_checkpoints(false),
    };
    match listed {
        Ok(checkpoints) => Json(checkpoints).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCheckpointRequest {
    pub name: String,
    pub address: String,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn handle_create_checkpoint(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckpointRequest>,
) -> impl IntoResponse {
    let mut checkpoint = match state.store.add_checkpoint(&req.name, &req.address) {
        Ok(c) => c,
        Err(e) => return db_error(e),
    };

    if req.enabled == Some(false) {
        if let Err(e) = state.store.set_checkpoint_enabled(checkpoint.id, false) {
            return db_error(e);
        }
        checkpoint.enabled = false;
    }

    tracing::info!("Added checkpoint {} ({})", checkpoint.name, checkpoint.address);
    (StatusCode::CREATED, Json(checkpoint)).into_response()
}

#[derive(Debug, Serialize)]
pub struct CheckpointDetails {
    pub checkpoint: Checkpoint,
    pub recent_checks: Vec<CheckRecord>,
}

pub async fn handle_get_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let checkpoint = match state.store.get_checkpoint(id) {
        Ok(c) => c,
        Err(e) => return db_error(e),
    };

    match state.store.recent_checks(Some(id), None, 100) {
        Ok(recent_checks) => Json(CheckpointDetails {
            checkpoint,
            recent_checks,
        })
        .into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateCheckpointRequest {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

pub async fn handle_update_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateCheckpointRequest>,
) -> impl IntoResponse {
    if let Some(address) = &req.address {
        if let Err(e) = state.store.set_checkpoint_address(id, address) {
            return db_error(e);
        }
    }

    if let Some(enabled) = req.enabled {
        if let Err(e) = state.store.set_checkpoint_enabled(id, enabled) {
            return db_error(e);
        }
    }

    match state.store.get_checkpoint(id) {
        Ok(c) => Json(c).into_response(),
        Err(e) => db_error(e),
    }
}

pub async fn handle_delete_checkpoint(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.remove_checkpoint(id) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Serialize)]
pub struct CheckNowResponse {
    pub message: String,
    pub result: Option<CheckRecord>,
}

/// Probe one checkpoint right away. Records the check but leaves outage state alone.
pub async fn handle_check_now(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    let checkpoint = match state.store.get_checkpoint(id) {
        Ok(c) => c,
        Err(e) => return db_error(e),
    };

    let snapshot = state.scheduler.scanner().scan(vec![checkpoint.clone()]).await;
    if let Err(e) = state
        .store
        .record_probe_results(snapshot.scanned_at, &snapshot.results)
    {
        return db_error(e);
    }

    match state.store.latest_check(id) {
        Ok(result) => Json(CheckNowResponse {
            message: format!("Checkpoint {} checked", checkpoint.name),
            result,
        })
        .into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: History
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChecksQuery {
    #[serde(default)]
    pub checkpoint_id: Option<i64>,
    #[serde(default = "default_check_hours")]
    pub hours: i64,
    #[serde(default = "default_check_limit")]
    pub limit: i64,
}

fn default_check_hours() -> i64 {
    24
}

fn default_check_limit() -> i64 {
    1000
}

pub async fn handle_get_checks(
    State(state): State<AppState>,
    Query(query): Query<ChecksQuery>,
) -> impl IntoResponse {
    let since = match window_start(query.hours) {
        Ok(since) => since,
        Err(response) => return response,
    };
    match state
        .store
        .recent_checks(query.checkpoint_id, Some(since), clamp_limit(query.limit))
    {
        Ok(checks) => Json(checks).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct OutagesQuery {
    #[serde(default = "default_outage_hours")]
    pub hours: i64,
    #[serde(default)]
    pub ongoing_only: bool,
    #[serde(default = "default_outage_limit")]
    pub limit: i64,
}

fn default_outage_hours() -> i64 {
    168
}

fn default_outage_limit() -> i64 {
    100
}

pub async fn handle_get_outages(
    State(state): State<AppState>,
    Query(query): Query<OutagesQuery>,
) -> impl IntoResponse {
    let since = match window_start(query.hours) {
        Ok(since) => since,
        Err(response) => return response,
    };
    match state
        .store
        .outages(since, query.ongoing_only, clamp_limit(query.limit))
    {
        Ok(outages) => Json(outages).into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Status
// ============================================================================

#[derive(Debug, Serialize)]
pub struct CheckpointStatus {
    pub checkpoint: Checkpoint,
    pub latest_check: Option<CheckRecord>,
    pub uptime_24h: f64,
}

#[derive(Debug, Serialize)]
pub struct FleetStatus {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub details: Vec<CheckpointStatus>,
}

#[derive(Debug, Serialize)]
pub struct OutageSummary {
    pub ongoing: usize,
    pub last_24h: i64,
    pub ongoing_details: Vec<OutageState>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub timestamp: DateTime<Utc>,
    pub system_health: f64,
    pub checkpoints: FleetStatus,
    pub outages: OutageSummary,
}

pub async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match build_status(&state).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => db_error(e),
    }
}

async fn build_status(state: &AppState) -> Result<StatusResponse, DbError> {
    let since = Utc::now() - ChronoDuration::hours(24);
    let mut details = Vec::new();
    for checkpoint in state.store.list_checkpoints(true)? {
        let latest_check = state.store.latest_check(checkpoint.id)?;
        let uptime_24h = state.store.uptime_percentage(checkpoint.id, since)?;
        details.push(CheckpointStatus {
            checkpoint,
            latest_check,
            uptime_24h,
        });
    }

    let total = details.len();
    let online = details
        .iter()
        .filter(|d| d.latest_check.as_ref().is_some_and(|c| c.is_online))
        .count();
    let system_health = if total > 0 {
        online as f64 / total as f64 * 100.0
    } else {
        0.0
    };

    let ongoing_details: Vec<OutageState> = state.scheduler.current_outage().await.into_iter().collect();

    Ok(StatusResponse {
        timestamp: Utc::now(),
        system_health,
        checkpoints: FleetStatus {
            total,
            online,
            offline: total - online,
            details,
        },
        outages: OutageSummary {
            ongoing: ongoing_details.len(),
            last_24h: state.store.count_outages_since(since)?,
            ongoing_details,
        },
    })
}

#[derive(Debug, Deserialize)]
pub struct StatisticsQuery {
    #[serde(default = "default_outage_hours")]
    pub hours: i64,
}

pub async fn handle_statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> impl IntoResponse {
    let since = match window_start(query.hours) {
        Ok(since) => since,
        Err(response) => return response,
    };
    match state.store.statistics(since) {
        Ok(stats) => Json(serde_json::json!({
            "period_hours": query.hours,
            "total_checks": stats.total_checks,
            "failed_checks": stats.failed_checks,
            "success_rate": stats.success_rate,
            "total_outages": stats.total_outages,
            "average_outage_duration_seconds": stats.average_outage_duration_seconds,
            "timestamp": Utc::now(),
        }))
        .into_response(),
        Err(e) => db_error(e),
    }
}

// ============================================================================
// API: Scan trigger
// ============================================================================

pub async fn handle_scan(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.run_cycle().await {
        Ok(report) => Json(report).into_response(),
        Err(CycleError::Persistence(e)) => db_error(e),
        Err(e @ CycleError::Detector(_)) => (StatusCode::CONFLICT, e.to_string()).into_response(),
    }
}
