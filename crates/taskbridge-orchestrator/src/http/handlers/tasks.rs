//! Task scheduling and execution control handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use taskbridge_core::ExecutionStatus;
use tracing::debug;

use crate::bridge::OrchestratorBridge;
use crate::http::responses::{
    ApiError, CancelResponse, EngineQuery, ResultQuery, ResultResponse, ScheduleRequest,
    ScheduleResponse,
};

/// `POST /v1/tasks`
pub async fn schedule_task(
    State(bridge): State<Arc<OrchestratorBridge>>,
    Json(request): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let handle = bridge
        .schedule(&request.task_type, request.payload, request.options)
        .await?;
    Ok((StatusCode::CREATED, Json(ScheduleResponse::from(&handle))))
}

/// `GET /v1/tasks/:id`
pub async fn get_task_status(
    State(bridge): State<Arc<OrchestratorBridge>>,
    Path(id): Path<String>,
    Query(query): Query<EngineQuery>,
) -> Result<Json<ExecutionStatus>, ApiError> {
    let status = bridge.get_task_status(&id, query.engine).await?;
    Ok(Json(status))
}

/// `POST /v1/tasks/:id/cancel`
pub async fn cancel_task(
    State(bridge): State<Arc<OrchestratorBridge>>,
    Path(id): Path<String>,
    Query(query): Query<EngineQuery>,
) -> Result<Json<CancelResponse>, ApiError> {
    let cancelled = bridge.cancel_task(&id, query.engine).await?;
    Ok(Json(CancelResponse { cancelled }))
}

/// `POST /v1/tasks/:id/signals/:name`
pub async fn signal_task(
    State(bridge): State<Arc<OrchestratorBridge>>,
    Path((id, name)): Path<(String, String)>,
    payload: Option<Json<Value>>,
) -> Result<StatusCode, ApiError> {
    let payload = payload.map(|Json(v)| v).unwrap_or(Value::Null);
    debug!(execution_id = %id, signal = %name, "Signal received over HTTP");
    bridge.signal_workflow(&id, &name, payload).await?;
    Ok(StatusCode::ACCEPTED)
}

/// `GET /v1/tasks/:id/result`
pub async fn get_task_result(
    State(bridge): State<Arc<OrchestratorBridge>>,
    Path(id): Path<String>,
    Query(query): Query<ResultQuery>,
) -> Result<Json<ResultResponse>, ApiError> {
    let timeout = query.timeout_ms.map(Duration::from_millis);
    let value = bridge.get_result(&id, query.engine, timeout).await?;
    Ok(Json(ResultResponse { value }))
}
