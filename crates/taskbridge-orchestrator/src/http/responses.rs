//! Request and response types for the HTTP API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use taskbridge_core::{EngineKind, ExecutionHandle, OrchestrationError, TaskOptions};

// ============================================================================
// Requests
// ============================================================================

/// Body of `POST /v1/tasks`.
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    #[serde(alias = "taskType")]
    pub task_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub options: TaskOptions,
}

/// Optional engine hint for id-addressed routes.
#[derive(Debug, Default, Deserialize)]
pub struct EngineQuery {
    pub engine: Option<EngineKind>,
}

/// Query of `GET /v1/tasks/:id/result`.
#[derive(Debug, Default, Deserialize)]
pub struct ResultQuery {
    pub engine: Option<EngineKind>,
    pub timeout_ms: Option<u64>,
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ScheduleResponse {
    /// Engine-qualified id to use on every later call.
    pub execution_id: String,
    pub engine: EngineKind,
    pub raw_execution_id: String,
    pub task_id: String,
}

impl From<&ExecutionHandle> for ScheduleResponse {
    fn from(handle: &ExecutionHandle) -> Self {
        Self {
            execution_id: handle.qualified_id(),
            engine: handle.engine,
            raw_execution_id: handle.execution_id.to_string(),
            task_id: handle.task_id.to_string(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResultResponse {
    pub value: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Errors
// ============================================================================

/// Orchestration error rendered as a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub OrchestrationError);

impl From<OrchestrationError> for ApiError {
    fn from(err: OrchestrationError) -> Self {
        Self(err)
    }
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            OrchestrationError::ClassificationAmbiguous { .. }
            | OrchestrationError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OrchestrationError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            OrchestrationError::UnsupportedOperation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            OrchestrationError::ExecutionFailed { .. } => StatusCode::CONFLICT,
            OrchestrationError::EngineUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            OrchestrationError::TaskTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            OrchestrationError::RetryExhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskbridge_core::JobStatus;

    #[test]
    fn test_error_status_codes() {
        let cases = [
            (
                OrchestrationError::InvalidInput("x".into()),
                StatusCode::BAD_REQUEST,
            ),
            (
                OrchestrationError::ExecutionNotFound("queue:9".into()),
                StatusCode::NOT_FOUND,
            ),
            (
                OrchestrationError::UnsupportedOperation {
                    engine: EngineKind::Queue,
                    operation: "signal",
                },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                OrchestrationError::ExecutionFailed {
                    execution_id: "durable:wf".into(),
                    status: JobStatus::Failed,
                    reason: "boom".into(),
                },
                StatusCode::CONFLICT,
            ),
            (
                OrchestrationError::TaskTimeout {
                    execution_id: "queue:1".into(),
                    timeout_ms: 10,
                },
                StatusCode::GATEWAY_TIMEOUT,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError(err).status_code(), expected);
        }
    }

    #[test]
    fn test_schedule_request_flattens_options() {
        let request: ScheduleRequest = serde_json::from_value(serde_json::json!({
            "taskType": "analyze-project",
            "payload": {"repo": "x"},
            "isComplex": true,
            "trackingQueue": "tracking"
        }))
        .unwrap();
        assert_eq!(request.task_type, "analyze-project");
        assert_eq!(request.options.is_complex, Some(true));
        assert_eq!(request.options.tracking_queue.as_deref(), Some("tracking"));
        assert_eq!(request.payload["repo"], "x");
    }
}
