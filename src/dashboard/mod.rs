use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use crate::error::RecoveryError;
use crate::manager::{JobSpec, Manager};

#[derive(Serialize)]
struct PingResponse {
    message: &'static str,
}

/// Body of `POST /api/jobs` and `POST /api/recover`. Exactly one of
/// `length`, `custom_password` or `digest` (with `length`) selects the job.
#[derive(Debug, Default, Deserialize)]
pub struct JobRequest {
    pub length: Option<usize>,
    pub custom_password: Option<String>,
    pub digest: Option<String>,
}

impl TryFrom<JobRequest> for JobSpec {
    type Error = RecoveryError;

    fn try_from(req: JobRequest) -> Result<Self, Self::Error> {
        match (req.length, req.custom_password, req.digest) {
            (None, Some(plaintext), None) => Ok(JobSpec::Custom { plaintext }),
            (Some(length), None, Some(digest)) => Ok(JobSpec::Digest { digest, length }),
            (Some(length), None, None) => Ok(JobSpec::Generate { length }),
            _ => Err(RecoveryError::InvalidInput(
                "expected one of: length, custom_password, or digest with length".to_string(),
            )),
        }
    }
}

#[derive(Serialize)]
struct JobCreatedResponse {
    digest: String,
}

#[derive(Serialize)]
struct BeginResponse {
    started: bool,
}

#[derive(Serialize)]
struct RecoverResponse {
    plaintext: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// HTTP rendering of a [`RecoveryError`].
struct ApiError(RecoveryError);

impl From<RecoveryError> for ApiError {
    fn from(e: RecoveryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

pub fn status_for(e: &RecoveryError) -> StatusCode {
    match e {
        RecoveryError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        RecoveryError::NoJob | RecoveryError::NotFound => StatusCode::NOT_FOUND,
        RecoveryError::AlreadyRunning
        | RecoveryError::JobReplaceConflict
        | RecoveryError::WaiterBusy
        | RecoveryError::AlreadyRegistered(_) => StatusCode::CONFLICT,
        RecoveryError::JobCancelled => StatusCode::GONE,
        RecoveryError::Connectivity(_) | RecoveryError::Timeout(_) => {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Presentation-side HTTP API over a shared manager.
pub fn router(manager: Arc<Manager>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/ping", get(ping_handler))
        .route("/api/status", get(status_handler))
        .route("/api/jobs", post(create_job_handler).delete(cancel_job_handler))
        .route("/api/jobs/begin", post(begin_handler))
        .route("/api/recover", post(recover_handler))
        .layer(cors)
        .with_state(manager)
}

pub async fn run_dashboard(addr: SocketAddr, manager: Arc<Manager>, shutdown: CancellationToken) {
    let app = router(manager);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn ping_handler(State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    Json(PingResponse {
        message: manager.ping(),
    })
}

async fn status_handler(State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    Json(manager.status().await)
}

async fn create_job_handler(
    State(manager): State<Arc<Manager>>,
    Json(payload): Json<JobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = JobSpec::try_from(payload)?;
    let digest = manager.request_new_job(spec).await?;
    Ok((StatusCode::CREATED, Json(JobCreatedResponse { digest })))
}

async fn begin_handler(State(manager): State<Arc<Manager>>) -> Result<impl IntoResponse, ApiError> {
    manager.begin().await?;
    Ok((StatusCode::ACCEPTED, Json(BeginResponse { started: true })))
}

async fn cancel_job_handler(State(manager): State<Arc<Manager>>) -> Result<StatusCode, ApiError> {
    manager.cancel_job().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn recover_handler(
    State(manager): State<Arc<Manager>>,
    Json(payload): Json<JobRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let spec = JobSpec::try_from(payload)?;
    let plaintext = manager.recover_and_wait(spec).await?;
    Ok(Json(RecoverResponse { plaintext }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_request_selects_spec() {
        let generate = JobRequest {
            length: Some(4),
            ..Default::default()
        };
        assert_eq!(
            JobSpec::try_from(generate).unwrap(),
            JobSpec::Generate { length: 4 }
        );

        let custom = JobRequest {
            custom_password: Some("ab".to_string()),
            ..Default::default()
        };
        assert_eq!(
            JobSpec::try_from(custom).unwrap(),
            JobSpec::Custom {
                plaintext: "ab".to_string()
            }
        );

        let digest = JobRequest {
            length: Some(2),
            digest: Some("abc".to_string()),
            ..Default::default()
        };
        assert_eq!(
            JobSpec::try_from(digest).unwrap(),
            JobSpec::Digest {
                digest: "abc".to_string(),
                length: 2
            }
        );
    }

    #[test]
    fn ambiguous_request_rejected() {
        let both = JobRequest {
            length: Some(2),
            custom_password: Some("ab".to_string()),
            digest: None,
        };
        assert!(matches!(
            JobSpec::try_from(both),
            Err(RecoveryError::InvalidInput(_))
        ));
        assert!(JobSpec::try_from(JobRequest::default()).is_err());
    }

    #[test]
    fn error_status_mapping() {
        assert_eq!(
            status_for(&RecoveryError::InvalidInput("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&RecoveryError::NoJob), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&RecoveryError::JobReplaceConflict),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&RecoveryError::WaiterBusy), StatusCode::CONFLICT);
        assert_eq!(status_for(&RecoveryError::JobCancelled), StatusCode::GONE);
        assert_eq!(status_for(&RecoveryError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for(&RecoveryError::Timeout("t".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
