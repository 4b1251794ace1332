#![forbid(unsafe_code)]

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use roadwatch_contracts::identity::SessionPhase;
use roadwatch_contracts::view::ViewId;
use roadwatch_contracts::violation::{TrackerId, Violation};
use roadwatch_engines::http_backend::HttpBackend;
use roadwatch_engines::PopupProviderConfig;
use roadwatch_os::router::SelectOutcome;
use roadwatch_os::{Console, ConsoleError, ConsoleView};
use tracing::warn;

pub mod reason_codes {
    use roadwatch_contracts::ReasonCodeId;

    pub const ADAPTER_UNKNOWN_VIEW: ReasonCodeId = ReasonCodeId(0xAD70_0101);
    pub const ADAPTER_BACKEND_UNHEALTHY: ReasonCodeId = ReasonCodeId(0xAD70_0102);
}

#[derive(Clone)]
pub struct AdapterState {
    pub console: Arc<Console>,
    /// Probed by `/healthz` when present.
    pub backend: Option<Arc<HttpBackend>>,
}

impl AdapterState {
    pub fn new(console: Arc<Console>, backend: Option<Arc<HttpBackend>>) -> Self {
        Self { console, backend }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ConsoleIntentResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub reason_code: Option<String>,
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AdapterHealthResponse {
    pub status: String,
    pub outcome: String,
    pub reason: Option<String>,
    pub session_phase: SessionPhase,
    pub backend_reachable: Option<bool>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SelectViewRequest {
    pub view: String,
}

/// Full violation record as the presentation layer holds it.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OpenEvidenceRequest {
    pub violation_id: String,
    pub category: String,
    pub timestamp: String,
    #[serde(default = "unassigned_tracker")]
    pub tracker_id: i64,
    pub evidence: String,
}

fn unassigned_tracker() -> i64 {
    TrackerId::UNASSIGNED.0
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SwitchCameraRequest {
    pub source: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct UploadRequest {
    pub path: String,
}

#[derive(Clone, serde::Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

pub fn build_router(state: AdapterState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/console/state", get(console_state))
        .route("/v1/console/view", post(select_view))
        .route("/v1/console/evidence/open", post(open_evidence))
        .route("/v1/console/evidence/close", post(close_evidence))
        .route("/v1/console/archive/refresh", post(refresh_archive))
        .route("/v1/console/camera", post(switch_camera))
        .route("/v1/console/upload", post(start_upload))
        .route("/v1/console/sign-in", post(sign_in))
        .route("/v1/console/sign-in/popup", post(sign_in_popup))
        .route("/v1/console/sign-out", post(sign_out))
        .with_state(state)
}

type IntentReply = (StatusCode, Json<ConsoleIntentResponse>);

fn accepted(console: &Console, outcome: &str, reason: Option<String>) -> IntentReply {
    (
        StatusCode::OK,
        Json(ConsoleIntentResponse {
            status: "ok".to_string(),
            outcome: outcome.to_string(),
            reason,
            reason_code: None,
            revision: console.snapshot().revision,
        }),
    )
}

fn rejected(console: &Console, err: &ConsoleError) -> IntentReply {
    (
        status_for(err),
        Json(ConsoleIntentResponse {
            status: "error".to_string(),
            outcome: "REJECTED".to_string(),
            reason: Some(err.to_string()),
            reason_code: Some(err.reason_code().to_string()),
            revision: console.snapshot().revision,
        }),
    )
}

pub fn status_for(err: &ConsoleError) -> StatusCode {
    match err {
        ConsoleError::NotAuthenticated | ConsoleError::Auth(_) => StatusCode::UNAUTHORIZED,
        ConsoleError::Forbidden { .. } => StatusCode::FORBIDDEN,
        ConsoleError::WrongView { .. }
        | ConsoleError::CameraSwitchPending
        | ConsoleError::UploadBusy => StatusCode::CONFLICT,
        ConsoleError::UnknownCameraSource(_) | ConsoleError::Contract(_) => StatusCode::BAD_REQUEST,
        ConsoleError::Fetch(_) => StatusCode::BAD_GATEWAY,
        ConsoleError::RuntimeUnavailable | ConsoleError::StatePoisoned => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub async fn healthz(State(state): State<AdapterState>) -> (StatusCode, Json<AdapterHealthResponse>) {
    let session_phase = state.console.snapshot().session.phase;
    let Some(backend) = state.backend.as_ref() else {
        return (
            StatusCode::OK,
            Json(AdapterHealthResponse {
                status: "ok".to_string(),
                outcome: "HEALTHY".to_string(),
                reason: None,
                session_phase,
                backend_reachable: None,
            }),
        );
    };
    match backend.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(AdapterHealthResponse {
                status: "ok".to_string(),
                outcome: "HEALTHY".to_string(),
                reason: None,
                session_phase,
                backend_reachable: Some(true),
            }),
        ),
        Err(err) => {
            warn!(
                error = %err,
                reason_code = %reason_codes::ADAPTER_BACKEND_UNHEALTHY,
                "backend health probe failed"
            );
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(AdapterHealthResponse {
                    status: "error".to_string(),
                    outcome: "UNHEALTHY".to_string(),
                    reason: Some(err.to_string()),
                    session_phase,
                    backend_reachable: Some(false),
                }),
            )
        }
    }
}

pub async fn console_state(State(state): State<AdapterState>) -> Json<ConsoleView> {
    Json(state.console.snapshot())
}

pub async fn select_view(
    State(state): State<AdapterState>,
    Json(request): Json<SelectViewRequest>,
) -> IntentReply {
    let console = &state.console;
    let Some(view) = ViewId::parse(&request.view) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ConsoleIntentResponse {
                status: "error".to_string(),
                outcome: "REJECTED".to_string(),
                reason: Some(format!("unknown view '{}'", request.view)),
                reason_code: Some(reason_codes::ADAPTER_UNKNOWN_VIEW.to_string()),
                revision: console.snapshot().revision,
            }),
        );
    };
    match console.select_view(view) {
        Ok(SelectOutcome::Changed { .. }) => accepted(console, "CHANGED", None),
        Ok(SelectOutcome::Unchanged) => accepted(console, "UNCHANGED", None),
        Ok(SelectOutcome::NotVisible) => accepted(
            console,
            "IGNORED",
            Some(format!("view '{}' is not available to this role", view.as_str())),
        ),
        Err(err) => rejected(console, &err),
    }
}

pub async fn open_evidence(
    State(state): State<AdapterState>,
    Json(request): Json<OpenEvidenceRequest>,
) -> IntentReply {
    let console = &state.console;
    let violation = match Violation::v1(
        request.violation_id,
        &request.category,
        request.timestamp,
        TrackerId(request.tracker_id),
        request.evidence,
    ) {
        Ok(v) => v,
        Err(err) => return rejected(console, &ConsoleError::Contract(err)),
    };
    match console.open_evidence(violation) {
        Ok(()) => accepted(console, "OPENED", None),
        Err(err) => rejected(console, &err),
    }
}

pub async fn close_evidence(State(state): State<AdapterState>) -> IntentReply {
    let console = &state.console;
    match console.close_evidence() {
        Ok(true) => accepted(console, "CLOSED", None),
        Ok(false) => accepted(console, "UNCHANGED", None),
        Err(err) => rejected(console, &err),
    }
}

pub async fn refresh_archive(State(state): State<AdapterState>) -> IntentReply {
    let console = &state.console;
    match console.refresh_archive().await {
        Ok(count) => accepted(console, "REFRESHED", Some(format!("{count} entries"))),
        Err(err) => rejected(console, &err),
    }
}

pub async fn switch_camera(
    State(state): State<AdapterState>,
    Json(request): Json<SwitchCameraRequest>,
) -> IntentReply {
    let console = &state.console;
    match console.switch_source(&request.source).await {
        Ok(ack) => accepted(console, "SWITCHED", Some(ack.new_source)),
        Err(err) => rejected(console, &err),
    }
}

/// Starts the upload and answers immediately; progress is visible in `/v1/console/state`.
pub async fn start_upload(
    State(state): State<AdapterState>,
    Json(request): Json<UploadRequest>,
) -> IntentReply {
    let console = &state.console;
    match console.start_upload(&request.path) {
        Ok(ticket) => accepted(console, "UPLOADING", Some(format!("attempt {}", ticket.attempt))),
        Err(err) => rejected(console, &err),
    }
}

pub async fn sign_in(
    State(state): State<AdapterState>,
    Json(request): Json<SignInRequest>,
) -> IntentReply {
    let console = &state.console;
    match console
        .sign_in_with_password(&request.email, &request.password)
        .await
    {
        Ok(principal) => accepted(console, "SIGNED_IN", Some(principal.email)),
        Err(err) => rejected(console, &err),
    }
}

pub async fn sign_in_popup(
    State(state): State<AdapterState>,
    Json(provider): Json<PopupProviderConfig>,
) -> IntentReply {
    let console = &state.console;
    match console.sign_in_with_popup(&provider).await {
        Ok(principal) => accepted(console, "SIGNED_IN", Some(principal.email)),
        Err(err) => rejected(console, &err),
    }
}

pub async fn sign_out(State(state): State<AdapterState>) -> IntentReply {
    let console = &state.console;
    match console.sign_out().await {
        Ok(()) => accepted(console, "SIGNED_OUT", None),
        Err(err) => rejected(console, &err),
    }
}
