//! HTTP identity service.
//!
//! Exposes the resolver over a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/identify` | Reconcile an (email, phoneNumber) pair into a cluster view |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses follow one schema:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "at least one of email or phone number is required" } }
//! ```
//!
//! Error codes: `bad_request` (400), `conflict` (409), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db;
use crate::error::ResolveError;
use crate::models::ClusterView;
use crate::resolver::{self, ResolveRequest};
use crate::store::sqlite::SqliteContactStore;
use crate::store::ContactStore;

/// Shared application state passed to route handlers via Axum's `State`.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn ContactStore>,
    max_attempts: u32,
}

/// Starts the HTTP identity service.
///
/// Binds to the address configured in `[server].bind` and serves until the
/// process is terminated. The database must already be initialized
/// (`idg init`).
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let state = AppState {
        store: Arc::new(SqliteContactStore::new(pool)),
        max_attempts: config.resolver.max_attempts,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/identify", post(handle_identify))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    println!(
        "identity server listening on http://{}",
        config.server.bind
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

/// Inner error detail with a machine-readable code and human-readable message.
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Constructs a 400 Bad Request error.
fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

/// Constructs a 409 Conflict error for resolves that lost the write race on
/// every attempt. The client can retry the request as-is.
fn conflict_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::CONFLICT,
        code: "conflict".to_string(),
        message: message.into(),
    }
}

/// Constructs a 500 Internal Server Error.
fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps resolver failures to HTTP responses: precondition failures are the
/// client's fault, exhausted conflicts are retriable by the client, and
/// everything else (invariant violations, store failures) is internal.
fn classify_resolve_error(err: ResolveError) -> AppError {
    match &err {
        ResolveError::MissingContactInfo => bad_request(err.to_string()),
        _ if err.is_retryable() => conflict_error(err.to_string()),
        _ => internal_error(err.to_string()),
    }
}

// ============ GET /health ============

/// JSON response body for `GET /health`.
#[derive(Serialize)]
struct HealthResponse {
    /// Always `"ok"` when the server is running.
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
}

/// Handler for `GET /health`.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /identify ============

/// JSON response body for `POST /identify`: the cluster view wrapped in a
/// `contact` envelope.
#[derive(Serialize)]
struct IdentifyResponse {
    contact: ClusterView,
}

/// Handler for `POST /identify`.
///
/// Accepts a free-form JSON body; `email` and `phoneNumber` count only when
/// they are JSON strings, anything else is treated as absent. At least one
/// of the two must be present.
async fn handle_identify(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<Json<IdentifyResponse>, AppError> {
    let email = body
        .get("email")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);
    let phone_number = body
        .get("phoneNumber")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string);

    let request =
        ResolveRequest::new(email, phone_number).map_err(|e| bad_request(e.to_string()))?;

    let view = resolver::resolve_with_retry(state.store.as_ref(), &request, state.max_attempts)
        .await
        .map_err(classify_resolve_error)?;

    Ok(Json(IdentifyResponse { contact: view }))
}
