// [library] Axum web framework routing components
use axum::{
    extract::FromRef,           // [library] State extraction trait
    http::{header, StatusCode}, // [library] HTTP status codes and header names
    response::{AppendHeaders, IntoResponse, Response}, // [library] Response construction helpers
    routing::{get, post},       // [library] HTTP method routing builders
    Json,                       // [library] JSON request/response bodies
    Router,                     // [library] HTTP request router for URL pattern matching
};

// [library] Structured logging macro for error-level events
use tracing::error;

// [business] Import application modules for dependency injection and routing
use crate::{
    config::Config,                     // [business] Application configuration
    db::{models::ApiError, Database},   // [business] Database pool and API error body
    providers::ProviderRegistry,        // [business] Configured provider API clients
    storage::FileStore,                 // [business] File reference to URL resolver
    unlock::UnlockError,                // [business] Unlock engine error taxonomy
    web::{auth, download, gate, track}, // [business] HTTP handler modules
};

// [business] Application state combining database, configuration, provider
// clients, and the file resolver
// This allows Axum to inject each piece into handlers independently
#[derive(Debug, Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub providers: ProviderRegistry,
    pub files: FileStore,
}

impl AppState {
    pub fn new(
        db: Database,
        config: Config,
        providers: ProviderRegistry,
        files: FileStore,
    ) -> Self {
        Self {
            db,
            config,
            providers,
            files,
        }
    }
}

// [library] Implement FromRef to allow Axum to extract Database from AppState
impl FromRef<AppState> for Database {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.db.clone()
    }
}

// [library] Implement FromRef to allow Axum to extract Config from AppState
impl FromRef<AppState> for Config {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.config.clone()
    }
}

// [library] Implement FromRef to allow Axum to extract ProviderRegistry from AppState
impl FromRef<AppState> for ProviderRegistry {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.providers.clone()
    }
}

// [library] Implement FromRef to allow Axum to extract FileStore from AppState
impl FromRef<AppState> for FileStore {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.files.clone()
    }
}

// [business] Create the main HTTP application router with the public gate,
// OAuth round-trip, and download endpoints
pub fn create_app_router(db: Database, config: Config, providers: ProviderRegistry) -> Router {
    let files = FileStore::from_config(&config);
    let app_state = AppState::new(db, config, providers, files);
    Router::new()
        // [business] Public gate surface consumed by the gate page
        .route("/gate/:slug", get(gate::descriptor_handler)) // [business] Gate descriptor for rendering
        .route("/gate/:slug/submit", post(gate::submit_handler)) // [business] Email capture, creates the submission
        .route("/submission/:id", get(gate::progress_handler)) // [business] Authoritative step progress
        // [business] OAuth round trip against the configured providers
        .route("/auth/:provider", get(auth::connect_handler)) // [security] Mints state + PKCE, redirects out
        .route("/auth/:provider/callback", get(auth::callback_handler)) // [security] Consumes state, verifies actions
        // [business] Self-reported instagram click-through
        .route("/instagram/track", get(track::click_handler)) // [business] Records the click, returns the profile URL
        // [business] Download token issue and redemption
        .route("/gate/:slug/download-token", post(download::issue_handler)) // [security] Issued only once all steps verify
        .route("/download/:token", get(download::redeem_handler)) // [security] Atomic redemption, redirects to the file
        // [business] System health monitoring endpoint
        .route("/health", get(health_check)) // [business] Health check for load balancers
        // [library] Dependency injection - make shared state available to all handlers
        .with_state(app_state) // [rust] Inject combined application state
}

// [business] Literal 302 redirect. Axum's Redirect::to answers 303, and the
// OAuth and download legs of this flow always answer 302
pub(crate) fn found(location: String) -> Response {
    (
        StatusCode::FOUND,
        AppendHeaders([(header::LOCATION, location)]),
    )
        .into_response()
}

// [business] Map unlock engine errors onto HTTP status + stable error code
// Internal details stay in the logs; clients get the coarse taxonomy
pub(crate) fn unlock_error_response(error: UnlockError) -> (StatusCode, Json<ApiError>) {
    match error {
        UnlockError::Validation(message) => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("validation_error").with_message(&message)),
        ),
        UnlockError::InvalidState => (
            StatusCode::BAD_REQUEST,
            Json(
                ApiError::new("invalid_state")
                    .with_message("Invalid or expired authorization state"),
            ),
        ),
        UnlockError::ActionsFailed(message) => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("action_failed").with_message(&message)),
        ),
        UnlockError::GateClosed => (
            StatusCode::GONE,
            Json(ApiError::new("gate_closed").with_message("This gate is no longer open")),
        ),
        UnlockError::TokenNotFound => (
            StatusCode::NOT_FOUND,
            Json(ApiError::new("not_found").with_message("Unknown download token")),
        ),
        UnlockError::TokenExpired => (
            StatusCode::GONE,
            Json(ApiError::new("expired").with_message("Download token has expired")),
        ),
        UnlockError::LimitExceeded => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiError::new("limit_exceeded").with_message("Download limit reached")),
        ),
        UnlockError::Provider(e) => {
            error!("Provider failure surfaced outside a callback: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("server_error")),
            )
        }
        UnlockError::Internal(e) => {
            error!("Internal error: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("server_error")),
            )
        }
    }
}

// [business] Health check endpoint for monitoring and load balancer probes
// Returns simple "OK" response to indicate service is running and responsive
async fn health_check() -> &'static str {
    "OK" // [business] Static string - minimal overhead for high-frequency checks
}
