// OAuth round trip: /auth/:provider mints the state + PKCE pair and
// redirects out; /auth/:provider/callback consumes the state and verifies
// the gate's required actions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
    Json,
};
use serde::Deserialize;
use time::{Duration, OffsetDateTime};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::ApiError;
use crate::db::{queries, Database};
use crate::providers::{ProviderKind, ProviderRegistry};
use crate::security::{generate_opaque_token, pkce::PkcePair};
use crate::unlock::verifier::{self, CallbackOutcome};
use crate::unlock::UnlockError;
use crate::web::routes::found;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub submission_id: Uuid,
    pub gate_id: Uuid,
    /// Optional comment text carried server-side across the round trip.
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// GET /auth/:provider - start an authorization round trip.
///
/// The code verifier and the comment never reach the browser; only the
/// opaque state token travels through the provider and back.
pub async fn connect_handler(
    State(db): State<Database>,
    State(config): State<Config>,
    State(registry): State<ProviderRegistry>,
    Path(provider): Path<String>,
    Query(params): Query<ConnectParams>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let provider: ProviderKind = provider.parse().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiError::new("validation_error").with_message("Unknown provider")),
        )
    })?;

    let submission = queries::get_submission_by_id(&db, &params.submission_id)
        .await
        .map_err(|e| {
            error!("Database error loading submission: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("server_error")),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new("validation_error").with_message("Unknown submission")),
            )
        })?;

    if submission.gate_id != params.gate_id {
        warn!(
            submission_id = %submission.id,
            claimed_gate = %params.gate_id,
            "submission does not belong to the claimed gate"
        );
        return Err((
            StatusCode::BAD_REQUEST,
            Json(
                ApiError::new("validation_error")
                    .with_message("Submission does not belong to this gate"),
            ),
        ));
    }

    let gate = queries::get_gate_by_id(&db, &submission.gate_id)
        .await
        .map_err(|e| {
            error!("Database error loading gate: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("server_error")),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ApiError::new("validation_error").with_message("Gate no longer exists")),
            )
        })?;

    let relevant = match provider {
        ProviderKind::Soundcloud => gate.requires_soundcloud(),
        ProviderKind::Spotify => gate.require_spotify_connect,
    };
    if !relevant {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(
                ApiError::new("validation_error")
                    .with_message("This gate does not use that platform"),
            ),
        ));
    }

    // Opportunistic purge keeps the state table from accumulating dead rows.
    if let Err(e) = queries::cleanup_expired_oauth_states(&db).await {
        warn!("Expired state cleanup failed: {}", e);
    }

    let pkce = PkcePair::generate();
    let state = generate_opaque_token();
    let expires_at = OffsetDateTime::now_utc() + Duration::minutes(config.oauth_state_ttl_mins);
    let comment = params
        .comment
        .as_deref()
        .map(str::trim)
        .filter(|comment| !comment.is_empty());

    queries::create_oauth_state(
        &db,
        &state,
        &submission.id,
        &gate.id,
        provider.as_str(),
        &pkce.verifier,
        comment,
        expires_at,
    )
    .await
    .map_err(|e| {
        error!("Database error storing oauth state: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new("server_error")),
        )
    })?;

    let redirect_uri = config.oauth_redirect_uri(provider.as_str());
    let authorize_url = registry
        .get(provider)
        .authorize_url(&state, &redirect_uri, &pkce.challenge);

    info!(
        provider = %provider,
        submission_id = %submission.id,
        gate = %gate.slug,
        "redirecting to provider authorization"
    );
    Ok(found(authorize_url))
}

/// GET /auth/:provider/callback - finish an authorization round trip.
///
/// Every outcome is a 302 back to the gate page; errors ride the query
/// string instead of a response body.
pub async fn callback_handler(
    State(db): State<Database>,
    State(config): State<Config>,
    State(registry): State<ProviderRegistry>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Ok(provider) = provider.parse::<ProviderKind>() else {
        return found(error_redirect(&config, None, "unknown provider"));
    };

    // The visitor denied, or the provider refused the request outright.
    // The echoed state still gets burned so it cannot be replayed later.
    if let Some(provider_error) = params.error.as_deref() {
        warn!(provider = %provider, error = provider_error, "provider reported an authorization error");
        let slug = retire_state_for_slug(&db, params.state.as_deref()).await;
        return found(error_redirect(
            &config,
            slug.as_deref(),
            "authorization was not completed",
        ));
    }

    let (Some(code), Some(state)) = (params.code.as_deref(), params.state.as_deref()) else {
        warn!(provider = %provider, "callback missing code or state");
        return found(error_redirect(&config, None, "missing code or state"));
    };

    match verifier::verify_callback(&db, &config, &registry, provider, code, state).await {
        CallbackOutcome::Success { gate_slug, provider } => {
            info!(provider = %provider, gate = %gate_slug, "callback verified");
            found(success_redirect(&config, &gate_slug, provider))
        }
        CallbackOutcome::Failure { gate_slug, error } => {
            warn!(provider = %provider, "callback failed: {}", error);
            found(error_redirect(
                &config,
                gate_slug.as_deref(),
                &public_error_message(&error),
            ))
        }
    }
}

fn success_redirect(config: &Config, slug: &str, provider: ProviderKind) -> String {
    format!(
        "{}?oauth=success&provider={}",
        config.gate_page_url(slug),
        provider
    )
}

// Without a slug the visitor lands on the frontend root; with one they
// land back on the gate page they came from.
fn error_redirect(config: &Config, slug: Option<&str>, message: &str) -> String {
    let target = match slug {
        Some(slug) => config.gate_page_url(slug),
        None => config.frontend_base_url.trim_end_matches('/').to_string(),
    };
    format!(
        "{}?oauth=error&message={}",
        target,
        urlencoding::encode(message)
    )
}

// Visitor-facing text only. Raw provider bodies and database errors stay
// in the logs.
fn public_error_message(error: &UnlockError) -> String {
    match error {
        UnlockError::InvalidState => "authorization link expired, please try again".to_string(),
        UnlockError::Validation(message) | UnlockError::ActionsFailed(message) => message.clone(),
        UnlockError::Provider(_) => "the platform rejected the request, please try again".to_string(),
        _ => "something went wrong, please try again".to_string(),
    }
}

// Burn the state echoed on an error callback and recover the gate slug for
// the redirect. Best-effort on both counts.
async fn retire_state_for_slug(db: &Database, state: Option<&str>) -> Option<String> {
    let state = state?;
    let record = queries::consume_oauth_state(db, state).await.ok().flatten()?;
    let gate = queries::get_gate_by_id(db, &record.gate_id).await.ok().flatten()?;
    Some(gate.slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_redirect_lands_on_the_gate_page() {
        let url = success_redirect(&Config::for_tests(), "my-track", ProviderKind::Soundcloud);
        assert_eq!(
            url,
            "https://pages.example.com/gate/my-track?oauth=success&provider=soundcloud"
        );
    }

    #[test]
    fn test_error_redirect_encodes_the_message() {
        let url = error_redirect(&Config::for_tests(), Some("my-track"), "something went wrong");
        assert_eq!(
            url,
            "https://pages.example.com/gate/my-track?oauth=error&message=something%20went%20wrong"
        );
    }

    #[test]
    fn test_error_redirect_without_a_slug_uses_the_frontend_root() {
        let url = error_redirect(&Config::for_tests(), None, "bad state");
        assert_eq!(
            url,
            "https://pages.example.com?oauth=error&message=bad%20state"
        );
    }

    #[test]
    fn test_public_messages_never_leak_internals() {
        let internal = UnlockError::Internal(anyhow::anyhow!(
            "connection refused (postgres://user:pass@db:5432)"
        ));
        let message = public_error_message(&internal);
        assert!(!message.contains("postgres"));

        assert_eq!(
            public_error_message(&UnlockError::InvalidState),
            "authorization link expired, please try again"
        );
    }
}
