// Public gate surface: descriptor, email capture, and progress snapshot.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::models::{
    ApiError, GateDescriptor, GateSteps, ProgressResponse, ProgressSteps, SubmitRequest,
    SubmitResponse,
};
use crate::db::{queries, Database};
use crate::unlock::next_step;

// Pragmatic shape check, not RFC 5322. The address book is the artist's
// problem; this only keeps obvious garbage out.
static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex compiles"));

const MAX_EMAIL_LEN: usize = 254;

/// GET /gate/:slug - public descriptor for rendering the gate page.
/// Never exposes the file key or the provider target identifiers.
pub async fn descriptor_handler(
    State(db): State<Database>,
    Path(slug): Path<String>,
) -> Result<Json<GateDescriptor>, (StatusCode, Json<ApiError>)> {
    let gate = queries::get_gate_by_slug(&db, &slug)
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
                StatusCode::NOT_FOUND,
                Json(ApiError::new("not_found").with_message("No gate with that slug")),
            )
        })?;

    let active = gate.is_open(OffsetDateTime::now_utc());
    Ok(Json(GateDescriptor {
        slug: gate.slug,
        title: gate.title,
        artist_name: gate.artist_name,
        artwork_url: gate.artwork_url,
        active,
        steps: GateSteps {
            email: true,
            soundcloud_repost: gate.require_soundcloud_repost,
            soundcloud_follow: gate.require_soundcloud_follow,
            instagram_click: gate.require_instagram_click,
            spotify_connect: gate.require_spotify_connect,
        },
    }))
}

/// POST /gate/:slug/submit - email capture.
///
/// Upserts on (gate, email): resubmitting the same address resumes the
/// existing record with all of its verified steps intact.
pub async fn submit_handler(
    State(db): State<Database>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, (StatusCode, Json<ApiError>)> {
    let email = request.email.trim().to_lowercase();
    if email.len() > MAX_EMAIL_LEN || !EMAIL_RE.is_match(&email) {
        warn!(gate = %slug, "rejected malformed email");
        return Err((
            StatusCode::BAD_REQUEST,
            Json(
                ApiError::new("validation_error")
                    .with_message("A valid email address is required"),
            ),
        ));
    }

    let gate = queries::get_gate_by_slug(&db, &slug)
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
                StatusCode::NOT_FOUND,
                Json(ApiError::new("not_found").with_message("No gate with that slug")),
            )
        })?;

    if !gate.is_open(OffsetDateTime::now_utc()) {
        return Err((
            StatusCode::GONE,
            Json(ApiError::new("gate_closed").with_message("This gate is no longer open")),
        ));
    }

    let first_name = request
        .first_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());
    let ip_address = client_ip(&headers);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    let submission = queries::upsert_submission(
        &db,
        &gate.id,
        &email,
        first_name,
        request.consent_marketing,
        ip_address.as_deref(),
        user_agent.as_deref(),
    )
    .await
    .map_err(|e| {
        error!("Database error upserting submission: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ApiError::new("server_error")),
        )
    })?;

    let next = next_step(&gate, Some(&submission));
    info!(
        gate = %gate.slug,
        submission_id = %submission.id,
        next = next.as_str(),
        "submission captured"
    );

    Ok(Json(SubmitResponse {
        submission_id: submission.id,
        next_step: next.as_str().to_string(),
    }))
}

/// GET /submission/:id - authoritative progress snapshot. Clients reconcile
/// against this instead of trusting any cached step state.
pub async fn progress_handler(
    State(db): State<Database>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProgressResponse>, (StatusCode, Json<ApiError>)> {
    let submission = queries::get_submission_by_id(&db, &id)
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
                StatusCode::NOT_FOUND,
                Json(ApiError::new("not_found").with_message("No submission with that id")),
            )
        })?;

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
            error!(submission_id = %submission.id, "submission references a missing gate");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("server_error")),
            )
        })?;

    let next = next_step(&gate, Some(&submission));
    Ok(Json(ProgressResponse {
        submission_id: submission.id,
        gate_id: submission.gate_id,
        next_step: next.as_str().to_string(),
        steps: ProgressSteps {
            soundcloud_repost_verified: submission.soundcloud_repost_verified,
            soundcloud_follow_verified: submission.soundcloud_follow_verified,
            instagram_clicked: submission.instagram_clicked,
            spotify_connected: submission.spotify_connected,
        },
        download_completed: submission.download_completed,
    }))
}

// First X-Forwarded-For hop when present. The socket address is the
// reverse proxy, not the visitor.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(|hop| hop.trim().to_string())
        .filter(|hop| !hop.is_empty())
}
