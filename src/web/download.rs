// Download token issue and redemption endpoints. The unlock engine does
// the actual checking; these handlers translate its verdicts onto the
// HTTP surface.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use tracing::error;

use crate::config::Config;
use crate::db::models::{ApiError, DownloadTokenRequest, DownloadTokenResponse};
use crate::db::{queries, Database};
use crate::storage::FileStore;
use crate::unlock::issuer;
use crate::web::routes::{found, unlock_error_response};

/// POST /gate/:slug/download-token - mint a download token.
///
/// Fails with 400 while any required step is unverified; the issuer reads
/// the stored flags, so the client's own idea of its progress carries no
/// weight here.
pub async fn issue_handler(
    State(db): State<Database>,
    State(config): State<Config>,
    Path(slug): Path<String>,
    Json(request): Json<DownloadTokenRequest>,
) -> Result<Json<DownloadTokenResponse>, (StatusCode, Json<ApiError>)> {
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

    let token = issuer::issue(&db, &config, &gate, &request.submission_id)
        .await
        .map_err(unlock_error_response)?;

    Ok(Json(DownloadTokenResponse { token }))
}

/// GET /download/:token - redeem a token and redirect to the file.
///
/// 404 for unknown tokens, 410 for expired ones, 429 once the per-token or
/// per-gate allowance is spent. Success is a 302 at the resolved file URL.
pub async fn redeem_handler(
    State(db): State<Database>,
    State(files): State<FileStore>,
    Path(token): Path<String>,
) -> Result<Response, (StatusCode, Json<ApiError>)> {
    let grant = issuer::redeem(&db, &files, &token)
        .await
        .map_err(unlock_error_response)?;

    Ok(found(grant.url))
}
