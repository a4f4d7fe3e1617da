// Download token issue and redemption. Issue re-checks every requirement
// against the database; redemption claims the token and the gate's
// aggregate allowance in one transaction.

use anyhow::Context;
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::db::models::Gate;
use crate::db::{queries, Database};
use crate::security::generate_opaque_token;
use crate::storage::FileStore;
use crate::unlock::{steps, Step, UnlockError};

/// A successful redemption: where the file actually lives.
#[derive(Debug)]
pub struct DownloadGrant {
    pub url: String,
}

/// Mint a download token for a submission that has cleared every required
/// step. The step check reads the flags as stored, so a client cannot talk
/// its way past an unverified step.
pub async fn issue(
    db: &Database,
    config: &Config,
    gate: &Gate,
    submission_id: &Uuid,
) -> Result<String, UnlockError> {
    let submission = queries::get_submission_by_id(db, submission_id)
        .await?
        .ok_or_else(|| UnlockError::Validation("unknown submission".to_string()))?;

    if submission.gate_id != gate.id {
        return Err(UnlockError::Validation(
            "submission does not belong to this gate".to_string(),
        ));
    }

    let now = OffsetDateTime::now_utc();
    if !gate.is_open(now) {
        return Err(UnlockError::GateClosed);
    }

    // Issue-time check on the aggregate cap; the binding check is the
    // guarded increment at redemption.
    if let Some(max) = gate.max_downloads {
        if gate.download_count >= max {
            return Err(UnlockError::LimitExceeded);
        }
    }

    let step = steps::next_step(gate, Some(&submission));
    if step != Step::Download {
        return Err(UnlockError::Validation(format!(
            "step '{}' is not complete",
            step
        )));
    }

    let token = generate_opaque_token();
    let expires_at = now + Duration::hours(config.download_token_ttl_hours);
    queries::create_download_token(db, &token, &submission.id, expires_at, gate.download_use_limit)
        .await?;
    queries::set_download_token(db, &submission.id, &token).await?;

    info!(
        submission_id = %submission.id,
        gate = %gate.slug,
        use_limit = gate.download_use_limit,
        "download token issued"
    );
    Ok(token)
}

/// Redeem a download token for the file URL.
///
/// The token claim, the gate's aggregate counter, and the completion flag
/// commit or roll back together. Two racing redemptions of a one-use token
/// cannot both get a file URL.
pub async fn redeem(
    db: &Database,
    files: &FileStore,
    token: &str,
) -> Result<DownloadGrant, UnlockError> {
    let mut tx = db.begin().await.context("begin redemption transaction")?;

    let Some(claimed) = queries::redeem_download_token(&mut tx, token).await? else {
        tx.rollback()
            .await
            .context("rollback after unusable token")?;
        return Err(classify_unusable_token(db, token).await);
    };

    let Some(gate) = queries::get_gate_for_submission(&mut tx, &claimed.submission_id).await? else {
        tx.rollback().await.context("rollback after missing gate")?;
        return Err(UnlockError::Validation("gate no longer exists".to_string()));
    };

    if !queries::increment_gate_download_count(&mut tx, &gate.id).await? {
        tx.rollback()
            .await
            .context("rollback after exhausted gate")?;
        return Err(UnlockError::LimitExceeded);
    }

    queries::mark_download_completed(&mut tx, &claimed.submission_id).await?;
    tx.commit().await.context("commit redemption")?;

    info!(
        submission_id = %claimed.submission_id,
        gate = %gate.slug,
        use_count = claimed.use_count,
        "download redeemed"
    );
    Ok(DownloadGrant {
        url: files.download_url(&gate.file_key),
    })
}

// The conditional claim returned zero rows: the token is unknown, expired,
// or spent. Re-read it to say which.
async fn classify_unusable_token(db: &Database, token: &str) -> UnlockError {
    match queries::get_download_token(db, token).await {
        Ok(None) => UnlockError::TokenNotFound,
        Ok(Some(t)) if t.expires_at <= OffsetDateTime::now_utc() => UnlockError::TokenExpired,
        Ok(Some(_)) => UnlockError::LimitExceeded,
        Err(e) => UnlockError::Internal(e),
    }
}
