use super::models::*;
use crate::db::Database;
use anyhow::Result;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

// Gate queries
pub async fn get_gate_by_slug(db: &Database, slug: &str) -> Result<Option<Gate>> {
    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE slug = $1")
        .bind(slug)
        .fetch_optional(db.as_ref())
        .await?;

    Ok(gate)
}

pub async fn get_gate_by_id(db: &Database, gate_id: &Uuid) -> Result<Option<Gate>> {
    let gate = sqlx::query_as::<_, Gate>("SELECT * FROM gates WHERE id = $1")
        .bind(*gate_id)
        .fetch_optional(db.as_ref())
        .await?;

    Ok(gate)
}

/// Gate a submission belongs to, resolved inside a redemption transaction.
pub async fn get_gate_for_submission(
    conn: &mut PgConnection,
    submission_id: &Uuid,
) -> Result<Option<Gate>> {
    let gate = sqlx::query_as::<_, Gate>(
        "SELECT g.* FROM gates g
         JOIN submissions s ON s.gate_id = g.id
         WHERE s.id = $1",
    )
    .bind(*submission_id)
    .fetch_optional(conn)
    .await?;

    Ok(gate)
}

/// Guarded aggregate counter bump. Returns false when the gate's download
/// capacity is already exhausted; the condition and the increment ride one
/// statement so concurrent redemptions cannot overshoot max_downloads.
pub async fn increment_gate_download_count(
    conn: &mut PgConnection,
    gate_id: &Uuid,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE gates SET download_count = download_count + 1
         WHERE id = $1 AND (max_downloads IS NULL OR download_count < max_downloads)",
    )
    .bind(*gate_id)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

// Submission queries
//
// (gate_id, email) is unique; a returning visitor resumes their existing
// record instead of starting over. Consent is sticky once granted.
pub async fn upsert_submission(
    db: &Database,
    gate_id: &Uuid,
    email: &str,
    first_name: Option<&str>,
    marketing_consent: bool,
    ip_address: Option<&str>,
    user_agent: Option<&str>,
) -> Result<Submission> {
    let submission = sqlx::query_as::<_, Submission>(
        "INSERT INTO submissions (gate_id, email, first_name, marketing_consent, ip_address, user_agent)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (gate_id, email) DO UPDATE SET
             first_name = COALESCE(EXCLUDED.first_name, submissions.first_name),
             marketing_consent = submissions.marketing_consent OR EXCLUDED.marketing_consent,
             updated_at = NOW()
         RETURNING *",
    )
    .bind(*gate_id)
    .bind(email)
    .bind(first_name)
    .bind(marketing_consent)
    .bind(ip_address)
    .bind(user_agent)
    .fetch_one(db.as_ref())
    .await?;

    Ok(submission)
}

pub async fn get_submission_by_id(db: &Database, id: &Uuid) -> Result<Option<Submission>> {
    let submission = sqlx::query_as::<_, Submission>("SELECT * FROM submissions WHERE id = $1")
        .bind(*id)
        .fetch_optional(db.as_ref())
        .await?;

    Ok(submission)
}

// Identity binding keeps the first bound id; a later exchange for the same
// submission never overwrites it.
pub async fn set_soundcloud_identity(
    db: &Database,
    submission_id: &Uuid,
    user_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET
             soundcloud_user_id = COALESCE(soundcloud_user_id, $2),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(*submission_id)
    .bind(user_id)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

pub async fn set_spotify_identity(
    db: &Database,
    submission_id: &Uuid,
    user_id: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET
             spotify_user_id = COALESCE(spotify_user_id, $2),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(*submission_id)
    .bind(user_id)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

/// Monotone step marking for the soundcloud step. Flags only ever go
/// FALSE -> TRUE and the timestamp is written on the first transition only,
/// so re-running a callback is a harmless no-op.
pub async fn mark_soundcloud_verified(
    db: &Database,
    submission_id: &Uuid,
    repost: bool,
    follow: bool,
) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET
             soundcloud_repost_verified = soundcloud_repost_verified OR $2,
             soundcloud_repost_verified_at = CASE
                 WHEN NOT soundcloud_repost_verified AND $2 THEN NOW()
                 ELSE soundcloud_repost_verified_at
             END,
             soundcloud_follow_verified = soundcloud_follow_verified OR $3,
             soundcloud_follow_verified_at = CASE
                 WHEN NOT soundcloud_follow_verified AND $3 THEN NOW()
                 ELSE soundcloud_follow_verified_at
             END,
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(*submission_id)
    .bind(repost)
    .bind(follow)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

pub async fn mark_spotify_connected(db: &Database, submission_id: &Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET
             spotify_connected = TRUE,
             spotify_connected_at = COALESCE(spotify_connected_at, NOW()),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(*submission_id)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

pub async fn mark_instagram_clicked(db: &Database, submission_id: &Uuid) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET
             instagram_clicked = TRUE,
             instagram_clicked_at = COALESCE(instagram_clicked_at, NOW()),
             updated_at = NOW()
         WHERE id = $1",
    )
    .bind(*submission_id)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

pub async fn set_download_token(db: &Database, submission_id: &Uuid, token: &str) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET download_token = $2, updated_at = NOW() WHERE id = $1",
    )
    .bind(*submission_id)
    .bind(token)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

pub async fn mark_download_completed(
    conn: &mut PgConnection,
    submission_id: &Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE submissions SET download_completed = TRUE, updated_at = NOW() WHERE id = $1",
    )
    .bind(*submission_id)
    .execute(conn)
    .await?;

    Ok(())
}

// OAuth state queries
#[allow(clippy::too_many_arguments)]
pub async fn create_oauth_state(
    db: &Database,
    state: &str,
    submission_id: &Uuid,
    gate_id: &Uuid,
    provider: &str,
    code_verifier: &str,
    comment_body: Option<&str>,
    expires_at: OffsetDateTime,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO oauth_states
         (state, submission_id, gate_id, provider, code_verifier, comment_body, expires_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(state)
    .bind(*submission_id)
    .bind(*gate_id)
    .bind(provider)
    .bind(code_verifier)
    .bind(comment_body)
    .bind(expires_at)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

/// Single-use state redemption. The consumed check and the mark ride one
/// compare-and-set UPDATE, so of any number of concurrent callbacks carrying
/// the same state exactly one gets the row back. Missing, expired, and
/// already-consumed all collapse to None.
pub async fn consume_oauth_state(db: &Database, state: &str) -> Result<Option<OAuthState>> {
    let row = sqlx::query_as::<_, OAuthState>(
        "UPDATE oauth_states SET consumed = TRUE
         WHERE state = $1 AND consumed = FALSE AND expires_at > NOW()
         RETURNING *",
    )
    .bind(state)
    .fetch_optional(db.as_ref())
    .await?;

    Ok(row)
}

pub async fn cleanup_expired_oauth_states(db: &Database) -> Result<()> {
    sqlx::query("DELETE FROM oauth_states WHERE expires_at < NOW()")
        .execute(db.as_ref())
        .await?;

    Ok(())
}

// Download token queries
pub async fn create_download_token(
    db: &Database,
    token: &str,
    submission_id: &Uuid,
    expires_at: OffsetDateTime,
    use_limit: i32,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO download_tokens (token, submission_id, expires_at, use_limit)
         VALUES ($1, $2, $3, $4)",
    )
    .bind(token)
    .bind(*submission_id)
    .bind(expires_at)
    .bind(use_limit)
    .execute(db.as_ref())
    .await?;

    Ok(())
}

/// Conditional use-count increment. Returns the token row only when this call
/// actually claimed a use; exhausted, expired, and unknown tokens all return
/// None and are told apart afterwards via get_download_token.
pub async fn redeem_download_token(
    conn: &mut PgConnection,
    token: &str,
) -> Result<Option<DownloadToken>> {
    let row = sqlx::query_as::<_, DownloadToken>(
        "UPDATE download_tokens SET use_count = use_count + 1
         WHERE token = $1 AND use_count < use_limit AND expires_at > NOW()
         RETURNING *",
    )
    .bind(token)
    .fetch_optional(conn)
    .await?;

    Ok(row)
}

pub async fn get_download_token(db: &Database, token: &str) -> Result<Option<DownloadToken>> {
    let row = sqlx::query_as::<_, DownloadToken>("SELECT * FROM download_tokens WHERE token = $1")
        .bind(token)
        .fetch_optional(db.as_ref())
        .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{create_test_db, create_test_gate};
    use time::Duration;

    #[tokio::test]
    async fn test_unknown_lookups_return_none() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let result = get_gate_by_slug(&db, "definitely-not-a-gate").await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());

        // Nil UUID is a valid value, not an error
        let result = get_submission_by_id(&db, &Uuid::nil()).await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());

        let result = get_download_token(&db, "no-such-token").await;
        assert!(result.is_ok());
        assert!(result.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_submission_resumes_existing() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let gate = create_test_gate(&db).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());

        let first = upsert_submission(&db, &gate.id, &email, Some("Ada"), true, None, None)
            .await
            .unwrap();
        let second = upsert_submission(&db, &gate.id, &email, None, false, None, None)
            .await
            .unwrap();

        // Same visitor, same record
        assert_eq!(first.id, second.id);
        // Name survives a resubmit that omits it, consent stays granted
        assert_eq!(second.first_name.as_deref(), Some("Ada"));
        assert!(second.marketing_consent);
    }

    #[tokio::test]
    async fn test_consume_oauth_state_is_single_use() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let gate = create_test_gate(&db).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());
        let submission = upsert_submission(&db, &gate.id, &email, None, false, None, None)
            .await
            .unwrap();

        let state = format!("state-{}", Uuid::new_v4());
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(10);
        create_oauth_state(
            &db,
            &state,
            &submission.id,
            &gate.id,
            "soundcloud",
            "verifier-verifier-verifier-verifier-verifier",
            None,
            expires_at,
        )
        .await
        .unwrap();

        let first = consume_oauth_state(&db, &state).await.unwrap();
        assert!(first.is_some(), "first consume should win");
        assert_eq!(first.unwrap().provider, "soundcloud");

        let second = consume_oauth_state(&db, &state).await.unwrap();
        assert!(second.is_none(), "second consume must lose");

        let unknown = consume_oauth_state(&db, "never-issued").await.unwrap();
        assert!(unknown.is_none());
    }

    #[tokio::test]
    async fn test_racing_consumes_have_exactly_one_winner() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let gate = create_test_gate(&db).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());
        let submission = upsert_submission(&db, &gate.id, &email, None, false, None, None)
            .await
            .unwrap();

        let state = format!("state-{}", Uuid::new_v4());
        let expires_at = OffsetDateTime::now_utc() + Duration::minutes(10);
        create_oauth_state(
            &db,
            &state,
            &submission.id,
            &gate.id,
            "soundcloud",
            "verifier-verifier-verifier-verifier-verifier",
            None,
            expires_at,
        )
        .await
        .unwrap();

        let (db_a, state_a) = (db.clone(), state.clone());
        let (db_b, state_b) = (db.clone(), state.clone());
        let (first, second) = tokio::join!(
            tokio::spawn(async move { consume_oauth_state(&db_a, &state_a).await }),
            tokio::spawn(async move { consume_oauth_state(&db_b, &state_b).await }),
        );

        let first = first.unwrap().unwrap();
        let second = second.unwrap().unwrap();
        assert!(
            first.is_some() != second.is_some(),
            "exactly one consume must win"
        );
    }

    #[tokio::test]
    async fn test_expired_oauth_state_cannot_be_consumed() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let gate = create_test_gate(&db).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());
        let submission = upsert_submission(&db, &gate.id, &email, None, false, None, None)
            .await
            .unwrap();

        let state = format!("state-{}", Uuid::new_v4());
        let expired = OffsetDateTime::now_utc() - Duration::minutes(1);
        create_oauth_state(
            &db,
            &state,
            &submission.id,
            &gate.id,
            "soundcloud",
            "verifier-verifier-verifier-verifier-verifier",
            None,
            expired,
        )
        .await
        .unwrap();

        let result = consume_oauth_state(&db, &state).await.unwrap();
        assert!(result.is_none(), "expired state must not be consumable");

        cleanup_expired_oauth_states(&db).await.unwrap();
    }

    #[tokio::test]
    async fn test_step_flags_are_monotone() {
        let db = match create_test_db().await {
            Ok(db) => db,
            Err(_) => {
                println!("Skipping database tests - no test database available");
                return;
            }
        };

        let gate = create_test_gate(&db).await.unwrap();
        let email = format!("{}@example.com", Uuid::new_v4());
        let submission = upsert_submission(&db, &gate.id, &email, None, false, None, None)
            .await
            .unwrap();

        mark_soundcloud_verified(&db, &submission.id, true, false)
            .await
            .unwrap();
        let after_repost = get_submission_by_id(&db, &submission.id)
            .await
            .unwrap()
            .unwrap();
        assert!(after_repost.soundcloud_repost_verified);
        let repost_at = after_repost.soundcloud_repost_verified_at;
        assert!(repost_at.is_some());

        // Marking follow alone must not disturb the repost flag or its timestamp
        mark_soundcloud_verified(&db, &submission.id, false, true)
            .await
            .unwrap();
        let after_follow = get_submission_by_id(&db, &submission.id)
            .await
            .unwrap()
            .unwrap();
        assert!(after_follow.soundcloud_repost_verified);
        assert!(after_follow.soundcloud_follow_verified);
        assert_eq!(after_follow.soundcloud_repost_verified_at, repost_at);
    }
}
