// OAuth callback verification: consume the single-use state, exchange the
// code, run the gate's required actions, and set step flags only when the
// whole batch succeeded.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::Config;
use crate::db::models::{Gate, OAuthState};
use crate::db::{queries, Database};
use crate::providers::{
    ActionFailure, ProviderClient, ProviderError, ProviderKind, ProviderRegistry, SocialAction,
};
use crate::unlock::UnlockError;

// Read-only probes get a short retry ladder; mutating calls never do.
const VERIFY_ATTEMPTS: u32 = 3;
const VERIFY_BACKOFF: Duration = Duration::from_millis(250);

/// Where a finished callback should send the visitor.
///
/// Callbacks never surface an error body to the browser, so failures carry
/// the gate slug whenever the state resolved far enough to know it.
#[derive(Debug)]
pub enum CallbackOutcome {
    Success {
        gate_slug: String,
        provider: ProviderKind,
    },
    Failure {
        gate_slug: Option<String>,
        error: UnlockError,
    },
}

/// Run the whole callback leg for one provider round trip.
///
/// The state token is consumed first and exactly once; everything after
/// that point is working on a claim no concurrent callback can repeat.
pub async fn verify_callback(
    db: &Database,
    config: &Config,
    registry: &ProviderRegistry,
    provider: ProviderKind,
    code: &str,
    state_token: &str,
) -> CallbackOutcome {
    let state = match queries::consume_oauth_state(db, state_token).await {
        Ok(Some(state)) => state,
        Ok(None) => {
            warn!(provider = %provider, "callback with unknown, expired, or replayed state");
            return CallbackOutcome::Failure {
                gate_slug: None,
                error: UnlockError::InvalidState,
            };
        }
        Err(e) => {
            return CallbackOutcome::Failure {
                gate_slug: None,
                error: e.into(),
            }
        }
    };

    // A state minted for one provider is not redeemable on another's
    // callback URL.
    if state.provider != provider.as_str() {
        warn!(
            expected = %state.provider,
            got = %provider,
            "provider mismatch on callback state"
        );
        return CallbackOutcome::Failure {
            gate_slug: None,
            error: UnlockError::InvalidState,
        };
    }

    let gate = match queries::get_gate_by_id(db, &state.gate_id).await {
        Ok(Some(gate)) => gate,
        Ok(None) => {
            return CallbackOutcome::Failure {
                gate_slug: None,
                error: UnlockError::Validation("gate no longer exists".to_string()),
            }
        }
        Err(e) => {
            return CallbackOutcome::Failure {
                gate_slug: None,
                error: e.into(),
            }
        }
    };

    let gate_slug = gate.slug.clone();
    match run_provider_leg(db, config, registry, provider, code, &state, &gate).await {
        Ok(()) => CallbackOutcome::Success {
            gate_slug,
            provider,
        },
        Err(error) => CallbackOutcome::Failure {
            gate_slug: Some(gate_slug),
            error,
        },
    }
}

async fn run_provider_leg(
    db: &Database,
    config: &Config,
    registry: &ProviderRegistry,
    provider: ProviderKind,
    code: &str,
    state: &OAuthState,
    gate: &Gate,
) -> Result<(), UnlockError> {
    let client = registry.get(provider);
    let redirect_uri = config.oauth_redirect_uri(provider.as_str());

    let token = client
        .exchange_code(code, &redirect_uri, &state.code_verifier)
        .await?;

    match provider {
        ProviderKind::Soundcloud => {
            verify_soundcloud(db, client, &token.access_token, state, gate).await
        }
        ProviderKind::Spotify => verify_spotify(db, client, &token.access_token, state, gate).await,
    }
}

// Identity binding on soundcloud is audit data: a failed fetch is logged
// and the flow continues unbound. The actions are what gets verified.
async fn verify_soundcloud(
    db: &Database,
    client: &dyn ProviderClient,
    access_token: &str,
    state: &OAuthState,
    gate: &Gate,
) -> Result<(), UnlockError> {
    match client.fetch_identity(access_token).await {
        Ok(identity) => {
            queries::set_soundcloud_identity(db, &state.submission_id, &identity.id).await?;
        }
        Err(e) => {
            warn!(
                submission_id = %state.submission_id,
                "identity fetch failed, continuing unbound: {}",
                e
            );
        }
    }

    let actions = soundcloud_actions(gate, state.comment_body.as_deref())?;

    // All-or-nothing: flags move only when every action in the batch lands.
    // A dead token aborts immediately; other failures are collected so the
    // visitor sees everything that went wrong in one pass.
    let mut failures: Vec<ActionFailure> = Vec::new();
    for action in &actions {
        if matches!(action, SocialAction::Follow { .. })
            && confirmed_done(client, access_token, action).await
        {
            debug!(action = action.describe(), "already in place, skipping mutating call");
            continue;
        }

        match client.perform_action(access_token, action).await {
            Ok(outcome) => {
                debug!(action = action.describe(), outcome = ?outcome, "action settled");
            }
            Err(ProviderError::Action(ActionFailure::Unauthorized)) => {
                warn!(
                    submission_id = %state.submission_id,
                    "access token rejected mid-batch, aborting"
                );
                return Err(ProviderError::Action(ActionFailure::Unauthorized).into());
            }
            Err(ProviderError::Action(failure)) => failures.push(failure),
            Err(other) => return Err(other.into()),
        }
    }

    if !failures.is_empty() {
        let summary = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        warn!(
            submission_id = %state.submission_id,
            failed = failures.len(),
            "action batch failed, no steps marked: {}",
            summary
        );
        return Err(UnlockError::ActionsFailed(summary));
    }

    queries::mark_soundcloud_verified(
        db,
        &state.submission_id,
        gate.require_soundcloud_repost,
        gate.require_soundcloud_follow,
    )
    .await?;

    info!(
        submission_id = %state.submission_id,
        gate = %gate.slug,
        actions = actions.len(),
        "soundcloud step verified"
    );
    Ok(())
}

// Identity is load-bearing on spotify: the step records which account
// connected, so a failed fetch fails the step. The library save afterwards
// is best-effort and never blocks the flow.
async fn verify_spotify(
    db: &Database,
    client: &dyn ProviderClient,
    access_token: &str,
    state: &OAuthState,
    gate: &Gate,
) -> Result<(), UnlockError> {
    let identity = client.fetch_identity(access_token).await?;
    queries::set_spotify_identity(db, &state.submission_id, &identity.id).await?;
    queries::mark_spotify_connected(db, &state.submission_id).await?;
    info!(
        submission_id = %state.submission_id,
        gate = %gate.slug,
        "spotify account connected"
    );

    if let Some(track_id) = gate.spotify_track_id.as_deref() {
        let action = SocialAction::SaveTrack {
            track_id: track_id.to_string(),
        };
        match client.perform_action(access_token, &action).await {
            Ok(outcome) => debug!(outcome = ?outcome, "track saved to library"),
            Err(e) => warn!(
                submission_id = %state.submission_id,
                "library save failed: {}",
                e
            ),
        }
    }

    Ok(())
}

// The gate's required soundcloud actions plus the visitor's optional
// comment. A required action with no configured target is a broken gate;
// the comment just needs a track to land on and is dropped otherwise.
fn soundcloud_actions(
    gate: &Gate,
    comment: Option<&str>,
) -> Result<Vec<SocialAction>, UnlockError> {
    let mut actions = Vec::new();

    if gate.require_soundcloud_repost {
        let track_urn = gate.soundcloud_track_urn.clone().ok_or_else(|| {
            UnlockError::Validation("gate requires a repost but has no track configured".to_string())
        })?;
        actions.push(SocialAction::Repost { track_urn });
    }

    if gate.require_soundcloud_follow {
        let user_urn = gate.soundcloud_user_urn.clone().ok_or_else(|| {
            UnlockError::Validation(
                "gate requires a follow but has no profile configured".to_string(),
            )
        })?;
        actions.push(SocialAction::Follow { user_urn });
    }

    if let (Some(body), Some(track_urn)) = (comment, gate.soundcloud_track_urn.as_deref()) {
        let body = body.trim();
        if !body.is_empty() {
            actions.push(SocialAction::Comment {
                track_urn: track_urn.to_string(),
                body: body.to_string(),
            });
        }
    }

    Ok(actions)
}

// Probe whether the action is already in place. Transient probe failures
// are retried with a stepped backoff and then treated as "could not
// confirm", which sends the flow down the mutating path.
async fn confirmed_done(
    client: &dyn ProviderClient,
    access_token: &str,
    action: &SocialAction,
) -> bool {
    for attempt in 0..VERIFY_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(VERIFY_BACKOFF * attempt).await;
        }
        match client.verify_action(access_token, action).await {
            Ok(done) => return done,
            Err(e) => {
                debug!(attempt, action = action.describe(), "verify probe failed: {}", e);
            }
        }
    }
    false
}
