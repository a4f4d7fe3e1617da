//! SoundCloud client: token exchange, identity, and the repost / follow /
//! comment / purchase-link actions the gate can require.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    settle_action, truncate_body, AccessToken, ActionFailure, ActionOutcome, ProviderAuthConfig,
    ProviderClient, ProviderError, ProviderIdentity, ProviderKind, SocialAction,
};

const AUTHORIZE_URL: &str = "https://secure.soundcloud.com/authorize";
const TOKEN_URL: &str = "https://secure.soundcloud.com/oauth/token";
const API_BASE_URL: &str = "https://api.soundcloud.com";

#[derive(Debug)]
pub struct SoundcloudClient {
    config: ProviderAuthConfig,
    http: reqwest::Client,
}

// GET /me payload. SoundCloud user ids are numeric on the wire.
#[derive(Debug, Deserialize)]
struct MeResponse {
    id: i64,
    #[serde(default)]
    username: Option<String>,
}

impl SoundcloudClient {
    /// Configuration pointing at the real SoundCloud endpoints.
    pub fn default_config(
        client_id: &str,
        client_secret: &str,
        timeout: Duration,
    ) -> ProviderAuthConfig {
        ProviderAuthConfig {
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
            api_base_url: API_BASE_URL.to_string(),
            timeout,
        }
    }

    pub fn new(config: ProviderAuthConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    // SoundCloud uses the non-standard "OAuth" authorization scheme.
    fn auth_header(&self, access_token: &str) -> String {
        format!("OAuth {}", access_token)
    }
}

#[async_trait]
impl ProviderClient for SoundcloudClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Soundcloud
    }

    fn auth_config(&self) -> &ProviderAuthConfig {
        &self.config
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<AccessToken, ProviderError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
            ("code", code),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                status = status.as_u16(),
                body = %truncate_body(&body),
                "SoundCloud token exchange failed"
            );
            return Err(ProviderError::TokenExchange {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let token: AccessToken = response.json().await?;
        debug!(
            expires_in = ?token.expires_in,
            has_refresh_token = token.refresh_token.is_some(),
            "SoundCloud token exchange succeeded"
        );
        Ok(token)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, ProviderError> {
        let response = self
            .http
            .get(format!("{}/me", self.config.api_base_url))
            .header(AUTHORIZATION, self.auth_header(access_token))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::IdentityFetch {
                status: status.as_u16(),
                body: truncate_body(&body),
            });
        }

        let me: MeResponse = response.json().await?;
        Ok(ProviderIdentity {
            id: me.id.to_string(),
            username: me.username,
        })
    }

    async fn perform_action(
        &self,
        access_token: &str,
        action: &SocialAction,
    ) -> Result<ActionOutcome, ProviderError> {
        let base = &self.config.api_base_url;

        let request = match action {
            SocialAction::Repost { track_urn } => self
                .http
                .put(format!("{}/reposts/tracks/{}", base, track_urn)),
            SocialAction::Follow { user_urn } => self
                .http
                .put(format!("{}/me/followings/{}", base, user_urn)),
            SocialAction::Comment { track_urn, body } => self
                .http
                .post(format!("{}/tracks/{}/comments", base, track_urn))
                .json(&serde_json::json!({ "comment": { "body": body } })),
            SocialAction::UpdatePurchaseLink { track_urn, url } => self
                .http
                .put(format!("{}/tracks/{}", base, track_urn))
                .json(&serde_json::json!({ "track": { "purchase_url": url } })),
            SocialAction::SaveTrack { .. } => {
                return Err(ProviderError::UnsupportedAction {
                    provider: "soundcloud",
                    action: action.describe(),
                })
            }
        };

        let response = request
            .header(AUTHORIZATION, self.auth_header(access_token))
            .send()
            .await?;

        settle_action("soundcloud", action, response).await
    }

    async fn verify_action(
        &self,
        access_token: &str,
        action: &SocialAction,
    ) -> Result<bool, ProviderError> {
        match action {
            // 200 on /me/followings/{urn} means the follow exists, 404 means
            // it does not. Everything else is a real failure.
            SocialAction::Follow { user_urn } => {
                let response = self
                    .http
                    .get(format!(
                        "{}/me/followings/{}",
                        self.config.api_base_url, user_urn
                    ))
                    .header(AUTHORIZATION, self.auth_header(access_token))
                    .send()
                    .await?;

                let status = response.status();
                match status.as_u16() {
                    200..=299 => Ok(true),
                    404 => Ok(false),
                    401 => Err(ProviderError::Action(ActionFailure::Unauthorized)),
                    403 => Err(ProviderError::Action(ActionFailure::Forbidden)),
                    _ => {
                        let body = response.text().await.unwrap_or_default();
                        Err(ProviderError::Action(ActionFailure::Generic {
                            status: status.as_u16(),
                            body: truncate_body(&body),
                        }))
                    }
                }
            }
            // No read endpoint for these; "unconfirmed" is not a verdict.
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client() -> SoundcloudClient {
        SoundcloudClient::new(SoundcloudClient::default_config(
            "sc-client-id",
            "sc-secret",
            Duration::from_secs(5),
        ))
        .expect("client builds")
    }

    fn mock_client(server: &MockServer) -> SoundcloudClient {
        SoundcloudClient::new(
            SoundcloudClient::default_config("sc-client-id", "sc-secret", Duration::from_secs(5))
                .with_token_url(format!("{}/oauth/token", server.uri()))
                .with_api_base_url(server.uri()),
        )
        .expect("client builds")
    }

    #[test]
    fn test_authorize_url_carries_pkce_and_state() {
        let client = test_client();
        let url = client.authorize_url(
            "state-123",
            "https://gate.example.com/auth/soundcloud/callback",
            "challenge-abc",
        );

        assert!(url.starts_with("https://secure.soundcloud.com/authorize?"));
        assert!(url.contains("client_id=sc-client-id"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("code_challenge=challenge-abc"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("state=state-123"));
        assert!(url.contains(
            "redirect_uri=https%3A%2F%2Fgate.example.com%2Fauth%2Fsoundcloud%2Fcallback"
        ));
    }

    #[test]
    fn test_authorize_url_has_no_scope_parameter() {
        let client = test_client();
        let url = client.authorize_url("s", "https://example.com/cb", "c");
        assert!(!url.contains("scope="), "default grants only: {}", url);
    }

    #[tokio::test]
    async fn test_save_track_is_unsupported() {
        let client = test_client();
        let action = SocialAction::SaveTrack {
            track_id: "4uLU6hMCjMI75M1A2tKUQC".to_string(),
        };

        let result = client.perform_action("token", &action).await;
        assert!(matches!(
            result,
            Err(ProviderError::UnsupportedAction {
                provider: "soundcloud",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_exchange_code_posts_the_verifier() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=auth-code"))
            .and(body_string_contains("code_verifier=verifier-xyz"))
            .and(body_string_contains("client_id=sc-client-id"))
            .and(body_string_contains("client_secret=sc-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "sc-access",
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "sc-refresh"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let token = client
            .exchange_code("auth-code", "https://gate.example.com/cb", "verifier-xyz")
            .await
            .unwrap();
        assert_eq!(token.access_token, "sc-access");
        assert_eq!(token.refresh_token.as_deref(), Some("sc-refresh"));
    }

    #[tokio::test]
    async fn test_failed_exchange_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth/token"))
            .respond_with(
                ResponseTemplate::new(401).set_body_string(r#"{"error":"invalid_grant"}"#),
            )
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let err = client
            .exchange_code("bad-code", "https://gate.example.com/cb", "verifier")
            .await
            .unwrap_err();
        match err {
            ProviderError::TokenExchange { status, body } => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_identity_uses_the_oauth_scheme() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/me"))
            .and(header("authorization", "OAuth sc-access"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": 42,
                "username": "dj_test"
            })))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let identity = client.fetch_identity("sc-access").await.unwrap();
        assert_eq!(identity.id, "42");
        assert_eq!(identity.username.as_deref(), Some("dj_test"));
    }

    #[tokio::test]
    async fn test_repost_completes_on_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reposts/tracks/soundcloud:tracks:123"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let action = SocialAction::Repost {
            track_urn: "soundcloud:tracks:123".to_string(),
        };
        let outcome = client.perform_action("sc-access", &action).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_already_reposted_counts_as_done() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reposts/tracks/soundcloud:tracks:123"))
            .respond_with(
                ResponseTemplate::new(422).set_body_string("Track already reposted by this user"),
            )
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let action = SocialAction::Repost {
            track_urn: "soundcloud:tracks:123".to_string(),
        };
        let outcome = client.perform_action("sc-access", &action).await.unwrap();
        assert_eq!(outcome, ActionOutcome::AlreadyDone);
    }

    #[tokio::test]
    async fn test_failure_statuses_classify_distinctly() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/reposts/tracks/soundcloud:tracks:401"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/reposts/tracks/soundcloud:tracks:403"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/reposts/tracks/soundcloud:tracks:404"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let repost = |urn: &str| SocialAction::Repost {
            track_urn: urn.to_string(),
        };

        let err = client
            .perform_action("t", &repost("soundcloud:tracks:401"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Action(ActionFailure::Unauthorized)
        ));

        let err = client
            .perform_action("t", &repost("soundcloud:tracks:403"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Action(ActionFailure::Forbidden)
        ));

        let err = client
            .perform_action("t", &repost("soundcloud:tracks:404"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProviderError::Action(ActionFailure::TargetNotFound)
        ));
    }

    #[tokio::test]
    async fn test_follow_then_verify_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/me/followings/soundcloud:users:7"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/followings/soundcloud:users:7"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/me/followings/soundcloud:users:8"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let followed = SocialAction::Follow {
            user_urn: "soundcloud:users:7".to_string(),
        };
        let not_followed = SocialAction::Follow {
            user_urn: "soundcloud:users:8".to_string(),
        };

        let outcome = client.perform_action("sc-access", &followed).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);

        assert!(client.verify_action("sc-access", &followed).await.unwrap());
        assert!(!client.verify_action("sc-access", &not_followed).await.unwrap());
    }

    #[tokio::test]
    async fn test_comment_posts_a_wrapped_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tracks/soundcloud:tracks:123/comments"))
            .and(body_string_contains(r#""body":"fire track""#))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let action = SocialAction::Comment {
            track_urn: "soundcloud:tracks:123".to_string(),
            body: "fire track".to_string(),
        };
        let outcome = client.perform_action("sc-access", &action).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
    }

    #[tokio::test]
    async fn test_purchase_link_update_targets_the_track() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/tracks/soundcloud:tracks:123"))
            .and(body_string_contains("purchase_url"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = mock_client(&server);
        let action = SocialAction::UpdatePurchaseLink {
            track_urn: "soundcloud:tracks:123".to_string(),
            url: "https://gate.example.com/gate/drop".to_string(),
        };
        let outcome = client.perform_action("sc-access", &action).await.unwrap();
        assert_eq!(outcome, ActionOutcome::Completed);
    }
}
