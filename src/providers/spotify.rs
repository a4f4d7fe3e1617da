//! Spotify client: the connect step's token exchange and identity fetch,
//! plus the optional library save.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    settle_action, truncate_body, AccessToken, ActionFailure, ActionOutcome, ProviderAuthConfig,
    ProviderClient, ProviderError, ProviderIdentity, ProviderKind, SocialAction,
};

const AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE_URL: &str = "https://api.spotify.com";

#[derive(Debug)]
pub struct SpotifyClient {
    config: ProviderAuthConfig,
    http: reqwest::Client,
}

// GET /v1/me payload.
#[derive(Debug, Deserialize)]
struct MeResponse {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
}

impl SpotifyClient {
    /// Configuration pointing at the real Spotify endpoints.
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

    fn auth_header(&self, access_token: &str) -> String {
        format!("Bearer {}", access_token)
    }
}

#[async_trait]
impl ProviderClient for SpotifyClient {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Spotify
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
                "Spotify token exchange failed"
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
            "Spotify token exchange succeeded"
        );
        Ok(token)
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ProviderIdentity, ProviderError> {
        let response = self
            .http
            .get(format!("{}/v1/me", self.config.api_base_url))
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
            id: me.id,
            username: me.display_name,
        })
    }

    async fn perform_action(
        &self,
        access_token: &str,
        action: &SocialAction,
    ) -> Result<ActionOutcome, ProviderError> {
        let request = match action {
            SocialAction::SaveTrack { track_id } => self.http.put(format!(
                "{}/v1/me/tracks?ids={}",
                self.config.api_base_url,
                urlencoding::encode(track_id)
            )),
            _ => {
                return Err(ProviderError::UnsupportedAction {
                    provider: "spotify",
                    action: action.describe(),
                })
            }
        };

        let response = request
            .header(AUTHORIZATION, self.auth_header(access_token))
            .send()
            .await?;

        settle_action("spotify", action, response).await
    }

    async fn verify_action(
        &self,
        access_token: &str,
        action: &SocialAction,
    ) -> Result<bool, ProviderError> {
        match action {
            // /v1/me/tracks/contains answers [bool] per requested id.
            SocialAction::SaveTrack { track_id } => {
                let response = self
                    .http
                    .get(format!(
                        "{}/v1/me/tracks/contains?ids={}",
                        self.config.api_base_url,
                        urlencoding::encode(track_id)
                    ))
                    .header(AUTHORIZATION, self.auth_header(access_token))
                    .send()
                    .await?;

                let status = response.status();
                if status.as_u16() == 401 {
                    return Err(ProviderError::Action(ActionFailure::Unauthorized));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProviderError::Action(ActionFailure::Generic {
                        status: status.as_u16(),
                        body: truncate_body(&body),
                    }));
                }

                let contains: Vec<bool> = response.json().await?;
                Ok(contains.first().copied().unwrap_or(false))
            }
            _ => Ok(false),
        }
    }
}
