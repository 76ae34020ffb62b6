use async_trait::async_trait;
use serde::Deserialize;

/// Result of a successful refresh-token exchange.
///
/// `new_refresh_token` is `Some` only for rotating providers — Google Drive issues a
/// fresh refresh token on every exchange and invalidates the old one, so
/// the caller must persist it before the next refresh or the connection
/// is bricked. Non-rotating providers (Asana, Atlassian, HubSpot,
/// Outlook) leave this `None` and the caller keeps reusing the refresh
/// token it already has.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_in_secs: Option<u64>,
    pub new_refresh_token: Option<String>,
}

/// Per-source OAuth2 refresh exchange. Each source that uses OAuth
/// (Asana, Jira/Confluence via Atlassian, HubSpot, Outlook, GitHub App
/// installations, Google Drive) implements this against its own token
/// endpoint and client credentials.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<RefreshedToken>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
    refresh_token: Option<String>,
}

/// A standard OAuth2 `grant_type=refresh_token` exchange against a form-
/// encoded token endpoint, which covers Asana, Atlassian, HubSpot, and
/// Outlook/Microsoft Identity Platform — they differ only in endpoint URL
/// and client credentials. `rotates_refresh_token` mirrors
/// `weave_sources::registry::OAuthSemantics::WithRotatingRefresh`: when
/// true (Google Drive), a `refresh_token` present in the response is
/// surfaced as `RefreshedToken::new_refresh_token` for the caller to
/// persist; when false, it's ignored even if the provider happens to
/// echo one back.
pub struct StandardOAuthProvider {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    rotates_refresh_token: bool,
}

impl StandardOAuthProvider {
    pub fn new(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            rotates_refresh_token: false,
        }
    }

    /// Builder variant for rotating providers (Google Drive).
    pub fn rotating(token_url: impl Into<String>, client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            rotates_refresh_token: true,
            ..Self::new(token_url, client_id, client_secret)
        }
    }
}

#[async_trait]
impl OAuthProvider for StandardOAuthProvider {
    async fn refresh(&self, refresh_token: &str) -> anyhow::Result<RefreshedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        let resp = self.client.post(&self.token_url).form(&params).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("token refresh failed with status {status}: {body}");
        }

        let parsed: TokenResponse = resp.json().await?;
        Ok(RefreshedToken {
            access_token: parsed.access_token,
            expires_in_secs: parsed.expires_in,
            new_refresh_token: if self.rotates_refresh_token {
                parsed.refresh_token
            } else {
                None
            },
        })
    }
}
