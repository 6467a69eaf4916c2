use std::time::{Duration, Instant};

use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::reqwest::async_http_client;
use oauth2::{AuthUrl, ClientId, ClientSecret, RequestTokenError, Scope, TokenResponse, TokenUrl};
use parking_lot::RwLock;

use crate::{PipelineError, PipelineResult};

/// Tokens this close to expiry are refreshed before use.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Bearer credential for the workflow engine and result store
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: Option<Instant>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: None,
        }
    }

    pub fn expiring_in(mut self, lifetime: Duration) -> Self {
        self.expires_at = Some(Instant::now() + lifetime);
        self
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn is_fresh(&self) -> bool {
        self.expires_at
            .map_or(true, |at| Instant::now() + EXPIRY_SKEW < at)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of service credentials
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> PipelineResult<AccessToken>;
}

/// Hands out one fixed token. Development and tests.
pub struct StaticTokenProvider {
    token: AccessToken,
}

impl StaticTokenProvider {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            token: AccessToken::new(secret),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self) -> PipelineResult<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Settings for the OAuth2 client-credentials grant
#[derive(Debug, Clone)]
pub struct ClientCredentialsConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

/// OAuth2 client-credentials provider with an expiry-aware cache
pub struct ClientCredentialsTokenProvider {
    client: BasicClient,
    scopes: Vec<String>,
    cached: RwLock<Option<AccessToken>>,
}

impl ClientCredentialsTokenProvider {
    pub fn new(config: ClientCredentialsConfig) -> PipelineResult<Self> {
        let invalid_url = |e: oauth2::url::ParseError| {
            PipelineError::invalid(format!("invalid token url {}: {e}", config.token_url))
        };

        // The grant never visits the authorization endpoint; oauth2 still wants one.
        let client = BasicClient::new(
            ClientId::new(config.client_id.clone()),
            Some(ClientSecret::new(config.client_secret.clone())),
            AuthUrl::new(config.token_url.clone()).map_err(invalid_url)?,
            Some(TokenUrl::new(config.token_url.clone()).map_err(invalid_url)?),
        );

        Ok(Self {
            client,
            scopes: config.scopes,
            cached: RwLock::new(None),
        })
    }

    async fn fetch(&self) -> PipelineResult<AccessToken> {
        let mut request = self.client.exchange_client_credentials();
        for scope in &self.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let response = request
            .request_async(async_http_client)
            .await
            .map_err(|err| match err {
                RequestTokenError::Request(e) => {
                    PipelineError::unavailable(format!("token endpoint unreachable: {e}"))
                }
                RequestTokenError::ServerResponse(resp) => {
                    PipelineError::credential(format!("token request rejected: {resp}"))
                }
                other => PipelineError::credential(other.to_string()),
            })?;

        let token = AccessToken::new(response.access_token().secret().clone());
        Ok(match response.expires_in() {
            Some(lifetime) => token.expiring_in(lifetime),
            None => token,
        })
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsTokenProvider {
    async fn token(&self) -> PipelineResult<AccessToken> {
        let cached = self.cached.read().clone().filter(AccessToken::is_fresh);
        if let Some(token) = cached {
            return Ok(token);
        }

        let token = self.fetch().await?;
        tracing::debug!(expires_at = ?token.expires_at, "service token refreshed");
        *self.cached.write() = Some(token.clone());
        Ok(token)
    }
}
