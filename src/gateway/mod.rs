// Authenticated request gateway
// Attaches credentials, recovers from expired sessions with a single-flight
// refresh, and reports unrecoverable sessions to the session owner.

mod coordinator;
mod pipeline;

pub use coordinator::{RefreshCoordinator, RefreshLease, RefreshWaiter, Ticket};
pub use pipeline::{Disposition, PendingRequest, Stage};

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{
    self, token_preview, CredentialPair, CredentialStore, SessionEvents, ACCESS_TOKEN_KEY,
    REFRESH_TOKEN_KEY,
};
use crate::config::Config;
use crate::error::{GatewayError, Result};

/// Library-level settings for building an [`ApiClient`]
#[derive(Clone, Debug)]
pub struct GatewayOptions {
    pub base_url: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub max_connections: usize,
    /// Case-insensitive marker identifying a deactivated account in 403 bodies
    pub deactivated_marker: String,
}

impl GatewayOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_connections: 10,
            deactivated_marker: "deactivated".to_string(),
        }
    }
}

impl From<&Config> for GatewayOptions {
    fn from(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            request_timeout: Duration::from_secs(config.http_request_timeout),
            connect_timeout: Duration::from_secs(config.http_connect_timeout),
            max_connections: config.http_max_connections,
            deactivated_marker: config.deactivated_marker.clone(),
        }
    }
}

/// HTTP client for the portfolio API with transparent session recovery
pub struct ApiClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Persisted credential pair
    store: Arc<dyn CredentialStore>,

    /// Refresh lock and waiter queue
    coordinator: RefreshCoordinator,

    /// Session-invalid subscriber slot
    events: SessionEvents,

    options: GatewayOptions,
}

impl ApiClient {
    pub fn new(options: GatewayOptions, store: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(options.max_connections)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .build()
            .map_err(|e| {
                GatewayError::Internal(anyhow::anyhow!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            store,
            coordinator: RefreshCoordinator::new(),
            events: SessionEvents::new(),
            options,
        })
    }

    /// Session-invalid notification registry
    pub fn events(&self) -> &SessionEvents {
        &self.events
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> String {
        auth::endpoint_url(&self.options.base_url, path)
    }

    /// Start a request against the API; send it with [`ApiClient::send`]
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build()?;
        self.execute(request).await
    }

    pub async fn get(&self, path: &str) -> Result<Response> {
        self.send(self.request(Method::GET, path)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.get(path).await?;
        response
            .json()
            .await
            .map_err(|e| GatewayError::InvalidResponse(format!("{}: {}", path, e)))
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    /// Run a request through the pipeline.
    /// A session-expired response is recovered at most once per request.
    pub async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        let mut pending = PendingRequest::new(request);
        let mut fresh_token: Option<String> = None;

        loop {
            let mut attempt = pending.attempt()?;
            // Snapshot before the store read so a refresh settling in between
            // is seen as newer than the token this attempt carries
            let seen = self.coordinator.generation();
            let sent_token = match fresh_token.take() {
                Some(token) => {
                    pipeline::set_bearer(&mut attempt, &token)?;
                    Some(token)
                }
                None => pipeline::attach_credential(self.store.as_ref(), &mut attempt).await?,
            };

            let error = match pipeline::dispatch(&self.client, attempt).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            match pipeline::classify(&error, pending.retried, &self.options.deactivated_marker) {
                Disposition::Propagate => return Err(error),
                Disposition::Terminal => {
                    tracing::warn!(
                        request_id = pending.id(),
                        request = %pending.describe(),
                        "Account deactivated, ending session"
                    );
                    self.invalidate_session().await;
                    return Err(error);
                }
                Disposition::Refresh => {
                    pending.retried = true;
                    tracing::info!(
                        stage = %Stage::Recover,
                        request_id = pending.id(),
                        request = %pending.describe(),
                        "Session expired, recovering"
                    );
                    fresh_token = Some(self.recover(error, seen, sent_token.as_deref()).await?);
                }
            }
        }
    }

    /// Obtain a token to retry with, joining or leading the refresh
    async fn recover(
        &self,
        original: GatewayError,
        seen: u64,
        sent_token: Option<&str>,
    ) -> Result<String> {
        match self.coordinator.join(seen, sent_token) {
            Ticket::Settled(Some(token)) => Ok(token),
            Ticket::Settled(None) => Err(original),
            Ticket::Waiter(waiter) => match waiter.wait().await {
                Some(token) => Ok(token),
                None => Err(original),
            },
            Ticket::Leader(lease) => match self.refresh_access_token().await {
                Ok(pair) => {
                    lease.resolve(&pair.access_token);
                    Ok(pair.access_token)
                }
                Err(e) => {
                    tracing::error!(stage = %Stage::Recover, error = %e, "Token refresh failed");
                    self.invalidate_session().await;
                    lease.reject();
                    Err(GatewayError::SessionEnded {
                        original: Box::new(original),
                        cause: Box::new(e),
                    })
                }
            },
        }
    }

    async fn current_access_token(&self) -> Option<String> {
        match self.store.get(ACCESS_TOKEN_KEY).await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!("Failed to read access token: {}", e);
                None
            }
        }
    }

    /// Leader path: read refresh token, call the refresh endpoint, persist
    async fn refresh_access_token(&self) -> Result<CredentialPair> {
        let refresh_token = self
            .store
            .get(REFRESH_TOKEN_KEY)
            .await?
            .filter(|token| !token.is_empty())
            .ok_or(GatewayError::MissingRefreshToken)?;

        let pair =
            auth::refresh_credentials(&self.client, &self.options.base_url, &refresh_token).await?;
        self.store.save_pair(&pair).await?;
        Ok(pair)
    }

    /// Wipe credentials and tell the session owner
    async fn invalidate_session(&self) {
        if let Err(e) = self.store.clear_pair().await {
            tracing::error!("Failed to clear stored credentials: {}", e);
        }
        self.events.notify();
    }

    /// Whether the stored token is accepted by the server.
    /// Any failure reports `false`; invalid tokens are already cleared by then.
    pub async fn is_authenticated(&self) -> bool {
        if self.current_access_token().await.is_none() {
            tracing::debug!("No access token stored");
            return false;
        }

        match self.get(auth::ME_PATH).await {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Token validation failed: {}", e);
                false
            }
        }
    }

    /// Authenticate and persist the issued credential pair
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let pair = auth::login(&self.client, &self.options.base_url, email, password).await?;
        self.store.save_pair(&pair).await?;
        tracing::info!(
            access_token = %token_preview(&pair.access_token),
            "Login successful"
        );
        Ok(())
    }

    /// Forget the stored credentials; the caller owns the session transition
    pub async fn logout(&self) -> Result<()> {
        self.store.clear_pair().await?;
        tracing::info!("Logged out");
        Ok(())
    }
}
