// Request pipeline stages
//
// Every gateway request runs attach-credential → dispatch → classify, then
// the gateway either recovers (refresh and retry) or propagates. Raw auth
// calls in `auth::refresh` never enter this pipeline.

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Client, Request, Response, StatusCode};
use std::fmt;

use crate::auth::{CredentialStore, ACCESS_TOKEN_KEY};
use crate::error::{GatewayError, Result};

/// Named pipeline stage, recorded on log events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AttachCredential,
    Dispatch,
    Classify,
    Recover,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::AttachCredential => "attach-credential",
            Stage::Dispatch => "dispatch",
            Stage::Classify => "classify",
            Stage::Recover => "recover",
        };
        f.write_str(name)
    }
}

/// What the gateway does with a failed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Account deactivated: wipe credentials, notify, surface the error
    Terminal,
    /// Session expired on a first attempt: run the refresh protocol
    Refresh,
    /// Surface the error unchanged
    Propagate,
}

/// An outbound call plus its retry marker
pub struct PendingRequest {
    template: Request,
    id: String,
    pub retried: bool,
}

impl PendingRequest {
    pub fn new(request: Request) -> Self {
        Self {
            template: request,
            id: uuid::Uuid::new_v4().to_string()[..8].to_string(),
            retried: false,
        }
    }

    /// Short id correlating log lines of one request
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fresh copy of the request for the next attempt
    pub fn attempt(&self) -> Result<Request> {
        self.template.try_clone().ok_or_else(|| {
            GatewayError::Internal(anyhow::anyhow!("Request body is not cloneable"))
        })
    }

    pub fn describe(&self) -> String {
        format!("{} {}", self.template.method(), self.template.url())
    }
}

/// Stage 1: attach the stored access token, if any.
/// Returns the token that was attached.
pub async fn attach_credential(
    store: &dyn CredentialStore,
    request: &mut Request,
) -> Result<Option<String>> {
    let token = store.get(ACCESS_TOKEN_KEY).await?;
    match token {
        Some(ref token) => set_bearer(request, token)?,
        None => tracing::debug!(
            stage = %Stage::AttachCredential,
            "No access token stored, sending unauthenticated"
        ),
    }
    Ok(token)
}

/// Replace the Authorization header with a bearer token
pub fn set_bearer(request: &mut Request, token: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
        GatewayError::Internal(anyhow::anyhow!("Access token is not a valid header: {}", e))
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

/// Stage 2: send the request; non-success statuses become `GatewayError::Status`
pub async fn dispatch(client: &Client, request: Request) -> Result<Response> {
    let method = request.method().clone();
    let url = request.url().clone();

    let response = client.execute(request).await.map_err(|e| {
        let error_kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_decode() {
            "decode_error"
        } else {
            "request_error"
        };
        tracing::warn!(
            stage = %Stage::Dispatch,
            error_kind = error_kind,
            error = %e,
            method = %method,
            url = %url,
            "HTTP request error"
        );
        GatewayError::Transport(e)
    })?;

    let status = response.status();
    if status.is_success() {
        tracing::debug!(stage = %Stage::Dispatch, status = %status, url = %url, "Request successful");
        return Ok(response);
    }

    let body = read_error_body(response).await;
    tracing::debug!(
        stage = %Stage::Dispatch,
        status = status.as_u16(),
        method = %method,
        url = %url,
        "Received error response"
    );
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Body of an error response; a failed read yields an empty body
async fn read_error_body(response: Response) -> String {
    let url = response.url().clone();
    match response.text().await {
        Ok(body) => body,
        Err(e) => {
            tracing::debug!(
                stage = %Stage::Dispatch,
                url = %url,
                error = %e,
                "Failed to read error response body"
            );
            String::new()
        }
    }
}

/// Stage 3: decide how to handle a failed attempt
pub fn classify(error: &GatewayError, retried: bool, deactivated_marker: &str) -> Disposition {
    let disposition = match error {
        GatewayError::Status { status, body }
            if *status == StatusCode::FORBIDDEN.as_u16()
                && is_deactivated(body, deactivated_marker) =>
        {
            Disposition::Terminal
        }
        GatewayError::Status { status, .. }
            if *status == StatusCode::UNAUTHORIZED.as_u16() && !retried =>
        {
            Disposition::Refresh
        }
        _ => Disposition::Propagate,
    };
    tracing::debug!(stage = %Stage::Classify, ?disposition, retried, "Classified failure");
    disposition
}

fn is_deactivated(body: &str, marker: &str) -> bool {
    !marker.is_empty() && body.to_lowercase().contains(&marker.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{CredentialPair, MemoryCredentialStore};
    use std::io::Write;

    fn status(status: u16, body: &str) -> GatewayError {
        GatewayError::Status {
            status,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_classify_unauthorized() {
        assert_eq!(
            classify(&status(401, ""), false, "deactivated"),
            Disposition::Refresh
        );
        assert_eq!(
            classify(&status(401, ""), true, "deactivated"),
            Disposition::Propagate
        );
    }

    #[test]
    fn test_classify_deactivated_ignores_retry_state() {
        let err = status(403, r#"{"message":"Account has been Deactivated"}"#);
        assert_eq!(classify(&err, false, "deactivated"), Disposition::Terminal);
        assert_eq!(classify(&err, true, "deactivated"), Disposition::Terminal);
    }

    #[test]
    fn test_classify_passes_other_failures() {
        assert_eq!(
            classify(&status(403, "insufficient role"), false, "deactivated"),
            Disposition::Propagate
        );
        assert_eq!(
            classify(&status(500, "deactivated"), false, "deactivated"),
            Disposition::Propagate
        );
        assert_eq!(
            classify(&GatewayError::MissingRefreshToken, false, "deactivated"),
            Disposition::Propagate
        );
        // Empty marker disables deactivation detection
        assert_eq!(
            classify(&status(403, "deactivated"), false, ""),
            Disposition::Propagate
        );
    }

    #[tokio::test]
    async fn test_attach_credential() {
        let client = Client::new();
        let store = MemoryCredentialStore::with_pair(&CredentialPair::new("T1", "R1"));

        let mut request = client.get("http://localhost/x").build().unwrap();
        let attached = attach_credential(&store, &mut request).await.unwrap();
        assert_eq!(attached.as_deref(), Some("T1"));
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer T1");

        let empty = MemoryCredentialStore::new();
        let mut request = client.get("http://localhost/x").build().unwrap();
        assert_eq!(attach_credential(&empty, &mut request).await.unwrap(), None);
        assert!(request.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_set_bearer_replaces_header() {
        let client = Client::new();
        let mut request = client
            .get("http://localhost/x")
            .header(AUTHORIZATION, "Bearer T1")
            .build()
            .unwrap();
        set_bearer(&mut request, "T2").unwrap();
        assert_eq!(request.headers()[AUTHORIZATION], "Bearer T2");
        assert_eq!(request.headers().get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_pending_request_clones_template() {
        let client = Client::new();
        let request = client
            .post("http://localhost/x")
            .body("payload")
            .build()
            .unwrap();
        let pending = PendingRequest::new(request);
        assert!(!pending.retried);
        assert_eq!(pending.id().len(), 8);
        assert_eq!(pending.describe(), "POST http://localhost/x");
        let first = pending.attempt().unwrap();
        let second = pending.attempt().unwrap();
        assert_eq!(first.url(), second.url());
    }

    #[tokio::test]
    async fn test_dispatch_keeps_status_when_body_breaks() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/client/portfolio")
            .with_status(403)
            .with_chunked_body(|w| {
                w.write_all(b"account deac")?;
                std::thread::sleep(std::time::Duration::from_millis(50));
                Err(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "stream cut",
                ))
            })
            .create_async()
            .await;

        let client = Client::new();
        let request = client
            .get(format!("{}/client/portfolio", server.url()))
            .build()
            .unwrap();
        match dispatch(&client, request).await {
            Err(GatewayError::Status { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.is_empty());
            }
            other => panic!("unexpected outcome: {:?}", other.map(|r| r.status())),
        }
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::AttachCredential.to_string(), "attach-credential");
        assert_eq!(Stage::Recover.to_string(), "recover");
    }
}
