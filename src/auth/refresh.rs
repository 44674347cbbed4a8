// Raw auth endpoint calls
// These use the bare HTTP client and never pass through the request pipeline

use reqwest::Client;

use super::types::{token_preview, CredentialPair, LoginRequest, RefreshRequest, TokenResponse};
use crate::error::{GatewayError, Result};

pub const REFRESH_PATH: &str = "/client/auth/refresh";
pub const LOGIN_PATH: &str = "/client/auth/login";
pub const ME_PATH: &str = "/client/auth/me";

/// Join the API base URL and an absolute endpoint path
pub fn endpoint_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Exchange a refresh token for a new credential pair
pub async fn refresh_credentials(
    client: &Client,
    base_url: &str,
    refresh_token: &str,
) -> Result<CredentialPair> {
    let url = endpoint_url(base_url, REFRESH_PATH);
    tracing::info!(url = %url, "Refreshing access token...");

    let response = client
        .post(&url)
        .json(&RefreshRequest { refresh_token })
        .send()
        .await
        .map_err(|e| {
            let kind = if e.is_timeout() { "timeout" } else { "transport" };
            GatewayError::RefreshFailed(format!("{} error: {}", kind, e))
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Refresh endpoint rejected the refresh token"
        );
        return Err(GatewayError::RefreshFailed(format!(
            "{} - {}",
            status, error_text
        )));
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| GatewayError::RefreshFailed(format!("unreadable refresh response: {}", e)))?;

    let pair = into_pair(data).map_err(|e| GatewayError::RefreshFailed(e.to_string()))?;
    tracing::info!(
        access_token = %token_preview(&pair.access_token),
        "Token refreshed"
    );
    Ok(pair)
}

/// Authenticate with email and password
pub async fn login(
    client: &Client,
    base_url: &str,
    email: &str,
    password: &str,
) -> Result<CredentialPair> {
    let url = endpoint_url(base_url, LOGIN_PATH);
    tracing::info!(url = %url, "Logging in...");

    let response = client
        .post(&url)
        .json(&LoginRequest { email, password })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = status.as_u16(), "Login rejected");
        return Err(GatewayError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let data: TokenResponse = response
        .json()
        .await
        .map_err(|e| GatewayError::InvalidResponse(format!("unreadable login response: {}", e)))?;

    into_pair(data)
}

fn into_pair(data: TokenResponse) -> Result<CredentialPair> {
    if data.access_token.is_empty() {
        return Err(GatewayError::InvalidResponse(
            "response does not contain access_token".to_string(),
        ));
    }
    if data.refresh_token.is_empty() {
        return Err(GatewayError::InvalidResponse(
            "response does not contain refresh_token".to_string(),
        ));
    }
    Ok(CredentialPair::new(data.access_token, data.refresh_token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[test]
    fn test_endpoint_url_joins_slashes() {
        assert_eq!(
            endpoint_url("https://api.example.com/", "/client/auth/me"),
            "https://api.example.com/client/auth/me"
        );
        assert_eq!(
            endpoint_url("https://api.example.com/v2", "client/auth/me"),
            "https://api.example.com/v2/client/auth/me"
        );
    }

    #[tokio::test]
    async fn test_refresh_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", REFRESH_PATH)
            .match_body(Matcher::Json(serde_json::json!({ "refresh_token": "R1" })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"T2","refresh_token":"R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let pair = refresh_credentials(&Client::new(), &server.url(), "R1")
            .await
            .unwrap();
        assert_eq!(pair, CredentialPair::new("T2", "R2"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", REFRESH_PATH)
            .with_status(401)
            .with_body("refresh token expired")
            .create_async()
            .await;

        let err = refresh_credentials(&Client::new(), &server.url(), "R1")
            .await
            .unwrap_err();
        match err {
            GatewayError::RefreshFailed(msg) => assert!(msg.contains("refresh token expired")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_refresh_empty_token_is_failure() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", REFRESH_PATH)
            .with_status(200)
            .with_body(r#"{"access_token":"","refresh_token":"R2"}"#)
            .create_async()
            .await;

        let err = refresh_credentials(&Client::new(), &server.url(), "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RefreshFailed(_)));
    }

    #[tokio::test]
    async fn test_login_rejected_keeps_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", LOGIN_PATH)
            .with_status(400)
            .with_body("invalid credentials")
            .create_async()
            .await;

        let err = login(&Client::new(), &server.url(), "a@b.c", "nope")
            .await
            .unwrap_err();
        assert_eq!(err.body(), Some("invalid credentials"));
        assert_eq!(err.status(), Some(reqwest::StatusCode::BAD_REQUEST));
    }
}
