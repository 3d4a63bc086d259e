use async_trait::async_trait;
use tracing::debug;

use super::{ApiClient, ApiError};
use crate::models::TokenSet;

/// The OAuth2 token endpoint.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    /// Trade an authorization code for tokens (`grant_type=authorization_code`).
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, ApiError>;

    /// Mint a new access token (`grant_type=refresh_token`).
    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ApiError>;
}

/// Token endpoint client holding the OAuth application's credentials.
#[derive(Clone)]
pub struct OAuthClient {
    api: ApiClient,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(api: ApiClient, client_id: &str, client_secret: &str) -> Self {
        Self {
            api,
            client_id: client_id.trim().to_string(),
            client_secret: client_secret.trim().to_string(),
        }
    }

    async fn grant(&self, params: &[(&str, &str)]) -> Result<TokenSet, ApiError> {
        let mut form: Vec<(&str, &str)> = vec![
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        form.extend_from_slice(params);

        let request = self
            .api
            .http()
            .post(&self.api.endpoints().token_url)
            .form(&form);
        let tokens: TokenSet = ApiClient::send_json(request, "token response").await?;

        if tokens.access_token.trim().is_empty() {
            return Err(ApiError::InvalidResponse(
                "Token response did not include an access token".to_string(),
            ));
        }
        Ok(tokens)
    }
}

#[async_trait]
impl TokenEndpoint for OAuthClient {
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet, ApiError> {
        debug!("Exchanging authorization code");
        self.grant(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ApiError> {
        debug!("Refreshing access token");
        self.grant(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Endpoints;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client_for(server: &MockServer) -> OAuthClient {
        let api = ApiClient::new(Endpoints::with_base(&server.uri())).expect("client");
        OAuthClient::new(api, "my-client", "my-secret")
    }

    #[tokio::test]
    async fn test_exchange_code_posts_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/oauth2/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code=the-code"))
            .and(body_string_contains("client_id=my-client"))
            .and(body_string_contains("client_secret=my-secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-1",
                "refresh_token": "rt-1",
                "token_type": "bearer",
                "expires_in": 1209600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .await
            .exchange_code("the-code", "http://localhost:8484/oauth/callback")
            .await
            .expect("exchange");
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(tokens.refresh_token(), Some("rt-1"));
    }

    #[tokio::test]
    async fn test_refresh_posts_refresh_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/oauth2/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-2",
                "expires_in": 60
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tokens = client_for(&server)
            .await
            .refresh("rt-old")
            .await
            .expect("refresh");
        assert_eq!(tokens.access_token, "at-2");
        assert_eq!(tokens.refresh_token(), None);
    }

    #[tokio::test]
    async fn test_rejected_grant_carries_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/oauth2/token"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":"invalid_grant"}"#))
            .mount(&server)
            .await;

        let err = client_for(&server).await.refresh("rt").await.unwrap_err();
        assert_eq!(err.status(), Some(400));
        assert!(err.to_string().contains("invalid_grant"));
    }
}
