//! DNSE token refresher.
//!
//! Exchanges the configured account username/password for a fresh investor
//! token via the DNSE auth endpoint and stores the token on the target
//! account. One HTTP call per refresh; retrying is the session's job.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::application::ports::{AccountRepository, CredentialProvider, RefreshError};
use crate::domain::quote::Credentials;
use crate::infrastructure::config::{AccountSecret, AuthSettings};
use crate::infrastructure::metrics::{self, RefreshResult};

/// Refresher settings.
#[derive(Debug, Clone)]
pub struct DnseRefresherConfig {
    /// Auth endpoint URL.
    pub url: String,
    /// Account secret; without one every refresh fails with `NotConfigured`.
    pub account: Option<AccountSecret>,
    /// Account record that receives refreshed tokens.
    pub target_user_id: Option<String>,
    /// HTTP request timeout.
    pub timeout: Duration,
}

impl From<&AuthSettings> for DnseRefresherConfig {
    fn from(settings: &AuthSettings) -> Self {
        Self {
            url: settings.url.clone(),
            account: settings.account.clone(),
            target_user_id: settings.target_user_id.clone(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Serialize)]
struct AuthRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthResponse {
    token: Option<String>,
    investor_id: Option<serde_json::Value>,
}

/// `CredentialProvider` backed by the DNSE auth API.
pub struct DnseCredentialRefresher {
    client: Client,
    config: DnseRefresherConfig,
    accounts: Arc<dyn AccountRepository>,
}

impl DnseCredentialRefresher {
    /// Create a new refresher.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        config: DnseRefresherConfig,
        accounts: Arc<dyn AccountRepository>,
    ) -> Result<Self, RefreshError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| RefreshError::AuthService {
                status: None,
                body: e.to_string(),
            })?;

        Ok(Self {
            client,
            config,
            accounts,
        })
    }

    /// Whether an account secret is configured.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.config.account.is_some()
    }

    async fn request_credentials(&self) -> Result<Credentials, RefreshError> {
        let account = self
            .config
            .account
            .as_ref()
            .ok_or(RefreshError::NotConfigured)?;

        tracing::info!(url = %self.config.url, "Refreshing DNSE token");

        let response = self
            .client
            .post(&self.config.url)
            .json(&AuthRequest {
                username: account.username(),
                password: account.password(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::AuthService {
                status: None,
                body: e.to_string(),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RefreshError::AuthService {
                status: Some(status.as_u16()),
                body: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(RefreshError::AuthService {
                status: Some(status.as_u16()),
                body,
            });
        }

        let parsed: AuthResponse =
            serde_json::from_str(&body).map_err(|e| RefreshError::InvalidResponse(e.to_string()))?;

        let token = parsed
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::InvalidResponse("missing token".to_string()))?;
        let investor_id = parsed
            .investor_id
            .and_then(|id| match id {
                serde_json::Value::String(s) if !s.is_empty() => Some(s),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| RefreshError::InvalidResponse("missing investorId".to_string()))?;

        Ok(Credentials::new(token, investor_id))
    }

    /// Store the token on the target account; failures are only logged.
    async fn persist_token(&self, token: &str) {
        let Some(account_id) = self.config.target_user_id.as_deref() else {
            tracing::warn!("TARGET_USER_ID not set, refreshed token not stored");
            return;
        };

        match self.accounts.update_token(account_id, token).await {
            Ok(true) => tracing::info!(account_id, "Stored refreshed token"),
            Ok(false) => tracing::warn!(account_id, "Target account not found"),
            Err(e) => tracing::error!(account_id, error = %e, "Failed to store refreshed token"),
        }
    }
}

impl std::fmt::Debug for DnseCredentialRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnseCredentialRefresher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CredentialProvider for DnseCredentialRefresher {
    async fn refresh(&self) -> Result<Credentials, RefreshError> {
        match self.request_credentials().await {
            Ok(credentials) => {
                metrics::record_token_refresh(RefreshResult::Success);
                tracing::info!(
                    investor_id = %credentials.investor_id(),
                    "Obtained new DNSE token"
                );
                self.persist_token(credentials.investor_token()).await;
                Ok(credentials)
            }
            Err(e) => {
                metrics::record_token_refresh(RefreshResult::Failure);
                tracing::error!(error = %e, "DNSE token refresh failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::StoreError;
    use crate::infrastructure::persistence::InMemoryAccountRepository;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct UnavailableAccountRepository;

    #[async_trait]
    impl AccountRepository for UnavailableAccountRepository {
        async fn update_token(&self, _account_id: &str, _token: &str) -> Result<bool, StoreError> {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }

    fn config(url: String, target: Option<&str>) -> DnseRefresherConfig {
        DnseRefresherConfig {
            url,
            account: Some(AccountSecret::new("user".to_string(), "pass".to_string())),
            target_user_id: target.map(str::to_string),
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn refresh_posts_account_and_stores_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth"))
            .and(body_json(json!({"username": "user", "password": "pass"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "investorId": "i2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let accounts = Arc::new(InMemoryAccountRepository::new());
        accounts.seed("u1", "t1");
        let refresher = DnseCredentialRefresher::new(
            config(format!("{}/auth", server.uri()), Some("u1")),
            accounts.clone(),
        )
        .unwrap();

        let credentials = refresher.refresh().await.unwrap();

        assert_eq!(credentials, Credentials::new("t2", "i2"));
        assert_eq!(accounts.token("u1"), Some("t2".to_string()));
    }

    #[tokio::test]
    async fn numeric_investor_id_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "investorId": 1234})),
            )
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            config(server.uri(), None),
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        let credentials = refresher.refresh().await.unwrap();
        assert_eq!(credentials.investor_id(), "1234");
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad password"))
            .expect(1)
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            config(server.uri(), None),
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        assert_eq!(
            refresher.refresh().await.unwrap_err(),
            RefreshError::AuthService {
                status: Some(401),
                body: "bad password".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn missing_token_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"investorId": "i2"})))
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            config(server.uri(), None),
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        assert!(matches!(
            refresher.refresh().await,
            Err(RefreshError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn missing_investor_id_is_invalid() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "t2"})))
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            config(server.uri(), None),
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        assert!(matches!(
            refresher.refresh().await,
            Err(RefreshError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn missing_account_record_does_not_fail_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "investorId": "i2"})),
            )
            .mount(&server)
            .await;

        let accounts = Arc::new(InMemoryAccountRepository::new());
        let refresher =
            DnseCredentialRefresher::new(config(server.uri(), Some("missing")), accounts.clone())
                .unwrap();

        assert!(refresher.refresh().await.is_ok());
        assert_eq!(accounts.token("missing"), None);
    }

    #[tokio::test]
    async fn store_error_does_not_fail_refresh() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"token": "t2", "investorId": "i2"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            config(server.uri(), Some("u1")),
            Arc::new(UnavailableAccountRepository),
        )
        .unwrap();

        let credentials = refresher.refresh().await.unwrap();
        assert_eq!(credentials, Credentials::new("t2", "i2"));
    }

    #[tokio::test]
    async fn unconfigured_refresher_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let refresher = DnseCredentialRefresher::new(
            DnseRefresherConfig {
                account: None,
                ..config(server.uri(), None)
            },
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        assert!(!refresher.is_enabled());
        assert_eq!(
            refresher.refresh().await.unwrap_err(),
            RefreshError::NotConfigured
        );
    }

    #[tokio::test]
    async fn unreachable_endpoint_has_no_status() {
        let refresher = DnseCredentialRefresher::new(
            config("http://127.0.0.1:1/auth".to_string(), None),
            Arc::new(InMemoryAccountRepository::new()),
        )
        .unwrap();

        assert!(matches!(
            refresher.refresh().await,
            Err(RefreshError::AuthService { status: None, .. })
        ));
    }
}
