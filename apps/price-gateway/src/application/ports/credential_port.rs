//! Credential Port (Driven Port)
//!
//! Interface for obtaining fresh broker credentials after the broker
//! rejected the current ones.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::quote::Credentials;

/// Errors from a credential refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefreshError {
    /// No service account is configured.
    #[error("credential refresh is not configured")]
    NotConfigured,

    /// The auth service rejected the request or was unreachable.
    #[error("auth service error (status {status:?}): {body}")]
    AuthService {
        /// HTTP status, if a response was received.
        status: Option<u16>,
        /// Response body or transport error text.
        body: String,
    },

    /// The auth service answered without usable credentials.
    #[error("invalid auth response: {0}")]
    InvalidResponse(String),
}

/// Source of fresh broker credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a new investor token and id.
    ///
    /// # Errors
    ///
    /// Returns [`RefreshError`] if no credentials could be obtained.
    async fn refresh(&self) -> Result<Credentials, RefreshError>;
}
