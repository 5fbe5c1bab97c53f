//! Subscription Session Types
//!
//! States, failure taxonomy and tagged outcomes for one-shot price
//! subscription sessions.
//!
//! # Lifecycle
//!
//! ```text
//! Init → Connecting → Subscribing → AwaitingData → Delivered
//!            │             │              │
//!            └─────────────┴──────────────┴──► TimedOut | Errored
//!                                          └──► AuthRetrying → (successor) | AuthFailed
//! ```
//!
//! A lineage is the original attempt plus at most one auth-triggered retry.

use thiserror::Error;

use super::quote::Credentials;

// =============================================================================
// Auth Signatures
// =============================================================================

/// Substrings that mark a broker error as a credential failure.
pub const AUTH_SIGNATURES: &[&str] = &[
    "Bad User Name or Password",
    "Not authorized",
    "Authentication failed",
];

/// Check whether a broker error message matches a known auth-failure signature.
#[must_use]
pub fn is_auth_failure(message: &str) -> bool {
    AUTH_SIGNATURES.iter().any(|sig| message.contains(sig))
}

// =============================================================================
// Session State
// =============================================================================

/// Current state of a subscription session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Created, no connection yet.
    #[default]
    Init,
    /// Connection opened, awaiting CONNACK.
    Connecting,
    /// SUBSCRIBE sent, awaiting SUBACK.
    Subscribing,
    /// Subscribed, awaiting the first data message.
    AwaitingData,
    /// A price update was forwarded.
    Delivered,
    /// A deadline elapsed before delivery.
    TimedOut,
    /// Auth failed and a credential refresh is in progress.
    AuthRetrying,
    /// Auth failed and no further retry is possible.
    AuthFailed,
    /// Any other failure.
    Errored,
    /// The owning client went away.
    Cancelled,
}

impl SessionState {
    /// Whether the session can make no further progress.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Delivered | Self::TimedOut | Self::AuthFailed | Self::Errored | Self::Cancelled
        )
    }

    /// Lowercase name for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::AwaitingData => "awaiting_data",
            Self::Delivered => "delivered",
            Self::TimedOut => "timed_out",
            Self::AuthRetrying => "auth_retrying",
            Self::AuthFailed => "auth_failed",
            Self::Errored => "errored",
            Self::Cancelled => "cancelled",
        }
    }
}

// =============================================================================
// Failures
// =============================================================================

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// No SUBACK within the subscribe-ack deadline.
    SubscribeAck,
    /// Subscribed, but no data within the data-wait deadline.
    Data,
}

/// Errors that end a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Connection-level failure not matching an auth signature.
    #[error("{0}")]
    Transport(String),

    /// Connection-level failure matching an auth signature.
    #[error("authentication rejected: {0}")]
    AuthSignature(String),

    /// Broker rejected the subscription.
    #[error("{0}")]
    SubscribeRejected(String),

    /// No SUBACK in time.
    #[error("Subscribe timeout")]
    AckTimeout,

    /// No data in time.
    #[error("No data received for stock")]
    DataTimeout,

    /// First data message could not be parsed.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Credential refresh failed after an auth rejection.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),
}

impl SessionError {
    /// Classify a raw connection error message.
    #[must_use]
    pub fn from_connection_error(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_auth_failure(&message) {
            Self::AuthSignature(message)
        } else {
            Self::Transport(message)
        }
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// Tagged result of one session attempt, consumed by the lineage driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A price update was forwarded.
    Delivered,
    /// A deadline elapsed.
    TimedOut(TimeoutKind),
    /// Authentication failed for good.
    AuthFailed(SessionError),
    /// Any other terminal failure.
    Errored(SessionError),
    /// Credentials were refreshed; start a successor attempt with them.
    RetryWith(Credentials),
    /// The owning client went away.
    Cancelled,
}

impl SessionOutcome {
    /// Whether this outcome counts as a successful fetch.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }

    /// The session state this outcome leaves the attempt in.
    #[must_use]
    pub const fn final_state(&self) -> SessionState {
        match self {
            Self::Delivered => SessionState::Delivered,
            Self::TimedOut(_) => SessionState::TimedOut,
            Self::AuthFailed(_) => SessionState::AuthFailed,
            Self::Errored(_) => SessionState::Errored,
            Self::RetryWith(_) => SessionState::AuthRetrying,
            Self::Cancelled => SessionState::Cancelled,
        }
    }

    /// Label used for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.final_state().as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Connection refused: Bad User Name or Password" => true; "bad credentials")]
    #[test_case("Connection refused: Not authorized" => true; "not authorized")]
    #[test_case("Authentication failed" => true; "auth failed")]
    #[test_case("connection reset by peer" => false; "network")]
    #[test_case("not authorized" => false; "case sensitive")]
    fn classifies_auth_signatures(message: &str) -> bool {
        is_auth_failure(message)
    }

    #[test]
    fn from_connection_error_splits_auth_and_transport() {
        assert!(matches!(
            SessionError::from_connection_error("Bad User Name or Password"),
            SessionError::AuthSignature(_)
        ));
        assert_eq!(
            SessionError::from_connection_error("io error"),
            SessionError::Transport("io error".to_string())
        );
    }

    #[test]
    fn terminal_states() {
        assert!(SessionState::Delivered.is_terminal());
        assert!(SessionState::Cancelled.is_terminal());
        assert!(!SessionState::AwaitingData.is_terminal());
        assert!(!SessionState::AuthRetrying.is_terminal());
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(SessionOutcome::Delivered.label(), "delivered");
        assert_eq!(
            SessionOutcome::TimedOut(TimeoutKind::Data).label(),
            "timed_out"
        );
        assert_eq!(
            SessionOutcome::RetryWith(Credentials::new("t", "i")).label(),
            "auth_retrying"
        );
        assert!(SessionOutcome::Delivered.is_delivered());
        assert!(!SessionOutcome::Cancelled.is_delivered());
    }

    #[test]
    fn timeout_errors_render_client_messages() {
        assert_eq!(SessionError::AckTimeout.to_string(), "Subscribe timeout");
        assert_eq!(
            SessionError::DataTimeout.to_string(),
            "No data received for stock"
        );
    }
}
