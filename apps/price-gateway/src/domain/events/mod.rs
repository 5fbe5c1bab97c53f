//! Gateway Events
//!
//! Every message the gateway sends to a WebSocket client. Sessions and the
//! batch orchestrator emit these; the connection layer serializes them as
//! `type`-tagged JSON objects.

use serde::Serialize;

use super::quote::{Credentials, PriceUpdate};

/// Greeting sent when a client connects.
pub const WELCOME_MESSAGE: &str = "Connected to WSS server";

/// Sent when a session's broker connection is acknowledged.
pub const BROKER_CONNECTED_MESSAGE: &str = "Connected to MQTT";

/// Sent alongside refreshed credentials.
pub const TOKEN_REFRESHED_MESSAGE: &str = "Token refreshed automatically. Retrying subscription...";

/// Auth error after the single retry was used up.
pub const AUTH_RETRY_EXHAUSTED: &str = "Authentication failed after token refresh attempt.";

/// Auth error when the credential refresh itself failed.
pub const AUTH_REFRESH_FAILED: &str = "Authentication failed and token refresh failed.";

/// Client-visible form of refreshed credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsPayload {
    /// New investor token.
    pub investor_token: String,
    /// Investor id the token belongs to.
    pub investor_id: String,
}

impl From<&Credentials> for CredentialsPayload {
    fn from(creds: &Credentials) -> Self {
        Self {
            investor_token: creds.investor_token().to_string(),
            investor_id: creds.investor_id().to_string(),
        }
    }
}

/// Process memory figures reported by `health`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MemoryUsage {
    /// Resident set size in bytes, if the platform exposes it.
    pub rss: Option<u64>,
}

/// Messages sent from the gateway to a client.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Client greeting or broker connection acknowledgment.
    Connected {
        /// Stock code, for session events.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Human-readable message.
        message: String,
        /// Gateway version, for the greeting.
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    /// Broker acknowledged the subscription.
    Subscribed {
        /// Stock code.
        code: String,
        /// Broker topic.
        topic: String,
    },
    /// A price arrived.
    PriceUpdate {
        /// Stock code.
        code: String,
        /// Scaled price data.
        data: PriceUpdate,
    },
    /// No data arrived in time.
    Timeout {
        /// Stock code.
        code: String,
        /// Human-readable message.
        message: String,
    },
    /// A request or session failed.
    Error {
        /// Stock code, when the error belongs to a session.
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
        /// Failure reason.
        error: String,
    },
    /// Authentication failed for good.
    AuthError {
        /// Stock code.
        code: String,
        /// Failure reason.
        error: String,
    },
    /// Credentials were refreshed and the subscription is being retried.
    TokenRefreshed {
        /// Stock code.
        code: String,
        /// Human-readable message.
        message: String,
        /// The refreshed credentials.
        #[serde(rename = "newCredentials")]
        new_credentials: CredentialsPayload,
    },
    /// A batch started.
    BatchStart {
        /// Number of codes in the batch.
        total: usize,
    },
    /// A batch chunk finished.
    BatchProgress {
        /// Codes processed so far.
        processed: usize,
        /// Number of codes in the batch.
        total: usize,
        /// Lineages that delivered a price.
        success: usize,
        /// Lineages that did not.
        failed: usize,
    },
    /// A batch finished.
    BatchComplete {
        /// Number of codes in the batch.
        total: usize,
        /// Lineages that delivered a price.
        success: usize,
        /// Lineages that did not.
        failed: usize,
    },
    /// Reply to `ping`.
    Pong {
        /// Epoch milliseconds.
        timestamp: i64,
    },
    /// Reply to `health`.
    Health {
        /// Always `ok` while the process serves requests.
        status: String,
        /// Process uptime in seconds.
        uptime: f64,
        /// Connected WebSocket clients.
        connections: usize,
        /// Process memory.
        memory: MemoryUsage,
    },
}

impl ServerMessage {
    /// Greeting for a newly connected client.
    #[must_use]
    pub fn welcome(version: impl Into<String>) -> Self {
        Self::Connected {
            code: None,
            message: WELCOME_MESSAGE.to_string(),
            version: Some(version.into()),
        }
    }

    /// Error not tied to a session.
    #[must_use]
    pub fn request_error(error: impl Into<String>) -> Self {
        Self::Error {
            code: None,
            error: error.into(),
        }
    }

    /// Error for a session on `code`.
    #[must_use]
    pub fn session_error(code: &str, error: impl Into<String>) -> Self {
        Self::Error {
            code: Some(code.to_string()),
            error: error.into(),
        }
    }

    /// The `type` tag of this message.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::PriceUpdate { .. } => "price_update",
            Self::Timeout { .. } => "timeout",
            Self::Error { .. } => "error",
            Self::AuthError { .. } => "auth_error",
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::BatchStart { .. } => "batch_start",
            Self::BatchProgress { .. } => "batch_progress",
            Self::BatchComplete { .. } => "batch_complete",
            Self::Pong { .. } => "pong",
            Self::Health { .. } => "health",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_serializes_without_code() {
        let json = serde_json::to_value(ServerMessage::welcome("1.0.0")).unwrap();
        assert_eq!(json["type"], "connected");
        assert_eq!(json["message"], WELCOME_MESSAGE);
        assert_eq!(json["version"], "1.0.0");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn token_refreshed_uses_camel_case_credentials() {
        let msg = ServerMessage::TokenRefreshed {
            code: "VIC".to_string(),
            message: TOKEN_REFRESHED_MESSAGE.to_string(),
            new_credentials: CredentialsPayload::from(&Credentials::new("t2", "i2")),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "token_refreshed");
        assert_eq!(json["newCredentials"]["investorToken"], "t2");
        assert_eq!(json["newCredentials"]["investorId"], "i2");
    }

    #[test]
    fn batch_progress_fields() {
        let json = serde_json::to_value(ServerMessage::BatchProgress {
            processed: 10,
            total: 25,
            success: 7,
            failed: 3,
        })
        .unwrap();
        assert_eq!(json["type"], "batch_progress");
        assert_eq!(json["processed"], 10);
        assert_eq!(json["total"], 25);
        assert_eq!(json["success"], 7);
        assert_eq!(json["failed"], 3);
    }

    #[test]
    fn request_error_has_no_code() {
        let json =
            serde_json::to_value(ServerMessage::request_error("Unknown message type")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["error"], "Unknown message type");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn kind_matches_serialized_tag() {
        let messages = [
            ServerMessage::welcome("v"),
            ServerMessage::session_error("VIC", "boom"),
            ServerMessage::Pong { timestamp: 1 },
            ServerMessage::BatchStart { total: 0 },
            ServerMessage::AuthError {
                code: "VIC".to_string(),
                error: AUTH_RETRY_EXHAUSTED.to_string(),
            },
        ];
        for msg in messages {
            let json = serde_json::to_value(&msg).unwrap();
            assert_eq!(json["type"], msg.kind());
        }
    }
}
