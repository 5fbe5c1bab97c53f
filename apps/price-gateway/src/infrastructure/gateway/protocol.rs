//! Client protocol.
//!
//! Decodes `type`-tagged JSON requests from WebSocket clients and validates
//! their parameters. Empty strings count as missing.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::quote::{Credentials, StockCode};

// ============================================================================
// Client → Server Messages
// ============================================================================

/// A validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientRequest {
    /// Fetch one price.
    Subscribe {
        /// Stock code.
        code: StockCode,
        /// Broker credentials.
        credentials: Credentials,
        /// Owning user, if given.
        user_id: Option<String>,
    },
    /// Fetch prices for many codes.
    SubscribeBatch {
        /// Stock codes, in request order.
        codes: Vec<StockCode>,
        /// Broker credentials shared by every code.
        credentials: Credentials,
        /// Owning user, if given.
        user_id: Option<String>,
    },
    /// Keepalive.
    Ping,
    /// Gateway status.
    Health,
}

impl ClientRequest {
    /// The `type` tag of this request.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::SubscribeBatch { .. } => "subscribe_batch",
            Self::Ping => "ping",
            Self::Health => "health",
        }
    }
}

/// Errors decoding a client request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The frame was not JSON.
    #[error("{0}")]
    InvalidJson(String),

    /// `type` missing or not recognized.
    #[error("Unknown message type")]
    UnknownType,

    /// `subscribe` without code or credentials.
    #[error("Missing required parameters")]
    MissingParameters,

    /// `subscribe_batch` without a codes array or credentials.
    #[error("Missing required parameters or invalid codes array")]
    InvalidBatchParameters,
}

/// Decode a text frame into a request.
///
/// # Errors
///
/// Returns [`ProtocolError`] for invalid JSON, an unknown type or missing
/// parameters.
pub fn decode(text: &str) -> Result<ClientRequest, ProtocolError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;
    let Some(fields) = value.as_object() else {
        return Err(ProtocolError::UnknownType);
    };

    match fields.get("type").and_then(Value::as_str) {
        Some("subscribe") => decode_subscribe(fields),
        Some("subscribe_batch") => decode_batch(fields),
        Some("ping") => Ok(ClientRequest::Ping),
        Some("health") => Ok(ClientRequest::Health),
        _ => Err(ProtocolError::UnknownType),
    }
}

fn decode_subscribe(fields: &Map<String, Value>) -> Result<ClientRequest, ProtocolError> {
    let code = text_field(fields, "code").ok_or(ProtocolError::MissingParameters)?;
    let credentials = credentials(fields).ok_or(ProtocolError::MissingParameters)?;

    Ok(ClientRequest::Subscribe {
        code,
        credentials,
        user_id: text_field(fields, "userId"),
    })
}

fn decode_batch(fields: &Map<String, Value>) -> Result<ClientRequest, ProtocolError> {
    let codes = fields
        .get("codes")
        .and_then(Value::as_array)
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().filter(|s| !s.is_empty()).map(str::to_string))
                .collect::<Option<Vec<_>>>()
        })
        .ok_or(ProtocolError::InvalidBatchParameters)?;
    let credentials = credentials(fields).ok_or(ProtocolError::InvalidBatchParameters)?;

    Ok(ClientRequest::SubscribeBatch {
        codes,
        credentials,
        user_id: text_field(fields, "userId"),
    })
}

fn credentials(fields: &Map<String, Value>) -> Option<Credentials> {
    Some(Credentials::new(
        text_field(fields, "investorToken")?,
        text_field(fields, "investorId")?,
    ))
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
