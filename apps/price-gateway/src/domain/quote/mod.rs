//! Quote Domain Types
//!
//! Symbol codes, broker credentials, subscription requests and the price
//! payloads exchanged with the upstream KRX feed.
//!
//! # Price Units
//!
//! The broker publishes prices in thousands of VND. The gateway's price
//! unit is VND, so every forwarded price is scaled by [`PRICE_SCALE`].

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Topic prefix for daily OHLC stock bars on the KRX feed.
pub const TOPIC_PREFIX: &str = "plaintext/quotes/krx/mdds/v2/ohlc/stock/1D/";

/// Factor converting broker prices into gateway prices.
pub const PRICE_SCALE: Decimal = Decimal::ONE_THOUSAND;

/// Highest retry counter a subscription lineage can reach.
pub const MAX_RETRY_COUNT: u8 = 1;

/// A stock symbol code (e.g. `VIC`).
pub type StockCode = String;

/// Derive the broker topic for a stock code.
#[must_use]
pub fn topic_for(code: &str) -> String {
    format!("{TOPIC_PREFIX}{code}")
}

// =============================================================================
// Credentials
// =============================================================================

/// Broker credentials: investor token (password) and investor id (username).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    investor_token: String,
    investor_id: String,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub fn new(investor_token: impl Into<String>, investor_id: impl Into<String>) -> Self {
        Self {
            investor_token: investor_token.into(),
            investor_id: investor_id.into(),
        }
    }

    /// Get the investor token.
    #[must_use]
    pub fn investor_token(&self) -> &str {
        &self.investor_token
    }

    /// Get the investor id.
    #[must_use]
    pub fn investor_id(&self) -> &str {
        &self.investor_id
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("investor_token", &"[REDACTED]")
            .field("investor_id", &self.investor_id)
            .finish()
    }
}

// =============================================================================
// Subscription Request
// =============================================================================

/// Immutable input to one subscription session attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionRequest {
    code: StockCode,
    credentials: Credentials,
    user_id: Option<String>,
    retry_count: u8,
}

impl SubscriptionRequest {
    /// Create a first-attempt request.
    #[must_use]
    pub fn new(code: impl Into<StockCode>, credentials: Credentials, user_id: Option<String>) -> Self {
        Self {
            code: code.into(),
            credentials,
            user_id,
            retry_count: 0,
        }
    }

    /// Build the successor request for an auth-triggered retry.
    ///
    /// The original request is left untouched.
    #[must_use]
    pub fn retry_with(&self, credentials: Credentials) -> Self {
        Self {
            code: self.code.clone(),
            credentials,
            user_id: self.user_id.clone(),
            retry_count: self.retry_count.saturating_add(1),
        }
    }

    /// Stock code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Credentials for this attempt.
    #[must_use]
    pub const fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Owning user id, if the client supplied one.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Retry counter (0 for the original attempt).
    #[must_use]
    pub const fn retry_count(&self) -> u8 {
        self.retry_count
    }

    /// Whether an auth failure on this attempt may still be retried.
    #[must_use]
    pub const fn can_retry(&self) -> bool {
        self.retry_count < MAX_RETRY_COUNT
    }

    /// Broker topic for this request.
    #[must_use]
    pub fn topic(&self) -> String {
        topic_for(&self.code)
    }
}

// =============================================================================
// Upstream Payload
// =============================================================================

/// Daily OHLC message published by the broker.
///
/// Only the fields the gateway forwards are required; anything else in the
/// message is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PricePayload {
    /// Symbol the bar belongs to.
    pub symbol: String,
    /// Close (latest) price, in thousands.
    pub close: Decimal,
    /// Session high, in thousands.
    pub high: Decimal,
    /// Session low, in thousands.
    pub low: Decimal,
    /// Session open, in thousands.
    pub open: Decimal,
    /// Traded volume.
    pub volume: Decimal,
}

impl PricePayload {
    /// Parse a raw broker message.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not JSON or a required field is
    /// missing or non-numeric.
    pub fn parse(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

// =============================================================================
// Price Update
// =============================================================================

/// Price data forwarded to clients and written to the stock store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdate {
    /// Symbol the update belongs to.
    pub symbol: String,
    /// Raw close price.
    #[serde(with = "rust_decimal::serde::float")]
    pub close: Decimal,
    /// Scaled close price.
    #[serde(with = "rust_decimal::serde::float")]
    pub market_price: Decimal,
    /// Scaled high price.
    #[serde(with = "rust_decimal::serde::float")]
    pub high_price: Decimal,
    /// Scaled low price.
    #[serde(with = "rust_decimal::serde::float")]
    pub low_price: Decimal,
    /// Scaled open price.
    #[serde(with = "rust_decimal::serde::float")]
    pub open_price: Decimal,
    /// Raw volume (field name kept for client compatibility).
    #[serde(with = "rust_decimal::serde::float")]
    pub volumn: Decimal,
    /// When the gateway received the update.
    pub timestamp: DateTime<Utc>,
}

/// A broker price that cannot be scaled without overflowing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} price out of range: {value}")]
pub struct PriceOutOfRange {
    /// Payload field that overflowed.
    pub field: &'static str,
    /// Unscaled value.
    pub value: Decimal,
}

fn scale(field: &'static str, value: Decimal) -> Result<Decimal, PriceOutOfRange> {
    value
        .checked_mul(PRICE_SCALE)
        .ok_or(PriceOutOfRange { field, value })
}

impl PriceUpdate {
    /// Build a scaled update from a broker payload.
    ///
    /// # Errors
    ///
    /// Returns [`PriceOutOfRange`] if a price overflows when scaled.
    pub fn from_payload(
        payload: &PricePayload,
        received_at: DateTime<Utc>,
    ) -> Result<Self, PriceOutOfRange> {
        Ok(Self {
            symbol: payload.symbol.clone(),
            close: payload.close,
            market_price: scale("close", payload.close)?,
            high_price: scale("high", payload.high)?,
            low_price: scale("low", payload.low)?,
            open_price: scale("open", payload.open)?,
            volumn: payload.volume,
            timestamp: received_at,
        })
    }
}
