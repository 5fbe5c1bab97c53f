//! Store Ports (Driven Ports)
//!
//! Interfaces for the record stores the gateway writes to as a side effect:
//! the latest price per stock and the refreshed token per account.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::quote::PriceUpdate;

/// Errors from a store write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Latest-price store keyed by stock code.
#[async_trait]
pub trait StockRepository: Send + Sync {
    /// Update the stock record for `code`.
    ///
    /// Returns `false` when no record exists for the code.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn update_price(&self, code: &str, update: &PriceUpdate) -> Result<bool, StoreError>;
}

/// Account store keyed by account (user) id.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Store a refreshed investor token for `account_id`.
    ///
    /// Returns `false` when no record exists for the account.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    async fn update_token(&self, account_id: &str, token: &str) -> Result<bool, StoreError>;
}
