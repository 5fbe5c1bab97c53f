//! In-memory stock and account stores.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;

use crate::application::ports::{AccountRepository, StockRepository, StoreError};
use crate::domain::quote::PriceUpdate;

/// Latest known price data for a stock code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockRecord {
    /// Scaled close price.
    pub market_price: Decimal,
    /// Scaled high price.
    pub high_price: Decimal,
    /// Scaled low price.
    pub low_price: Decimal,
    /// Scaled open price.
    pub open_price: Decimal,
    /// Traded volume.
    pub volume: Decimal,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl From<&PriceUpdate> for StockRecord {
    fn from(update: &PriceUpdate) -> Self {
        Self {
            market_price: update.market_price,
            high_price: update.high_price,
            low_price: update.low_price,
            open_price: update.open_price,
            volume: update.volumn,
            updated_at: update.timestamp,
        }
    }
}

/// In-memory implementation of `StockRepository`.
///
/// A strict store only updates codes that were seeded; an upserting store
/// creates records on first write.
#[derive(Debug, Default)]
pub struct InMemoryStockRepository {
    records: RwLock<HashMap<String, StockRecord>>,
    upsert: bool,
}

impl InMemoryStockRepository {
    /// Create a strict, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that creates missing records.
    #[must_use]
    pub fn upserting() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            upsert: true,
        }
    }

    /// Add a record (for test setup).
    pub fn seed(&self, code: &str, record: StockRecord) {
        self.records.write().insert(code.to_string(), record);
    }

    /// Get the record for a code.
    #[must_use]
    pub fn get(&self, code: &str) -> Option<StockRecord> {
        self.records.read().get(code).cloned()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl StockRepository for InMemoryStockRepository {
    async fn update_price(&self, code: &str, update: &PriceUpdate) -> Result<bool, StoreError> {
        let mut records = self.records.write();
        match records.get_mut(code) {
            Some(record) => {
                *record = StockRecord::from(update);
                Ok(true)
            }
            None if self.upsert => {
                records.insert(code.to_string(), StockRecord::from(update));
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// In-memory implementation of `AccountRepository`.
#[derive(Debug, Default)]
pub struct InMemoryAccountRepository {
    tokens: RwLock<HashMap<String, String>>,
    upsert: bool,
}

impl InMemoryAccountRepository {
    /// Create a strict, empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that creates missing accounts.
    #[must_use]
    pub fn upserting() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            upsert: true,
        }
    }

    /// Add an account (for test setup).
    pub fn seed(&self, account_id: &str, token: &str) {
        self.tokens
            .write()
            .insert(account_id.to_string(), token.to_string());
    }

    /// Current token of an account.
    #[must_use]
    pub fn token(&self, account_id: &str) -> Option<String> {
        self.tokens.read().get(account_id).cloned()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn update_token(&self, account_id: &str, token: &str) -> Result<bool, StoreError> {
        let mut tokens = self.tokens.write();
        if !self.upsert && !tokens.contains_key(account_id) {
            return Ok(false);
        }
        tokens.insert(account_id.to_string(), token.to_string());
        Ok(true)
    }
}
