//! Persistence Adapters
//!
//! Implementations of the stock and account store ports.

mod in_memory;

pub use in_memory::{InMemoryAccountRepository, InMemoryStockRepository, StockRecord};
