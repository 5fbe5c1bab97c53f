//! Scripted credential provider for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::application::ports::{CredentialProvider, RefreshError};
use crate::domain::quote::Credentials;

/// Mock credential provider for testing.
///
/// Returns queued results in order, then `NotConfigured`.
#[derive(Debug, Default)]
pub struct MockCredentialProvider {
    results: Mutex<VecDeque<Result<Credentials, RefreshError>>>,
    calls: AtomicUsize,
}

impl MockCredentialProvider {
    /// Create a provider with no queued results.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider whose first refresh succeeds.
    #[must_use]
    pub fn succeeding(credentials: Credentials) -> Self {
        let provider = Self::new();
        provider.push(Ok(credentials));
        provider
    }

    /// Create a provider whose first refresh fails.
    #[must_use]
    pub fn failing(error: RefreshError) -> Self {
        let provider = Self::new();
        provider.push(Err(error));
        provider
    }

    /// Queue a result.
    pub fn push(&self, result: Result<Credentials, RefreshError>) {
        self.results.lock().push_back(result);
    }

    /// Number of refresh calls so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn refresh(&self) -> Result<Credentials, RefreshError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results
            .lock()
            .pop_front()
            .unwrap_or(Err(RefreshError::NotConfigured))
    }
}
