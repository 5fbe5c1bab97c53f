//! DNSE Auth Adapter
//!
//! `reqwest` implementation of the credential port against the DNSE user
//! service, plus a scripted provider for tests.

pub mod mock;
mod refresher;

pub use mock::MockCredentialProvider;
pub use refresher::{DnseCredentialRefresher, DnseRefresherConfig};
