//! Persistence of per-account credential blobs.
//!
//! The production store is a remote key/value service reached over HTTP
//! ([`HttpCredentialStore`]); [`MemoryCredentialStore`] keeps blobs in process
//! when no remote store is configured.

pub mod http;
pub mod memory;
pub mod store;

pub use {http::HttpCredentialStore, memory::MemoryCredentialStore, store::CredentialStore};
