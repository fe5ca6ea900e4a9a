//! Auth token lookup for the sync connection.
//!
//! The connection manager asks a [`TokenStore`] for the bearer token each
//! time it connects. Production builds read it from the platform keyring
//! ([`KeyringTokenStore`]); embedders that already hold the token in memory
//! use [`StaticTokenStore`].

mod keyring_store;

pub use keyring_store::KeyringTokenStore;

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Source of the bearer token used to authenticate the connection.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token, or `None` when the user is signed out.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Credential`](crate::error::SyncError::Credential)
    /// if the backing store cannot be read.
    async fn get_token(&self) -> Result<Option<String>>;
}

/// In-memory token holder.
#[derive(Debug, Default)]
pub struct StaticTokenStore {
    token: Mutex<Option<String>>,
}

impl StaticTokenStore {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: Mutex::new(token),
        }
    }

    /// Replace the held token, e.g. after sign-in or sign-out.
    pub fn set_token(&self, token: Option<String>) {
        let mut slot = match self.token.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        *slot = token;
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn get_token(&self) -> Result<Option<String>> {
        let slot = match self.token.lock() {
            Ok(s) => s,
            Err(p) => p.into_inner(),
        };
        // Empty strings are treated as signed out.
        Ok(slot.clone().filter(|t| !t.is_empty()))
    }
}
