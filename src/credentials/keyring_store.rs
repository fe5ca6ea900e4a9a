//! Token storage in the platform credential store.
//!
//! Uses the `keyring` crate which provides OS-appropriate secure storage:
//! - **macOS / iOS**: Keychain
//! - **Linux**: Secret Service API (GNOME Keyring, KWallet)
//! - **Windows**: Windows Credential Manager

use async_trait::async_trait;

use super::TokenStore;
use crate::config::CredentialsConfig;
use crate::error::{Result, SyncError};

/// Token store backed by one keyring entry.
#[derive(Debug, Clone)]
pub struct KeyringTokenStore {
    service: String,
    account: String,
}

impl KeyringTokenStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self::new(&config.service, &config.account)
    }

    fn entry(&self) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| SyncError::Credential(format!("Failed to create keyring entry: {e}")))
    }

    /// Save the token, e.g. after sign-in.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Credential`] if the platform storage fails.
    pub fn store(&self, token: &str) -> Result<()> {
        self.entry()?
            .set_password(token)
            .map_err(|e| SyncError::Credential(format!("Failed to store token: {e}")))
    }

    /// Remove the token. Deleting a missing entry succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Credential`] if the platform storage fails.
    pub fn clear(&self) -> Result<()> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SyncError::Credential(format!(
                "Failed to delete token: {e}"
            ))),
        }
    }

    fn read(&self) -> Result<Option<String>> {
        match self.entry()?.get_password() {
            Ok(token) => Ok(Some(token)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SyncError::Credential(format!(
                "Failed to retrieve token: {e}"
            ))),
        }
    }
}

#[async_trait]
impl TokenStore for KeyringTokenStore {
    async fn get_token(&self) -> Result<Option<String>> {
        // Keyring backends block on IPC.
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.read())
            .await
            .map_err(|e| SyncError::Credential(format!("keyring lookup aborted: {e}")))?
    }
}
