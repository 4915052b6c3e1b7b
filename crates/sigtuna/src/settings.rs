#![forbid(unsafe_code)]

//! Decryption settings.

use sigtuna_core::Error;
use sigtuna_keys::{loader, Key};
use std::path::PathBuf;

/// Where the decryption private key comes from.
#[derive(Debug, Clone)]
pub enum PrivateKeySource {
    /// Inline PEM text.
    Pem(String),
    /// Path to a PEM file.
    Path(PathBuf),
}

/// Settings for [`crate::SignedDocument::decrypt_in_place`].
#[derive(Debug, Clone)]
pub struct Settings {
    /// Whether decryption is configured at all.  When false,
    /// `decrypt_in_place` is a no-op.
    pub encryption_configured: bool,
    private_key: Option<PrivateKeySource>,
}

impl Settings {
    /// Settings with decryption disabled.
    pub fn disabled() -> Self {
        Self {
            encryption_configured: false,
            private_key: None,
        }
    }

    /// Settings with decryption enabled, keyed by inline PEM text.
    pub fn with_private_key_pem(pem: impl Into<String>) -> Self {
        Self {
            encryption_configured: true,
            private_key: Some(PrivateKeySource::Pem(pem.into())),
        }
    }

    /// Settings with decryption enabled, keyed by a PEM file on disk.
    pub fn with_private_key_file(path: impl Into<PathBuf>) -> Self {
        Self {
            encryption_configured: true,
            private_key: Some(PrivateKeySource::Path(path.into())),
        }
    }

    /// Load the configured private key into a fresh [`Key`].
    pub(crate) fn load_private_key(&self) -> Result<Key, Error> {
        match &self.private_key {
            None => Err(Error::KeyLoad("no private key configured".into())),
            Some(PrivateKeySource::Pem(pem)) => loader::load_rsa_private_pem(pem.as_bytes()),
            Some(PrivateKeySource::Path(path)) => {
                let data = std::fs::read(path)?;
                loader::load_rsa_private_pem(&data)
            }
        }
    }
}
