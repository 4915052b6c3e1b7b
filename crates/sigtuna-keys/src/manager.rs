#![forbid(unsafe_code)]

//! Key manager with named key store.
//!
//! A manager is created fresh for every verification or decryption call and
//! dropped before the call returns; it is never shared across calls.

use crate::key::{Key, KeyData};
use sigtuna_core::Error;

/// Manages a collection of keys for lookup during signature or encryption
/// processing.
pub struct KeysManager {
    keys: Vec<Key>,
}

impl KeysManager {
    /// Create an empty keys manager.
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Add a key to the manager.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Find a key by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// Find the first key that has an RSA public key.
    pub fn find_rsa(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Rsa { .. }))
    }

    /// Find an RSA key with a private key component.
    pub fn find_rsa_private(&self) -> Option<&Key> {
        self.keys.iter().find(|k| {
            matches!(
                &k.data,
                KeyData::Rsa {
                    private: Some(_),
                    ..
                }
            )
        })
    }

    /// Find the first AES key.
    pub fn find_aes(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Aes(_)))
    }

    /// Get the first key available (for simple single-key scenarios).
    pub fn first_key(&self) -> Result<&Key, Error> {
        self.keys
            .first()
            .ok_or_else(|| Error::Key("no keys in manager".into()))
    }

    /// Whether the manager holds a key usable for signature verification.
    pub fn has_verification_key(&self) -> bool {
        self.find_rsa().is_some()
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl Default for KeysManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyUsage;

    #[test]
    fn lookup_by_name_and_kind() {
        let mut mgr = KeysManager::new();
        assert!(mgr.is_empty());
        assert!(mgr.first_key().is_err());
        assert!(!mgr.has_verification_key());

        mgr.add_key(Key::new(KeyData::Aes(vec![0u8; 16]), KeyUsage::Any).with_name("session"));
        assert_eq!(mgr.len(), 1);
        assert!(mgr.find_by_name("session").is_some());
        assert!(mgr.find_by_name("other").is_none());
        assert!(mgr.find_aes().is_some());
        assert!(mgr.find_rsa().is_none());
        assert!(mgr.find_rsa_private().is_none());
    }
}
