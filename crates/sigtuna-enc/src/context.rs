#![forbid(unsafe_code)]

//! Encryption context — holds keys and configuration.

use sigtuna_keys::KeysManager;

/// Context for XML-Enc operations.
///
/// Created per call, bound to one keys manager, dropped when the call
/// returns.
pub struct EncContext {
    /// Keys manager for key lookup.
    pub keys_manager: KeysManager,
    /// Additional ID attribute names.
    pub id_attrs: Vec<String>,
}

impl EncContext {
    pub fn new(keys_manager: KeysManager) -> Self {
        Self {
            keys_manager,
            id_attrs: Vec::new(),
        }
    }

    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }
}
