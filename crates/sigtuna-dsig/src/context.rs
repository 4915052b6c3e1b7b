#![forbid(unsafe_code)]

//! DSig context — holds keys and configuration for signature operations.

use sigtuna_core::Error;
use sigtuna_keys::KeysManager;

/// Context for XML-DSig operations.
///
/// Created per call, bound to one keys manager, dropped when the call
/// returns.
pub struct DsigContext {
    /// Keys manager for key lookup.
    pub keys_manager: KeysManager,
    /// Additional ID attribute names to register.
    pub id_attrs: Vec<String>,
}

impl DsigContext {
    /// Create a new DSig context bound to the given keys manager.
    ///
    /// The manager must hold an RSA key usable for the signature operation.
    pub fn new(keys_manager: KeysManager) -> Result<Self, Error> {
        if !keys_manager.has_verification_key() {
            return Err(Error::ContextCreation(
                "keys manager holds no usable RSA key".into(),
            ));
        }
        Ok(Self {
            keys_manager,
            id_attrs: Vec::new(),
        })
    }

    /// Register an ID attribute name for reference resolution.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }
}
