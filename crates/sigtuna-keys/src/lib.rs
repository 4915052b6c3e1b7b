#![forbid(unsafe_code)]

//! Key material handling for the Sigtuna XML security layer: key types,
//! the keys manager, PEM loaders and X.509 certificate helpers.

pub mod key;
pub mod loader;
pub mod manager;
pub mod x509;

pub use key::{Key, KeyData, KeyUsage};
pub use manager::KeysManager;
