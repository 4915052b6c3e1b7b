#![forbid(unsafe_code)]

//! Sigtuna — SAML XML signature verification and decryption.
//!
//! [`SignedDocument`] validates XML digital signatures against a trusted
//! certificate fingerprint and decrypts XML-encrypted fragments in place.

pub use sigtuna_core as core;
pub use sigtuna_crypto as crypto;
pub use sigtuna_dsig as dsig;
pub use sigtuna_enc as enc;
pub use sigtuna_keys as keys;
pub use sigtuna_xml as xml;

pub mod document;
pub mod init;
pub mod settings;

pub use document::SignedDocument;
pub use init::initialize;
pub use settings::{PrivateKeySource, Settings};
pub use sigtuna_core::{Error, Result};
