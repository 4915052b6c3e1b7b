#![forbid(unsafe_code)]

//! One-time process-wide initialization.
//!
//! Runs known-answer self-tests of the digest and cipher primitives exactly
//! once per process.  Every `validate`/`decrypt_in_place` call goes through
//! [`initialize`] first; a failed self-test permanently disables both.

use sigtuna_core::{algorithm, Error};
use std::sync::OnceLock;

static INIT: OnceLock<std::result::Result<(), String>> = OnceLock::new();

/// Initialize the cryptographic layer.
///
/// Idempotent and safe under concurrent callers: the self-test runs once
/// and every caller observes the same cached outcome.
pub fn initialize() -> Result<(), Error> {
    INIT.get_or_init(self_test)
        .clone()
        .map_err(Error::Initialization)
}

fn self_test() -> std::result::Result<(), String> {
    use sigtuna_crypto::{cipher, digest};

    // Digest known answers
    let sha1 = digest::digest(algorithm::SHA1, b"abc").map_err(|e| e.to_string())?;
    if digest::hex(&sha1) != "a9993e364706816aba3e25717850c26c9cd0d89d" {
        return Err("SHA-1 self-test failed".into());
    }
    let sha256 = digest::digest(algorithm::SHA256, b"abc").map_err(|e| e.to_string())?;
    if digest::hex(&sha256) != "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    {
        return Err("SHA-256 self-test failed".into());
    }

    // Cipher round trip; also exercises the process RNG
    let aes = cipher::from_uri(algorithm::AES128_CBC).map_err(|e| e.to_string())?;
    let key = [0xA5u8; 16];
    let ct = aes.encrypt(&key, b"self-test").map_err(|e| e.to_string())?;
    let pt = aes.decrypt(&key, &ct).map_err(|e| e.to_string())?;
    if pt != b"self-test" {
        return Err("AES-CBC self-test failed".into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        initialize().unwrap();
        initialize().unwrap();
    }
}
