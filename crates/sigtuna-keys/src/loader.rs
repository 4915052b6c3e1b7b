#![forbid(unsafe_code)]

//! Key loading from PEM data.

use crate::key::{Key, KeyData, KeyUsage};
use sigtuna_core::Error;

/// Load an RSA private key from PEM data (PKCS#8 `PRIVATE KEY` or PKCS#1
/// `RSA PRIVATE KEY`).
pub fn load_rsa_private_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs8::DecodePrivateKey;
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|e| Error::KeyLoad(format!("invalid PEM encoding: {e}")))?;

    // Try PKCS#8 first
    if let Ok(pk) = rsa::RsaPrivateKey::from_pkcs8_pem(pem_str) {
        let public = pk.to_public_key();
        return Ok(Key::new(
            KeyData::Rsa {
                private: Some(pk),
                public,
            },
            KeyUsage::Any,
        ));
    }

    // Try PKCS#1
    use pkcs1::DecodeRsaPrivateKey;
    let pk = rsa::RsaPrivateKey::from_pkcs1_pem(pem_str)
        .map_err(|e| Error::KeyLoad(format!("failed to parse RSA private key PEM: {e}")))?;
    let public = pk.to_public_key();
    Ok(Key::new(
        KeyData::Rsa {
            private: Some(pk),
            public,
        },
        KeyUsage::Any,
    ))
}

/// Load an RSA public key from PEM data (SPKI `PUBLIC KEY` or PKCS#1
/// `RSA PUBLIC KEY`).
pub fn load_rsa_public_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs8::DecodePublicKey;
    let pem_str = std::str::from_utf8(pem_data)
        .map_err(|e| Error::KeyLoad(format!("invalid PEM encoding: {e}")))?;

    // Try SPKI first
    if let Ok(pk) = rsa::RsaPublicKey::from_public_key_pem(pem_str) {
        return Ok(Key::new(
            KeyData::Rsa {
                private: None,
                public: pk,
            },
            KeyUsage::Verify,
        ));
    }

    // Try PKCS#1
    use pkcs1::DecodeRsaPublicKey;
    let pk = rsa::RsaPublicKey::from_pkcs1_pem(pem_str)
        .map_err(|e| Error::KeyLoad(format!("failed to parse RSA public key PEM: {e}")))?;
    Ok(Key::new(
        KeyData::Rsa {
            private: None,
            public: pk,
        },
        KeyUsage::Verify,
    ))
}

/// Load an AES key from raw binary data.
pub fn load_aes_key(data: &[u8]) -> Result<Key, Error> {
    match data.len() {
        16 | 24 | 32 => Ok(Key::new(KeyData::Aes(data.to_vec()), KeyUsage::Any)),
        n => Err(Error::KeyLoad(format!(
            "invalid AES key size: {n} (expected 16, 24, or 32)"
        ))),
    }
}

/// Auto-detect key format and load from PEM data.
///
/// Tries RSA private, then RSA public.
pub fn load_pem_auto(pem_data: &[u8]) -> Result<Key, Error> {
    if let Ok(key) = load_rsa_private_pem(pem_data) {
        return Ok(key);
    }
    if let Ok(key) = load_rsa_public_pem(pem_data) {
        return Ok(key);
    }
    Err(Error::KeyLoad(
        "unable to auto-detect key format from PEM data".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};

    #[test]
    fn load_private_key_pkcs8_round_trip() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = sk.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key = load_rsa_private_pem(pem.as_bytes()).unwrap();
        assert!(key.rsa_private_key().is_some());
        assert_eq!(key.rsa_public_key().unwrap(), &sk.to_public_key());
    }

    #[test]
    fn load_public_key_spki() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = sk.to_public_key().to_public_key_pem(LineEnding::LF).unwrap();
        let key = load_rsa_public_pem(pem.as_bytes()).unwrap();
        assert!(key.rsa_private_key().is_none());
        assert_eq!(key.rsa_public_key().unwrap(), &sk.to_public_key());
    }

    #[test]
    fn auto_detect_prefers_private_material() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let pem = sk.to_pkcs8_pem(LineEnding::LF).unwrap();
        let key = load_pem_auto(pem.as_bytes()).unwrap();
        assert!(key.rsa_private_key().is_some());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(load_pem_auto(b"not a key").is_err());
        assert!(load_aes_key(&[0u8; 7]).is_err());
    }
}
