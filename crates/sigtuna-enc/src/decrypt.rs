#![forbid(unsafe_code)]

//! XML-Enc decryption.
//!
//! Processing order:
//! 1. Parse the document, find the first `<EncryptedData>`
//! 2. Read the `<EncryptionMethod>` URI
//! 3. Resolve the session key from `<KeyInfo>` (`<EncryptedKey>` RSA key
//!    transport, `<KeyName>` lookup) or fall back to the manager's key
//! 4. Base64-decode `<CipherData>/<CipherValue>` and decrypt
//! 5. Replace the `<EncryptedData>` element with the plaintext

use crate::context::EncContext;
use sigtuna_core::{algorithm, ns, Error};
use sigtuna_crypto::{cipher, keytransport};
use sigtuna_xml::document;

/// Decrypt a document containing `<EncryptedData>`.
///
/// Returns the document text with the encrypted element replaced by its
/// plaintext.
pub fn decrypt(ctx: &EncContext, xml: &str) -> Result<String, Error> {
    let doc = roxmltree::Document::parse_with_options(xml, sigtuna_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;

    let enc_data = document::find_element(&doc, ns::ENC, ns::node::ENCRYPTED_DATA)
        .ok_or_else(|| Error::MissingElement("EncryptedData".into()))?;

    let enc_uri = document::find_child_element(enc_data, ns::ENC, ns::node::ENCRYPTION_METHOD)
        .and_then(|n| n.attribute(ns::attr::ALGORITHM))
        .ok_or_else(|| Error::MissingElement("EncryptionMethod".into()))?;

    let key_bytes = resolve_decryption_key(ctx, enc_data)?;

    let cipher_value = read_cipher_value(enc_data)?;

    // The transported session key may be longer than the content cipher
    // requires (a 256-bit key wrapped for an aes128-cbc EncryptionMethod);
    // use the leading bytes.
    let expected = cipher::key_length_for(enc_uri);
    let effective_key = if expected > 0 && key_bytes.len() > expected {
        &key_bytes[..expected]
    } else {
        &key_bytes[..]
    };

    let cipher_alg = cipher::from_uri(enc_uri)?;
    let plaintext = cipher_alg
        .decrypt(effective_key, &cipher_value)
        .map_err(|e| Error::Decryption(e.to_string()))?;
    let plaintext = String::from_utf8(plaintext)
        .map_err(|e| Error::Decryption(format!("plaintext is not valid UTF-8: {e}")))?;

    // Splice the plaintext over the EncryptedData element.  Both
    // Type=Element and Type=Content replace the element 1:1.
    let range = enc_data.range();
    let mut result = String::with_capacity(xml.len());
    result.push_str(&xml[..range.start]);
    result.push_str(&plaintext);
    result.push_str(&xml[range.end..]);
    Ok(result)
}

/// Resolve the session key for an `<EncryptedData>` element.
fn resolve_decryption_key(
    ctx: &EncContext,
    enc_data: roxmltree::Node<'_, '_>,
) -> Result<Vec<u8>, Error> {
    if let Some(key_info) = document::find_child_element(enc_data, ns::DSIG, ns::node::KEY_INFO) {
        let mut last_err = None;
        for child in key_info.children().filter(|n| n.is_element()) {
            let child_ns = child.tag_name().namespace().unwrap_or("");
            let child_local = child.tag_name().name();

            if child_ns == ns::ENC && child_local == ns::node::ENCRYPTED_KEY {
                match decrypt_encrypted_key(ctx, child) {
                    Ok(key) => return Ok(key),
                    Err(e) => last_err = Some(e),
                }
            }

            if child_ns == ns::DSIG && child_local == ns::node::KEY_NAME {
                let name = child.text().unwrap_or("").trim();
                if !name.is_empty() {
                    if let Some(key) = ctx.keys_manager.find_by_name(name) {
                        if let Some(bytes) = key.symmetric_key_bytes() {
                            return Ok(bytes.to_vec());
                        }
                    }
                }
            }
        }
        if let Some(e) = last_err {
            return Err(e);
        }
    }

    // No usable KeyInfo: fall back to the manager's symmetric key.
    let key = ctx.keys_manager.first_key()?;
    key.symmetric_key_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::Key("no suitable decryption key found".into()))
}

/// Decrypt an `<EncryptedKey>` element to recover the session key.
fn decrypt_encrypted_key(
    ctx: &EncContext,
    enc_key: roxmltree::Node<'_, '_>,
) -> Result<Vec<u8>, Error> {
    let enc_uri = document::find_child_element(enc_key, ns::ENC, ns::node::ENCRYPTION_METHOD)
        .and_then(|n| n.attribute(ns::attr::ALGORITHM))
        .ok_or_else(|| Error::MissingElement("EncryptionMethod on EncryptedKey".into()))?;

    let cipher_bytes = read_cipher_value(enc_key)?;

    match enc_uri {
        algorithm::RSA_PKCS1 | algorithm::RSA_OAEP => {
            let transport = keytransport::from_uri(enc_uri)?;
            let key = ctx
                .keys_manager
                .find_rsa_private()
                .ok_or_else(|| Error::Key("no RSA private key for EncryptedKey".into()))?;
            let private = key
                .rsa_private_key()
                .ok_or_else(|| Error::Key("no RSA private key for EncryptedKey".into()))?;
            transport
                .decrypt(private, &cipher_bytes)
                .map_err(|e| Error::Decryption(e.to_string()))
        }
        _ => Err(Error::UnsupportedAlgorithm(format!(
            "EncryptedKey method: {enc_uri}"
        ))),
    }
}

/// Read and decode `<CipherData>/<CipherValue>` under an element.
fn read_cipher_value(parent: roxmltree::Node<'_, '_>) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    let cipher_data = document::find_child_element(parent, ns::ENC, ns::node::CIPHER_DATA)
        .ok_or_else(|| Error::MissingElement("CipherData".into()))?;
    let cipher_value = document::find_child_element(cipher_data, ns::ENC, ns::node::CIPHER_VALUE)
        .ok_or_else(|| Error::MissingElement("CipherValue".into()))?;
    let text = cipher_value.text().unwrap_or("");
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .map_err(|e| Error::Base64(format!("CipherValue: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigtuna_keys::{loader, Key, KeyData, KeysManager, KeyUsage};

    const AES_TEMPLATE: &str = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#;

    const RSA_TEMPLATE: &str = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-1_5"/><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#;

    const SECRET: &str = "<secret>top</secret>";

    fn aes_ctx() -> EncContext {
        let mut mgr = KeysManager::new();
        mgr.add_key(loader::load_aes_key(&[0x11u8; 16]).unwrap());
        EncContext::new(mgr)
    }

    #[test]
    fn symmetric_round_trip() {
        let encrypted = crate::encrypt::encrypt(&aes_ctx(), AES_TEMPLATE, SECRET.as_bytes())
            .unwrap();
        assert!(encrypted.contains("EncryptedData"));
        assert!(!encrypted.contains("<secret>"));

        let decrypted = decrypt(&aes_ctx(), &encrypted).unwrap();
        assert_eq!(decrypted, SECRET);
    }

    #[test]
    fn rsa_key_transport_round_trip() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();

        let mut enc_mgr = KeysManager::new();
        enc_mgr.add_key(Key::new(
            KeyData::Rsa {
                private: None,
                public: sk.to_public_key(),
            },
            KeyUsage::Any,
        ));
        let encrypted =
            crate::encrypt::encrypt(&EncContext::new(enc_mgr), RSA_TEMPLATE, SECRET.as_bytes())
                .unwrap();

        let mut dec_mgr = KeysManager::new();
        dec_mgr.add_key(Key::new(
            KeyData::Rsa {
                private: Some(sk.clone()),
                public: sk.to_public_key(),
            },
            KeyUsage::Any,
        ));
        let decrypted = decrypt(&EncContext::new(dec_mgr), &encrypted).unwrap();
        assert_eq!(decrypted, SECRET);
    }

    #[test]
    fn wrong_private_key_fails() {
        let sk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let other = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();

        let mut enc_mgr = KeysManager::new();
        enc_mgr.add_key(Key::new(
            KeyData::Rsa {
                private: None,
                public: sk.to_public_key(),
            },
            KeyUsage::Any,
        ));
        let encrypted =
            crate::encrypt::encrypt(&EncContext::new(enc_mgr), RSA_TEMPLATE, SECRET.as_bytes())
                .unwrap();

        let mut dec_mgr = KeysManager::new();
        dec_mgr.add_key(Key::new(
            KeyData::Rsa {
                private: Some(other.clone()),
                public: other.to_public_key(),
            },
            KeyUsage::Any,
        ));
        assert!(decrypt(&EncContext::new(dec_mgr), &encrypted).is_err());
    }

    #[test]
    fn key_name_resolves_a_named_session_key() {
        let template = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes256-gcm"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:KeyName>session</ds:KeyName></ds:KeyInfo><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#;

        let mut mgr = KeysManager::new();
        mgr.add_key(loader::load_aes_key(&[0x22u8; 32]).unwrap().with_name("session"));
        let ctx = EncContext::new(mgr);

        let encrypted = crate::encrypt::encrypt(&ctx, template, SECRET.as_bytes()).unwrap();
        let decrypted = decrypt(&ctx, &encrypted).unwrap();
        assert_eq!(decrypted, SECRET);
    }

    #[test]
    fn missing_encrypted_data_is_an_error() {
        let err = decrypt(&aes_ctx(), "<doc/>").unwrap_err();
        assert!(matches!(err, Error::MissingElement(_)));
    }
}
