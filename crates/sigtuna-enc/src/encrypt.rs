#![forbid(unsafe_code)]

//! XML-Enc encryption from a template.
//!
//! The template must contain an `<EncryptedData>` element with an empty
//! `<CipherValue>`.  When the template carries an `<EncryptedKey>`, a fresh
//! session key is generated and transported with the manager's RSA public
//! key; otherwise the manager's symmetric key encrypts the data directly.

use crate::context::EncContext;
use sigtuna_core::{algorithm, ns, Error};
use sigtuna_crypto::{cipher, keytransport};
use sigtuna_xml::document;
use std::ops::Range;

/// Encrypt `data` into the template, returning the populated XML text.
pub fn encrypt(ctx: &EncContext, template_xml: &str, data: &[u8]) -> Result<String, Error> {
    let doc =
        roxmltree::Document::parse_with_options(template_xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;

    let enc_data = document::find_element(&doc, ns::ENC, ns::node::ENCRYPTED_DATA)
        .ok_or_else(|| Error::MissingElement("EncryptedData".into()))?;

    let enc_uri = document::find_child_element(enc_data, ns::ENC, ns::node::ENCRYPTION_METHOD)
        .and_then(|n| n.attribute(ns::attr::ALGORITHM))
        .ok_or_else(|| Error::MissingElement("EncryptionMethod".into()))?;
    let cipher_alg = cipher::from_uri(enc_uri)?;

    let key_info = document::find_child_element(enc_data, ns::DSIG, ns::node::KEY_INFO);
    let encrypted_keys: Vec<roxmltree::Node<'_, '_>> = key_info
        .map(|ki| document::find_child_elements(ki, ns::ENC, ns::node::ENCRYPTED_KEY))
        .unwrap_or_default();

    let session_key = resolve_session_key(ctx, !encrypted_keys.is_empty(), cipher_alg.key_size())?;

    use base64::Engine;
    let engine = base64::engine::general_purpose::STANDARD;

    let mut patches: Vec<(Range<usize>, String)> = Vec::new();

    // Data CipherValue
    let ciphertext = cipher_alg.encrypt(&session_key, data)?;
    let cv_node = empty_cipher_value(enc_data)?;
    patches.push(fill_element(
        template_xml,
        cv_node,
        &engine.encode(&ciphertext),
    ));

    // Session key transport into each EncryptedKey
    for enc_key in encrypted_keys {
        let key_uri = document::find_child_element(enc_key, ns::ENC, ns::node::ENCRYPTION_METHOD)
            .and_then(|n| n.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("EncryptionMethod on EncryptedKey".into()))?;
        let transport = keytransport::from_uri(key_uri)?;

        let rsa_key = ctx
            .keys_manager
            .find_rsa()
            .ok_or_else(|| Error::Key("no RSA key for EncryptedKey".into()))?;
        let public = rsa_key
            .rsa_public_key()
            .ok_or_else(|| Error::Key("no RSA public key for EncryptedKey".into()))?;

        let wrapped = transport.encrypt(public, &session_key)?;
        let ek_cv = empty_cipher_value(enc_key)?;
        patches.push(fill_element(template_xml, ek_cv, &engine.encode(&wrapped)));
    }

    Ok(apply_patches(template_xml, patches))
}

/// Pick the session key: generated fresh when key transport is in play,
/// otherwise the manager's symmetric key (generated as a last resort).
fn resolve_session_key(
    ctx: &EncContext,
    has_encrypted_key: bool,
    key_size: usize,
) -> Result<Vec<u8>, Error> {
    if !has_encrypted_key {
        if let Ok(key) = ctx.keys_manager.first_key() {
            if let Some(bytes) = key.symmetric_key_bytes() {
                return Ok(bytes.to_vec());
            }
        }
    }
    use rand::RngCore;
    let mut key = vec![0u8; key_size];
    rand::thread_rng().fill_bytes(&mut key);
    Ok(key)
}

/// Find the empty `<CipherData>/<CipherValue>` directly under an element.
fn empty_cipher_value<'a>(
    parent: roxmltree::Node<'a, 'a>,
) -> Result<roxmltree::Node<'a, 'a>, Error> {
    let cipher_data = document::find_child_element(parent, ns::ENC, ns::node::CIPHER_DATA)
        .ok_or_else(|| Error::MissingElement("CipherData".into()))?;
    let cipher_value = document::find_child_element(cipher_data, ns::ENC, ns::node::CIPHER_VALUE)
        .ok_or_else(|| Error::MissingElement("CipherValue".into()))?;
    if !cipher_value.text().unwrap_or("").trim().is_empty() {
        return Err(Error::Other("template CipherValue is not empty".into()));
    }
    Ok(cipher_value)
}

fn fill_element(
    xml: &str,
    node: roxmltree::Node<'_, '_>,
    content: &str,
) -> (Range<usize>, String) {
    let qname = document::source_qname(xml, node);
    (node.range(), format!("<{qname}>{content}</{qname}>"))
}

fn apply_patches(xml: &str, mut patches: Vec<(Range<usize>, String)>) -> String {
    patches.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut result = xml.to_owned();
    for (range, replacement) in patches {
        result.replace_range(range, &replacement);
    }
    result
}
