#![forbid(unsafe_code)]

//! XML-DSig signature verification.
//!
//! Processing order:
//! 1. Parse the document, register ID attributes
//! 2. Find `<Signature>`, read `<SignedInfo>`: CanonicalizationMethod,
//!    SignatureMethod
//! 3. For each `<Reference>`: resolve URI, run transforms, compute digest,
//!    compare
//! 4. Canonicalize `<SignedInfo>` and verify `<SignatureValue>`
//!
//! Verification keys come exclusively from the context's keys manager.
//! `<KeyInfo>` content inside the verified document is ignored: the caller
//! decides which key to trust before verification starts.

use crate::context::DsigContext;
use sigtuna_core::{algorithm, ns, Error};
use sigtuna_crypto::{digest, sign};
use sigtuna_xml::c14n::{self, C14nMode};
use sigtuna_xml::document;
use std::collections::HashMap;

/// Signature processing status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DsigStatus {
    /// Verification has not produced a decision.
    #[default]
    Unknown,
    /// The signature verified.
    Succeeded,
    /// The signature (or a reference digest) did not verify.
    Invalid,
}

impl std::fmt::Display for DsigStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Unknown => "Unknown",
            Self::Succeeded => "Succeeded",
            Self::Invalid => "Invalid",
        };
        f.write_str(name)
    }
}

/// Result of verifying a document.
#[derive(Debug)]
pub struct VerifyOutcome {
    pub status: DsigStatus,
    /// Additional information about a non-success, when available.
    pub detail: Option<String>,
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        self.status == DsigStatus::Succeeded
    }

    fn invalid(detail: impl Into<String>) -> Self {
        Self {
            status: DsigStatus::Invalid,
            detail: Some(detail.into()),
        }
    }
}

/// Verify a signed XML document against the context's trusted key.
pub fn verify_document(ctx: &DsigContext, xml: &str) -> Result<VerifyOutcome, Error> {
    let doc = roxmltree::Document::parse_with_options(xml, sigtuna_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;

    let extra: Vec<&str> = ctx.id_attrs.iter().map(String::as_str).collect();
    let id_map = document::build_id_map(&doc, &extra);

    let sig_node = document::find_element(&doc, ns::DSIG, ns::node::SIGNATURE)
        .ok_or(Error::SignatureNodeNotFound)?;
    let signed_info = document::find_child_element(sig_node, ns::DSIG, ns::node::SIGNED_INFO)
        .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;

    // CanonicalizationMethod
    let c14n_node =
        document::find_child_element(signed_info, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
            .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?;
    let c14n_uri = c14n_node
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on CanonicalizationMethod".into()))?;
    let c14n_mode = C14nMode::from_uri(c14n_uri)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("C14N: {c14n_uri}")))?;
    let inclusive_prefixes = read_inclusive_prefixes(c14n_node);

    // SignatureMethod
    let sig_method_node =
        document::find_child_element(signed_info, ns::DSIG, ns::node::SIGNATURE_METHOD)
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;
    let sig_method_uri = sig_method_node
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on SignatureMethod".into()))?;

    // Verify each Reference digest
    let references = document::find_child_elements(signed_info, ns::DSIG, ns::node::REFERENCE);
    if references.is_empty() {
        return Err(Error::MissingElement("Reference".into()));
    }
    for reference in &references {
        if let Some(reason) = verify_reference(reference, &doc, &id_map, sig_node)? {
            return Ok(VerifyOutcome::invalid(reason));
        }
    }

    // Canonicalize SignedInfo
    let c14n_signed_info =
        c14n::canonicalize(&doc, signed_info, None, c14n_mode, &inclusive_prefixes)?;

    // Verify SignatureValue with the manager's trusted key
    let sig_value_node =
        document::find_child_element(sig_node, ns::DSIG, ns::node::SIGNATURE_VALUE)
            .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
    let sig_value = decode_base64_text(sig_value_node.text().unwrap_or(""), "SignatureValue")?;

    let key = ctx
        .keys_manager
        .find_rsa()
        .ok_or_else(|| Error::Key("no RSA key in manager".into()))?;
    let public = key
        .rsa_public_key()
        .ok_or_else(|| Error::Key("no RSA public key in manager".into()))?;

    let sig_alg = sign::from_uri(sig_method_uri)?;
    let valid = sig_alg
        .verify(
            &sign::SigningKey::RsaPublic(public.clone()),
            &c14n_signed_info,
            &sig_value,
        )
        .map_err(|e| Error::Verification(e.to_string()))?;

    if valid {
        Ok(VerifyOutcome {
            status: DsigStatus::Succeeded,
            detail: None,
        })
    } else {
        Ok(VerifyOutcome::invalid("signature value verification failed"))
    }
}

/// Verify a single `<Reference>` digest.  Returns `Some(reason)` on
/// mismatch, `None` when the digest matches.
fn verify_reference(
    reference: &roxmltree::Node<'_, '_>,
    doc: &roxmltree::Document<'_>,
    id_map: &HashMap<String, roxmltree::NodeId>,
    sig_node: roxmltree::Node<'_, '_>,
) -> Result<Option<String>, Error> {
    let uri = reference.attribute(ns::attr::URI).unwrap_or("");

    let digest_method = document::find_child_element(*reference, ns::DSIG, ns::node::DIGEST_METHOD)
        .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?;
    let digest_uri = digest_method
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?;

    let digest_value = document::find_child_element(*reference, ns::DSIG, ns::node::DIGEST_VALUE)
        .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
    let expected = decode_base64_text(digest_value.text().unwrap_or(""), "DigestValue")?;

    let target = resolve_reference_uri(uri, doc, id_map)?;

    // Transforms: enveloped-signature and C14N variants.  URI-selected data
    // is a node set, so the default octet conversion is inclusive C14N
    // without comments.
    let mut exclude = None;
    let mut mode = C14nMode::Inclusive;
    let mut prefixes: Vec<String> = Vec::new();

    if let Some(transforms) =
        document::find_child_element(*reference, ns::DSIG, ns::node::TRANSFORMS)
    {
        for transform in document::find_child_elements(transforms, ns::DSIG, ns::node::TRANSFORM) {
            let alg = transform.attribute(ns::attr::ALGORITHM).unwrap_or("");
            match alg {
                algorithm::ENVELOPED_SIGNATURE => {
                    exclude = Some(sig_node.id());
                }
                _ => {
                    if let Some(m) = C14nMode::from_uri(alg) {
                        mode = m;
                        prefixes = read_inclusive_prefixes(transform);
                    } else {
                        return Err(Error::UnsupportedAlgorithm(format!("transform: {alg}")));
                    }
                }
            }
        }
    }

    let bytes = c14n::canonicalize(doc, target, exclude, mode, &prefixes)?;
    let computed = digest::digest(digest_uri, &bytes)?;

    if computed == expected {
        Ok(None)
    } else {
        Ok(Some(format!("reference URI={uri}: digest mismatch")))
    }
}

/// Resolve a reference URI to its target node.  `""` selects the whole
/// document; `#id` selects the element registered under that identifier.
fn resolve_reference_uri<'a>(
    uri: &str,
    doc: &'a roxmltree::Document<'a>,
    id_map: &HashMap<String, roxmltree::NodeId>,
) -> Result<roxmltree::Node<'a, 'a>, Error> {
    if uri.is_empty() {
        return Ok(doc.root());
    }
    if let Some(id) = uri.strip_prefix('#') {
        return document::find_by_id(doc, id_map, id)
            .ok_or_else(|| Error::InvalidUri(format!("cannot resolve reference URI #{id}")));
    }
    Err(Error::InvalidUri(format!(
        "external URI not supported: {uri}"
    )))
}

pub(crate) fn read_inclusive_prefixes(node: roxmltree::Node<'_, '_>) -> Vec<String> {
    for child in node.children() {
        if child.is_element() && child.tag_name().name() == ns::node::INCLUSIVE_NAMESPACES {
            if let Some(prefix_list) = child.attribute(ns::attr::PREFIX_LIST) {
                return prefix_list
                    .split_whitespace()
                    .map(ToOwned::to_owned)
                    .collect();
            }
        }
    }
    Vec::new()
}

pub(crate) fn decode_base64_text(text: &str, what: &str) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sigtuna_keys::{Key, KeyData, KeysManager, KeyUsage};

    const TEMPLATE: &str = r##"<doc xmlns:ds="http://www.w3.org/2000/09/xmldsig#" ID="data1"><payload>hello</payload><ds:Signature><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#data1"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue></ds:SignatureValue></ds:Signature></doc>"##;

    fn keypair() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap()
    }

    fn ctx_with(private: Option<rsa::RsaPrivateKey>, public: rsa::RsaPublicKey) -> DsigContext {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(KeyData::Rsa { private, public }, KeyUsage::Any));
        DsigContext::new(mgr).unwrap()
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let sk = keypair();
        let sign_ctx = ctx_with(Some(sk.clone()), sk.to_public_key());
        let signed = crate::sign::sign(&sign_ctx, TEMPLATE).unwrap();

        let verify_ctx = ctx_with(None, sk.to_public_key());
        let outcome = verify_document(&verify_ctx, &signed).unwrap();
        assert_eq!(outcome.status, DsigStatus::Succeeded);
    }

    #[test]
    fn altered_payload_is_invalid() {
        let sk = keypair();
        let sign_ctx = ctx_with(Some(sk.clone()), sk.to_public_key());
        let signed = crate::sign::sign(&sign_ctx, TEMPLATE).unwrap();
        let tampered = signed.replace(">hello<", ">hellp<");
        assert_ne!(signed, tampered);

        let verify_ctx = ctx_with(None, sk.to_public_key());
        let outcome = verify_document(&verify_ctx, &tampered).unwrap();
        assert_eq!(outcome.status, DsigStatus::Invalid);
        assert!(outcome.detail.unwrap().contains("digest mismatch"));
    }

    #[test]
    fn wrong_trusted_key_is_invalid() {
        let sk = keypair();
        let sign_ctx = ctx_with(Some(sk.clone()), sk.to_public_key());
        let signed = crate::sign::sign(&sign_ctx, TEMPLATE).unwrap();

        // Manager holds a different key: reference digests match, but the
        // signature value must not verify.
        let other = keypair();
        let verify_ctx = ctx_with(None, other.to_public_key());
        let outcome = verify_document(&verify_ctx, &signed).unwrap();
        assert_eq!(outcome.status, DsigStatus::Invalid);
    }

    #[test]
    fn missing_signature_node_is_an_error() {
        let sk = keypair();
        let ctx = ctx_with(None, sk.to_public_key());
        let err = verify_document(&ctx, "<doc><payload/></doc>").unwrap_err();
        assert!(matches!(err, Error::SignatureNodeNotFound));
    }

    #[test]
    fn context_requires_a_verification_key() {
        let mgr = KeysManager::new();
        assert!(matches!(
            DsigContext::new(mgr),
            Err(Error::ContextCreation(_))
        ));
    }

    #[test]
    fn status_names() {
        assert_eq!(DsigStatus::Succeeded.to_string(), "Succeeded");
        assert_eq!(DsigStatus::Invalid.to_string(), "Invalid");
        assert_eq!(DsigStatus::default().to_string(), "Unknown");
    }
}
