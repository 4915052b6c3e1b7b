#![forbid(unsafe_code)]

//! The signed-document facade: fingerprint-anchored signature validation
//! and in-place decryption of encrypted fragments.

use crate::settings::Settings;
use sigtuna_core::{ns, Error};
use sigtuna_dsig::DsigContext;
use sigtuna_enc::EncContext;
use sigtuna_keys::{loader, x509, KeysManager};
use sigtuna_xml::document;
use std::ops::Range;

/// A SAML-style XML document carrying an enveloped signature and,
/// optionally, encrypted fragments.
///
/// `validate` never mutates the document; `decrypt_in_place` rewrites it
/// fragment by fragment.
pub struct SignedDocument {
    xml: String,
    validation_error: Option<String>,
}

impl SignedDocument {
    /// Parse a document from its XML text, verifying well-formedness.
    pub fn parse(text: impl Into<String>) -> Result<Self, Error> {
        let xml = text.into();
        roxmltree::Document::parse_with_options(&xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        Ok(Self {
            xml,
            validation_error: None,
        })
    }

    /// Read and parse a document from a file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(text)
    }

    /// The current serialization of the document.
    pub fn text(&self) -> &str {
        &self.xml
    }

    /// The diagnostic from the last failed `validate` call, if any.
    pub fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }

    /// Validate the document's signature against a trusted certificate
    /// fingerprint.
    ///
    /// `expected_fingerprint` is a colon-delimited hex SHA-1 fingerprint
    /// (case-insensitive), or the literal `"*"`.  The wildcard skips the
    /// certificate check entirely. It is a complete trust bypass and must
    /// only be used when certificate pinning is handled elsewhere.
    ///
    /// Returns `Ok(true)` iff the embedded certificate matches (or the
    /// wildcard was used) and the signature verifies.  On `Ok(false)` a
    /// human-readable diagnostic is available from [`validation_error`].
    /// The only `Err` is [`Error::Initialization`].
    ///
    /// [`validation_error`]: Self::validation_error
    pub fn validate(&mut self, expected_fingerprint: &str) -> Result<bool, Error> {
        crate::init::initialize()?;
        match self.validate_inner(expected_fingerprint) {
            Ok(true) => {
                self.validation_error = None;
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.validation_error = Some(e.to_string());
                Ok(false)
            }
        }
    }

    fn validate_inner(&mut self, expected_fingerprint: &str) -> Result<bool, Error> {
        let doc = roxmltree::Document::parse_with_options(&self.xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;

        // Locate the signer's certificate under the signature's KeyInfo.
        let sig_node = document::find_element(&doc, ns::DSIG, ns::node::SIGNATURE)
            .ok_or(Error::SignatureNodeNotFound)?;
        let key_info = document::find_child_element(sig_node, ns::DSIG, ns::node::KEY_INFO)
            .ok_or_else(|| Error::MissingCertificate("Signature carries no KeyInfo".into()))?;
        let cert_node = document::find_descendant(key_info, ns::DSIG, ns::node::X509_CERTIFICATE)
            .ok_or_else(|| {
                Error::MissingCertificate("KeyInfo carries no X509Certificate".into())
            })?;
        let cert_der = x509::decode_cert_base64(cert_node.text().unwrap_or(""))?;
        let cert = x509::parse_der(&cert_der)?;

        // Check the certificate matches the registered fingerprint, unless
        // the caller explicitly skips this check.
        if expected_fingerprint != "*" {
            let actual = x509::sha1_fingerprint_hex(&cert_der);
            let expected = expected_fingerprint.replace(':', "").to_ascii_lowercase();
            if actual != expected {
                return Err(Error::FingerprintMismatch { expected, actual });
            }
        }

        let public_key_pem = x509::public_key_pem(&cert)?;

        // Verify a copy with the KeyInfo subtree removed, so the embedded
        // certificate cannot be used to validate itself.  Only the
        // fingerprint-matched key above is trusted.
        let ki_range = key_info.range();
        let mut stripped = String::with_capacity(self.xml.len());
        stripped.push_str(&self.xml[..ki_range.start]);
        stripped.push_str(&self.xml[ki_range.end..]);

        self.verify_stripped(&stripped, &public_key_pem)
    }

    fn verify_stripped(&mut self, xml: &str, public_key_pem: &str) -> Result<bool, Error> {
        let mut manager = KeysManager::new();
        manager.add_key(loader::load_rsa_public_pem(public_key_pem.as_bytes())?);

        let mut ctx = DsigContext::new(manager)?;
        // Register ID as an identifier attribute for every element of the
        // re-parsed tree, so #fragment reference URIs resolve.  This is a
        // document-wide policy, not scoped to individual references.
        ctx.add_id_attr("ID");

        let outcome = sigtuna_dsig::verify::verify_document(&ctx, xml)?;
        if outcome.is_valid() {
            Ok(true)
        } else {
            if let Some(detail) = &outcome.detail {
                tracing::debug!(%detail, "signature verification failed");
            }
            self.validation_error = Some(outcome.status.to_string());
            Ok(false)
        }
    }

    /// Replace each decryptable encrypted fragment with its plaintext.
    ///
    /// No-op returning `Ok(true)` when encryption is not configured.
    /// Fragments are processed in document order; a fragment that fails to
    /// decrypt is left exactly as found and logged, and never aborts the
    /// remaining fragments; the call still returns `Ok(true)`.  The only
    /// `Err` is [`Error::Initialization`].
    pub fn decrypt_in_place(&mut self, settings: &Settings) -> Result<bool, Error> {
        crate::init::initialize()?;
        if !settings.encryption_configured {
            return Ok(true);
        }

        let total = match self.count_encrypted_fragments() {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "could not scan document for encrypted fragments");
                return Ok(true);
            }
        };

        // Fragments left undecrypted stay in the tree, so they are skipped
        // by index on subsequent passes.  Each successful substitution is
        // applied before the next fragment is looked up.
        let mut skipped = 0usize;
        for _ in 0..total {
            let step = match self.decrypt_next_fragment(settings, skipped) {
                Ok(step) => step,
                Err(e) => {
                    tracing::warn!(error = %e, "could not process encrypted fragment");
                    break;
                }
            };
            match step {
                DecryptStep::Replaced => {}
                DecryptStep::Skipped => skipped += 1,
                DecryptStep::Exhausted => break,
            }
        }
        Ok(true)
    }

    fn count_encrypted_fragments(&self) -> Result<usize, Error> {
        let doc = roxmltree::Document::parse_with_options(&self.xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        Ok(document::find_elements(&doc, ns::ENC, ns::node::ENCRYPTED_DATA).len())
    }

    /// Decrypt the first unprocessed `<EncryptedData>` and splice the
    /// plaintext over its wrapper element.
    fn decrypt_next_fragment(
        &mut self,
        settings: &Settings,
        skipped: usize,
    ) -> Result<DecryptStep, Error> {
        let doc = roxmltree::Document::parse_with_options(&self.xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        let nodes = document::find_elements(&doc, ns::ENC, ns::node::ENCRYPTED_DATA);
        let Some(node) = nodes.get(skipped).copied() else {
            return Ok(DecryptStep::Exhausted);
        };

        // The decrypted element replaces the encrypted node's wrapper
        // element (EncryptedAssertion and friends); a root-level
        // EncryptedData replaces itself.
        let target_range = match node.parent().filter(|p| p.is_element()) {
            Some(parent) => parent.range(),
            None => node.range(),
        };
        let fragment = self.xml[node.range()].to_owned();

        match self.decrypt_node(settings, &fragment) {
            Some(plaintext) => match splice_plaintext(&mut self.xml, target_range, &plaintext) {
                Ok(()) => Ok(DecryptStep::Replaced),
                Err(e) => {
                    tracing::warn!(error = %e, "decrypted fragment is not usable XML");
                    Ok(DecryptStep::Skipped)
                }
            },
            None => Ok(DecryptStep::Skipped),
        }
    }

    /// Decrypt one serialized `<EncryptedData>` fragment.  Failures are
    /// logged and reported as `None`; they never propagate.
    fn decrypt_node(&self, settings: &Settings, fragment_xml: &str) -> Option<String> {
        match try_decrypt_node(settings, fragment_xml) {
            Ok(plaintext) => Some(plaintext),
            Err(e) => {
                tracing::warn!(error = %e, "could not decrypt fragment");
                None
            }
        }
    }
}

enum DecryptStep {
    Replaced,
    Skipped,
    Exhausted,
}

/// Decrypt a fragment with a fresh key manager and encryption context.
/// The fragment is re-parsed in isolation from the parent document.
fn try_decrypt_node(settings: &Settings, fragment_xml: &str) -> Result<String, Error> {
    let mut manager = KeysManager::new();
    manager.add_key(settings.load_private_key()?);
    let ctx = EncContext::new(manager);
    sigtuna_enc::decrypt::decrypt(&ctx, fragment_xml)
}

/// Splice the root element of `plaintext_xml` over `target` in `xml`.
fn splice_plaintext(
    xml: &mut String,
    target: Range<usize>,
    plaintext_xml: &str,
) -> Result<(), Error> {
    let doc = roxmltree::Document::parse_with_options(plaintext_xml, sigtuna_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    let root_range = doc.root_element().range();
    let replacement = plaintext_xml[root_range].to_owned();
    xml.replace_range(target, &replacement);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use base64::Engine;
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::RsaPrivateKey;
    use sigtuna_keys::{Key, KeyData, KeyUsage};
    use std::sync::OnceLock;

    // ── Fixtures ─────────────────────────────────────────────────────

    struct Identity {
        key: RsaPrivateKey,
        cert_der: Vec<u8>,
        fingerprint: String,
    }

    fn idp() -> &'static Identity {
        static IDP: OnceLock<Identity> = OnceLock::new();
        IDP.get_or_init(|| {
            let key = RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
            let cert_der = self_signed_cert_der(&key);
            let fingerprint = x509::sha1_fingerprint_hex(&cert_der);
            Identity {
                key,
                cert_der,
                fingerprint,
            }
        })
    }

    fn other_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap())
    }

    fn self_signed_cert_der(key: &RsaPrivateKey) -> Vec<u8> {
        use rsa::pkcs1v15::SigningKey as RsaSigningKey;
        use sha2::Sha256;
        use std::str::FromStr;
        use std::time::Duration;
        use x509_cert::builder::{Builder, CertificateBuilder, Profile};
        use x509_cert::der::{Decode, Encode};
        use x509_cert::name::Name;
        use x509_cert::serial_number::SerialNumber;
        use x509_cert::spki::SubjectPublicKeyInfoOwned;
        use x509_cert::time::Validity;

        let serial = SerialNumber::new(&[1u8]).unwrap();
        let validity = Validity::from_now(Duration::from_secs(3600)).unwrap();
        let subject = Name::from_str("CN=sigtuna test idp").unwrap();
        let spki_der = key.to_public_key().to_public_key_der().unwrap();
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap();
        let signer = RsaSigningKey::<Sha256>::new(key.clone());
        let builder =
            CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signer)
                .unwrap();
        let cert = builder.build::<rsa::pkcs1v15::Signature>().unwrap();
        cert.to_der().unwrap()
    }

    /// A signed SAML-style response carrying the signer's certificate.
    fn signed_response(identity: &Identity, subject: &str) -> String {
        let cert_b64 = base64::engine::general_purpose::STANDARD.encode(&identity.cert_der);
        let template = format!(
            r##"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol" xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="resp1" Version="2.0"><saml:Issuer>https://idp.example.org</saml:Issuer><ds:Signature xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><ds:SignedInfo><ds:CanonicalizationMethod Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/><ds:SignatureMethod Algorithm="http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"/><ds:Reference URI="#resp1"><ds:Transforms><ds:Transform Algorithm="http://www.w3.org/2000/09/xmldsig#enveloped-signature"/><ds:Transform Algorithm="http://www.w3.org/2001/10/xml-exc-c14n#"/></ds:Transforms><ds:DigestMethod Algorithm="http://www.w3.org/2001/04/xmlenc#sha256"/><ds:DigestValue></ds:DigestValue></ds:Reference></ds:SignedInfo><ds:SignatureValue></ds:SignatureValue><ds:KeyInfo><ds:X509Data><ds:X509Certificate>{cert_b64}</ds:X509Certificate></ds:X509Data></ds:KeyInfo></ds:Signature><saml:Assertion ID="a1"><saml:Subject>{subject}</saml:Subject></saml:Assertion></samlp:Response>"##
        );

        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(
            KeyData::Rsa {
                private: Some(identity.key.clone()),
                public: identity.key.to_public_key(),
            },
            KeyUsage::Any,
        ));
        let ctx = DsigContext::new(mgr).unwrap();
        sigtuna_dsig::sign::sign(&ctx, &template).unwrap()
    }

    const ENC_TEMPLATE: &str = r#"<xenc:EncryptedData xmlns:xenc="http://www.w3.org/2001/04/xmlenc#" Type="http://www.w3.org/2001/04/xmlenc#Element"><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#aes128-cbc"/><ds:KeyInfo xmlns:ds="http://www.w3.org/2000/09/xmldsig#"><xenc:EncryptedKey><xenc:EncryptionMethod Algorithm="http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p"/><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedKey></ds:KeyInfo><xenc:CipherData><xenc:CipherValue></xenc:CipherValue></xenc:CipherData></xenc:EncryptedData>"#;

    const ASSERTION: &str = r#"<saml:Assertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion" ID="a1"><saml:Subject>alice</saml:Subject></saml:Assertion>"#;

    /// A response whose assertion is encrypted to the given public key.
    fn encrypted_response(recipient: &RsaPrivateKey) -> String {
        let mut mgr = KeysManager::new();
        mgr.add_key(Key::new(
            KeyData::Rsa {
                private: None,
                public: recipient.to_public_key(),
            },
            KeyUsage::Any,
        ));
        let ctx = EncContext::new(mgr);
        let enc = sigtuna_enc::encrypt::encrypt(&ctx, ENC_TEMPLATE, ASSERTION.as_bytes()).unwrap();
        format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"><saml:EncryptedAssertion xmlns:saml="urn:oasis:names:tc:SAML:2.0:assertion">{enc}</saml:EncryptedAssertion></samlp:Response>"#
        )
    }

    fn pem_settings(key: &RsaPrivateKey) -> Settings {
        Settings::with_private_key_pem(key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string())
    }

    fn colonize(fingerprint: &str) -> String {
        fingerprint
            .as_bytes()
            .chunks(2)
            .map(|c| std::str::from_utf8(c).unwrap().to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(":")
    }

    // ── validate ─────────────────────────────────────────────────────

    #[test]
    fn valid_signature_with_matching_fingerprint() {
        let identity = idp();
        let mut doc = SignedDocument::parse(signed_response(identity, "alice")).unwrap();
        assert!(doc.validate(&identity.fingerprint).unwrap());
        assert!(doc.validation_error().is_none());
    }

    #[test]
    fn fingerprint_comparison_normalizes_colons_and_case() {
        let identity = idp();
        let mut doc = SignedDocument::parse(signed_response(identity, "alice")).unwrap();
        assert!(doc.validate(&colonize(&identity.fingerprint)).unwrap());
    }

    #[test]
    fn wildcard_bypasses_fingerprint_check() {
        let identity = idp();
        let mut doc = SignedDocument::parse(signed_response(identity, "alice")).unwrap();
        assert!(doc.validate("*").unwrap());
    }

    #[test]
    fn mismatched_fingerprint_is_rejected_with_diagnostic() {
        let identity = idp();
        let mut doc = SignedDocument::parse(signed_response(identity, "alice")).unwrap();
        let bogus = "00:11:22:33:44:55:66:77:88:99:aa:bb:cc:dd:ee:ff:00:11:22:33";
        assert!(!doc.validate(bogus).unwrap());
        let diag = doc.validation_error().unwrap();
        assert!(diag.starts_with("Invalid fingerprint (expected 00112233"));
        assert!(diag.contains(&identity.fingerprint));
    }

    #[test]
    fn altered_signed_byte_fails_with_diagnostic() {
        let identity = idp();
        let signed = signed_response(identity, "alice");
        let tampered = signed.replace(">alice<", ">mallory-was-here<");
        assert_ne!(signed, tampered);

        let mut doc = SignedDocument::parse(tampered).unwrap();
        assert!(!doc.validate(&identity.fingerprint).unwrap());
        assert_eq!(doc.validation_error(), Some("Invalid"));
    }

    #[test]
    fn wildcard_does_not_rescue_a_broken_signature() {
        let identity = idp();
        let tampered = signed_response(identity, "alice").replace(">alice<", ">bob<");
        let mut doc = SignedDocument::parse(tampered).unwrap();
        assert!(!doc.validate("*").unwrap());
    }

    #[test]
    fn missing_signature_reports_not_found() {
        let mut doc = SignedDocument::parse("<doc><x/></doc>").unwrap();
        assert!(!doc.validate("*").unwrap());
        assert_eq!(doc.validation_error(), Some("Signature node not found"));
    }

    #[test]
    fn validate_never_mutates_the_document() {
        let identity = idp();
        let signed = signed_response(identity, "alice");
        let mut doc = SignedDocument::parse(signed.clone()).unwrap();
        doc.validate(&identity.fingerprint).unwrap();
        doc.validate("00:11:22").unwrap();
        assert_eq!(doc.text(), signed);
    }

    // ── decrypt_in_place ─────────────────────────────────────────────

    #[test]
    fn decrypt_is_a_noop_when_not_configured() {
        let original = encrypted_response(other_key());
        let mut doc = SignedDocument::parse(original.clone()).unwrap();
        assert!(doc.decrypt_in_place(&Settings::disabled()).unwrap());
        assert_eq!(doc.text(), original);
    }

    #[test]
    fn decrypt_with_no_fragments_leaves_document_unchanged() {
        let original = r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol"><x/></samlp:Response>"#;
        let mut doc = SignedDocument::parse(original).unwrap();
        assert!(doc.decrypt_in_place(&pem_settings(other_key())).unwrap());
        assert_eq!(doc.text(), original);
    }

    #[test]
    fn decrypt_round_trip_replaces_the_wrapper_element() {
        let recipient = other_key();
        let mut doc = SignedDocument::parse(encrypted_response(recipient)).unwrap();
        assert!(doc.decrypt_in_place(&pem_settings(recipient)).unwrap());

        let text = doc.text();
        assert!(!text.contains("EncryptedData"));
        assert!(!text.contains("EncryptedAssertion"));
        assert!(text.contains(ASSERTION));

        // Still well-formed, and the assertion sits under the response root
        let parsed = roxmltree::Document::parse(text).unwrap();
        let assertion = parsed
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "Assertion")
            .unwrap();
        assert_eq!(assertion.parent().unwrap().tag_name().name(), "Response");
        assert_eq!(
            assertion
                .descendants()
                .find(|n| n.is_text())
                .and_then(|n| n.text()),
            Some("alice")
        );
    }

    #[test]
    fn mismatched_key_leaves_fragment_untouched_and_succeeds() {
        let original = encrypted_response(other_key());
        let mut doc = SignedDocument::parse(original.clone()).unwrap();

        // A key that does not match the one the assertion was encrypted to
        let wrong = idp();
        assert!(doc.decrypt_in_place(&pem_settings(&wrong.key)).unwrap());
        assert_eq!(doc.text(), original);
        assert!(doc.text().contains("EncryptedData"));
    }

    #[test]
    fn fragment_failures_do_not_block_later_fragments() {
        let recipient = other_key();
        let good = encrypted_response(recipient);

        // First fragment's session key is corrupted; the second is intact.
        let inner_good = &good["<samlp:Response xmlns:samlp=\"urn:oasis:names:tc:SAML:2.0:protocol\">".len()
            ..good.len() - "</samlp:Response>".len()];
        let inner_bad = {
            let marker = "<xenc:CipherValue>";
            let start = inner_good.find(marker).unwrap() + marker.len();
            let mut s = inner_good.to_owned();
            s.replace_range(start..start + 8, "AAAAAAAA");
            s
        };
        let combined = format!(
            r#"<samlp:Response xmlns:samlp="urn:oasis:names:tc:SAML:2.0:protocol">{inner_bad}{inner_good}</samlp:Response>"#
        );

        let mut doc = SignedDocument::parse(combined).unwrap();
        assert!(doc.decrypt_in_place(&pem_settings(recipient)).unwrap());

        // One fragment decrypted, the corrupted one is still there
        assert!(doc.text().contains(ASSERTION));
        assert!(doc.text().contains("EncryptedData"));
    }
}
