#![forbid(unsafe_code)]

//! X.509 certificate helpers: parsing, fingerprinting and re-encoding a
//! certificate's RSA public key as a standalone SubjectPublicKeyInfo PEM.

use der::{Decode, Encode};
use sigtuna_core::Error;
use x509_cert::Certificate;

/// Decode a base64 `<X509Certificate>` text payload into DER bytes.
///
/// Whitespace inside the payload (line wrapping) is ignored.
pub fn decode_cert_base64(b64: &str) -> Result<Vec<u8>, Error> {
    use base64::Engine;
    let clean: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(&clean)
        .map_err(|e| Error::MissingCertificate(format!("invalid base64 certificate: {e}")))
}

/// Parse a DER-encoded X.509 certificate.
pub fn parse_der(der: &[u8]) -> Result<Certificate, Error> {
    Certificate::from_der(der)
        .map_err(|e| Error::MissingCertificate(format!("invalid DER certificate: {e}")))
}

/// SHA-1 fingerprint of a certificate's DER bytes, lowercase hex with no
/// separators.
pub fn sha1_fingerprint_hex(der: &[u8]) -> String {
    use sha1::{Digest, Sha1};
    let digest = Sha1::digest(der);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Re-encode the certificate's RSA public key as a standalone
/// SubjectPublicKeyInfo PEM.
///
/// The output is the `SEQUENCE { AlgorithmIdentifier { rsaEncryption, NULL },
/// BIT STRING { SEQUENCE { modulus, exponent } } }` structure, base64-encoded
/// with 64-column wrapping between `-----BEGIN PUBLIC KEY-----` /
/// `-----END PUBLIC KEY-----` delimiters. The verification engine consumes a
/// key in this form rather than a full certificate.
pub fn public_key_pem(cert: &Certificate) -> Result<String, Error> {
    use pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};

    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Certificate(format!("SPKI encode: {e}")))?;
    let public = rsa::RsaPublicKey::from_public_key_der(&spki_der)
        .map_err(|e| Error::Certificate(format!("certificate does not carry an RSA key: {e}")))?;
    public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| Error::Certificate(format!("SPKI PEM encode: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_known_answer() {
        // Fingerprint is plain SHA-1 over the DER bytes
        assert_eq!(
            sha1_fingerprint_hex(b"hello"),
            "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d"
        );
    }

    #[test]
    fn base64_decoding_strips_line_wrapping() {
        let decoded = decode_cert_base64("aGVs\n bG8=").unwrap();
        assert_eq!(decoded, b"hello");
        assert!(decode_cert_base64("!!!").is_err());
    }
}
