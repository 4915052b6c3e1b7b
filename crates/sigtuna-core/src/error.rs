#![forbid(unsafe_code)]

/// Errors produced by the Sigtuna XML security layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("missing or malformed certificate: {0}")]
    MissingCertificate(String),

    #[error("Invalid fingerprint (expected {expected}, got {actual})")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("failed to load key: {0}")]
    KeyLoad(String),

    #[error("Signature node not found")]
    SignatureNodeNotFound,

    #[error("failed to create context: {0}")]
    ContextCreation(String),

    #[error("signature verification failed: {0}")]
    Verification(String),

    #[error("decryption failed: {0}")]
    Decryption(String),

    #[error("initialization failed: {0}")]
    Initialization(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("missing required element: {0}")]
    MissingElement(String),

    #[error("missing required attribute: {0}")]
    MissingAttribute(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("cryptographic error: {0}")]
    Crypto(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("invalid URI reference: {0}")]
    InvalidUri(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_mismatch_message_format() {
        let e = Error::FingerprintMismatch {
            expected: "aabb".into(),
            actual: "ccdd".into(),
        };
        assert_eq!(e.to_string(), "Invalid fingerprint (expected aabb, got ccdd)");
    }
}
