#![forbid(unsafe_code)]

//! XML document access for the Sigtuna XML security layer.
//!
//! Provides a thin layer over `roxmltree` (ID-attribute registration,
//! namespace-aware lookup) plus the canonicalization needed for signature
//! processing.

pub mod c14n;
pub mod document;
pub mod escape;

pub use document::XmlDocument;

/// Return roxmltree parsing options that allow DTD.
///
/// roxmltree does not expand external entities or perform entity
/// substitution beyond the five predefined XML entities, so allowing a DTD
/// is safe and keeps documents with internal entity definitions parseable.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}
