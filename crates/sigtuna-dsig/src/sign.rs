#![forbid(unsafe_code)]

//! XML-DSig signature creation from a template.
//!
//! The template must contain a `<Signature>` element with empty
//! `<DigestValue>` and `<SignatureValue>` elements.  Reference digests are
//! computed first (they never cover the Signature subtree they live in, so
//! filling them is order-safe), then `<SignedInfo>` is canonicalized and
//! signed.

use crate::context::DsigContext;
use crate::verify::read_inclusive_prefixes;
use sigtuna_core::{algorithm, ns, Error};
use sigtuna_crypto::{digest, sign as crypto_sign};
use sigtuna_xml::c14n::{self, C14nMode};
use sigtuna_xml::document;
use std::collections::HashMap;
use std::ops::Range;

/// Sign an XML template document, returning the signed XML text.
pub fn sign(ctx: &DsigContext, template_xml: &str) -> Result<String, Error> {
    let doc =
        roxmltree::Document::parse_with_options(template_xml, sigtuna_xml::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;

    let extra: Vec<&str> = ctx.id_attrs.iter().map(String::as_str).collect();
    let id_map = document::build_id_map(&doc, &extra);

    let sig_node = document::find_element(&doc, ns::DSIG, ns::node::SIGNATURE)
        .ok_or(Error::SignatureNodeNotFound)?;
    let signed_info = document::find_child_element(sig_node, ns::DSIG, ns::node::SIGNED_INFO)
        .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;

    let sig_method_uri =
        document::find_child_element(signed_info, ns::DSIG, ns::node::SIGNATURE_METHOD)
            .and_then(|n| n.attribute(ns::attr::ALGORITHM))
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?
            .to_owned();

    // Pass 1: fill in each Reference digest.
    let mut patches: Vec<(Range<usize>, String)> = Vec::new();
    let references = document::find_child_elements(signed_info, ns::DSIG, ns::node::REFERENCE);
    if references.is_empty() {
        return Err(Error::MissingElement("Reference".into()));
    }
    for reference in &references {
        let digest_b64 = reference_digest(reference, &doc, &id_map, sig_node)?;
        let dv_node = document::find_child_element(*reference, ns::DSIG, ns::node::DIGEST_VALUE)
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
        patches.push(fill_element(template_xml, dv_node, &digest_b64)?);
    }
    let filled = apply_patches(template_xml, patches);

    // Pass 2: canonicalize SignedInfo and sign it.
    let doc = roxmltree::Document::parse_with_options(&filled, sigtuna_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    let sig_node = document::find_element(&doc, ns::DSIG, ns::node::SIGNATURE)
        .ok_or(Error::SignatureNodeNotFound)?;
    let signed_info = document::find_child_element(sig_node, ns::DSIG, ns::node::SIGNED_INFO)
        .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;

    let c14n_node =
        document::find_child_element(signed_info, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
            .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?;
    let c14n_uri = c14n_node
        .attribute(ns::attr::ALGORITHM)
        .ok_or_else(|| Error::MissingAttribute("Algorithm on CanonicalizationMethod".into()))?;
    let c14n_mode = C14nMode::from_uri(c14n_uri)
        .ok_or_else(|| Error::UnsupportedAlgorithm(format!("C14N: {c14n_uri}")))?;
    let prefixes = read_inclusive_prefixes(c14n_node);

    let c14n_signed_info = c14n::canonicalize(&doc, signed_info, None, c14n_mode, &prefixes)?;

    let key = ctx
        .keys_manager
        .find_rsa_private()
        .ok_or_else(|| Error::Key("no RSA private key in manager".into()))?;
    let private = key
        .rsa_private_key()
        .ok_or_else(|| Error::Key("no RSA private key in manager".into()))?;

    let sig_alg = crypto_sign::from_uri(&sig_method_uri)?;
    let signature = sig_alg.sign(
        &crypto_sign::SigningKey::Rsa(private.clone()),
        &c14n_signed_info,
    )?;

    use base64::Engine;
    let sig_b64 = base64::engine::general_purpose::STANDARD.encode(&signature);
    let sv_node = document::find_child_element(sig_node, ns::DSIG, ns::node::SIGNATURE_VALUE)
        .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
    let patch = fill_element(&filled, sv_node, &sig_b64)?;
    Ok(apply_patches(&filled, vec![patch]))
}

/// Compute a Reference's digest over its canonicalized target, base64.
fn reference_digest(
    reference: &roxmltree::Node<'_, '_>,
    doc: &roxmltree::Document<'_>,
    id_map: &HashMap<String, roxmltree::NodeId>,
    sig_node: roxmltree::Node<'_, '_>,
) -> Result<String, Error> {
    let uri = reference.attribute(ns::attr::URI).unwrap_or("");
    let digest_uri = document::find_child_element(*reference, ns::DSIG, ns::node::DIGEST_METHOD)
        .and_then(|n| n.attribute(ns::attr::ALGORITHM))
        .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?;

    let target = if uri.is_empty() {
        doc.root()
    } else if let Some(id) = uri.strip_prefix('#') {
        document::find_by_id(doc, id_map, id)
            .ok_or_else(|| Error::InvalidUri(format!("cannot resolve reference URI #{id}")))?
    } else {
        return Err(Error::InvalidUri(format!("unsupported URI: {uri}")));
    };

    let mut exclude = None;
    let mut mode = C14nMode::Inclusive;
    let mut prefixes: Vec<String> = Vec::new();
    if let Some(transforms) =
        document::find_child_element(*reference, ns::DSIG, ns::node::TRANSFORMS)
    {
        for transform in document::find_child_elements(transforms, ns::DSIG, ns::node::TRANSFORM) {
            let alg = transform.attribute(ns::attr::ALGORITHM).unwrap_or("");
            match alg {
                algorithm::ENVELOPED_SIGNATURE => exclude = Some(sig_node.id()),
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

    use base64::Engine;
    Ok(base64::engine::general_purpose::STANDARD.encode(&computed))
}

/// Build a patch replacing an empty element with one containing `content`.
fn fill_element(
    xml: &str,
    node: roxmltree::Node<'_, '_>,
    content: &str,
) -> Result<(Range<usize>, String), Error> {
    if !node.text().unwrap_or("").trim().is_empty() {
        return Err(Error::Other(format!(
            "template element {} is not empty",
            node.tag_name().name()
        )));
    }
    let qname = document::source_qname(xml, node);
    Ok((node.range(), format!("<{qname}>{content}</{qname}>")))
}

/// Apply byte-range patches to the source text, later ranges first so
/// earlier offsets stay valid.
fn apply_patches(xml: &str, mut patches: Vec<(Range<usize>, String)>) -> String {
    patches.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    let mut result = xml.to_owned();
    for (range, replacement) in patches {
        result.replace_range(range, &replacement);
    }
    result
}
