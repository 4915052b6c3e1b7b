#![forbid(unsafe_code)]

//! XML Canonicalization for signature processing.
//!
//! Implements Canonical XML 1.0 and Exclusive Canonical XML 1.0, each with
//! and without comments, over a subtree of a parsed document.  The subtree
//! may exclude one nested subtree: the enveloped-signature case, where the
//! `<Signature>` element and its descendants are removed from the data
//! being digested.
//!
//! The key difference between the two variants: exclusive C14N only renders
//! "visibly utilized" namespace declarations (the element's own prefix, its
//! attributes' prefixes, and anything in the InclusiveNamespaces
//! PrefixList), while inclusive C14N renders every in-scope declaration not
//! already rendered by an output ancestor.

use crate::escape;
use sigtuna_core::{algorithm, ns, Error};
use std::collections::{BTreeMap, BTreeSet};

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    /// Canonical XML 1.0
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::InclusiveWithComments | Self::ExclusiveWithComments)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Canonicalize a subtree of a parsed document.
///
/// - `node`: the subtree root, either the document node (whole document)
///   or an element.
/// - `exclude`: an optional subtree (identified by its root's `NodeId`)
///   omitted from the output together with all its descendants.
/// - `inclusive_prefixes`: the exc-C14N InclusiveNamespaces PrefixList
///   (`#default` stands for the default namespace); ignored in inclusive
///   modes.
pub fn canonicalize(
    doc: &roxmltree::Document<'_>,
    node: roxmltree::Node<'_, '_>,
    exclude: Option<roxmltree::NodeId>,
    mode: C14nMode,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>, Error> {
    let walker = Canonicalizer {
        doc,
        exclude,
        with_comments: mode.with_comments(),
        exclusive: mode.is_exclusive(),
        inclusive_prefixes: inclusive_prefixes.iter().cloned().collect(),
    };

    let mut out = Vec::new();
    let rendered = BTreeMap::new();
    if node.is_root() {
        walker.render_document(node, &mut out, &rendered)?;
    } else {
        walker.render_element(node, true, &rendered, &mut out)?;
    }
    Ok(out)
}

struct Canonicalizer<'a, 'input> {
    doc: &'a roxmltree::Document<'input>,
    exclude: Option<roxmltree::NodeId>,
    with_comments: bool,
    exclusive: bool,
    inclusive_prefixes: BTreeSet<String>,
}

/// A namespace declaration pending output.  Default namespace sorts first,
/// then by prefix.
#[derive(PartialEq, Eq)]
struct NsDecl {
    prefix: String,
    uri: String,
}

impl NsDecl {
    fn render(&self, out: &mut Vec<u8>) {
        if self.prefix.is_empty() {
            out.extend_from_slice(b" xmlns=\"");
        } else {
            out.extend_from_slice(b" xmlns:");
            out.extend_from_slice(self.prefix.as_bytes());
            out.extend_from_slice(b"=\"");
        }
        out.extend_from_slice(escape::escape_attr(&self.uri).as_bytes());
        out.push(b'"');
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute pending output.  Unqualified attributes sort before
/// qualified ones; qualified attributes sort by (namespace URI, local name).
#[derive(PartialEq, Eq)]
struct OutAttr {
    ns_uri: String,
    local_name: String,
    qualified_name: String,
    value: String,
}

impl OutAttr {
    fn render(&self, out: &mut Vec<u8>) {
        out.push(b' ');
        out.extend_from_slice(self.qualified_name.as_bytes());
        out.extend_from_slice(b"=\"");
        out.extend_from_slice(escape::escape_attr(&self.value).as_bytes());
        out.push(b'"');
    }
}

impl Ord for OutAttr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then(self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for OutAttr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a, 'input> Canonicalizer<'a, 'input> {
    fn is_excluded(&self, node: roxmltree::Node<'_, '_>) -> bool {
        self.exclude == Some(node.id())
    }

    /// Render the children of the document node.  Comments and PIs outside
    /// the document element are separated from it by line feeds per the
    /// C14N spec.
    fn render_document(
        &self,
        doc_node: roxmltree::Node<'_, '_>,
        out: &mut Vec<u8>,
        rendered_ns: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        for child in doc_node.children() {
            if child.is_element() {
                if !self.is_excluded(child) {
                    self.render_element(child, true, rendered_ns, out)?;
                }
            } else if child.is_comment() {
                if self.with_comments {
                    if has_preceding_element(child) {
                        out.push(b'\n');
                    }
                    out.extend_from_slice(b"<!--");
                    out.extend_from_slice(child.text().unwrap_or("").as_bytes());
                    out.extend_from_slice(b"-->");
                    if has_following_element(child) {
                        out.push(b'\n');
                    }
                }
            } else if child.is_pi() {
                if has_preceding_element(child) {
                    out.push(b'\n');
                }
                self.render_pi(child, out);
                if has_following_element(child) {
                    out.push(b'\n');
                }
            }
            // Text outside the document element is not part of the data model.
        }
        Ok(())
    }

    fn render_node(
        &self,
        node: roxmltree::Node<'_, '_>,
        rendered_ns: &BTreeMap<String, String>,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        if self.is_excluded(node) {
            return Ok(());
        }
        if node.is_element() {
            self.render_element(node, false, rendered_ns, out)?;
        } else if node.is_text() {
            out.extend_from_slice(escape::escape_text(node.text().unwrap_or("")).as_bytes());
        } else if node.is_comment() {
            if self.with_comments {
                out.extend_from_slice(b"<!--");
                out.extend_from_slice(node.text().unwrap_or("").as_bytes());
                out.extend_from_slice(b"-->");
            }
        } else if node.is_pi() {
            self.render_pi(node, out);
        }
        Ok(())
    }

    fn render_pi(&self, node: roxmltree::Node<'_, '_>, out: &mut Vec<u8>) {
        if let Some(pi) = node.pi() {
            out.extend_from_slice(b"<?");
            out.extend_from_slice(pi.target.as_bytes());
            if let Some(value) = pi.value {
                if !value.is_empty() {
                    out.push(b' ');
                    out.extend_from_slice(escape::escape_pi(value).as_bytes());
                }
            }
            out.extend_from_slice(b"?>");
        }
    }

    fn render_element(
        &self,
        node: roxmltree::Node<'_, '_>,
        is_subset_root: bool,
        rendered_ns: &BTreeMap<String, String>,
        out: &mut Vec<u8>,
    ) -> Result<(), Error> {
        let qname = self.element_qname(node);
        let elem_prefix = match qname.split_once(':') {
            Some((p, _)) => p.to_owned(),
            None => String::new(),
        };

        // Collect attributes first; their prefixes feed the exclusive
        // visibly-utilized set.
        let mut attrs: Vec<OutAttr> = Vec::new();
        let mut attr_prefixes: BTreeSet<String> = BTreeSet::new();
        for attr in node.attributes() {
            let (ns_uri, prefix) = match attr.namespace() {
                None => (String::new(), None),
                Some(ns::XML) => (ns::XML.to_owned(), Some("xml".to_owned())),
                Some(uri) => {
                    let p = node
                        .lookup_prefix(uri)
                        .unwrap_or_default()
                        .to_owned();
                    (uri.to_owned(), Some(p))
                }
            };
            let qualified = match &prefix {
                Some(p) if !p.is_empty() => format!("{p}:{}", attr.name()),
                _ => attr.name().to_owned(),
            };
            if let Some(p) = &prefix {
                if !p.is_empty() && p != "xml" {
                    attr_prefixes.insert(p.clone());
                }
            }
            attrs.push(OutAttr {
                ns_uri,
                local_name: attr.name().to_owned(),
                qualified_name: qualified,
                value: attr.value().to_owned(),
            });
        }

        // Canonical XML 1.0 document subsets inherit xml:* attributes from
        // ancestors onto the subset root; exclusive C14N does not.
        if !self.exclusive && is_subset_root {
            for (local, value) in self.inherited_xml_attrs(node) {
                attrs.push(OutAttr {
                    ns_uri: ns::XML.to_owned(),
                    local_name: local.clone(),
                    qualified_name: format!("xml:{local}"),
                    value,
                });
            }
        }
        attrs.sort();

        let ns_decls = if self.exclusive {
            self.exclusive_ns_decls(node, &elem_prefix, &attr_prefixes, rendered_ns)
        } else {
            self.inclusive_ns_decls(node, rendered_ns)
        };

        // Start tag
        out.push(b'<');
        out.extend_from_slice(qname.as_bytes());
        for decl in &ns_decls {
            decl.render(out);
        }
        for attr in &attrs {
            attr.render(out);
        }
        out.push(b'>');

        // Children see this element's rendered declarations.
        let mut child_rendered = rendered_ns.clone();
        for decl in &ns_decls {
            child_rendered.insert(decl.prefix.clone(), decl.uri.clone());
        }
        for child in node.children() {
            self.render_node(child, &child_rendered, out)?;
        }

        // End tag
        out.extend_from_slice(b"</");
        out.extend_from_slice(qname.as_bytes());
        out.push(b'>');
        Ok(())
    }

    /// Exclusive C14N: render only visibly utilized declarations that
    /// differ from what the nearest output ancestor rendered.
    fn exclusive_ns_decls(
        &self,
        node: roxmltree::Node<'_, '_>,
        elem_prefix: &str,
        attr_prefixes: &BTreeSet<String>,
        rendered_ns: &BTreeMap<String, String>,
    ) -> Vec<NsDecl> {
        let mut utilized: BTreeSet<String> = BTreeSet::new();
        utilized.insert(elem_prefix.to_owned());
        utilized.extend(attr_prefixes.iter().cloned());
        for p in &self.inclusive_prefixes {
            if p == "#default" {
                utilized.insert(String::new());
            } else {
                utilized.insert(p.clone());
            }
        }

        let mut decls = Vec::new();
        for prefix in utilized {
            if prefix == "xml" {
                continue;
            }
            let lookup = if prefix.is_empty() { None } else { Some(prefix.as_str()) };
            match node.lookup_namespace_uri(lookup) {
                Some(uri) => {
                    if rendered_ns.get(&prefix).map(String::as_str) != Some(uri) {
                        decls.push(NsDecl {
                            prefix,
                            uri: uri.to_owned(),
                        });
                    }
                }
                None => {
                    // Default namespace utilized but not bound: undeclare it
                    // if an output ancestor rendered a non-empty default.
                    if prefix.is_empty()
                        && rendered_ns.get("").is_some_and(|u| !u.is_empty())
                    {
                        decls.push(NsDecl {
                            prefix,
                            uri: String::new(),
                        });
                    }
                }
            }
        }
        decls.sort();
        decls
    }

    /// Inclusive C14N: render every in-scope declaration that differs from
    /// what the nearest output ancestor rendered.
    fn inclusive_ns_decls(
        &self,
        node: roxmltree::Node<'_, '_>,
        rendered_ns: &BTreeMap<String, String>,
    ) -> Vec<NsDecl> {
        let mut decls = Vec::new();
        let mut has_default = false;
        for decl in node.namespaces() {
            let prefix = decl.name().unwrap_or("");
            if prefix == "xml" {
                continue;
            }
            if prefix.is_empty() {
                has_default = true;
            }
            if rendered_ns.get(prefix).map(String::as_str) != Some(decl.uri()) {
                decls.push(NsDecl {
                    prefix: prefix.to_owned(),
                    uri: decl.uri().to_owned(),
                });
            }
        }
        if !has_default && rendered_ns.get("").is_some_and(|u| !u.is_empty()) {
            decls.push(NsDecl {
                prefix: String::new(),
                uri: String::new(),
            });
        }
        decls.sort();
        decls
    }

    /// Collect xml:* attributes declared on ancestors (closest wins) that
    /// are not overridden on the element itself.
    fn inherited_xml_attrs(&self, node: roxmltree::Node<'_, '_>) -> BTreeMap<String, String> {
        let mut inherited: BTreeMap<String, String> = BTreeMap::new();
        let mut current = node.parent();
        while let Some(anc) = current {
            if anc.is_element() {
                for attr in anc.attributes() {
                    if attr.namespace() == Some(ns::XML)
                        && !inherited.contains_key(attr.name())
                    {
                        inherited.insert(attr.name().to_owned(), attr.value().to_owned());
                    }
                }
            }
            current = anc.parent();
        }
        for attr in node.attributes() {
            if attr.namespace() == Some(ns::XML) {
                inherited.remove(attr.name());
            }
        }
        inherited
    }

    /// The element's qualified name exactly as written in the source text.
    fn element_qname(&self, node: roxmltree::Node<'_, '_>) -> String {
        let text = self.doc.input_text();
        let rest = &text[node.range().start + 1..];
        let end = rest
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .unwrap_or(rest.len());
        rest[..end].to_owned()
    }
}

fn has_preceding_element(node: roxmltree::Node<'_, '_>) -> bool {
    let mut sib = node.prev_sibling();
    while let Some(s) = sib {
        if s.is_element() {
            return true;
        }
        sib = s.prev_sibling();
    }
    false
}

fn has_following_element(node: roxmltree::Node<'_, '_>) -> bool {
    let mut sib = node.next_sibling();
    while let Some(s) = sib {
        if s.is_element() {
            return true;
        }
        sib = s.next_sibling();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c14n(xml: &str, mode: C14nMode) -> String {
        let doc = roxmltree::Document::parse(xml).unwrap();
        let out = canonicalize(&doc, doc.root(), None, mode, &[]).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn mode_uris_round_trip() {
        for mode in [
            C14nMode::Inclusive,
            C14nMode::InclusiveWithComments,
            C14nMode::Exclusive,
            C14nMode::ExclusiveWithComments,
        ] {
            assert_eq!(C14nMode::from_uri(mode.uri()), Some(mode));
        }
        assert_eq!(C14nMode::from_uri("urn:nope"), None);
    }

    #[test]
    fn sorts_attributes_and_expands_empty_elements() {
        let xml = r#"<a:root xmlns:a="urn:a" b="2" a="1"><a:child/></a:root>"#;
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            r#"<a:root xmlns:a="urn:a" a="1" b="2"><a:child></a:child></a:root>"#
        );
    }

    #[test]
    fn exclusive_omits_unused_declarations() {
        let xml = r#"<root xmlns="urn:d" xmlns:u="urn:u"><u:x/></root>"#;
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            r#"<root xmlns="urn:d"><u:x xmlns:u="urn:u"></u:x></root>"#
        );
    }

    #[test]
    fn inclusive_renders_inherited_declarations_once() {
        let xml = r#"<root xmlns="urn:d" xmlns:u="urn:u"><u:x/></root>"#;
        assert_eq!(
            c14n(xml, C14nMode::Inclusive),
            r#"<root xmlns="urn:d" xmlns:u="urn:u"><u:x></u:x></root>"#
        );
    }

    #[test]
    fn escapes_text_and_attribute_values() {
        let xml = "<r a=\"x&amp;y\">1 &lt; 2 &amp; 3</r>";
        assert_eq!(
            c14n(xml, C14nMode::Exclusive),
            "<r a=\"x&amp;y\">1 &lt; 2 &amp; 3</r>"
        );
    }

    #[test]
    fn comments_dropped_unless_requested() {
        let xml = "<r><!-- note --><x/></r>";
        assert_eq!(c14n(xml, C14nMode::Exclusive), "<r><x></x></r>");
        assert_eq!(
            c14n(xml, C14nMode::ExclusiveWithComments),
            "<r><!-- note --><x></x></r>"
        );
    }

    #[test]
    fn excluded_subtree_is_omitted() {
        let xml = r#"<r Id="x"><keep/><sig><v/></sig></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let sig = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "sig")
            .unwrap();
        let out = canonicalize(&doc, doc.root(), Some(sig.id()), C14nMode::Exclusive, &[])
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<r Id="x"><keep></keep></r>"#
        );
    }

    #[test]
    fn subtree_canonicalization_pulls_ancestor_bindings() {
        let xml = r#"<r xmlns:p="urn:p"><p:c at="1"><p:d/></p:c></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let c = doc
            .descendants()
            .find(|n| n.is_element() && n.tag_name().name() == "c")
            .unwrap();
        let out = canonicalize(&doc, c, None, C14nMode::Exclusive, &[]).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<p:c xmlns:p="urn:p" at="1"><p:d></p:d></p:c>"#
        );
    }

    #[test]
    fn inclusive_prefix_list_forces_declaration() {
        let xml = r#"<r xmlns:p="urn:p"><c/></r>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let prefixes = vec!["p".to_owned()];
        let out = canonicalize(&doc, doc.root(), None, C14nMode::Exclusive, &prefixes)
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            r#"<r xmlns:p="urn:p"><c></c></r>"#
        );
    }

    #[test]
    fn whitespace_between_elements_is_preserved() {
        let xml = "<r>\n  <a/>\n</r>";
        assert_eq!(c14n(xml, C14nMode::Exclusive), "<r>\n  <a></a>\n</r>");
    }
}
