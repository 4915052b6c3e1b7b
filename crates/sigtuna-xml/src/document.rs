#![forbid(unsafe_code)]

//! XML document wrapper with ID attribute registration and namespace-aware
//! element lookup.

use sigtuna_core::Error;
use std::collections::HashMap;

/// Attribute names registered as element identifiers by default.
pub const DEFAULT_ID_ATTRS: [&str; 3] = ["Id", "ID", "id"];

/// An owned XML document.  Stores the text; parsed trees are temporary and
/// borrow from it.
pub struct XmlDocument {
    text: String,
    /// Additional ID attribute names to register beyond the defaults.
    extra_id_attrs: Vec<String>,
}

impl XmlDocument {
    /// Parse and validate XML from a string, taking ownership.
    pub fn parse(text: String) -> Result<Self, Error> {
        let _doc = roxmltree::Document::parse_with_options(&text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        Ok(Self {
            text,
            extra_id_attrs: Vec::new(),
        })
    }

    /// Parse and validate XML from bytes.
    pub fn parse_bytes(data: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?
            .to_owned();
        Self::parse(text)
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Register an additional ID attribute name.
    pub fn add_id_attr(&mut self, name: &str) {
        self.extra_id_attrs.push(name.to_owned());
    }

    /// Parse the document and return a temporary `roxmltree::Document`.
    pub fn parse_doc(&self) -> Result<roxmltree::Document<'_>, Error> {
        roxmltree::Document::parse_with_options(&self.text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))
    }

    /// Build the ID -> NodeId mapping for a parsed document, using the
    /// default ID attributes plus any registered extras.
    pub fn build_id_map<'a>(
        &self,
        doc: &'a roxmltree::Document<'a>,
    ) -> HashMap<String, roxmltree::NodeId> {
        let extra: Vec<&str> = self.extra_id_attrs.iter().map(String::as_str).collect();
        build_id_map(doc, &extra)
    }
}

/// Build an ID -> NodeId mapping over every element of a parsed document.
///
/// `extra_attrs` is appended to [`DEFAULT_ID_ATTRS`].
pub fn build_id_map(
    doc: &roxmltree::Document<'_>,
    extra_attrs: &[&str],
) -> HashMap<String, roxmltree::NodeId> {
    let mut map = HashMap::new();
    for node in doc.descendants() {
        if !node.is_element() {
            continue;
        }
        for attr_name in DEFAULT_ID_ATTRS.iter().chain(extra_attrs.iter()) {
            if let Some(val) = node.attribute(*attr_name) {
                map.insert(val.to_owned(), node.id());
            }
        }
    }
    map
}

/// Find an element by its registered ID value.
pub fn find_by_id<'a>(
    doc: &'a roxmltree::Document<'a>,
    id_map: &HashMap<String, roxmltree::NodeId>,
    id: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    let node_id = id_map.get(id)?;
    doc.get_node(*node_id)
}

/// Find the first descendant element with the given namespace and local name.
pub fn find_element<'a>(
    doc: &'a roxmltree::Document<'a>,
    ns_uri: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    doc.descendants().find(|n| is_named(*n, ns_uri, local_name))
}

/// Find all descendant elements with the given namespace and local name, in
/// document order.
pub fn find_elements<'a>(
    doc: &'a roxmltree::Document<'a>,
    ns_uri: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'a>> {
    doc.descendants()
        .filter(|n| is_named(*n, ns_uri, local_name))
        .collect()
}

/// Find the first direct child element with the given namespace and local name.
pub fn find_child_element<'a>(
    parent: roxmltree::Node<'a, 'a>,
    ns_uri: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    parent.children().find(|n| is_named(*n, ns_uri, local_name))
}

/// Find all direct child elements with the given namespace and local name.
pub fn find_child_elements<'a>(
    parent: roxmltree::Node<'a, 'a>,
    ns_uri: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'a>> {
    parent
        .children()
        .filter(|n| is_named(*n, ns_uri, local_name))
        .collect()
}

/// Find the first descendant of `root` (including `root` itself) with the
/// given namespace and local name.
pub fn find_descendant<'a>(
    root: roxmltree::Node<'a, 'a>,
    ns_uri: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'a>> {
    root.descendants().find(|n| is_named(*n, ns_uri, local_name))
}

/// The qualified name of an element exactly as written in the source text.
pub fn source_qname(xml: &str, node: roxmltree::Node<'_, '_>) -> String {
    let rest = &xml[node.range().start + 1..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(rest.len());
    rest[..end].to_owned()
}

fn is_named(n: roxmltree::Node<'_, '_>, ns_uri: &str, local_name: &str) -> bool {
    n.is_element()
        && n.tag_name().name() == local_name
        && n.tag_name().namespace().unwrap_or("") == ns_uri
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<r xmlns:a="urn:a" ID="top"><a:x Id="one"/><a:x id="two"/></r>"#;

    #[test]
    fn id_map_covers_default_attributes() {
        let doc = roxmltree::Document::parse(SAMPLE).unwrap();
        let map = build_id_map(&doc, &[]);
        assert!(map.contains_key("top"));
        assert!(map.contains_key("one"));
        assert!(map.contains_key("two"));
        let top = find_by_id(&doc, &map, "top").unwrap();
        assert_eq!(top.tag_name().name(), "r");
    }

    #[test]
    fn xml_document_registers_extra_id_attributes() {
        let xml = r#"<r AssertionID="abc"><x/></r>"#;
        let mut owned = XmlDocument::parse(xml.to_owned()).unwrap();
        owned.add_id_attr("AssertionID");
        let doc = owned.parse_doc().unwrap();
        let map = owned.build_id_map(&doc);
        assert!(map.contains_key("abc"));
        assert_eq!(owned.text(), xml);
        assert!(XmlDocument::parse_bytes(b"<broken").is_err());
    }

    #[test]
    fn namespace_aware_lookup() {
        let doc = roxmltree::Document::parse(SAMPLE).unwrap();
        assert_eq!(find_elements(&doc, "urn:a", "x").len(), 2);
        assert!(find_element(&doc, "urn:b", "x").is_none());
        let root = doc.root_element();
        assert!(find_child_element(root, "urn:a", "x").is_some());
    }
}
