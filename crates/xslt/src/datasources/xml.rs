// XML datasource implementation using roxmltree
use folio_xpath1::{DataSourceNode, NodeType, QName, XML_NAMESPACE};
use roxmltree::{Node, NodeId, ParsingOptions};
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A parsed source document plus the whitespace-only text nodes that
/// `xsl:strip-space` removed from view.
pub struct XmlDocument<'input> {
    doc: roxmltree::Document<'input>,
    stripped: HashSet<NodeId>,
}

impl<'input> XmlDocument<'input> {
    pub fn parse(text: &'input str) -> Result<Self, roxmltree::Error> {
        let doc = roxmltree::Document::parse(text)?;
        Ok(Self {
            doc,
            stripped: HashSet::new(),
        })
    }

    /// Parses with a DTD switch and a node limit, which also bounds entity
    /// expansion.
    pub fn parse_with_limits(
        text: &'input str,
        allow_dtd: bool,
        nodes_limit: u32,
    ) -> Result<Self, roxmltree::Error> {
        let mut options = ParsingOptions::default();
        options.allow_dtd = allow_dtd;
        options.nodes_limit = nodes_limit;
        let doc = roxmltree::Document::parse_with_options(text, options)?;
        Ok(Self {
            doc,
            stripped: HashSet::new(),
        })
    }

    /// Hides whitespace-only text children of every element for which
    /// `strip(namespace, local_name)` holds. `xml:space="preserve"` on the
    /// element or its nearest ancestor carrying `xml:space` wins.
    /// Returns the number of hidden nodes.
    pub fn strip_whitespace<F>(&mut self, strip: F) -> usize
    where
        F: Fn(Option<&str>, &str) -> bool,
    {
        let mut hidden = HashSet::new();
        for node in self.doc.descendants().filter(|n| n.is_text()) {
            let is_blank = node
                .text()
                .is_some_and(|t| t.chars().all(|c| matches!(c, ' ' | '\t' | '\n' | '\r')));
            let Some(parent) = node.parent_element() else {
                continue;
            };
            if !is_blank || preserves_space(parent) {
                continue;
            }
            let name = parent.tag_name();
            if strip(name.namespace(), name.name()) {
                hidden.insert(node.id());
            }
        }
        let count = hidden.len();
        self.stripped = hidden;
        count
    }

    pub fn root_node(&self) -> XmlNode<'_, 'input> {
        XmlNode {
            doc: self,
            kind: NodeRef::Node(self.doc.root()),
        }
    }
}

fn preserves_space(element: Node<'_, '_>) -> bool {
    element
        .ancestors()
        .find_map(|n| n.attribute((XML_NAMESPACE, "space")))
        .is_some_and(|v| v == "preserve")
}

#[derive(Clone, Copy)]
enum NodeRef<'a, 'input> {
    /// A regular node (element, text, comment, etc.)
    Node(Node<'a, 'input>),
    /// roxmltree keeps attributes as data on elements, so they are
    /// addressed by owner element and index.
    Attribute { parent: Node<'a, 'input>, index: usize },
}

/// A node of an [`XmlDocument`] as seen by XPath.
#[derive(Clone, Copy)]
pub struct XmlNode<'a, 'input> {
    doc: &'a XmlDocument<'input>,
    kind: NodeRef<'a, 'input>,
}

impl<'a, 'input> XmlNode<'a, 'input> {
    pub fn inner(&self) -> Option<Node<'a, 'input>> {
        match self.kind {
            NodeRef::Node(node) => Some(node),
            NodeRef::Attribute { .. } => None,
        }
    }

    fn wrap(&self, node: Node<'a, 'input>) -> Self {
        XmlNode {
            doc: self.doc,
            kind: NodeRef::Node(node),
        }
    }

    fn attribute(&self) -> Option<roxmltree::Attribute<'a, 'input>> {
        match self.kind {
            NodeRef::Attribute { parent, index } => parent.attributes().nth(index),
            NodeRef::Node(_) => None,
        }
    }

    /// Document order key: the node id, with attributes ordered right
    /// after their owner element.
    fn order_key(&self) -> (u32, usize) {
        match self.kind {
            NodeRef::Node(node) => (node.id().get(), 0),
            NodeRef::Attribute { parent, index } => (parent.id().get(), index + 1),
        }
    }
}

impl fmt::Debug for XmlNode<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            NodeRef::Node(node) => write!(f, "XmlNode({:?} #{})", node.node_type(), node.id().get()),
            NodeRef::Attribute { parent, index } => {
                write!(f, "XmlAttribute(#{}[{}])", parent.id().get(), index)
            }
        }
    }
}

impl PartialEq for XmlNode<'_, '_> {
    fn eq(&self, other: &Self) -> bool {
        self.order_key() == other.order_key()
    }
}

impl Eq for XmlNode<'_, '_> {}

impl PartialOrd for XmlNode<'_, '_> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for XmlNode<'_, '_> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Node ids follow document order, and an element's attributes sort
        // between the element and its first child.
        self.order_key().cmp(&other.order_key())
    }
}

impl Hash for XmlNode<'_, '_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.order_key().hash(state);
    }
}

impl<'a> DataSourceNode<'a> for XmlNode<'a, 'a> {
    fn node_type(&self) -> NodeType {
        match self.kind {
            NodeRef::Node(node) => {
                if node.is_root() {
                    NodeType::Root
                } else if node.is_text() {
                    NodeType::Text
                } else if node.is_comment() {
                    NodeType::Comment
                } else if node.is_pi() {
                    NodeType::ProcessingInstruction
                } else {
                    NodeType::Element
                }
            }
            NodeRef::Attribute { .. } => NodeType::Attribute,
        }
    }

    fn name(&self) -> Option<QName<'a>> {
        match self.kind {
            NodeRef::Node(node) if node.is_element() => {
                let tag = node.tag_name();
                let prefix = tag.namespace().and_then(|uri| node.lookup_prefix(uri));
                Some(QName {
                    prefix,
                    local_part: tag.name(),
                })
            }
            NodeRef::Node(node) => node.pi().map(|pi| QName {
                prefix: None,
                local_part: pi.target,
            }),
            NodeRef::Attribute { parent, .. } => self.attribute().map(|attr| {
                let prefix = match attr.namespace() {
                    Some(XML_NAMESPACE) => Some("xml"),
                    Some(uri) => parent.lookup_prefix(uri),
                    None => None,
                };
                QName {
                    prefix,
                    local_part: attr.name(),
                }
            }),
        }
    }

    fn namespace_uri(&self) -> Option<&'a str> {
        match self.kind {
            NodeRef::Node(node) if node.is_element() => node.tag_name().namespace(),
            NodeRef::Node(_) => None,
            NodeRef::Attribute { .. } => self.attribute().and_then(|attr| attr.namespace()),
        }
    }

    fn string_value(&self) -> String {
        match self.kind {
            NodeRef::Node(node) => {
                if node.is_element() || node.is_root() {
                    node.descendants()
                        .filter(|n| n.is_text())
                        .filter_map(|n| n.text())
                        .collect()
                } else if node.is_pi() {
                    node.pi().and_then(|pi| pi.value).unwrap_or("").to_string()
                } else {
                    node.text().unwrap_or("").to_string()
                }
            }
            NodeRef::Attribute { .. } => self
                .attribute()
                .map(|attr| attr.value().to_string())
                .unwrap_or_default(),
        }
    }

    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self.kind {
            NodeRef::Node(node) if node.is_element() => {
                let doc = self.doc;
                let count = node.attributes().len();
                Box::new((0..count).map(move |index| XmlNode {
                    doc,
                    kind: NodeRef::Attribute {
                        parent: node,
                        index,
                    },
                }))
            }
            _ => Box::new(std::iter::empty()),
        }
    }

    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
        match self.kind {
            NodeRef::Node(node) => {
                let doc = self.doc;
                Box::new(
                    node.children()
                        .filter(move |c| !doc.stripped.contains(&c.id()))
                        .map(move |c| XmlNode {
                            doc,
                            kind: NodeRef::Node(c),
                        }),
                )
            }
            NodeRef::Attribute { .. } => Box::new(std::iter::empty()),
        }
    }

    fn parent(&self) -> Option<Self> {
        match self.kind {
            NodeRef::Node(node) => node.parent().map(|p| self.wrap(p)),
            NodeRef::Attribute { parent, .. } => Some(self.wrap(parent)),
        }
    }

    fn namespaces(&self) -> Vec<(Option<&'a str>, &'a str)> {
        match self.kind {
            NodeRef::Node(node) if node.is_element() => node
                .namespaces()
                .filter(|ns| ns.name() != Some("xml"))
                .map(|ns| (ns.name(), ns.uri()))
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child<'a>(node: XmlNode<'a, 'a>, local: &str) -> XmlNode<'a, 'a> {
        node.children()
            .find(|n| n.name().is_some_and(|q| q.local_part == local))
            .unwrap()
    }

    #[test]
    fn test_xml_node_attributes() {
        let xml = r#"<root><item id="123" status="active">Text</item></root>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let item = child(child(doc.root_node(), "root"), "item");

        let attrs: Vec<_> = item.attributes().collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].node_type(), NodeType::Attribute);
        assert_eq!(attrs[0].name().unwrap().local_part, "id");
        assert_eq!(attrs[0].string_value(), "123");
        assert_eq!(attrs[1].string_value(), "active");
        assert_eq!(attrs[0].parent(), Some(item));
    }

    #[test]
    fn test_document_order_places_attributes_before_children() {
        let xml = r#"<root a="1"><x/></root>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let root = child(doc.root_node(), "root");
        let attr = root.attributes().next().unwrap();
        let x = child(root, "x");
        assert!(root < attr);
        assert!(attr < x);
    }

    #[test]
    fn test_namespaced_names_keep_their_prefix() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns="urn:default"><item a:flag="y"/></a:root>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let root = child(doc.root_node(), "root");
        let name = root.name().unwrap();
        assert_eq!(name.prefix, Some("a"));
        assert_eq!(root.namespace_uri(), Some("urn:a"));

        let item = child(root, "item");
        assert_eq!(item.name().unwrap().prefix, None);
        assert_eq!(item.namespace_uri(), Some("urn:default"));

        let flag = item.attributes().next().unwrap();
        assert_eq!(flag.name().unwrap().qualified(), "a:flag");
        assert!(root.namespaces().contains(&(Some("a"), "urn:a")));
    }

    #[test]
    fn test_strip_whitespace_hides_blank_text() {
        let xml = "<list>\n  <item> </item>\n  <pre xml:space=\"preserve\"> </pre>\n</list>";
        let mut doc = XmlDocument::parse(xml).unwrap();
        let hidden = doc.strip_whitespace(|_, _| true);
        // The two indentation runs and the blank in <item>; <pre> keeps its blank.
        assert_eq!(hidden, 4);

        let list = child(doc.root_node(), "list");
        assert_eq!(list.children().count(), 2);
        let pre = child(list, "pre");
        assert_eq!(pre.children().count(), 1);
    }

    #[test]
    fn test_processing_instruction_name_and_value() {
        let xml = r#"<r><?target some data?></r>"#;
        let doc = XmlDocument::parse(xml).unwrap();
        let pi = child(doc.root_node(), "r").children().next().unwrap();
        assert_eq!(pi.node_type(), NodeType::ProcessingInstruction);
        assert_eq!(pi.name().unwrap().local_part, "target");
        assert_eq!(pi.string_value(), "some data");
    }
}
