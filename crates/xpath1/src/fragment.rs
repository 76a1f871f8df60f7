//! Result tree fragments: owned trees built by XSLT instructions.
//!
//! A fragment is what a variable with content (instead of `select`) holds,
//! and it is also the shape of the final result tree handed to the
//! serializer.

/// A node of a result tree.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentNode {
    Element {
        name: String,
        /// Attributes and namespace declarations (`xmlns`, `xmlns:p`) in
        /// insertion order.
        attributes: Vec<(String, String)>,
        children: Vec<FragmentNode>,
    },
    Text {
        content: String,
        /// False when the text was produced with `disable-output-escaping`.
        escape: bool,
    },
    Comment(String),
    ProcessingInstruction {
        target: String,
        data: String,
    },
}

impl FragmentNode {
    pub fn text(content: impl Into<String>) -> Self {
        FragmentNode::Text {
            content: content.into(),
            escape: true,
        }
    }

    /// The XPath string value of this node.
    pub fn string_value(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            FragmentNode::Element { children, .. } => {
                children.iter().for_each(|c| c.collect_text(out));
            }
            FragmentNode::Text { content, .. } => out.push_str(content),
            FragmentNode::Comment(_) | FragmentNode::ProcessingInstruction { .. } => {}
        }
    }

    pub fn is_element(&self) -> bool {
        matches!(self, FragmentNode::Element { .. })
    }
}

/// An ordered forest of result nodes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    pub nodes: Vec<FragmentNode>,
}

impl Fragment {
    pub fn new(nodes: Vec<FragmentNode>) -> Self {
        Fragment { nodes }
    }

    /// Concatenation of every descendant text node.
    pub fn string_value(&self) -> String {
        self.nodes.iter().map(FragmentNode::string_value).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The first element child, which the serializer treats as the
    /// document element.
    pub fn document_element(&self) -> Option<&FragmentNode> {
        self.nodes.iter().find(|n| n.is_element())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_value_skips_comments_and_pis() {
        let fragment = Fragment::new(vec![
            FragmentNode::Element {
                name: "p".into(),
                attributes: vec![("class".into(), "lead".into())],
                children: vec![
                    FragmentNode::text("Hello, "),
                    FragmentNode::Comment("ignored".into()),
                    FragmentNode::Element {
                        name: "b".into(),
                        attributes: vec![],
                        children: vec![FragmentNode::text("world")],
                    },
                ],
            },
            FragmentNode::ProcessingInstruction {
                target: "pi".into(),
                data: "x".into(),
            },
            FragmentNode::text("!"),
        ]);
        assert_eq!(fragment.string_value(), "Hello, world!");
        assert!(fragment.document_element().is_some());
    }

    #[test]
    fn text_only_fragment_has_no_document_element() {
        let fragment = Fragment::new(vec![FragmentNode::text("1")]);
        assert!(fragment.document_element().is_none());
        assert!(!fragment.is_empty());
    }
}
