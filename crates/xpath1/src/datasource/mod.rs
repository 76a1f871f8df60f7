//! Defines the core abstraction for a navigable, read-only data source tree.
use std::hash::Hash;

/// The namespace permanently bound to the `xml` prefix.
pub const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

/// A qualified name, consisting of an optional prefix and a local part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QName<'a> {
    pub prefix: Option<&'a str>,
    pub local_part: &'a str,
}

impl QName<'_> {
    /// The name as it would be written in markup, `prefix:local` or `local`.
    pub fn qualified(&self) -> String {
        match self.prefix {
            Some(prefix) => format!("{}:{}", prefix, self.local_part),
            None => self.local_part.to_string(),
        }
    }
}

/// The type of a node in the data source tree, aligned with the XPath 1.0 data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    Root,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

/// The contract for a node in a read-only, hierarchical data source.
///
/// The XPath engine and the XSLT executor are written exclusively against
/// this trait. `Ord` must follow document order; node-sets are sorted with it.
///
/// `'a` is the lifetime of the underlying data source (e.g., the XML string).
pub trait DataSourceNode<'a>:
    std::fmt::Debug + Clone + Copy + PartialEq + Eq + Hash + PartialOrd + Ord
{
    /// The type of the node (Element, Text, Attribute, etc.).
    fn node_type(&self) -> NodeType;

    /// The qualified name of the node. Returns `None` for node types that do
    /// not have names, such as text or root nodes. For a processing
    /// instruction, this is its target.
    fn name(&self) -> Option<QName<'a>>;

    /// The namespace URI of an element or attribute name, if it has one.
    fn namespace_uri(&self) -> Option<&'a str> {
        match self.name()?.prefix {
            Some("xml") => Some(XML_NAMESPACE),
            _ => None,
        }
    }

    /// The string value of the node, as defined by the XPath 1.0 `string()` function.
    /// - For a text node, this is its content.
    /// - For an element, this is the concatenation of the string values of all
    ///   its descendant text nodes.
    /// - For an attribute, this is its value.
    /// - For a comment or processing instruction, this is its content.
    fn string_value(&self) -> String;

    /// An iterator over the attribute nodes of this node.
    /// The iterator will be empty for non-element nodes.
    fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// An iterator over the child nodes of this node.
    /// The iterator will be empty for leaf nodes (like text or attributes).
    fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a>;

    /// A reference to the parent node. Returns `None` for the root node.
    /// The parent of an attribute is its owning element.
    fn parent(&self) -> Option<Self>;

    /// The namespaces in scope on an element as `(prefix, uri)` pairs.
    /// `None` is the default namespace.
    fn namespaces(&self) -> Vec<(Option<&'a str>, &'a str)> {
        Vec::new()
    }
}

// Test utilities - publicly available for integration testing in downstream crates
pub mod tests {
    use super::*;
    use std::cmp::Ordering;
    use std::hash::Hasher;

    #[derive(Debug, Clone)]
    struct MockNodeData<'a> {
        node_type: NodeType,
        name: Option<QName<'a>>,
        value: String,
        parent: Option<usize>,
        children: Vec<usize>,
        attributes: Vec<usize>,
        /// Position in document order, filled in once the tree is complete.
        order: usize,
    }

    /// A small in-memory tree addressed by node id.
    #[derive(Debug)]
    pub struct MockTree<'a> {
        nodes: Vec<MockNodeData<'a>>,
    }

    /// A node handle that borrows its tree so it can navigate itself.
    #[derive(Debug, Clone, Copy)]
    pub struct MockNode<'a> {
        pub id: usize,
        pub tree: &'a MockTree<'a>,
    }

    impl<'a> MockTree<'a> {
        fn new() -> Self {
            let root = MockNodeData {
                node_type: NodeType::Root,
                name: None,
                value: String::new(),
                parent: None,
                children: vec![],
                attributes: vec![],
                order: 0,
            };
            MockTree { nodes: vec![root] }
        }

        fn push(
            &mut self,
            parent: usize,
            node_type: NodeType,
            name: Option<QName<'a>>,
            value: &str,
        ) -> usize {
            let id = self.nodes.len();
            self.nodes.push(MockNodeData {
                node_type,
                name,
                value: value.to_string(),
                parent: Some(parent),
                children: vec![],
                attributes: vec![],
                order: 0,
            });
            if node_type == NodeType::Attribute {
                self.nodes[parent].attributes.push(id);
            } else {
                self.nodes[parent].children.push(id);
            }
            id
        }

        /// Re-orders the children of `parent` so document order can differ
        /// from creation order.
        fn set_children(&mut self, parent: usize, children: Vec<usize>) {
            self.nodes[parent].children = children;
        }

        fn finish(mut self) -> Self {
            let mut counter = 0;
            let mut stack = vec![0];
            while let Some(id) = stack.pop() {
                self.nodes[id].order = counter;
                counter += 1;
                for &attr in &self.nodes[id].attributes.clone() {
                    self.nodes[attr].order = counter;
                    counter += 1;
                }
                stack.extend(self.nodes[id].children.iter().rev());
            }
            self
        }

        pub fn node(&'a self, id: usize) -> MockNode<'a> {
            MockNode { id, tree: self }
        }
    }

    impl<'a> PartialEq for MockNode<'a> {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }
    impl<'a> Eq for MockNode<'a> {}

    impl<'a> PartialOrd for MockNode<'a> {
        fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
            Some(self.cmp(other))
        }
    }
    impl<'a> Ord for MockNode<'a> {
        fn cmp(&self, other: &Self) -> Ordering {
            let order = |n: &Self| n.tree.nodes[n.id].order;
            order(self).cmp(&order(other))
        }
    }

    impl<'a> Hash for MockNode<'a> {
        fn hash<H: Hasher>(&self, state: &mut H) {
            self.id.hash(state);
        }
    }

    impl<'a> DataSourceNode<'a> for MockNode<'a> {
        fn node_type(&self) -> NodeType {
            self.tree.nodes[self.id].node_type
        }

        fn name(&self) -> Option<QName<'a>> {
            self.tree.nodes[self.id].name
        }

        fn string_value(&self) -> String {
            let data = &self.tree.nodes[self.id];
            match data.node_type {
                NodeType::Root | NodeType::Element => self
                    .children()
                    .filter(|c| matches!(c.node_type(), NodeType::Element | NodeType::Text))
                    .map(|c| c.string_value())
                    .collect(),
                _ => data.value.clone(),
            }
        }

        fn attributes(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .attributes
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn children(&self) -> Box<dyn Iterator<Item = Self> + 'a> {
            let tree = self.tree;
            Box::new(
                tree.nodes[self.id]
                    .children
                    .iter()
                    .map(move |&id| MockNode { id, tree }),
            )
        }

        fn parent(&self) -> Option<Self> {
            self.tree.nodes[self.id].parent.map(|id| MockNode {
                id,
                tree: self.tree,
            })
        }
    }

    fn name(local_part: &str) -> Option<QName<'_>> {
        Some(QName {
            prefix: None,
            local_part,
        })
    }

    /// Creates a simple mock tree for testing:
    /// <root> <!-- id 0 -->
    ///   <para id="p1" xml:lang="en">Hello</para> <!-- id 1, attr 2&3, text 4 -->
    ///   <!-- comment node --> <!-- id 8 -->
    ///   <div></div> <!-- id 5 -->
    ///   <?pi-target pi-value?> <!-- id 9 -->
    ///   <para>World</para> <!-- id 6, text 7 -->
    /// </root>
    pub fn create_test_tree<'a>() -> MockTree<'a> {
        let mut tree = MockTree::new();
        let para1 = tree.push(0, NodeType::Element, name("para"), "");
        tree.push(para1, NodeType::Attribute, name("id"), "p1");
        tree.push(
            para1,
            NodeType::Attribute,
            Some(QName {
                prefix: Some("xml"),
                local_part: "lang",
            }),
            "en",
        );
        tree.push(para1, NodeType::Text, None, "Hello");
        let div = tree.push(0, NodeType::Element, name("div"), "");
        let para2 = tree.push(0, NodeType::Element, name("para"), "");
        tree.push(para2, NodeType::Text, None, "World");
        let comment = tree.push(0, NodeType::Comment, None, " comment node ");
        let pi = tree.push(0, NodeType::ProcessingInstruction, name("pi-target"), "pi-value");
        tree.set_children(0, vec![para1, comment, div, pi, para2]);
        tree.finish()
    }
}
