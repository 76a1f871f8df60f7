//! Defines the `OutputBuilder` trait, which decouples the XSLT executor
//! from where its output goes: the result tree, a variable's fragment, or
//! plain text for attribute values and messages.

use folio_xpath1::{Fragment, FragmentNode};

/// A trait that describes the semantic actions of building the output tree,
/// without exposing the underlying concrete node types.
pub trait OutputBuilder {
    fn start_element(&mut self, name: &str);
    fn end_element(&mut self);

    /// Declares `prefix` on the open element unless the same binding is
    /// already in scope. An empty `uri` undeclares the default namespace.
    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str);

    /// Sets an attribute on the open element. Fails once the element has
    /// children.
    fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), String>;

    fn add_text(&mut self, text: &str, escape: bool);
    fn add_comment(&mut self, text: &str);
    fn add_processing_instruction(&mut self, target: &str, data: &str);
}

struct OpenNode {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<FragmentNode>,
    /// Bindings declared on this element.
    declared: Vec<(Option<String>, String)>,
}

/// Builds a [`Fragment`]. Used for the final result and for variables.
#[derive(Default)]
pub struct ResultTreeBuilder {
    top: Vec<FragmentNode>,
    open: Vec<OpenNode>,
}

impl ResultTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Closes anything left open and returns the fragment.
    pub fn finish(mut self) -> Fragment {
        while !self.open.is_empty() {
            self.end_element();
        }
        Fragment::new(self.top)
    }

    fn in_scope(&self, prefix: Option<&str>) -> Option<&str> {
        self.open.iter().rev().find_map(|node| {
            node.declared
                .iter()
                .find(|(p, _)| p.as_deref() == prefix)
                .map(|(_, uri)| uri.as_str())
        })
    }

    fn push_node(&mut self, node: FragmentNode) {
        match self.open.last_mut() {
            Some(parent) => parent.children.push(node),
            None => self.top.push(node),
        }
    }
}

impl OutputBuilder for ResultTreeBuilder {
    fn start_element(&mut self, name: &str) {
        self.open.push(OpenNode {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            declared: Vec::new(),
        });
    }

    fn end_element(&mut self) {
        if let Some(node) = self.open.pop() {
            self.push_node(FragmentNode::Element {
                name: node.name,
                attributes: node.attributes,
                children: node.children,
            });
        }
    }

    fn add_namespace(&mut self, prefix: Option<&str>, uri: &str) {
        if prefix == Some("xml") {
            return;
        }
        let current = self.in_scope(prefix);
        let redundant = match prefix {
            None => current.unwrap_or("") == uri,
            Some(_) => current == Some(uri) || uri.is_empty(),
        };
        if redundant {
            return;
        }
        let Some(node) = self.open.last_mut() else {
            return;
        };
        if node.declared.iter().any(|(p, _)| p.as_deref() == prefix) {
            return;
        }
        let attribute = match prefix {
            Some(p) => format!("xmlns:{}", p),
            None => "xmlns".to_string(),
        };
        node.declared.push((prefix.map(str::to_string), uri.to_string()));
        node.attributes.push((attribute, uri.to_string()));
    }

    fn set_attribute(&mut self, name: &str, value: &str) -> Result<(), String> {
        if name == "xmlns" {
            self.add_namespace(None, value);
            return Ok(());
        }
        if let Some(prefix) = name.strip_prefix("xmlns:") {
            self.add_namespace(Some(prefix), value);
            return Ok(());
        }
        let Some(node) = self.open.last_mut() else {
            return Err(format!("Cannot add attribute '{}' outside an element", name));
        };
        if !node.children.is_empty() {
            return Err(format!(
                "Cannot add attribute '{}' to <{}> after its children",
                name, node.name
            ));
        }
        match node.attributes.iter_mut().find(|(n, _)| n == name) {
            Some(existing) => existing.1 = value.to_string(),
            None => node.attributes.push((name.to_string(), value.to_string())),
        }
        Ok(())
    }

    fn add_text(&mut self, text: &str, escape: bool) {
        if text.is_empty() {
            return;
        }
        let target = match self.open.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.top,
        };
        // Adjacent text merges, as in the XPath data model.
        if let Some(FragmentNode::Text { content, escape: e }) = target.last_mut() {
            if *e == escape {
                content.push_str(text);
                return;
            }
        }
        target.push(FragmentNode::Text {
            content: text.to_string(),
            escape,
        });
    }

    fn add_comment(&mut self, text: &str) {
        self.push_node(FragmentNode::Comment(text.to_string()));
    }

    fn add_processing_instruction(&mut self, target: &str, data: &str) {
        self.push_node(FragmentNode::ProcessingInstruction {
            target: target.to_string(),
            data: data.to_string(),
        });
    }
}

/// Collects only text, for attribute values, comments, processing
/// instructions and messages. Nodes other than text are dropped.
#[derive(Default)]
pub struct TextCollector {
    pub text: String,
    depth: usize,
    /// Set when something other than text was produced.
    pub dropped_nodes: bool,
}

impl TextCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OutputBuilder for TextCollector {
    fn start_element(&mut self, _name: &str) {
        self.depth += 1;
        self.dropped_nodes = true;
    }

    fn end_element(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn add_namespace(&mut self, _prefix: Option<&str>, _uri: &str) {}

    fn set_attribute(&mut self, _name: &str, _value: &str) -> Result<(), String> {
        self.dropped_nodes = true;
        Ok(())
    }

    fn add_text(&mut self, text: &str, _escape: bool) {
        if self.depth == 0 {
            self.text.push_str(text);
        }
    }

    fn add_comment(&mut self, _text: &str) {
        self.dropped_nodes = true;
    }

    fn add_processing_instruction(&mut self, _target: &str, _data: &str) {
        self.dropped_nodes = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_nested_elements_and_merges_text() {
        let mut builder = ResultTreeBuilder::new();
        builder.start_element("p");
        builder.set_attribute("class", "lead").unwrap();
        builder.add_text("a", true);
        builder.add_text("b", true);
        builder.start_element("br");
        builder.end_element();
        builder.end_element();
        let fragment = builder.finish();
        assert_eq!(
            fragment.nodes,
            vec![FragmentNode::Element {
                name: "p".into(),
                attributes: vec![("class".into(), "lead".into())],
                children: vec![
                    FragmentNode::text("ab"),
                    FragmentNode::Element {
                        name: "br".into(),
                        attributes: vec![],
                        children: vec![],
                    },
                ],
            }]
        );
    }

    #[test]
    fn attributes_after_children_are_rejected() {
        let mut builder = ResultTreeBuilder::new();
        builder.start_element("p");
        builder.add_text("x", true);
        assert!(builder.set_attribute("id", "1").is_err());
        assert!(builder.set_attribute("late", "1").unwrap_err().contains("<p>"));
    }

    #[test]
    fn namespace_declarations_are_not_repeated() {
        let mut builder = ResultTreeBuilder::new();
        builder.start_element("a:root");
        builder.add_namespace(Some("a"), "urn:a");
        builder.add_namespace(None, "");
        builder.start_element("a:child");
        builder.add_namespace(Some("a"), "urn:a");
        builder.end_element();
        builder.end_element();
        let fragment = builder.finish();
        match &fragment.nodes[0] {
            FragmentNode::Element {
                attributes,
                children,
                ..
            } => {
                assert_eq!(attributes, &vec![("xmlns:a".to_string(), "urn:a".to_string())]);
                assert!(matches!(
                    &children[0],
                    FragmentNode::Element { attributes, .. } if attributes.is_empty()
                ));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn text_collector_ignores_element_content() {
        let mut collector = TextCollector::new();
        collector.add_text("keep ", true);
        collector.start_element("b");
        collector.add_text("drop", true);
        collector.end_element();
        collector.add_text("this", true);
        assert_eq!(collector.text, "keep this");
        assert!(collector.dropped_nodes);
    }
}
