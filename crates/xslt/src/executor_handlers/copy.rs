//! `xsl:copy` and `xsl:copy-of`.

use crate::ast::PreparsedTemplate;
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use folio_xpath1::datasource::DataSourceNode;
use folio_xpath1::{Expression, FragmentNode, NodeType, XPathValue};

fn set_attribute(builder: &mut dyn OutputBuilder, name: &str, value: &str) -> Result<(), ExecutionError> {
    builder
        .set_attribute(name, value)
        .map_err(ExecutionError::ResultTree)
}

fn node_name<'a, N: DataSourceNode<'a>>(node: N) -> String {
    node.name().map(|q| q.qualified()).unwrap_or_default()
}

fn copy_namespaces<'a, N: DataSourceNode<'a>>(node: N, builder: &mut dyn OutputBuilder) {
    for (prefix, uri) in node.namespaces() {
        builder.add_namespace(prefix, uri);
    }
}

/// Shallow copy of the context node; the body provides the content of a
/// copied root or element.
pub(crate) fn handle_copy<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    use_attribute_sets: &[String],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let node = focus.node;
    match node.node_type() {
        NodeType::Root => executor.execute_template(body, focus, builder),
        NodeType::Element => {
            builder.start_element(&node_name(node));
            copy_namespaces(node, builder);
            let result = executor
                .apply_attribute_sets(use_attribute_sets, focus, builder)
                .and_then(|_| executor.execute_template(body, focus, builder));
            builder.end_element();
            result
        }
        NodeType::Attribute => set_attribute(builder, &node_name(node), &node.string_value()),
        NodeType::Text => {
            builder.add_text(&node.string_value(), true);
            Ok(())
        }
        NodeType::Comment => {
            builder.add_comment(&node.string_value());
            Ok(())
        }
        NodeType::ProcessingInstruction => {
            builder.add_processing_instruction(&node_name(node), &node.string_value());
            Ok(())
        }
    }
}

pub(crate) fn handle_copy_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    match executor.evaluate(select, focus)? {
        XPathValue::NodeSet(nodes) => {
            for node in nodes {
                copy_node(node, builder)?;
            }
            Ok(())
        }
        XPathValue::Fragment(fragment) => {
            for node in &fragment.nodes {
                copy_fragment_node(node, builder)?;
            }
            Ok(())
        }
        other => {
            builder.add_text(&other.to_string(), true);
            Ok(())
        }
    }
}

/// Deep copy of a source node, namespaces included.
pub(crate) fn copy_node<'a, N: DataSourceNode<'a>>(node: N, builder: &mut dyn OutputBuilder) -> Result<(), ExecutionError> {
    match node.node_type() {
        NodeType::Root => {
            for child in node.children() {
                copy_node(child, builder)?;
            }
        }
        NodeType::Element => {
            builder.start_element(&node_name(node));
            copy_namespaces(node, builder);
            let result = (|| -> Result<(), ExecutionError> {
                for attribute in node.attributes() {
                    set_attribute(builder, &node_name(attribute), &attribute.string_value())?;
                }
                for child in node.children() {
                    copy_node(child, builder)?;
                }
                Ok(())
            })();
            builder.end_element();
            result?;
        }
        NodeType::Attribute => set_attribute(builder, &node_name(node), &node.string_value())?,
        NodeType::Text => builder.add_text(&node.string_value(), true),
        NodeType::Comment => builder.add_comment(&node.string_value()),
        NodeType::ProcessingInstruction => {
            builder.add_processing_instruction(&node_name(node), &node.string_value())
        }
    }
    Ok(())
}

pub(crate) fn copy_fragment_node(node: &FragmentNode, builder: &mut dyn OutputBuilder) -> Result<(), ExecutionError> {
    match node {
        FragmentNode::Element {
            name,
            attributes,
            children,
        } => {
            builder.start_element(name);
            let result = (|| -> Result<(), ExecutionError> {
                for (attr_name, value) in attributes {
                    set_attribute(builder, attr_name, value)?;
                }
                for child in children {
                    copy_fragment_node(child, builder)?;
                }
                Ok(())
            })();
            builder.end_element();
            result?;
        }
        FragmentNode::Text { content, escape } => builder.add_text(content, *escape),
        FragmentNode::Comment(text) => builder.add_comment(text),
        FragmentNode::ProcessingInstruction { target, data } => {
            builder.add_processing_instruction(target, data)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasources::XmlDocument;
    use crate::output::ResultTreeBuilder;

    #[test]
    fn deep_copy_keeps_namespaces_and_attributes() {
        let doc = XmlDocument::parse(r#"<a:doc xmlns:a="urn:a" id="1"><b>text</b><!--c--></a:doc>"#).unwrap();
        let mut builder = ResultTreeBuilder::new();
        copy_node(doc.root_node(), &mut builder).unwrap();
        let fragment = builder.finish();
        assert_eq!(
            fragment.nodes,
            vec![FragmentNode::Element {
                name: "a:doc".into(),
                attributes: vec![
                    ("xmlns:a".into(), "urn:a".into()),
                    ("id".into(), "1".into())
                ],
                children: vec![
                    FragmentNode::Element {
                        name: "b".into(),
                        attributes: vec![],
                        children: vec![FragmentNode::text("text")],
                    },
                    FragmentNode::Comment("c".into()),
                ],
            }]
        );
    }
}
