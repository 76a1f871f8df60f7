//! Handlers for literal output, including text, `value-of`, literal result
//! elements and the computed-node instructions.

use crate::ast::{AttributeValueTemplate, Namespaces, PreparsedTemplate};
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::{OutputBuilder, TextCollector};
use folio_xpath1::datasource::DataSourceNode;
use folio_xpath1::{Expression, XPathError};

pub(crate) fn handle_value_of<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    select: &Expression,
    disable_escaping: bool,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let content = executor.evaluate(select, focus)?.to_string();
    builder.add_text(&content, !disable_escaping);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_literal_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name: &str,
    namespaces: &Namespaces,
    attrs: &[(String, AttributeValueTemplate)],
    use_attribute_sets: &[String],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let (name, namespaces) = executor.alias_namespaces(name, namespaces);
    builder.start_element(&name);
    for (prefix, uri) in &namespaces {
        builder.add_namespace(prefix.as_deref(), uri);
    }
    let result = literal_content(executor, attrs, use_attribute_sets, body, focus, builder);
    builder.end_element();
    result
}

fn literal_content<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    attrs: &[(String, AttributeValueTemplate)],
    use_attribute_sets: &[String],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    // Attributes written on the element override those from attribute sets.
    executor.apply_attribute_sets(use_attribute_sets, focus, builder)?;
    for (attr_name, avt) in attrs {
        let value = executor.evaluate_avt(avt, focus)?;
        builder
            .set_attribute(attr_name, &value)
            .map_err(ExecutionError::ResultTree)?;
    }
    executor.execute_template(body, focus, builder)
}

/// Whether `name` can be used as an element or attribute name.
fn is_qname(name: &str) -> bool {
    let valid_ncname = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
            && chars.all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    };
    match name.split_once(':') {
        Some((prefix, local)) => valid_ncname(prefix) && valid_ncname(local),
        None => valid_ncname(name),
    }
}

fn split_qname(name: &str) -> (Option<&str>, &str) {
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix), local),
        None => (None, name),
    }
}

fn lookup_prefix<'n>(namespaces: &'n Namespaces, prefix: Option<&str>) -> Option<&'n str> {
    namespaces
        .iter()
        .find(|(p, _)| p.as_deref() == prefix)
        .map(|(_, uri)| uri.as_str())
}

/// Evaluates the body with only its text kept.
pub(crate) fn collect_text<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &PreparsedTemplate,
    focus: Focus<N>,
) -> Result<String, ExecutionError> {
    let mut collector = TextCollector::new();
    executor.execute_template(body, focus, &mut collector)?;
    if collector.dropped_nodes {
        log::debug!("Non-text nodes dropped while building a text value");
    }
    Ok(collector.text)
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_element<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name_avt: &AttributeValueTemplate,
    namespace_avt: Option<&AttributeValueTemplate>,
    namespaces: &Namespaces,
    use_attribute_sets: &[String],
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let name = executor.evaluate_avt(name_avt, focus)?;
    if !is_qname(&name) {
        return Err(ExecutionError::TypeError(format!(
            "'{}' is not a valid element name",
            name
        )));
    }
    let (prefix, local) = split_qname(&name);
    let (element_name, binding) = match namespace_avt {
        Some(avt) => {
            let uri = executor.evaluate_avt(avt, focus)?;
            if uri.is_empty() {
                (local.to_string(), Some((None, uri)))
            } else {
                (name.clone(), Some((prefix, uri)))
            }
        }
        None => match prefix {
            Some(p) => {
                let uri = lookup_prefix(namespaces, Some(p))
                    .ok_or_else(|| XPathError::UndefinedPrefix(p.to_string()))?;
                (name.clone(), Some((prefix, uri.to_string())))
            }
            None => (
                name.clone(),
                lookup_prefix(namespaces, None).map(|uri| (None, uri.to_string())),
            ),
        },
    };

    builder.start_element(&element_name);
    if let Some((prefix, uri)) = &binding {
        builder.add_namespace(*prefix, uri);
    }
    let result = executor
        .apply_attribute_sets(use_attribute_sets, focus, builder)
        .and_then(|_| executor.execute_template(body, focus, builder));
    builder.end_element();
    result
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_attribute<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name_avt: &AttributeValueTemplate,
    namespace_avt: Option<&AttributeValueTemplate>,
    namespaces: &Namespaces,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let name = executor.evaluate_avt(name_avt, focus)?;
    if !is_qname(&name) || name == "xmlns" || name.starts_with("xmlns:") {
        return Err(ExecutionError::TypeError(format!(
            "'{}' is not a valid attribute name",
            name
        )));
    }
    let uri = match namespace_avt {
        Some(avt) => Some(executor.evaluate_avt(avt, focus)?),
        None => None,
    };
    let value = collect_text(executor, body, focus)?;

    let (prefix, local) = split_qname(&name);
    let attribute_name = match (uri, prefix) {
        (Some(uri), _) if uri.is_empty() => local.to_string(),
        (Some(uri), prefix) => {
            // Attributes have no default namespace; an unprefixed name in a
            // namespace needs a prefix of its own.
            let prefix = match prefix {
                Some(p) if p != "xml" => p.to_string(),
                Some(p) => return finish_attribute(builder, &format!("{}:{}", p, local), &value),
                None => namespaces
                    .iter()
                    .find(|(p, u)| p.is_some() && *u == uri)
                    .and_then(|(p, _)| p.clone())
                    .unwrap_or_else(|| "ns1".to_string()),
            };
            builder.add_namespace(Some(&prefix), &uri);
            format!("{}:{}", prefix, local)
        }
        (None, Some("xml")) => name.clone(),
        (None, Some(p)) => {
            let uri = lookup_prefix(namespaces, Some(p))
                .ok_or_else(|| XPathError::UndefinedPrefix(p.to_string()))?;
            builder.add_namespace(Some(p), uri);
            name.clone()
        }
        (None, None) => name.clone(),
    };
    finish_attribute(builder, &attribute_name, &value)
}

fn finish_attribute(builder: &mut dyn OutputBuilder, name: &str, value: &str) -> Result<(), ExecutionError> {
    builder
        .set_attribute(name, value)
        .map_err(ExecutionError::ResultTree)
}

pub(crate) fn handle_comment<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let mut text = collect_text(executor, body, focus)?;
    while text.contains("--") {
        text = text.replace("--", "- -");
    }
    if text.ends_with('-') {
        text.push(' ');
    }
    builder.add_comment(&text);
    Ok(())
}

pub(crate) fn handle_processing_instruction<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    name_avt: &AttributeValueTemplate,
    body: &PreparsedTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let target = executor.evaluate_avt(name_avt, focus)?;
    if !is_qname(&target) || target.contains(':') || target.eq_ignore_ascii_case("xml") {
        return Err(ExecutionError::TypeError(format!(
            "'{}' is not a valid processing instruction target",
            target
        )));
    }
    let data = collect_text(executor, body, focus)?.replace("?>", "? >");
    builder.add_processing_instruction(&target, data.trim_start());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qualified_names() {
        assert!(is_qname("item"));
        assert!(is_qname("h:item-2"));
        assert!(!is_qname(""));
        assert!(!is_qname("2item"));
        assert!(!is_qname("a b"));
        assert!(!is_qname("a:b:c"));
        assert_eq!(split_qname("h:item"), (Some("h"), "item"));
    }
}
