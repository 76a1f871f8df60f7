//! Writes a result tree as text according to the merged `xsl:output`
//! settings.

use crate::ast::{OutputMethod, OutputSettings};
use folio_xpath1::{Fragment, FragmentNode};
use std::fmt::Write;

const HTML_VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "br", "col", "embed", "frame", "hr", "img", "input", "isindex",
    "link", "meta", "param", "source", "track", "wbr",
];

/// The method used for `fragment`: the declared one, else `html` when the
/// first element is `<html>` with no text before it, else `xml`.
pub fn effective_method(settings: &OutputSettings, fragment: &Fragment) -> OutputMethod {
    if let Some(method) = settings.method {
        return method;
    }
    for node in &fragment.nodes {
        match node {
            FragmentNode::Element { name, attributes, .. } => {
                let namespaced = attributes.iter().any(|(n, v)| n == "xmlns" && !v.is_empty());
                if name.eq_ignore_ascii_case("html") && !namespaced {
                    return OutputMethod::Html;
                }
                return OutputMethod::Xml;
            }
            FragmentNode::Text { content, .. } if !content.trim().is_empty() => {
                return OutputMethod::Xml;
            }
            _ => {}
        }
    }
    OutputMethod::Xml
}

/// The media type a page should be served with.
pub fn media_type(settings: &OutputSettings, fragment: &Fragment) -> String {
    settings
        .media_type
        .clone()
        .unwrap_or_else(|| effective_method(settings, fragment).default_media_type().to_string())
}

pub fn serialize(fragment: &Fragment, settings: &OutputSettings) -> String {
    let method = effective_method(settings, fragment);
    log::debug!("Serializing result tree with the {:?} method", method);
    let mut serializer = Serializer {
        out: String::new(),
        settings,
        method,
    };
    match method {
        OutputMethod::Text => serializer.out = fragment.string_value(),
        OutputMethod::Xml => serializer.write_xml_document(fragment),
        OutputMethod::Html => serializer.write_html_document(fragment),
    }
    serializer.out
}

struct Serializer<'s> {
    out: String,
    settings: &'s OutputSettings,
    method: OutputMethod,
}

impl Serializer<'_> {
    fn write_xml_document(&mut self, fragment: &Fragment) {
        let document_element = fragment.document_element();
        if document_element.is_some() && !self.settings.omit_xml_declaration {
            let version = self.settings.version.as_deref().unwrap_or("1.0");
            let _ = write!(
                self.out,
                "<?xml version=\"{}\" encoding=\"{}\"",
                version, self.settings.encoding
            );
            if let Some(standalone) = self.settings.standalone {
                let _ = write!(
                    self.out,
                    " standalone=\"{}\"",
                    if standalone { "yes" } else { "no" }
                );
            }
            self.out.push_str("?>\n");
        }
        if let (Some(FragmentNode::Element { name, .. }), Some(system)) =
            (document_element, &self.settings.doctype_system)
        {
            match &self.settings.doctype_public {
                Some(public) => {
                    let _ = writeln!(self.out, "<!DOCTYPE {} PUBLIC \"{}\" \"{}\">", name, public, system);
                }
                None => {
                    let _ = writeln!(self.out, "<!DOCTYPE {} SYSTEM \"{}\">", name, system);
                }
            }
        }
        for node in &fragment.nodes {
            self.write_node(node, 0, false);
        }
    }

    fn write_html_document(&mut self, fragment: &Fragment) {
        if self.settings.doctype_public.is_some() || self.settings.doctype_system.is_some() {
            let root = fragment
                .document_element()
                .and_then(|n| match n {
                    FragmentNode::Element { name, .. } => Some(name.as_str()),
                    _ => None,
                })
                .unwrap_or("html");
            self.out.push_str("<!DOCTYPE ");
            self.out.push_str(root);
            if let Some(public) = &self.settings.doctype_public {
                let _ = write!(self.out, " PUBLIC \"{}\"", public);
                if let Some(system) = &self.settings.doctype_system {
                    let _ = write!(self.out, " \"{}\"", system);
                }
            } else if let Some(system) = &self.settings.doctype_system {
                let _ = write!(self.out, " SYSTEM \"{}\"", system);
            }
            self.out.push_str(">\n");
        }
        for node in &fragment.nodes {
            self.write_node(node, 0, false);
        }
    }

    fn indent(&mut self, depth: usize) {
        self.out.push('\n');
        for _ in 0..depth {
            self.out.push_str("  ");
        }
    }

    fn write_node(&mut self, node: &FragmentNode, depth: usize, raw_text: bool) {
        match node {
            FragmentNode::Element {
                name,
                attributes,
                children,
            } => self.write_element(name, attributes, children, depth),
            FragmentNode::Text { content, escape } => {
                if !escape || raw_text {
                    self.out.push_str(content);
                } else {
                    escape_text(&mut self.out, content);
                }
            }
            FragmentNode::Comment(text) => {
                let _ = write!(self.out, "<!--{}-->", text);
            }
            FragmentNode::ProcessingInstruction { target, data } => {
                self.out.push_str("<?");
                self.out.push_str(target);
                if !data.is_empty() {
                    self.out.push(' ');
                    self.out.push_str(data);
                }
                self.out
                    .push_str(if self.method == OutputMethod::Html { ">" } else { "?>" });
            }
        }
    }

    fn write_element(
        &mut self,
        name: &str,
        attributes: &[(String, String)],
        children: &[FragmentNode],
        depth: usize,
    ) {
        let html = self.method == OutputMethod::Html && !name.contains(':');
        self.out.push('<');
        self.out.push_str(name);
        for (attr_name, value) in attributes {
            self.out.push(' ');
            self.out.push_str(attr_name);
            self.out.push_str("=\"");
            escape_attribute(&mut self.out, value, html);
            self.out.push('"');
        }

        let lower = name.to_ascii_lowercase();
        if html && HTML_VOID_ELEMENTS.contains(&lower.as_str()) {
            self.out.push('>');
            return;
        }
        if children.is_empty() && !html {
            self.out.push_str("/>");
            return;
        }
        self.out.push('>');

        let raw_text = html && matches!(lower.as_str(), "script" | "style");
        let cdata = !html && self.is_cdata_element(name);
        let element_only = children.iter().all(|c| match c {
            FragmentNode::Text { content, .. } => content.trim().is_empty(),
            _ => true,
        });
        let indent = self.settings.indent && element_only && !raw_text;

        for child in children {
            if indent {
                if let FragmentNode::Text { .. } = child {
                    continue;
                }
                self.indent(depth + 1);
            }
            match child {
                FragmentNode::Text { content, escape: true } if cdata => write_cdata(&mut self.out, content),
                _ => self.write_node(child, depth + 1, raw_text),
            }
        }
        if indent {
            self.indent(depth);
        }
        let _ = write!(self.out, "</{}>", name);
    }

    fn is_cdata_element(&self, name: &str) -> bool {
        self.settings
            .cdata_section_elements
            .iter()
            .any(|candidate| candidate == name)
    }
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// HTML keeps `<` and `>` in attribute values and leaves `&{` alone.
fn escape_attribute(out: &mut String, value: &str, html: bool) {
    let mut chars = value.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '&' if html && chars.peek() == Some(&'{') => out.push('&'),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' if !html => out.push_str("&lt;"),
            '>' if !html => out.push_str("&gt;"),
            '\n' if !html => out.push_str("&#10;"),
            '\t' if !html => out.push_str("&#9;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

fn write_cdata(out: &mut String, text: &str) {
    out.push_str("<![CDATA[");
    out.push_str(&text.replace("]]>", "]]]]><![CDATA[>"));
    out.push_str("]]>");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(name: &str, attributes: Vec<(&str, &str)>, children: Vec<FragmentNode>) -> FragmentNode {
        FragmentNode::Element {
            name: name.to_string(),
            attributes: attributes
                .into_iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            children,
        }
    }

    #[test]
    fn text_only_result_has_no_declaration() {
        let fragment = Fragment::new(vec![FragmentNode::text("1")]);
        assert_eq!(serialize(&fragment, &OutputSettings::default()), "1");
    }

    #[test]
    fn xml_document_with_declaration_and_escaping() {
        let fragment = Fragment::new(vec![element(
            "doc",
            vec![("title", "a \"b\" & c")],
            vec![FragmentNode::text("x < y"), element("empty", vec![], vec![])],
        )]);
        assert_eq!(
            serialize(&fragment, &OutputSettings::default()),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<doc title=\"a &quot;b&quot; &amp; c\">x &lt; y<empty/></doc>"
        );
    }

    #[test]
    fn html_is_detected_and_void_elements_are_not_closed() {
        let fragment = Fragment::new(vec![element(
            "html",
            vec![],
            vec![element(
                "body",
                vec![],
                vec![element("br", vec![], vec![]), element("p", vec![], vec![])],
            )],
        )]);
        let settings = OutputSettings::default();
        assert_eq!(effective_method(&settings, &fragment), OutputMethod::Html);
        assert_eq!(media_type(&settings, &fragment), "text/html");
        assert_eq!(
            serialize(&fragment, &settings),
            "<html><body><br><p></p></body></html>"
        );
    }

    #[test]
    fn indentation_only_for_element_content() {
        let fragment = Fragment::new(vec![element(
            "list",
            vec![],
            vec![element("item", vec![], vec![FragmentNode::text("one")])],
        )]);
        let settings = OutputSettings {
            indent: true,
            omit_xml_declaration: true,
            ..OutputSettings::default()
        };
        assert_eq!(
            serialize(&fragment, &settings),
            "<list>\n  <item>one</item>\n</list>"
        );
    }

    #[test]
    fn cdata_sections_and_raw_text() {
        let fragment = Fragment::new(vec![element(
            "script",
            vec![],
            vec![
                FragmentNode::text("a < b"),
                FragmentNode::Text {
                    content: "&nbsp;".into(),
                    escape: false,
                },
            ],
        )]);
        let settings = OutputSettings {
            omit_xml_declaration: true,
            cdata_section_elements: vec!["script".into()],
            method: Some(OutputMethod::Xml),
            ..OutputSettings::default()
        };
        assert_eq!(
            serialize(&fragment, &settings),
            "<script><![CDATA[a < b]]>&nbsp;</script>"
        );
    }

    #[test]
    fn text_method_drops_markup() {
        let fragment = Fragment::new(vec![element("a", vec![], vec![FragmentNode::text("plain")])]);
        let settings = OutputSettings {
            method: Some(OutputMethod::Text),
            ..OutputSettings::default()
        };
        assert_eq!(serialize(&fragment, &settings), "plain");
    }
}
