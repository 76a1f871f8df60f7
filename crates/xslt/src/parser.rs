//! A "dumb" XML driver that reads an XSLT source file and notifies a builder object of events.
//!
//! The driver tracks namespace declarations so the builder sees resolved
//! element names, and it reports elements left open at the end of input,
//! which the underlying reader does not.
use super::compiler::StylesheetBuilder;
use crate::ast::Namespaces;
use crate::error::{Location, XsltError};
use crate::util::{OwnedAttributes, get_line_col_from_pos};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event as XmlEvent};

/// The namespace of XSLT 1.0 instructions.
pub const XSLT_NAMESPACE: &str = "http://www.w3.org/1999/XSL/Transform";

/// A start tag as seen by the builder.
#[derive(Debug, Clone)]
pub struct ElementEvent {
    /// The qualified name as written.
    pub name: String,
    /// The local part of the name.
    pub local: String,
    /// The resolved namespace URI of the element name.
    pub namespace: Option<String>,
    /// Non-namespace attributes. Attributes in the XSLT namespace are
    /// renamed to `xsl:local` whatever prefix was used.
    pub attrs: OwnedAttributes,
    /// Namespaces in scope on this element, its own declarations included.
    pub namespaces: Namespaces,
    pub location: Location,
}

impl ElementEvent {
    pub fn is_xslt(&self) -> bool {
        self.namespace.as_deref() == Some(XSLT_NAMESPACE)
    }
}

/// Drives the parsing process, calling builder methods for each significant XML event.
pub fn parse_stylesheet_content(
    source: &str,
    builder: &mut impl StylesheetBuilder,
) -> Result<(), XsltError> {
    let mut reader = Reader::from_str(source);
    reader.config_mut().trim_text(false);

    let mut scopes: Vec<Namespaces> = vec![Vec::new()];
    let mut open: Vec<(String, Location)> = Vec::new();
    let mut pending_text = String::new();
    let mut seen_root = false;
    let mut root_closed = false;

    let syntax_error = |reader: &Reader<&[u8]>, msg: String| {
        let (line, col) = get_line_col_from_pos(source, reader.error_position() as usize);
        XsltError::TemplateSyntax {
            msg,
            location: (line, col).into(),
        }
    };

    let outside_root = |root_closed: bool, pos: usize| {
        let msg = if root_closed {
            "Extra content at the end of the document"
        } else {
            "Start tag expected, '<' not found"
        };
        XsltError::TemplateSyntax {
            msg: msg.to_string(),
            location: get_line_col_from_pos(source, pos).into(),
        }
    };

    loop {
        let pos = reader.buffer_position() as usize;
        let event = match reader.read_event() {
            Ok(event) => event,
            // Some reader versions flag open tags at end of input themselves.
            Err(_) if reader.buffer_position() as usize >= source.len() && !open.is_empty() => {
                break;
            }
            Err(e) => return Err(syntax_error(&reader, e.to_string())),
        };
        match event {
            XmlEvent::Text(e) => {
                let raw_text = std::str::from_utf8(e.as_ref())?;
                let text = unescape(raw_text).map_err(|e| XsltError::TemplateSyntax {
                    msg: e.to_string(),
                    location: get_line_col_from_pos(source, pos).into(),
                })?;
                if open.is_empty() {
                    if !text.trim().is_empty() {
                        return Err(outside_root(root_closed, pos));
                    }
                    continue;
                }
                check_chars(&text, get_line_col_from_pos(source, pos).into())?;
                pending_text.push_str(&text);
            }
            XmlEvent::CData(e) => {
                if open.is_empty() {
                    return Err(outside_root(root_closed, pos));
                }
                let text = std::str::from_utf8(e.as_ref())?;
                check_chars(text, get_line_col_from_pos(source, pos).into())?;
                pending_text.push_str(text);
            }
            XmlEvent::GeneralRef(e) => {
                if open.is_empty() {
                    return Err(outside_root(root_closed, pos));
                }
                let name = std::str::from_utf8(e.as_ref())?;
                let location: Location = get_line_col_from_pos(source, pos).into();
                pending_text.push(resolve_reference(name, &location)?);
            }
            XmlEvent::Start(e) => {
                if root_closed {
                    return Err(outside_root(root_closed, pos));
                }
                flush_text(&mut pending_text, builder)?;
                let location: Location = get_line_col_from_pos(source, pos).into();
                let event = element_event(&reader, &e, &scopes, location.clone())?;
                seen_root = true;
                scopes.push(event.namespaces.clone());
                open.push((event.name.clone(), location));
                builder.start_element(event)?;
            }
            XmlEvent::Empty(e) => {
                if root_closed {
                    return Err(outside_root(root_closed, pos));
                }
                flush_text(&mut pending_text, builder)?;
                let location: Location = get_line_col_from_pos(source, pos).into();
                let event = element_event(&reader, &e, &scopes, location)?;
                seen_root = true;
                root_closed = open.is_empty();
                builder.empty_element(event)?;
            }
            XmlEvent::End(_) => {
                flush_text(&mut pending_text, builder)?;
                scopes.pop();
                let (name, _) = open.pop().unwrap_or_default();
                let location: Location = get_line_col_from_pos(source, pos).into();
                builder.end_element(&name, location)?;
                root_closed = open.is_empty();
            }
            XmlEvent::Comment(_) | XmlEvent::PI(_) => flush_text(&mut pending_text, builder)?,
            XmlEvent::Eof => break,
            _ => (),
        }
    }

    if let Some((name, location)) = open.last() {
        return Err(XsltError::TemplateSyntax {
            msg: format!(
                "Premature end of data in tag {} line {}",
                name, location.line
            ),
            location: location.clone(),
        });
    }
    if !seen_root {
        return Err(XsltError::TemplateSyntax {
            msg: "Document is empty".to_string(),
            location: (1, 1).into(),
        });
    }
    Ok(())
}

fn flush_text(pending: &mut String, builder: &mut impl StylesheetBuilder) -> Result<(), XsltError> {
    if pending.is_empty() {
        return Ok(());
    }
    builder.text(std::mem::take(pending))
}

/// Expands a character reference or one of the five predefined entities.
fn resolve_reference(name: &str, location: &Location) -> Result<char, XsltError> {
    let resolved = match name {
        "lt" => Some('<'),
        "gt" => Some('>'),
        "amp" => Some('&'),
        "apos" => Some('\''),
        "quot" => Some('"'),
        _ => name.strip_prefix('#').and_then(|num| {
            let code = match num.strip_prefix('x') {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse().ok(),
            };
            code.and_then(char::from_u32).filter(|c| is_xml_char(*c))
        }),
    };
    resolved.ok_or_else(|| {
        let msg = if name.starts_with('#') {
            format!("Character reference '&{};' is not a legal XML character", name)
        } else {
            format!("Entity '{}' not defined", name)
        };
        XsltError::TemplateSyntax {
            msg,
            location: location.clone(),
        }
    })
}

/// The XML 1.0 `Char` production.
fn is_xml_char(c: char) -> bool {
    matches!(
        c,
        '\u{9}' | '\u{A}' | '\u{D}' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'
    )
}

fn check_chars(text: &str, location: Location) -> Result<(), XsltError> {
    match text.chars().find(|c| !is_xml_char(*c)) {
        Some(c) => Err(XsltError::TemplateSyntax {
            msg: format!("Character U+{:04X} is not a legal XML character", u32::from(c)),
            location,
        }),
        None => Ok(()),
    }
}

fn element_event(
    reader: &Reader<&[u8]>,
    e: &BytesStart,
    scopes: &[Namespaces],
    location: Location,
) -> Result<ElementEvent, XsltError> {
    let name = std::str::from_utf8(e.name().as_ref())?.to_string();
    let mut namespaces = scopes.last().cloned().unwrap_or_default();
    let mut raw_attrs = Vec::new();

    for attr in e.attributes() {
        let attr = attr.map_err(|err| XsltError::TemplateSyntax {
            msg: err.to_string(),
            location: location.clone(),
        })?;
        let key = std::str::from_utf8(attr.key.as_ref())?.to_string();
        if attr.value.contains(&b'<') {
            return Err(XsltError::TemplateSyntax {
                msg: format!("Unescaped '<' not allowed in the value of attribute {}", key),
                location,
            });
        }
        let value = attr
            .decode_and_unescape_value(reader.decoder())
            .map_err(|err| XsltError::TemplateSyntax {
                msg: err.to_string(),
                location: location.clone(),
            })?
            .into_owned();
        check_chars(&value, location.clone())?;
        if key == "xmlns" {
            declare(&mut namespaces, None, value);
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            declare(&mut namespaces, Some(prefix.to_string()), value);
        } else {
            raw_attrs.push((key, value));
        }
    }

    let lookup = |prefix: Option<&str>| -> Option<String> {
        namespaces
            .iter()
            .find(|(p, _)| p.as_deref() == prefix)
            .map(|(_, uri)| uri.clone())
            .filter(|uri| !uri.is_empty())
    };

    let (prefix, local) = match name.split_once(':') {
        Some((p, l)) => (Some(p), l.to_string()),
        None => (None, name.clone()),
    };
    let namespace = lookup(prefix);
    if let (Some(p), None) = (prefix, &namespace) {
        if p != "xml" {
            return Err(XsltError::TemplateSyntax {
                msg: format!("Namespace prefix {} on {} is not defined", p, local),
                location,
            });
        }
    }

    let attrs = raw_attrs
        .into_iter()
        .map(|(key, value)| match key.split_once(':') {
            Some((p, l)) if lookup(Some(p)).as_deref() == Some(XSLT_NAMESPACE) => {
                (format!("xsl:{}", l), value)
            }
            _ => (key, value),
        })
        .collect();

    Ok(ElementEvent {
        name,
        local,
        namespace,
        attrs,
        namespaces,
        location,
    })
}

fn declare(namespaces: &mut Namespaces, prefix: Option<String>, uri: String) {
    namespaces.retain(|(p, _)| *p != prefix);
    namespaces.push((prefix, uri));
}
