//! Handlers for instructions that write to the result tree.

use super::Children;
use crate::ast::{AttributeValueTemplate, NumberLevel, XsltInstruction};
use crate::compiler::{Child, CompilerBuilder, OpenElement};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::util::{get_attr_optional, get_attr_required, get_attr_yes_no, split_names};

impl CompilerBuilder<'_> {
    pub(crate) fn finish_literal_element(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let extra_excluded = match get_attr_optional(&event.attrs, "xsl:exclude-result-prefixes") {
            Some(list) => self.resolve_prefixes(&list, event)?,
            None => Vec::new(),
        };
        let use_attribute_sets =
            split_names(get_attr_optional(&event.attrs, "xsl:use-attribute-sets"));

        let mut attrs = Vec::new();
        for (name, value) in &event.attrs {
            if name.starts_with("xsl:") {
                continue;
            }
            attrs.push((name.clone(), self.compile_avt(value, event)?));
        }

        // Prefixes used by the element or its attributes stay declared even
        // when excluded.
        let mut namespaces = self.result_namespaces(event, &extra_excluded);
        let used_prefixes = std::iter::once(event.name.as_str())
            .chain(attrs.iter().map(|(name, _)| name.as_str()))
            .filter_map(|name| name.split_once(':').map(|(prefix, _)| prefix))
            .filter(|prefix| *prefix != "xml");
        for prefix in used_prefixes {
            let prefix = Some(prefix.to_string());
            if namespaces.iter().any(|(p, _)| *p == prefix) {
                continue;
            }
            if let Some((_, uri)) = event.namespaces.iter().find(|(p, _)| *p == prefix) {
                namespaces.push((prefix, uri.clone()));
            }
        }
        if !event.name.contains(':') {
            if let Some(uri) = &event.namespace {
                if !namespaces.iter().any(|(p, _)| p.is_none()) {
                    namespaces.push((None, uri.clone()));
                }
            }
        }

        let body = children.into_body(&event.name)?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::LiteralElement {
                name: event.name.clone(),
                namespaces,
                attrs,
                use_attribute_sets,
                body,
            },
        ))
    }

    pub(crate) fn finish_xsl_text(
        &mut self,
        open: OpenElement,
        children: Vec<Child>,
    ) -> Result<Child, XsltError> {
        let event = open.event;
        let disable_escaping =
            get_attr_yes_no(&event.attrs, "disable-output-escaping", false, &event.location)?;
        let text = children
            .into_iter()
            .filter_map(|child| match child {
                Child::Instr(instr) => match instr.kind {
                    XsltInstruction::Text(text) => Some(text),
                    _ => None,
                },
                _ => None,
            })
            .collect();
        Ok(Child::instruction(
            event.location,
            XsltInstruction::XslText {
                text,
                disable_escaping,
            },
        ))
    }

    pub(crate) fn finish_value_of(
        &mut self,
        event: &ElementEvent,
        _children: Children,
    ) -> Result<Child, XsltError> {
        let text = get_attr_required(&event.attrs, "select", &event.name, &event.location)?;
        let select = self.compile_xpath(&text, event)?;
        let disable_escaping =
            get_attr_yes_no(&event.attrs, "disable-output-escaping", false, &event.location)?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::ValueOf {
                select,
                disable_escaping,
            },
        ))
    }

    pub(crate) fn finish_copy_of(
        &mut self,
        event: &ElementEvent,
        _children: Children,
    ) -> Result<Child, XsltError> {
        let text = get_attr_required(&event.attrs, "select", &event.name, &event.location)?;
        let select = self.compile_xpath(&text, event)?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::CopyOf { select },
        ))
    }

    pub(crate) fn finish_copy(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        let use_attribute_sets = split_names(get_attr_optional(&event.attrs, "use-attribute-sets"));
        let body = children.into_body("xsl:copy")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Copy {
                use_attribute_sets,
                body,
            },
        ))
    }

    fn name_and_namespace(
        &self,
        event: &ElementEvent,
    ) -> Result<(AttributeValueTemplate, Option<AttributeValueTemplate>), XsltError> {
        let name = get_attr_required(&event.attrs, "name", &event.name, &event.location)?;
        let name = self.compile_avt(&name, event)?;
        let namespace = match get_attr_optional(&event.attrs, "namespace") {
            Some(text) => Some(self.compile_avt(&text, event)?),
            None => None,
        };
        Ok((name, namespace))
    }

    pub(crate) fn finish_xsl_element(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let (name, namespace) = self.name_and_namespace(event)?;
        let use_attribute_sets = split_names(get_attr_optional(&event.attrs, "use-attribute-sets"));
        let body = children.into_body("xsl:element")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Element {
                name,
                namespace,
                namespaces: event.namespaces.clone(),
                use_attribute_sets,
                body,
            },
        ))
    }

    pub(crate) fn finish_xsl_attribute(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let (name, namespace) = self.name_and_namespace(event)?;
        let body = children.into_body("xsl:attribute")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Attribute {
                name,
                namespace,
                namespaces: event.namespaces.clone(),
                body,
            },
        ))
    }

    pub(crate) fn finish_comment(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        let body = children.into_body("xsl:comment")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Comment { body },
        ))
    }

    pub(crate) fn finish_processing_instruction(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let name = get_attr_required(&event.attrs, "name", &event.name, &event.location)?;
        let name = self.compile_avt(&name, event)?;
        let body = children.into_body("xsl:processing-instruction")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::ProcessingInstruction { name, body },
        ))
    }

    pub(crate) fn finish_message(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        let terminate = get_attr_yes_no(&event.attrs, "terminate", false, &event.location)?;
        let body = children.into_body("xsl:message")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Message { terminate, body },
        ))
    }

    pub(crate) fn finish_number(&mut self, event: &ElementEvent, _children: Children) -> Result<Child, XsltError> {
        let value = match get_attr_optional(&event.attrs, "value") {
            Some(text) => Some(self.compile_xpath(&text, event)?),
            None => None,
        };
        let count = match get_attr_optional(&event.attrs, "count") {
            Some(text) => Some(self.compile_pattern(&text, event)?),
            None => None,
        };
        let from = match get_attr_optional(&event.attrs, "from") {
            Some(text) => Some(self.compile_pattern(&text, event)?),
            None => None,
        };
        let level = match get_attr_optional(&event.attrs, "level").as_deref().map(str::trim) {
            None | Some("single") => NumberLevel::Single,
            Some("multiple") => NumberLevel::Multiple,
            Some("any") => NumberLevel::Any,
            Some(other) => {
                return Err(XsltError::TemplateStructure {
                    message: format!("Invalid xsl:number level '{}'", other),
                    location: event.location.clone(),
                });
            }
        };
        let format = match get_attr_optional(&event.attrs, "format") {
            Some(text) => self.compile_avt(&text, event)?,
            None => AttributeValueTemplate::literal("1"),
        };
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Number {
                value,
                count,
                from,
                level,
                format,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{AvtPart, XsltInstruction};
    use crate::compiler::CompilerBuilder;

    fn template_body(body: &str) -> Vec<XsltInstruction> {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform" xmlns:h="urn:host-data" exclude-result-prefixes="h"><xsl:template name="t">{}</xsl:template></xsl:stylesheet>"#,
            body
        );
        let compiled = CompilerBuilder::new(None).compile(&source, None).unwrap();
        compiled.named_templates["t"]
            .body
            .0
            .iter()
            .map(|i| i.kind.clone())
            .collect()
    }

    #[test]
    fn literal_element_attributes_are_templates() {
        let body = template_body(r#"<a href="/page/{@id}" xsl:use-attribute-sets="links">go</a>"#);
        match &body[0] {
            XsltInstruction::LiteralElement {
                name,
                attrs,
                use_attribute_sets,
                namespaces,
                body,
            } => {
                assert_eq!(name, "a");
                assert_eq!(attrs.len(), 1);
                assert_eq!(attrs[0].1.0[0], AvtPart::Static("/page/".into()));
                assert_eq!(use_attribute_sets, &vec!["links".to_string()]);
                assert!(namespaces.is_empty());
                assert_eq!(body.0.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn excluded_prefix_stays_when_used() {
        let body = template_body(r#"<h:box/><plain/>"#);
        match (&body[0], &body[1]) {
            (
                XsltInstruction::LiteralElement { namespaces: used, .. },
                XsltInstruction::LiteralElement { namespaces: unused, .. },
            ) => {
                assert_eq!(used, &vec![(Some("h".to_string()), "urn:host-data".to_string())]);
                assert!(unused.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn number_defaults() {
        let body = template_body(r#"<xsl:number/>"#);
        match &body[0] {
            XsltInstruction::Number { format, value, .. } => {
                assert_eq!(format.as_static().as_deref(), Some("1"));
                assert!(value.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn message_terminate_flag() {
        let body = template_body(r#"<xsl:message terminate="yes">stop</xsl:message>"#);
        assert!(matches!(&body[0], XsltInstruction::Message { terminate: true, .. }));
    }
}
