//! Handlers for conditionals, iteration and template invocation.

use super::Children;
use crate::ast::{CaseOrder, SortDataType, SortKey, SortOrder, When, XsltInstruction};
use crate::compiler::{Child, CompilerBuilder};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::util::{get_attr_optional, get_attr_required};

impl CompilerBuilder<'_> {
    fn required_expression(
        &self,
        event: &ElementEvent,
        attribute: &str,
    ) -> Result<folio_xpath1::Expression, XsltError> {
        let text = get_attr_required(&event.attrs, attribute, &event.name, &event.location)?;
        self.compile_xpath(&text, event)
    }

    pub(crate) fn finish_if(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        let test = self.required_expression(event, "test")?;
        let body = children.into_body("xsl:if")?;
        Ok(Child::instruction(event.location.clone(), XsltInstruction::If { test, body }))
    }

    pub(crate) fn finish_when(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        let test = self.required_expression(event, "test")?;
        let body = children.into_body("xsl:when")?;
        Ok(Child::When(When { test, body }, event.location.clone()))
    }

    pub(crate) fn finish_choose(
        &mut self,
        event: &ElementEvent,
        mut children: Children,
    ) -> Result<Child, XsltError> {
        let whens = children.take_whens();
        let mut otherwise = children.take_otherwise();
        let structure = |message: &str| XsltError::TemplateStructure {
            message: message.to_string(),
            location: event.location.clone(),
        };
        if whens.is_empty() {
            return Err(structure("xsl:choose must contain at least one xsl:when"));
        }
        if otherwise.len() > 1 {
            return Err(structure("xsl:choose may contain only one xsl:otherwise"));
        }
        if !children.into_body("xsl:choose")?.0.is_empty() {
            return Err(structure("xsl:choose may only contain xsl:when and xsl:otherwise"));
        }
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Choose {
                whens,
                otherwise: otherwise.pop(),
            },
        ))
    }

    pub(crate) fn finish_for_each(
        &mut self,
        event: &ElementEvent,
        mut children: Children,
    ) -> Result<Child, XsltError> {
        let select = self.required_expression(event, "select")?;
        let sort_keys = children.take_sorts();
        let body = children.into_body("xsl:for-each")?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::ForEach {
                select,
                sort_keys,
                body,
            },
        ))
    }

    pub(crate) fn finish_sort(&mut self, event: &ElementEvent, children: Children) -> Result<Child, XsltError> {
        if !children.is_empty() {
            return Err(XsltError::TemplateStructure {
                message: "xsl:sort must be empty".to_string(),
                location: event.location.clone(),
            });
        }
        let select_text = get_attr_optional(&event.attrs, "select").unwrap_or_else(|| ".".to_string());
        let select = self.compile_xpath(&select_text, event)?;
        let invalid = |attribute: &str, value: &str| XsltError::TemplateStructure {
            message: format!("Invalid value '{}' for attribute '{}' on xsl:sort", value, attribute),
            location: event.location.clone(),
        };

        let order = match get_attr_optional(&event.attrs, "order").as_deref().map(str::trim) {
            None | Some("ascending") => SortOrder::Ascending,
            Some("descending") => SortOrder::Descending,
            Some(other) => return Err(invalid("order", other)),
        };
        let data_type = match get_attr_optional(&event.attrs, "data-type").as_deref().map(str::trim) {
            None | Some("text") => SortDataType::Text,
            Some("number") => SortDataType::Number,
            Some(other) => return Err(invalid("data-type", other)),
        };
        let case_order = match get_attr_optional(&event.attrs, "case-order").as_deref().map(str::trim) {
            None => None,
            Some("upper-first") => Some(CaseOrder::UpperFirst),
            Some("lower-first") => Some(CaseOrder::LowerFirst),
            Some(other) => return Err(invalid("case-order", other)),
        };

        Ok(Child::Sort(
            SortKey {
                select,
                order,
                data_type,
                case_order,
            },
            event.location.clone(),
        ))
    }

    pub(crate) fn finish_apply_templates(
        &mut self,
        event: &ElementEvent,
        mut children: Children,
    ) -> Result<Child, XsltError> {
        let select = match get_attr_optional(&event.attrs, "select") {
            Some(text) => Some(self.compile_xpath(&text, event)?),
            None => None,
        };
        let mode = get_attr_optional(&event.attrs, "mode");
        let sort_keys = children.take_sorts();
        let params = children.take_with_params();
        if !children.into_body("xsl:apply-templates")?.0.is_empty() {
            return Err(XsltError::TemplateStructure {
                message: "xsl:apply-templates may only contain xsl:sort and xsl:with-param"
                    .to_string(),
                location: event.location.clone(),
            });
        }
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::ApplyTemplates {
                select,
                mode,
                sort_keys,
                params,
            },
        ))
    }

    pub(crate) fn finish_call_template(
        &mut self,
        event: &ElementEvent,
        mut children: Children,
    ) -> Result<Child, XsltError> {
        let name = get_attr_required(&event.attrs, "name", &event.name, &event.location)?;
        let params = children.take_with_params();
        if !children.into_body("xsl:call-template")?.0.is_empty() {
            return Err(XsltError::TemplateStructure {
                message: "xsl:call-template may only contain xsl:with-param".to_string(),
                location: event.location.clone(),
            });
        }
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::CallTemplate { name, params },
        ))
    }

    pub(crate) fn finish_apply_imports(
        &mut self,
        event: &ElementEvent,
        _children: Children,
    ) -> Result<Child, XsltError> {
        Ok(Child::instruction(event.location.clone(), XsltInstruction::ApplyImports))
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{SortDataType, SortOrder, XsltInstruction};
    use crate::compiler::CompilerBuilder;

    fn first_instruction(body: &str) -> Result<XsltInstruction, String> {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template name="t">{}</xsl:template></xsl:stylesheet>"#,
            body
        );
        let compiled = CompilerBuilder::new(None)
            .compile(&source, None)
            .map_err(|errors| errors[0].message.clone())?;
        compiled.named_templates["t"]
            .body
            .0
            .first()
            .map(|i| i.kind.clone())
            .ok_or_else(|| "empty template".to_string())
    }

    #[test]
    fn for_each_collects_sort_keys() {
        let instr = first_instruction(
            r#"<xsl:for-each select="item"><xsl:sort select="@n" data-type="number" order="descending"/><xsl:value-of select="."/></xsl:for-each>"#,
        )
        .unwrap();
        match instr {
            XsltInstruction::ForEach { sort_keys, body, .. } => {
                assert_eq!(sort_keys.len(), 1);
                assert_eq!(sort_keys[0].data_type, SortDataType::Number);
                assert_eq!(sort_keys[0].order, SortOrder::Descending);
                assert_eq!(body.0.len(), 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn choose_needs_a_when() {
        let err = first_instruction(r#"<xsl:choose><xsl:otherwise>x</xsl:otherwise></xsl:choose>"#)
            .unwrap_err();
        assert!(err.contains("xsl:when"));
    }

    #[test]
    fn choose_with_branches() {
        let instr = first_instruction(
            r#"<xsl:choose><xsl:when test="1">a</xsl:when><xsl:when test="2">b</xsl:when><xsl:otherwise>c</xsl:otherwise></xsl:choose>"#,
        )
        .unwrap();
        assert!(matches!(
            instr,
            XsltInstruction::Choose { ref whens, otherwise: Some(_) } if whens.len() == 2
        ));
    }

    #[test]
    fn apply_templates_with_params_and_mode() {
        let instr = first_instruction(
            r#"<xsl:apply-templates select="*" mode="toc"><xsl:with-param name="depth" select="1"/></xsl:apply-templates>"#,
        )
        .unwrap();
        match instr {
            XsltInstruction::ApplyTemplates { mode, params, select, .. } => {
                assert_eq!(mode.as_deref(), Some("toc"));
                assert_eq!(params[0].name, "depth");
                assert!(select.is_some());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn sort_outside_iteration_is_rejected() {
        let err = first_instruction(r#"<xsl:if test="1"><xsl:sort/></xsl:if>"#).unwrap_err();
        assert!(err.contains("xsl:sort is not allowed inside xsl:if"));
    }

    #[test]
    fn invalid_sort_order() {
        let err = first_instruction(
            r#"<xsl:for-each select="*"><xsl:sort order="sideways"/></xsl:for-each>"#,
        )
        .unwrap_err();
        assert!(err.contains("sideways"));
    }
}
