use super::Children;
use crate::ast::{GlobalVariable, Param, VariableValue, WithParam, XsltInstruction};
use crate::compiler::{Child, CompilerBuilder};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::util::{get_attr_optional, get_attr_required};

impl CompilerBuilder<'_> {
    /// `select` and content are exclusive; with neither the value is `""`.
    fn variable_value(
        &self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<VariableValue, XsltError> {
        if let Some(select) = get_attr_optional(&event.attrs, "select") {
            if !children.is_empty() {
                return Err(XsltError::TemplateStructure {
                    message: format!("{} with a select attribute must be empty", event.name),
                    location: event.location.clone(),
                });
            }
            return Ok(VariableValue::Select(self.compile_xpath(&select, event)?));
        }
        let body = children.into_body(&event.name)?;
        if body.0.is_empty() {
            Ok(VariableValue::Empty)
        } else {
            Ok(VariableValue::Content(body))
        }
    }

    fn binding_name(&self, event: &ElementEvent) -> Result<String, XsltError> {
        get_attr_required(&event.attrs, "name", &event.name, &event.location)
    }

    pub(crate) fn finish_variable(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let name = self.binding_name(event)?;
        let value = self.variable_value(event, children)?;
        Ok(Child::instruction(
            event.location.clone(),
            XsltInstruction::Variable { name, value },
        ))
    }

    pub(crate) fn finish_param(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let name = self.binding_name(event)?;
        let default = self.variable_value(event, children)?;
        Ok(Child::Param(Param { name, default }, event.location.clone()))
    }

    pub(crate) fn finish_with_param(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<Child, XsltError> {
        let name = self.binding_name(event)?;
        let value = self.variable_value(event, children)?;
        Ok(Child::WithParam(WithParam { name, value }, event.location.clone()))
    }

    pub(crate) fn finish_global_variable(
        &mut self,
        event: &ElementEvent,
        children: Children,
        is_param: bool,
    ) -> Result<(), XsltError> {
        let name = self.binding_name(event)?;
        let value = self.variable_value(event, children)?;
        let precedence = self.module_precedence();
        if self
            .stylesheet
            .globals
            .iter()
            .any(|g| g.name == name && g.precedence == precedence)
        {
            return Err(XsltError::TemplateStructure {
                message: format!("Global variable '{}' is already defined", name),
                location: event.location.clone(),
            });
        }
        self.stylesheet.globals.push(GlobalVariable {
            name,
            value,
            is_param,
            precedence,
            location: event.location.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::{VariableValue, XsltInstruction};
    use crate::compiler::CompilerBuilder;

    fn compile_template(body: &str) -> Result<Vec<XsltInstruction>, String> {
        let source = format!(
            r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform"><xsl:template name="t">{}</xsl:template></xsl:stylesheet>"#,
            body
        );
        let compiled = CompilerBuilder::new(None)
            .compile(&source, None)
            .map_err(|errors| errors[0].message.clone())?;
        Ok(compiled.named_templates["t"]
            .body
            .0
            .iter()
            .map(|i| i.kind.clone())
            .collect())
    }

    #[test]
    fn variable_forms() {
        let body = compile_template(
            r#"<xsl:variable name="a" select="1"/><xsl:variable name="b"><x/></xsl:variable><xsl:variable name="c"/>"#,
        )
        .unwrap();
        assert!(matches!(&body[0], XsltInstruction::Variable { value: VariableValue::Select(_), .. }));
        assert!(matches!(&body[1], XsltInstruction::Variable { value: VariableValue::Content(_), .. }));
        assert!(matches!(&body[2], XsltInstruction::Variable { value: VariableValue::Empty, .. }));
    }

    #[test]
    fn select_and_content_conflict() {
        let err = compile_template(r#"<xsl:variable name="a" select="1">x</xsl:variable>"#).unwrap_err();
        assert!(err.contains("must be empty"));
    }

    #[test]
    fn params_are_collected_on_the_template() {
        let source = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
            <xsl:template name="t"><xsl:param name="p" select="2"/><xsl:value-of select="$p"/></xsl:template>
            <xsl:param name="g"/>
        </xsl:stylesheet>"#;
        let compiled = CompilerBuilder::new(None).compile(source, None).unwrap();
        let template = &compiled.named_templates["t"];
        assert_eq!(template.params[0].name, "p");
        assert_eq!(template.body.0.len(), 1);
        assert!(compiled.globals[0].is_param);
    }

    #[test]
    fn with_param_outside_a_call_is_rejected() {
        let err = compile_template(r#"<xsl:with-param name="p"/>"#).unwrap_err();
        assert!(err.contains("xsl:with-param"));
    }
}
