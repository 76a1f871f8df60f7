//! Handlers for the stylesheet element and top-level declarations.

use super::Children;
use crate::ast::{
    AttributeSet, KeyDefinition, NamedTemplate, OutputMethod, SpaceTest, TemplateRule,
    XsltInstruction,
};
use crate::compiler::{BuilderState, CompilerBuilder, ScopeResolver};
use crate::error::XsltError;
use crate::parser::ElementEvent;
use crate::util::{get_attr_optional, get_attr_required, get_attr_yes_no, split_names};
use folio_xpath1::DecimalFormat;
use folio_xpath1::ast::NameResolver;
use std::sync::Arc;

impl CompilerBuilder<'_> {
    pub(crate) fn handle_stylesheet_start(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        self.state_stack.push(BuilderState::Stylesheet);
        if let Some(list) = get_attr_optional(&event.attrs, "exclude-result-prefixes") {
            let uris = self.resolve_prefixes(&list, event)?;
            self.exclude_namespaces(uris, false);
        }
        if let Some(list) = get_attr_optional(&event.attrs, "extension-element-prefixes") {
            let uris = self.resolve_prefixes(&list, event)?;
            self.exclude_namespaces(uris, true);
        }
        Ok(())
    }

    pub(crate) fn finish_declaration(
        &mut self,
        event: &ElementEvent,
        children: Children,
    ) -> Result<(), XsltError> {
        if event.local != "import" {
            // Fixes this module's precedence above everything imported so far.
            self.module_precedence();
        }
        match event.local.as_str() {
            "template" => self.finish_template(event, children),
            "variable" => self.finish_global_variable(event, children, false),
            "param" => self.finish_global_variable(event, children, true),
            "key" => self.finish_key(event),
            "output" => self.finish_output(event),
            "strip-space" => self.finish_space(event, true),
            "preserve-space" => self.finish_space(event, false),
            "attribute-set" => self.finish_attribute_set(event, children),
            "decimal-format" => self.finish_decimal_format(event),
            "namespace-alias" => self.finish_namespace_alias(event),
            "import" | "include" => {
                let href = get_attr_required(&event.attrs, "href", &event.name, &event.location)?;
                self.load_external(&href, event.local == "import")
            }
            _ => Err(XsltError::TemplateStructure {
                message: format!("{} is not allowed at the top level", event.name),
                location: event.location.clone(),
            }),
        }
    }

    fn finish_template(&mut self, event: &ElementEvent, mut children: Children) -> Result<(), XsltError> {
        let match_attr = get_attr_optional(&event.attrs, "match");
        let name = get_attr_optional(&event.attrs, "name");
        if match_attr.is_none() && name.is_none() {
            return Err(XsltError::TemplateStructure {
                message: "xsl:template must have a match or a name attribute".to_string(),
                location: event.location.clone(),
            });
        }
        let mode = get_attr_optional(&event.attrs, "mode");
        let priority = match get_attr_optional(&event.attrs, "priority") {
            Some(text) => Some(text.trim().parse::<f64>().map_err(|_| {
                XsltError::TemplateStructure {
                    message: format!("Invalid template priority '{}'", text),
                    location: event.location.clone(),
                }
            })?),
            None => None,
        };
        let pattern = match &match_attr {
            Some(text) => Some(self.compile_pattern(text, event)?),
            None => None,
        };
        let params = children.take_params();
        let body = Arc::new(children.into_body("xsl:template")?);
        let precedence = self.module_precedence();

        if let Some(name) = name {
            match self.stylesheet.named_templates.get(&name) {
                Some(existing) if existing.precedence == precedence => {
                    return Err(XsltError::TemplateStructure {
                        message: format!("Template '{}' is already defined", name),
                        location: event.location.clone(),
                    });
                }
                Some(existing) if existing.precedence > precedence => {}
                _ => {
                    self.stylesheet.named_templates.insert(
                        name,
                        NamedTemplate {
                            params: params.clone(),
                            body: body.clone(),
                            precedence,
                        },
                    );
                }
            }
        }

        if let Some(pattern) = pattern {
            for alternative in pattern.alternatives() {
                let priority = priority.unwrap_or_else(|| alternative.default_priority());
                let position = self.next_position();
                self.stylesheet
                    .template_rules
                    .entry(mode.clone())
                    .or_default()
                    .push(TemplateRule {
                        pattern: alternative,
                        priority,
                        precedence,
                        position,
                        mode: mode.clone(),
                        params: params.clone(),
                        body: body.clone(),
                        location: event.location.clone(),
                    });
            }
        }
        Ok(())
    }

    fn finish_key(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let name = get_attr_required(&event.attrs, "name", &event.name, &event.location)?;
        let match_text = get_attr_required(&event.attrs, "match", &event.name, &event.location)?;
        let use_text = get_attr_required(&event.attrs, "use", &event.name, &event.location)?;
        let definition = KeyDefinition {
            pattern: self.compile_pattern(&match_text, event)?,
            use_expr: self.compile_xpath(&use_text, event)?,
        };
        self.stylesheet.keys.entry(name).or_default().push(definition);
        Ok(())
    }

    /// Several `xsl:output` elements merge; later attributes win.
    fn finish_output(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let location = &event.location;
        let output = &mut self.stylesheet.output;
        for (key, value) in &event.attrs {
            match key.as_str() {
                "method" => {
                    output.method = Some(match value.trim() {
                        "xml" => OutputMethod::Xml,
                        "html" => OutputMethod::Html,
                        "text" => OutputMethod::Text,
                        other => {
                            return Err(XsltError::TemplateStructure {
                                message: format!("Unsupported output method '{}'", other),
                                location: location.clone(),
                            });
                        }
                    })
                }
                "version" => output.version = Some(value.clone()),
                "encoding" => output.encoding = value.trim().to_string(),
                "doctype-public" => output.doctype_public = Some(value.clone()),
                "doctype-system" => output.doctype_system = Some(value.clone()),
                "media-type" => output.media_type = Some(value.clone()),
                "cdata-section-elements" => output
                    .cdata_section_elements
                    .extend(value.split_whitespace().map(str::to_string)),
                _ => {}
            }
        }
        output.omit_xml_declaration =
            get_attr_yes_no(&event.attrs, "omit-xml-declaration", output.omit_xml_declaration, location)?;
        output.indent = get_attr_yes_no(&event.attrs, "indent", output.indent, location)?;
        if get_attr_optional(&event.attrs, "standalone").is_some() {
            output.standalone = Some(get_attr_yes_no(&event.attrs, "standalone", false, location)?);
        }
        Ok(())
    }

    fn finish_space(&mut self, event: &ElementEvent, strip: bool) -> Result<(), XsltError> {
        let elements = get_attr_required(&event.attrs, "elements", &event.name, &event.location)?;
        let resolver = ScopeResolver::new(&event.namespaces);
        let mut tests = Vec::new();
        for token in elements.split_whitespace() {
            let test = match token.split_once(':') {
                None if token == "*" => SpaceTest::Any,
                None => SpaceTest::Name(None, token.to_string()),
                Some((prefix, local)) => {
                    let uri = resolver.namespace_uri(prefix).ok_or_else(|| {
                        XsltError::TemplateStructure {
                            message: format!("Namespace prefix '{}' is not declared", prefix),
                            location: event.location.clone(),
                        }
                    })?;
                    if local == "*" {
                        SpaceTest::Namespace(Some(uri))
                    } else {
                        SpaceTest::Name(Some(uri), local.to_string())
                    }
                }
            };
            tests.push(test);
        }
        let rules = &mut self.stylesheet.whitespace;
        if strip {
            rules.strip.extend(tests);
        } else {
            rules.preserve.extend(tests);
        }
        Ok(())
    }

    fn finish_attribute_set(&mut self, event: &ElementEvent, children: Children) -> Result<(), XsltError> {
        let name = get_attr_required(&event.attrs, "name", &event.name, &event.location)?;
        let uses = split_names(get_attr_optional(&event.attrs, "use-attribute-sets"));
        let body = children.into_body("xsl:attribute-set")?;
        if let Some(other) = body
            .0
            .iter()
            .find(|instr| !matches!(instr.kind, XsltInstruction::Attribute { .. }))
        {
            return Err(XsltError::TemplateStructure {
                message: "xsl:attribute-set may only contain xsl:attribute".to_string(),
                location: other.location.clone(),
            });
        }
        let set = self
            .stylesheet
            .attribute_sets
            .entry(name)
            .or_insert_with(AttributeSet::default);
        set.use_attribute_sets.extend(uses);
        set.attributes.extend(body.0);
        Ok(())
    }

    fn finish_decimal_format(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let single_char = |key: &str, value: &str| -> Result<char, XsltError> {
            let mut chars = value.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(c),
                _ => Err(XsltError::TemplateStructure {
                    message: format!("Attribute '{}' must be a single character", key),
                    location: event.location.clone(),
                }),
            }
        };
        let mut format = DecimalFormat::default();
        let mut name = None;
        for (key, value) in &event.attrs {
            match key.as_str() {
                "name" => name = Some(value.clone()),
                "decimal-separator" => format.decimal_separator = single_char(key, value)?,
                "grouping-separator" => format.grouping_separator = single_char(key, value)?,
                "infinity" => format.infinity = value.clone(),
                "minus-sign" => format.minus_sign = single_char(key, value)?,
                "NaN" => format.nan = value.clone(),
                "percent" => format.percent = single_char(key, value)?,
                "per-mille" => format.per_mille = single_char(key, value)?,
                "zero-digit" => format.zero_digit = single_char(key, value)?,
                "digit" => format.digit = single_char(key, value)?,
                "pattern-separator" => format.pattern_separator = single_char(key, value)?,
                _ => {}
            }
        }
        self.stylesheet.decimal_formats.insert(name, format);
        Ok(())
    }

    fn finish_namespace_alias(&mut self, event: &ElementEvent) -> Result<(), XsltError> {
        let stylesheet_prefix =
            get_attr_required(&event.attrs, "stylesheet-prefix", &event.name, &event.location)?;
        let result_prefix =
            get_attr_required(&event.attrs, "result-prefix", &event.name, &event.location)?;
        let resolver = ScopeResolver::new(&event.namespaces);
        let lookup = |prefix: &str| -> Result<String, XsltError> {
            if prefix == "#default" {
                return Ok(resolver.default_namespace().unwrap_or_default());
            }
            resolver
                .namespace_uri(prefix)
                .ok_or_else(|| XsltError::TemplateStructure {
                    message: format!("Namespace prefix '{}' is not declared", prefix),
                    location: event.location.clone(),
                })
        };
        let from = lookup(stylesheet_prefix.trim())?;
        let to = lookup(result_prefix.trim())?;
        let prefix = match result_prefix.trim() {
            "#default" => None,
            other => Some(other.to_string()),
        };
        self.stylesheet.namespace_aliases.insert(from, (prefix, to));
        Ok(())
    }
}
