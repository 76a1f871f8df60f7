pub(super) mod control_flow;
pub(super) mod literals;
pub(super) mod stylesheet;
pub(super) mod variables;

use crate::ast::{Param, PreparsedTemplate, SortKey, When, WithParam};
use crate::compiler::{Child, CompilerBuilder, OpenElement};
use crate::error::{Location, XsltError};
use crate::parser::ElementEvent;

// Handlers run when an element closes: they receive the element's start
// tag and everything its children produced.

/// The closed children of an element, taken apart by the element's handler.
pub(crate) struct Children(Vec<Child>);

impl Children {
    pub(crate) fn new(children: Vec<Child>) -> Self {
        Children(children)
    }

    fn take<T>(&mut self, mut pick: impl FnMut(Child) -> Result<T, Child>) -> Vec<T> {
        let mut taken = Vec::new();
        let mut rest = Vec::new();
        for child in std::mem::take(&mut self.0) {
            match pick(child) {
                Ok(item) => taken.push(item),
                Err(child) => rest.push(child),
            }
        }
        self.0 = rest;
        taken
    }

    pub(crate) fn take_params(&mut self) -> Vec<Param> {
        self.take(|child| match child {
            Child::Param(param, _) => Ok(param),
            other => Err(other),
        })
    }

    pub(crate) fn take_sorts(&mut self) -> Vec<SortKey> {
        self.take(|child| match child {
            Child::Sort(key, _) => Ok(key),
            other => Err(other),
        })
    }

    pub(crate) fn take_with_params(&mut self) -> Vec<WithParam> {
        self.take(|child| match child {
            Child::WithParam(param, _) => Ok(param),
            other => Err(other),
        })
    }

    pub(crate) fn take_whens(&mut self) -> Vec<When> {
        self.take(|child| match child {
            Child::When(when, _) => Ok(when),
            other => Err(other),
        })
    }

    pub(crate) fn take_otherwise(&mut self) -> Vec<PreparsedTemplate> {
        self.take(|child| match child {
            Child::Otherwise(body, _) => Ok(body),
            other => Err(other),
        })
    }

    pub(crate) fn take_fallbacks(&mut self) -> Vec<PreparsedTemplate> {
        self.take(|child| match child {
            Child::Fallback(body) => Ok(body),
            other => Err(other),
        })
    }

    /// True when nothing but `xsl:fallback` was produced.
    pub(crate) fn is_empty(&self) -> bool {
        self.0.iter().all(|c| matches!(c, Child::Fallback(_)))
    }

    /// The instructions, rejecting children that only make sense in
    /// another parent.
    pub(crate) fn into_body(self, element: &str) -> Result<PreparsedTemplate, XsltError> {
        let mut body = Vec::with_capacity(self.0.len());
        for child in self.0 {
            let (misplaced, location) = match child {
                Child::Instr(instr) => {
                    body.push(instr);
                    continue;
                }
                Child::Fallback(_) => continue,
                Child::Sort(_, location) => ("xsl:sort", location),
                Child::WithParam(_, location) => ("xsl:with-param", location),
                Child::Param(_, location) => ("xsl:param", location),
                Child::When(_, location) => ("xsl:when", location),
                Child::Otherwise(_, location) => ("xsl:otherwise", location),
            };
            return Err(misplaced_error(misplaced, element, location));
        }
        Ok(PreparsedTemplate(body))
    }
}

pub(crate) fn misplaced_error(child: &str, parent: &str, location: Location) -> XsltError {
    XsltError::TemplateStructure {
        message: format!("{} is not allowed inside {}", child, parent),
        location,
    }
}

impl CompilerBuilder<'_> {
    /// Turns a closed element into what it contributes to its parent.
    pub(crate) fn finish_element(
        &mut self,
        open: OpenElement,
        children: Vec<Child>,
    ) -> Result<Vec<Child>, XsltError> {
        let OpenElement { event, top_level } = open;
        let children = Children::new(children);

        if !event.is_xslt() {
            if self.is_extension_element(&event) {
                return self.finish_unknown(&event, children);
            }
            return Ok(vec![self.finish_literal_element(&event, children)?]);
        }
        if top_level {
            self.finish_declaration(&event, children)?;
            return Ok(Vec::new());
        }

        let child = match event.local.as_str() {
            "apply-templates" => self.finish_apply_templates(&event, children)?,
            "call-template" => self.finish_call_template(&event, children)?,
            "apply-imports" => self.finish_apply_imports(&event, children)?,
            "value-of" => self.finish_value_of(&event, children)?,
            "copy-of" => self.finish_copy_of(&event, children)?,
            "copy" => self.finish_copy(&event, children)?,
            "element" => self.finish_xsl_element(&event, children)?,
            "attribute" => self.finish_xsl_attribute(&event, children)?,
            "comment" => self.finish_comment(&event, children)?,
            "processing-instruction" => self.finish_processing_instruction(&event, children)?,
            "message" => self.finish_message(&event, children)?,
            "number" => self.finish_number(&event, children)?,
            "if" => self.finish_if(&event, children)?,
            "choose" => self.finish_choose(&event, children)?,
            "when" => self.finish_when(&event, children)?,
            "otherwise" => Child::Otherwise(
                children.into_body("xsl:otherwise")?,
                event.location.clone(),
            ),
            "for-each" => self.finish_for_each(&event, children)?,
            "sort" => self.finish_sort(&event, children)?,
            "variable" => self.finish_variable(&event, children)?,
            "param" => self.finish_param(&event, children)?,
            "with-param" => self.finish_with_param(&event, children)?,
            "fallback" => Child::Fallback(children.into_body("xsl:fallback")?),
            "template" | "import" | "include" | "key" | "output" | "strip-space"
            | "preserve-space" | "attribute-set" | "decimal-format" | "namespace-alias"
            | "stylesheet" | "transform" => {
                return Err(XsltError::TemplateStructure {
                    message: format!("xsl:{} is only allowed at the top level", event.local),
                    location: event.location.clone(),
                });
            }
            _ => return self.finish_unknown(&event, children),
        };
        Ok(vec![child])
    }

    /// An instruction this processor does not implement runs its
    /// `xsl:fallback` children, or fails when it has none.
    fn finish_unknown(
        &mut self,
        event: &ElementEvent,
        mut children: Children,
    ) -> Result<Vec<Child>, XsltError> {
        let fallbacks = children.take_fallbacks();
        if fallbacks.is_empty() {
            return Err(XsltError::UnknownInstruction {
                name: event.name.clone(),
                location: event.location.clone(),
            });
        }
        log::debug!("Using xsl:fallback for unsupported <{}>", event.name);
        Ok(fallbacks
            .into_iter()
            .flat_map(|body| body.0)
            .map(Child::Instr)
            .collect())
    }
}
