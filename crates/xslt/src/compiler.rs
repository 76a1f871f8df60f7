//! The stylesheet compiler. It receives events from the parser driver and
//! builds a [`CompiledStylesheet`].
//!
//! Errors do not stop compilation: each failing element is recorded as a
//! [`Diagnostic`] and skipped, so one run reports every problem it can find.

use crate::ast::{
    AttributeValueTemplate, CompiledStylesheet, Instruction, Namespaces, Param, PreparsedTemplate,
    SortKey, TemplateRule, When, WithParam, XsltInstruction,
};
use crate::error::{Diagnostic, Location, Severity, XsltError};
use crate::parser::{ElementEvent, XSLT_NAMESPACE, parse_stylesheet_content};
use crate::pattern::{self, Pattern};
use crate::resolver::StylesheetResolver;
use crate::util::{self, get_attr_optional, parse_avt};
use folio_xpath1::ast::NameResolver;
use folio_xpath1::functions::HOST_PREFIX;
use folio_xpath1::{Expression, XML_NAMESPACE, XPathError, parse_expression};
use std::collections::HashSet;
use std::sync::Arc;

/// The namespace that exposes registered host functions to XPath.
pub const HOST_NAMESPACE: &str = "urn:folio:host";

/// Receives the structural events of a stylesheet document.
pub trait StylesheetBuilder {
    fn start_element(&mut self, event: ElementEvent) -> Result<(), XsltError>;
    fn end_element(&mut self, name: &str, location: Location) -> Result<(), XsltError>;
    fn text(&mut self, text: String) -> Result<(), XsltError>;

    fn empty_element(&mut self, event: ElementEvent) -> Result<(), XsltError> {
        let name = event.name.clone();
        let location = event.location.clone();
        self.start_element(event)?;
        self.end_element(&name, location)
    }
}

/// What a closed stylesheet element hands to its parent.
#[derive(Debug)]
pub(crate) enum Child {
    Instr(Instruction),
    Sort(SortKey, Location),
    WithParam(WithParam, Location),
    Param(Param, Location),
    When(When, Location),
    Otherwise(PreparsedTemplate, Location),
    Fallback(PreparsedTemplate),
}

impl Child {
    pub(crate) fn instruction(location: Location, kind: XsltInstruction) -> Self {
        Child::Instr(Instruction { location, kind })
    }
}

#[derive(Debug)]
pub(crate) struct OpenElement {
    pub event: ElementEvent,
    /// True for direct children of `xsl:stylesheet`.
    pub top_level: bool,
}

#[derive(Debug)]
pub(crate) enum BuilderState {
    Stylesheet,
    /// A literal result element used as the whole stylesheet.
    SimplifiedRoot(Location),
    Element(OpenElement),
    XslText(OpenElement),
    /// A subtree that contributes nothing.
    Skipped,
}

/// One loaded stylesheet file.
struct Module {
    file: Option<Arc<str>>,
    source: Arc<str>,
    /// Assigned when the first non-import declaration is closed, so every
    /// module imported before it ends up with a lower precedence.
    precedence: Option<usize>,
    /// `state_stack` depth when the module started.
    base_depth: usize,
    excluded: HashSet<String>,
    extensions: HashSet<String>,
}

pub struct CompilerBuilder<'r> {
    pub(crate) state_stack: Vec<BuilderState>,
    pub(crate) instruction_stack: Vec<Vec<Child>>,
    pub(crate) stylesheet: CompiledStylesheet,
    modules: Vec<Module>,
    /// Files currently being loaded, for cycle detection.
    loading: Vec<String>,
    next_precedence: usize,
    next_position: usize,
    resolver: Option<&'r dyn StylesheetResolver>,
    diagnostics: Vec<Diagnostic>,
}

impl<'r> CompilerBuilder<'r> {
    pub fn new(resolver: Option<&'r dyn StylesheetResolver>) -> Self {
        Self {
            state_stack: Vec::new(),
            instruction_stack: Vec::new(),
            stylesheet: CompiledStylesheet::default(),
            modules: Vec::new(),
            loading: Vec::new(),
            next_precedence: 0,
            next_position: 0,
            resolver,
            diagnostics: Vec::new(),
        }
    }

    /// Compiles `source`. `file` names the stylesheet in diagnostics and is
    /// the base for relative `xsl:import`/`xsl:include` hrefs.
    pub fn compile(
        mut self,
        source: &str,
        file: Option<&str>,
    ) -> Result<CompiledStylesheet, Vec<Diagnostic>> {
        if let Some(file) = file {
            self.loading.push(file.to_string());
        }
        self.load_module(source, file.map(Arc::from), None);
        if self
            .diagnostics
            .iter()
            .any(|d| d.severity != Severity::Warning)
        {
            return Err(self.diagnostics);
        }
        for warning in &self.diagnostics {
            log::warn!("{}", warning);
        }
        Ok(self.finalize())
    }

    fn load_module(&mut self, source: &str, file: Option<Arc<str>>, precedence: Option<usize>) {
        log::debug!(
            "Compiling stylesheet module {}",
            file.as_deref().unwrap_or("<main>")
        );
        let source: Arc<str> = Arc::from(source);
        self.stylesheet
            .sources
            .insert(file.as_deref().unwrap_or("").to_string(), source.clone());
        let depth = self.state_stack.len();
        let instruction_depth = self.instruction_stack.len();
        self.modules.push(Module {
            file,
            source: source.clone(),
            precedence,
            base_depth: depth,
            excluded: HashSet::new(),
            extensions: HashSet::new(),
        });

        if let Err(e) = parse_stylesheet_content(&source, self) {
            self.report(e, None);
        }

        // A parse error can leave elements open.
        self.state_stack.truncate(depth);
        self.instruction_stack.truncate(instruction_depth);
        self.modules.pop();
    }

    /// Loads an `xsl:import` (`import = true`) or `xsl:include`.
    pub(crate) fn load_external(&mut self, href: &str, import: bool) -> Result<(), XsltError> {
        let import_error = |message: &str| XsltError::Import {
            href: href.to_string(),
            message: message.to_string(),
        };
        let resolver = self
            .resolver
            .ok_or_else(|| import_error("no stylesheet resolver is configured"))?;
        let resolved = resolver.resolve(href, self.current_file().as_deref())?;
        if self.loading.contains(&resolved.id) {
            return Err(import_error("the stylesheet imports or includes itself"));
        }
        let precedence = if import {
            if self.modules.last().is_some_and(|m| m.precedence.is_some()) {
                return Err(import_error(
                    "xsl:import must come before all other top-level elements",
                ));
            }
            None
        } else {
            Some(self.module_precedence())
        };

        self.loading.push(resolved.id.clone());
        self.load_module(&resolved.source, Some(Arc::from(resolved.id.as_str())), precedence);
        self.loading.pop();
        Ok(())
    }

    pub(crate) fn current_file(&self) -> Option<Arc<str>> {
        self.modules.last().and_then(|m| m.file.clone())
    }

    /// The import precedence of the module being compiled.
    pub(crate) fn module_precedence(&mut self) -> usize {
        let next = &mut self.next_precedence;
        match self.modules.last_mut() {
            Some(module) => *module.precedence.get_or_insert_with(|| {
                let assigned = *next;
                *next += 1;
                assigned
            }),
            None => 0,
        }
    }

    pub(crate) fn next_position(&mut self) -> usize {
        self.next_position += 1;
        self.next_position
    }

    /// Records a compile error for the module being compiled.
    pub(crate) fn report(&mut self, err: XsltError, fallback: Option<Location>) {
        let mut diagnostic = err.into_diagnostic(fallback);
        if let Some(module) = self.modules.last() {
            if let Some(location) = &mut diagnostic.location {
                if location.file.is_none() {
                    location.file = module.file.clone();
                }
            }
            diagnostic.context = diagnostic
                .line()
                .and_then(|line| util::source_line(&module.source, line));
        }
        log::debug!("Stylesheet error: {}", diagnostic);
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn exclude_namespaces(&mut self, uris: impl IntoIterator<Item = String>, extension: bool) {
        if let Some(module) = self.modules.last_mut() {
            for uri in uris {
                if extension {
                    module.extensions.insert(uri.clone());
                }
                module.excluded.insert(uri);
            }
        }
    }

    /// Namespaces a literal result element copies to the result.
    pub(crate) fn result_namespaces(&self, event: &ElementEvent, extra_excluded: &[String]) -> Namespaces {
        let module = self.modules.last();
        event
            .namespaces
            .iter()
            .filter(|(_, uri)| {
                uri != XSLT_NAMESPACE
                    && uri != HOST_NAMESPACE
                    && !extra_excluded.contains(uri)
                    && !module.is_some_and(|m| m.excluded.contains(uri))
            })
            .cloned()
            .collect()
    }

    pub(crate) fn is_extension_element(&self, event: &ElementEvent) -> bool {
        event.namespace.as_ref().is_some_and(|uri| {
            self.modules
                .last()
                .is_some_and(|m| m.extensions.contains(uri))
        })
    }

    /// Resolves a whitespace-separated list of prefixes (`#default` for
    /// the default namespace) to namespace URIs.
    pub(crate) fn resolve_prefixes(
        &self,
        list: &str,
        event: &ElementEvent,
    ) -> Result<Vec<String>, XsltError> {
        let resolver = ScopeResolver::new(&event.namespaces);
        list.split_whitespace()
            .map(|prefix| {
                let found = if prefix == "#default" {
                    resolver.default_namespace()
                } else {
                    resolver.namespace_uri(prefix)
                };
                found.ok_or_else(|| XsltError::TemplateStructure {
                    message: format!("Namespace prefix '{}' is not declared", prefix),
                    location: event.location.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn compile_xpath(&self, text: &str, event: &ElementEvent) -> Result<Expression, XsltError> {
        let mut expr = parse_expression(text).map_err(|e| match e {
            XPathError::XPathParse(source, message) => XsltError::XPathParse(source, message),
            other => XsltError::XPath(other),
        })?;
        expr.resolve_names(&ScopeResolver::new(&event.namespaces))?;
        Ok(expr)
    }

    pub(crate) fn compile_pattern(&self, text: &str, event: &ElementEvent) -> Result<Pattern, XsltError> {
        let mut compiled = pattern::parse(text)?;
        compiled.resolve_names(&ScopeResolver::new(&event.namespaces))?;
        Ok(compiled)
    }

    pub(crate) fn compile_avt(
        &self,
        text: &str,
        event: &ElementEvent,
    ) -> Result<AttributeValueTemplate, XsltError> {
        parse_avt(text, &ScopeResolver::new(&event.namespaces))
    }

    fn push_children(&mut self, children: Vec<Child>) {
        if let Some(parent) = self.instruction_stack.last_mut() {
            parent.extend(children);
        }
    }

    fn finish_simplified_root(&mut self, location: Location) {
        let body = self
            .instruction_stack
            .pop()
            .unwrap_or_default()
            .into_iter()
            .filter_map(|child| match child {
                Child::Instr(instr) => Some(instr),
                _ => None,
            })
            .collect();
        let precedence = self.module_precedence();
        let position = self.next_position();
        match pattern::parse("/") {
            Ok(root_pattern) => {
                self.stylesheet
                    .template_rules
                    .entry(None)
                    .or_default()
                    .push(TemplateRule {
                        priority: root_pattern.default_priority(),
                        pattern: root_pattern,
                        precedence,
                        position,
                        mode: None,
                        params: Vec::new(),
                        body: Arc::new(PreparsedTemplate(body)),
                        location,
                    });
            }
            Err(e) => self.report(e, None),
        }
    }

    fn finalize(mut self) -> CompiledStylesheet {
        for rules in self.stylesheet.template_rules.values_mut() {
            rules.sort_by(|a, b| {
                b.precedence
                    .cmp(&a.precedence)
                    .then(b.priority.total_cmp(&a.priority))
                    .then(b.position.cmp(&a.position))
            });
        }

        // A global declared in several modules: highest precedence wins,
        // then the last declaration.
        let mut globals = std::mem::take(&mut self.stylesheet.globals);
        globals.reverse();
        globals.sort_by(|a, b| b.precedence.cmp(&a.precedence));
        let mut seen = HashSet::new();
        globals.retain(|g| seen.insert(g.name.clone()));
        self.stylesheet.globals = globals;

        log::debug!(
            "Compiled stylesheet: {} modes, {} named templates, {} globals",
            self.stylesheet.template_rules.len(),
            self.stylesheet.named_templates.len(),
            self.stylesheet.globals.len()
        );
        self.stylesheet
    }
}

impl StylesheetBuilder for CompilerBuilder<'_> {
    fn start_element(&mut self, event: ElementEvent) -> Result<(), XsltError> {
        if let Err(e) = self.open_element(event) {
            self.report(e, None);
        }
        Ok(())
    }

    fn end_element(&mut self, _name: &str, _location: Location) -> Result<(), XsltError> {
        let Some(state) = self.state_stack.pop() else {
            return Ok(());
        };
        match state {
            BuilderState::Stylesheet | BuilderState::Skipped => {}
            BuilderState::SimplifiedRoot(location) => self.finish_simplified_root(location),
            BuilderState::XslText(open) => {
                let children = self.instruction_stack.pop().unwrap_or_default();
                match self.finish_xsl_text(open, children) {
                    Ok(child) => self.push_children(vec![child]),
                    Err(e) => self.report(e, None),
                }
            }
            BuilderState::Element(open) => {
                let children = self.instruction_stack.pop().unwrap_or_default();
                let location = open.event.location.clone();
                match self.finish_element(open, children) {
                    Ok(produced) => self.push_children(produced),
                    Err(e) => self.report(e, Some(location)),
                }
            }
        }

        if let Some(BuilderState::SimplifiedRoot(location)) = self.state_stack.last() {
            let location = location.clone();
            self.state_stack.pop();
            self.finish_simplified_root(location);
        }
        Ok(())
    }

    fn text(&mut self, text: String) -> Result<(), XsltError> {
        let location = match self.state_stack.last() {
            Some(BuilderState::XslText(open)) => open.event.location.clone(),
            Some(BuilderState::Element(open)) => {
                let preserve = get_attr_optional(&open.event.attrs, "xml:space")
                    .is_some_and(|v| v == "preserve");
                let blank = text
                    .chars()
                    .all(|c| matches!(c, ' ' | '\t' | '\r' | '\n'));
                if blank && !preserve {
                    return Ok(());
                }
                open.event.location.clone()
            }
            _ => return Ok(()),
        };
        self.push_children(vec![Child::instruction(location, XsltInstruction::Text(text))]);
        Ok(())
    }
}

impl CompilerBuilder<'_> {
    fn open_element(&mut self, mut event: ElementEvent) -> Result<(), XsltError> {
        event.location = event.location.clone().in_file(self.current_file());

        let at_document_element = self
            .modules
            .last()
            .is_some_and(|m| m.base_depth == self.state_stack.len());
        if at_document_element {
            return self.handle_document_element(event);
        }

        match self.state_stack.last() {
            Some(BuilderState::Skipped) => {
                self.state_stack.push(BuilderState::Skipped);
                return Ok(());
            }
            Some(BuilderState::XslText(_)) => {
                self.state_stack.push(BuilderState::Skipped);
                return Err(XsltError::TemplateStructure {
                    message: "xsl:text may only contain text".to_string(),
                    location: event.location,
                });
            }
            // Non-XSLT elements at the top level are user data.
            Some(BuilderState::Stylesheet) if !event.is_xslt() => {
                self.state_stack.push(BuilderState::Skipped);
                return Ok(());
            }
            _ => {}
        }

        let top_level = matches!(self.state_stack.last(), Some(BuilderState::Stylesheet));
        let open = OpenElement { event, top_level };
        if open.event.is_xslt() && open.event.local == "text" {
            self.state_stack.push(BuilderState::XslText(open));
        } else {
            self.state_stack.push(BuilderState::Element(open));
        }
        self.instruction_stack.push(Vec::new());
        Ok(())
    }

    fn handle_document_element(&mut self, event: ElementEvent) -> Result<(), XsltError> {
        if event.is_xslt() && matches!(event.local.as_str(), "stylesheet" | "transform") {
            self.handle_stylesheet_start(&event)?;
            return Ok(());
        }
        if !event.is_xslt() && get_attr_optional(&event.attrs, "xsl:version").is_some() {
            let location = event.location.clone();
            self.module_precedence();
            self.state_stack.push(BuilderState::SimplifiedRoot(location));
            self.instruction_stack.push(Vec::new());
            self.state_stack.push(BuilderState::Element(OpenElement {
                event,
                top_level: false,
            }));
            self.instruction_stack.push(Vec::new());
            return Ok(());
        }
        self.state_stack.push(BuilderState::Skipped);
        Err(XsltError::TemplateStructure {
            message: format!(
                "<{}> is not a stylesheet: expected xsl:stylesheet or a literal result element with xsl:version",
                event.name
            ),
            location: event.location,
        })
    }
}

/// Resolves prefixes against the namespaces in scope on a stylesheet element.
pub(crate) struct ScopeResolver<'n> {
    namespaces: &'n Namespaces,
}

impl<'n> ScopeResolver<'n> {
    pub(crate) fn new(namespaces: &'n Namespaces) -> Self {
        Self { namespaces }
    }

    pub(crate) fn default_namespace(&self) -> Option<String> {
        self.namespaces
            .iter()
            .find(|(p, _)| p.is_none())
            .map(|(_, uri)| uri.clone())
    }
}

impl NameResolver for ScopeResolver<'_> {
    fn namespace_uri(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some(XML_NAMESPACE.to_string());
        }
        self.namespaces
            .iter()
            .find(|(p, _)| p.as_deref() == Some(prefix))
            .map(|(_, uri)| uri.clone())
    }

    /// Functions in the host namespace become `host:name` whatever prefix
    /// the stylesheet used; other prefixed functions are keyed by
    /// `{uri}name` so they never collide with host functions.
    fn rename_function(&self, name: &str) -> Result<Option<String>, XPathError> {
        let Some((prefix, local)) = name.split_once(':') else {
            return Ok(None);
        };
        let uri = self
            .namespace_uri(prefix)
            .ok_or_else(|| XPathError::UndefinedPrefix(prefix.to_string()))?;
        if uri == HOST_NAMESPACE {
            Ok(Some(format!("{}{}", HOST_PREFIX, local)))
        } else {
            Ok(Some(format!("{{{}}}{}", uri, local)))
        }
    }
}
