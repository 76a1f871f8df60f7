//! The XSLT "push" model: a stateful executor that walks a data source,
//! picks template rules and drives an [`OutputBuilder`].
//!
//! Errors inside an instruction are recorded as diagnostics and the
//! instruction is skipped. Only fatal errors (the recursion limit and
//! `xsl:message terminate="yes"`) stop the transformation.

use crate::ast::{
    AttributeValueTemplate, AvtPart, CaseOrder, CompiledStylesheet, Instruction, Namespaces,
    Param, PreparsedTemplate, SortDataType, SortKey, SortOrder, TemplateRule, VariableValue,
    WithParam, XsltInstruction,
};
use crate::error::{Diagnostic, Location, Phase, Severity, codes};
use crate::executor_handlers::{
    apply_templates, call_template, control_flow, copy, for_each, literals, message, number,
    variables,
};
use crate::output::{OutputBuilder, ResultTreeBuilder};
use crate::pattern::Pattern;
use folio_xpath1::datasource::DataSourceNode;
use folio_xpath1::{
    EvaluationContext, Expression, Fragment, FunctionRegistry, NodeType, Variables, XPathError,
    XPathValue,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::Rc;
use thiserror::Error;

/// Nesting limit for template invocations.
pub const DEFAULT_MAX_DEPTH: usize = 3000;

/// Instruction names reported by `element-available()`.
const XSLT_INSTRUCTIONS: &[&str] = &[
    "apply-imports",
    "apply-templates",
    "attribute",
    "call-template",
    "choose",
    "comment",
    "copy",
    "copy-of",
    "element",
    "fallback",
    "for-each",
    "if",
    "message",
    "number",
    "processing-instruction",
    "text",
    "value-of",
    "variable",
];

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("XPath evaluation failed: {0}")]
    XPath(#[from] XPathError),

    #[error("Unknown named template '{0}'")]
    UnknownNamedTemplate(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Template nesting exceeded {0} levels; the stylesheet probably recurses without end")]
    RecursionLimit(usize),

    #[error("Transformation terminated by xsl:message: {0}")]
    Terminated(String),

    #[error("{0}")]
    ResultTree(String),
}

impl ExecutionError {
    /// Fatal errors end the transformation without a result.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutionError::RecursionLimit(_) | ExecutionError::Terminated(_)
        )
    }

    pub fn code(&self) -> u32 {
        match self {
            ExecutionError::XPath(XPathError::HostFunction { .. }) => codes::HOST_FUNCTION,
            ExecutionError::XPath(_) | ExecutionError::TypeError(_) => codes::XPATH_EVALUATION,
            ExecutionError::UnknownNamedTemplate(_) => codes::UNKNOWN_TEMPLATE,
            ExecutionError::RecursionLimit(_) => codes::RECURSION_LIMIT,
            ExecutionError::Terminated(_) => codes::TERMINATED,
            ExecutionError::ResultTree(_) => codes::RESULT_TREE,
        }
    }
}

/// The context node with its position in the current node list.
#[derive(Debug, Clone, Copy)]
pub struct Focus<N> {
    pub node: N,
    pub position: usize,
    pub size: usize,
}

impl<N> Focus<N> {
    pub fn single(node: N) -> Self {
        Focus {
            node,
            position: 1,
            size: 1,
        }
    }
}

/// Local scopes of the running template, then globals.
struct ScopeView<'v, N> {
    locals: &'v [HashMap<String, XPathValue<N>>],
    globals: &'v HashMap<String, XPathValue<N>>,
}

impl<N: Clone> Variables<N> for ScopeView<'_, N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.locals
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.globals.get(name))
            .cloned()
    }
}

/// The rule `xsl:apply-imports` continues from.
#[derive(Debug, Clone)]
pub(crate) struct RuleRef {
    pub mode: Option<String>,
    pub precedence: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Text(String),
    Number(f64),
}

pub struct TemplateExecutor<'s, 'a, N: DataSourceNode<'a>> {
    pub(crate) stylesheet: &'s CompiledStylesheet,
    pub(crate) functions: FunctionRegistry,
    pub(crate) root_node: N,
    scopes: Vec<HashMap<String, XPathValue<N>>>,
    /// First scope of the running template; callers' locals are below it.
    frame_base: usize,
    globals: HashMap<String, XPathValue<N>>,
    key_indexes: HashMap<String, HashMap<String, Vec<N>>>,
    pub(crate) strict: bool,
    depth: usize,
    max_depth: usize,
    /// `None` while no template rule is current, e.g. inside `xsl:for-each`.
    pub(crate) current_rules: Vec<Option<RuleRef>>,
    location: Location,
    diagnostics: Vec<Diagnostic>,
    fatal_recorded: bool,
    _marker: PhantomData<&'a ()>,
}

impl<'s, 'a, N: DataSourceNode<'a> + 'a> TemplateExecutor<'s, 'a, N> {
    pub fn new(stylesheet: &'s CompiledStylesheet, root_node: N, mut functions: FunctionRegistry) -> Self {
        for (name, format) in &stylesheet.decimal_formats {
            functions.set_decimal_format(name.as_deref(), format.clone());
        }
        functions.set_available_elements(
            XSLT_INSTRUCTIONS
                .iter()
                .map(|name| format!("xsl:{}", name)),
        );
        functions.set_lenient_host(true);
        Self {
            stylesheet,
            functions,
            root_node,
            scopes: Vec::new(),
            frame_base: 0,
            globals: HashMap::new(),
            key_indexes: HashMap::new(),
            strict: true,
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            current_rules: Vec::new(),
            location: Location::default(),
            diagnostics: Vec::new(),
            fatal_recorded: false,
            _marker: PhantomData,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// In non-strict mode unbound variables evaluate to an empty string.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Runs the transformation. `params` override global `xsl:param`s.
    /// On a fatal error the diagnostics still hold everything recorded.
    pub fn build_tree(&mut self, params: &[(String, String)]) -> Result<Fragment, ExecutionError> {
        self.build_key_indexes();
        self.evaluate_globals(params)?;

        let root = self.root_node;
        let mut builder = ResultTreeBuilder::new();
        self.apply_templates_to_nodes(&[root], None, &HashMap::new(), &mut builder)?;
        log::debug!(
            "Transformation finished with {} diagnostics",
            self.diagnostics.len()
        );
        Ok(builder.finish())
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    // --- Diagnostics ---

    fn push_diagnostic(&mut self, diagnostic: Diagnostic, location: Option<&Location>) {
        let context = location.and_then(|l| {
            self.stylesheet
                .source_line(l.file.as_deref(), l.line)
        });
        let diagnostic = diagnostic.at(location.cloned()).with_context(context);
        match diagnostic.severity {
            Severity::Fatal => log::error!("{}", diagnostic),
            _ => log::warn!("{}", diagnostic),
        }
        self.diagnostics.push(diagnostic);
    }

    pub(crate) fn record(&mut self, err: &ExecutionError, location: &Location) {
        if self.fatal_recorded {
            return;
        }
        let severity = if err.is_fatal() {
            self.fatal_recorded = true;
            Severity::Fatal
        } else {
            Severity::Error
        };
        let diagnostic = Diagnostic::new(err.code(), err.to_string(), severity, Phase::Runtime);
        self.push_diagnostic(diagnostic, Some(location));
    }

    /// Records an `xsl:message` at the running instruction.
    pub(crate) fn record_message(&mut self, text: &str) {
        let location = self.location.clone();
        let diagnostic = Diagnostic::new(codes::MESSAGE, text, Severity::Warning, Phase::Runtime);
        self.push_diagnostic(diagnostic, Some(&location));
    }

    fn record_host_failures(&mut self) {
        for failure in self.functions.take_host_failures() {
            let location = self.location.clone();
            self.record(&ExecutionError::XPath(failure), &location);
        }
    }

    // --- Scope Management ---

    pub(crate) fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    pub(crate) fn pop_scope(&mut self) {
        if self.scopes.len() > self.frame_base {
            self.scopes.pop();
        }
    }

    pub(crate) fn set_variable_in_current_scope(&mut self, name: String, value: XPathValue<N>) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name, value);
        } else {
            self.globals.insert(name, value);
        }
    }

    /// Runs `f` as a new template invocation: one level deeper, with only
    /// globals visible.
    pub(crate) fn invoke<F>(&mut self, f: F) -> Result<(), ExecutionError>
    where
        F: FnOnce(&mut Self) -> Result<(), ExecutionError>,
    {
        if self.depth >= self.max_depth {
            return Err(ExecutionError::RecursionLimit(self.max_depth));
        }
        self.depth += 1;
        let saved_base = self.frame_base;
        self.frame_base = self.scopes.len();
        self.push_scope();
        let result = f(self);
        self.scopes.truncate(self.frame_base);
        self.frame_base = saved_base;
        self.depth -= 1;
        result
    }

    // --- Evaluation ---

    pub(crate) fn with_context<R>(
        &self,
        focus: Focus<N>,
        f: impl FnOnce(&EvaluationContext<'a, '_, N>) -> R,
    ) -> R {
        let view = ScopeView {
            locals: &self.scopes[self.frame_base.min(self.scopes.len())..],
            globals: &self.globals,
        };
        let e_ctx = EvaluationContext::new(
            focus.node,
            self.root_node,
            &self.functions,
            focus.position,
            focus.size,
            &view,
            &self.key_indexes,
            self.strict,
        );
        f(&e_ctx)
    }

    pub(crate) fn evaluate(&mut self, expr: &Expression, focus: Focus<N>) -> Result<XPathValue<N>, ExecutionError> {
        let result = self.with_context(focus, |e_ctx| folio_xpath1::evaluate(expr, e_ctx));
        self.record_host_failures();
        Ok(result?)
    }

    /// Evaluates an AVT and returns the resulting string.
    pub(crate) fn evaluate_avt(
        &mut self,
        avt: &AttributeValueTemplate,
        focus: Focus<N>,
    ) -> Result<String, ExecutionError> {
        let mut result = String::new();
        for part in &avt.0 {
            match part {
                AvtPart::Static(s) => result.push_str(s),
                AvtPart::Dynamic(expression) => {
                    result.push_str(&self.evaluate(expression, focus)?.to_string());
                }
            }
        }
        Ok(result)
    }

    pub(crate) fn matches(&mut self, pattern: &Pattern, node: N) -> Result<bool, ExecutionError> {
        let result = self.with_context(Focus::single(node), |e_ctx| pattern.matches(node, e_ctx));
        self.record_host_failures();
        Ok(result?)
    }

    pub(crate) fn evaluate_variable_value(
        &mut self,
        value: &VariableValue,
        focus: Focus<N>,
    ) -> Result<XPathValue<N>, ExecutionError> {
        match value {
            VariableValue::Select(expr) => self.evaluate(expr, focus),
            VariableValue::Content(body) => {
                let mut builder = ResultTreeBuilder::new();
                self.execute_template(body, focus, &mut builder)?;
                Ok(XPathValue::Fragment(Rc::new(builder.finish())))
            }
            VariableValue::Empty => Ok(XPathValue::String(String::new())),
        }
    }

    pub(crate) fn evaluate_params(
        &mut self,
        params: &[WithParam],
        focus: Focus<N>,
    ) -> Result<HashMap<String, XPathValue<N>>, ExecutionError> {
        let mut passed = HashMap::with_capacity(params.len());
        for param in params {
            let value = self.evaluate_variable_value(&param.value, focus)?;
            passed.insert(param.name.clone(), value);
        }
        Ok(passed)
    }

    /// Binds a template's parameters in the current scope. Defaults are
    /// evaluated in the template's own context.
    pub(crate) fn bind_params(
        &mut self,
        params: &[Param],
        passed: &HashMap<String, XPathValue<N>>,
        focus: Focus<N>,
    ) -> Result<(), ExecutionError> {
        for param in params {
            let value = match passed.get(&param.name) {
                Some(value) => value.clone(),
                None => self.evaluate_variable_value(&param.default, focus)?,
            };
            self.set_variable_in_current_scope(param.name.clone(), value);
        }
        Ok(())
    }

    // --- Globals and keys ---

    /// Evaluates top-level variables. A global that refers to another one
    /// declared later is retried once the other is bound.
    fn evaluate_globals(&mut self, params: &[(String, String)]) -> Result<(), ExecutionError> {
        let stylesheet = self.stylesheet;
        let root_focus = Focus::single(self.root_node);
        let mut pending: Vec<_> = stylesheet.globals.iter().collect();

        while !pending.is_empty() {
            let mut deferred = Vec::new();
            let mut last_error = Vec::new();
            let before = pending.len();
            for global in pending {
                let supplied = params.iter().rev().find(|(name, _)| *name == global.name);
                if let (true, Some((_, value))) = (global.is_param, supplied) {
                    self.globals
                        .insert(global.name.clone(), XPathValue::String(value.clone()));
                    continue;
                }
                self.location = global.location.clone();
                match self.evaluate_variable_value(&global.value, root_focus) {
                    Ok(value) => {
                        self.globals.insert(global.name.clone(), value);
                    }
                    Err(ExecutionError::XPath(XPathError::UnknownVariable(missing)))
                        if stylesheet.globals.iter().any(|g| g.name == missing)
                            && !self.globals.contains_key(&missing) =>
                    {
                        last_error.push(ExecutionError::XPath(XPathError::UnknownVariable(missing)));
                        deferred.push(global);
                    }
                    Err(err) => {
                        self.record(&err, &global.location);
                        if err.is_fatal() {
                            return Err(err);
                        }
                    }
                }
            }
            if deferred.len() == before {
                // Nothing could be bound: the remaining globals are circular.
                for (global, err) in deferred.iter().zip(last_error) {
                    log::warn!("Global variable '{}' refers to itself", global.name);
                    self.record(&err, &global.location);
                }
                break;
            }
            pending = deferred;
        }
        Ok(())
    }

    fn build_key_indexes(&mut self) {
        let stylesheet = self.stylesheet;
        if stylesheet.keys.is_empty() {
            return;
        }
        let mut nodes = Vec::new();
        collect_nodes(self.root_node, &mut nodes);

        for (name, definitions) in &stylesheet.keys {
            let mut index: HashMap<String, Vec<N>> = HashMap::new();
            for definition in definitions {
                for &node in &nodes {
                    let values: Result<Vec<String>, XPathError> =
                        self.with_context(Focus::single(node), |e_ctx| {
                            if !definition.pattern.matches(node, e_ctx)? {
                                return Ok(Vec::new());
                            }
                            Ok(match folio_xpath1::evaluate(&definition.use_expr, e_ctx)? {
                                XPathValue::NodeSet(used) => {
                                    used.iter().map(|n| n.string_value()).collect()
                                }
                                other => vec![other.to_string()],
                            })
                        });
                    match values {
                        Ok(values) => {
                            for value in values {
                                index.entry(value).or_default().push(node);
                            }
                        }
                        Err(err) => {
                            let err = ExecutionError::XPath(err);
                            let diagnostic = Diagnostic::new(
                                err.code(),
                                format!("Key '{}': {}", name, err),
                                Severity::Error,
                                Phase::Runtime,
                            );
                            self.push_diagnostic(diagnostic, None);
                            break;
                        }
                    }
                }
            }
            for matched in index.values_mut() {
                matched.sort();
                matched.dedup();
            }
            log::debug!("Built key index '{}' with {} values", name, index.len());
            self.key_indexes.insert(name.clone(), index);
        }
    }

    // --- Template execution ---

    /// Processes a list of instructions from a template body against a context node.
    pub(crate) fn execute_template(
        &mut self,
        template: &PreparsedTemplate,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        self.push_scope();
        let result = self.execute_instructions(&template.0, focus, builder);
        self.pop_scope();
        result
    }

    pub(crate) fn execute_instructions(
        &mut self,
        instructions: &[Instruction],
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        for instruction in instructions {
            self.location = instruction.location.clone();
            if let Err(err) = self.execute_instruction(&instruction.kind, focus, builder) {
                self.record(&err, &instruction.location);
                if err.is_fatal() {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    /// Processes a single XSLT instruction.
    fn execute_instruction(
        &mut self,
        instruction: &XsltInstruction,
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match instruction {
            XsltInstruction::Text(text) => {
                builder.add_text(text, true);
                Ok(())
            }
            XsltInstruction::XslText {
                text,
                disable_escaping,
            } => {
                builder.add_text(text, !disable_escaping);
                Ok(())
            }
            XsltInstruction::LiteralElement {
                name,
                namespaces,
                attrs,
                use_attribute_sets,
                body,
            } => literals::handle_literal_element(
                self,
                name,
                namespaces,
                attrs,
                use_attribute_sets,
                body,
                focus,
                builder,
            ),
            XsltInstruction::ValueOf {
                select,
                disable_escaping,
            } => literals::handle_value_of(self, select, *disable_escaping, focus, builder),
            XsltInstruction::CopyOf { select } => copy::handle_copy_of(self, select, focus, builder),
            XsltInstruction::Copy {
                use_attribute_sets,
                body,
            } => copy::handle_copy(self, use_attribute_sets, body, focus, builder),
            XsltInstruction::If { test, body } => {
                control_flow::handle_if(self, test, body, focus, builder)
            }
            XsltInstruction::Choose { whens, otherwise } => {
                control_flow::handle_choose(self, whens, otherwise.as_ref(), focus, builder)
            }
            XsltInstruction::ForEach {
                select,
                sort_keys,
                body,
            } => for_each::handle_for_each(self, select, sort_keys, body, focus, builder),
            XsltInstruction::ApplyTemplates {
                select,
                mode,
                sort_keys,
                params,
            } => apply_templates::handle_apply_templates(
                self,
                select.as_ref(),
                mode.as_deref(),
                sort_keys,
                params,
                focus,
                builder,
            ),
            XsltInstruction::ApplyImports => {
                apply_templates::handle_apply_imports(self, focus, builder)
            }
            XsltInstruction::CallTemplate { name, params } => {
                call_template::handle_call_template(self, name, params, focus, builder)
            }
            XsltInstruction::Variable { name, value } => {
                variables::handle_variable(self, name, value, focus)
            }
            XsltInstruction::Element {
                name,
                namespace,
                namespaces,
                use_attribute_sets,
                body,
            } => literals::handle_element(
                self,
                name,
                namespace.as_ref(),
                namespaces,
                use_attribute_sets,
                body,
                focus,
                builder,
            ),
            XsltInstruction::Attribute {
                name,
                namespace,
                namespaces,
                body,
            } => literals::handle_attribute(
                self,
                name,
                namespace.as_ref(),
                namespaces,
                body,
                focus,
                builder,
            ),
            XsltInstruction::Comment { body } => literals::handle_comment(self, body, focus, builder),
            XsltInstruction::ProcessingInstruction { name, body } => {
                literals::handle_processing_instruction(self, name, body, focus, builder)
            }
            XsltInstruction::Message { terminate, body } => {
                message::handle_message(self, *terminate, body, focus)
            }
            XsltInstruction::Number {
                value,
                count,
                from,
                level,
                format,
            } => number::handle_number(
                self,
                value.as_ref(),
                count.as_ref(),
                from.as_ref(),
                *level,
                format,
                focus,
                builder,
            ),
        }
    }

    // --- Template rules ---

    /// The best rule for `node` in `mode`; with `below` only rules of a
    /// lower import precedence are considered.
    pub(crate) fn find_template_rule(
        &mut self,
        node: N,
        mode: Option<&str>,
        below: Option<usize>,
    ) -> Result<Option<&'s TemplateRule>, ExecutionError> {
        let stylesheet = self.stylesheet;
        let Some(rules) = stylesheet.template_rules.get(&mode.map(str::to_string)) else {
            return Ok(None);
        };
        for rule in rules {
            if below.is_some_and(|limit| rule.precedence >= limit) {
                continue;
            }
            if self.matches(&rule.pattern, node)? {
                return Ok(Some(rule));
            }
        }
        Ok(None)
    }

    pub(crate) fn apply_templates_to_nodes(
        &mut self,
        nodes: &[N],
        mode: Option<&str>,
        params: &HashMap<String, XPathValue<N>>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let size = nodes.len();
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            match self.find_template_rule(node, mode, None)? {
                Some(rule) => self.execute_rule(rule, focus, params, builder)?,
                None => self.apply_builtin_rule(focus, mode, builder)?,
            }
        }
        Ok(())
    }

    pub(crate) fn execute_rule(
        &mut self,
        rule: &'s TemplateRule,
        focus: Focus<N>,
        params: &HashMap<String, XPathValue<N>>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        self.current_rules.push(Some(RuleRef {
            mode: rule.mode.clone(),
            precedence: rule.precedence,
        }));
        let result = self.invoke(|this| {
            this.bind_params(&rule.params, params, focus)?;
            this.execute_template(&rule.body, focus, builder)
        });
        self.current_rules.pop();
        result
    }

    /// Root and elements recurse into their children, text and attributes
    /// copy their value, everything else produces nothing.
    pub(crate) fn apply_builtin_rule(
        &mut self,
        focus: Focus<N>,
        mode: Option<&str>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        match focus.node.node_type() {
            NodeType::Root | NodeType::Element => {
                let children: Vec<N> = focus.node.children().collect();
                self.invoke(|this| {
                    this.apply_templates_to_nodes(&children, mode, &HashMap::new(), builder)
                })
            }
            NodeType::Text | NodeType::Attribute => {
                builder.add_text(&focus.node.string_value(), true);
                Ok(())
            }
            NodeType::Comment | NodeType::ProcessingInstruction => Ok(()),
        }
    }

    /// Applies named attribute sets, the sets they use first.
    pub(crate) fn apply_attribute_sets(
        &mut self,
        names: &[String],
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
    ) -> Result<(), ExecutionError> {
        let mut active = Vec::new();
        self.apply_attribute_sets_inner(names, focus, builder, &mut active)
    }

    fn apply_attribute_sets_inner(
        &mut self,
        names: &[String],
        focus: Focus<N>,
        builder: &mut dyn OutputBuilder,
        active: &mut Vec<String>,
    ) -> Result<(), ExecutionError> {
        let stylesheet = self.stylesheet;
        for name in names {
            if active.contains(name) {
                return Err(ExecutionError::TypeError(format!(
                    "Attribute set '{}' uses itself",
                    name
                )));
            }
            let set = stylesheet.attribute_sets.get(name).ok_or_else(|| {
                ExecutionError::TypeError(format!("Unknown attribute set '{}'", name))
            })?;
            active.push(name.clone());
            self.apply_attribute_sets_inner(&set.use_attribute_sets, focus, builder, active)?;
            active.pop();
            self.push_scope();
            let result = self.execute_instructions(&set.attributes, focus, builder);
            self.pop_scope();
            result?;
        }
        Ok(())
    }

    /// Rewrites a literal result element's name and namespaces through
    /// `xsl:namespace-alias`.
    pub(crate) fn alias_namespaces(&self, name: &str, namespaces: &Namespaces) -> (String, Namespaces) {
        let aliases = &self.stylesheet.namespace_aliases;
        if aliases.is_empty() {
            return (name.to_string(), namespaces.clone());
        }
        let (prefix, local) = match name.split_once(':') {
            Some((p, l)) => (Some(p), l),
            None => (None, name),
        };
        let mut renamed = name.to_string();
        let aliased = namespaces
            .iter()
            .map(|(p, uri)| match aliases.get(uri) {
                Some((alias_prefix, alias_uri)) => {
                    if p.as_deref() == prefix {
                        renamed = match alias_prefix {
                            Some(ap) => format!("{}:{}", ap, local),
                            None => local.to_string(),
                        };
                    }
                    (alias_prefix.clone(), alias_uri.clone())
                }
                None => (p.clone(), uri.clone()),
            })
            .collect();
        (renamed, aliased)
    }

    // --- Sorting ---

    /// Stable sort by `sort_keys`; keys are evaluated with each node as
    /// context, positioned in the unsorted list.
    pub(crate) fn sort_node_set(&mut self, nodes: &mut Vec<N>, sort_keys: &[SortKey]) -> Result<(), ExecutionError> {
        if sort_keys.is_empty() || nodes.len() < 2 {
            return Ok(());
        }
        let size = nodes.len();
        let mut keyed = Vec::with_capacity(size);
        for (i, &node) in nodes.iter().enumerate() {
            let focus = Focus {
                node,
                position: i + 1,
                size,
            };
            let mut values = Vec::with_capacity(sort_keys.len());
            for key in sort_keys {
                let value = self.evaluate(&key.select, focus)?;
                values.push(match key.data_type {
                    SortDataType::Number => SortValue::Number(value.to_number()),
                    SortDataType::Text => SortValue::Text(value.to_string()),
                });
            }
            keyed.push((values, node));
        }
        keyed.sort_by(|(a, _), (b, _)| compare_sort_values(a, b, sort_keys));
        *nodes = keyed.into_iter().map(|(_, node)| node).collect();
        Ok(())
    }
}

fn compare_sort_values(a: &[SortValue], b: &[SortValue], keys: &[SortKey]) -> Ordering {
    for ((left, right), key) in a.iter().zip(b).zip(keys) {
        let ordering = match (left, right) {
            // NaN sorts before every number.
            (SortValue::Number(x), SortValue::Number(y)) => match (x.is_nan(), y.is_nan()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => x.total_cmp(y),
            },
            (SortValue::Text(x), SortValue::Text(y)) => compare_text(x, y, key.case_order),
            _ => Ordering::Equal,
        };
        let ordering = match key.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn compare_text(x: &str, y: &str, case_order: Option<CaseOrder>) -> Ordering {
    x.to_lowercase()
        .cmp(&y.to_lowercase())
        .then_with(|| match case_order {
            Some(CaseOrder::LowerFirst) => y.cmp(x),
            _ => x.cmp(y),
        })
}

/// Every node of the tree in document order, attributes after their element.
fn collect_nodes<'a, N: DataSourceNode<'a>>(node: N, out: &mut Vec<N>) {
    out.push(node);
    out.extend(node.attributes());
    for child in node.children() {
        collect_nodes(child, out);
    }
}
