//! The engine entry point: compile a stylesheet once, run it against any
//! number of source documents.

use crate::ast::CompiledStylesheet;
use crate::compiler::CompilerBuilder;
use crate::datasources::xml::XmlDocument;
use crate::error::{Diagnostic, Location, Phase, Severity, codes};
use crate::executor::{DEFAULT_MAX_DEPTH, TemplateExecutor};
use crate::resolver::StylesheetResolver;
use crate::serializer;
use folio_xpath1::FunctionRegistry;
use std::sync::Arc;

/// Limits and inputs of one transformation.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Stylesheet parameters; they override global `xsl:param` defaults.
    pub params: Vec<(String, String)>,
    pub max_depth: usize,
    /// If true, references to unbound variables are errors.
    pub strict: bool,
    pub allow_dtd: bool,
    /// Upper bound on source nodes, which also bounds entity expansion.
    pub nodes_limit: u32,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            params: Vec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            strict: true,
            allow_dtd: true,
            nodes_limit: 4_000_000,
        }
    }
}

/// Parses `xml` with the limits of `config` without transforming it.
pub fn check_document(xml: &str, config: &ExecutionConfig) -> Result<(), Diagnostic> {
    XmlDocument::parse_with_limits(xml, config.allow_dtd, config.nodes_limit)
        .map(|_| ())
        .map_err(|e| document_diagnostic(xml, &e))
}

fn document_diagnostic(xml: &str, error: &roxmltree::Error) -> Diagnostic {
    let pos = error.pos();
    Diagnostic::new(
        codes::DOCUMENT_PARSE,
        format!("XML parsing error: {}", error),
        Severity::Error,
        Phase::Document,
    )
    .at(Some(Location::from((pos.row as usize, pos.col as usize))))
    .with_context(crate::util::source_line(xml, pos.row as usize))
}

/// What a transformation produced. `output` is `None` when the source
/// could not be parsed or a fatal error stopped the run.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub output: Option<String>,
    pub media_type: String,
    pub diagnostics: Vec<Diagnostic>,
}

impl TransformOutput {
    fn failed(media_type: String, diagnostics: Vec<Diagnostic>) -> Self {
        TransformOutput {
            output: None,
            media_type,
            diagnostics,
        }
    }
}

/// A compiled stylesheet, cheap to clone and share between threads.
#[derive(Debug, Clone)]
pub struct XsltTemplate {
    compiled: Arc<CompiledStylesheet>,
}

impl XsltTemplate {
    pub fn stylesheet(&self) -> &CompiledStylesheet {
        &self.compiled
    }

    /// Transforms `xml`. Host callbacks in `functions` are the only ones
    /// the stylesheet may call.
    pub fn execute(&self, xml: &str, functions: FunctionRegistry, config: &ExecutionConfig) -> TransformOutput {
        let settings = &self.compiled.output;
        let fallback_media_type = settings
            .media_type
            .clone()
            .unwrap_or_else(|| "text/xml".to_string());

        let mut doc = match XmlDocument::parse_with_limits(xml, config.allow_dtd, config.nodes_limit) {
            Ok(doc) => doc,
            Err(e) => {
                let diagnostic = document_diagnostic(xml, &e);
                log::warn!("{}", diagnostic);
                return TransformOutput::failed(fallback_media_type, vec![diagnostic]);
            }
        };
        let rules = &self.compiled.whitespace;
        if !rules.is_empty() {
            let stripped = doc.strip_whitespace(|namespace, local| rules.should_strip(namespace, local));
            log::debug!("Stripped {} whitespace-only text nodes", stripped);
        }

        let mut executor = TemplateExecutor::new(&self.compiled, doc.root_node(), functions)
            .with_max_depth(config.max_depth)
            .with_strict(config.strict);
        let result = executor.build_tree(&config.params);
        let diagnostics = executor.take_diagnostics();
        match result {
            Ok(fragment) => TransformOutput {
                output: Some(serializer::serialize(&fragment, settings)),
                media_type: serializer::media_type(settings, &fragment),
                diagnostics,
            },
            Err(e) => {
                log::error!("Transformation aborted: {}", e);
                TransformOutput::failed(fallback_media_type, diagnostics)
            }
        }
    }
}

/// Compiles XSLT 1.0 stylesheets.
#[derive(Default)]
pub struct XsltParser<'r> {
    resolver: Option<&'r dyn StylesheetResolver>,
}

impl<'r> XsltParser<'r> {
    pub fn new() -> Self {
        Self { resolver: None }
    }

    /// Enables `xsl:import` and `xsl:include` through `resolver`.
    pub fn with_resolver(resolver: &'r dyn StylesheetResolver) -> Self {
        Self {
            resolver: Some(resolver),
        }
    }

    /// Compiles `source`; `file` names it in diagnostics and anchors
    /// relative hrefs. Every compile error of the pass is returned.
    pub fn parse(&self, source: &str, file: Option<&str>) -> Result<XsltTemplate, Vec<Diagnostic>> {
        let compiled = CompilerBuilder::new(self.resolver).compile(source, file)?;
        Ok(XsltTemplate {
            compiled: Arc::new(compiled),
        })
    }
}
