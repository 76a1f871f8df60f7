//! The transformation processor: runs a stylesheet over a document and
//! collects every diagnostic as a [`TransformError`] record instead of
//! failing.

use crate::config::Config;
use folio_xpath1::{FunctionRegistry, HostFunction, HostValue};
use folio_xsd::{Schema, SchemaError};
use folio_xslt::util::source_line;
use folio_xslt::{
    Diagnostic, ExecutionConfig, FileSystemResolver, Phase, TransformOutput, XsltParser,
    check_document,
};
use roxmltree::ParsingOptions;
use serde::Serialize;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

/// Record numbers raised by the processor itself. Engine diagnostics keep
/// the numbers from [`folio_xslt::codes`].
pub mod codes {
    pub const STYLESHEET_IO: u32 = 10;
    pub const WORKER_FAILED: u32 = 27;
    pub const SCHEMA_PARSE: u32 = 40;
    pub const SCHEMA_VIOLATION: u32 = 41;
    pub const SCHEMA_DOCUMENT: u32 = 42;
    pub const NO_DOCUMENT: u32 = 43;
    pub const NO_ENGINE: u32 = 50;
}

/// The phase a record was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// Loading the source document.
    Xml,
    /// Compiling or running the stylesheet.
    Xsl,
    /// Schema validation.
    Xsd,
}

impl ErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::Xml => "xml",
            ErrorType::Xsl => "xsl",
            ErrorType::Xsd => "xsd",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransformError {
    pub number: u32,
    pub message: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    /// The source line `line` points at.
    pub context: Option<String>,
}

impl TransformError {
    pub fn new(error_type: ErrorType, number: u32, message: impl Into<String>) -> Self {
        TransformError {
            number,
            message: message.into(),
            file: None,
            line: None,
            error_type,
            context: None,
        }
    }

    /// Points the record at `line` of `source`, quoting that line.
    pub fn at_line(mut self, source: &str, line: u32) -> Self {
        self.line = Some(line);
        self.context = source_line(source, line as usize);
        self
    }

    pub fn in_file(mut self, file: Option<String>) -> Self {
        self.file = file;
        self
    }

    fn from_diagnostic(diagnostic: Diagnostic) -> Self {
        let error_type = match diagnostic.phase {
            Phase::Document => ErrorType::Xml,
            Phase::Compile | Phase::Runtime => ErrorType::Xsl,
        };
        let file = diagnostic.file().map(str::to_string);
        let line = diagnostic.line().and_then(|l| u32::try_from(l).ok());
        TransformError {
            number: diagnostic.code,
            message: diagnostic.message,
            file,
            line,
            error_type,
            context: diagnostic.context,
        }
    }
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} {}] {}", self.error_type, self.number, self.message)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " ({} line {})", file, line),
            (Some(file), None) => write!(f, " ({})", file),
            (None, Some(line)) => write!(f, " (line {})", line),
            (None, None) => Ok(()),
        }
    }
}

/// Records of one run, in the order they were raised, with a read cursor.
#[derive(Debug, Clone, Default)]
pub struct ErrorLog {
    records: Vec<TransformError>,
    cursor: usize,
}

impl ErrorLog {
    pub fn push(&mut self, record: TransformError) {
        log::debug!("Recorded {}", record);
        self.records.push(record);
    }

    /// Forgets every record and rewinds.
    pub fn clear(&mut self) {
        self.records.clear();
        self.cursor = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// The record under the cursor; advances past it.
    pub fn next_error(&mut self) -> Option<&TransformError> {
        let record = self.records.get(self.cursor)?;
        self.cursor += 1;
        Some(record)
    }

    /// Every record, whatever the cursor position. The log is empty
    /// afterwards.
    pub fn drain(&mut self) -> Vec<TransformError> {
        self.cursor = 0;
        std::mem::take(&mut self.records)
    }

    pub fn records(&self) -> &[TransformError] {
        &self.records
    }

    pub fn rewind(&mut self) {
        self.cursor = 0;
    }
}

/// Stylesheet parameters in insertion order. Setting a name again
/// replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[(String, String)] {
        &self.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Parameters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut parameters = Parameters::new();
        for (name, value) in iter {
            parameters.insert(name, value);
        }
        parameters
    }
}

/// Host callbacks stylesheets may call in the `urn:folio:host` namespace.
/// A callback is only reachable from a run whose allow-list names it.
#[derive(Clone, Default)]
pub struct HostFunctions {
    functions: BTreeMap<String, HostFunction>,
}

impl fmt::Debug for HostFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.functions.keys()).finish()
    }
}

impl HostFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `upper`, `lower` and `trim` over the string value of the first
    /// argument.
    pub fn standard() -> Self {
        let mut functions = Self::new();
        functions.register("upper", |args| Ok(HostValue::String(first_string(args).to_uppercase())));
        functions.register("lower", |args| Ok(HostValue::String(first_string(args).to_lowercase())));
        functions.register("trim", |args| Ok(HostValue::String(first_string(args).trim().to_string())));
        functions
    }

    pub fn register<F>(&mut self, name: impl Into<String>, function: F)
    where
        F: Fn(&[HostValue]) -> Result<HostValue, String> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    /// A registry exposing the callbacks named in `allowed`. Allowed names
    /// without a callback stay unresolved and fail when called.
    pub fn registry_for(&self, allowed: &[String]) -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        for name in allowed {
            match self.functions.get(name) {
                Some(function) => registry.register_host(name.clone(), Arc::clone(function)),
                None => log::warn!("Host function '{}' is allowed but not registered", name),
            }
        }
        registry
    }
}

fn first_string(args: &[HostValue]) -> String {
    args.first().map(HostValue::as_string).unwrap_or_default()
}

/// A transformation engine with an error log.
///
/// `process` never fails: problems end up as records, and the caller
/// checks [`Processor::is_errors`] afterwards.
pub trait Processor: Send {
    /// Transforms `xml` with the stylesheet `xsl`. `file` names the
    /// stylesheet in records and anchors its imports. Only host functions
    /// listed in `registered_functions` are callable.
    fn process_source(
        &mut self,
        xml: &str,
        xsl: &str,
        file: Option<&Path>,
        parameters: &Parameters,
        registered_functions: &[String],
    ) -> Option<String>;

    /// Validates `xml`, or the document of the last `process`, against the
    /// schema `xsd`. Records are appended, never cleared.
    fn validate(&mut self, xsd: &str, xml: Option<&str>) -> bool;

    fn errors(&self) -> &ErrorLog;

    fn errors_mut(&mut self) -> &mut ErrorLog;

    /// Media type of the last successful output.
    fn media_type(&self) -> Option<&str>;

    fn process(
        &mut self,
        xml: &str,
        xsl: &str,
        parameters: &Parameters,
        registered_functions: &[String],
    ) -> Option<String> {
        self.process_source(xml, xsl, None, parameters, registered_functions)
    }

    /// Reads the stylesheet from `path`; an unreadable file is an `xsl`
    /// record.
    fn process_file(
        &mut self,
        xml: &str,
        path: &Path,
        parameters: &Parameters,
        registered_functions: &[String],
    ) -> Option<String> {
        match std::fs::read_to_string(path) {
            Ok(xsl) => self.process_source(xml, &xsl, Some(path), parameters, registered_functions),
            Err(e) => {
                let errors = self.errors_mut();
                errors.clear();
                errors.push(
                    TransformError::new(
                        ErrorType::Xsl,
                        codes::STYLESHEET_IO,
                        format!("Cannot read stylesheet: {}", e),
                    )
                    .in_file(Some(path.display().to_string())),
                );
                None
            }
        }
    }

    fn is_errors(&self) -> bool {
        !self.errors().is_empty()
    }

    fn next_error(&mut self) -> Option<&TransformError> {
        self.errors_mut().next_error()
    }

    fn drain_errors(&mut self) -> Vec<TransformError> {
        self.errors_mut().drain()
    }

    fn records(&self) -> &[TransformError] {
        self.errors().records()
    }

    fn rewind(&mut self) {
        self.errors_mut().rewind();
    }
}

/// Limits applied to every run of an [`XsltProcess`].
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub allow_dtd: bool,
    pub nodes_limit: u32,
    pub max_depth: usize,
    /// Stack of the worker thread a transform runs on.
    pub stack_size: usize,
    /// Root for stylesheet imports. `None` means the stylesheet's own
    /// directory, or the working directory for stylesheets without a file.
    pub base_dir: Option<PathBuf>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        let defaults = ExecutionConfig::default();
        ProcessSettings {
            allow_dtd: defaults.allow_dtd,
            nodes_limit: defaults.nodes_limit,
            max_depth: defaults.max_depth,
            stack_size: 64 * 1024 * 1024,
            base_dir: None,
        }
    }
}

impl ProcessSettings {
    pub fn from_config(config: &Config) -> Self {
        ProcessSettings {
            allow_dtd: config.xml.allow_dtd,
            nodes_limit: config.xml.nodes_limit,
            max_depth: config.transform.max_depth,
            stack_size: config.transform.stack_size,
            base_dir: config.transform.base_dir.clone(),
        }
    }

    fn import_root(&self, file: Option<&Path>) -> PathBuf {
        if let Some(base_dir) = &self.base_dir {
            return base_dir.clone();
        }
        file.and_then(Path::parent)
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

/// The native processor, backed by the `folio-xslt` engine.
#[derive(Debug, Default)]
pub struct XsltProcess {
    settings: ProcessSettings,
    host_functions: HostFunctions,
    errors: ErrorLog,
    /// The document of the last `process`, for `validate(xsd, None)`.
    document: Option<String>,
    media_type: Option<String>,
}

impl XsltProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new()
            .with_settings(ProcessSettings::from_config(config))
            .with_host_functions(HostFunctions::standard())
    }

    pub fn with_settings(mut self, settings: ProcessSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_host_functions(mut self, host_functions: HostFunctions) -> Self {
        self.host_functions = host_functions;
        self
    }

    pub fn settings(&self) -> &ProcessSettings {
        &self.settings
    }

    pub fn host_functions_mut(&mut self) -> &mut HostFunctions {
        &mut self.host_functions
    }

    fn execution_config(&self, parameters: &Parameters) -> ExecutionConfig {
        ExecutionConfig {
            params: parameters.as_slice().to_vec(),
            max_depth: self.settings.max_depth,
            strict: true,
            allow_dtd: self.settings.allow_dtd,
            nodes_limit: self.settings.nodes_limit,
        }
    }

    fn record_schema_error(&mut self, error: &SchemaError, xsd: &str) {
        let number = match error {
            SchemaError::DocumentXml(_) => codes::SCHEMA_DOCUMENT,
            _ => codes::SCHEMA_PARSE,
        };
        let mut record = TransformError::new(ErrorType::Xsd, number, error.to_string());
        if let Some(line) = error.line() {
            record = record.at_line(xsd, line);
        }
        self.errors.push(record);
    }
}

/// Parses the document, then compiles the stylesheet, then runs it. The
/// first two steps both report before giving up.
fn transform(
    xml: &str,
    xsl: &str,
    file: Option<&str>,
    import_root: &Path,
    config: &ExecutionConfig,
    functions: FunctionRegistry,
) -> TransformOutput {
    let mut diagnostics = Vec::new();
    let document_ok = match check_document(xml, config) {
        Ok(()) => true,
        Err(diagnostic) => {
            diagnostics.push(diagnostic);
            false
        }
    };
    let resolver = FileSystemResolver::new(import_root);
    let template = match XsltParser::with_resolver(&resolver).parse(xsl, file) {
        Ok(template) => Some(template),
        Err(mut compile) => {
            diagnostics.append(&mut compile);
            None
        }
    };
    match template {
        Some(template) if document_ok => {
            let mut run = template.execute(xml, functions, config);
            diagnostics.append(&mut run.diagnostics);
            run.diagnostics = diagnostics;
            run
        }
        _ => TransformOutput {
            output: None,
            media_type: String::new(),
            diagnostics,
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string())
}

impl Processor for XsltProcess {
    fn process_source(
        &mut self,
        xml: &str,
        xsl: &str,
        file: Option<&Path>,
        parameters: &Parameters,
        registered_functions: &[String],
    ) -> Option<String> {
        self.errors.clear();
        self.media_type = None;
        self.document = Some(xml.to_string());

        let config = self.execution_config(parameters);
        let functions = self.host_functions.registry_for(registered_functions);
        let import_root = self.settings.import_root(file);
        let file_name = file.map(|p| p.display().to_string());
        log::debug!(
            "Transforming {} bytes of XML with {}",
            xml.len(),
            file_name.as_deref().unwrap_or("an inline stylesheet")
        );

        let work = || transform(xml, xsl, file_name.as_deref(), &import_root, &config, functions);
        let outcome = thread::scope(|scope| {
            thread::Builder::new()
                .name("folio-transform".to_string())
                .stack_size(self.settings.stack_size)
                .spawn_scoped(scope, work)
                .map(|worker| worker.join())
        });

        let run = match outcome {
            Ok(Ok(run)) => run,
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                log::error!("Transformation worker panicked: {}", message);
                self.errors.push(
                    TransformError::new(
                        ErrorType::Xsl,
                        codes::WORKER_FAILED,
                        format!("The transformation failed unexpectedly: {}", message),
                    )
                    .in_file(file_name),
                );
                return None;
            }
            Err(e) => {
                log::error!("Cannot start the transformation worker: {}", e);
                self.errors.push(TransformError::new(
                    ErrorType::Xsl,
                    codes::WORKER_FAILED,
                    format!("Cannot start the transformation worker: {}", e),
                ));
                return None;
            }
        };

        for diagnostic in run.diagnostics {
            self.errors.push(TransformError::from_diagnostic(diagnostic));
        }
        if run.output.is_some() {
            self.media_type = Some(run.media_type);
        }
        run.output
    }

    fn validate(&mut self, xsd: &str, xml: Option<&str>) -> bool {
        let document = match xml.map(str::to_string).or_else(|| self.document.clone()) {
            Some(document) => document,
            None => {
                self.errors.push(TransformError::new(
                    ErrorType::Xsd,
                    codes::NO_DOCUMENT,
                    "There is no XML document to validate",
                ));
                return false;
            }
        };
        let schema = match Schema::parse(xsd) {
            Ok(schema) => schema,
            Err(e) => {
                log::warn!("Schema rejected: {}", e);
                self.record_schema_error(&e, xsd);
                return false;
            }
        };

        let mut options = ParsingOptions::default();
        options.allow_dtd = self.settings.allow_dtd;
        options.nodes_limit = self.settings.nodes_limit;
        let doc = match roxmltree::Document::parse_with_options(&document, options) {
            Ok(doc) => doc,
            Err(e) => {
                let row = e.pos().row;
                self.errors.push(
                    TransformError::new(
                        ErrorType::Xsd,
                        codes::SCHEMA_DOCUMENT,
                        format!("XML parsing error: {}", e),
                    )
                    .at_line(&document, row),
                );
                return false;
            }
        };

        let violations = schema.validate_document(&doc);
        for violation in &violations {
            self.errors.push(
                TransformError::new(ErrorType::Xsd, codes::SCHEMA_VIOLATION, violation.message.clone())
                    .at_line(&document, violation.line),
            );
        }
        violations.is_empty()
    }

    fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    fn errors_mut(&mut self) -> &mut ErrorLog {
        &mut self.errors
    }

    fn media_type(&self) -> Option<&str> {
        self.media_type.as_deref()
    }
}

/// Stands in when no transformation engine is configured. Every call
/// fails with a single record.
#[derive(Debug, Default)]
pub struct UnavailableProcessor {
    errors: ErrorLog,
}

impl UnavailableProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Processor for UnavailableProcessor {
    fn process_source(
        &mut self,
        _xml: &str,
        _xsl: &str,
        _file: Option<&Path>,
        _parameters: &Parameters,
        _registered_functions: &[String],
    ) -> Option<String> {
        self.errors.clear();
        log::error!("No XSLT processor is available");
        self.errors.push(TransformError::new(
            ErrorType::Xsl,
            codes::NO_ENGINE,
            "No XSLT processor is available",
        ));
        None
    }

    fn validate(&mut self, _xsd: &str, _xml: Option<&str>) -> bool {
        self.errors.push(TransformError::new(
            ErrorType::Xsd,
            codes::NO_ENGINE,
            "No schema validator is available",
        ));
        false
    }

    fn errors(&self) -> &ErrorLog {
        &self.errors
    }

    fn errors_mut(&mut self) -> &mut ErrorLog {
        &mut self.errors
    }

    fn media_type(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COPY_B: &str = r#"<xsl:stylesheet version="1.0" xmlns:xsl="http://www.w3.org/1999/XSL/Transform">
  <xsl:output method="text"/>
  <xsl:template match="/"><xsl:apply-templates select="a/b"/></xsl:template>
  <xsl:template match="b"><xsl:value-of select="."/></xsl:template>
</xsl:stylesheet>"#;

    fn record(number: u32) -> TransformError {
        TransformError::new(ErrorType::Xsl, number, format!("error {}", number))
    }

    #[test]
    fn cursor_walks_records_once() {
        let mut log = ErrorLog::default();
        log.push(record(1));
        log.push(record(2));
        assert_eq!(log.next_error().map(|r| r.number), Some(1));
        assert_eq!(log.records().len(), 2);
        assert_eq!(log.next_error().map(|r| r.number), Some(2));
        assert!(log.next_error().is_none());
        log.rewind();
        assert_eq!(log.next_error().map(|r| r.number), Some(1));
    }

    #[test]
    fn drain_ignores_the_cursor() {
        let mut log = ErrorLog::default();
        log.push(record(1));
        log.push(record(2));
        log.next_error();
        log.next_error();
        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
        assert!(log.next_error().is_none());
    }

    #[test]
    fn records_serialize_with_lowercase_types() {
        let record = TransformError::new(ErrorType::Xml, 1, "bad").at_line("<a>\n<b>", 2);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "xml");
        assert_eq!(json["line"], 2);
        assert_eq!(json["context"], "<b>");
        assert_eq!(json["file"], serde_json::Value::Null);
    }

    #[test]
    fn parameters_keep_insertion_order() {
        let mut parameters: Parameters = [("b", "1"), ("a", "2")].into_iter().collect();
        parameters.insert("b", "3");
        let names: Vec<_> = parameters.iter().collect();
        assert_eq!(names, vec![("b", "3"), ("a", "2")]);
        assert_eq!(parameters.get("a"), Some("2"));
    }

    #[test]
    fn process_returns_output_without_errors() {
        let mut processor = XsltProcess::new();
        let output = processor.process("<a><b>1</b></a>", COPY_B, &Parameters::new(), &[]);
        assert_eq!(output.as_deref(), Some("1"));
        assert!(!processor.is_errors());
        assert_eq!(processor.media_type(), Some("text/plain"));
    }

    #[test]
    fn malformed_xml_and_xsl_are_both_reported() {
        let mut processor = XsltProcess::new();
        let output = processor.process("<a>", "<xsl:stylesheet", &Parameters::new(), &[]);
        assert!(output.is_none());
        let types: Vec<ErrorType> = processor.records().iter().map(|r| r.error_type).collect();
        assert!(types.contains(&ErrorType::Xml));
        assert!(types.contains(&ErrorType::Xsl));
    }

    #[test]
    fn unavailable_processor_always_fails() {
        let mut processor = UnavailableProcessor::new();
        assert!(processor.process("<a/>", COPY_B, &Parameters::new(), &[]).is_none());
        assert!(processor.is_errors());
        assert_eq!(processor.records()[0].number, codes::NO_ENGINE);
    }

    #[test]
    fn only_allowed_host_functions_are_exposed() {
        let registry = HostFunctions::standard().registry_for(&["upper".to_string()]);
        assert!(registry.host("upper").is_some());
        assert!(registry.host("lower").is_none());
    }
}
