use folio_xpath1::XPathError;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A position in a stylesheet module. `file` is `None` for the stylesheet
/// handed in as a string.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
    pub file: Option<Arc<str>>,
}

impl Location {
    pub fn in_file(mut self, file: Option<Arc<str>>) -> Self {
        self.file = file;
        self
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(file) = &self.file {
            write!(f, "{} ", file)?;
        }
        write!(f, "line {}, column {}", self.line, self.col)
    }
}

impl From<(usize, usize)> for Location {
    fn from((line, col): (usize, usize)) -> Self {
        Location {
            line,
            col,
            file: None,
        }
    }
}

/// Stable diagnostic numbers.
pub mod codes {
    pub const DOCUMENT_PARSE: u32 = 1;
    pub const STYLESHEET_SYNTAX: u32 = 2;
    pub const MISSING_ATTRIBUTE: u32 = 3;
    pub const XPATH_SYNTAX: u32 = 4;
    pub const PATTERN_SYNTAX: u32 = 5;
    pub const STRUCTURE: u32 = 6;
    pub const UNKNOWN_INSTRUCTION: u32 = 7;
    pub const IMPORT: u32 = 8;
    pub const UNDEFINED_REFERENCE: u32 = 9;
    pub const XPATH_EVALUATION: u32 = 20;
    pub const UNKNOWN_TEMPLATE: u32 = 21;
    pub const HOST_FUNCTION: u32 = 22;
    pub const MESSAGE: u32 = 23;
    pub const TERMINATED: u32 = 24;
    pub const RECURSION_LIMIT: u32 = 25;
    pub const RESULT_TREE: u32 = 26;
    pub const INTERNAL: u32 = 27;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
    Fatal,
}

/// The stage of a transformation a diagnostic belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Parsing the source document.
    Document,
    /// Parsing and compiling the stylesheet.
    Compile,
    /// Executing the compiled stylesheet.
    Runtime,
}

/// One collected problem. The engine never returns these as errors past
/// its boundary; callers read them after the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub code: u32,
    pub message: String,
    pub severity: Severity,
    pub phase: Phase,
    pub location: Option<Location>,
    /// The source line the location points at.
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn new(code: u32, message: impl Into<String>, severity: Severity, phase: Phase) -> Self {
        Diagnostic {
            code,
            message: message.into(),
            severity,
            phase,
            location: None,
            context: None,
        }
    }

    pub fn at(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    pub fn file(&self) -> Option<&str> {
        self.location.as_ref().and_then(|l| l.file.as_deref())
    }

    pub fn line(&self) -> Option<usize> {
        self.location.as_ref().map(|l| l.line)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} (at {})", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum XsltError {
    #[error("XML parsing error: {0}")]
    XmlParse(#[from] roxmltree::Error),

    #[error("Quick-XML error: {0}")]
    QuickXml(#[from] quick_xml::Error),

    #[error("XPath error: {0}")]
    XPath(#[from] XPathError),

    #[error("Template compilation error: {0}")]
    Compilation(String),

    #[error("XPath parse error in '{0}': {1}")]
    XPathParse(String, String),

    #[error("Invalid pattern '{0}': {1}")]
    PatternParse(String, String),

    #[error("{message}")]
    TemplateStructure { message: String, location: Location },

    #[error("{msg}")]
    TemplateSyntax { msg: String, location: Location },

    #[error("Missing required attribute '{attribute}' on <{element}>")]
    MissingAttribute {
        attribute: String,
        element: String,
        location: Location,
    },

    #[error("Unknown XSLT element <{name}>")]
    UnknownInstruction { name: String, location: Location },

    #[error("Cannot load stylesheet '{href}': {message}")]
    Import { href: String, message: String },

    #[error("UTF-8 string error: {0}")]
    Utf8Str(#[from] std::str::Utf8Error),
}

impl XsltError {
    pub fn code(&self) -> u32 {
        match self {
            XsltError::XmlParse(_) => codes::DOCUMENT_PARSE,
            XsltError::QuickXml(_) | XsltError::TemplateSyntax { .. } | XsltError::Utf8Str(_) => {
                codes::STYLESHEET_SYNTAX
            }
            XsltError::XPath(XPathError::UndefinedPrefix(_)) => codes::UNDEFINED_REFERENCE,
            XsltError::XPath(_) | XsltError::XPathParse(..) => codes::XPATH_SYNTAX,
            XsltError::PatternParse(..) => codes::PATTERN_SYNTAX,
            XsltError::Compilation(_) | XsltError::TemplateStructure { .. } => codes::STRUCTURE,
            XsltError::MissingAttribute { .. } => codes::MISSING_ATTRIBUTE,
            XsltError::UnknownInstruction { .. } => codes::UNKNOWN_INSTRUCTION,
            XsltError::Import { .. } => codes::IMPORT,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            XsltError::TemplateStructure { location, .. }
            | XsltError::TemplateSyntax { location, .. }
            | XsltError::MissingAttribute { location, .. }
            | XsltError::UnknownInstruction { location, .. } => Some(location),
            _ => None,
        }
    }

    /// Converts a compile-time error into a diagnostic, using `fallback`
    /// when the error does not know where it happened.
    pub fn into_diagnostic(self, fallback: Option<Location>) -> Diagnostic {
        let location = self.location().cloned().or(fallback);
        Diagnostic::new(self.code(), self.to_string(), Severity::Error, Phase::Compile).at(location)
    }
}

impl From<quick_xml::events::attributes::AttrError> for XsltError {
    fn from(e: quick_xml::events::attributes::AttrError) -> Self {
        XsltError::QuickXml(quick_xml::Error::InvalidAttr(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_display_includes_file() {
        let plain = Location::from((3, 7));
        assert_eq!(plain.to_string(), "line 3, column 7");
        let in_file = plain.in_file(Some(Arc::from("page.xsl")));
        assert_eq!(in_file.to_string(), "page.xsl line 3, column 7");
    }

    #[test]
    fn errors_keep_their_location_in_diagnostics() {
        let err = XsltError::MissingAttribute {
            attribute: "select".into(),
            element: "xsl:value-of".into(),
            location: (4, 2).into(),
        };
        let diagnostic = err.into_diagnostic(None);
        assert_eq!(diagnostic.code, codes::MISSING_ATTRIBUTE);
        assert_eq!(diagnostic.line(), Some(4));
        assert_eq!(
            diagnostic.message,
            "Missing required attribute 'select' on <xsl:value-of>"
        );
    }
}
