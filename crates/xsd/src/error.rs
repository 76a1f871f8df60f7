use std::fmt;
use thiserror::Error;

/// A problem with the schema itself, or a document that cannot be read.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Schema is not well-formed XML: {0}")]
    SchemaXml(roxmltree::Error),

    #[error("Document is not well-formed XML: {0}")]
    DocumentXml(roxmltree::Error),

    #[error("The root element must be xs:schema, found <{0}>")]
    NotASchema(String),

    #[error("{construct} is not supported (line {line})")]
    Unsupported { construct: String, line: u32 },

    #[error("Unknown type '{name}' (line {line})")]
    UnknownType { name: String, line: u32 },

    #[error("Reference to undeclared element '{name}' (line {line})")]
    UnknownElement { name: String, line: u32 },

    #[error("Invalid {facet} facet '{value}' (line {line})")]
    InvalidFacet {
        facet: String,
        value: String,
        line: u32,
    },

    #[error("Invalid pattern '{pattern}' (line {line}): {source}")]
    Pattern {
        pattern: String,
        line: u32,
        #[source]
        source: regex::Error,
    },

    #[error("Unicode block escape 'Is{block}' in pattern '{pattern}' is not supported (line {line})")]
    UnknownBlock {
        block: String,
        pattern: String,
        line: u32,
    },

    #[error("Missing attribute '{attribute}' on xs:{element} (line {line})")]
    MissingAttribute {
        attribute: String,
        element: String,
        line: u32,
    },
}

impl SchemaError {
    pub fn line(&self) -> Option<u32> {
        match self {
            SchemaError::SchemaXml(e) | SchemaError::DocumentXml(e) => Some(e.pos().row),
            SchemaError::NotASchema(_) => None,
            SchemaError::Unsupported { line, .. }
            | SchemaError::UnknownType { line, .. }
            | SchemaError::UnknownElement { line, .. }
            | SchemaError::InvalidFacet { line, .. }
            | SchemaError::Pattern { line, .. }
            | SchemaError::UnknownBlock { line, .. }
            | SchemaError::MissingAttribute { line, .. } => Some(*line),
        }
    }
}

/// One way a document breaks its schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub message: String,
    /// 1-based line of the offending element or attribute.
    pub line: u32,
}

impl Violation {
    pub fn new(message: impl Into<String>, line: u32) -> Self {
        Violation {
            message: message.into(),
            line,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}
