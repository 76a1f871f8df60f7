//! XSLT 1.0 processor over XML data sources.
//!
//! A stylesheet is compiled once into a [`CompiledStylesheet`](ast::CompiledStylesheet)
//! and can then be executed against any number of documents. Problems are
//! never returned as errors past [`XsltTemplate::execute`]: they are
//! collected as [`Diagnostic`]s and the transformation carries on where it
//! can.

pub mod ast;
pub mod compiler;
pub mod datasources;
pub mod error;
pub mod executor;
pub mod output;
pub mod parser;
pub mod pattern;
pub mod processor;
pub mod resolver;
pub mod serializer;
pub mod util;

mod compiler_handlers;
mod executor_handlers;

pub use compiler::HOST_NAMESPACE;
pub use datasources::{DataSourceNode, NodeType, QName, XmlDocument};
pub use error::{Diagnostic, Location, Phase, Severity, XsltError, codes};
pub use processor::{ExecutionConfig, TransformOutput, XsltParser, XsltTemplate, check_document};
pub use resolver::{FileSystemResolver, Resolved, StylesheetResolver};
