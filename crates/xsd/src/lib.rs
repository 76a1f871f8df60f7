//! A practical subset of XML Schema 1.0.
//!
//! Global and local element declarations, named and anonymous complex
//! types (`sequence`, `choice`, `all`, attributes, `simpleContent`), and
//! simple types restricted by the common facets. Validation reports every
//! [`Violation`] with the line it occurred on.

pub mod error;
mod pattern;
pub mod schema;
pub mod types;
pub mod validator;

pub use error::{SchemaError, Violation};
pub use schema::{Schema, XS_NAMESPACE};
pub use types::BuiltinType;
