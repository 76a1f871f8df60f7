//! XPath 1.0 for the folio XSLT engine.
//!
//! The evaluator is written against [`DataSourceNode`], so it runs over any
//! read-only tree. Result tree fragments produced by XSLT variables are
//! first-class values ([`Fragment`]), and host callbacks can be exposed to
//! expressions through the [`FunctionRegistry`].

pub mod ast;
pub mod axes;
pub mod datasource;
pub mod engine;
pub mod error;
pub mod fragment;
pub mod functions;
pub mod operators;
pub mod parser;

pub use ast::{Axis, BinaryOperator, Expression, LocationPath, NodeTest, NodeTypeTest, Step};
pub use datasource::{DataSourceNode, NodeType, QName, XML_NAMESPACE};
pub use engine::{EvaluationContext, Variables, XPathValue, evaluate, format_number_value};
pub use fragment::{Fragment, FragmentNode};
pub use functions::{DecimalFormat, FunctionRegistry, HostFunction, HostValue};

// Re-export test utilities for integration testing in downstream crates
pub use datasource::tests;
pub use error::XPathError;
pub use parser::parse_expression;
