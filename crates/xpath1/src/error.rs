use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum XPathError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("XPath parse error in '{0}': {1}")]
    XPathParse(String, String),

    #[error("Function '{function}' error: {message}")]
    FunctionError { function: String, message: String },

    #[error("Unregistered function '{0}'")]
    UnknownFunction(String),

    #[error("Host function '{name}' failed: {message}")]
    HostFunction { name: String, message: String },

    #[error("Undefined namespace prefix '{0}'")]
    UndefinedPrefix(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Undefined variable '{0}'")]
    UnknownVariable(String),

    #[error("Context node required")]
    NoContextNode,
}

impl XPathError {
    pub(crate) fn arity(function: &str, expected: &str) -> Self {
        XPathError::FunctionError {
            function: format!("{}()", function),
            message: format!("Expected {}", expected),
        }
    }
}
