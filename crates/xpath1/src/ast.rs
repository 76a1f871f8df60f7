//! Defines the Abstract Syntax Tree (AST) for XPath 1.0 expressions.

use crate::error::XPathError;

/// The top-level expression that can be evaluated.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(String),
    Number(f64),
    LocationPath(LocationPath),
    Variable(String),
    FunctionCall {
        name: String,
        args: Vec<Expression>,
    },
    /// A primary expression followed by predicates, like `$items[2]` or `(//a)[last()]`.
    Filter {
        expr: Box<Expression>,
        predicates: Vec<Expression>,
    },
    BinaryOp {
        left: Box<Expression>,
        op: BinaryOperator,
        right: Box<Expression>,
    },
    UnaryOp {
        op: UnaryOperator,
        expr: Box<Expression>,
    },
}

impl Expression {
    /// Checks if the expression is a `LocationPath` variant.
    pub fn is_location_path(&self) -> bool {
        matches!(self, Expression::LocationPath(_))
    }

    /// Checks if the expression is a `BinaryOp` variant.
    pub fn is_binary_op(&self) -> bool {
        matches!(self, Expression::BinaryOp { .. })
    }

    /// Rewrites prefixed name tests and function names using the given
    /// prefix resolver. Name tests become [`NodeTest::Namespaced`]; function
    /// names are handed to `rename_function`, which may canonicalize them.
    pub fn resolve_names<R>(&mut self, resolver: &R) -> Result<(), XPathError>
    where
        R: NameResolver + ?Sized,
    {
        match self {
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => Ok(()),
            Expression::LocationPath(path) => path.resolve_names(resolver),
            Expression::FunctionCall { name, args } => {
                if let Some(renamed) = resolver.rename_function(name)? {
                    *name = renamed;
                }
                args.iter_mut().try_for_each(|a| a.resolve_names(resolver))
            }
            Expression::Filter { expr, predicates } => {
                expr.resolve_names(resolver)?;
                predicates.iter_mut().try_for_each(|p| p.resolve_names(resolver))
            }
            Expression::BinaryOp { left, right, .. } => {
                left.resolve_names(resolver)?;
                right.resolve_names(resolver)
            }
            Expression::UnaryOp { expr, .. } => expr.resolve_names(resolver),
        }
    }

    /// Visits every function call name in the expression tree.
    pub fn for_each_function<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Expression::FunctionCall { name, args } => {
                f(name);
                args.iter().for_each(|a| a.for_each_function(f));
            }
            Expression::LocationPath(path) => {
                if let Some(start) = &path.start_point {
                    start.for_each_function(f);
                }
                for step in &path.steps {
                    step.predicates.iter().for_each(|p| p.for_each_function(f));
                }
            }
            Expression::Filter { expr, predicates } => {
                expr.for_each_function(f);
                predicates.iter().for_each(|p| p.for_each_function(f));
            }
            Expression::BinaryOp { left, right, .. } => {
                left.for_each_function(f);
                right.for_each_function(f);
            }
            Expression::UnaryOp { expr, .. } => expr.for_each_function(f),
            Expression::Literal(_) | Expression::Number(_) | Expression::Variable(_) => {}
        }
    }
}

/// Resolves namespace prefixes found in an expression at compile time.
pub trait NameResolver {
    /// Returns the namespace URI bound to `prefix`, if any.
    fn namespace_uri(&self, prefix: &str) -> Option<String>;

    /// Gives the resolver a chance to rename a (possibly prefixed) function.
    /// The default keeps every name as written.
    fn rename_function(&self, _name: &str) -> Result<Option<String>, XPathError> {
        Ok(None)
    }
}

/// A unary operator used in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Minus,
}

/// A binary operator used in an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    // Logical
    Or,
    And,
    // Equality
    Equals,
    NotEquals,
    // Relational
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    // Additive
    Plus,
    Minus,
    // Multiplicative
    Multiply,
    Divide,
    Modulo,
    // Set
    Union,
}

/// Represents a full location path, like `/child::foo`, `descendant::bar[1]`, or `$var/item`.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationPath {
    /// An optional starting expression, for paths like `$var/foo` or `func()/foo`.
    /// If `None`, the path starts from the context node or root.
    pub start_point: Option<Box<Expression>>,
    /// True if the path starts from the document root (e.g., `/foo`).
    /// Meaningless if `start_point` is `Some`.
    pub is_absolute: bool,
    pub steps: Vec<Step>,
}

impl LocationPath {
    fn resolve_names<R: NameResolver + ?Sized>(&mut self, resolver: &R) -> Result<(), XPathError> {
        if let Some(start) = &mut self.start_point {
            start.resolve_names(resolver)?;
        }
        for step in &mut self.steps {
            step.node_test.resolve(resolver)?;
            step.predicates
                .iter_mut()
                .try_for_each(|p| p.resolve_names(resolver))?;
        }
        Ok(())
    }
}

/// Represents a single step in a location path, like `child::foo[position() > 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub node_test: NodeTest,
    pub predicates: Vec<Expression>,
}

impl Step {
    /// The `self::node()` step that `.` abbreviates.
    pub fn context_node() -> Self {
        Step {
            axis: Axis::SelfAxis,
            node_test: NodeTest::NodeType(NodeTypeTest::Node),
            predicates: vec![],
        }
    }

    /// The `descendant-or-self::node()` step that `//` abbreviates.
    pub fn descendant_or_self() -> Self {
        Step {
            axis: Axis::DescendantOrSelf,
            node_test: NodeTest::NodeType(NodeTypeTest::Node),
            predicates: vec![],
        }
    }
}

/// The axis of movement from the context node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Child,
    Descendant,
    DescendantOrSelf,
    Attribute,
    Parent,
    Ancestor,
    AncestorOrSelf,
    SelfAxis,
    FollowingSibling,
    PrecedingSibling,
    Following,
    Preceding,
}

impl Axis {
    /// Reverse axes number their nodes in reverse document order.
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Ancestor | Axis::AncestorOrSelf | Axis::PrecedingSibling | Axis::Preceding
        )
    }
}

/// A test to apply to nodes on a given axis to see if they should be included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeTest {
    /// A name test as written (e.g., `foo`, `xsl:if`).
    Name(String),
    /// A name test whose prefix has been resolved to a namespace URI.
    Namespaced { uri: String, local: String },
    /// A wildcard test (`*`).
    Wildcard,
    /// A prefixed wildcard (`svg:*`); holds the prefix until resolved.
    PrefixWildcard(String),
    /// A prefixed wildcard resolved to its namespace URI.
    NamespaceWildcard(String),
    /// A node type test (e.g., `text()`, `node()`).
    NodeType(NodeTypeTest),
    /// `processing-instruction('target')`.
    ProcessingInstruction(String),
}

impl NodeTest {
    pub fn resolve<R: NameResolver + ?Sized>(&mut self, resolver: &R) -> Result<(), XPathError> {
        match self {
            NodeTest::Name(name) => {
                if let Some((prefix, local)) = name.split_once(':') {
                    let uri = lookup(resolver, prefix)?;
                    *self = NodeTest::Namespaced {
                        uri,
                        local: local.to_string(),
                    };
                }
                Ok(())
            }
            NodeTest::PrefixWildcard(prefix) => {
                let uri = lookup(resolver, prefix)?;
                *self = NodeTest::NamespaceWildcard(uri);
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn lookup<R: NameResolver + ?Sized>(resolver: &R, prefix: &str) -> Result<String, XPathError> {
    resolver
        .namespace_uri(prefix)
        .ok_or_else(|| XPathError::UndefinedPrefix(prefix.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeTypeTest {
    Text,
    Node,
    Comment,
    ProcessingInstruction,
}
