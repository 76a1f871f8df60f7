//! The evaluation engine for executing a parsed XPath AST against a generic `DataSourceNode`.

use super::ast::{Axis, Expression, LocationPath, NodeTest, NodeTypeTest, Step, UnaryOperator};
use super::functions::{self, FunctionRegistry};
use super::{axes, operators};
use crate::datasource::{DataSourceNode, NodeType};
use crate::error::XPathError;
use crate::fragment::Fragment;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Represents the possible result types of an XPath expression evaluation.
#[derive(Debug, Clone)]
pub enum XPathValue<N> {
    NodeSet(Vec<N>),
    String(String),
    Number(f64),
    Boolean(bool),
    /// A result tree fragment bound by an XSLT variable with content.
    Fragment(Rc<Fragment>),
}

impl<'a, N: DataSourceNode<'a>> XPathValue<N> {
    /// Coerces the XPath value to a boolean as per XPath 1.0 rules.
    pub fn to_bool(&self) -> bool {
        match self {
            XPathValue::NodeSet(nodes) => !nodes.is_empty(),
            XPathValue::String(s) => !s.is_empty(),
            XPathValue::Number(n) => *n != 0.0 && !n.is_nan(),
            XPathValue::Boolean(b) => *b,
            // A fragment always has a root node.
            XPathValue::Fragment(_) => true,
        }
    }

    /// Coerces the XPath value to a number as per XPath 1.0 rules.
    pub fn to_number(&self) -> f64 {
        match self {
            XPathValue::Number(n) => *n,
            XPathValue::String(s) => string_to_number(s),
            XPathValue::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            XPathValue::NodeSet(_) | XPathValue::Fragment(_) => string_to_number(&self.to_string()),
        }
    }

    pub fn is_node_set(&self) -> bool {
        matches!(self, XPathValue::NodeSet(_))
    }

    /// Consumes the value as a node-set, failing for every other type.
    pub fn into_nodes(self, what: &str) -> Result<Vec<N>, XPathError> {
        match self {
            XPathValue::NodeSet(nodes) => Ok(nodes),
            other => Err(XPathError::TypeError(format!(
                "{} must be a node-set, got {}",
                what,
                other.type_name()
            ))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            XPathValue::NodeSet(_) => "node-set",
            XPathValue::String(_) => "string",
            XPathValue::Number(_) => "number",
            XPathValue::Boolean(_) => "boolean",
            XPathValue::Fragment(_) => "result tree fragment",
        }
    }
}

impl<'a, N: DataSourceNode<'a>> fmt::Display for XPathValue<N> {
    /// Coerces the XPath value to a string as per XPath 1.0 rules.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XPathValue::NodeSet(nodes) => write!(
                f,
                "{}",
                nodes.iter().min().map(|n| n.string_value()).unwrap_or_default()
            ),
            XPathValue::String(s) => write!(f, "{}", s),
            XPathValue::Number(n) => write!(f, "{}", format_number_value(*n)),
            XPathValue::Boolean(b) => write!(f, "{}", b),
            XPathValue::Fragment(fragment) => write!(f, "{}", fragment.string_value()),
        }
    }
}

/// Converts a string to a number with the XPath 1.0 `Number` grammar: an
/// optional minus sign and a decimal literal, surrounded by whitespace.
/// Anything else is NaN.
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim_matches(|c| matches!(c, ' ' | '\t' | '\n' | '\r'));
    let unsigned = trimmed.strip_prefix('-').unwrap_or(trimmed);
    let well_formed = !unsigned.is_empty()
        && unsigned != "."
        && unsigned.chars().all(|c| c.is_ascii_digit() || c == '.')
        && unsigned.matches('.').count() <= 1;
    if well_formed {
        trimmed.parse().unwrap_or(f64::NAN)
    } else {
        f64::NAN
    }
}

/// Formats a number the way XPath's `string()` does: no exponent, no
/// trailing `.0`, and the special names `NaN` and `Infinity`.
pub fn format_number_value(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Variable bindings visible to an expression.
pub trait Variables<N> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>>;
}

impl<N: Clone> Variables<N> for HashMap<String, XPathValue<N>> {
    fn lookup(&self, name: &str) -> Option<XPathValue<N>> {
        self.get(name).cloned()
    }
}

/// A container for all state needed during expression evaluation.
/// `'a` is the lifetime of the underlying data source.
/// `'d` is the lifetime of the evaluation context itself.
pub struct EvaluationContext<'a, 'd, N: DataSourceNode<'a>> {
    pub context_node: N,
    pub root_node: N,
    /// The node XSLT's `current()` returns; unchanged inside predicates.
    pub current_node: N,
    pub functions: &'d FunctionRegistry,
    pub context_position: usize, // 1-based index
    pub context_size: usize,
    pub variables: &'d dyn Variables<N>,
    /// Read-only access to the pre-computed key indexes.
    pub key_indexes: &'d HashMap<String, HashMap<String, Vec<N>>>,
    /// If true, references to unbound variables are errors.
    pub strict: bool,
    _marker: PhantomData<&'a ()>,
}

impl<'a, 'd, N: DataSourceNode<'a>> EvaluationContext<'a, 'd, N> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        context_node: N,
        root_node: N,
        functions: &'d FunctionRegistry,
        context_position: usize,
        context_size: usize,
        variables: &'d dyn Variables<N>,
        key_indexes: &'d HashMap<String, HashMap<String, Vec<N>>>,
        strict: bool,
    ) -> Self {
        Self {
            context_node,
            root_node,
            current_node: context_node,
            functions,
            context_position,
            context_size,
            variables,
            key_indexes,
            strict,
            _marker: PhantomData,
        }
    }

    pub fn with_current(mut self, node: N) -> Self {
        self.current_node = node;
        self
    }

    /// A context for evaluating a sub-expression at another node, keeping
    /// everything else (including `current()`).
    pub fn at(&self, node: N, position: usize, size: usize) -> Self {
        Self {
            context_node: node,
            root_node: self.root_node,
            current_node: self.current_node,
            functions: self.functions,
            context_position: position,
            context_size: size,
            variables: self.variables,
            key_indexes: self.key_indexes,
            strict: self.strict,
            _marker: PhantomData,
        }
    }
}

/// Evaluates a compiled expression and returns a concrete `XPathValue`.
pub fn evaluate<'a, N>(
    expr: &Expression,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<XPathValue<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    match expr {
        Expression::Literal(s) => Ok(XPathValue::String(s.clone())),
        Expression::Number(n) => Ok(XPathValue::Number(*n)),
        Expression::LocationPath(path) => {
            let nodes = evaluate_location_path(path, e_ctx)?;
            Ok(XPathValue::NodeSet(nodes))
        }
        Expression::Variable(name) => match e_ctx.variables.lookup(name) {
            Some(value) => Ok(value),
            None if e_ctx.strict => Err(XPathError::UnknownVariable(name.clone())),
            None => Ok(XPathValue::String(String::new())),
        },
        Expression::FunctionCall { name, args } => {
            let mut evaluated_args = Vec::with_capacity(args.len());
            for arg in args {
                evaluated_args.push(evaluate(arg, e_ctx)?);
            }
            functions::evaluate_function(name, evaluated_args, e_ctx)
        }
        Expression::Filter { expr, predicates } => {
            let mut nodes = evaluate(expr, e_ctx)?.into_nodes("A filtered expression")?;
            nodes.sort();
            nodes.dedup();
            Ok(XPathValue::NodeSet(apply_predicates(nodes, predicates, e_ctx)?))
        }
        Expression::BinaryOp { left, op, right } => {
            let left_val = evaluate(left, e_ctx)?;
            // `and`/`or` short-circuit.
            match op {
                crate::ast::BinaryOperator::And if !left_val.to_bool() => {
                    return Ok(XPathValue::Boolean(false));
                }
                crate::ast::BinaryOperator::Or if left_val.to_bool() => {
                    return Ok(XPathValue::Boolean(true));
                }
                _ => {}
            }
            let right_val = evaluate(right, e_ctx)?;
            operators::evaluate(*op, left_val, right_val)
        }
        Expression::UnaryOp { op, expr } => {
            let val = evaluate(expr, e_ctx)?;
            match op {
                UnaryOperator::Minus => Ok(XPathValue::Number(-val.to_number())),
            }
        }
    }
}

fn evaluate_location_path<'a, N>(
    path: &LocationPath,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut current_nodes = if let Some(start_expr) = &path.start_point {
        let mut nodes = evaluate(start_expr, e_ctx)?.into_nodes("The expression before '/'")?;
        nodes.sort();
        nodes.dedup();
        nodes
    } else if path.is_absolute {
        vec![e_ctx.root_node]
    } else {
        vec![e_ctx.context_node]
    };

    for step in &path.steps {
        current_nodes = evaluate_step(step, &current_nodes, e_ctx)?;
    }
    Ok(current_nodes)
}

/// Evaluates one step for every context node and merges the results into
/// document order. Predicates see positions relative to each context node.
fn evaluate_step<'a, N>(
    step: &Step,
    context_nodes: &[N],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut result = Vec::new();
    for &node in context_nodes {
        let candidates: Vec<N> = axes::collect(step.axis, node)
            .into_iter()
            .filter(|n| matches_node_test(n, &step.node_test, step.axis))
            .collect();
        result.extend(apply_predicates(candidates, &step.predicates, e_ctx)?);
    }
    if context_nodes.len() > 1 || step.axis.is_reverse() {
        result.sort();
        result.dedup();
    }
    Ok(result)
}

/// Checks a node against a step's node test. Name tests and `*` only select
/// the axis' principal node type.
pub fn matches_node_test<'a, N>(node: &N, test: &NodeTest, axis: Axis) -> bool
where
    N: DataSourceNode<'a>,
{
    let principal = if axis == Axis::Attribute {
        NodeType::Attribute
    } else {
        NodeType::Element
    };
    match test {
        NodeTest::Wildcard => node.node_type() == principal,
        NodeTest::Name(name) => {
            node.node_type() == principal
                && node.name().is_some_and(|q| match name.split_once(':') {
                    Some((prefix, local)) => q.prefix == Some(prefix) && q.local_part == local,
                    None => q.local_part == name && node.namespace_uri().is_none(),
                })
        }
        NodeTest::Namespaced { uri, local } => {
            node.node_type() == principal
                && node.namespace_uri() == Some(uri.as_str())
                && node.name().is_some_and(|q| q.local_part == local)
        }
        NodeTest::PrefixWildcard(prefix) => {
            node.node_type() == principal
                && node.name().is_some_and(|q| q.prefix == Some(prefix.as_str()))
        }
        NodeTest::NamespaceWildcard(uri) => {
            node.node_type() == principal && node.namespace_uri() == Some(uri.as_str())
        }
        NodeTest::NodeType(ntt) => match ntt {
            NodeTypeTest::Text => node.node_type() == NodeType::Text,
            NodeTypeTest::Comment => node.node_type() == NodeType::Comment,
            NodeTypeTest::ProcessingInstruction => {
                node.node_type() == NodeType::ProcessingInstruction
            }
            NodeTypeTest::Node => true,
        },
        NodeTest::ProcessingInstruction(target) => {
            node.node_type() == NodeType::ProcessingInstruction
                && node.name().is_some_and(|q| q.local_part == target)
        }
    }
}

/// Filters a set of nodes by applying a series of predicates in turn.
pub fn apply_predicates<'a, N>(
    nodes: Vec<N>,
    predicates: &[Expression],
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    let mut final_nodes = nodes;
    for predicate in predicates {
        // `[n]` with a literal number needs no per-node evaluation.
        if let Expression::Number(n) = predicate {
            let index = *n as usize;
            final_nodes = if n.fract() == 0.0 && index >= 1 && index <= final_nodes.len() {
                vec![final_nodes[index - 1]]
            } else {
                Vec::new()
            };
            continue;
        }
        let context_size = final_nodes.len();
        let mut kept = Vec::with_capacity(context_size);
        for (i, node) in final_nodes.iter().enumerate() {
            let predicate_ctx = e_ctx.at(*node, i + 1, context_size);
            let keep = match evaluate(predicate, &predicate_ctx)? {
                XPathValue::Number(n) => n == (i + 1) as f64,
                other => other.to_bool(),
            };
            if keep {
                kept.push(*node);
            }
        }
        final_nodes = kept;
    }
    Ok(final_nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasource::tests::{MockNode, MockTree, create_test_tree};
    use crate::parser::parse_expression;

    struct Env<'a> {
        tree: &'a MockTree<'a>,
        funcs: FunctionRegistry,
        vars: HashMap<String, XPathValue<MockNode<'a>>>,
        keys: HashMap<String, HashMap<String, Vec<MockNode<'a>>>>,
    }

    impl<'a> Env<'a> {
        fn new(tree: &'a MockTree<'a>) -> Self {
            Env {
                tree,
                funcs: FunctionRegistry::default(),
                vars: HashMap::new(),
                keys: HashMap::new(),
            }
        }

        fn eval(&self, xpath: &str) -> XPathValue<MockNode<'a>> {
            self.eval_at(0, xpath)
        }

        fn eval_at(&self, node: usize, xpath: &str) -> XPathValue<MockNode<'a>> {
            let root = self.tree.node(0);
            let ctx = EvaluationContext::new(
                self.tree.node(node),
                root,
                &self.funcs,
                1,
                1,
                &self.vars,
                &self.keys,
                true,
            );
            let expr = parse_expression(xpath).unwrap();
            evaluate(&expr, &ctx).unwrap()
        }

        fn ids(&self, xpath: &str) -> Vec<usize> {
            match self.eval(xpath) {
                XPathValue::NodeSet(nodes) => nodes.iter().map(|n| n.id).collect(),
                other => panic!("Expected a node-set, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_predicate_by_attribute() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        assert_eq!(env.ids("child::para[@id='p1']"), vec![1]);
    }

    #[test]
    fn test_predicate_by_position() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        assert_eq!(env.ids("child::para[1]"), vec![1]);
        assert_eq!(env.ids("para[position()=2]"), vec![6]);
        assert_eq!(env.ids("para[last()]"), vec![6]);
    }

    #[test]
    fn test_reverse_axis_positions_count_from_context() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        // Nearest preceding sibling of the second para is the PI.
        assert_eq!(env.ids("para[2]/preceding-sibling::node()[1]"), vec![9]);
        assert_eq!(env.ids("para[2]/preceding-sibling::*[1]"), vec![5]);
    }

    #[test]
    fn test_results_are_in_document_order() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        assert_eq!(env.ids("//text()"), vec![4, 7]);
        assert_eq!(env.ids("para | div | comment()"), vec![1, 8, 5, 6]);
    }

    #[test]
    fn test_filter_expression() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        assert_eq!(env.ids("(//para)[2]"), vec![6]);
    }

    #[test]
    fn test_variable_evaluation() {
        let tree = create_test_tree();
        let mut env = Env::new(&tree);
        env.vars.insert(
            "myVar".to_string(),
            XPathValue::String("test-value".to_string()),
        );
        assert_eq!(env.eval("$myVar").to_string(), "test-value");
    }

    #[test]
    fn test_unknown_variable_is_an_error_in_strict_mode() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        let ctx = EvaluationContext::new(
            tree.node(0),
            tree.node(0),
            &env.funcs,
            1,
            1,
            &env.vars,
            &env.keys,
            true,
        );
        let expr = parse_expression("$missing").unwrap();
        assert_eq!(
            evaluate(&expr, &ctx).unwrap_err(),
            XPathError::UnknownVariable("missing".to_string())
        );
    }

    #[test]
    fn test_path_from_variable_node_set() {
        let tree = create_test_tree();
        let mut env = Env::new(&tree);
        env.vars.insert(
            "para_node".to_string(),
            XPathValue::NodeSet(vec![tree.node(1)]),
        );
        let value = env.eval("$para_node/text()");
        assert_eq!(value.to_string(), "Hello");
    }

    #[test]
    fn test_current_survives_predicates() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        let ctx = EvaluationContext::new(
            tree.node(1),
            tree.node(0),
            &env.funcs,
            1,
            1,
            &env.vars,
            &env.keys,
            true,
        );
        let expr = parse_expression("/*[@id = current()/@id]").unwrap();
        let result = evaluate(&expr, &ctx).unwrap();
        assert_eq!(result.into_nodes("result").unwrap(), vec![tree.node(1)]);
    }

    #[test]
    fn test_number_conversions() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("-0.5"), -0.5);
        assert!(string_to_number("1e3").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("+1").is_nan());
        assert_eq!(format_number_value(3.0), "3");
        assert_eq!(format_number_value(-0.0), "0");
        assert_eq!(format_number_value(0.25), "0.25");
        assert_eq!(format_number_value(f64::INFINITY), "Infinity");
        assert_eq!(format_number_value(f64::NAN), "NaN");
    }

    #[test]
    fn test_boolean_short_circuit_skips_errors() {
        let tree = create_test_tree();
        let env = Env::new(&tree);
        assert!(!env.eval("false() and $undefined").to_bool());
        assert!(env.eval("true() or $undefined").to_bool());
    }
}
