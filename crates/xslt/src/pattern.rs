//! A dedicated engine for parsing and evaluating XSLT `match` patterns.
use crate::error::XsltError;
use folio_xpath1::ast::{Axis, Expression, NameResolver, NodeTest};
use folio_xpath1::datasource::{DataSourceNode, NodeType};
use folio_xpath1::engine::{EvaluationContext, apply_predicates, matches_node_test};
use folio_xpath1::parser as xpath_parser;
use folio_xpath1::{XPathError, evaluate};
use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, multispace0};
use nom::combinator::{map, opt, value};
use nom::multi::{many0, separated_list1};
use nom::sequence::{delimited, pair, preceded};
use nom::{IResult, Parser};
use std::fmt;

/// Represents a single location step in a match pattern (e.g., `foo`, `@*`, `item[2]`).
#[derive(Debug, Clone, PartialEq)]
struct MatchStep {
    axis: MatchAxis,
    node_test: NodeTest,
    predicates: Vec<Expression>,
}

/// The axes relevant for match patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchAxis {
    Child,
    Attribute,
}

/// The separator written before a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    /// `/`: the previous step matches the parent.
    Child,
    /// `//`: the previous step matches some ancestor.
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum PatternStart {
    /// A relative pattern such as `section/para`.
    Anywhere,
    /// A pattern starting with `/` or `//`.
    Root,
    /// A pattern starting with `id(...)` or `key(...)`.
    Function(Expression),
}

/// A single location path within a pattern, e.g., "/doc/section/para".
#[derive(Debug, Clone, PartialEq)]
struct LocationPathPattern {
    start: PatternStart,
    steps: Vec<(Separator, MatchStep)>,
}

/// A compiled representation of an XSLT match pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    /// A pattern can be a union of multiple paths, e.g., "para|note".
    paths: Vec<LocationPathPattern>,
    original_text: String,
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original_text)
    }
}

impl Pattern {
    /// Evaluates if a given node matches this compiled pattern.
    pub fn matches<'a, N>(
        &self,
        node: N,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        for path in &self.paths {
            if path.matches(node, e_ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Splits a union pattern into one pattern per alternative. A template
    /// rule with a union pattern behaves like one rule per alternative.
    pub fn alternatives(&self) -> Vec<Pattern> {
        self.paths
            .iter()
            .map(|path| Pattern {
                paths: vec![path.clone()],
                original_text: self.original_text.clone(),
            })
            .collect()
    }

    /// The XSLT 1.0 default priority. For a union this is the highest
    /// priority of its alternatives.
    pub fn default_priority(&self) -> f64 {
        self.paths
            .iter()
            .map(LocationPathPattern::default_priority)
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Resolves prefixed name tests and function names in predicates.
    pub fn resolve_names<R: NameResolver + ?Sized>(&mut self, resolver: &R) -> Result<(), XPathError> {
        for path in &mut self.paths {
            if let PatternStart::Function(expr) = &mut path.start {
                expr.resolve_names(resolver)?;
            }
            for (_, step) in &mut path.steps {
                step.node_test.resolve(resolver)?;
                step.predicates
                    .iter_mut()
                    .try_for_each(|p| p.resolve_names(resolver))?;
            }
        }
        Ok(())
    }
}

impl LocationPathPattern {
    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        if self.steps.is_empty() {
            return match &self.start {
                PatternStart::Root => Ok(node.node_type() == NodeType::Root),
                PatternStart::Function(call) => Ok(start_nodes(call, node, e_ctx)?.contains(&node)),
                PatternStart::Anywhere => Ok(false),
            };
        }
        self.match_from(self.steps.len(), node, e_ctx)
    }

    /// Matches the first `count` steps, the last of them against `node`,
    /// walking from right to left.
    fn match_from<'a, N>(
        &self,
        count: usize,
        node: N,
        e_ctx: &EvaluationContext<'a, '_, N>,
    ) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let (separator, step) = &self.steps[count - 1];
        if !step.matches(node, e_ctx)? {
            return Ok(false);
        }
        let candidates: Vec<N> = match separator {
            Separator::Child => node.parent().into_iter().collect(),
            Separator::Descendant => std::iter::successors(node.parent(), |n| n.parent()).collect(),
        };

        if count == 1 {
            return match &self.start {
                PatternStart::Anywhere => Ok(true),
                PatternStart::Root => Ok(candidates.iter().any(|n| n.node_type() == NodeType::Root)),
                PatternStart::Function(call) => {
                    let targets = start_nodes(call, node, e_ctx)?;
                    Ok(candidates.iter().any(|c| targets.contains(c)))
                }
            };
        }
        for candidate in candidates {
            if self.match_from(count - 1, candidate, e_ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn default_priority(&self) -> f64 {
        let single = match (&self.start, self.steps.as_slice()) {
            (PatternStart::Anywhere, [(_, step)]) if step.predicates.is_empty() => step,
            _ => return 0.5,
        };
        match single.node_test {
            NodeTest::Name(_) | NodeTest::Namespaced { .. } | NodeTest::ProcessingInstruction(_) => 0.0,
            NodeTest::PrefixWildcard(_) | NodeTest::NamespaceWildcard(_) => -0.25,
            NodeTest::Wildcard | NodeTest::NodeType(_) => -0.5,
        }
    }
}

fn start_nodes<'a, N>(
    call: &Expression,
    node: N,
    e_ctx: &EvaluationContext<'a, '_, N>,
) -> Result<Vec<N>, XPathError>
where
    N: DataSourceNode<'a> + 'a,
{
    evaluate(call, &e_ctx.at(node, 1, 1))?.into_nodes("An id() or key() pattern")
}

impl MatchStep {
    fn matches<'a, N>(&self, node: N, e_ctx: &EvaluationContext<'a, '_, N>) -> Result<bool, XPathError>
    where
        N: DataSourceNode<'a> + 'a,
    {
        let node_type = node.node_type();
        let (axis, on_axis) = match self.axis {
            MatchAxis::Attribute => (Axis::Attribute, node_type == NodeType::Attribute),
            // The child axis never reaches the root or an attribute.
            MatchAxis::Child => (
                Axis::Child,
                !matches!(node_type, NodeType::Attribute | NodeType::Root),
            ),
        };
        if !on_axis || !matches_node_test(&node, &self.node_test, axis) {
            return Ok(false);
        }
        if self.predicates.is_empty() {
            return Ok(true);
        }

        let Some(parent) = node.parent() else {
            return Ok(false);
        };
        let siblings = match self.axis {
            MatchAxis::Child => parent.children(),
            MatchAxis::Attribute => parent.attributes(),
        };
        let candidates: Vec<N> = siblings
            .filter(|n| matches_node_test(n, &self.node_test, axis))
            .collect();
        let kept = apply_predicates(candidates, &self.predicates, e_ctx)?;
        Ok(kept.contains(&node))
    }
}

// --- Parser ---

pub fn parse(text: &str) -> Result<Pattern, XsltError> {
    match pattern_parser(text.trim()) {
        Ok(("", paths)) => Ok(Pattern {
            paths,
            original_text: text.to_string(),
        }),
        Ok((rem, _)) => Err(XsltError::PatternParse(
            text.to_string(),
            format!("Unconsumed input in pattern: {}", rem),
        )),
        Err(e) => Err(XsltError::PatternParse(text.to_string(), e.to_string())),
    }
}

fn ws<'a, F, O>(inner: F) -> impl Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>
where
    F: Parser<&'a str, Output = O, Error = nom::error::Error<&'a str>>,
{
    delimited(multispace0, inner, multispace0)
}

fn pattern_parser(input: &str) -> IResult<&str, Vec<LocationPathPattern>> {
    separated_list1(ws(char('|')), path_pattern).parse(input)
}

fn path_pattern(input: &str) -> IResult<&str, LocationPathPattern> {
    alt((
        keyed_path,
        absolute_path,
        map(relative_path, |steps| LocationPathPattern {
            start: PatternStart::Anywhere,
            steps,
        }),
    ))
    .parse(input)
}

fn absolute_path(input: &str) -> IResult<&str, LocationPathPattern> {
    alt((
        map(preceded(tag("//"), relative_path), |mut steps| {
            steps[0].0 = Separator::Descendant;
            LocationPathPattern {
                start: PatternStart::Root,
                steps,
            }
        }),
        map(preceded(char('/'), opt(relative_path)), |steps| {
            LocationPathPattern {
                start: PatternStart::Root,
                steps: steps.unwrap_or_default(),
            }
        }),
    ))
    .parse(input)
}

fn keyed_path(input: &str) -> IResult<&str, LocationPathPattern> {
    let (input, call) = id_or_key(input)?;
    let (input, tail) = opt(pair(separator, relative_path)).parse(input)?;
    let steps = match tail {
        Some((sep, mut steps)) => {
            steps[0].0 = sep;
            steps
        }
        None => Vec::new(),
    };
    Ok((
        input,
        LocationPathPattern {
            start: PatternStart::Function(call),
            steps,
        },
    ))
}

fn id_or_key(input: &str) -> IResult<&str, Expression> {
    let (input, name) = alt((tag("id"), tag("key"))).parse(input)?;
    let (input, args) = delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), xpath_parser::string_literal),
        ws(char(')')),
    )
    .parse(input)?;
    Ok((
        input,
        Expression::FunctionCall {
            name: name.to_string(),
            args: args.into_iter().map(Expression::Literal).collect(),
        },
    ))
}

fn separator(input: &str) -> IResult<&str, Separator> {
    alt((
        value(Separator::Descendant, tag("//")),
        value(Separator::Child, tag("/")),
    ))
    .parse(input)
}

fn relative_path(input: &str) -> IResult<&str, Vec<(Separator, MatchStep)>> {
    let (input, first) = step_parser(input)?;
    let (input, rest) = many0(pair(separator, step_parser)).parse(input)?;
    let mut steps = vec![(Separator::Child, first)];
    steps.extend(rest);
    Ok((input, steps))
}

fn step_parser(input: &str) -> IResult<&str, MatchStep> {
    let (input, axis) = alt((
        value(MatchAxis::Attribute, alt((tag("@"), tag("attribute::")))),
        value(MatchAxis::Child, opt(tag("child::"))),
    ))
    .parse(input)?;
    let (input, node_test) = xpath_parser::node_test(input)?;
    let (input, predicates) = many0(xpath_parser::predicate).parse(input)?;
    Ok((
        input,
        MatchStep {
            axis,
            node_test,
            predicates,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_xpath1::FunctionRegistry;
    use folio_xpath1::engine::XPathValue;
    use folio_xpath1::tests::{MockNode, MockTree, create_test_tree};
    use std::collections::HashMap;

    fn matches(tree: &MockTree<'_>, pattern: &str, id: usize) -> bool {
        let functions = FunctionRegistry::default();
        let vars: HashMap<String, XPathValue<MockNode>> = HashMap::new();
        let keys = HashMap::new();
        let root = tree.node(0);
        let ctx = EvaluationContext::new(root, root, &functions, 1, 1, &vars, &keys, true);
        parse(pattern).unwrap().matches(tree.node(id), &ctx).unwrap()
    }

    #[test]
    fn test_name_and_root_patterns() {
        let tree = create_test_tree();
        assert!(matches(&tree, "para", 1));
        assert!(!matches(&tree, "para", 5));
        assert!(matches(&tree, "/", 0));
        assert!(!matches(&tree, "/", 1));
        assert!(matches(&tree, "/para", 6));
        assert!(matches(&tree, "//para", 6));
        assert!(!matches(&tree, "div/para", 6));
    }

    #[test]
    fn test_node_type_patterns() {
        let tree = create_test_tree();
        assert!(matches(&tree, "text()", 4));
        assert!(matches(&tree, "para/text()", 7));
        assert!(matches(&tree, "node()", 8));
        assert!(!matches(&tree, "node()", 0));
        assert!(!matches(&tree, "node()", 2));
        assert!(matches(&tree, "processing-instruction('pi-target')", 9));
        assert!(matches(&tree, "comment() | div", 5));
    }

    #[test]
    fn test_attribute_patterns() {
        let tree = create_test_tree();
        assert!(matches(&tree, "@id", 2));
        assert!(matches(&tree, "para/@*", 3));
        assert!(!matches(&tree, "@id", 1));
        assert!(matches(&tree, "para[@id='p1']", 1));
        assert!(!matches(&tree, "para[@id='p1']", 6));
    }

    #[test]
    fn test_positional_predicates_count_matching_siblings() {
        let tree = create_test_tree();
        assert!(matches(&tree, "para[2]", 6));
        assert!(!matches(&tree, "para[2]", 1));
        assert!(matches(&tree, "para[last()]", 6));
    }

    #[test]
    fn test_default_priorities() {
        let priority = |p: &str| parse(p).unwrap().default_priority();
        assert_eq!(priority("para"), 0.0);
        assert_eq!(priority("@id"), 0.0);
        assert_eq!(priority("processing-instruction('x')"), 0.0);
        assert_eq!(priority("svg:*"), -0.25);
        assert_eq!(priority("*"), -0.5);
        assert_eq!(priority("text()"), -0.5);
        assert_eq!(priority("para[1]"), 0.5);
        assert_eq!(priority("section/para"), 0.5);
        assert_eq!(priority("/"), 0.5);
    }

    #[test]
    fn test_union_alternatives_keep_their_own_priority() {
        let pattern = parse("para | *").unwrap();
        let priorities: Vec<f64> = pattern
            .alternatives()
            .iter()
            .map(Pattern::default_priority)
            .collect();
        assert_eq!(priorities, vec![0.0, -0.5]);
    }

    #[test]
    fn test_key_pattern_parses() {
        let pattern = parse("key('by-id', 'p1')/text()").unwrap();
        assert_eq!(pattern.default_priority(), 0.5);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(parse("para[").is_err());
        assert!(parse("").is_err());
        assert!(parse("a +").is_err());
    }
}
