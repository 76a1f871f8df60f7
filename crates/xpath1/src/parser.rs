//! A `nom`-based parser for the XPath 1.0 expression language.

use super::ast::*;
use crate::error::XPathError;
use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace0, satisfy},
    combinator::{map, map_res, not, opt, peek, recognize, value},
    multi::{many0, separated_list0},
    sequence::{delimited, pair, preceded, terminated},
};

// --- Main Public Parser ---

pub fn parse_expression(input: &str) -> Result<Expression, XPathError> {
    match expression(input.trim()) {
        Ok(("", expr)) => Ok(expr),
        Ok((rem, _)) => Err(unexpected(input, rem)),
        Err(nom::Err::Error(e) | nom::Err::Failure(e)) => Err(unexpected(input, e.input)),
        Err(nom::Err::Incomplete(_)) => Err(unexpected(input, "")),
    }
}

fn unexpected(input: &str, rest: &str) -> XPathError {
    let message = if rest.trim().is_empty() {
        "Unexpected end of expression".to_string()
    } else {
        format!("Unexpected input at '{}'", rest.trim())
    };
    XPathError::XPathParse(input.to_string(), message)
}

// --- Combinators & Helpers ---

fn ws<'a, F, O, E>(inner: F) -> impl Parser<&'a str, Output = O, Error = E>
where
    F: Parser<&'a str, Output = O, Error = E>,
    E: nom::error::ParseError<&'a str>,
{
    delimited(multispace0, inner, multispace0)
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.')
}

/// An operator name such as `div`, which must not run into a following name.
fn keyword<'a>(word: &'static str) -> impl Parser<&'a str, Output = &'a str, Error = nom::error::Error<&'a str>> {
    terminated(tag(word), not(peek(satisfy(is_name_char))))
}

fn build_binary_expr_parser<'a, F, G>(
    sub_expr_parser: F,
    op_parser: G,
) -> impl FnMut(&'a str) -> IResult<&'a str, Expression>
where
    F: Parser<&'a str, Output = Expression, Error = nom::error::Error<&'a str>> + Clone,
    G: Parser<&'a str, Output = BinaryOperator, Error = nom::error::Error<&'a str>> + Clone,
{
    move |input: &str| {
        let (input, mut left) = sub_expr_parser.clone().parse(input)?;
        let (input, remainder) =
            many0(pair(ws(op_parser.clone()), sub_expr_parser.clone())).parse(input)?;

        for (op, right) in remainder {
            left = Expression::BinaryOp {
                left: Box::new(left),
                op,
                right: Box::new(right),
            };
        }
        Ok((input, left))
    }
}

// --- Expression Parsers (in order of precedence) ---

fn expression(input: &str) -> IResult<&str, Expression> {
    or_expr(input)
}

fn or_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Or, keyword("or")).parse(input)
}

fn and_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::And, keyword("and")).parse(input)
}

fn or_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(and_expr, or_op)(input)
}

fn and_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(equality_expr, and_op)(input)
}

fn equality_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Equals, tag("=")),
        value(BinaryOperator::NotEquals, tag("!=")),
    ))
    .parse(input)
}

fn relational_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::LessThanOrEqual, alt((tag("<="), tag("&lt;=")))),
        value(BinaryOperator::GreaterThanOrEqual, alt((tag(">="), tag("&gt;=")))),
        value(BinaryOperator::LessThan, alt((tag("<"), tag("&lt;")))),
        value(BinaryOperator::GreaterThan, alt((tag(">"), tag("&gt;")))),
    ))
    .parse(input)
}

fn additive_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Plus, char('+')),
        value(BinaryOperator::Minus, char('-')),
    ))
    .parse(input)
}

fn multiplicative_op(input: &str) -> IResult<&str, BinaryOperator> {
    alt((
        value(BinaryOperator::Multiply, char('*')),
        value(BinaryOperator::Divide, keyword("div")),
        value(BinaryOperator::Modulo, keyword("mod")),
    ))
    .parse(input)
}

fn union_op(input: &str) -> IResult<&str, BinaryOperator> {
    value(BinaryOperator::Union, char('|')).parse(input)
}

fn equality_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(relational_expr, equality_op)(input)
}

fn relational_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(additive_expr, relational_op)(input)
}

fn additive_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(multiplicative_expr, additive_op)(input)
}

fn multiplicative_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(unary_expr, multiplicative_op)(input)
}

fn unary_expr(input: &str) -> IResult<&str, Expression> {
    if let Ok((i, _)) = ws(char::<&str, nom::error::Error<&str>>('-')).parse(input) {
        let (i, expr) = unary_expr(i)?;
        return Ok((
            i,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(expr),
            },
        ));
    }
    union_expr(input)
}

fn union_expr(input: &str) -> IResult<&str, Expression> {
    build_binary_expr_parser(path_expr, union_op)(input)
}

/// A location path, or a filter expression optionally continued by a
/// relative path (`$nodes[1]/title`, `key('k', .)//item`).
fn path_expr(input: &str) -> IResult<&str, Expression> {
    let Ok((i, primary)) = ws(filter_expr).parse(input) else {
        return map(ws(location_path), Expression::LocationPath).parse(input);
    };

    let (i, remainder_steps) = many0(pair(ws(path_separator), step)).parse(i)?;
    if remainder_steps.is_empty() {
        return Ok((i, primary));
    }

    let mut steps = Vec::new();
    push_steps(&mut steps, remainder_steps);
    Ok((
        i,
        Expression::LocationPath(LocationPath {
            start_point: Some(Box::new(primary)),
            is_absolute: false,
            steps,
        }),
    ))
}

fn filter_expr(input: &str) -> IResult<&str, Expression> {
    let (i, primary) = primary_expr(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    if predicates.is_empty() {
        Ok((i, primary))
    } else {
        Ok((
            i,
            Expression::Filter {
                expr: Box::new(primary),
                predicates,
            },
        ))
    }
}

fn primary_expr(input: &str) -> IResult<&str, Expression> {
    alt((
        variable_reference,
        map(number_literal, Expression::Number),
        map(string_literal, Expression::Literal),
        function_call,
        delimited(char('('), ws(expression), char(')')),
    ))
    .parse(input)
}

// --- Literal Parsers ---

/// `Digits ('.' Digits?)? | '.' Digits`. No sign, exponent or special values.
fn number_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        ))),
        str::parse::<f64>,
    )
    .parse(input)
}

/// Parses a single- or double-quoted string literal.
pub fn string_literal(input: &str) -> IResult<&str, String> {
    map(
        alt((
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
        )),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn variable_reference(input: &str) -> IResult<&str, Expression> {
    map(preceded(char('$'), q_name), Expression::Variable).parse(input)
}

// --- Name and NodeTest Parsers ---

fn nc_name(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_name_start),
        take_while(is_name_char),
    ))
    .parse(input)
}

fn q_name(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(nc_name, opt(pair(char(':'), nc_name)))),
        |s: &str| s.to_string(),
    )
    .parse(input)
}

fn empty_parens(input: &str) -> IResult<&str, ()> {
    value((), pair(ws(char('(')), char(')'))).parse(input)
}

fn node_type_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        map(
            preceded(
                tag("processing-instruction"),
                delimited(ws(char('(')), ws(string_literal), char(')')),
            ),
            NodeTest::ProcessingInstruction,
        ),
        map(terminated(tag("processing-instruction"), empty_parens), |_| {
            NodeTest::NodeType(NodeTypeTest::ProcessingInstruction)
        }),
        map(terminated(tag("comment"), empty_parens), |_| {
            NodeTest::NodeType(NodeTypeTest::Comment)
        }),
        map(terminated(tag("text"), empty_parens), |_| {
            NodeTest::NodeType(NodeTypeTest::Text)
        }),
        map(terminated(tag("node"), empty_parens), |_| {
            NodeTest::NodeType(NodeTypeTest::Node)
        }),
    ))
    .parse(input)
}

/// Parses a node test: `*`, `prefix:*`, a node type test, or a QName.
pub fn node_test(input: &str) -> IResult<&str, NodeTest> {
    alt((
        value(NodeTest::Wildcard, char('*')),
        map(terminated(nc_name, tag(":*")), |prefix| {
            NodeTest::PrefixWildcard(prefix.to_string())
        }),
        node_type_test,
        map(q_name, NodeTest::Name),
    ))
    .parse(input)
}

// --- Path Parsers ---

fn axis(input: &str) -> IResult<&str, Axis> {
    terminated(
        alt((
            value(Axis::AncestorOrSelf, tag("ancestor-or-self")),
            value(Axis::Ancestor, tag("ancestor")),
            value(Axis::Attribute, tag("attribute")),
            value(Axis::Child, tag("child")),
            value(Axis::DescendantOrSelf, tag("descendant-or-self")),
            value(Axis::Descendant, tag("descendant")),
            value(Axis::FollowingSibling, tag("following-sibling")),
            value(Axis::Following, tag("following")),
            value(Axis::Parent, tag("parent")),
            value(Axis::PrecedingSibling, tag("preceding-sibling")),
            value(Axis::Preceding, tag("preceding")),
            value(Axis::SelfAxis, tag("self")),
        )),
        ws(tag("::")),
    )
    .parse(input)
}

/// Parses one bracketed predicate.
pub fn predicate(input: &str) -> IResult<&str, Expression> {
    delimited(ws(char('[')), ws(expression), char(']')).parse(input)
}

fn step(input: &str) -> IResult<&str, Step> {
    if let Ok((i, _)) = tag::<&str, &str, nom::error::Error<&str>>("..").parse(input) {
        return Ok((
            i,
            Step {
                axis: Axis::Parent,
                node_test: NodeTest::NodeType(NodeTypeTest::Node),
                predicates: vec![],
            },
        ));
    }
    if let Ok((i, _)) = terminated(
        char::<&str, nom::error::Error<&str>>('.'),
        not(peek(satisfy(|c: char| c.is_ascii_digit()))),
    )
    .parse(input)
    {
        return Ok((i, Step::context_node()));
    }

    let (i, (axis, node_test)) = alt((
        map(preceded(ws(char('@')), node_test), |nt| (Axis::Attribute, nt)),
        map(pair(axis, node_test), |(ax, nt)| (ax, nt)),
        map(node_test, |nt| (Axis::Child, nt)),
    ))
    .parse(input)?;
    let (i, predicates) = many0(predicate).parse(i)?;
    Ok((
        i,
        Step {
            axis,
            node_test,
            predicates,
        },
    ))
}

fn path_separator(input: &str) -> IResult<&str, &str> {
    alt((tag("//"), tag("/"))).parse(input)
}

fn push_steps(steps: &mut Vec<Step>, remainder: Vec<(&str, Step)>) {
    for (sep, next_step) in remainder {
        if sep == "//" {
            steps.push(Step::descendant_or_self());
        }
        steps.push(next_step);
    }
}

fn location_path(input: &str) -> IResult<&str, LocationPath> {
    let (i, is_absolute, mut steps) =
        if let Ok((rem, _)) = tag::<&str, &str, nom::error::Error<&str>>("//").parse(input) {
            let (rem, first) = ws(step).parse(rem)?;
            (rem, true, vec![Step::descendant_or_self(), first])
        } else if let Ok((rem, _)) = char::<&str, nom::error::Error<&str>>('/').parse(input) {
            match ws(step).parse(rem) {
                Ok((rem, first)) => (rem, true, vec![first]),
                // A lone `/` selects the root node.
                Err(_) => (rem, true, vec![]),
            }
        } else {
            let (rem, first) = step(input)?;
            (rem, false, vec![first])
        };

    if steps.is_empty() {
        return Ok((
            i,
            LocationPath {
                start_point: None,
                is_absolute,
                steps,
            },
        ));
    }

    let (i, remainder) = many0(pair(ws(path_separator), step)).parse(i)?;
    push_steps(&mut steps, remainder);

    Ok((
        i,
        LocationPath {
            start_point: None,
            is_absolute,
            steps,
        },
    ))
}

// --- Function Call Parser ---

fn function_call(input: &str) -> IResult<&str, Expression> {
    // A QName only names a function when '(' follows; `foo` in `foo/bar` is a step.
    let (i, name) = q_name(input)?;
    let (i, _) = peek(ws(char('('))).parse(i)?;

    // Node type tests look like calls but belong to the step parser.
    if matches!(
        name.as_str(),
        "text" | "node" | "comment" | "processing-instruction"
    ) {
        return Err(nom::Err::Error(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    let (i, args) = delimited(
        ws(char('(')),
        ws(separated_list0(ws(char(',')), expression)),
        char(')'),
    )
    .parse(i)?;

    Ok((i, Expression::FunctionCall { name, args }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn child(name: &str) -> Step {
        Step {
            axis: Axis::Child,
            node_test: NodeTest::Name(name.into()),
            predicates: vec![],
        }
    }

    fn relative(steps: Vec<Step>) -> Expression {
        Expression::LocationPath(LocationPath {
            start_point: None,
            is_absolute: false,
            steps,
        })
    }

    #[test]
    fn test_parse_simple_path() {
        let result = parse_expression("foo/bar").unwrap();
        assert_eq!(result, relative(vec![child("foo"), child("bar")]));
        assert_eq!(parse_expression("foo / bar").unwrap(), result);
    }

    #[test]
    fn test_parse_unary_minus() {
        let result = parse_expression("-5").unwrap();
        assert_eq!(
            result,
            Expression::UnaryOp {
                op: UnaryOperator::Minus,
                expr: Box::new(Expression::Number(5.0))
            }
        );

        let result2 = parse_expression("10 - -5").unwrap();
        if let Expression::BinaryOp { left, op, right } = result2 {
            assert_eq!(op, BinaryOperator::Minus);
            assert_eq!(*left, Expression::Number(10.0));
            assert_eq!(
                *right,
                Expression::UnaryOp {
                    op: UnaryOperator::Minus,
                    expr: Box::new(Expression::Number(5.0))
                }
            );
        } else {
            panic!("Expected BinaryOp");
        }
    }

    #[test]
    fn test_parse_number_literals() {
        assert_eq!(parse_expression("3.").unwrap(), Expression::Number(3.0));
        assert_eq!(parse_expression(".5").unwrap(), Expression::Number(0.5));
        // Not numbers in XPath 1.0: these are names.
        assert!(parse_expression("inf").unwrap().is_location_path());
        assert!(parse_expression("NaN").unwrap().is_location_path());
        assert!(parse_expression("1e3").is_err());
    }

    #[test]
    fn test_parse_axes() {
        let cases = [
            ("following-sibling::foo", Axis::FollowingSibling),
            ("preceding::*", Axis::Preceding),
            ("ancestor-or-self::node()", Axis::AncestorOrSelf),
            ("ancestor::div", Axis::Ancestor),
            ("descendant-or-self::x", Axis::DescendantOrSelf),
        ];
        for (xpath, expected) in cases {
            match parse_expression(xpath).unwrap() {
                Expression::LocationPath(lp) => assert_eq!(lp.steps[0].axis, expected, "{}", xpath),
                other => panic!("Expected a location path for {}, got {:?}", xpath, other),
            }
        }
    }

    #[test]
    fn test_parse_abbreviated_steps() {
        assert_eq!(
            parse_expression(".").unwrap(),
            relative(vec![Step::context_node()])
        );
        match parse_expression("../@id").unwrap() {
            Expression::LocationPath(lp) => {
                assert_eq!(lp.steps[0].axis, Axis::Parent);
                assert_eq!(lp.steps[1].axis, Axis::Attribute);
            }
            other => panic!("Expected a location path, got {:?}", other),
        }
        assert_eq!(
            parse_expression(".//item").unwrap(),
            relative(vec![
                Step::context_node(),
                Step::descendant_or_self(),
                child("item")
            ])
        );
    }

    #[test]
    fn test_parse_path_starting_with_variable() {
        let result = parse_expression("$myVar/foo/bar").unwrap();
        assert_eq!(
            result,
            Expression::LocationPath(LocationPath {
                start_point: Some(Box::new(Expression::Variable("myVar".to_string()))),
                is_absolute: false,
                steps: vec![child("foo"), child("bar")]
            })
        );
    }

    #[test]
    fn test_parse_filter_expressions() {
        let result = parse_expression("(//para)[2]").unwrap();
        match result {
            Expression::Filter { expr, predicates } => {
                assert!(expr.is_location_path());
                assert_eq!(predicates, vec![Expression::Number(2.0)]);
            }
            other => panic!("Expected a filter expression, got {:?}", other),
        }
        assert!(matches!(
            parse_expression("$items[1]/title").unwrap(),
            Expression::LocationPath(LocationPath {
                start_point: Some(_),
                ..
            })
        ));
    }

    #[test]
    fn test_parse_variable_reference() {
        let result_with_op = parse_expression("$myVar + 5").unwrap();
        assert_eq!(
            result_with_op,
            Expression::BinaryOp {
                left: Box::new(Expression::Variable("myVar".to_string())),
                op: BinaryOperator::Plus,
                right: Box::new(Expression::Number(5.0))
            }
        )
    }

    #[test]
    fn test_parse_predicate() {
        let result = parse_expression("foo[@id = 'a']").unwrap();
        let id_attr = Step {
            axis: Axis::Attribute,
            node_test: NodeTest::Name("id".into()),
            predicates: vec![],
        };
        let mut foo = child("foo");
        foo.predicates.push(Expression::BinaryOp {
            left: Box::new(relative(vec![id_attr])),
            op: BinaryOperator::Equals,
            right: Box::new(Expression::Literal("a".into())),
        });
        assert_eq!(result, relative(vec![foo]));
    }

    #[test]
    fn test_parse_node_tests() {
        let test_of = |xpath: &str| match parse_expression(xpath).unwrap() {
            Expression::LocationPath(lp) => lp.steps.last().unwrap().node_test.clone(),
            other => panic!("Expected a location path, got {:?}", other),
        };
        assert_eq!(test_of("foo/text()"), NodeTest::NodeType(NodeTypeTest::Text));
        assert_eq!(test_of("svg:*"), NodeTest::PrefixWildcard("svg".into()));
        assert_eq!(test_of("xsl:template"), NodeTest::Name("xsl:template".into()));
        assert_eq!(
            test_of("processing-instruction('pi-target')"),
            NodeTest::ProcessingInstruction("pi-target".into())
        );
        assert_eq!(test_of("file.name"), NodeTest::Name("file.name".into()));
        assert_eq!(test_of("textual"), NodeTest::Name("textual".into()));
    }

    #[test]
    fn test_parse_operator_precedence() {
        let result = parse_expression("1 + 2 * 3").unwrap();
        assert_eq!(
            result,
            Expression::BinaryOp {
                left: Box::new(Expression::Number(1.0)),
                op: BinaryOperator::Plus,
                right: Box::new(Expression::BinaryOp {
                    left: Box::new(Expression::Number(2.0)),
                    op: BinaryOperator::Multiply,
                    right: Box::new(Expression::Number(3.0)),
                }),
            }
        );
    }

    #[test]
    fn test_parse_boolean_logic() {
        let path = |name: &str| Box::new(relative(vec![child(name)]));
        let eq = |l: &str, r: &str| Expression::BinaryOp {
            left: path(l),
            op: BinaryOperator::Equals,
            right: path(r),
        };

        let result = parse_expression("a = b or c = d and e = f").unwrap();
        assert_eq!(
            result,
            Expression::BinaryOp {
                left: Box::new(eq("a", "b")),
                op: BinaryOperator::Or,
                right: Box::new(Expression::BinaryOp {
                    left: Box::new(eq("c", "d")),
                    op: BinaryOperator::And,
                    right: Box::new(eq("e", "f")),
                }),
            }
        );
    }

    #[test]
    fn test_operator_names_need_a_boundary() {
        // `order` is a name test, not `or` followed by `der`.
        let result = parse_expression("order").unwrap();
        assert_eq!(result, relative(vec![child("order")]));

        let result = parse_expression("10 div 4").unwrap();
        assert!(matches!(
            result,
            Expression::BinaryOp {
                op: BinaryOperator::Divide,
                ..
            }
        ));
        assert!(parse_expression("10 divx 4").is_err());
    }

    #[test]
    fn test_parse_root_paths() {
        let root = parse_expression("/").unwrap();
        assert_eq!(
            root,
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![]
            })
        );
        assert_eq!(
            parse_expression("//foo").unwrap(),
            Expression::LocationPath(LocationPath {
                start_point: None,
                is_absolute: true,
                steps: vec![Step::descendant_or_self(), child("foo")]
            })
        );
    }

    #[test]
    fn test_parse_function_calls() {
        let result = parse_expression("concat( 'a' , name(..) )").unwrap();
        match result {
            Expression::FunctionCall { name, args } => {
                assert_eq!(name, "concat");
                assert_eq!(args.len(), 2);
            }
            other => panic!("Expected a function call, got {:?}", other),
        }
        assert!(matches!(
            parse_expression("host:upper(.)").unwrap(),
            Expression::FunctionCall { .. }
        ));
    }

    #[test]
    fn test_parse_xml_entities_in_relational_expr() {
        let result = parse_expression("a &lt; b").unwrap();
        assert_eq!(
            result,
            Expression::BinaryOp {
                left: Box::new(relative(vec![child("a")])),
                op: BinaryOperator::LessThan,
                right: Box::new(relative(vec![child("b")])),
            }
        );

        let result2 = parse_expression("a &gt;= b").unwrap();
        assert!(matches!(
            result2,
            Expression::BinaryOp {
                op: BinaryOperator::GreaterThanOrEqual,
                ..
            }
        ));
    }

    #[test]
    fn test_reports_trailing_garbage() {
        let err = parse_expression("foo)").unwrap_err();
        assert!(matches!(err, XPathError::XPathParse(_, _)));
    }

    #[test]
    fn test_syntax_errors_name_the_offending_input() {
        for xpath in ["count(", "f(a,))", "1 +", "@", "a[", "))"] {
            let err = parse_expression(xpath).unwrap_err();
            let message = err.to_string();
            assert!(
                message.contains("Unexpected input at '") || message.contains("Unexpected end of expression"),
                "{}: {}",
                xpath,
                message
            );
            assert!(!message.contains("Parsing Error"), "{}", message);
            assert!(!message.contains("code:"), "{}", message);
        }
        match parse_expression("))").unwrap_err() {
            XPathError::XPathParse(_, message) => assert_eq!(message, "Unexpected input at '))'"),
            other => panic!("Expected a parse error, got {:?}", other),
        }
    }
}
