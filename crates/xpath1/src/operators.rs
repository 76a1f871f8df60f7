//! Contains pure functions for evaluating XPath binary operators.

use crate::ast::BinaryOperator;
use crate::datasource::DataSourceNode;
use crate::engine::{XPathValue, string_to_number};
use crate::error::XPathError;

pub fn evaluate<'a, N: DataSourceNode<'a> + 'a>(
    op: BinaryOperator,
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    use BinaryOperator::*;
    match op {
        Or => Ok(XPathValue::Boolean(left.to_bool() || right.to_bool())),
        And => Ok(XPathValue::Boolean(left.to_bool() && right.to_bool())),
        Equals | NotEquals | LessThan | LessThanOrEqual | GreaterThan | GreaterThanOrEqual => {
            Ok(XPathValue::Boolean(compare(op, &left, &right)))
        }
        Plus => Ok(XPathValue::Number(left.to_number() + right.to_number())),
        Minus => Ok(XPathValue::Number(left.to_number() - right.to_number())),
        Multiply => Ok(XPathValue::Number(left.to_number() * right.to_number())),
        Divide => Ok(XPathValue::Number(left.to_number() / right.to_number())),
        Modulo => Ok(XPathValue::Number(left.to_number() % right.to_number())),
        Union => evaluate_union(left, right),
    }
}

/// A comparison operand after node-sets have been expanded into their
/// members' string values.
enum Atom {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// XPath 1.0 comparison. A node-set compares true if any member satisfies
/// the comparison; booleans win over numbers, numbers over strings.
fn compare<'a, N: DataSourceNode<'a>>(
    op: BinaryOperator,
    left: &XPathValue<N>,
    right: &XPathValue<N>,
) -> bool {
    use XPathValue::{Boolean, NodeSet};
    match (left, right) {
        (NodeSet(l), NodeSet(r)) => {
            let right_values: Vec<String> = r.iter().map(|n| n.string_value()).collect();
            l.iter().any(|ln| {
                let lv = ln.string_value();
                right_values
                    .iter()
                    .any(|rv| compare_atoms(op, &Atom::Str(lv.clone()), &Atom::Str(rv.clone())))
            })
        }
        (NodeSet(nodes), other) => {
            if let Boolean(b) = other {
                return compare_atoms(op, &Atom::Bool(!nodes.is_empty()), &Atom::Bool(*b));
            }
            let other_atom = atom(other);
            nodes
                .iter()
                .any(|n| compare_atoms(op, &node_atom(n.string_value(), &other_atom), &other_atom))
        }
        (other, NodeSet(nodes)) => {
            if let Boolean(b) = other {
                return compare_atoms(op, &Atom::Bool(*b), &Atom::Bool(!nodes.is_empty()));
            }
            let other_atom = atom(other);
            nodes
                .iter()
                .any(|n| compare_atoms(op, &other_atom, &node_atom(n.string_value(), &other_atom)))
        }
        _ => compare_atoms(op, &atom(left), &atom(right)),
    }
}

/// Converts a node's string value to the type of the value it is compared against.
fn node_atom(value: String, against: &Atom) -> Atom {
    match against {
        Atom::Num(_) => Atom::Num(string_to_number(&value)),
        _ => Atom::Str(value),
    }
}

fn atom<'a, N: DataSourceNode<'a>>(value: &XPathValue<N>) -> Atom {
    match value {
        XPathValue::Number(n) => Atom::Num(*n),
        XPathValue::Boolean(b) => Atom::Bool(*b),
        other => Atom::Str(other.to_string()),
    }
}

fn to_num(atom: &Atom) -> f64 {
    match atom {
        Atom::Num(n) => *n,
        Atom::Bool(b) => f64::from(u8::from(*b)),
        Atom::Str(s) => string_to_number(s),
    }
}

fn to_bool(atom: &Atom) -> bool {
    match atom {
        Atom::Num(n) => *n != 0.0 && !n.is_nan(),
        Atom::Bool(b) => *b,
        Atom::Str(s) => !s.is_empty(),
    }
}

fn compare_atoms(op: BinaryOperator, left: &Atom, right: &Atom) -> bool {
    use BinaryOperator::*;
    match op {
        Equals | NotEquals => {
            let equal = match (left, right) {
                (Atom::Bool(_), _) | (_, Atom::Bool(_)) => to_bool(left) == to_bool(right),
                (Atom::Num(_), _) | (_, Atom::Num(_)) => to_num(left) == to_num(right),
                (Atom::Str(l), Atom::Str(r)) => l == r,
            };
            if op == Equals { equal } else { !equal }
        }
        LessThan => to_num(left) < to_num(right),
        LessThanOrEqual => to_num(left) <= to_num(right),
        GreaterThan => to_num(left) > to_num(right),
        GreaterThanOrEqual => to_num(left) >= to_num(right),
        _ => false,
    }
}

fn evaluate_union<'a, N: DataSourceNode<'a> + 'a>(
    left: XPathValue<N>,
    right: XPathValue<N>,
) -> Result<XPathValue<N>, XPathError> {
    let mut merged = left.into_nodes("The left-hand side of '|'")?;
    merged.extend(right.into_nodes("The right-hand side of '|'")?);
    merged.sort();
    merged.dedup();
    Ok(XPathValue::NodeSet(merged))
}
