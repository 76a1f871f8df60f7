//! `xsl:number`: counting source nodes and formatting the numbers.

use crate::ast::{AttributeValueTemplate, NumberLevel};
use crate::executor::{ExecutionError, Focus, TemplateExecutor};
use crate::output::OutputBuilder;
use crate::pattern::Pattern;
use folio_xpath1::datasource::DataSourceNode;
use folio_xpath1::{Expression, NodeType, format_number_value};

#[allow(clippy::too_many_arguments)]
pub(crate) fn handle_number<'s, 'a, N: DataSourceNode<'a> + 'a>(
    executor: &mut TemplateExecutor<'s, 'a, N>,
    value: Option<&Expression>,
    count: Option<&Pattern>,
    from: Option<&Pattern>,
    level: NumberLevel,
    format: &AttributeValueTemplate,
    focus: Focus<N>,
    builder: &mut dyn OutputBuilder,
) -> Result<(), ExecutionError> {
    let format = executor.evaluate_avt(format, focus)?;
    let numbers = match value {
        Some(expr) => {
            let n = executor.evaluate(expr, focus)?.to_number();
            if !n.is_finite() || n < 0.5 {
                builder.add_text(&format_number_value(n), true);
                return Ok(());
            }
            vec![(n + 0.5).floor() as u64]
        }
        None => {
            let mut counter = Counter {
                executor,
                count,
                from,
                origin: focus.node,
            };
            match level {
                NumberLevel::Single => counter.single()?,
                NumberLevel::Multiple => counter.multiple()?,
                NumberLevel::Any => counter.any()?,
            }
        }
    };
    builder.add_text(&format_numbers(&numbers, &format), true);
    Ok(())
}

struct Counter<'e, 's, 'a, N: DataSourceNode<'a>> {
    executor: &'e mut TemplateExecutor<'s, 'a, N>,
    count: Option<&'e Pattern>,
    from: Option<&'e Pattern>,
    origin: N,
}

impl<'a, N: DataSourceNode<'a> + 'a> Counter<'_, '_, 'a, N> {
    /// Without `count`, nodes of the same kind and name as the origin count.
    fn counts(&mut self, node: N) -> Result<bool, ExecutionError> {
        match self.count {
            Some(pattern) => self.executor.matches(pattern, node),
            None => Ok(node.node_type() == self.origin.node_type()
                && node.name().map(|q| q.local_part) == self.origin.name().map(|q| q.local_part)
                && node.namespace_uri() == self.origin.namespace_uri()),
        }
    }

    fn is_from(&mut self, node: N) -> Result<bool, ExecutionError> {
        match self.from {
            Some(pattern) => self.executor.matches(pattern, node),
            None => Ok(false),
        }
    }

    /// Counted ancestors-or-self, nearest first, stopping at a `from` match.
    fn counted_ancestors(&mut self, first_only: bool) -> Result<Vec<N>, ExecutionError> {
        let mut found = Vec::new();
        let mut current = Some(self.origin);
        while let Some(node) = current {
            if self.counts(node)? {
                found.push(node);
                if first_only {
                    break;
                }
            }
            if self.is_from(node)? {
                break;
            }
            current = node.parent();
        }
        Ok(found)
    }

    fn sibling_position(&mut self, node: N) -> Result<u64, ExecutionError> {
        let Some(parent) = node.parent() else {
            return Ok(1);
        };
        if node.node_type() == NodeType::Attribute {
            return Ok(1);
        }
        let mut position = 1;
        for sibling in parent.children() {
            if sibling == node {
                break;
            }
            if self.counts(sibling)? {
                position += 1;
            }
        }
        Ok(position)
    }

    fn single(&mut self) -> Result<Vec<u64>, ExecutionError> {
        match self.counted_ancestors(true)?.first() {
            Some(&node) => Ok(vec![self.sibling_position(node)?]),
            None => Ok(Vec::new()),
        }
    }

    fn multiple(&mut self) -> Result<Vec<u64>, ExecutionError> {
        let ancestors = self.counted_ancestors(false)?;
        let mut numbers = Vec::with_capacity(ancestors.len());
        for node in ancestors.into_iter().rev() {
            numbers.push(self.sibling_position(node)?);
        }
        Ok(numbers)
    }

    /// Counted nodes before the origin in document order, the origin
    /// included, after the last `from` match.
    fn any(&mut self) -> Result<Vec<u64>, ExecutionError> {
        let mut root = self.origin;
        while let Some(parent) = root.parent() {
            root = parent;
        }
        let mut preceding = Vec::new();
        collect_until(root, self.origin, &mut preceding);

        let mut total = 0;
        for node in preceding {
            if self.is_from(node)? {
                total = 0;
            }
            if self.counts(node)? {
                total += 1;
            }
        }
        Ok(if total == 0 { Vec::new() } else { vec![total] })
    }
}

/// Nodes from `node` up to and including `target` in document order.
/// Returns true once `target` has been reached.
fn collect_until<'a, N: DataSourceNode<'a>>(node: N, target: N, out: &mut Vec<N>) -> bool {
    out.push(node);
    if node == target {
        return true;
    }
    if target.node_type() == NodeType::Attribute && target.parent() == Some(node) {
        out.push(target);
        return true;
    }
    node.children().any(|child| collect_until(child, target, out))
}

/// One token of a format string like `1.a.i`.
#[derive(Debug, PartialEq)]
enum FormatToken {
    Decimal { width: usize },
    Alpha { upper: bool },
    Roman { upper: bool },
}

impl FormatToken {
    fn parse(token: &str) -> Self {
        match token {
            "a" => FormatToken::Alpha { upper: false },
            "A" => FormatToken::Alpha { upper: true },
            "i" => FormatToken::Roman { upper: false },
            "I" => FormatToken::Roman { upper: true },
            t if t.len() > 1 && t.ends_with('1') && t[..t.len() - 1].chars().all(|c| c == '0') => {
                FormatToken::Decimal { width: t.len() }
            }
            _ => FormatToken::Decimal { width: 1 },
        }
    }

    fn format(&self, n: u64) -> String {
        match self {
            FormatToken::Decimal { width } => format!("{:0width$}", n, width = *width),
            FormatToken::Alpha { upper } => {
                let base = if *upper { b'A' } else { b'a' };
                let mut letters = Vec::new();
                let mut rest = n;
                while rest > 0 {
                    rest -= 1;
                    letters.push((base + (rest % 26) as u8) as char);
                    rest /= 26;
                }
                letters.iter().rev().collect()
            }
            FormatToken::Roman { upper } if (1..4000).contains(&n) => {
                let roman = to_roman(n);
                if *upper { roman } else { roman.to_lowercase() }
            }
            FormatToken::Roman { .. } => n.to_string(),
        }
    }
}

fn to_roman(mut n: u64) -> String {
    const NUMERALS: &[(u64, &str)] = &[
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for &(value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

/// Formats `numbers` with a format string: alphanumeric runs are tokens,
/// everything between them separates. The last token and separator repeat.
pub(crate) fn format_numbers(numbers: &[u64], format: &str) -> String {
    let mut prefix = String::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut separators: Vec<String> = Vec::new();
    let mut run = String::new();
    let mut in_token = false;
    for c in format.chars() {
        let alnum = c.is_alphanumeric();
        if alnum != in_token && !run.is_empty() {
            let done = std::mem::take(&mut run);
            if in_token {
                tokens.push(done);
            } else if tokens.is_empty() {
                prefix = done;
            } else {
                separators.push(done);
            }
        }
        in_token = alnum;
        run.push(c);
    }
    let suffix = if in_token {
        tokens.push(run);
        String::new()
    } else if tokens.is_empty() {
        prefix = run;
        String::new()
    } else {
        run
    };
    if tokens.is_empty() {
        tokens.push("1".to_string());
    }

    let mut out = prefix;
    for (i, &n) in numbers.iter().enumerate() {
        if i > 0 {
            let separator = separators
                .get(i - 1)
                .or(separators.last())
                .map(String::as_str)
                .unwrap_or(".");
            out.push_str(separator);
        }
        let token = &tokens[i.min(tokens.len() - 1)];
        out.push_str(&FormatToken::parse(token).format(n));
    }
    out.push_str(&suffix);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_each_token_kind() {
        assert_eq!(format_numbers(&[7], "1"), "7");
        assert_eq!(format_numbers(&[5], "01"), "05");
        assert_eq!(format_numbers(&[28], "A"), "AB");
        assert_eq!(format_numbers(&[3], "a"), "c");
        assert_eq!(format_numbers(&[1994], "I"), "MCMXCIV");
        assert_eq!(format_numbers(&[4], "i"), "iv");
    }

    #[test]
    fn prefix_separators_and_suffix() {
        assert_eq!(format_numbers(&[7], "(1)"), "(7)");
        assert_eq!(format_numbers(&[1, 2, 3], "1.a.i"), "1.b.iii");
        assert_eq!(format_numbers(&[1, 2, 3], "1-"), "1.2.3-");
        assert_eq!(format_numbers(&[2, 4], "1. "), "2.4. ");
        assert_eq!(format_numbers(&[], "1."), ".");
    }

    #[test]
    fn roman_numerals_fall_back_to_decimal_when_too_large() {
        assert_eq!(FormatToken::Roman { upper: true }.format(4000), "4000");
    }
}
