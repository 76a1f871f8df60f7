use crate::ast::{AttributeValueTemplate, AvtPart};
use crate::error::{Location, XsltError};
use folio_xpath1::ast::NameResolver;
use folio_xpath1::parse_expression;

/// Attributes of a stylesheet element as `(qualified name, value)`, with
/// entity references already expanded.
pub type OwnedAttributes = Vec<(String, String)>;

pub(crate) fn get_attr_optional(attrs: &OwnedAttributes, name: &str) -> Option<String> {
    attrs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.clone())
}

pub(crate) fn get_attr_required(
    attrs: &OwnedAttributes,
    name: &str,
    element: &str,
    location: &Location,
) -> Result<String, XsltError> {
    get_attr_optional(attrs, name).ok_or_else(|| XsltError::MissingAttribute {
        attribute: name.to_string(),
        element: element.to_string(),
        location: location.clone(),
    })
}

/// Reads a `yes`/`no` attribute; absent means `default`.
pub(crate) fn get_attr_yes_no(
    attrs: &OwnedAttributes,
    name: &str,
    default: bool,
    location: &Location,
) -> Result<bool, XsltError> {
    match get_attr_optional(attrs, name).as_deref().map(str::trim) {
        None => Ok(default),
        Some("yes") => Ok(true),
        Some("no") => Ok(false),
        Some(other) => Err(XsltError::TemplateStructure {
            message: format!("Attribute '{}' must be 'yes' or 'no', got '{}'", name, other),
            location: location.clone(),
        }),
    }
}

/// Splits a whitespace-separated list such as `use-attribute-sets`.
pub(crate) fn split_names(value: Option<String>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default()
}

/// 1-based line and column of a byte offset.
pub fn get_line_col_from_pos(source: &str, pos: usize) -> (usize, usize) {
    let end = pos.min(source.len());
    let before = source.get(..end).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let col = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, col)
}

/// The text of `line` (1-based), without its line terminator.
pub fn source_line(source: &str, line: usize) -> Option<String> {
    if line == 0 {
        return None;
    }
    source
        .lines()
        .nth(line - 1)
        .map(|l| l.trim_end_matches('\r').to_string())
}

/// Parses an attribute value template. `{{` and `}}` are literal braces;
/// braces inside string literals of an expression do not count.
pub(crate) fn parse_avt<R>(text: &str, resolver: &R) -> Result<AttributeValueTemplate, XsltError>
where
    R: NameResolver + ?Sized,
{
    let mut parts = Vec::new();
    let mut literal = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '}' => {
                return Err(XsltError::XPathParse(
                    text.to_string(),
                    "Unmatched '}' in attribute value template".to_string(),
                ));
            }
            '{' => {
                let mut expr_text = String::new();
                let mut quote: Option<char> = None;
                let mut closed = false;
                for c in chars.by_ref() {
                    match (quote, c) {
                        (None, '}') => {
                            closed = true;
                            break;
                        }
                        (None, '\'' | '"') => quote = Some(c),
                        (Some(q), c) if c == q => quote = None,
                        _ => {}
                    }
                    expr_text.push(c);
                }
                if !closed {
                    return Err(XsltError::XPathParse(
                        text.to_string(),
                        "Unclosed '{' in attribute value template".to_string(),
                    ));
                }
                if !literal.is_empty() {
                    parts.push(AvtPart::Static(std::mem::take(&mut literal)));
                }
                let mut expr = parse_expression(&expr_text)?;
                expr.resolve_names(resolver)?;
                parts.push(AvtPart::Dynamic(expr));
            }
            _ => literal.push(c),
        }
    }
    if !literal.is_empty() || parts.is_empty() {
        parts.push(AvtPart::Static(literal));
    }
    Ok(AttributeValueTemplate(parts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_xpath1::Expression;

    struct NoPrefixes;

    impl NameResolver for NoPrefixes {
        fn namespace_uri(&self, _prefix: &str) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_line_col_from_pos() {
        let source = "<a>\n  <b/>\n</a>";
        assert_eq!(get_line_col_from_pos(source, 0), (1, 1));
        assert_eq!(get_line_col_from_pos(source, 6), (2, 3));
        assert_eq!(get_line_col_from_pos(source, 999), (3, 5));
    }

    #[test]
    fn test_source_line() {
        let source = "first\r\nsecond\nthird";
        assert_eq!(source_line(source, 1).as_deref(), Some("first"));
        assert_eq!(source_line(source, 3).as_deref(), Some("third"));
        assert_eq!(source_line(source, 4), None);
        assert_eq!(source_line(source, 0), None);
    }

    #[test]
    fn test_parse_avt_mixed() {
        let avt = parse_avt("item-{@id}-{{x}}", &NoPrefixes).unwrap();
        assert_eq!(avt.0.len(), 3);
        assert_eq!(avt.0[0], AvtPart::Static("item-".into()));
        assert!(matches!(avt.0[1], AvtPart::Dynamic(_)));
        assert_eq!(avt.0[2], AvtPart::Static("-{x}".into()));
    }

    #[test]
    fn test_parse_avt_braces_in_string_literal() {
        let avt = parse_avt("{concat('}', 'a')}", &NoPrefixes).unwrap();
        assert!(matches!(
            &avt.0[..],
            [AvtPart::Dynamic(Expression::FunctionCall { .. })]
        ));
    }

    #[test]
    fn test_parse_avt_errors() {
        assert!(parse_avt("{@id", &NoPrefixes).is_err());
        assert!(parse_avt("a}b", &NoPrefixes).is_err());
        assert!(parse_avt("{x:y}", &NoPrefixes).is_err());
        assert_eq!(
            parse_avt("", &NoPrefixes).unwrap().as_static(),
            Some(String::new())
        );
    }
}
