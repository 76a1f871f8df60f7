//! Built-in simple types and constraining facets.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::LazyLock;

static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("static pattern"));
static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[+-]?\d+$").expect("static pattern"));
static FLOAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?|-?INF|NaN)$").expect("static pattern")
});
static DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})(Z|[+-]\d{2}:\d{2})?$").expect("static pattern")
});
static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-?\d{4,})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$")
        .expect("static pattern")
});
static TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2})(\.\d+)?(Z|[+-]\d{2}:\d{2})?$").expect("static pattern")
});
static NCNAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}_][\p{L}\p{N}_.\-]*$").expect("static pattern"));
static NMTOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\p{L}\p{N}_.:\-]+$").expect("static pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinType {
    AnyType,
    AnySimpleType,
    String,
    NormalizedString,
    Token,
    Boolean,
    Decimal,
    Integer,
    Int,
    Long,
    Short,
    Byte,
    NonNegativeInteger,
    PositiveInteger,
    NegativeInteger,
    NonPositiveInteger,
    UnsignedInt,
    Float,
    Double,
    Date,
    DateTime,
    Time,
    AnyUri,
    Id,
    IdRef,
    NmToken,
}

impl BuiltinType {
    pub fn from_local_name(name: &str) -> Option<Self> {
        Some(match name {
            "anyType" => BuiltinType::AnyType,
            "anySimpleType" => BuiltinType::AnySimpleType,
            "string" => BuiltinType::String,
            "normalizedString" => BuiltinType::NormalizedString,
            "token" => BuiltinType::Token,
            "boolean" => BuiltinType::Boolean,
            "decimal" => BuiltinType::Decimal,
            "integer" => BuiltinType::Integer,
            "int" => BuiltinType::Int,
            "long" => BuiltinType::Long,
            "short" => BuiltinType::Short,
            "byte" => BuiltinType::Byte,
            "nonNegativeInteger" => BuiltinType::NonNegativeInteger,
            "positiveInteger" => BuiltinType::PositiveInteger,
            "negativeInteger" => BuiltinType::NegativeInteger,
            "nonPositiveInteger" => BuiltinType::NonPositiveInteger,
            "unsignedInt" => BuiltinType::UnsignedInt,
            "float" => BuiltinType::Float,
            "double" => BuiltinType::Double,
            "date" => BuiltinType::Date,
            "dateTime" => BuiltinType::DateTime,
            "time" => BuiltinType::Time,
            "anyURI" => BuiltinType::AnyUri,
            "ID" => BuiltinType::Id,
            "IDREF" => BuiltinType::IdRef,
            "NMTOKEN" => BuiltinType::NmToken,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            BuiltinType::AnyType => "anyType",
            BuiltinType::AnySimpleType => "anySimpleType",
            BuiltinType::String => "string",
            BuiltinType::NormalizedString => "normalizedString",
            BuiltinType::Token => "token",
            BuiltinType::Boolean => "boolean",
            BuiltinType::Decimal => "decimal",
            BuiltinType::Integer => "integer",
            BuiltinType::Int => "int",
            BuiltinType::Long => "long",
            BuiltinType::Short => "short",
            BuiltinType::Byte => "byte",
            BuiltinType::NonNegativeInteger => "nonNegativeInteger",
            BuiltinType::PositiveInteger => "positiveInteger",
            BuiltinType::NegativeInteger => "negativeInteger",
            BuiltinType::NonPositiveInteger => "nonPositiveInteger",
            BuiltinType::UnsignedInt => "unsignedInt",
            BuiltinType::Float => "float",
            BuiltinType::Double => "double",
            BuiltinType::Date => "date",
            BuiltinType::DateTime => "dateTime",
            BuiltinType::Time => "time",
            BuiltinType::AnyUri => "anyURI",
            BuiltinType::Id => "ID",
            BuiltinType::IdRef => "IDREF",
            BuiltinType::NmToken => "NMTOKEN",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            BuiltinType::Decimal
                | BuiltinType::Integer
                | BuiltinType::Int
                | BuiltinType::Long
                | BuiltinType::Short
                | BuiltinType::Byte
                | BuiltinType::NonNegativeInteger
                | BuiltinType::PositiveInteger
                | BuiltinType::NegativeInteger
                | BuiltinType::NonPositiveInteger
                | BuiltinType::UnsignedInt
                | BuiltinType::Float
                | BuiltinType::Double
        )
    }

    /// Applies the type's whitespace facet.
    pub fn normalize(self, value: &str) -> String {
        match self {
            BuiltinType::AnyType | BuiltinType::AnySimpleType | BuiltinType::String => value.to_string(),
            BuiltinType::NormalizedString => value.replace(['\t', '\n', '\r'], " "),
            _ => value.split_whitespace().collect::<Vec<_>>().join(" "),
        }
    }

    /// Checks the lexical space of an already normalized value.
    pub fn check(self, value: &str) -> Result<(), String> {
        let valid = match self {
            BuiltinType::AnyType
            | BuiltinType::AnySimpleType
            | BuiltinType::String
            | BuiltinType::NormalizedString
            | BuiltinType::Token => true,
            BuiltinType::Boolean => matches!(value, "true" | "false" | "1" | "0"),
            BuiltinType::Decimal => DECIMAL.is_match(value),
            BuiltinType::Float | BuiltinType::Double => FLOAT.is_match(value),
            BuiltinType::Date => DATE
                .captures(value)
                .is_some_and(|c| valid_date(&c[1], &c[2], &c[3])),
            BuiltinType::DateTime => DATE_TIME.captures(value).is_some_and(|c| {
                valid_date(&c[1], &c[2], &c[3]) && valid_clock(&c[4], &c[5], &c[6])
            }),
            BuiltinType::Time => TIME
                .captures(value)
                .is_some_and(|c| valid_clock(&c[1], &c[2], &c[3])),
            BuiltinType::AnyUri => !value.contains(' '),
            BuiltinType::Id | BuiltinType::IdRef => NCNAME.is_match(value),
            BuiltinType::NmToken => NMTOKEN.is_match(value),
            _ => return self.check_integer(value),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("'{}' is not a valid {}", value, self.name()))
        }
    }

    fn check_integer(self, value: &str) -> Result<(), String> {
        let invalid = || format!("'{}' is not a valid {}", value, self.name());
        if !INTEGER.is_match(value) {
            return Err(invalid());
        }
        let negative = value.starts_with('-') && !value.trim_start_matches(['-', '0']).is_empty();
        let zero = value.trim_start_matches(['+', '-', '0']).is_empty();
        let (min, max): (i128, i128) = match self {
            BuiltinType::Int => (i32::MIN.into(), i32::MAX.into()),
            BuiltinType::Long => (i64::MIN.into(), i64::MAX.into()),
            BuiltinType::Short => (i16::MIN.into(), i16::MAX.into()),
            BuiltinType::Byte => (i8::MIN.into(), i8::MAX.into()),
            BuiltinType::UnsignedInt => (0, u32::MAX.into()),
            BuiltinType::NonNegativeInteger if negative => return Err(invalid()),
            BuiltinType::PositiveInteger if negative || zero => return Err(invalid()),
            BuiltinType::NegativeInteger if !negative => return Err(invalid()),
            BuiltinType::NonPositiveInteger if !negative && !zero => return Err(invalid()),
            _ => return Ok(()),
        };
        match value.trim_start_matches('+').parse::<i128>() {
            Ok(n) if (min..=max).contains(&n) => Ok(()),
            _ => Err(invalid()),
        }
    }
}

/// Checks the day against the length of the month, in the proleptic
/// Gregorian calendar.
fn valid_date(year: &str, month: &str, day: &str) -> bool {
    // Leap years only depend on the last four digits.
    let tail = year.char_indices().rev().nth(3).map_or(year, |(i, _)| &year[i..]);
    let year: u32 = tail.parse().unwrap_or(1);
    let month: u32 = month.parse().unwrap_or(0);
    let day: u32 = day.parse().unwrap_or(0);
    let leap = year % 4 == 0 && (year % 100 != 0 || year % 400 == 0);
    let days = match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if leap => 29,
        2 => 28,
        _ => return false,
    };
    (1..=days).contains(&day)
}

fn valid_clock(hour: &str, minute: &str, second: &str) -> bool {
    let parse = |s: &str| s.parse::<u32>().unwrap_or(u32::MAX);
    parse(hour) <= 24 && parse(minute) <= 59 && parse(second) <= 60
}

/// Orders two values of a type for the range facets: numerically for
/// numeric types, as strings otherwise (ISO dates and times sort as text).
pub fn compare_values(base: BuiltinType, a: &str, b: &str) -> Option<Ordering> {
    if base.is_numeric() {
        let x: f64 = a.parse().ok()?;
        let y: f64 = b.parse().ok()?;
        x.partial_cmp(&y)
    } else {
        Some(a.cmp(b))
    }
}

/// Counts the significant digits of a decimal lexical value.
pub fn total_digits(value: &str) -> usize {
    let digits = value.trim_start_matches(['+', '-']);
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let count = int_part.len() + frac_part.len();
    count.max(1)
}

/// A constraining facet of a restriction.
#[derive(Debug, Clone)]
pub enum Facet {
    Enumeration(Vec<String>),
    /// Alternatives from several `xs:pattern` elements of one step.
    Pattern(Vec<Regex>),
    Length(usize),
    MinLength(usize),
    MaxLength(usize),
    MinInclusive(String),
    MaxInclusive(String),
    MinExclusive(String),
    MaxExclusive(String),
    TotalDigits(usize),
}

impl Facet {
    pub fn check(&self, base: BuiltinType, value: &str) -> Result<(), String> {
        let length = value.chars().count();
        let ordered = |bound: &str, accept: &[Ordering]| {
            compare_values(base, value, bound).is_some_and(|o| accept.contains(&o))
        };
        let (valid, rule) = match self {
            Facet::Enumeration(values) => (
                values.iter().any(|v| v == value),
                format!("one of {}", values.join(", ")),
            ),
            Facet::Pattern(patterns) => (
                patterns.iter().any(|p| p.is_match(value)),
                "its pattern".to_string(),
            ),
            Facet::Length(n) => (length == *n, format!("exactly {} characters", n)),
            Facet::MinLength(n) => (length >= *n, format!("at least {} characters", n)),
            Facet::MaxLength(n) => (length <= *n, format!("at most {} characters", n)),
            Facet::MinInclusive(b) => (
                ordered(b, &[Ordering::Greater, Ordering::Equal]),
                format!(">= {}", b),
            ),
            Facet::MaxInclusive(b) => (
                ordered(b, &[Ordering::Less, Ordering::Equal]),
                format!("<= {}", b),
            ),
            Facet::MinExclusive(b) => (ordered(b, &[Ordering::Greater]), format!("> {}", b)),
            Facet::MaxExclusive(b) => (ordered(b, &[Ordering::Less]), format!("< {}", b)),
            Facet::TotalDigits(n) => (
                total_digits(value) <= *n,
                format!("at most {} digits", n),
            ),
        };
        if valid {
            Ok(())
        } else {
            Err(format!("'{}' does not satisfy {}", value, rule))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_ranges() {
        assert!(BuiltinType::Byte.check("127").is_ok());
        assert!(BuiltinType::Byte.check("128").is_err());
        assert!(BuiltinType::PositiveInteger.check("0").is_err());
        assert!(BuiltinType::NonNegativeInteger.check("-0").is_ok());
        assert!(BuiltinType::NegativeInteger.check("-3").is_ok());
        assert!(BuiltinType::Integer.check("123456789012345678901234567890").is_ok());
        assert!(BuiltinType::Int.check("1.5").is_err());
    }

    #[test]
    fn dates_times_and_floats() {
        assert!(BuiltinType::Date.check("2024-02-29").is_ok());
        assert!(BuiltinType::Date.check("2024-13-01").is_err());
        assert!(BuiltinType::Date.check("2021-02-30").is_err());
        assert!(BuiltinType::Date.check("2023-02-29").is_err());
        assert!(BuiltinType::Date.check("1900-02-29").is_err());
        assert!(BuiltinType::Date.check("2000-02-29").is_ok());
        assert!(BuiltinType::Date.check("2024-04-31").is_err());
        assert!(BuiltinType::DateTime.check("2021-06-31T00:00:00").is_err());
        assert!(BuiltinType::DateTime.check("2024-01-01T10:30:00Z").is_ok());
        assert!(BuiltinType::Time.check("25:00:00").is_err());
        assert!(BuiltinType::Double.check("-INF").is_ok());
        assert!(BuiltinType::Float.check("1e3").is_ok());
        assert!(BuiltinType::Boolean.check("yes").is_err());
    }

    #[test]
    fn whitespace_handling() {
        assert_eq!(BuiltinType::Token.normalize("  a \n b "), "a b");
        assert_eq!(BuiltinType::NormalizedString.normalize("a\tb"), "a b");
        assert_eq!(BuiltinType::String.normalize(" a "), " a ");
    }

    #[test]
    fn facets() {
        let max = Facet::MaxInclusive("10".into());
        assert!(max.check(BuiltinType::Integer, "9").is_ok());
        assert!(max.check(BuiltinType::Integer, "11").is_err());
        assert_eq!(total_digits("-012.340"), 4);
        assert!(Facet::TotalDigits(3).check(BuiltinType::Decimal, "12.34").is_err());
        let colors = Facet::Enumeration(vec!["red".into(), "blue".into()]);
        assert!(colors.check(BuiltinType::String, "green").is_err());
    }
}
