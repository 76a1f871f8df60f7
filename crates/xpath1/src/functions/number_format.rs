//! `format-number()` with JDK 1.1 `DecimalFormat` style patterns.

/// The symbols a stylesheet can override with `xsl:decimal-format`.
#[derive(Debug, Clone, PartialEq)]
pub struct DecimalFormat {
    pub decimal_separator: char,
    pub grouping_separator: char,
    pub infinity: String,
    pub minus_sign: char,
    pub nan: String,
    pub percent: char,
    pub per_mille: char,
    pub zero_digit: char,
    pub digit: char,
    pub pattern_separator: char,
}

impl Default for DecimalFormat {
    fn default() -> Self {
        DecimalFormat {
            decimal_separator: '.',
            grouping_separator: ',',
            infinity: "Infinity".to_string(),
            minus_sign: '-',
            nan: "NaN".to_string(),
            percent: '%',
            per_mille: '\u{2030}',
            zero_digit: '0',
            digit: '#',
            pattern_separator: ';',
        }
    }
}

#[derive(Debug, Default)]
struct SubPattern {
    prefix: String,
    suffix: String,
    min_int: usize,
    min_frac: usize,
    max_frac: usize,
    grouping: Option<usize>,
    multiplier: f64,
}

impl DecimalFormat {
    fn is_number_char(&self, c: char) -> bool {
        c == self.digit
            || c == self.zero_digit
            || c == self.decimal_separator
            || c == self.grouping_separator
    }

    fn parse_sub_pattern(&self, pattern: &str) -> Result<SubPattern, String> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut i = 0;
        let mut prefix = String::new();
        let mut quoted = false;
        while i < chars.len() && (quoted || !self.is_number_char(chars[i])) {
            if chars[i] == '\'' {
                quoted = !quoted;
            } else {
                prefix.push(chars[i]);
            }
            i += 1;
        }
        let number_start = i;
        while i < chars.len() && self.is_number_char(chars[i]) {
            i += 1;
        }
        if number_start == i {
            return Err(format!("pattern '{}' has no digits", pattern));
        }
        let number: Vec<char> = chars[number_start..i].to_vec();
        let suffix: String = chars[i..].iter().filter(|&&c| c != '\'').collect();

        let (int_part, frac_part) = match number.iter().position(|&c| c == self.decimal_separator) {
            Some(pos) => (&number[..pos], &number[pos + 1..]),
            None => (&number[..], &number[number.len()..]),
        };
        if frac_part.contains(&self.decimal_separator) {
            return Err(format!("pattern '{}' has more than one decimal separator", pattern));
        }
        let grouping = int_part
            .iter()
            .rposition(|&c| c == self.grouping_separator)
            .map(|pos| int_part.len() - pos - 1)
            .filter(|&size| size > 0);

        let affixes = format!("{}{}", prefix, suffix);
        let multiplier = if affixes.contains(self.percent) {
            100.0
        } else if affixes.contains(self.per_mille) {
            1000.0
        } else {
            1.0
        };
        Ok(SubPattern {
            min_int: int_part.iter().filter(|&&c| c == self.zero_digit).count(),
            min_frac: frac_part.iter().filter(|&&c| c == self.zero_digit).count(),
            max_frac: frac_part
                .iter()
                .filter(|&&c| c == self.zero_digit || c == self.digit)
                .count(),
            grouping,
            multiplier,
            prefix,
            suffix,
        })
    }

    /// Formats `value` with `pattern`; an invalid pattern is an error.
    pub fn format(&self, value: f64, pattern: &str) -> Result<String, String> {
        let (positive, negative) = match pattern.split_once(self.pattern_separator) {
            Some((p, n)) => (p, Some(n)),
            None => (pattern, None),
        };
        let positive = self.parse_sub_pattern(positive)?;
        if value.is_nan() {
            return Ok(self.nan.clone());
        }
        let is_negative = value < 0.0;
        let (sub, explicit_minus) = match (is_negative, negative) {
            (true, Some(neg)) => {
                let mut sub = self.parse_sub_pattern(neg)?;
                // The negative sub-pattern only contributes its affixes.
                sub.min_int = positive.min_int;
                sub.min_frac = positive.min_frac;
                sub.max_frac = positive.max_frac;
                sub.grouping = positive.grouping;
                (sub, false)
            }
            (negative, _) => (positive, negative),
        };

        let mut out = String::new();
        if explicit_minus {
            out.push(self.minus_sign);
        }
        out.push_str(&sub.prefix);
        let magnitude = value.abs() * sub.multiplier;
        if magnitude.is_infinite() {
            out.push_str(&self.infinity);
        } else {
            out.push_str(&self.digits(magnitude, &sub));
        }
        out.push_str(&sub.suffix);
        Ok(out)
    }

    fn digits(&self, magnitude: f64, sub: &SubPattern) -> String {
        let rendered = format!("{:.*}", sub.max_frac, magnitude);
        let (int_digits, frac_digits) = match rendered.split_once('.') {
            Some((i, f)) => (i.to_string(), f.to_string()),
            None => (rendered, String::new()),
        };
        let mut frac = frac_digits;
        while frac.len() > sub.min_frac && frac.ends_with('0') {
            frac.pop();
        }
        let mut int = int_digits.trim_start_matches('0').to_string();
        while int.len() < sub.min_int {
            int.insert(0, '0');
        }
        if int.is_empty() && frac.is_empty() {
            int.push('0');
        }
        if let Some(size) = sub.grouping {
            let chars: Vec<char> = int.chars().collect();
            let mut grouped = String::new();
            for (i, c) in chars.iter().enumerate() {
                if i > 0 && (chars.len() - i) % size == 0 {
                    grouped.push(self.grouping_separator);
                }
                grouped.push(*c);
            }
            int = grouped;
        }
        let mut out = self.localize(&int);
        if !frac.is_empty() {
            out.push(self.decimal_separator);
            out.push_str(&self.localize(&frac));
        }
        out
    }

    fn localize(&self, ascii: &str) -> String {
        if self.zero_digit == '0' {
            return ascii.to_string();
        }
        ascii
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => char::from_u32(self.zero_digit as u32 + d).unwrap_or(c),
                None => c,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(value: f64, pattern: &str) -> String {
        DecimalFormat::default().format(value, pattern).unwrap()
    }

    #[test]
    fn formats_grouping_and_fractions() {
        assert_eq!(fmt(1234567.891, "#,##0.00"), "1,234,567.89");
        assert_eq!(fmt(0.5, "#.##"), ".5");
        assert_eq!(fmt(7.0, "000"), "007");
        assert_eq!(fmt(3.14159, "0.###"), "3.142");
        assert_eq!(fmt(2.0, "0.0#"), "2.0");
    }

    #[test]
    fn formats_negative_numbers_and_percentages() {
        assert_eq!(fmt(-12.5, "0.0"), "-12.5");
        assert_eq!(fmt(-12.5, "0.0;(0.0)"), "(12.5)");
        assert_eq!(fmt(0.256, "0%"), "26%");
        assert_eq!(fmt(5.0, "'#'0"), "#5");
    }

    #[test]
    fn formats_special_values() {
        assert_eq!(fmt(f64::NAN, "0"), "NaN");
        assert_eq!(fmt(f64::INFINITY, "0"), "Infinity");
        assert!(DecimalFormat::default().format(1.0, "abc").is_err());
    }

    #[test]
    fn honours_custom_symbols() {
        let european = DecimalFormat {
            decimal_separator: ',',
            grouping_separator: '.',
            ..DecimalFormat::default()
        };
        assert_eq!(european.format(1234.5, "#.##0,00").unwrap(), "1.234,50");
    }
}
