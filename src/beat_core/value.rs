//! Column value type inference
//!
//! Every raw column value is classified exactly once into a `TypedValue`.
//! Integer parsing honours base prefixes (`0x`, `0o`, `0b`, bare leading `0`),
//! so `"010"` is 8 and `"09"` falls through to the float parser.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Integer,
    Float,
}

/// Parsed column value, also used as the value type of event fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypedValue {
    Str(String),
    Int(i64),
    Float(f64),
}

impl TypedValue {
    pub fn column_type(&self) -> ColumnType {
        match self {
            TypedValue::Str(_) => ColumnType::String,
            TypedValue::Int(_) => ColumnType::Integer,
            TypedValue::Float(_) => ColumnType::Float,
        }
    }

    /// Numeric view used for comparisons across int/float observations
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Str(_) => None,
            TypedValue::Int(n) => Some(*n as f64),
            TypedValue::Float(f) => Some(*f),
        }
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypedValue::Str(s) => write!(f, "{}", s),
            TypedValue::Int(n) => write!(f, "{}", n),
            TypedValue::Float(v) => write!(f, "{}", v),
        }
    }
}

/// Raw column text together with its inferred value
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnValue {
    pub raw: String,
    pub typed: TypedValue,
}

impl ColumnValue {
    pub fn infer(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            typed: infer_value(raw),
        }
    }
}

/// Classify raw text: integer first, then float, otherwise string
pub fn infer_value(raw: &str) -> TypedValue {
    if let Some(n) = parse_int_auto_base(raw) {
        return TypedValue::Int(n);
    }
    if let Some(f) = parse_float(raw) {
        return TypedValue::Float(f);
    }
    TypedValue::Str(raw.to_string())
}

/// Parse a signed 64-bit integer, selecting the base from the literal prefix
pub fn parse_int_auto_base(raw: &str) -> Option<i64> {
    let (negative, body) = match raw.as_bytes().first()? {
        b'-' => (true, &raw[1..]),
        b'+' => (false, &raw[1..]),
        _ => (false, raw),
    };

    let lower = body.to_ascii_lowercase();
    let (radix, digits, prefixed) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest, true)
    } else if lower.len() > 1 && lower.starts_with('0') {
        (8, &lower[1..], true)
    } else {
        (10, lower.as_str(), false)
    };

    let digits = strip_digit_separators(digits, prefixed)?;
    if digits.is_empty() {
        return None;
    }

    let magnitude = u64::from_str_radix(&digits, radix).ok()?;
    if negative {
        if magnitude > i64::MAX as u64 + 1 {
            None
        } else {
            Some((-(magnitude as i128)) as i64)
        }
    } else {
        i64::try_from(magnitude).ok()
    }
}

/// Underscores may only sit between digits (or directly after a base prefix)
fn strip_digit_separators(digits: &str, prefixed: bool) -> Option<String> {
    if !digits.contains('_') {
        return Some(digits.to_string());
    }
    let bytes = digits.as_bytes();
    let mut out = String::with_capacity(digits.len());
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'_' {
            let prev_ok = if i == 0 { prefixed } else { bytes[i - 1] != b'_' };
            let next_ok = i + 1 < bytes.len() && bytes[i + 1] != b'_';
            if !prev_ok || !next_ok {
                return None;
            }
        } else {
            out.push(*b as char);
        }
    }
    Some(out)
}

fn parse_float(raw: &str) -> Option<f64> {
    // "-" or "+" alone, and embedded whitespace, are rejected by the std parser
    raw.parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_integers() {
        assert_eq!(infer_value("120"), TypedValue::Int(120));
        assert_eq!(infer_value("-7"), TypedValue::Int(-7));
        assert_eq!(infer_value("+15"), TypedValue::Int(15));
        assert_eq!(infer_value("0"), TypedValue::Int(0));
    }

    #[test]
    fn test_prefixed_integers() {
        assert_eq!(infer_value("0x1F"), TypedValue::Int(31));
        assert_eq!(infer_value("010"), TypedValue::Int(8));
        assert_eq!(infer_value("0o17"), TypedValue::Int(15));
        assert_eq!(infer_value("0b101"), TypedValue::Int(5));
        assert_eq!(infer_value("1_000"), TypedValue::Int(1000));
    }

    #[test]
    fn test_invalid_octal_falls_back_to_float() {
        // Not a valid octal literal, but a valid decimal float
        assert_eq!(infer_value("09"), TypedValue::Float(9.0));
    }

    #[test]
    fn test_floats() {
        assert_eq!(infer_value("3.25"), TypedValue::Float(3.25));
        assert_eq!(infer_value("1e3"), TypedValue::Float(1000.0));
        assert_eq!(infer_value("-0.5"), TypedValue::Float(-0.5));
    }

    #[test]
    fn test_integer_bounds() {
        assert_eq!(infer_value("9223372036854775807"), TypedValue::Int(i64::MAX));
        assert_eq!(infer_value("-9223372036854775808"), TypedValue::Int(i64::MIN));
        // Overflowing integers are still valid floats
        assert_eq!(
            infer_value("9223372036854775808").column_type(),
            ColumnType::Float
        );
    }

    #[test]
    fn test_strings() {
        assert_eq!(infer_value(""), TypedValue::Str(String::new()));
        assert_eq!(infer_value("abc"), TypedValue::Str("abc".to_string()));
        assert_eq!(infer_value("0x"), TypedValue::Str("0x".to_string()));
        assert_eq!(infer_value("1__0").column_type(), ColumnType::String);
        assert_eq!(infer_value("2024-01-01 10:00:00").column_type(), ColumnType::String);
    }

    #[test]
    fn test_display_matches_raw_for_integers() {
        let value = ColumnValue::infer("42");
        assert_eq!(value.typed.to_string(), "42");
        assert_eq!(value.raw, "42");
        assert_eq!(TypedValue::Float(42.0).to_string(), "42");
    }
}
