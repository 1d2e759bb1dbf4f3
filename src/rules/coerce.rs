//! Type coercion from raw, untyped extract values into schema-conformant
//! typed values. Coercion is deliberately lenient about the formats the
//! upstream report systems actually emit: comma decimal separators,
//! thousands separators, several date layouts, and yes/no booleans.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::domain::TypedValue;
use crate::schema::FieldType;

/// Coerce a raw JSON value to the declared field type. The error string
/// becomes the TypeMismatch verdict reason.
pub fn coerce(value: &serde_json::Value, ty: FieldType) -> Result<TypedValue, String> {
    match ty {
        FieldType::Text => coerce_text(value),
        FieldType::Integer => coerce_integer(value),
        FieldType::Decimal => coerce_decimal(value),
        FieldType::Boolean => coerce_boolean(value),
        FieldType::Date => coerce_date(value),
        FieldType::Timestamp => coerce_timestamp(value),
    }
}

fn coerce_text(value: &serde_json::Value) -> Result<TypedValue, String> {
    match value {
        serde_json::Value::String(s) => Ok(TypedValue::Text(s.clone())),
        // Numeric identifiers frequently arrive as JSON numbers
        serde_json::Value::Number(n) => Ok(TypedValue::Text(n.to_string())),
        other => Err(format!("expected text, got {}", type_name(other))),
    }
}

fn coerce_integer(value: &serde_json::Value) -> Result<TypedValue, String> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                return Ok(TypedValue::Integer(i));
            }
            if let Some(f) = n.as_f64() {
                if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                    return Ok(TypedValue::Integer(f as i64));
                }
            }
            Err(format!("'{}' is not a whole number", n))
        }
        serde_json::Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(TypedValue::Integer)
            .map_err(|_| format!("'{}' is not a whole number", s)),
        other => Err(format!("expected integer, got {}", type_name(other))),
    }
}

fn coerce_decimal(value: &serde_json::Value) -> Result<TypedValue, String> {
    match value {
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string())
            .map(TypedValue::Decimal)
            .map_err(|_| format!("'{}' is not a decimal", n)),
        serde_json::Value::String(s) => parse_decimal(s).map(TypedValue::Decimal),
        other => Err(format!("expected decimal, got {}", type_name(other))),
    }
}

/// Parse a decimal from the messy string forms the source extracts use.
/// When both separators appear, the rightmost one is the decimal point;
/// a lone comma is treated as a decimal separator, mirroring the
/// comma-decimal locales the reports originate from.
pub fn parse_decimal(raw: &str) -> Result<Decimal, String> {
    let s: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ' ' && *c != '\u{a0}')
        .collect();
    if s.is_empty() {
        return Err("empty string is not a decimal".to_string());
    }

    let last_comma = s.rfind(',');
    let last_dot = s.rfind('.');
    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                s.replace('.', "").replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (Some(_), None) => {
            if s.matches(',').count() > 1 {
                s.replace(',', "")
            } else {
                s.replace(',', ".")
            }
        }
        (None, Some(_)) => {
            if s.matches('.').count() > 1 {
                s.replace('.', "")
            } else {
                s
            }
        }
        (None, None) => s,
    };

    Decimal::from_str(&normalized).map_err(|_| format!("'{}' is not a decimal", raw.trim()))
}

fn coerce_boolean(value: &serde_json::Value) -> Result<TypedValue, String> {
    match value {
        serde_json::Value::Bool(b) => Ok(TypedValue::Boolean(*b)),
        serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Ok(TypedValue::Boolean(true)),
            "false" | "no" | "n" | "0" => Ok(TypedValue::Boolean(false)),
            _ => Err(format!("'{}' is not a boolean", s)),
        },
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(1) => Ok(TypedValue::Boolean(true)),
            Some(0) => Ok(TypedValue::Boolean(false)),
            _ => Err(format!("'{}' is not a boolean", n)),
        },
        other => Err(format!("expected boolean, got {}", type_name(other))),
    }
}

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y"];

fn coerce_date(value: &serde_json::Value) -> Result<TypedValue, String> {
    let s = match value {
        serde_json::Value::String(s) => s.trim(),
        other => return Err(format!("expected date, got {}", type_name(other))),
    };
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Ok(TypedValue::Date(date));
        }
    }
    Err(format!("'{}' is not a recognized date", s))
}

fn coerce_timestamp(value: &serde_json::Value) -> Result<TypedValue, String> {
    let s = match value {
        serde_json::Value::String(s) => s.trim(),
        other => return Err(format!("expected timestamp, got {}", type_name(other))),
    };
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(TypedValue::Timestamp(ts.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Ok(TypedValue::Timestamp(naive.and_utc()));
    }
    Err(format!("'{}' is not a recognized timestamp", s))
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
