//! Template modifiers: conditionals and value transforms.
//!
//! A modifier name is parsed once at compile time into [`Modifier`]. At
//! render time [`transform`] dispatches on `(value kind, modifier)`; a pair
//! with no meaning renders `{unknown_<kind>_modifier(<name>)}`. An absent
//! value has no kind, so any known transform on it renders nothing.

use base64::Engine;
use rand::seq::SliceRandom;

use super::value::{format_number, FieldValue};

/// Comparison prefixes usable as conditional modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `$`
    StartsWith,
    /// `^`
    EndsWith,
    /// `~`
    Contains,
    /// `=`
    Equals,
    Ge,
    Gt,
    Le,
    Lt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Modifier {
    IsTrue,
    IsFalse,
    Exists,
    Compare(CompareOp, String),
    Upper,
    Lower,
    Title,
    Length,
    Reverse,
    Base64,
    String,
    /// `join` or `join('<sep>')`.
    Join(Option<String>),
    First,
    Last,
    Random,
    Sort,
    Comma,
    Hex,
    Octal,
    Binary,
    Bytes,
    Bytes10,
    Bytes2,
    Time,
    Unknown(String),
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    for quote in ['\'', '"'] {
        if let Some(inner) = value.strip_prefix(quote).and_then(|v| v.strip_suffix(quote)) {
            return inner;
        }
    }
    value
}

impl Modifier {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        const OPS: &[(&str, CompareOp)] = &[
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
            ("$", CompareOp::StartsWith),
            ("^", CompareOp::EndsWith),
            ("~", CompareOp::Contains),
            ("=", CompareOp::Equals),
        ];
        for (prefix, op) in OPS {
            if let Some(operand) = raw.strip_prefix(prefix) {
                return Self::Compare(*op, operand.to_string());
            }
        }

        if let Some(args) = raw.strip_prefix("join(").and_then(|r| r.strip_suffix(')')) {
            return Self::Join(Some(unquote(args).to_string()));
        }

        match raw.to_ascii_lowercase().as_str() {
            "istrue" => Self::IsTrue,
            "isfalse" => Self::IsFalse,
            "exists" => Self::Exists,
            "upper" => Self::Upper,
            "lower" => Self::Lower,
            "title" => Self::Title,
            "length" => Self::Length,
            "reverse" => Self::Reverse,
            "base64" => Self::Base64,
            "string" => Self::String,
            "join" => Self::Join(None),
            "first" => Self::First,
            "last" => Self::Last,
            "random" => Self::Random,
            "sort" => Self::Sort,
            "comma" => Self::Comma,
            "hex" => Self::Hex,
            "octal" => Self::Octal,
            "binary" => Self::Binary,
            "bytes" => Self::Bytes,
            "bytes10" => Self::Bytes10,
            "bytes2" => Self::Bytes2,
            "time" => Self::Time,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Conditionals select a branch instead of producing text.
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        matches!(self, Self::IsTrue | Self::IsFalse | Self::Exists | Self::Compare(..))
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Conditionals
// ═══════════════════════════════════════════════════════════════════════

fn compare_text(text: &str, op: CompareOp, operand: &str) -> bool {
    let text_lower = text.to_lowercase();
    let operand_lower = operand.to_lowercase();
    match op {
        CompareOp::StartsWith => text_lower.starts_with(&operand_lower),
        CompareOp::EndsWith => text_lower.ends_with(&operand_lower),
        CompareOp::Contains => text_lower.contains(&operand_lower),
        CompareOp::Equals => text_lower == operand_lower,
        CompareOp::Ge | CompareOp::Gt | CompareOp::Le | CompareOp::Lt => {
            match (text.trim().parse::<f64>(), operand.trim().parse::<f64>()) {
                (Ok(a), Ok(b)) => compare_numbers(a, op, b),
                _ => false,
            }
        }
    }
}

#[allow(clippy::float_cmp)]
fn compare_numbers(value: f64, op: CompareOp, operand: f64) -> bool {
    match op {
        CompareOp::Ge => value >= operand,
        CompareOp::Gt => value > operand,
        CompareOp::Le => value <= operand,
        CompareOp::Lt => value < operand,
        CompareOp::Equals => value == operand,
        CompareOp::StartsWith | CompareOp::EndsWith | CompareOp::Contains => {
            compare_text(&format_number(value), op, &operand.to_string())
        }
    }
}

/// Evaluate a conditional modifier. Absent or empty values are always false.
#[must_use]
pub fn evaluate_condition(value: &FieldValue, modifier: &Modifier) -> bool {
    if !value.exists() {
        return false;
    }
    match (value, modifier) {
        (_, Modifier::Exists) => true,
        (FieldValue::Bool(b), Modifier::IsTrue) => *b,
        (FieldValue::Bool(b), Modifier::IsFalse) => !*b,
        (_, Modifier::IsTrue) => true,
        (_, Modifier::IsFalse) => false,
        (FieldValue::Str(s), Modifier::Compare(op, operand)) => compare_text(s, *op, operand),
        (FieldValue::Array(items), Modifier::Compare(op, operand)) => {
            items.iter().any(|item| compare_text(item, *op, operand))
        }
        (FieldValue::Number(n), Modifier::Compare(op, operand)) => match operand.trim().parse::<f64>() {
            Ok(rhs) => compare_numbers(*n, *op, rhs),
            Err(_) => matches!(op, CompareOp::StartsWith | CompareOp::EndsWith | CompareOp::Contains)
                && compare_text(&format_number(*n), *op, operand),
        },
        (FieldValue::Bool(b), Modifier::Compare(CompareOp::Equals, operand)) => {
            operand.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" })
        }
        _ => false,
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Transforms
// ═══════════════════════════════════════════════════════════════════════

fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Grouping and decimal separators for a locale tag such as `de-DE`.
fn separators(locale: Option<&str>) -> (&'static str, char) {
    let language = locale
        .and_then(|l| l.split(['-', '_']).next())
        .unwrap_or("en")
        .to_ascii_lowercase();
    match language.as_str() {
        "de" | "es" | "it" | "pt" | "nl" => (".", ','),
        "fr" => ("\u{202f}", ','),
        _ => (",", '.'),
    }
}

fn trim_decimals(value: f64) -> String {
    let text = format!("{value:.2}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn comma(value: f64, locale: Option<&str>) -> String {
    let (group, decimal) = separators(locale);
    let negative = value < 0.0;
    let abs = value.abs();
    let whole = abs.trunc() as u64;

    let digits = whole.to_string();
    let mut grouped = String::new();
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push_str(group);
        }
        grouped.push(ch);
    }

    let fraction = trim_decimals(abs.fract());
    if let Some(rest) = fraction.strip_prefix("0.") {
        grouped.push(decimal);
        grouped.push_str(rest);
    }
    if negative {
        format!("-{grouped}")
    } else {
        grouped
    }
}

/// Human-readable byte size.
#[must_use]
pub fn format_bytes(value: f64, binary: bool) -> String {
    let (base, units): (f64, &[&str]) = if binary {
        (1024.0, &["B", "KiB", "MiB", "GiB", "TiB", "PiB"])
    } else {
        (1000.0, &["B", "KB", "MB", "GB", "TB", "PB"])
    };
    let mut scaled = value;
    let mut unit = 0;
    while scaled.abs() >= base && unit + 1 < units.len() {
        scaled /= base;
        unit += 1;
    }
    format!("{} {}", trim_decimals(scaled), units[unit])
}

/// Milliseconds as `Hh:Mm:Ss`, `Mm:Ss` or `Mm`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
#[must_use]
pub fn format_duration(ms: f64) -> String {
    let total = (ms.max(0.0) / 1000.0).floor() as u64;
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h:{minutes}m:{seconds}s")
    } else if seconds > 0 {
        format!("{minutes}m:{seconds}s")
    } else {
        format!("{minutes}m")
    }
}

/// Apply a non-conditional modifier. `raw` is the modifier as written.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn transform(value: &FieldValue, modifier: &Modifier, raw: &str, locale: Option<&str>) -> String {
    match (value, modifier) {
        (_, Modifier::Unknown(name)) => format!("{{unknown_modifier({name})}}"),
        (FieldValue::Absent, _) => String::new(),

        (FieldValue::Str(s), Modifier::Upper) => s.to_uppercase(),
        (FieldValue::Str(s), Modifier::Lower) => s.to_lowercase(),
        (FieldValue::Str(s), Modifier::Title) => title_case(s),
        (FieldValue::Str(s), Modifier::Length) => s.chars().count().to_string(),
        (FieldValue::Str(s), Modifier::Reverse) => s.chars().rev().collect(),
        (FieldValue::Str(s), Modifier::Base64) => base64::engine::general_purpose::STANDARD.encode(s),
        (FieldValue::Str(s), Modifier::String) => s.clone(),

        (FieldValue::Array(items), Modifier::Join(sep)) => items.join(sep.as_deref().unwrap_or(", ")),
        (FieldValue::Array(items), Modifier::Length) => items.len().to_string(),
        (FieldValue::Array(items), Modifier::First) => items.first().cloned().unwrap_or_default(),
        (FieldValue::Array(items), Modifier::Last) => items.last().cloned().unwrap_or_default(),
        (FieldValue::Array(items), Modifier::Random) => {
            items.choose(&mut rand::thread_rng()).cloned().unwrap_or_default()
        }
        (FieldValue::Array(items), Modifier::Sort) => {
            let mut sorted = items.clone();
            sorted.sort();
            sorted.join(", ")
        }
        (FieldValue::Array(items), Modifier::Reverse) => {
            items.iter().rev().cloned().collect::<Vec<_>>().join(", ")
        }

        (FieldValue::Number(n), Modifier::Comma) => comma(*n, locale),
        (FieldValue::Number(n), Modifier::Hex) => format!("{:x}", *n as i64),
        (FieldValue::Number(n), Modifier::Octal) => format!("{:o}", *n as i64),
        (FieldValue::Number(n), Modifier::Binary) => format!("{:b}", *n as i64),
        (FieldValue::Number(n), Modifier::Bytes | Modifier::Bytes10) => format_bytes(*n, false),
        (FieldValue::Number(n), Modifier::Bytes2) => format_bytes(*n, true),
        (FieldValue::Number(n), Modifier::String) => format_number(*n),
        (FieldValue::Number(n), Modifier::Time) => format_duration(*n),

        (value, _) => format!("{{unknown_{}_modifier({raw})}}", value.kind_name()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> FieldValue {
        FieldValue::Str(v.into())
    }

    fn arr(v: &[&str]) -> FieldValue {
        FieldValue::Array(v.iter().map(|x| (*x).to_string()).collect())
    }

    fn apply(value: &FieldValue, raw: &str) -> String {
        transform(value, &Modifier::parse(raw), raw, None)
    }

    #[test]
    fn parses_modifier_names() {
        assert_eq!(Modifier::parse("upper"), Modifier::Upper);
        assert_eq!(Modifier::parse(">=5"), Modifier::Compare(CompareOp::Ge, "5".into()));
        assert_eq!(Modifier::parse("$Web"), Modifier::Compare(CompareOp::StartsWith, "Web".into()));
        assert_eq!(Modifier::parse("join(' | ')"), Modifier::Join(Some(" | ".into())));
        assert_eq!(Modifier::parse("shout"), Modifier::Unknown("shout".into()));
        assert!(Modifier::parse("exists").is_conditional());
        assert!(!Modifier::parse("bytes").is_conditional());
    }

    #[test]
    fn string_modifiers() {
        assert_eq!(apply(&s("web-dl"), "upper"), "WEB-DL");
        assert_eq!(apply(&s("the dark knight"), "title"), "The Dark Knight");
        assert_eq!(apply(&s("abc"), "reverse"), "cba");
        assert_eq!(apply(&s("abc"), "length"), "3");
        assert_eq!(apply(&s("hi"), "base64"), "aGk=");
    }

    #[test]
    fn array_modifiers() {
        let tags = arr(&["HDR", "DV", "10bit"]);
        assert_eq!(apply(&tags, "join"), "HDR, DV, 10bit");
        assert_eq!(apply(&tags, "join(' | ')"), "HDR | DV | 10bit");
        assert_eq!(apply(&tags, "first"), "HDR");
        assert_eq!(apply(&tags, "last"), "10bit");
        assert_eq!(apply(&tags, "sort"), "10bit, DV, HDR");
        assert_eq!(apply(&tags, "reverse"), "10bit, DV, HDR");
        assert_eq!(apply(&tags, "length"), "3");
        assert!(["HDR", "DV", "10bit"].contains(&apply(&tags, "random").as_str()));
        assert_eq!(apply(&arr(&[]), "first"), "");
        assert_eq!(apply(&arr(&[]), "random"), "");
    }

    #[test]
    fn number_modifiers() {
        let n = FieldValue::Number(1_234_567.0);
        assert_eq!(apply(&n, "comma"), "1,234,567");
        assert_eq!(transform(&n, &Modifier::Comma, "comma", Some("de-DE")), "1.234.567");
        assert_eq!(apply(&FieldValue::Number(255.0), "hex"), "ff");
        assert_eq!(apply(&FieldValue::Number(8.0), "octal"), "10");
        assert_eq!(apply(&FieldValue::Number(5.0), "binary"), "101");
        assert_eq!(apply(&FieldValue::Number(1_500_000_000.0), "bytes"), "1.5 GB");
        assert_eq!(apply(&FieldValue::Number(1_500_000_000.0), "bytes10"), "1.5 GB");
        assert_eq!(apply(&FieldValue::Number(1_073_741_824.0), "bytes2"), "1 GiB");
        assert_eq!(apply(&FieldValue::Number(512.0), "bytes"), "512 B");
        assert_eq!(apply(&FieldValue::Number(42.0), "string"), "42");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(3_723_000.0), "1h:2m:3s");
        assert_eq!(format_duration(3_600_000.0), "1h:0m:0s");
        assert_eq!(format_duration(125_000.0), "2m:5s");
        assert_eq!(format_duration(120_000.0), "2m");
        assert_eq!(format_duration(0.0), "0m");
    }

    #[test]
    fn wrong_kind_and_unknown_name() {
        assert_eq!(apply(&s("x"), "bytes"), "{unknown_string_modifier(bytes)}");
        assert_eq!(apply(&arr(&["a"]), "upper"), "{unknown_array_modifier(upper)}");
        assert_eq!(apply(&FieldValue::Bool(true), "upper"), "{unknown_boolean_modifier(upper)}");
        assert_eq!(apply(&s("x"), "shout"), "{unknown_modifier(shout)}");
        assert_eq!(apply(&FieldValue::Absent, "upper"), "");
    }

    #[test]
    fn conditionals() {
        let exists = Modifier::Exists;
        assert!(evaluate_condition(&FieldValue::Number(0.0), &exists));
        assert!(!evaluate_condition(&FieldValue::Absent, &exists));
        assert!(!evaluate_condition(&s(""), &exists));
        assert!(!evaluate_condition(&arr(&[]), &exists));

        assert!(evaluate_condition(&FieldValue::Bool(true), &Modifier::IsTrue));
        assert!(evaluate_condition(&FieldValue::Bool(false), &Modifier::IsFalse));
        assert!(!evaluate_condition(&FieldValue::Absent, &Modifier::IsFalse));

        assert!(evaluate_condition(&s("WEB-DL"), &Modifier::parse("$web")));
        assert!(evaluate_condition(&s("WEB-DL"), &Modifier::parse("^dl")));
        assert!(evaluate_condition(&s("WEB-DL"), &Modifier::parse("~b-d")));
        assert!(evaluate_condition(&s("1080p"), &Modifier::parse("=1080P")));
        assert!(evaluate_condition(&arr(&["English", "French"]), &Modifier::parse("=french")));
        assert!(evaluate_condition(&FieldValue::Number(10.0), &Modifier::parse(">=10")));
        assert!(!evaluate_condition(&FieldValue::Number(10.0), &Modifier::parse(">10")));
        assert!(evaluate_condition(&FieldValue::Number(3.0), &Modifier::parse("<5")));
        assert!(evaluate_condition(&FieldValue::Bool(false), &Modifier::parse("=false")));
    }
}
