//! Field normalization and type-aware equivalence.
//!
//! Every normalizer is total: malformed input yields a neutral default
//! (`""` or `0.0`) instead of an error.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use chrono::NaiveDate;
use regex::Regex;

use crate::config::ToleranceConfig;
use crate::model::{FieldKind, FieldValue};

const CURRENCY_GLYPHS: [char; 4] = ['$', '€', '£', '¥'];

fn day_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{1,2})[/.\-](\d{1,2})[/.\-](\d{4}|\d{2})$").expect("static regex")
    })
}

fn year_first_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4})[/.\-](\d{1,2})[/.\-](\d{1,2})(?:[T ].*)?$").expect("static regex")
    })
}

// ---------------------------------------------------------------------------
// Dates
// ---------------------------------------------------------------------------

/// Canonical `DD/MM/YYYY`, or `""` when the value is not a recognizable date.
pub fn normalize_date(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => parse_date(s)
            .map(|d| d.format("%d/%m/%Y").to_string())
            .unwrap_or_default(),
        FieldValue::Number(_) | FieldValue::Bool(_) => String::new(),
    }
}

/// Day-first is preferred; month-first only when day-first is not a valid
/// calendar date (`01/15/2024`).
fn parse_date(raw: &str) -> Option<NaiveDate> {
    let s = raw.trim();

    if let Some(caps) = year_first_re().captures(s) {
        let year: i32 = caps[1].parse().ok()?;
        let month: u32 = caps[2].parse().ok()?;
        let day: u32 = caps[3].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let caps = day_first_re().captures(s)?;
    let first: u32 = caps[1].parse().ok()?;
    let second: u32 = caps[2].parse().ok()?;
    let year_text = &caps[3];
    let mut year: i32 = year_text.parse().ok()?;
    if year_text.len() == 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }

    NaiveDate::from_ymd_opt(year, second, first)
        .or_else(|| NaiveDate::from_ymd_opt(year, first, second))
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Signed amount in currency units, `0.0` when unparseable.
pub fn normalize_amount(value: &FieldValue) -> f64 {
    match value {
        FieldValue::Number(n) if n.is_finite() => *n,
        FieldValue::Number(_) | FieldValue::Bool(_) => 0.0,
        FieldValue::Text(s) => parse_amount(s).unwrap_or(0.0),
    }
}

/// Parse a statement amount string:
/// - Strip currency glyphs and whitespace
/// - `(123.45)`, `-123.45` and `123.45-` are negative
/// - Right-most of `,` / `.` is the decimal point when both appear
fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && !CURRENCY_GLYPHS.contains(c))
        .collect();

    let mut negative = false;
    let mut s = cleaned.as_str();
    if s.len() >= 2 && s.starts_with('(') && s.ends_with(')') {
        negative = true;
        s = &s[1..s.len() - 1];
    }
    if let Some(rest) = s.strip_prefix('-') {
        negative = !negative;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    } else if let Some(rest) = s.strip_suffix('-') {
        negative = !negative;
        s = rest;
    }

    let digits = resolve_separators(s);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }

    let value: f64 = digits.parse().ok()?;
    Some(if negative { -value } else { value })
}

/// Rewrite locale separators so only an ASCII decimal point remains.
fn resolve_separators(s: &str) -> String {
    match (s.rfind(','), s.rfind('.')) {
        (Some(comma), Some(dot)) if comma > dot => s.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => s.replace(',', ""),
        (Some(comma), None) => {
            let decimals = s.len() - comma - 1;
            if s.matches(',').count() == 1 && (1..=2).contains(&decimals) {
                s.replace(',', ".")
            } else {
                s.replace(',', "")
            }
        }
        (None, Some(_)) if s.matches('.').count() > 1 => s.replace('.', ""),
        _ => s.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Text
// ---------------------------------------------------------------------------

/// Upper-case, single-spaced, trimmed.
pub fn normalize_text(value: &FieldValue) -> String {
    match value {
        FieldValue::Text(s) => normalize_str(s),
        FieldValue::Number(n) => n.to_string(),
        FieldValue::Bool(b) => b.to_string().to_uppercase(),
    }
}

fn normalize_str(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Similarity in [0, 1]: the larger of token overlap (Dice) and normalized
/// Levenshtein over the normalized strings.
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_str(a);
    let b = normalize_str(b);
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    token_overlap(&a, &b).max(strsim::normalized_levenshtein(&a, &b))
}

fn token_overlap(a: &str, b: &str) -> f64 {
    let left: BTreeSet<&str> = a.split(' ').collect();
    let right: BTreeSet<&str> = b.split(' ').collect();
    let shared = left.intersection(&right).count();
    (2 * shared) as f64 / (left.len() + right.len()) as f64
}

// ---------------------------------------------------------------------------
// Comparison
// ---------------------------------------------------------------------------

/// Do two raw values represent the same fact?
pub fn compare(a: &FieldValue, b: &FieldValue, kind: FieldKind, tolerance: &ToleranceConfig) -> bool {
    match kind {
        FieldKind::Amount => amounts_equal(normalize_amount(a), normalize_amount(b), tolerance),
        FieldKind::Date => {
            let (left, right) = (normalize_date(a), normalize_date(b));
            if left.is_empty() && right.is_empty() {
                normalize_text(a) == normalize_text(b)
            } else {
                left == right
            }
        }
        FieldKind::Text => {
            let (left, right) = (normalize_text(a), normalize_text(b));
            left == right || text_similarity(&left, &right) > tolerance.text_similarity
        }
        FieldKind::Exact => a.to_string().trim() == b.to_string().trim(),
    }
}

pub fn amounts_equal(a: f64, b: f64, tolerance: &ToleranceConfig) -> bool {
    let delta = (a - b).abs();
    let allowed = tolerance
        .amount_absolute
        .max(tolerance.amount_relative * a.abs().max(b.abs()));
    // Epsilon-inclusive: 100.51 vs 100.50 at a 0.01 tolerance stays equal.
    let eps = f64::EPSILON * 16.0 * 1.0_f64.max(a.abs()).max(b.abs());
    delta <= allowed + eps
}

/// Normalized rendering recorded in conflict audit metadata.
pub fn normalized_display(value: &FieldValue, kind: FieldKind) -> String {
    match kind {
        FieldKind::Date => {
            let date = normalize_date(value);
            if date.is_empty() {
                normalize_text(value)
            } else {
                date
            }
        }
        FieldKind::Amount => format!("{:.2}", normalize_amount(value)),
        FieldKind::Text => normalize_text(value),
        FieldKind::Exact => value.to_string().trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::from(s)
    }

    fn tol() -> ToleranceConfig {
        ToleranceConfig::default()
    }

    #[test]
    fn date_formats() {
        assert_eq!(normalize_date(&text("15/01/2024")), "15/01/2024");
        assert_eq!(normalize_date(&text("2024-01-15")), "15/01/2024");
        assert_eq!(normalize_date(&text("15-01-24")), "15/01/2024");
        assert_eq!(normalize_date(&text("1/5/2024")), "01/05/2024");
        assert_eq!(normalize_date(&text("01/15/2024")), "15/01/2024");
        assert_eq!(normalize_date(&text("2024-01-15T09:30:00Z")), "15/01/2024");
        assert_eq!(normalize_date(&text("15.01.2024")), "15/01/2024");
        assert_eq!(normalize_date(&text("31-12-99")), "31/12/1999");
    }

    #[test]
    fn date_unparseable_is_empty() {
        assert_eq!(normalize_date(&text("")), "");
        assert_eq!(normalize_date(&text("yesterday")), "");
        assert_eq!(normalize_date(&text("32/13/2024")), "");
        assert_eq!(normalize_date(&FieldValue::Number(45306.0)), "");
    }

    #[test]
    fn amount_plain_and_currency() {
        assert_eq!(normalize_amount(&FieldValue::Number(100.5)), 100.5);
        assert_eq!(normalize_amount(&text("100.50")), 100.5);
        assert_eq!(normalize_amount(&text("$1,234.56")), 1234.56);
        assert_eq!(normalize_amount(&text("€ 1.234,56")), 1234.56);
        assert_eq!(normalize_amount(&text("£100,50")), 100.5);
        assert_eq!(normalize_amount(&text("¥1,000")), 1000.0);
        assert_eq!(normalize_amount(&text("1.234.567")), 1234567.0);
    }

    #[test]
    fn amount_signs() {
        assert_eq!(normalize_amount(&text("(50.00)")), -50.0);
        assert_eq!(normalize_amount(&text("-50.00")), -50.0);
        assert_eq!(normalize_amount(&text("50.00-")), -50.0);
        assert_eq!(normalize_amount(&text("-$50.00")), -50.0);
        assert_eq!(normalize_amount(&text("+12")), 12.0);
    }

    #[test]
    fn amount_unparseable_is_zero() {
        assert_eq!(normalize_amount(&text("")), 0.0);
        assert_eq!(normalize_amount(&text("N/A")), 0.0);
        assert_eq!(normalize_amount(&text("12abc")), 0.0);
        assert_eq!(normalize_amount(&text(".")), 0.0);
        assert_eq!(normalize_amount(&FieldValue::Bool(true)), 0.0);
    }

    #[test]
    fn text_normalization() {
        assert_eq!(normalize_text(&text("  payment   to\tstore ")), "PAYMENT TO STORE");
        assert_eq!(normalize_text(&text("")), "");
        assert_eq!(normalize_text(&FieldValue::Number(42.0)), "42");
    }

    #[test]
    fn compare_amounts() {
        assert!(compare(&FieldValue::Number(100.50), &FieldValue::Number(100.50), FieldKind::Amount, &tol()));
        assert!(!compare(&FieldValue::Number(100.50), &FieldValue::Number(101.50), FieldKind::Amount, &tol()));
        assert!(compare(&text("€100,50"), &text("100.50"), FieldKind::Amount, &tol()));
        assert!(compare(&text("100.51"), &text("100.50"), FieldKind::Amount, &tol()));
        assert!(!compare(&text("-50.00"), &text("50.00"), FieldKind::Amount, &tol()));
    }

    #[test]
    fn compare_relative_tolerance_scales() {
        // 0.5% of 10,000 = 50
        assert!(compare(&FieldValue::Number(10_000.0), &FieldValue::Number(10_040.0), FieldKind::Amount, &tol()));
        assert!(!compare(&FieldValue::Number(10_000.0), &FieldValue::Number(10_080.0), FieldKind::Amount, &tol()));
    }

    #[test]
    fn compare_dates() {
        assert!(compare(&text("15/01/2024"), &text("2024-01-15"), FieldKind::Date, &tol()));
        assert!(!compare(&text("15/01/2024"), &text("16/01/2024"), FieldKind::Date, &tol()));
        assert!(!compare(&text("15/01/2024"), &text("garbage"), FieldKind::Date, &tol()));
        assert!(compare(&text("Jan 15"), &text("JAN  15"), FieldKind::Date, &tol()));
    }

    #[test]
    fn compare_descriptions() {
        assert!(compare(&text("PAYMENT TO STORE"), &text("payment to shop"), FieldKind::Text, &tol()));
        assert!(!compare(&text("PAYMENT TO STORE"), &text("ATM WITHDRAWAL"), FieldKind::Text, &tol()));
        assert!(!compare(&text("PAYMENT TO STORE"), &text(""), FieldKind::Text, &tol()));
    }

    #[test]
    fn compare_exact() {
        assert!(compare(&text(" REF-001 "), &text("REF-001"), FieldKind::Exact, &tol()));
        assert!(!compare(&text("REF-001"), &text("ref-001"), FieldKind::Exact, &tol()));
        assert!(compare(&text("7"), &FieldValue::Number(7.0), FieldKind::Exact, &tol()));
    }

    #[test]
    fn similarity_bounds() {
        assert_eq!(text_similarity("abc", "ABC"), 1.0);
        assert_eq!(text_similarity("", "abc"), 0.0);
        let s = text_similarity("PAYMENT TO STORE", "PAYMENT TO SHOP");
        assert!(s > 0.5 && s < 1.0);
        assert!(text_similarity("GROCERY STORE", "ATM WITHDRAWAL") < 0.5);
    }

    #[test]
    fn display_forms() {
        assert_eq!(normalized_display(&text("2024-01-15"), FieldKind::Date), "15/01/2024");
        assert_eq!(normalized_display(&text("(5)"), FieldKind::Amount), "-5.00");
        assert_eq!(normalized_display(&text(" a  b "), FieldKind::Text), "A B");
    }
}
