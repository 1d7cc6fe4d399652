//! Number rendering for the text report.

/// Render `value` with `decimals` fraction digits and `,` between thousands.
///
/// ```
/// use dash_core::formatting::format_number;
///
/// assert_eq!(format_number(1234567.891, 2), "1,234,567.89");
/// assert_eq!(format_number(-950.0, 0), "-950");
/// ```
pub fn format_number(value: f64, decimals: usize) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded = round_to(value, decimals);
    let digits = format!("{:.*}", decimals, rounded.abs());
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits.as_str(), None),
    };

    let mut out = String::with_capacity(digits.len() + whole.len() / 3 + 1);
    // -0.0 compares equal to 0.0, so values rounding to zero stay unsigned.
    if rounded < 0.0 {
        out.push('-');
    }
    out.push_str(&with_separators(whole));
    if let Some(fraction) = fraction {
        out.push('.');
        out.push_str(fraction);
    }
    out
}

/// A row or group count with thousands separators.
pub fn format_count(count: usize) -> String {
    with_separators(&count.to_string())
}

/// Two-decimal rendering of a statistic that may be undefined (`-`).
pub fn format_optional(value: Option<f64>, decimals: usize) -> String {
    match value {
        Some(v) => format_number(v, decimals),
        None => "-".to_string(),
    }
}

/// Share of `part` in `whole` as a percentage; `0` for an empty whole.
pub fn percentage(part: f64, whole: f64, decimals: usize) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        round_to(part / whole * 100.0, decimals)
    }
}

/// Round to two decimals, the precision of every aggregation table.
pub fn round2(value: f64) -> f64 {
    round_to(value, 2)
}

fn round_to(value: f64, decimals: usize) -> f64 {
    let scale = 10_f64.powi(decimals as i32);
    (value * scale).round() / scale
}

/// `1234567` -> `1,234,567`. Expects ASCII digits only.
fn with_separators(digits: &str) -> String {
    let mut reversed = Vec::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            reversed.push(',');
        }
        reversed.push(c);
    }
    reversed.into_iter().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separators() {
        assert_eq!(with_separators("7"), "7");
        assert_eq!(with_separators("999"), "999");
        assert_eq!(with_separators("1000"), "1,000");
        assert_eq!(with_separators("95662"), "95,662");
        assert_eq!(format_count(1_234_567), "1,234,567");
    }

    #[test]
    fn test_format_number_fraction_digits() {
        assert_eq!(format_number(0.0, 2), "0.00");
        assert_eq!(format_number(12.5, 0), "13");
        assert_eq!(format_number(1000.0, 1), "1,000.0");
        assert_eq!(format_number(2.0 / 3.0, 2), "0.67");
    }

    #[test]
    fn test_format_number_sign() {
        assert_eq!(format_number(-1234.25, 2), "-1,234.25");
        assert_eq!(format_number(-0.004, 2), "0.00");
    }

    #[test]
    fn test_format_number_non_finite() {
        assert_eq!(format_number(f64::NAN, 2), "NaN");
        assert_eq!(format_number(f64::INFINITY, 2), "inf");
    }

    #[test]
    fn test_format_optional_dash_for_none() {
        assert_eq!(format_optional(None, 2), "-");
        assert_eq!(format_optional(Some(3.0), 2), "3.00");
    }

    #[test]
    fn test_percentage_and_round2() {
        assert_eq!(percentage(1.0, 8.0, 1), 12.5);
        assert_eq!(percentage(3.0, 0.0, 1), 0.0);
        assert_eq!(round2(5.0 + 1.0 / 3.0), 5.33);
        assert_eq!(round2(-2.0051), -2.01);
    }
}
