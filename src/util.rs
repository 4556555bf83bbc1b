//! Utilities used in this crate.
//!
//! This is not part of the public interface of the crate.

/// Canonical form of an event name, usable as a formula token.
pub fn normalize_name(name: &str) -> String {
    name.replace(':', "_").replace('-', "_")
}

/// Is `stat` a raw event code such as `r11` or `r4004`?
pub fn is_raw_code(stat: &str) -> bool {
    stat.len() > 1 && stat.starts_with('r') && stat[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Round to `digits` decimal places.
pub fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round() / scale
}

/// Round to the nearest integer, ties to the even neighbour.
pub fn round_half_even(value: f64) -> f64 {
    let rounded = value.round();
    if (value - value.trunc()).abs() == 0.5 && rounded % 2.0 != 0.0 {
        rounded - value.signum()
    } else {
        rounded
    }
}

/// Format `value` with 4 decimals and `,` thousands separators, e.g. `1,234.5000`.
pub fn format_thousands(value: f64) -> String {
    let fixed = format!("{:.4}", value.abs());
    let (int_part, frac_part) = fixed.split_at(fixed.find('.').unwrap_or_else(|| fixed.len()));
    let digits: Vec<char> = int_part.chars().collect();
    let grouped: Vec<String> = digits
        .rchunks(3)
        .rev()
        .map(|c| c.iter().collect())
        .collect();
    let sign = if value < 0.0 && fixed.chars().any(|c| c != '0' && c != '.') {
        "-"
    } else {
        ""
    };
    format!("{}{}{}", sign, grouped.join(","), frac_part)
}
