//! Parsing of Kubernetes resource quantities.
//!
//! Node capacity is reported as strings such as `3500m`, `16Gi` or `1e3`.
//! [`parse_quantity`] converts them to base units.

/// Parse a quantity string into its value in base units.
///
/// Returns `None` for malformed input.
#[must_use]
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | '+' | '-')))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    if number.is_empty() {
        return None;
    }
    let value: f64 = number.parse().ok()?;

    let multiplier = match suffix {
        "" => 1.0,
        "Ki" => 1024_f64,
        "Mi" => 1024_f64.powi(2),
        "Gi" => 1024_f64.powi(3),
        "Ti" => 1024_f64.powi(4),
        "Pi" => 1024_f64.powi(5),
        "Ei" => 1024_f64.powi(6),
        "n" => 1e-9,
        "u" => 1e-6,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        exp if exp.starts_with(['e', 'E']) => 10_f64.powi(exp[1..].parse().ok()?),
        _ => return None,
    };

    Some(value * multiplier)
}

/// Round a summed quantity up to a whole number of base units.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn round_up(value: f64) -> i64 {
    value.ceil() as i64
}
