//! Parsing and formatting of Kubernetes resource quantities.
//!
//! `k8s-openapi` models `Quantity` as a plain string newtype, so the
//! arithmetic the NUMA accounting needs (milli-CPU, bytes) is done here.
//! Supported forms: plain integers and decimals, the `m` milli suffix,
//! binary suffixes (`Ki`..`Ei`), decimal suffixes (`k`..`E`), and plain
//! scientific notation. Values round up to the requested unit, matching
//! the apimachinery `Value()`/`MilliValue()` contract.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// Parse a quantity into whole units, rounding up. `100m` → 1, `1.5` → 2.
pub fn parse_value(q: &Quantity) -> Option<i64> {
    parse_scaled(&q.0, 1)
}

/// Parse a quantity into milli units, rounding up. `100m` → 100, `1.5` → 1500.
pub fn parse_milli(q: &Quantity) -> Option<i64> {
    parse_scaled(&q.0, 1000)
}

/// Render milli-CPU canonically: whole cores as integers, otherwise `m`.
pub fn format_milli(milli: i64) -> Quantity {
    if milli % 1000 == 0 {
        Quantity((milli / 1000).to_string())
    } else {
        Quantity(format!("{milli}m"))
    }
}

/// Render a plain unit count (bytes, pods, scalar resources).
pub fn format_value(value: i64) -> Quantity {
    Quantity(value.to_string())
}

/// Parse `s` into `out_scale` sub-units per unit (1 for whole, 1000 for milli).
fn parse_scaled(s: &str, out_scale: i128) -> Option<i64> {
    let s = s.trim();
    // Negative quantities never describe a capacity or a request.
    if s.is_empty() || s.starts_with('-') {
        return None;
    }

    let split = s.find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'));
    let (number, suffix) = match split {
        Some(idx) => s.split_at(idx),
        None => (s, ""),
    };

    // `1e3` style exponents have a digit suffix after the split point.
    if (suffix.starts_with('e') || suffix.starts_with('E'))
        && suffix.len() > 1
        && suffix[1..].chars().all(|c| c.is_ascii_digit() || c == '-' || c == '+')
    {
        let value: f64 = s.parse().ok()?;
        if value < 0.0 || !value.is_finite() {
            return None;
        }
        return Some((value * out_scale as f64).ceil() as i64);
    }

    let (multiplier, denominator): (i128, i128) = match suffix {
        "" => (1, 1),
        "m" => (1, 1000),
        "k" => (1_000, 1),
        "M" => (1_000_000, 1),
        "G" => (1_000_000_000, 1),
        "T" => (1_000_000_000_000, 1),
        "P" => (1_000_000_000_000_000, 1),
        "E" => (1_000_000_000_000_000_000, 1),
        "Ki" => (1 << 10, 1),
        "Mi" => (1 << 20, 1),
        "Gi" => (1 << 30, 1),
        "Ti" => (1 << 40, 1),
        "Pi" => (1 << 50, 1),
        "Ei" => (1 << 60, 1),
        _ => return None,
    };

    let (mantissa, frac_digits) = parse_decimal(number)?;
    if mantissa < 0 {
        return None;
    }

    // value = mantissa / 10^frac_digits * multiplier / denominator, in out_scale units.
    let numerator = mantissa.checked_mul(multiplier)?.checked_mul(out_scale)?;
    let divisor = pow10(frac_digits)?.checked_mul(denominator)?;
    let value = ceil_div(numerator, divisor);
    i64::try_from(value).ok()
}

/// Decompose a decimal string into (mantissa, fractional-digit count).
fn parse_decimal(s: &str) -> Option<(i128, u32)> {
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let mut mantissa: i128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse().ok()?
    };
    for c in frac_part.chars() {
        let digit = c.to_digit(10)? as i128;
        mantissa = mantissa.checked_mul(10)?.checked_add(digit)?;
    }
    Some((mantissa, frac_part.len() as u32))
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

fn ceil_div(n: i128, d: i128) -> i128 {
    (n + d - 1) / d
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(s: &str) -> Quantity {
        Quantity(s.to_string())
    }

    #[test]
    fn milli_cpu_forms() {
        assert_eq!(parse_milli(&q("100m")), Some(100));
        assert_eq!(parse_milli(&q("2")), Some(2000));
        assert_eq!(parse_milli(&q("0.1")), Some(100));
        assert_eq!(parse_milli(&q("1.5")), Some(1500));
        assert_eq!(parse_milli(&q("2500m")), Some(2500));
    }

    #[test]
    fn whole_values_round_up() {
        assert_eq!(parse_value(&q("100m")), Some(1));
        assert_eq!(parse_value(&q("2")), Some(2));
        assert_eq!(parse_value(&q("1.5")), Some(2));
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(parse_value(&q("1Ki")), Some(1024));
        assert_eq!(parse_value(&q("1Gi")), Some(1 << 30));
        assert_eq!(parse_value(&q("1.5Gi")), Some(3 << 29));
    }

    #[test]
    fn decimal_suffixes() {
        assert_eq!(parse_value(&q("500M")), Some(500_000_000));
        assert_eq!(parse_value(&q("2k")), Some(2000));
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(parse_value(&q("1e3")), Some(1000));
        assert_eq!(parse_value(&q("1.2e2")), Some(120));
    }

    #[test]
    fn rejects_garbage_and_negatives() {
        assert_eq!(parse_value(&q("")), None);
        assert_eq!(parse_value(&q("abc")), None);
        assert_eq!(parse_value(&q("1Xi")), None);
        assert_eq!(parse_value(&q("-1")), None);
        assert_eq!(parse_value(&q("-0.5")), None);
    }

    #[test]
    fn formats_canonically() {
        assert_eq!(format_milli(2000).0, "2");
        assert_eq!(format_milli(1500).0, "1500m");
        assert_eq!(format_value(1073741824).0, "1073741824");
    }

    #[test]
    fn parse_format_round_trip() {
        for milli in [250, 1000, 1500, 8000] {
            assert_eq!(parse_milli(&format_milli(milli)), Some(milli));
        }
    }
}
