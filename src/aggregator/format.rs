/// Formats `value` the way C's `printf("%.*g", precision, value)` would:
/// the shorter of fixed and scientific notation, `precision` significant
/// digits, trailing zeros stripped. The parser needs this because the
/// spec's counter re-serialization is defined in terms of `%.15g`.
///
/// This targets the magnitudes statsd counters actually take (small
/// integers and low-precision sums); it is not a bit-for-bit port of
/// glibc's dtoa for extreme exponents. See DESIGN.md.
pub fn format_g(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let precision = precision.max(1) as i32;
    let exponent = value.abs().log10().floor() as i32;

    if exponent < -4 || exponent >= precision {
        format_scientific(value, precision as usize)
    } else {
        let decimals = (precision - 1 - exponent).max(0) as usize;
        let fixed = format!("{:.*}", decimals, value);
        trim_trailing(&fixed)
    }
}

fn trim_trailing(s: &str) -> String {
    if !s.contains('.') {
        return s.to_string();
    }
    let trimmed = s.trim_end_matches('0');
    let trimmed = trimmed.trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

fn format_scientific(value: f64, precision: usize) -> String {
    let mantissa_digits = precision.saturating_sub(1);
    let formatted = format!("{:.*e}", mantissa_digits, value);
    match formatted.find('e') {
        Some(pos) => {
            let (mantissa, exp) = formatted.split_at(pos);
            let exp_num: i32 = exp[1..].parse().unwrap_or(0);
            let mantissa = trim_trailing(mantissa);
            format!("{}e{}{:02}", mantissa, if exp_num >= 0 { "+" } else { "-" }, exp_num.abs())
        }
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_have_no_decimal_point() {
        assert_eq!(format_g(6.0, 15), "6");
        assert_eq!(format_g(100.0, 15), "100");
        assert_eq!(format_g(5.0, 15), "5");
    }

    #[test]
    fn fractional_sums_keep_significant_digits() {
        assert_eq!(format_g(3.3333333333333335, 15), "3.33333333333333");
    }

    #[test]
    fn negative_values_round_trip() {
        assert_eq!(format_g(-2.5, 15), "-2.5");
    }
}
