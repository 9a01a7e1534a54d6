/// Renders a price for display; zero is shown as "Free".
pub fn format_price(cents: i64) -> String {
    if cents == 0 {
        "Free".to_string()
    } else {
        format!("${}", format_money(cents))
    }
}

pub fn format_money(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

/// Parses a non-negative decimal amount with at most two fraction digits.
/// Blank input means zero.
pub fn parse_price_to_cents(input: &str) -> Option<i64> {
    let s = input.trim().replace(',', ".");
    if s.is_empty() {
        return Some(0);
    }
    if s.starts_with('-') || s.starts_with('+') {
        return None;
    }
    let (whole_str, frac_str) = match s.split_once('.') {
        Some((whole, frac)) => (whole, Some(frac)),
        None => (s.as_str(), None),
    };
    let whole: i64 = if whole_str.is_empty() {
        0
    } else {
        whole_str.parse().ok()?
    };
    let frac = match frac_str {
        None => 0,
        Some(frac) => {
            if frac.is_empty() || frac.len() > 2 || !frac.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: i64 = frac.parse().ok()?;
            if frac.len() == 1 { value * 10 } else { value }
        }
    };
    whole.checked_mul(100)?.checked_add(frac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whole_and_fractional_amounts() {
        assert_eq!(parse_price_to_cents("75"), Some(7500));
        assert_eq!(parse_price_to_cents("10.5"), Some(1050));
        assert_eq!(parse_price_to_cents("0,99"), Some(99));
        assert_eq!(parse_price_to_cents(".25"), Some(25));
        assert_eq!(parse_price_to_cents("  "), Some(0));
    }

    #[test]
    fn rejects_negative_and_malformed_amounts() {
        assert_eq!(parse_price_to_cents("-1"), None);
        assert_eq!(parse_price_to_cents("1.234"), None);
        assert_eq!(parse_price_to_cents("1.2.3"), None);
        assert_eq!(parse_price_to_cents("abc"), None);
        assert_eq!(parse_price_to_cents("5."), None);
        assert_eq!(parse_price_to_cents("92233720368547759"), None);
    }

    #[test]
    fn formats_prices() {
        assert_eq!(format_price(0), "Free");
        assert_eq!(format_price(7500), "$75.00");
        assert_eq!(format_money(1005), "10.05");
        assert_eq!(format_money(-250), "-2.50");
    }
}
