use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use std::str::FromStr;

/// Result of running a raw percent field through the input mask.
///
/// `display` is what the field shows ("12.5%"), `stored` the fraction that
/// gets persisted, clamped to [0, 1] and rounded to 4 decimal places.
#[derive(Debug, Clone, PartialEq)]
pub struct PercentInput {
    pub display: String,
    pub stored: Option<f64>,
}

impl PercentInput {
    pub fn parse(raw: &str) -> Self {
        match leading_number(raw) {
            Some(value) => {
                let clamped = value.clamp(Decimal::ZERO, dec!(100)).normalize();
                let fraction = (clamped / dec!(100))
                    .round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero);
                Self {
                    display: format!("{}%", clamped),
                    stored: fraction.to_f64(),
                }
            }
            None => Self {
                display: String::new(),
                stored: None,
            },
        }
    }
}

/// Renders a stored fraction back as a percentage with two decimals.
pub fn format_fraction(fraction: f64) -> String {
    format!("{:.2}%", fraction * 100.0)
}

/// Keeps only digits and dots, then reads the longest `digits[.digits]`
/// prefix. Values too large for a Decimal saturate at the clamp ceiling.
fn leading_number(raw: &str) -> Option<Decimal> {
    let filtered: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    let mut int_part = String::new();
    let mut frac_part = String::new();
    let mut seen_dot = false;
    for c in filtered.chars() {
        if c == '.' {
            if seen_dot {
                break;
            }
            seen_dot = true;
        } else if seen_dot {
            frac_part.push(c);
        } else {
            int_part.push(c);
        }
    }

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let normalized = format!(
        "{}.{}",
        if int_part.is_empty() { "0" } else { &int_part },
        if frac_part.is_empty() { "0" } else { &frac_part }
    );

    match Decimal::from_str(&normalized) {
        Ok(value) => Some(value),
        Err(_) if !int_part.trim_start_matches('0').is_empty() => Some(dec!(100)),
        Err(_) => Some(Decimal::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_percent_scales_to_fraction() {
        let p = PercentInput::parse("50");
        assert_eq!(p.stored, Some(0.5));
        assert_eq!(p.display, "50%");
    }

    #[test]
    fn test_values_above_hundred_clamp() {
        let p = PercentInput::parse("250");
        assert_eq!(p.stored, Some(1.0));
        assert_eq!(p.display, "100%");

        let huge = PercentInput::parse("999999999999999999999999999999999");
        assert_eq!(huge.stored, Some(1.0));
    }

    #[test]
    fn test_rounds_to_four_places() {
        assert_eq!(PercentInput::parse("12.345").stored, Some(0.1235));
        assert_eq!(PercentInput::parse("33.33333").stored, Some(0.3333));
        assert_eq!(PercentInput::parse("0.004").stored, Some(0.0));
    }

    #[test]
    fn test_noise_characters_are_stripped() {
        assert_eq!(PercentInput::parse("12.5%").stored, Some(0.125));
        assert_eq!(PercentInput::parse("-20").stored, Some(0.2));
        assert_eq!(PercentInput::parse("1.2.3").stored, Some(0.012));
        assert_eq!(PercentInput::parse(".5").stored, Some(0.005));
    }

    #[test]
    fn test_non_numeric_input_clears_value() {
        let p = PercentInput::parse("abc");
        assert_eq!(p.stored, None);
        assert_eq!(p.display, "");
        assert_eq!(PercentInput::parse("").stored, None);
        assert_eq!(PercentInput::parse(".").stored, None);
    }

    #[test]
    fn test_format_fraction() {
        assert_eq!(format_fraction(0.5), "50.00%");
        assert_eq!(format_fraction(1.0), "100.00%");
    }
}
