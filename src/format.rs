use rust_decimal::{Decimal, RoundingStrategy};

/// Presentation scale used when the caller doesn't ask for one.
pub const DEFAULT_DISPLAY_SCALE: u32 = 2;

/// Round a value for presentation using banker's rounding (half to even).
///
/// Calculations keep full precision; this is only applied at the edge.
pub fn round_for_display(value: Decimal, scale: u32) -> Decimal {
    let mut rounded = value.round_dp_with_strategy(scale, RoundingStrategy::MidpointNearestEven);
    // Pad so "32000" renders as "32000.00".
    rounded.rescale(scale);
    rounded
}

/// Format a monetary amount with exactly `scale` decimal places.
///
/// ```
/// use quotebook::format::format_amount;
/// use rust_decimal::Decimal;
/// use std::str::FromStr;
///
/// assert_eq!(format_amount(Decimal::from(32000), 2), "32000.00");
/// assert_eq!(format_amount(Decimal::from_str("2.345").unwrap(), 2), "2.34");
/// ```
pub fn format_amount(value: Decimal, scale: u32) -> String {
    round_for_display(value, scale).to_string()
}

/// Format a quantity without trailing zeros (e.g. `0.50000000` -> `0.5`).
pub fn format_quantity(value: Decimal) -> String {
    value.normalize().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_bankers_rounding_half_to_even() {
        assert_eq!(format_amount(dec!(2.345), 2), "2.34");
        assert_eq!(format_amount(dec!(2.355), 2), "2.36");
        assert_eq!(format_amount(dec!(-2.345), 2), "-2.34");
        assert_eq!(format_amount(dec!(0.5), 0), "0");
        assert_eq!(format_amount(dec!(1.5), 0), "2");
    }

    #[test]
    fn test_pads_to_scale() {
        assert_eq!(format_amount(dec!(32000), 2), "32000.00");
        assert_eq!(format_amount(dec!(1.1), 4), "1.1000");
    }

    #[test]
    fn test_non_midpoint_rounds_normally() {
        assert_eq!(format_amount(dec!(30000.0049), 2), "30000.00");
        assert_eq!(format_amount(dec!(30000.0051), 2), "30000.01");
    }

    #[test]
    fn test_format_quantity_strips_zeros() {
        assert_eq!(format_quantity(dec!(0.50000000)), "0.5");
        assert_eq!(format_quantity(dec!(10.00000000)), "10");
    }
}
