// Price rounding and bounds.
//
// Every price the engine produces is rounded to the nearest 1,000 units and
// kept inside [MIN_PRICE, MAX_PRICE].

pub const MIN_PRICE: i64 = 1_000_000;
pub const MAX_PRICE: i64 = 5_000_000_000;
pub const PRICE_STEP: i64 = 1_000;

/// Round a raw value to the nearest multiple of [`PRICE_STEP`].
///
/// Non-finite input rounds to 0.
pub fn round_to_step(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    let step = PRICE_STEP as f64;
    ((value / step).round() * step) as i64
}

/// Clamp a raw value into the global price bounds, then round it.
pub fn bounded_price(value: f64) -> i64 {
    if !value.is_finite() {
        return 0;
    }
    round_to_step(value.clamp(MIN_PRICE as f64, MAX_PRICE as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_half_up_to_nearest_thousand() {
        assert_eq!(round_to_step(815_200_499.0), 815_200_000);
        assert_eq!(round_to_step(815_200_500.0), 815_201_000);
        assert_eq!(round_to_step(999.0), 1_000);
    }

    #[test]
    fn bounded_price_respects_limits() {
        assert_eq!(bounded_price(12.0), MIN_PRICE);
        assert_eq!(bounded_price(9e12), MAX_PRICE);
        assert_eq!(bounded_price(123_456_789.0), 123_457_000);
    }

    #[test]
    fn non_finite_input_is_zero() {
        assert_eq!(round_to_step(f64::NAN), 0);
        assert_eq!(bounded_price(f64::INFINITY), 0);
    }
}
