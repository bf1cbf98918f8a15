use crate::limits::PRICE_TOLERANCE;

/// Outcome of reconciling a client amount against the published rate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PriceCheck {
    Ok,
    Mismatch { expected: f64, actual: f64 },
}

/// `rate × quantity × duration`, rounded to cents.
pub fn expected_amount(rate: f64, quantity: u32, duration: i64) -> f64 {
    round_cents(rate * f64::from(quantity) * duration as f64)
}

/// Compare with an absolute tolerance. A mismatch is never corrected silently.
pub fn validate(rate: f64, quantity: u32, duration: i64, client_amount: f64) -> PriceCheck {
    let expected = expected_amount(rate, quantity, duration);
    // NaN compares false, so a non-finite amount falls through to Mismatch
    if (expected - client_amount).abs() <= PRICE_TOLERANCE + f64::EPSILON * expected.abs() {
        PriceCheck::Ok
    } else {
        PriceCheck::Mismatch {
            expected,
            actual: client_amount,
        }
    }
}

fn round_cents(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_amount_accepted() {
        assert_eq!(validate(100.0, 2, 3, 600.00), PriceCheck::Ok);
    }

    #[test]
    fn off_by_one_unit_rejected() {
        assert_eq!(
            validate(100.0, 2, 3, 601.00),
            PriceCheck::Mismatch {
                expected: 600.00,
                actual: 601.00
            }
        );
    }

    #[test]
    fn rounding_drift_absorbed() {
        // 3 nights at 33.33 computed client-side in a different order
        assert_eq!(validate(33.33, 1, 3, 99.99), PriceCheck::Ok);
        assert_eq!(validate(0.1, 3, 1, 0.1 + 0.1 + 0.1), PriceCheck::Ok);
        assert_eq!(validate(19.99, 3, 7, 419.79), PriceCheck::Ok);
    }

    #[test]
    fn tolerance_is_absolute() {
        assert_eq!(validate(5000.0, 2, 2, 20_000.01), PriceCheck::Ok);
        assert!(matches!(validate(5000.0, 2, 2, 20_000.02), PriceCheck::Mismatch { .. }));
        assert!(matches!(validate(5000.0, 2, 2, 19_999.98), PriceCheck::Mismatch { .. }));
    }

    #[test]
    fn underpayment_rejected() {
        assert!(matches!(validate(1500.0, 1, 4, 1500.0), PriceCheck::Mismatch { expected, .. } if expected == 6000.0));
    }

    #[test]
    fn non_finite_amount_rejected() {
        assert!(matches!(validate(100.0, 1, 1, f64::NAN), PriceCheck::Mismatch { .. }));
        assert!(matches!(validate(100.0, 1, 1, f64::INFINITY), PriceCheck::Mismatch { .. }));
    }
}
