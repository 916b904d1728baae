//! Consumption tax.
//!
//! The rate is fixed at 10% and rounding truncates toward zero. Every
//! downstream total reuses these semantics; mixing rounding rules here
//! would leave invoices that no longer reconcile to the yen.

pub const TAX_RATE_PERCENT: i64 = 10;

/// Tax on a tax-exclusive amount, truncated toward zero.
pub fn calculate_tax(subtotal: i64) -> i64 {
    subtotal * TAX_RATE_PERCENT / 100
}

/// Tax-inclusive total for a tax-exclusive amount.
pub fn calculate_total_with_tax(subtotal: i64) -> i64 {
    subtotal + calculate_tax(subtotal)
}

/// Exact inverse of [`calculate_total_with_tax`] for values it produced.
///
/// Recovers the pre-tax amount of a tax-inclusive proration charge so that
/// re-adding tax reproduces the stored charge to the yen. For a gross value
/// the forward path cannot produce, this settles on the largest net whose
/// taxed total does not exceed `gross`.
pub fn subtotal_from_gross(gross: i64) -> i64 {
    let mut net = gross * 100 / (100 + TAX_RATE_PERCENT);
    while calculate_total_with_tax(net) < gross {
        net += 1;
    }
    while calculate_total_with_tax(net) > gross {
        net -= 1;
    }
    net
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ten_percent_with_floor() {
        assert_eq!(calculate_tax(41_200), 4_120);
        assert_eq!(calculate_total_with_tax(41_200), 45_320);
        assert_eq!(calculate_tax(1_234), 123);
        assert_eq!(calculate_tax(0), 0);
    }

    #[test]
    fn negative_amounts_truncate_toward_zero() {
        assert_eq!(calculate_tax(-15), -1);
        assert_eq!(calculate_tax(-1_466), -146);
        assert_eq!(calculate_total_with_tax(-1_466), -1_612);
    }

    #[test]
    fn gross_round_trips_to_the_original_net() {
        for net in -2_000..2_000 {
            let gross = calculate_total_with_tax(net);
            assert_eq!(subtotal_from_gross(gross), net, "net {}", net);
        }
    }

    #[test]
    fn tax_is_not_reapplied_on_gross_amounts() {
        // Sanity check against double-taxing: taxing a gross total yields a
        // different figure than taxing the net it came from.
        assert_ne!(calculate_tax(calculate_total_with_tax(41_200)), calculate_tax(41_200));
    }

    #[test]
    fn unreachable_gross_settles_below() {
        // 21 is not producible by the forward path (19 -> 20, 20 -> 22).
        assert_eq!(subtotal_from_gross(21), 19);
    }
}
