//! Invoice number formatting and sequence scanning.
//!
//! Numbers are `INV-{year}-{month:02}-{seq:03}`, gap-free and strictly
//! increasing per tenant per calendar month. The scan here is the
//! bootstrap/fallback path: production allocation goes through the store's
//! atomic counter ([`crate::services::repository::BillingStore::allocate_invoice_sequence`]),
//! because two callers scanning the same snapshot compute the same "next"
//! number and one of them must lose as a retryable conflict.

pub fn invoice_number_prefix(year: i32, month: u32) -> String {
    format!("INV-{}-{:02}-", year, month)
}

pub fn format_invoice_number(year: i32, month: u32, sequence: i64) -> String {
    format!("INV-{}-{:02}-{:03}", year, month, sequence)
}

/// Trailing sequence of a number carrying this month's prefix.
pub fn parse_sequence(number: &str, year: i32, month: u32) -> Option<i64> {
    let prefix = invoice_number_prefix(year, month);
    number.strip_prefix(&prefix)?.parse().ok()
}

/// Next number from a scan of existing ones: max trailing sequence + 1,
/// starting at 001 when the month has no invoices yet.
pub fn next_invoice_number(existing: &[String], year: i32, month: u32) -> String {
    let max_sequence = existing
        .iter()
        .filter_map(|number| parse_sequence(number, year, month))
        .max()
        .unwrap_or(0);
    format_invoice_number(year, month, max_sequence + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_after_two_existing() {
        let existing = vec![
            "INV-2025-11-001".to_string(),
            "INV-2025-11-002".to_string(),
        ];
        assert_eq!(next_invoice_number(&existing, 2025, 11), "INV-2025-11-003");
    }

    #[test]
    fn first_of_the_month() {
        assert_eq!(next_invoice_number(&[], 2025, 11), "INV-2025-11-001");
    }

    #[test]
    fn other_months_and_garbage_are_ignored() {
        let existing = vec![
            "INV-2025-10-009".to_string(),
            "INV-2024-11-044".to_string(),
            "RCPT-2025-11-001".to_string(),
            "INV-2025-11-xyz".to_string(),
            "INV-2025-11-002".to_string(),
        ];
        assert_eq!(next_invoice_number(&existing, 2025, 11), "INV-2025-11-003");
    }

    #[test]
    fn sequence_pads_to_three_digits_and_grows_past_them() {
        assert_eq!(format_invoice_number(2025, 3, 7), "INV-2025-03-007");
        assert_eq!(format_invoice_number(2025, 3, 1234), "INV-2025-03-1234");
        assert_eq!(parse_sequence("INV-2025-03-1234", 2025, 3), Some(1234));
    }

    #[test]
    fn gaps_resume_from_the_max() {
        // A scan resumes after the highest allocated number, never refilling
        // holes left by failed attempts.
        let existing = vec!["INV-2025-11-005".to_string()];
        assert_eq!(next_invoice_number(&existing, 2025, 11), "INV-2025-11-006");
    }
}
