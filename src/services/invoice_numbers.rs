//! Invoice number allocation.
//!
//! Numbers have the form `{receipt_book}-{sequence:08}` and start at
//! `00000001` for every receipt book. The next sequence is derived from the
//! greatest number already issued for the book. Past `99999999` the sequence
//! grows a ninth digit, so "greatest" compares length before text.
//!
//! Inside a batch the starting sequence is read once, under the receipt book
//! lock, and an [`InvoiceSequence`] hands out the following numbers.

use std::cmp::Ordering;

use rand::Rng;

use crate::{error::AppError, models::billing_batch::RECEIPT_BOOK_MAX_LEN, store::BillingStore};

/// Length of the simulated authorization code.
pub const CAE_LENGTH: usize = 14;

/// Reject receipt books that are empty or longer than the column allows.
pub fn validate_receipt_book(receipt_book: &str) -> Result<(), AppError> {
    if receipt_book.trim().is_empty() {
        return Err(AppError::InvalidRequest(
            "receipt_book must not be empty".to_string(),
        ));
    }
    if receipt_book.chars().count() > RECEIPT_BOOK_MAX_LEN {
        return Err(AppError::InvalidRequest(format!(
            "receipt_book must be at most {} characters",
            RECEIPT_BOOK_MAX_LEN
        )));
    }
    Ok(())
}

/// Sequence that follows the given last number (1 when there is none or it
/// has no numeric suffix).
pub fn next_sequence(last_number: Option<&str>) -> u64 {
    last_number
        .and_then(|number| number.rsplit_once('-'))
        .and_then(|(_, suffix)| suffix.parse::<u64>().ok())
        .map_or(1, |last| last + 1)
}

/// Order of two numbers from the same receipt book.
pub fn invoice_number_order(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

pub fn format_invoice_number(receipt_book: &str, sequence: u64) -> String {
    format!("{}-{:08}", receipt_book, sequence)
}

/// Next invoice number for a receipt book, without reserving it.
pub async fn next_invoice_number(
    store: &dyn BillingStore,
    receipt_book: &str,
) -> Result<String, AppError> {
    validate_receipt_book(receipt_book)?;
    let last = store.last_invoice_number(receipt_book).await?;
    Ok(format_invoice_number(
        receipt_book,
        next_sequence(last.as_deref()),
    ))
}

/// In-memory counter used while a batch holds the receipt book lock.
#[derive(Debug)]
pub struct InvoiceSequence {
    receipt_book: String,
    next: u64,
}

impl InvoiceSequence {
    pub fn starting_after(receipt_book: &str, last_number: Option<&str>) -> Self {
        Self {
            receipt_book: receipt_book.to_string(),
            next: next_sequence(last_number),
        }
    }

    /// Hand out the next number and advance the counter.
    pub fn allocate(&mut self) -> String {
        let number = format_invoice_number(&self.receipt_book, self.next);
        self.next += 1;
        number
    }
}

/// Simulated 14-digit authorization code: millisecond timestamp followed by
/// random digits, truncated.
pub fn generate_cae() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let random: u32 = rand::rng().random_range(0..10_000);
    let mut cae = format!("{}{:04}", millis, random);
    cae.truncate(CAE_LENGTH);
    cae
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_number_of_a_book() {
        assert_eq!(next_sequence(None), 1);
        assert_eq!(format_invoice_number("A-0001", 1), "A-0001-00000001");
    }

    #[test]
    fn continues_after_last_number() {
        assert_eq!(next_sequence(Some("A-0001-00000042")), 43);
        assert_eq!(next_sequence(Some("B-99999999")), 100_000_000);
    }

    #[test]
    fn unparseable_suffix_restarts_at_one() {
        assert_eq!(next_sequence(Some("A-0001-XYZ")), 1);
        assert_eq!(next_sequence(Some("nodash")), 1);
    }

    #[test]
    fn sequence_allocates_consecutive_numbers() {
        let mut seq = InvoiceSequence::starting_after("A-0001", Some("A-0001-00000002"));
        assert_eq!(seq.allocate(), "A-0001-00000003");
        assert_eq!(seq.allocate(), "A-0001-00000004");
    }

    #[test]
    fn sequence_keeps_growing_past_eight_digits() {
        let mut seq = InvoiceSequence::starting_after("A", Some("A-99999999"));
        let first = seq.allocate();
        assert_eq!(first, "A-100000000");

        let mut issued = vec!["A-99999998".to_string(), "A-99999999".to_string(), first];
        issued.sort_by(|a, b| invoice_number_order(a, b));
        let last = issued.last().map(String::as_str);
        assert_eq!(last, Some("A-100000000"));

        let mut next = InvoiceSequence::starting_after("A", last);
        assert_eq!(next.allocate(), "A-100000001");
    }

    #[test]
    fn receipt_book_length_is_bounded() {
        assert!(validate_receipt_book("A-0001").is_ok());
        assert!(validate_receipt_book("  ").is_err());
        assert!(validate_receipt_book(&"x".repeat(51)).is_err());
        assert!(validate_receipt_book(&"x".repeat(50)).is_ok());
    }

    #[test]
    fn cae_is_fourteen_digits() {
        let cae = generate_cae();
        assert_eq!(cae.len(), CAE_LENGTH);
        assert!(cae.chars().all(|c| c.is_ascii_digit()));
    }
}
