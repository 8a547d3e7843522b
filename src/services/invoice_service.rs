//! Invoice queries and statistics.

use std::collections::BTreeMap;

use chrono::Datelike;
use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::{
        billing_pending::CustomerTotal,
        invoice::{InvoiceCriteria, InvoiceDetail, InvoiceFilter, InvoiceStatistics, MonthTotal},
        pagination::Page,
    },
    store::BillingStore,
};

pub async fn list_invoices(
    store: &dyn BillingStore,
    filter: &InvoiceFilter,
) -> Result<Page<InvoiceDetail>, AppError> {
    store.list_invoices(filter).await
}

pub async fn get_invoice(store: &dyn BillingStore, id: i64) -> Result<InvoiceDetail, AppError> {
    store
        .get_invoice(id)
        .await?
        .ok_or_else(|| AppError::not_found("Invoice", id))
}

pub async fn get_by_number(
    store: &dyn BillingStore,
    invoice_number: &str,
) -> Result<InvoiceDetail, AppError> {
    store
        .get_invoice_by_number(invoice_number)
        .await?
        .ok_or_else(|| AppError::not_found("Invoice", invoice_number))
}

/// Invoices of a batch, in number order.
pub async fn by_batch(
    store: &dyn BillingStore,
    batch_id: i64,
) -> Result<Vec<InvoiceDetail>, AppError> {
    store.find_invoices(&InvoiceCriteria::batch(batch_id)).await
}

/// Invoices of a customer, most recent issue date first.
pub async fn by_customer(
    store: &dyn BillingStore,
    customer_id: i64,
) -> Result<Vec<InvoiceDetail>, AppError> {
    let mut invoices = store
        .find_invoices(&InvoiceCriteria::customer(customer_id))
        .await?;
    invoices.sort_by(|a, b| {
        b.issue_date
            .cmp(&a.issue_date)
            .then_with(|| b.invoice_number.cmp(&a.invoice_number))
    });
    Ok(invoices)
}

pub async fn statistics(store: &dyn BillingStore) -> Result<InvoiceStatistics, AppError> {
    let invoices = store.find_invoices(&InvoiceCriteria::default()).await?;
    Ok(compute_statistics(&invoices))
}

fn compute_statistics(invoices: &[InvoiceDetail]) -> InvoiceStatistics {
    let mut total_amount = Decimal::ZERO;
    let mut by_month: BTreeMap<String, (i64, Decimal)> = BTreeMap::new();
    let mut by_customer: BTreeMap<i64, (i64, Decimal)> = BTreeMap::new();

    for invoice in invoices {
        total_amount += invoice.amount;

        let month = format!(
            "{:04}-{:02}",
            invoice.issue_date.year(),
            invoice.issue_date.month()
        );
        let entry = by_month.entry(month).or_default();
        entry.0 += 1;
        entry.1 += invoice.amount;

        if let Some(customer_id) = invoice.customer_id {
            let entry = by_customer.entry(customer_id).or_default();
            entry.0 += 1;
            entry.1 += invoice.amount;
        }
    }

    let total_invoices = invoices.len() as i64;
    let average_amount = if total_invoices > 0 {
        (total_amount / Decimal::from(total_invoices)).round_dp(2)
    } else {
        Decimal::ZERO
    };

    // Newest month first
    let by_month = by_month
        .into_iter()
        .rev()
        .map(|(month, (count, total_amount))| MonthTotal {
            month,
            count,
            total_amount,
        })
        .collect();

    let mut by_customer: Vec<CustomerTotal> = by_customer
        .into_iter()
        .map(|(customer_id, (count, total_amount))| CustomerTotal {
            customer_id,
            count,
            total_amount,
        })
        .collect();
    by_customer.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));

    InvoiceStatistics {
        total_invoices,
        total_amount,
        average_amount,
        by_month,
        by_customer,
    }
}
