//! Billing pending queries and cancellation.

use std::collections::BTreeMap;

use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::{
        billing_pending::{
            CustomerTotal, PendingFilter, PendingStatus, PendingSummary, PendingWithService,
        },
        pagination::Page,
        service::ServiceStatus,
    },
    store::BillingStore,
};

pub async fn list_pendings(
    store: &dyn BillingStore,
    filter: &PendingFilter,
) -> Result<Page<PendingWithService>, AppError> {
    store.list_pendings(filter).await
}

pub async fn get_pending(store: &dyn BillingStore, id: i64) -> Result<PendingWithService, AppError> {
    store
        .get_pending(id)
        .await?
        .ok_or_else(|| AppError::not_found("BillingPending", id))
}

/// Everything that can still be put in a batch, oldest first.
pub async fn available_pendings(
    store: &dyn BillingStore,
) -> Result<Vec<PendingWithService>, AppError> {
    store.open_pendings().await
}

/// Totals of the open pendings, overall and per customer (largest amount first).
pub async fn summary(store: &dyn BillingStore) -> Result<PendingSummary, AppError> {
    let open = store.open_pendings().await?;
    Ok(summarize(&open))
}

fn summarize(open: &[PendingWithService]) -> PendingSummary {
    let mut by_customer: BTreeMap<i64, (i64, Decimal)> = BTreeMap::new();
    let mut total_amount = Decimal::ZERO;

    for service in open.iter().filter_map(|p| p.service.as_ref()) {
        let entry = by_customer.entry(service.customer_id).or_default();
        entry.0 += 1;
        entry.1 += service.amount;
        total_amount += service.amount;
    }

    let mut by_customer: Vec<CustomerTotal> = by_customer
        .into_iter()
        .map(|(customer_id, (count, total_amount))| CustomerTotal {
            customer_id,
            count,
            total_amount,
        })
        .collect();
    by_customer.sort_by(|a, b| b.total_amount.cmp(&a.total_amount));

    PendingSummary {
        total_pending: open.len() as i64,
        total_amount,
        by_customer,
    }
}

/// Cancel a pending that has not been invoiced.
///
/// # Process
///
/// 1. Lock the pending
/// 2. Reject it if it was already invoiced
/// 3. Move its service back to `CREATED`
/// 4. Delete the pending
///
/// # Errors
///
/// - `NotFound`: Pending doesn't exist
/// - `Conflict`: Pending has already been invoiced
pub async fn cancel_pending(store: &dyn BillingStore, id: i64) -> Result<(), AppError> {
    // Start unit of work
    let mut uow = store.begin().await?;

    let Some(item) = uow.lock_pendings(&[id]).await?.into_iter().next() else {
        uow.rollback().await?;
        return Err(AppError::not_found("BillingPending", id));
    };

    if item.pending.status != PendingStatus::Pending {
        uow.rollback().await?;
        return Err(AppError::Conflict(format!(
            "Billing pending {} has already been invoiced",
            id
        )));
    }

    if item.service.is_some() {
        uow.set_service_status(item.pending.service_id, ServiceStatus::Created)
            .await?;
    }
    uow.delete_pending(id).await?;

    // Commit all changes atomically
    uow.commit().await?;

    tracing::info!("Billing pending {} cancelled", id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{billing_pending::BillingPending, service::Service};
    use chrono::{NaiveDate, Utc};

    fn open(id: i64, customer_id: i64, cents: i64) -> PendingWithService {
        let now = Utc::now();
        PendingWithService {
            pending: BillingPending {
                id,
                service_id: id,
                status: PendingStatus::Pending,
                created_at: now,
                updated_at: now,
            },
            service: Some(Service {
                id,
                service_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
                customer_id,
                amount: Decimal::new(cents, 2),
                status: ServiceStatus::SentToBill,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    #[test]
    fn summary_groups_by_customer() {
        let summary = summarize(&[open(1, 10, 5000), open(2, 20, 20000), open(3, 10, 2500)]);

        assert_eq!(summary.total_pending, 3);
        assert_eq!(summary.total_amount, Decimal::new(27500, 2));
        assert_eq!(summary.by_customer[0].customer_id, 20);
        assert_eq!(summary.by_customer[1].count, 2);
        assert_eq!(summary.by_customer[1].total_amount, Decimal::new(7500, 2));
    }
}
