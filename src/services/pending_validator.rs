//! Pending validator - decides which requested pendings can be invoiced.
//!
//! A pending is valid when it exists, is still `PENDING`, and is linked to a
//! service. Everything else is reported back with a reason; nothing here
//! mutates state.

use std::collections::{HashMap, HashSet};

use crate::{
    error::AppError,
    models::{
        billing_pending::{PendingStatus, PendingWithService},
        service::{RejectedItem, Service},
    },
    store::BillingStore,
};

/// A pending that passed validation, with its service resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidPending {
    pub pending_id: i64,
    pub service: Service,
}

/// Requested ids split into valid and invalid, both in request order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingValidation {
    pub valid: Vec<ValidPending>,
    pub invalid: Vec<RejectedItem>,
}

impl PendingValidation {
    pub fn valid_ids(&self) -> Vec<i64> {
        self.valid.iter().map(|v| v.pending_id).collect()
    }
}

/// Split requested ids against the rows that were found for them.
///
/// Duplicate ids are collapsed to their first occurrence.
pub fn partition(requested: &[i64], found: Vec<PendingWithService>) -> PendingValidation {
    let mut by_id: HashMap<i64, PendingWithService> =
        found.into_iter().map(|p| (p.pending.id, p)).collect();
    let mut seen = HashSet::new();
    let mut validation = PendingValidation::default();

    for &id in requested {
        if !seen.insert(id) {
            continue;
        }

        match by_id.remove(&id) {
            None => validation
                .invalid
                .push(RejectedItem::new(id, "Billing pending not found")),
            Some(item) if item.pending.status != PendingStatus::Pending => {
                validation.invalid.push(RejectedItem::new(
                    id,
                    format!("Pending is already in status '{}'", item.pending.status),
                ))
            }
            Some(PendingWithService { service: None, .. }) => validation
                .invalid
                .push(RejectedItem::new(id, "Service not found for pending")),
            Some(PendingWithService {
                service: Some(service),
                ..
            }) => validation.valid.push(ValidPending {
                pending_id: id,
                service,
            }),
        }
    }

    validation
}

/// Validate pending ids against the store with one batched read.
pub async fn validate(
    store: &dyn BillingStore,
    pending_ids: &[i64],
) -> Result<PendingValidation, AppError> {
    let found = store.find_pendings(pending_ids).await?;
    Ok(partition(pending_ids, found))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{billing_pending::BillingPending, service::ServiceStatus};
    use chrono::{NaiveDate, Utc};
    use rust_decimal::Decimal;

    fn pending(id: i64, status: PendingStatus, with_service: bool) -> PendingWithService {
        let now = Utc::now();
        PendingWithService {
            pending: BillingPending {
                id,
                service_id: id * 10,
                status,
                created_at: now,
                updated_at: now,
            },
            service: with_service.then(|| Service {
                id: id * 10,
                service_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
                customer_id: 1,
                amount: Decimal::new(10000, 2),
                status: ServiceStatus::SentToBill,
                created_at: now,
                updated_at: now,
            }),
        }
    }

    #[test]
    fn splits_in_request_order_with_reasons() {
        let found = vec![
            pending(3, PendingStatus::Pending, true),
            pending(1, PendingStatus::Pending, true),
            pending(2, PendingStatus::Invoiced, true),
            pending(5, PendingStatus::Pending, false),
        ];

        let result = partition(&[1, 2, 3, 4, 5], found);

        assert_eq!(result.valid_ids(), vec![1, 3]);
        assert_eq!(
            result.invalid,
            vec![
                RejectedItem::new(2, "Pending is already in status 'INVOICED'"),
                RejectedItem::new(4, "Billing pending not found"),
                RejectedItem::new(5, "Service not found for pending"),
            ]
        );
    }

    #[test]
    fn duplicate_ids_count_once() {
        let result = partition(&[1, 1, 1], vec![pending(1, PendingStatus::Pending, true)]);
        assert_eq!(result.valid_ids(), vec![1]);
        assert!(result.invalid.is_empty());
    }

    #[test]
    fn nothing_found_means_everything_invalid() {
        let result = partition(&[8, 9], Vec::new());
        assert!(result.valid.is_empty());
        assert_eq!(result.invalid.len(), 2);
    }
}
