//! Service administration - create, edit, delete and send to billing.
//!
//! Edits and deletes are only allowed while a service is `CREATED`; the check
//! runs under a row lock so it cannot race with send-to-billing.

use rust_decimal::Decimal;

use crate::{
    error::AppError,
    models::service::{
        CreateServiceRequest, NewService, RejectedItem, SendToBillingResponse, Service,
        ServiceStatus, UpdateServiceRequest,
    },
    store::{BillingStore, UnitOfWork},
};

fn validate_fields(customer_id: i64, amount: Decimal) -> Result<(), AppError> {
    if customer_id <= 0 {
        return Err(AppError::InvalidRequest(
            "customer_id must be positive".to_string(),
        ));
    }
    if amount <= Decimal::ZERO {
        return Err(AppError::InvalidRequest(
            "Amount must be positive".to_string(),
        ));
    }
    if amount.scale() > 2 && amount != amount.round_dp(2) {
        return Err(AppError::InvalidRequest(
            "Amount must have at most two decimal places".to_string(),
        ));
    }
    Ok(())
}

/// Lock a service and require it to still be `CREATED`.
async fn lock_editable(
    uow: &mut dyn UnitOfWork,
    id: i64,
    action: &str,
) -> Result<Service, AppError> {
    let service = uow
        .lock_services(&[id])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::not_found("Service", id))?;

    if service.status != ServiceStatus::Created {
        return Err(AppError::BusinessRule(format!(
            "Cannot {} service in status '{}'. Only services with status 'CREATED' can be {}d.",
            action, service.status, action
        )));
    }
    Ok(service)
}

pub async fn create_service(
    store: &dyn BillingStore,
    request: CreateServiceRequest,
) -> Result<Service, AppError> {
    validate_fields(request.customer_id, request.amount)?;

    let service = store
        .insert_service(NewService {
            service_date: request.service_date,
            customer_id: request.customer_id,
            amount: request.amount.round_dp(2),
        })
        .await?;

    tracing::info!("Service {} created for customer {}", service.id, service.customer_id);
    Ok(service)
}

pub async fn get_service(store: &dyn BillingStore, id: i64) -> Result<Service, AppError> {
    store
        .get_service(id)
        .await?
        .ok_or_else(|| AppError::not_found("Service", id))
}

/// Apply the provided fields to a `CREATED` service.
///
/// # Errors
///
/// - `NotFound`: Service doesn't exist
/// - `BusinessRule`: Service has left `CREATED`
/// - `InvalidRequest`: New values are invalid
pub async fn update_service(
    store: &dyn BillingStore,
    id: i64,
    request: UpdateServiceRequest,
) -> Result<Service, AppError> {
    let mut uow = store.begin().await?;

    let mut service = match lock_editable(uow.as_mut(), id, "update").await {
        Ok(service) => service,
        Err(err) => {
            uow.rollback().await?;
            return Err(err);
        }
    };

    if let Some(date) = request.service_date {
        service.service_date = date;
    }
    if let Some(customer_id) = request.customer_id {
        service.customer_id = customer_id;
    }
    if let Some(amount) = request.amount {
        service.amount = amount.round_dp(2);
    }
    if let Err(err) = validate_fields(service.customer_id, service.amount) {
        uow.rollback().await?;
        return Err(err);
    }

    let updated = uow.update_service(&service).await?;
    uow.commit().await?;

    Ok(updated)
}

/// Delete a `CREATED` service.
pub async fn delete_service(store: &dyn BillingStore, id: i64) -> Result<(), AppError> {
    let mut uow = store.begin().await?;

    if let Err(err) = lock_editable(uow.as_mut(), id, "delete").await {
        uow.rollback().await?;
        return Err(err);
    }

    uow.delete_service(id).await?;
    uow.commit().await?;

    tracing::info!("Service {} deleted", id);
    Ok(())
}

/// Create a billing pending for each service and move it to `SENT_TO_BILL`.
///
/// Each service is handled in its own unit of work, so one bad id does not
/// block the others. Duplicate ids are processed once.
pub async fn send_to_billing(
    store: &dyn BillingStore,
    service_ids: &[i64],
) -> Result<SendToBillingResponse, AppError> {
    let mut response = SendToBillingResponse {
        success: Vec::new(),
        failed: Vec::new(),
        pendings: Vec::new(),
    };

    let mut seen = std::collections::HashSet::new();
    for &id in service_ids.iter().filter(|id| seen.insert(**id)) {
        let mut uow = store.begin().await?;

        let Some(service) = uow.lock_services(&[id]).await?.into_iter().next() else {
            uow.rollback().await?;
            response.failed.push(RejectedItem::new(id, "Service not found"));
            continue;
        };

        if service.status != ServiceStatus::Created {
            uow.rollback().await?;
            response.failed.push(RejectedItem::new(
                id,
                format!(
                    "Service is in status '{}'. Only CREATED services can be sent to billing",
                    service.status
                ),
            ));
            continue;
        }

        if uow.find_pending_by_service(id).await?.is_some() {
            uow.rollback().await?;
            response
                .failed
                .push(RejectedItem::new(id, "Service already has a billing pending"));
            continue;
        }

        let pending = uow.insert_pending(id).await?;
        uow.set_service_status(id, ServiceStatus::SentToBill).await?;
        uow.commit().await?;

        response.success.push(id);
        response.pendings.push(pending);
    }

    tracing::info!(
        "Sent {} services to billing ({} rejected)",
        response.success.len(),
        response.failed.len()
    );
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amount_must_be_positive_with_two_decimals() {
        assert!(validate_fields(1, Decimal::new(1050, 2)).is_ok());
        assert!(validate_fields(1, Decimal::ZERO).is_err());
        assert!(validate_fields(1, Decimal::new(10501, 3)).is_err());
        assert!(validate_fields(1, Decimal::new(10500, 3)).is_ok());
        assert!(validate_fields(0, Decimal::new(1050, 2)).is_err());
    }
}
