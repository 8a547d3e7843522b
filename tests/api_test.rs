mod common;

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use billing_batch_server::store::BillingStore;
use common::{TEST_API_KEY, test_app};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tower::ServiceExt;

fn decimal(value: &Value) -> Decimal {
    value.as_str().unwrap().parse().unwrap()
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::AUTHORIZATION, format!("Bearer {}", TEST_API_KEY));

    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_is_public() {
    let t = test_app();
    let response = t
        .app
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn protected_routes_reject_missing_or_unknown_keys() {
    let t = test_app();
    let router = t.app.router();

    let missing = router
        .clone()
        .oneshot(Request::get("/api/v1/services").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = router
        .oneshot(
            Request::get("/api/v1/services")
                .header(header::AUTHORIZATION, "Bearer not-the-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);

    let bytes = to_bytes(wrong.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["error"]["code"], "invalid_api_key");
}

#[tokio::test]
async fn service_to_invoice_flow_over_http() {
    let t = test_app();
    let router = t.app.router();

    let (status, service) = send(
        &router,
        "POST",
        "/api/v1/services",
        Some(json!({ "service_date": "2024-01-15", "customer_id": 42, "amount": "1210.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(service["status"], "CREATED");
    let service_id = service["id"].as_i64().unwrap();

    let (status, sent) = send(
        &router,
        "POST",
        "/api/v1/services/send-to-billing",
        Some(json!({ "service_ids": [service_id, 999] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sent["success"], json!([service_id]));
    assert_eq!(sent["failed"][0]["reason"], "Service not found");
    let pending_id = sent["pendings"][0]["id"].as_i64().unwrap();

    let (status, submitted) = send(
        &router,
        "POST",
        "/api/v1/billing-batches",
        Some(json!({
            "issue_date": "2024-02-01",
            "receipt_book": "A-0001",
            "pending_ids": [pending_id]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(submitted["batch"]["status"], "PENDING_PROCESSING");
    let batch_id = submitted["batch"]["id"].as_i64().unwrap();
    assert_eq!(submitted["queue_info"]["job_id"], format!("batch-{}", batch_id));

    t.app.worker.drain().await.unwrap();

    let (status, body) = send(
        &router,
        "GET",
        &format!("/api/v1/billing-batches/{}/status", batch_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["status"], "PROCESSED");
    assert_eq!(body["batch"]["invoices"][0]["invoice_number"], "A-0001-00000001");
    assert_eq!(body["job_info"]["status"], "completed");

    let (status, invoice) = send(
        &router,
        "GET",
        "/api/v1/invoices/by-number/A-0001-00000001",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(invoice["customer_id"], 42);
    let invoice_id = invoice["id"].as_i64().unwrap();

    let (status, preview) = send(
        &router,
        "POST",
        "/api/v1/erp-sync/preview",
        Some(json!({ "invoice_ids": [invoice_id] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = &preview[0]["accounting_entries"];
    assert_eq!(decimal(&entries[0]["debit"]), Decimal::new(121000, 2));
    assert_eq!(decimal(&entries[1]["credit"]), Decimal::new(100000, 2));
    assert_eq!(decimal(&entries[2]["credit"]), Decimal::new(21000, 2));

    let (status, synced) = send(
        &router,
        "POST",
        "/api/v1/erp-sync/batch",
        Some(json!({ "batch_id": batch_id })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(synced["status"], "SENT");
    let sync_id = synced["sync_id"].as_str().unwrap().to_string();

    let (status, confirmed) = send(
        &router,
        "POST",
        &format!("/api/v1/erp-sync/history/{}/confirm", sync_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(confirmed["status"], "CONFIRMED");

    let (status, again) = send(
        &router,
        "POST",
        &format!("/api/v1/erp-sync/history/{}/confirm", sync_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(again["error"]["code"], "erp_sync_error");
}

#[tokio::test]
async fn errors_use_the_json_envelope() {
    let t = test_app();
    let router = t.app.router();

    let (status, body) = send(
        &router,
        "POST",
        "/api/v1/billing-batches",
        Some(json!({ "issue_date": "2024-02-01", "receipt_book": "A-0001", "pending_ids": [] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "empty_batch");
    assert_eq!(
        body["error"]["message"],
        "Cannot create a billing batch without any pending items"
    );

    let (status, body) = send(&router, "GET", "/api/v1/billing-batches/77", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");
    assert_eq!(
        body["error"]["message"],
        "BillingBatch with identifier '77' not found"
    );
}

#[tokio::test]
async fn only_created_services_can_be_edited() {
    let t = test_app();
    let router = t.app.router();
    let ids = common::create_pendings(t.store.as_ref(), 5, &[5000]).await;
    let pending = t.store.get_pending(ids[0]).await.unwrap().unwrap();
    let service_id = pending.pending.service_id;

    let (status, body) = send(
        &router,
        "PATCH",
        &format!("/api/v1/services/{}", service_id),
        Some(json!({ "amount": "60.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "business_error");

    // Cancelling the pending frees the service again
    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/v1/billing-pendings/{}", ids[0]),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = send(
        &router,
        "PATCH",
        &format!("/api/v1/services/{}", service_id),
        Some(json!({ "amount": "60.00" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CREATED");
    assert_eq!(decimal(&body["amount"]), Decimal::new(6000, 2));

    let (status, _) = send(
        &router,
        "DELETE",
        &format!("/api/v1/services/{}", service_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}
