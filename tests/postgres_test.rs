//! Locking and queue behaviour against a real PostgreSQL database.
//!
//! Run with: `DATABASE_URL=postgres://... cargo test --test postgres_test -- --ignored`

mod common;

use std::sync::Arc;

use billing_batch_server::{
    error::AppError,
    models::{
        billing_batch::{BatchFilter, BatchStatus, NewBillingBatch},
        billing_pending::PendingStatus,
        invoice::NewInvoice,
        service::ServiceStatus,
    },
    queue::{BatchJobPayload, JobOptions, JobQueue, JobRecord, PgJobQueue},
    services::{billing_pending_service, invoice_service},
    store::{BillingStore, PgStore, UnitOfWork},
};
use chrono::Utc;
use common::{
    FailingStore, batch_request, create_pendings, issue_date, pg_pool, test_app_with,
    unique_receipt_book,
};
use rust_decimal::Decimal;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn concurrent_batches_share_one_gapless_sequence() {
    let pool = pg_pool().await;
    let t = test_app_with(Arc::new(PgStore::new(pool)), 3);
    let book = unique_receipt_book();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let ids = create_pendings(t.store.as_ref(), 11, &[1000, 2000, 3000]).await;
        let batches = Arc::clone(&t.app.state.batches);
        let request = batch_request(&book, ids);
        handles.push(tokio::spawn(async move { batches.submit_sync(request).await }));
    }

    let mut numbers = Vec::new();
    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.batch.invoices.len(), 3);
        numbers.extend(result.batch.invoices.into_iter().map(|i| i.invoice_number));
    }
    numbers.sort();

    let expected: Vec<String> = (1..=12).map(|n| format!("{}-{:08}", book, n)).collect();
    assert_eq!(numbers, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn racing_batches_invoice_each_pending_once() {
    let pool = pg_pool().await;
    let t = test_app_with(Arc::new(PgStore::new(pool)), 3);
    let book = unique_receipt_book();
    let ids = create_pendings(t.store.as_ref(), 12, &[1500, 2500, 3500]).await;

    // Both pass submission checks; the row locks decide who invoices
    let spawn_batch = || {
        let batches = Arc::clone(&t.app.state.batches);
        let request = batch_request(&book, ids.clone());
        tokio::spawn(async move { batches.submit_sync(request).await })
    };
    let first = spawn_batch();
    let second = spawn_batch();
    let results = [first.await.unwrap(), second.await.unwrap()];

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].batch.invoices.len(), 3);
    // The loser finds nothing left to invoice, at submission or under the lock
    assert!(results.iter().any(|r| matches!(
        r,
        Err(AppError::BatchProcessing { .. }) | Err(AppError::EmptyBatch)
    )));

    for id in ids {
        let item = billing_pending_service::get_pending(t.store.as_ref(), id)
            .await
            .unwrap();
        assert_eq!(item.pending.status, PendingStatus::Invoiced);
    }
    assert_eq!(
        t.store.last_invoice_number(&book).await.unwrap(),
        Some(format!("{}-00000003", book))
    );
}

#[tokio::test]
#[ignore]
async fn failure_mid_batch_rolls_everything_back() {
    let pool = pg_pool().await;
    let store = Arc::new(FailingStore::new(PgStore::new(pool), 2, 1));
    let t = test_app_with(store, 3);
    let book = unique_receipt_book();
    let ids = create_pendings(t.store.as_ref(), 13, &[10000, 20000, 30000]).await;

    let err = t
        .app
        .state
        .batches
        .submit_sync(batch_request(&book, ids.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BatchProcessing { .. }));

    let batch = t
        .store
        .list_batches(&BatchFilter {
            receipt_book: Some(book.clone()),
            ..Default::default()
        })
        .await
        .unwrap()
        .data
        .remove(0);
    assert_eq!(batch.status, BatchStatus::Error);
    assert!(batch.error_message.unwrap().contains("injected"));
    assert!(
        invoice_service::by_batch(t.store.as_ref(), batch.id)
            .await
            .unwrap()
            .is_empty()
    );

    assert_eq!(t.store.last_invoice_number(&book).await.unwrap(), None);
    for id in &ids {
        let item = billing_pending_service::get_pending(t.store.as_ref(), *id)
            .await
            .unwrap();
        assert_eq!(item.pending.status, PendingStatus::Pending);
        assert_eq!(item.service.unwrap().status, ServiceStatus::SentToBill);
    }

    // The injected failure is spent: the same pendings go through on the next batch
    let result = t
        .app
        .state
        .batches
        .submit_sync(batch_request(&book, ids))
        .await
        .unwrap();
    assert_eq!(result.batch.invoices[0].invoice_number, format!("{}-00000001", book));
}

#[tokio::test]
#[ignore]
async fn in_process_clears_a_previous_error() {
    let pool = pg_pool().await;
    let store = PgStore::new(pool);
    let book = unique_receipt_book();
    let ids = create_pendings(&store, 14, &[10000]).await;

    let batch = store
        .insert_batch(NewBillingBatch {
            issue_date: issue_date(),
            receipt_book: book,
            pending_ids: ids,
        })
        .await
        .unwrap();
    store
        .mark_batch_error(batch.id, "connection reset", Utc::now())
        .await
        .unwrap();
    let failed = store.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(failed.status, BatchStatus::Error);

    assert!(store.mark_batch_in_process(batch.id, Utc::now()).await.unwrap());
    let retried = store.get_batch(batch.id).await.unwrap().unwrap();
    assert_eq!(retried.status, BatchStatus::InProcess);
    assert!(retried.error_message.is_none());

    assert!(matches!(
        store.mark_batch_in_process(i64::MAX, Utc::now()).await.unwrap_err(),
        AppError::NotFound { .. }
    ));
}

#[tokio::test]
#[ignore]
async fn processed_batch_is_not_moved_back_to_in_process() {
    let pool = pg_pool().await;
    let t = test_app_with(Arc::new(PgStore::new(pool)), 3);
    let book = unique_receipt_book();
    let ids = create_pendings(t.store.as_ref(), 15, &[10000]).await;

    let result = t
        .app
        .state
        .batches
        .submit_sync(batch_request(&book, ids))
        .await
        .unwrap();
    let batch_id = result.batch.batch.id;

    assert!(!t.store.mark_batch_in_process(batch_id, Utc::now()).await.unwrap());
    let batch = t.store.get_batch(batch_id).await.unwrap().unwrap();
    assert_eq!(batch.status, BatchStatus::Processed);
    assert_eq!(invoice_service::by_batch(t.store.as_ref(), batch_id).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore]
async fn last_number_accounts_for_nine_digit_sequences() {
    let pool = pg_pool().await;
    let store = PgStore::new(pool);
    let book = unique_receipt_book();
    let ids = create_pendings(&store, 16, &[100, 200]).await;
    let batch = store
        .insert_batch(NewBillingBatch {
            issue_date: issue_date(),
            receipt_book: book.clone(),
            pending_ids: ids.clone(),
        })
        .await
        .unwrap();

    let mut uow = store.begin().await.unwrap();
    for (pending_id, sequence) in ids.iter().zip([99_999_999u64, 100_000_000]) {
        uow.insert_invoice(&NewInvoice {
            invoice_number: format!("{}-{:08}", book, sequence),
            receipt_book: book.clone(),
            cae: "12345678901234".to_string(),
            issue_date: issue_date(),
            amount: Decimal::new(100, 2),
            batch_id: batch.id,
            pending_id: *pending_id,
        })
        .await
        .unwrap();
    }
    uow.commit().await.unwrap();

    assert_eq!(
        store.last_invoice_number(&book).await.unwrap(),
        Some(format!("{}-100000000", book))
    );
}

/// Reserve until the queue reports nothing ready.
async fn reserve_all(queue: Arc<PgJobQueue>) -> Vec<JobRecord> {
    let mut reserved = Vec::new();
    while let Some(job) = queue.reserve_next().await.unwrap() {
        reserved.push(job);
    }
    reserved
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn only_one_job_per_batch_is_active() {
    let pool = pg_pool().await;
    let store = PgStore::new(pool.clone());
    let queue = Arc::new(PgJobQueue::new(pool));
    let ids = create_pendings(&store, 17, &[10000]).await;
    let batch = store
        .insert_batch(NewBillingBatch {
            issue_date: issue_date(),
            receipt_book: unique_receipt_book(),
            pending_ids: ids.clone(),
        })
        .await
        .unwrap();

    let payload = BatchJobPayload {
        batch_id: batch.id,
        pending_ids: ids,
    };
    let first_key = format!("batch-{}", batch.id);
    let second_key = format!("batch-{}-retry-{}", batch.id, Utc::now().timestamp_millis());
    for key in [&first_key, &second_key] {
        queue
            .enqueue(key, &payload, &JobOptions::default())
            .await
            .unwrap();
    }

    let mut handles = Vec::new();
    for _ in 0..4 {
        handles.push(tokio::spawn(reserve_all(Arc::clone(&queue))));
    }
    let mut ours = Vec::new();
    for handle in handles {
        ours.extend(
            handle
                .await
                .unwrap()
                .into_iter()
                .filter(|job| job.batch_id == batch.id),
        );
    }
    assert_eq!(ours.len(), 1);

    // Once the active job finishes the other one becomes available
    queue
        .complete(ours[0].id, serde_json::json!({}))
        .await
        .unwrap();
    let next = reserve_all(Arc::clone(&queue))
        .await
        .into_iter()
        .find(|job| job.batch_id == batch.id)
        .unwrap();
    assert_ne!(next.job_key, ours[0].job_key);
    assert_eq!(next.attempts_made, 1);
}
