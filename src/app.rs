//! Application wiring: shared state and the HTTP router.
//!
//! The same wiring serves PostgreSQL and in-memory backends; `main` picks the
//! backends and the integration tests build the in-memory variant directly.

use std::{sync::Arc, time::Duration};

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::Config,
    handlers,
    middleware::auth::{ApiKeys, auth_middleware},
    queue::{BatchWorker, JobOptions, JobQueue},
    services::{
        batch_processor::BatchProcessor,
        billing_batch_service::BillingBatchService,
        erp_sync_service::{ErpSimulator, ErpSyncService, SyncLog},
    },
    store::BillingStore,
};

/// State shared by every handler via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn BillingStore>,
    pub batches: Arc<BillingBatchService>,
    pub erp: Arc<ErpSyncService>,
    pub api_keys: Arc<ApiKeys>,
}

/// Runtime knobs that are not backend specific.
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub job_options: JobOptions,
    pub worker_concurrency: usize,
    pub worker_poll_interval: Duration,
    pub erp: ErpSimulator,
    pub api_keys: ApiKeys,
}

impl AppSettings {
    pub fn from_config(config: &Config) -> Self {
        let api_keys = if config.auth_disabled {
            ApiKeys::disabled()
        } else {
            ApiKeys::new(config.api_key_hashes.iter().cloned())
        };

        Self {
            job_options: config.job_options(),
            worker_concurrency: config.worker_concurrency,
            worker_poll_interval: config.worker_poll_interval(),
            erp: ErpSimulator::new(config.erp_failure_rate, config.erp_latency()),
            api_keys,
        }
    }
}

/// Everything `main` needs to serve requests and run the worker.
pub struct Application {
    pub state: AppState,
    pub worker: Arc<BatchWorker>,
}

impl Application {
    pub fn new(
        store: Arc<dyn BillingStore>,
        queue: Arc<dyn JobQueue>,
        settings: AppSettings,
    ) -> Self {
        let processor = Arc::new(BatchProcessor::new(store.clone()));

        let batches = Arc::new(BillingBatchService::new(
            store.clone(),
            queue.clone(),
            processor.clone(),
            settings.job_options,
        ));
        let erp = Arc::new(ErpSyncService::new(
            store.clone(),
            Arc::new(SyncLog::new()),
            settings.erp,
        ));
        let worker = Arc::new(BatchWorker::new(
            queue,
            store.clone(),
            processor,
            settings.worker_concurrency,
            settings.worker_poll_interval,
        ));

        Self {
            state: AppState {
                store,
                batches,
                erp,
                api_keys: Arc::new(settings.api_keys),
            },
            worker,
        }
    }

    pub fn router(&self) -> Router {
        build_router(self.state.clone())
    }
}

/// Build the HTTP router. Everything except `/health` requires an API key.
pub fn build_router(state: AppState) -> Router {
    let authenticated_routes = Router::new()
        // Services
        .route(
            "/api/v1/services",
            post(handlers::services::create_service).get(handlers::services::list_services),
        )
        .route(
            "/api/v1/services/send-to-billing",
            post(handlers::services::send_to_billing),
        )
        .route(
            "/api/v1/services/{id}",
            get(handlers::services::get_service)
                .patch(handlers::services::update_service)
                .delete(handlers::services::delete_service),
        )
        // Billing pendings
        .route(
            "/api/v1/billing-pendings",
            get(handlers::billing_pendings::list_pendings),
        )
        .route(
            "/api/v1/billing-pendings/summary",
            get(handlers::billing_pendings::pending_summary),
        )
        .route(
            "/api/v1/billing-pendings/available",
            get(handlers::billing_pendings::available_pendings),
        )
        .route(
            "/api/v1/billing-pendings/{id}",
            get(handlers::billing_pendings::get_pending)
                .delete(handlers::billing_pendings::cancel_pending),
        )
        // Billing batches
        .route(
            "/api/v1/billing-batches",
            post(handlers::billing_batches::submit_batch)
                .get(handlers::billing_batches::list_batches),
        )
        .route(
            "/api/v1/billing-batches/sync",
            post(handlers::billing_batches::submit_batch_sync),
        )
        .route(
            "/api/v1/billing-batches/queue/stats",
            get(handlers::billing_batches::queue_stats),
        )
        .route(
            "/api/v1/billing-batches/receipt-books",
            get(handlers::billing_batches::list_receipt_books),
        )
        .route(
            "/api/v1/billing-batches/next-invoice-number/{receipt_book}",
            get(handlers::billing_batches::next_invoice_number),
        )
        .route(
            "/api/v1/billing-batches/{id}",
            get(handlers::billing_batches::get_batch),
        )
        .route(
            "/api/v1/billing-batches/{id}/status",
            get(handlers::billing_batches::get_batch_status),
        )
        .route(
            "/api/v1/billing-batches/{id}/retry",
            post(handlers::billing_batches::retry_batch),
        )
        // Invoices
        .route("/api/v1/invoices", get(handlers::invoices::list_invoices))
        .route(
            "/api/v1/invoices/statistics",
            get(handlers::invoices::invoice_statistics),
        )
        .route(
            "/api/v1/invoices/by-number/{number}",
            get(handlers::invoices::get_invoice_by_number),
        )
        .route(
            "/api/v1/invoices/by-batch/{batch_id}",
            get(handlers::invoices::invoices_by_batch),
        )
        .route(
            "/api/v1/invoices/by-customer/{customer_id}",
            get(handlers::invoices::invoices_by_customer),
        )
        .route("/api/v1/invoices/{id}", get(handlers::invoices::get_invoice))
        // ERP export
        .route("/api/v1/erp-sync/preview", post(handlers::erp_sync::preview))
        .route(
            "/api/v1/erp-sync/invoices",
            post(handlers::erp_sync::sync_invoices),
        )
        .route("/api/v1/erp-sync/batch", post(handlers::erp_sync::sync_batch))
        .route("/api/v1/erp-sync/history", get(handlers::erp_sync::history))
        .route(
            "/api/v1/erp-sync/history/{sync_id}",
            get(handlers::erp_sync::sync_detail),
        )
        .route(
            "/api/v1/erp-sync/history/{sync_id}/confirm",
            post(handlers::erp_sync::confirm_sync),
        )
        // Apply authentication middleware to all routes in this group
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .merge(authenticated_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
