pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod middleware;
pub mod payments;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::middleware::idempotency::{idempotency_middleware, IdempotencyService};
use crate::payments::{
    BankTransferProvider, CollectiveBalanceProvider, PaypalClient, PaypalProvider,
    ProviderRegistry, StripeClient, StripeProvider,
};
use crate::services::notifications::{HttpMailer, LogMailer, Mailer};
use crate::services::{
    AccountService, ExpenseService, Notifier, OrderService, RecurringService, SettlementService,
};

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Config,
    pub accounts: AccountService,
    pub orders: OrderService,
    pub expenses: ExpenseService,
    pub settlements: SettlementService,
    pub recurring: RecurringService,
    pub stripe: Option<StripeClient>,
    pub paypal: PaypalClient,
    pub idempotency: Option<IdempotencyService>,
}

impl AppState {
    /// Wires providers and services around a pool. Nothing here touches the
    /// network until a request is served.
    pub fn build(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let mailer: Arc<dyn Mailer> = match &config.mail {
            Some(settings) => Arc::new(HttpMailer::new(settings.clone())),
            None => Arc::new(LogMailer),
        };
        let notifier = Notifier::new(db.clone(), mailer);

        let stripe = config
            .stripe
            .as_ref()
            .map(|s| StripeClient::new(s.api_url.clone(), s.secret_key.clone()));
        let paypal = PaypalClient::new(config.paypal.api_url.clone());

        let mut providers = ProviderRegistry::new()
            .register(Arc::new(BankTransferProvider))
            .register(Arc::new(CollectiveBalanceProvider::new(db.clone())))
            .register(Arc::new(PaypalProvider::new(paypal.clone(), db.clone())));
        if let Some(client) = &stripe {
            providers = providers.register(Arc::new(StripeProvider::new(client.clone())));
        }
        tracing::info!(services = ?providers.services(), "Payment providers registered");

        let idempotency = match &config.redis_url {
            Some(url) => Some(IdempotencyService::new(url)?),
            None => None,
        };

        let orders = OrderService::new(
            db.clone(),
            providers,
            notifier.clone(),
            config.platform.clone(),
        );
        let recurring = RecurringService::new(db.clone(), orders.clone(), notifier.clone());

        Ok(Self {
            accounts: AccountService::new(db.clone(), notifier.clone()),
            expenses: ExpenseService::new(db.clone(), notifier.clone()),
            settlements: SettlementService::new(
                db.clone(),
                notifier,
                config.platform.collective_slug.clone(),
            ),
            orders,
            recurring,
            stripe,
            paypal,
            idempotency,
            db,
            config,
        })
    }
}

pub fn create_app(state: AppState) -> Router {
    let mut order_routes = Router::new().route("/orders", post(handlers::orders::create_order));
    if let Some(idempotency) = state.idempotency.clone() {
        order_routes = order_routes.layer(axum_middleware::from_fn_with_state(
            idempotency,
            idempotency_middleware,
        ));
    }

    let admin_routes = Router::new()
        .route(
            "/admin/collectives/:slug/approve",
            post(handlers::admin::approve_collective),
        )
        .route(
            "/admin/collectives/:slug/connected-accounts",
            post(handlers::admin::connect_account),
        )
        .route(
            "/admin/collectives/:slug/added-funds",
            post(handlers::admin::add_funds),
        )
        .route("/admin/orders/:id/mark-paid", post(handlers::admin::mark_paid))
        .route(
            "/admin/orders/:id/mark-expired",
            post(handlers::admin::mark_expired),
        )
        .route("/admin/orders/:id/cancel", post(handlers::admin::cancel_order))
        .route(
            "/admin/transactions/:id/refund",
            post(handlers::admin::refund_transaction),
        )
        .route(
            "/admin/expenses/:id/approve",
            post(handlers::admin::approve_expense),
        )
        .route(
            "/admin/expenses/:id/reject",
            post(handlers::admin::reject_expense),
        )
        .route("/admin/expenses/:id/pay", post(handlers::admin::pay_expense))
        .route(
            "/admin/settlements",
            get(handlers::settlements::list_settlements),
        )
        .route(
            "/admin/settlements/run",
            post(handlers::settlements::run_settlements),
        )
        .route(
            "/admin/recurring/run",
            post(handlers::admin::run_recurring),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/collectives", post(handlers::collectives::create_collective))
        .route("/collectives/:slug", get(handlers::collectives::get_collective))
        .route(
            "/collectives/:slug/apply",
            post(handlers::collectives::apply_to_host),
        )
        .route(
            "/collectives/:slug/balance",
            get(handlers::collectives::get_balance),
        )
        .route(
            "/collectives/:slug/transactions",
            get(handlers::collectives::list_transactions),
        )
        .route(
            "/collectives/:slug/transactions.csv",
            get(handlers::collectives::export_transactions),
        )
        .route(
            "/collectives/:slug/paypal-plans",
            post(handlers::collectives::create_paypal_plan),
        )
        .route(
            "/payment-methods",
            post(handlers::collectives::create_payment_method),
        )
        .merge(order_routes)
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/expenses", post(handlers::expenses::submit_expense))
        .route("/expenses/:id", get(handlers::expenses::get_expense))
        .route("/webhooks/stripe", post(handlers::webhook::stripe_webhook))
        .route("/webhooks/paypal", post(handlers::webhook::paypal_webhook))
        .merge(admin_routes)
        .layer(axum_middleware::from_fn(
            middleware::request_logger::request_logger_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
