use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;

use crate::db::models::Order;
use crate::db::queries;
use crate::domain::order::{retry_charge_date, MAX_CHARGE_RETRIES};
use crate::domain::OrderStatus;
use crate::error::AppError;
use crate::services::notifications::{ActivityType, NewActivity, Notifier};
use crate::services::orders::OrderService;

const BATCH_SIZE: i64 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecurringSummary {
    pub charged: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub skipped: usize,
}

/// What happens to an order after a failed scheduled charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { retry_count: i32 },
    GiveUp,
}

pub fn retry_decision(current_retries: i32) -> RetryDecision {
    let retry_count = current_retries + 1;
    if retry_count > MAX_CHARGE_RETRIES {
        RetryDecision::GiveUp
    } else {
        RetryDecision::Retry { retry_count }
    }
}

/// The order's payment method is gone, archived or has no provider.
/// Anything else may clear up on the next run.
pub fn payment_method_unusable(error: &AppError) -> bool {
    matches!(
        error,
        AppError::Database(sqlx::Error::RowNotFound)
            | AppError::Validation(_)
            | AppError::BadRequest(_)
    )
}

#[derive(Clone)]
pub struct RecurringService {
    pool: PgPool,
    orders: OrderService,
    notifier: Notifier,
}

impl RecurringService {
    pub fn new(pool: PgPool, orders: OrderService, notifier: Notifier) -> Self {
        Self {
            pool,
            orders,
            notifier,
        }
    }

    /// Charges every active recurring order that is due.
    pub async fn process_due(&self, now: DateTime<Utc>) -> Result<RecurringSummary, AppError> {
        let due = queries::list_due_recurring_orders(&self.pool, now, BATCH_SIZE).await?;
        let mut summary = RecurringSummary::default();

        tracing::info!(count = due.len(), "Processing due recurring contributions");

        for order in due {
            let features = match self.orders.features_for(&order).await {
                Ok(features) => features,
                Err(e) if payment_method_unusable(&e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "Payment method unusable, cancelling");
                    self.cancel(&order, &e.to_string()).await?;
                    summary.cancelled += 1;
                    continue;
                }
                Err(e) => {
                    tracing::error!(order_id = %order.id, error = %e, "Cannot resolve payment method, skipping");
                    summary.skipped += 1;
                    continue;
                }
            };

            if !features.recurring {
                self.cancel(&order, "payment method does not support recurring charges")
                    .await?;
                summary.cancelled += 1;
                continue;
            }
            // The processor runs these schedules and reports through webhooks.
            if !features.schedules_charges {
                continue;
            }

            match self.orders.charge_recurring(&order).await {
                Ok(updated) => {
                    tracing::info!(
                        order_id = %order.id,
                        next_charge_date = ?updated.next_charge_date,
                        "Recurring contribution charged"
                    );
                    summary.charged += 1;
                }
                Err(e) => {
                    self.handle_failure(&order, &e, now).await?;
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            charged = summary.charged,
            failed = summary.failed,
            cancelled = summary.cancelled,
            skipped = summary.skipped,
            "Recurring run finished"
        );
        Ok(summary)
    }

    async fn handle_failure(
        &self,
        order: &Order,
        error: &AppError,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match retry_decision(order.charge_retry_count) {
            RetryDecision::Retry { retry_count } => {
                let next = retry_charge_date(now);
                queries::reschedule_order_charge(&self.pool, order.id, retry_count, next).await?;
                tracing::warn!(
                    order_id = %order.id,
                    retry_count,
                    next_charge_date = %next,
                    error = %error,
                    "Recurring charge failed, retrying later"
                );
            }
            RetryDecision::GiveUp => {
                queries::update_order_status(&self.pool, order.id, OrderStatus::Error).await?;
                tracing::error!(
                    order_id = %order.id,
                    error = %error,
                    "Recurring charge failed too many times"
                );
                self.notifier
                    .notify(
                        NewActivity::new(
                            ActivityType::OrderPaymentFailed,
                            serde_json::json!({
                                "amount": order.total_amount,
                                "currency": order.currency,
                                "error": error.to_string(),
                            }),
                        )
                        .collective(order.collective_id)
                        .order(order.id)
                        .recipient(order.from_collective_id),
                    )
                    .await;
            }
        }
        Ok(())
    }

    async fn cancel(&self, order: &Order, reason: &str) -> Result<(), AppError> {
        queries::update_order_status(&self.pool, order.id, OrderStatus::Cancelled).await?;
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderCancelled,
                    serde_json::json!({
                        "amount": order.total_amount,
                        "currency": order.currency,
                        "error": reason,
                    }),
                )
                .collective(order.collective_id)
                .order(order.id)
                .recipient(order.from_collective_id),
            )
            .await;
        Ok(())
    }
}
