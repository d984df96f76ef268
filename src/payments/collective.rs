use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use super::{
    BalanceDebit, Charge, ChargeOutcome, OrderContext, PaymentError, PaymentProvider, ProviderFeatures,
    RefundContext, RefundOutcome,
};
use crate::db::queries;
use crate::domain::SettlementMode;

/// Pays an order from the balance of another collective under the same host.
pub struct CollectiveBalanceProvider {
    pool: PgPool,
}

impl CollectiveBalanceProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PaymentProvider for CollectiveBalanceProvider {
    fn service(&self) -> &'static str {
        "collective"
    }

    fn features(&self) -> ProviderFeatures {
        ProviderFeatures {
            schedules_charges: true,
            recurring: true,
            settlement: SettlementMode::Debt,
            charges_host_fee: false,
        }
    }

    async fn process_order(&self, ctx: &OrderContext<'_>) -> Result<ChargeOutcome, PaymentError> {
        let order = ctx.order;

        if ctx.contributor.host_collective_id.is_none()
            || ctx.contributor.host_collective_id != ctx.collective.host_collective_id
        {
            return Err(PaymentError::InvalidRequest(
                "both collectives must be hosted by the same host".to_string(),
            ));
        }
        if ctx.contributor.currency != order.currency || ctx.collective.currency != order.currency {
            return Err(PaymentError::InvalidRequest(
                "both collectives must use the order currency".to_string(),
            ));
        }

        let available = queries::get_balance(&self.pool, ctx.contributor.id, &order.currency).await?;
        if available < order.total_amount {
            return Err(PaymentError::InsufficientBalance {
                available,
                required: order.total_amount,
            });
        }

        tracing::info!(
            order_id = %order.id,
            from = %ctx.contributor.slug,
            to = %ctx.collective.slug,
            amount = order.total_amount,
            "Paying order from collective balance"
        );

        Ok(ChargeOutcome::Paid(Charge {
            external_id: format!("balance_{}_{}", order.id, Utc::now().timestamp_millis()),
            processor_fee_in_host_currency: 0,
            host_currency_fx_rate: None,
            data: serde_json::json!({ "source_collective_id": ctx.contributor.id }),
            balance_debit: Some(BalanceDebit {
                collective_id: ctx.contributor.id,
                currency: order.currency.clone(),
                amount: order.total_amount,
            }),
        }))
    }

    async fn refund(&self, _ctx: &RefundContext<'_>) -> Result<RefundOutcome, PaymentError> {
        Ok(RefundOutcome {
            external_id: None,
            refunded_processor_fee: 0,
        })
    }
}
