use async_trait::async_trait;

use super::{
    ChargeOutcome, OrderContext, PaymentError, PaymentProvider, ProviderFeatures, RefundContext,
    RefundOutcome,
};
use crate::domain::SettlementMode;

/// Manual payments: the host confirms reception with `mark-paid`.
pub struct BankTransferProvider;

#[async_trait]
impl PaymentProvider for BankTransferProvider {
    fn service(&self) -> &'static str {
        "bank_transfer"
    }

    fn features(&self) -> ProviderFeatures {
        ProviderFeatures {
            schedules_charges: false,
            recurring: false,
            settlement: SettlementMode::Debt,
            charges_host_fee: true,
        }
    }

    async fn process_order(&self, ctx: &OrderContext<'_>) -> Result<ChargeOutcome, PaymentError> {
        if ctx.order.is_recurring() {
            return Err(PaymentError::Unsupported(
                "recurring bank transfers".to_string(),
            ));
        }
        tracing::info!(order_id = %ctx.order.id, "Waiting for bank transfer");
        Ok(ChargeOutcome::Pending)
    }

    /// The host sends the money back outside of the platform.
    async fn refund(&self, ctx: &RefundContext<'_>) -> Result<RefundOutcome, PaymentError> {
        tracing::info!(
            order_id = %ctx.order.id,
            transaction_id = %ctx.transaction.id,
            "Recording manual bank transfer refund"
        );
        Ok(RefundOutcome {
            external_id: None,
            refunded_processor_fee: 0,
        })
    }
}
