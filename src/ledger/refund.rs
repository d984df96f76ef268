use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{net_amount, opposite, LedgerBatch, LedgerError};
use crate::db::models::{Transaction, TransactionSettlement};
use crate::domain::{SettlementStatus, TransactionKind, TransactionType};

pub struct RefundInput<'a> {
    /// Every row of the transaction group being refunded.
    pub original: &'a [Transaction],
    /// Processor fee given back by the processor, positive, in host currency.
    pub refunded_processor_fee: i64,
    /// Settlements recorded for the original group.
    pub settlements: &'a [TransactionSettlement],
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefundBatch {
    pub batch: LedgerBatch,
    /// `(original_id, refund_id)` for both legs of every refunded pair.
    pub links: Vec<(Uuid, Uuid)>,
    /// Debt kinds of the original group whose settlement cancels out.
    pub settle_original: Vec<TransactionKind>,
}

fn is_contribution(kind: TransactionKind) -> bool {
    matches!(
        kind,
        TransactionKind::Contribution | TransactionKind::AddedFunds
    )
}

pub fn build_refund(input: &RefundInput<'_>) -> Result<RefundBatch, LedgerError> {
    let first = input.original.first().ok_or(LedgerError::EmptyGroup)?;
    let original_group = first.transaction_group;

    if input
        .original
        .iter()
        .any(|t| t.is_refund || t.refund_transaction_id.is_some())
    {
        return Err(LedgerError::AlreadyRefunded(original_group));
    }
    if input.refunded_processor_fee < 0 {
        return Err(LedgerError::InvalidAmount(
            "refunded processor fee cannot be negative".to_string(),
        ));
    }

    let mut batch = LedgerBatch::new(input.created_at);
    batch.order_id = first.order_id;
    batch.expense_id = first.expense_id;
    batch.payment_method_id = first.payment_method_id;
    batch.data = input.data.clone();

    let mut links = Vec::new();
    let mut settle_original = Vec::new();

    let credits = input
        .original
        .iter()
        .filter(|t| t.entry_type == TransactionType::Credit);

    for credit in credits {
        let debit = input.original.iter().find(|t| {
            t.entry_type == TransactionType::Debit
                && t.kind == credit.kind
                && t.collective_id == credit.from_collective_id
                && t.from_collective_id == credit.collective_id
        });

        let mut refund = Transaction {
            id: Uuid::new_v4(),
            transaction_group: batch.group,
            description: format!("Refund of \"{}\"", credit.description),
            collective_id: credit.from_collective_id,
            from_collective_id: credit.collective_id,
            host_collective_id: debit.and_then(|d| d.host_collective_id),
            is_refund: true,
            is_disputed: false,
            refund_transaction_id: Some(credit.id),
            data: input.data.clone(),
            created_at: input.created_at,
            ..credit.clone()
        };

        if is_contribution(credit.kind) {
            let original_fee = -credit.payment_processor_fee_in_host_currency;
            if input.refunded_processor_fee > original_fee {
                return Err(LedgerError::InvalidAmount(format!(
                    "refunded processor fee {} exceeds the original fee {}",
                    input.refunded_processor_fee, original_fee
                )));
            }
            refund.payment_processor_fee_in_host_currency = -input.refunded_processor_fee;
        }
        refund.net_amount_in_collective_currency = net_amount(&refund);

        let mut refund_debit = opposite(&refund, credit.host_collective_id);
        refund_debit.refund_transaction_id = debit.map(|d| d.id);

        links.push((credit.id, refund.id));
        if let Some(debit) = debit {
            links.push((debit.id, refund_debit.id));
        }
        batch.transactions.push(refund);
        batch.transactions.push(refund_debit);

        if credit.kind.is_debt() {
            let original_status = input
                .settlements
                .iter()
                .find(|s| s.transaction_group == original_group && s.kind == credit.kind)
                .map(|s| s.settlement_status);

            if original_status == Some(SettlementStatus::Owed) {
                settle_original.push(credit.kind);
                batch.owe(credit.kind, SettlementStatus::Settled);
            } else {
                batch.owe(credit.kind, SettlementStatus::Owed);
            }
        }
    }

    Ok(RefundBatch {
        batch,
        links,
        settle_original,
    })
}
