use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Entry, LedgerBatch, LedgerError};
use crate::db::models::Expense;
use crate::domain::money::to_host;
use crate::domain::TransactionKind;

pub struct ExpensePaymentInput<'a> {
    pub expense: &'a Expense,
    pub payer_host_id: Option<Uuid>,
    pub payee_host_id: Option<Uuid>,
    pub host_currency: String,
    pub fx_rate: BigDecimal,
    /// Withheld from what the payee receives, in host currency.
    pub payment_processor_fee_in_host_currency: i64,
    pub created_at: DateTime<Utc>,
}

/// The payer is debited the expense amount. The processor fee is carried on
/// the credit, so the payee nets the amount minus the fee.
pub fn build_expense_payment(input: &ExpensePaymentInput<'_>) -> Result<LedgerBatch, LedgerError> {
    let expense = input.expense;
    if expense.amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "expense amount must be greater than zero".to_string(),
        ));
    }
    if input.fx_rate <= BigDecimal::zero() {
        return Err(LedgerError::InvalidRate(
            "fx rate must be greater than zero".to_string(),
        ));
    }
    if input.payment_processor_fee_in_host_currency < 0 {
        return Err(LedgerError::InvalidAmount(
            "payment processor fee cannot be negative".to_string(),
        ));
    }

    let mut batch = LedgerBatch::new(input.created_at);
    batch.expense_id = Some(expense.id);

    let fee = input.payment_processor_fee_in_host_currency;
    let amount_in_host_currency = to_host(expense.amount, &input.fx_rate);
    if fee > amount_in_host_currency {
        return Err(LedgerError::InvalidAmount(
            "payment processor fee exceeds the expense amount".to_string(),
        ));
    }

    let credit = batch.credit(Entry {
        kind: TransactionKind::Expense,
        description: expense.description.clone(),
        collective_id: expense.from_collective_id,
        from_collective_id: expense.collective_id,
        host_collective_id: input.payee_host_id,
        amount: expense.amount,
        currency: &expense.currency,
        amount_in_host_currency,
        host_currency: &input.host_currency,
        fx_rate: &input.fx_rate,
        payment_processor_fee: fee,
        tax_amount: 0,
        is_debt: false,
    });
    batch.push_pair(credit, input.payer_host_id);

    Ok(batch)
}
