//! Double-entry ledger builders.
//!
//! Every financial event produces a [`LedgerBatch`]: a list of CREDIT rows,
//! each immediately followed by its DEBIT counterpart, sharing one
//! transaction group. Builders are pure; persistence lives in
//! `db::queries::insert_batch`.

pub mod contribution;
pub mod expense;
pub mod refund;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::Transaction;
use crate::domain::money::{from_host, to_host};
use crate::domain::{SettlementStatus, TransactionKind, TransactionType};

pub use contribution::{
    build_added_funds, build_contribution, fee_breakdown, ContributionInput, FeeBreakdown,
};
pub use expense::{build_expense_payment, ExpensePaymentInput};
pub use refund::{build_refund, RefundBatch, RefundInput};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid rate: {0}")]
    InvalidRate(String),

    #[error("Transaction group has no transactions")]
    EmptyGroup,

    #[error("Transaction group {0} was already refunded")]
    AlreadyRefunded(Uuid),
}

/// Settlement row to create alongside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct NewSettlement {
    pub transaction_group: Uuid,
    pub kind: TransactionKind,
    pub status: SettlementStatus,
}

#[derive(Debug, Clone)]
pub struct LedgerBatch {
    pub group: Uuid,
    pub created_at: DateTime<Utc>,
    pub order_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub data: Option<serde_json::Value>,
    pub transactions: Vec<Transaction>,
    pub settlements: Vec<NewSettlement>,
}

/// The variable part of a CREDIT row.
pub(crate) struct Entry<'a> {
    pub kind: TransactionKind,
    pub description: String,
    pub collective_id: Uuid,
    pub from_collective_id: Uuid,
    pub host_collective_id: Option<Uuid>,
    pub amount: i64,
    pub currency: &'a str,
    pub amount_in_host_currency: i64,
    pub host_currency: &'a str,
    pub fx_rate: &'a BigDecimal,
    pub payment_processor_fee: i64,
    pub tax_amount: i64,
    pub is_debt: bool,
}

impl LedgerBatch {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            group: Uuid::new_v4(),
            created_at,
            order_id: None,
            expense_id: None,
            payment_method_id: None,
            data: None,
            transactions: Vec::new(),
            settlements: Vec::new(),
        }
    }

    pub(crate) fn credit(&self, entry: Entry<'_>) -> Transaction {
        let mut row = Transaction {
            id: Uuid::new_v4(),
            transaction_group: self.group,
            kind: entry.kind,
            entry_type: TransactionType::Credit,
            description: entry.description,
            collective_id: entry.collective_id,
            from_collective_id: entry.from_collective_id,
            host_collective_id: entry.host_collective_id,
            order_id: self.order_id,
            expense_id: self.expense_id,
            payment_method_id: self.payment_method_id,
            amount: entry.amount,
            currency: entry.currency.to_string(),
            amount_in_host_currency: entry.amount_in_host_currency,
            host_currency: entry.host_currency.to_string(),
            host_currency_fx_rate: entry.fx_rate.clone(),
            host_fee_in_host_currency: 0,
            platform_fee_in_host_currency: 0,
            payment_processor_fee_in_host_currency: -entry.payment_processor_fee.abs(),
            tax_amount: -entry.tax_amount.abs(),
            net_amount_in_collective_currency: 0,
            is_refund: false,
            is_debt: entry.is_debt,
            is_disputed: false,
            refund_transaction_id: None,
            data: self.data.clone(),
            created_at: self.created_at,
        };
        row.net_amount_in_collective_currency = net_amount(&row);
        row
    }

    /// Pushes a CREDIT row and its DEBIT counterpart, returning both ids.
    pub(crate) fn push_pair(
        &mut self,
        credit: Transaction,
        debit_host_collective_id: Option<Uuid>,
    ) -> (Uuid, Uuid) {
        let debit = opposite(&credit, debit_host_collective_id);
        let ids = (credit.id, debit.id);
        self.transactions.push(credit);
        self.transactions.push(debit);
        ids
    }

    pub(crate) fn owe(&mut self, kind: TransactionKind, status: SettlementStatus) {
        self.settlements.push(NewSettlement {
            transaction_group: self.group,
            kind,
            status,
        });
    }

    pub fn credits(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions
            .iter()
            .filter(|t| t.entry_type == TransactionType::Credit)
    }

    pub fn find(&self, kind: TransactionKind, entry_type: TransactionType) -> Option<&Transaction> {
        self.transactions
            .iter()
            .find(|t| t.kind == kind && t.entry_type == entry_type)
    }
}

fn has_fees(row: &Transaction) -> bool {
    row.host_fee_in_host_currency != 0
        || row.platform_fee_in_host_currency != 0
        || row.payment_processor_fee_in_host_currency != 0
        || row.tax_amount != 0
}

/// Amount left to the credited collective once fees and taxes are deducted.
pub fn net_amount(row: &Transaction) -> i64 {
    if !has_fees(row) {
        return row.amount;
    }

    let fx = &row.host_currency_fx_rate;
    let net_in_host = row.amount_in_host_currency
        + row.host_fee_in_host_currency
        + row.platform_fee_in_host_currency
        + row.payment_processor_fee_in_host_currency
        + to_host(row.tax_amount, fx);

    from_host(net_in_host, fx)
}

/// Builds the DEBIT counterpart of a CREDIT row.
pub fn opposite(credit: &Transaction, debit_host_collective_id: Option<Uuid>) -> Transaction {
    let amount_in_host_currency = if has_fees(credit) {
        -to_host(credit.net_amount_in_collective_currency, &credit.host_currency_fx_rate)
    } else {
        -credit.amount_in_host_currency
    };

    Transaction {
        id: Uuid::new_v4(),
        entry_type: TransactionType::Debit,
        collective_id: credit.from_collective_id,
        from_collective_id: credit.collective_id,
        host_collective_id: debit_host_collective_id,
        amount: -credit.net_amount_in_collective_currency,
        amount_in_host_currency,
        net_amount_in_collective_currency: -credit.amount,
        ..credit.clone()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn entry<'a>(fx: &'a BigDecimal, fee: i64, tax: i64) -> Entry<'a> {
        Entry {
            kind: TransactionKind::Contribution,
            description: "Monthly donation".to_string(),
            collective_id: Uuid::new_v4(),
            from_collective_id: Uuid::new_v4(),
            host_collective_id: None,
            amount: 1000,
            currency: "EUR",
            amount_in_host_currency: to_host(1000, fx),
            host_currency: "USD",
            fx_rate: fx,
            payment_processor_fee: fee,
            tax_amount: tax,
            is_debt: false,
        }
    }

    #[test]
    fn net_amount_without_fees_is_the_amount() {
        let fx = BigDecimal::from_str("1.1").unwrap();
        let batch = LedgerBatch::new(Utc::now());
        let credit = batch.credit(entry(&fx, 0, 0));
        assert_eq!(credit.net_amount_in_collective_currency, 1000);
    }

    #[test]
    fn net_amount_deducts_fees_in_host_currency() {
        let fx = BigDecimal::from_str("1.1").unwrap();
        let batch = LedgerBatch::new(Utc::now());
        let credit = batch.credit(entry(&fx, 55, 100));
        // 1100 - 55 - 110 = 935 USD -> 850 EUR
        assert_eq!(credit.payment_processor_fee_in_host_currency, -55);
        assert_eq!(credit.tax_amount, -100);
        assert_eq!(credit.net_amount_in_collective_currency, 850);
    }

    #[test]
    fn opposite_mirrors_the_credit() {
        let fx = BigDecimal::from(1);
        let mut batch = LedgerBatch::new(Utc::now());
        let credit = batch.credit(entry(&fx, 30, 0));
        let host = Uuid::new_v4();
        batch.push_pair(credit, Some(host));

        test_support::assert_double_entry(&batch.transactions);
        let debit = &batch.transactions[1];
        assert_eq!(debit.amount, -970);
        assert_eq!(debit.amount_in_host_currency, -970);
        assert_eq!(debit.net_amount_in_collective_currency, -1000);
        assert_eq!(debit.host_collective_id, Some(host));
    }
}
