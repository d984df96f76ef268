use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::models::{Expense, Transaction};
use crate::db::queries;
use crate::domain::{ExpenseItem, ExpenseStatus, ExpenseType};
use crate::error::AppError;
use crate::ledger::{build_expense_payment, ExpensePaymentInput};
use crate::services::notifications::{ActivityType, NewActivity, Notifier};
use crate::validation::{
    sanitize_string, validate_currency, validate_max_len, validate_positive_amount,
    validate_required, ValidationError, DESCRIPTION_MAX_LEN,
};

#[derive(Debug, Clone, Deserialize)]
pub struct SubmitExpense {
    /// The collective paying the expense.
    pub collective_id: Uuid,
    /// The payee.
    pub from_collective_id: Uuid,
    #[serde(rename = "type", default = "default_type")]
    pub expense_type: ExpenseType,
    pub description: String,
    pub currency: Option<String>,
    pub items: Vec<ExpenseItem>,
}

fn default_type() -> ExpenseType {
    ExpenseType::Invoice
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PayExpense {
    /// Withheld from the payee, in host currency.
    #[serde(default)]
    pub payment_processor_fee: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaidExpense {
    pub expense: Expense,
    pub transactions: Vec<Transaction>,
    pub settled: u64,
}

pub fn total_of(items: &[ExpenseItem]) -> Result<i64, ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::new("items", "must not be empty"));
    }
    let mut total: i64 = 0;
    for item in items {
        validate_positive_amount("items.amount", item.amount)?;
        total = total
            .checked_add(item.amount)
            .ok_or_else(|| ValidationError::new("items", "total is too large"))?;
    }
    validate_positive_amount("amount", total)?;
    Ok(total)
}

#[derive(Clone)]
pub struct ExpenseService {
    pool: PgPool,
    notifier: Notifier,
}

impl ExpenseService {
    pub fn new(pool: PgPool, notifier: Notifier) -> Self {
        Self { pool, notifier }
    }

    pub async fn get(&self, id: Uuid) -> Result<Expense, AppError> {
        Ok(queries::get_expense(&self.pool, id).await?)
    }

    pub async fn submit(&self, input: SubmitExpense) -> Result<Expense, AppError> {
        let description = sanitize_string(&input.description);
        validate_required("description", &description)?;
        validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;
        if input.expense_type == ExpenseType::Settlement {
            return Err(ValidationError::new(
                "type",
                "settlement expenses are created by the platform",
            )
            .into());
        }
        let items: Vec<ExpenseItem> = input
            .items
            .into_iter()
            .map(|item| ExpenseItem {
                description: sanitize_string(&item.description),
                amount: item.amount,
            })
            .collect();
        let amount = total_of(&items)?;

        let payer = queries::get_collective(&self.pool, input.collective_id).await?;
        let payee = queries::get_collective(&self.pool, input.from_collective_id).await?;
        if payer.id == payee.id {
            return Err(AppError::Validation(
                "a collective cannot pay itself".to_string(),
            ));
        }
        let currency = input.currency.unwrap_or_else(|| payer.currency.clone());
        validate_currency(&currency)?;

        let now = Utc::now();
        let expense = Expense {
            id: Uuid::new_v4(),
            collective_id: payer.id,
            from_collective_id: payee.id,
            expense_type: input.expense_type,
            status: ExpenseStatus::Pending,
            description,
            amount,
            currency,
            items: serde_json::to_value(&items).map_err(|e| AppError::Internal(e.to_string()))?,
            paid_at: None,
            created_at: now,
            updated_at: now,
        };
        let expense = queries::insert_expense(&self.pool, &expense).await?;

        tracing::info!(
            expense_id = %expense.id,
            payer = %payer.slug,
            payee = %payee.slug,
            amount = expense.amount,
            "Expense submitted"
        );
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::ExpenseSubmitted,
                    serde_json::json!({
                        "amount": expense.amount,
                        "currency": expense.currency,
                        "collective": payer.slug,
                    }),
                )
                .collective(payer.id)
                .expense(expense.id)
                .recipient(payer.id),
            )
            .await;
        Ok(expense)
    }

    async fn transition(
        &self,
        id: Uuid,
        next: ExpenseStatus,
        activity: ActivityType,
    ) -> Result<Expense, AppError> {
        let mut tx = self.pool.begin().await?;
        let expense = queries::get_expense_for_update(&mut tx, id).await?;
        if !expense.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "expense {} is {:?} and cannot become {:?}",
                expense.id, expense.status, next
            )));
        }
        let expense = queries::update_expense_status(&mut *tx, id, next).await?;
        tx.commit().await?;

        tracing::info!(expense_id = %expense.id, status = ?next, "Expense status updated");
        self.notifier
            .notify(
                NewActivity::new(
                    activity,
                    serde_json::json!({
                        "amount": expense.amount,
                        "currency": expense.currency,
                    }),
                )
                .collective(expense.collective_id)
                .expense(expense.id)
                .recipient(expense.from_collective_id),
            )
            .await;
        Ok(expense)
    }

    pub async fn approve(&self, id: Uuid) -> Result<Expense, AppError> {
        self.transition(id, ExpenseStatus::Approved, ActivityType::ExpenseApproved)
            .await
    }

    pub async fn reject(&self, id: Uuid) -> Result<Expense, AppError> {
        self.transition(id, ExpenseStatus::Rejected, ActivityType::ExpenseRejected)
            .await
    }

    /// Pays an approved expense out of the payer's balance.
    pub async fn pay(&self, id: Uuid, input: PayExpense) -> Result<PaidExpense, AppError> {
        let mut tx = self.pool.begin().await?;
        let expense = queries::get_expense_for_update(&mut tx, id).await?;
        if !expense.status.can_transition_to(ExpenseStatus::Paid) {
            return Err(AppError::Conflict(format!(
                "expense {} is {:?}, only approved expenses can be paid",
                expense.id, expense.status
            )));
        }

        let payer = queries::get_collective(&mut *tx, expense.collective_id).await?;
        let payee = queries::get_collective(&mut *tx, expense.from_collective_id).await?;
        let payer_host = match payer.host_collective_id {
            Some(host_id) => queries::get_collective(&mut *tx, host_id).await?,
            None => payer.clone(),
        };
        if expense.currency != payer_host.currency {
            return Err(AppError::Validation(format!(
                "expense currency {} differs from the host currency {}",
                expense.currency, payer_host.currency
            )));
        }

        queries::lock_collective(&mut tx, payer.id).await?;
        let required = expense.amount;
        let available = queries::get_balance(&mut *tx, payer.id, &expense.currency).await?;
        if available < required {
            return Err(AppError::Payment(format!(
                "insufficient balance: {} available, {} required",
                available, required
            )));
        }

        let batch = build_expense_payment(&ExpensePaymentInput {
            expense: &expense,
            payer_host_id: payer.host_collective_id,
            payee_host_id: payee.host_collective_id,
            host_currency: payer_host.currency.clone(),
            fx_rate: BigDecimal::from(1),
            payment_processor_fee_in_host_currency: input.payment_processor_fee,
            created_at: Utc::now(),
        })?;

        queries::insert_batch(&mut tx, &batch).await?;
        let settled = queries::settle_expense_settlements(&mut tx, expense.id).await?;
        let expense = queries::update_expense_status(&mut *tx, expense.id, ExpenseStatus::Paid).await?;
        tx.commit().await?;

        tracing::info!(
            expense_id = %expense.id,
            transaction_group = %batch.group,
            settled,
            "Expense paid"
        );
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::ExpensePaid,
                    serde_json::json!({
                        "amount": expense.amount,
                        "currency": expense.currency,
                        "collective": payer.slug,
                    }),
                )
                .collective(payer.id)
                .expense(expense.id)
                .recipient(payee.id),
            )
            .await;

        Ok(PaidExpense {
            expense,
            transactions: batch.transactions,
            settled,
        })
    }
}
