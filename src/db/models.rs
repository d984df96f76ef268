use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::{
    CollectiveType, ExpenseStatus, ExpenseType, Interval, OrderStatus, SettlementStatus,
    TransactionKind, TransactionType,
};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Collective {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub collective_type: CollectiveType,
    #[serde(skip_serializing)]
    pub email: Option<String>,
    pub currency: String,
    pub host_collective_id: Option<Uuid>,
    pub host_fee_percent: Option<BigDecimal>,
    pub is_host: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Collective {
    pub fn new(
        slug: String,
        name: String,
        collective_type: CollectiveType,
        email: Option<String>,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            slug,
            name,
            collective_type,
            email,
            currency,
            host_collective_id: None,
            host_fee_percent: None,
            is_host: false,
            approved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A collective is active once its host approved it. Hosts host themselves.
    pub fn is_hosted_and_approved(&self) -> bool {
        self.host_collective_id.is_some() && self.approved_at.is_some()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct ConnectedAccount {
    pub id: Uuid,
    pub collective_id: Uuid,
    pub service: String,
    pub username: String,
    pub token: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaymentMethod {
    pub id: Uuid,
    pub collective_id: Uuid,
    pub service: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub method_type: String,
    pub customer_id: Option<String>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
    pub currency: Option<String>,
    pub data: Option<serde_json::Value>,
    pub archived_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub from_collective_id: Uuid,
    pub collective_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub description: String,
    pub total_amount: i64,
    pub currency: String,
    pub platform_tip_amount: i64,
    pub tax_amount: i64,
    pub status: OrderStatus,
    pub recurrence_interval: Option<String>,
    pub next_charge_date: Option<DateTime<Utc>>,
    pub charge_retry_count: i32,
    pub external_id: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn interval(&self) -> Option<Interval> {
        self.recurrence_interval.as_deref().and_then(Interval::parse)
    }

    pub fn is_recurring(&self) -> bool {
        self.interval().is_some()
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    /// The account paying the expense.
    pub collective_id: Uuid,
    /// The payee.
    pub from_collective_id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub expense_type: ExpenseType,
    pub status: ExpenseStatus,
    pub description: String,
    pub amount: i64,
    pub currency: String,
    pub items: serde_json::Value,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One ledger row. Fees and taxes are negative.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub transaction_group: Uuid,
    pub kind: TransactionKind,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub entry_type: TransactionType,
    pub description: String,
    pub collective_id: Uuid,
    pub from_collective_id: Uuid,
    pub host_collective_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub amount: i64,
    pub currency: String,
    pub amount_in_host_currency: i64,
    pub host_currency: String,
    pub host_currency_fx_rate: BigDecimal,
    pub host_fee_in_host_currency: i64,
    pub platform_fee_in_host_currency: i64,
    pub payment_processor_fee_in_host_currency: i64,
    pub tax_amount: i64,
    pub net_amount_in_collective_currency: i64,
    pub is_refund: bool,
    pub is_debt: bool,
    pub is_disputed: bool,
    pub refund_transaction_id: Option<Uuid>,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransactionSettlement {
    pub id: Uuid,
    pub transaction_group: Uuid,
    pub kind: TransactionKind,
    pub settlement_status: SettlementStatus,
    pub expense_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PaypalProduct {
    pub id: String,
    pub collective_id: Uuid,
    pub tier_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Activity {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub activity_type: String,
    pub collective_id: Option<Uuid>,
    pub order_id: Option<Uuid>,
    pub expense_id: Option<Uuid>,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
