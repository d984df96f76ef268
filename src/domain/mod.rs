//! Framework-agnostic vocabulary of the ledger.

pub mod expense;
pub mod money;
pub mod order;
pub mod transaction;

use serde::{Deserialize, Serialize};

pub use expense::{ExpenseItem, ExpenseStatus, ExpenseType};
pub use order::{Interval, OrderStatus};
pub use transaction::{SettlementMode, SettlementStatus, TransactionKind, TransactionType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "collective_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CollectiveType {
    User,
    Organization,
    Collective,
}
