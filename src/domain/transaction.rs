//! Ledger vocabulary shared by the builders, the database rows and the API.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Credit => "CREDIT",
            TransactionType::Debit => "DEBIT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Contribution,
    AddedFunds,
    Expense,
    HostFee,
    HostFeeShare,
    HostFeeShareDebt,
    PlatformTip,
    PlatformTipDebt,
}

impl TransactionKind {
    pub fn is_debt(self) -> bool {
        matches!(
            self,
            TransactionKind::HostFeeShareDebt | TransactionKind::PlatformTipDebt
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Contribution => "CONTRIBUTION",
            TransactionKind::AddedFunds => "ADDED_FUNDS",
            TransactionKind::Expense => "EXPENSE",
            TransactionKind::HostFee => "HOST_FEE",
            TransactionKind::HostFeeShare => "HOST_FEE_SHARE",
            TransactionKind::HostFeeShareDebt => "HOST_FEE_SHARE_DEBT",
            TransactionKind::PlatformTip => "PLATFORM_TIP",
            TransactionKind::PlatformTipDebt => "PLATFORM_TIP_DEBT",
        }
    }

    /// Invoice line label for debt kinds.
    pub fn invoice_label(self) -> Option<&'static str> {
        match self {
            TransactionKind::PlatformTipDebt => Some("Platform Tips"),
            TransactionKind::HostFeeShareDebt => Some("Shared Revenue"),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "settlement_status", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementStatus {
    Owed,
    Invoiced,
    Settled,
}

impl SettlementStatus {
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "OWED" => Some(SettlementStatus::Owed),
            "INVOICED" => Some(SettlementStatus::Invoiced),
            "SETTLED" => Some(SettlementStatus::Settled),
            _ => None,
        }
    }
}

/// Whether the platform's cut is collected at payment time or owed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementMode {
    Direct,
    Debt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_debt_kinds_are_debts() {
        assert!(TransactionKind::HostFeeShareDebt.is_debt());
        assert!(TransactionKind::PlatformTipDebt.is_debt());
        assert!(!TransactionKind::HostFeeShare.is_debt());
        assert!(!TransactionKind::Contribution.is_debt());
    }

    #[test]
    fn serializes_kinds_like_the_database() {
        let json = serde_json::to_string(&TransactionKind::HostFeeShareDebt).unwrap();
        assert_eq!(json, "\"HOST_FEE_SHARE_DEBT\"");
        assert_eq!(TransactionKind::HostFeeShareDebt.as_str(), "HOST_FEE_SHARE_DEBT");
    }

    #[test]
    fn parses_settlement_status_case_insensitively() {
        assert_eq!(SettlementStatus::parse("owed"), Some(SettlementStatus::Owed));
        assert_eq!(SettlementStatus::parse("SETTLED"), Some(SettlementStatus::Settled));
        assert_eq!(SettlementStatus::parse("paid"), None);
    }
}
