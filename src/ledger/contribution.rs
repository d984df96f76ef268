use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Entry, LedgerBatch, LedgerError};
use crate::domain::money::{from_host, is_valid_percent, percent_of, to_host};
use crate::domain::{SettlementMode, SettlementStatus, TransactionKind};

/// Money received for a collective, either through an order or added by its host.
#[derive(Debug, Clone)]
pub struct ContributionInput {
    pub kind: TransactionKind,
    pub order_id: Option<Uuid>,
    pub payment_method_id: Option<Uuid>,
    pub description: String,
    pub contributor_id: Uuid,
    pub contributor_host_id: Option<Uuid>,
    pub collective_id: Uuid,
    pub host_id: Uuid,
    pub platform_id: Uuid,
    /// Gross amount charged, tip and tax included, in `currency`.
    pub total_amount: i64,
    pub currency: String,
    pub platform_tip: i64,
    pub tax_amount: i64,
    pub host_currency: String,
    pub fx_rate: BigDecimal,
    pub payment_processor_fee_in_host_currency: i64,
    pub host_fee_percent: BigDecimal,
    pub host_fee_share_percent: BigDecimal,
    pub settlement_mode: SettlementMode,
    pub data: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeBreakdown {
    /// Amount credited to the collective, in the order currency.
    pub contribution_amount: i64,
    pub amount_in_host_currency: i64,
    pub platform_tip: i64,
    pub platform_tip_in_host_currency: i64,
    pub tax_in_host_currency: i64,
    pub host_fee_in_host_currency: i64,
    pub host_fee_share_in_host_currency: i64,
}

impl FeeBreakdown {
    /// What the card processor has to route to the platform when it collects
    /// its cut at payment time, in the order currency.
    pub fn application_fee(&self, fx_rate: &BigDecimal) -> i64 {
        self.platform_tip + from_host(self.host_fee_share_in_host_currency, fx_rate)
    }
}

fn validate(input: &ContributionInput) -> Result<(), LedgerError> {
    if input.total_amount <= 0 {
        return Err(LedgerError::InvalidAmount(
            "total amount must be greater than zero".to_string(),
        ));
    }
    if input.platform_tip < 0 || input.platform_tip >= input.total_amount {
        return Err(LedgerError::InvalidAmount(
            "platform tip must be between zero and the total amount".to_string(),
        ));
    }
    if input.tax_amount < 0 || input.tax_amount > input.total_amount - input.platform_tip {
        return Err(LedgerError::InvalidAmount(
            "tax amount exceeds the contribution".to_string(),
        ));
    }
    if input.fx_rate <= BigDecimal::zero() {
        return Err(LedgerError::InvalidRate(
            "fx rate must be greater than zero".to_string(),
        ));
    }
    if !is_valid_percent(&input.host_fee_percent) || !is_valid_percent(&input.host_fee_share_percent)
    {
        return Err(LedgerError::InvalidRate(
            "percentages must be between 0 and 100".to_string(),
        ));
    }
    Ok(())
}

pub fn fee_breakdown(input: &ContributionInput) -> Result<FeeBreakdown, LedgerError> {
    validate(input)?;

    let fx = &input.fx_rate;
    let contribution_amount = input.total_amount - input.platform_tip;
    let amount_in_host_currency = to_host(contribution_amount, fx);
    let tax_in_host_currency = to_host(input.tax_amount, fx);

    // Hosts do not charge themselves.
    let host_fee_in_host_currency = if input.collective_id == input.host_id {
        0
    } else {
        percent_of(
            amount_in_host_currency - tax_in_host_currency,
            &input.host_fee_percent,
        )
    };

    Ok(FeeBreakdown {
        contribution_amount,
        amount_in_host_currency,
        platform_tip: input.platform_tip,
        platform_tip_in_host_currency: to_host(input.platform_tip, fx),
        tax_in_host_currency,
        host_fee_in_host_currency,
        host_fee_share_in_host_currency: percent_of(
            host_fee_in_host_currency,
            &input.host_fee_share_percent,
        ),
    })
}

pub fn build_contribution(input: &ContributionInput) -> Result<LedgerBatch, LedgerError> {
    let fees = fee_breakdown(input)?;

    let processor_fee = input.payment_processor_fee_in_host_currency;
    if processor_fee < 0 || processor_fee > fees.amount_in_host_currency {
        return Err(LedgerError::InvalidAmount(
            "payment processor fee exceeds the contribution".to_string(),
        ));
    }

    let mut batch = LedgerBatch::new(input.created_at);
    batch.order_id = input.order_id;
    batch.payment_method_id = input.payment_method_id;
    batch.data = input.data.clone();

    let fx = &input.fx_rate;
    let unit = BigDecimal::from(1);

    let contribution = batch.credit(Entry {
        kind: input.kind,
        description: input.description.clone(),
        collective_id: input.collective_id,
        from_collective_id: input.contributor_id,
        host_collective_id: Some(input.host_id),
        amount: fees.contribution_amount,
        currency: &input.currency,
        amount_in_host_currency: fees.amount_in_host_currency,
        host_currency: &input.host_currency,
        fx_rate: fx,
        payment_processor_fee: processor_fee,
        tax_amount: input.tax_amount,
        is_debt: false,
    });
    batch.push_pair(contribution, input.contributor_host_id);

    if fees.host_fee_in_host_currency > 0 {
        let host_fee = batch.credit(Entry {
            kind: TransactionKind::HostFee,
            description: "Host Fee".to_string(),
            collective_id: input.host_id,
            from_collective_id: input.collective_id,
            host_collective_id: Some(input.host_id),
            amount: from_host(fees.host_fee_in_host_currency, fx),
            currency: &input.currency,
            amount_in_host_currency: fees.host_fee_in_host_currency,
            host_currency: &input.host_currency,
            fx_rate: fx,
            payment_processor_fee: 0,
            tax_amount: 0,
            is_debt: false,
        });
        batch.push_pair(host_fee, Some(input.host_id));
    }

    if fees.host_fee_share_in_host_currency > 0 {
        let share = fees.host_fee_share_in_host_currency;
        let host_fee_share = batch.credit(Entry {
            kind: TransactionKind::HostFeeShare,
            description: "Platform share of the host fee".to_string(),
            collective_id: input.platform_id,
            from_collective_id: input.host_id,
            host_collective_id: Some(input.platform_id),
            amount: share,
            currency: &input.host_currency,
            amount_in_host_currency: share,
            host_currency: &input.host_currency,
            fx_rate: &unit,
            payment_processor_fee: 0,
            tax_amount: 0,
            is_debt: false,
        });
        batch.push_pair(host_fee_share, Some(input.host_id));

        if input.settlement_mode == SettlementMode::Debt {
            let debt = batch.credit(Entry {
                kind: TransactionKind::HostFeeShareDebt,
                description: "Host fee share owed to the platform".to_string(),
                collective_id: input.host_id,
                from_collective_id: input.platform_id,
                host_collective_id: Some(input.host_id),
                amount: share,
                currency: &input.host_currency,
                amount_in_host_currency: share,
                host_currency: &input.host_currency,
                fx_rate: &unit,
                payment_processor_fee: 0,
                tax_amount: 0,
                is_debt: true,
            });
            batch.push_pair(debt, Some(input.platform_id));
            batch.owe(TransactionKind::HostFeeShareDebt, SettlementStatus::Owed);
        }
    }

    if fees.platform_tip > 0 {
        let tip = batch.credit(Entry {
            kind: TransactionKind::PlatformTip,
            description: "Financial contribution to the platform".to_string(),
            collective_id: input.platform_id,
            from_collective_id: input.contributor_id,
            host_collective_id: Some(input.platform_id),
            amount: fees.platform_tip,
            currency: &input.currency,
            amount_in_host_currency: fees.platform_tip_in_host_currency,
            host_currency: &input.host_currency,
            fx_rate: fx,
            payment_processor_fee: 0,
            tax_amount: 0,
            is_debt: false,
        });
        batch.push_pair(tip, input.contributor_host_id);

        if input.settlement_mode == SettlementMode::Debt {
            let debt = batch.credit(Entry {
                kind: TransactionKind::PlatformTipDebt,
                description: "Platform tip collected by the host".to_string(),
                collective_id: input.host_id,
                from_collective_id: input.platform_id,
                host_collective_id: Some(input.host_id),
                amount: fees.platform_tip_in_host_currency,
                currency: &input.host_currency,
                amount_in_host_currency: fees.platform_tip_in_host_currency,
                host_currency: &input.host_currency,
                fx_rate: &unit,
                payment_processor_fee: 0,
                tax_amount: 0,
                is_debt: true,
            });
            batch.push_pair(debt, Some(input.platform_id));
            batch.owe(TransactionKind::PlatformTipDebt, SettlementStatus::Owed);
        }
    }

    Ok(batch)
}

/// Funds a host received outside of any processor. Booked like a contribution
/// without order or processor fee, always in debt mode since the host holds
/// the money.
pub fn build_added_funds(input: &ContributionInput) -> Result<LedgerBatch, LedgerError> {
    let input = ContributionInput {
        kind: TransactionKind::AddedFunds,
        order_id: None,
        payment_method_id: None,
        payment_processor_fee_in_host_currency: 0,
        settlement_mode: SettlementMode::Debt,
        ..input.clone()
    };
    build_contribution(&input)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::TransactionType;
    use crate::ledger::test_support::assert_double_entry;
    use std::str::FromStr;

    pub(crate) fn input() -> ContributionInput {
        ContributionInput {
            kind: TransactionKind::Contribution,
            order_id: Some(Uuid::new_v4()),
            payment_method_id: Some(Uuid::new_v4()),
            description: "Monthly financial contribution".to_string(),
            contributor_id: Uuid::new_v4(),
            contributor_host_id: None,
            collective_id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            platform_id: Uuid::new_v4(),
            total_amount: 11000,
            currency: "USD".to_string(),
            platform_tip: 1000,
            tax_amount: 0,
            host_currency: "USD".to_string(),
            fx_rate: BigDecimal::from(1),
            payment_processor_fee_in_host_currency: 350,
            host_fee_percent: BigDecimal::from(10),
            host_fee_share_percent: BigDecimal::from(15),
            settlement_mode: SettlementMode::Debt,
            data: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn computes_the_fee_cascade() {
        let fees = fee_breakdown(&input()).unwrap();
        assert_eq!(fees.contribution_amount, 10000);
        assert_eq!(fees.host_fee_in_host_currency, 1000);
        assert_eq!(fees.host_fee_share_in_host_currency, 150);
        assert_eq!(fees.platform_tip_in_host_currency, 1000);
        assert_eq!(fees.application_fee(&BigDecimal::from(1)), 1150);
    }

    #[test]
    fn host_fee_excludes_taxes() {
        let mut input = input();
        input.tax_amount = 2000;
        let fees = fee_breakdown(&input).unwrap();
        assert_eq!(fees.host_fee_in_host_currency, 800);
    }

    #[test]
    fn hosts_do_not_pay_themselves_a_host_fee() {
        let mut input = input();
        input.collective_id = input.host_id;
        let batch = build_contribution(&input).unwrap();
        assert!(batch
            .find(TransactionKind::HostFee, TransactionType::Credit)
            .is_none());
        assert!(batch
            .find(TransactionKind::HostFeeShare, TransactionType::Credit)
            .is_none());
    }

    #[test]
    fn debt_mode_creates_all_pairs_and_settlements() {
        let input = input();
        let batch = build_contribution(&input).unwrap();

        let kinds: Vec<_> = batch.credits().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TransactionKind::Contribution,
                TransactionKind::HostFee,
                TransactionKind::HostFeeShare,
                TransactionKind::HostFeeShareDebt,
                TransactionKind::PlatformTip,
                TransactionKind::PlatformTipDebt,
            ]
        );
        assert_double_entry(&batch.transactions);
        assert!(batch.transactions.iter().all(|t| t.transaction_group == batch.group));
        assert!(batch.transactions.iter().all(|t| t.order_id == input.order_id));

        let owed: Vec<_> = batch.settlements.iter().map(|s| s.kind).collect();
        assert_eq!(
            owed,
            vec![TransactionKind::HostFeeShareDebt, TransactionKind::PlatformTipDebt]
        );
        assert!(batch
            .settlements
            .iter()
            .all(|s| s.status == SettlementStatus::Owed && s.transaction_group == batch.group));
    }

    #[test]
    fn contribution_row_carries_processor_fee() {
        let input = input();
        let batch = build_contribution(&input).unwrap();
        let credit = batch
            .find(TransactionKind::Contribution, TransactionType::Credit)
            .unwrap();

        assert_eq!(credit.collective_id, input.collective_id);
        assert_eq!(credit.from_collective_id, input.contributor_id);
        assert_eq!(credit.amount, 10000);
        assert_eq!(credit.payment_processor_fee_in_host_currency, -350);
        assert_eq!(credit.net_amount_in_collective_currency, 9650);
    }

    #[test]
    fn direct_mode_skips_debts() {
        let mut input = input();
        input.settlement_mode = SettlementMode::Direct;
        let batch = build_contribution(&input).unwrap();

        assert!(batch.transactions.iter().all(|t| !t.is_debt));
        assert!(batch.settlements.is_empty());
        assert_eq!(batch.transactions.len(), 8);
    }

    #[test]
    fn balances_add_up_per_account() {
        let input = input();
        let batch = build_contribution(&input).unwrap();
        let balance = |id: Uuid| -> i64 {
            batch
                .transactions
                .iter()
                .filter(|t| t.collective_id == id)
                .map(|t| t.net_amount_in_collective_currency)
                .sum()
        };

        // 10000 - 350 processor fee - 1000 host fee
        assert_eq!(balance(input.collective_id), 8650);
        // host fee 1000, share moved out then back as debt, tip held as debt
        assert_eq!(balance(input.host_id), 1000 + 1000);
        // tip and share are credited then offset by the debts
        assert_eq!(balance(input.platform_id), 0);
        assert_eq!(balance(input.contributor_id), -11000);
    }

    #[test]
    fn converts_to_host_currency() {
        let mut input = input();
        input.currency = "EUR".to_string();
        input.fx_rate = BigDecimal::from_str("1.2").unwrap();
        input.payment_processor_fee_in_host_currency = 0;
        let batch = build_contribution(&input).unwrap();

        let credit = batch
            .find(TransactionKind::Contribution, TransactionType::Credit)
            .unwrap();
        assert_eq!(credit.amount_in_host_currency, 12000);
        let host_fee = batch
            .find(TransactionKind::HostFee, TransactionType::Credit)
            .unwrap();
        assert_eq!(host_fee.amount_in_host_currency, 1200);
        assert_eq!(host_fee.amount, 1000);
        assert_eq!(host_fee.currency, "EUR");
        let share = batch
            .find(TransactionKind::HostFeeShare, TransactionType::Credit)
            .unwrap();
        assert_eq!(share.amount, 180);
        assert_eq!(share.currency, "USD");
    }

    #[test]
    fn rejects_invalid_amounts() {
        let mut bad_tip = input();
        bad_tip.platform_tip = bad_tip.total_amount;
        assert!(matches!(
            build_contribution(&bad_tip),
            Err(LedgerError::InvalidAmount(_))
        ));

        let mut bad_fee = input();
        bad_fee.payment_processor_fee_in_host_currency = 20000;
        assert!(matches!(
            build_contribution(&bad_fee),
            Err(LedgerError::InvalidAmount(_))
        ));

        let mut bad_rate = input();
        bad_rate.fx_rate = BigDecimal::from(0);
        assert!(matches!(
            build_contribution(&bad_rate),
            Err(LedgerError::InvalidRate(_))
        ));

        let mut bad_percent = input();
        bad_percent.host_fee_percent = BigDecimal::from(101);
        assert!(matches!(
            build_contribution(&bad_percent),
            Err(LedgerError::InvalidRate(_))
        ));
    }

    #[test]
    fn added_funds_are_booked_as_debt_without_order() {
        let mut input = input();
        input.settlement_mode = SettlementMode::Direct;
        let batch = build_added_funds(&input).unwrap();

        let credit = batch
            .find(TransactionKind::AddedFunds, TransactionType::Credit)
            .unwrap();
        assert_eq!(credit.amount, 10000);
        assert_eq!(credit.payment_processor_fee_in_host_currency, 0);
        assert!(batch.transactions.iter().all(|t| t.order_id.is_none()));
        assert!(batch
            .find(TransactionKind::Contribution, TransactionType::Credit)
            .is_none());
        assert_eq!(batch.settlements.len(), 2);
        assert_double_entry(&batch.transactions);
    }
}
