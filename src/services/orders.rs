use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::PlatformSettings;
use crate::db::models::{Collective, Order, PaymentMethod, Transaction};
use crate::db::{queries, violates_unique};
use crate::domain::order::{first_charge_date, next_charge_date};
use crate::domain::{Interval, OrderStatus, SettlementMode, TransactionKind};
use crate::error::AppError;
use crate::ledger::{
    build_added_funds, build_contribution, build_refund, fee_breakdown, ContributionInput,
    LedgerBatch, RefundInput,
};
use crate::payments::{
    Charge, ChargeOutcome, OrderContext, PaymentError, PaymentProvider, ProviderFeatures,
    ProviderRegistry, RefundContext,
};
use crate::services::notifications::{ActivityType, NewActivity, Notifier};
use crate::validation::{
    sanitize_string, validate_currency, validate_max_len, validate_non_negative_amount,
    validate_positive_amount, ValidationError, DESCRIPTION_MAX_LEN,
};

/// Partial unique index over contribution credits keyed by processor charge.
const ORDER_CHARGE_INDEX: &str = "uq_transactions_order_charge";

/// A scheduled renewal that did not settle on the spot. The order stays
/// `ACTIVE` and the recurring job retries it.
pub fn off_session_failure(outcome: &ChargeOutcome) -> Option<PaymentError> {
    match outcome {
        ChargeOutcome::Paid(_) => None,
        ChargeOutcome::Pending => Some(PaymentError::Declined(
            "renewal is waiting for a manual payment".to_string(),
        )),
        ChargeOutcome::RequiresConfirmation { external_id, .. } => Some(PaymentError::Declined(
            format!("renewal {} requires the contributor to confirm", external_id),
        )),
        ChargeOutcome::Processing { external_id } => Some(PaymentError::Declined(format!(
            "renewal {} did not complete",
            external_id
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub from_collective_id: Uuid,
    pub collective_id: Uuid,
    pub payment_method_id: Option<Uuid>,
    pub tier_id: Option<Uuid>,
    pub description: Option<String>,
    pub total_amount: i64,
    pub currency: String,
    #[serde(default)]
    pub platform_tip_amount: i64,
    #[serde(default)]
    pub tax_amount: i64,
    pub interval: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderResult {
    pub order: Order,
    /// Present when the contributor must confirm the payment client-side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

/// Amounts confirmed by the host for a manual payment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MarkPaid {
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub payment_processor_fee: i64,
    pub platform_tip: Option<i64>,
    pub host_currency_fx_rate: Option<BigDecimal>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddFunds {
    pub amount: i64,
    pub description: Option<String>,
    /// Who the money comes from; defaults to the host.
    pub source_collective_id: Option<Uuid>,
    #[serde(default)]
    pub platform_tip: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundResult {
    pub transaction_group: Uuid,
    pub transactions: Vec<Transaction>,
    pub order: Option<Order>,
}

/// Everyone involved in an order.
struct Parties {
    contributor: Collective,
    collective: Collective,
    host: Collective,
    platform: Collective,
}

#[derive(Clone)]
pub struct OrderService {
    pool: PgPool,
    providers: ProviderRegistry,
    notifier: Notifier,
    platform: PlatformSettings,
}

impl OrderService {
    pub fn new(
        pool: PgPool,
        providers: ProviderRegistry,
        notifier: Notifier,
        platform: PlatformSettings,
    ) -> Self {
        Self {
            pool,
            providers,
            notifier,
            platform,
        }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub async fn platform_collective(&self) -> Result<Collective, AppError> {
        queries::get_collective_by_slug(&self.pool, &self.platform.collective_slug)
            .await
            .map_err(|e| match e {
                sqlx::Error::RowNotFound => AppError::Internal(format!(
                    "platform collective '{}' does not exist",
                    self.platform.collective_slug
                )),
                other => AppError::Database(other),
            })
    }

    async fn host_of(&self, collective: &Collective) -> Result<Collective, AppError> {
        let host_id = collective.host_collective_id.ok_or_else(|| {
            AppError::Validation(format!("collective {} has no host", collective.slug))
        })?;
        Ok(queries::get_collective(&self.pool, host_id).await?)
    }

    async fn parties(&self, order: &Order) -> Result<Parties, AppError> {
        let contributor = queries::get_collective(&self.pool, order.from_collective_id).await?;
        let collective = queries::get_collective(&self.pool, order.collective_id).await?;
        let host = self.host_of(&collective).await?;
        let platform = self.platform_collective().await?;
        Ok(Parties {
            contributor,
            collective,
            host,
            platform,
        })
    }

    async fn payment_method(
        &self,
        order: &Order,
    ) -> Result<(PaymentMethod, std::sync::Arc<dyn PaymentProvider>), AppError> {
        let id = order
            .payment_method_id
            .ok_or_else(|| AppError::Validation("order has no payment method".to_string()))?;
        let payment_method = queries::get_payment_method(&self.pool, id).await?;
        if payment_method.archived_at.is_some() {
            return Err(AppError::Validation("payment method is archived".to_string()));
        }
        let provider = self.providers.get(&payment_method.service)?;
        Ok((payment_method, provider))
    }

    pub async fn create_order(&self, input: CreateOrder) -> Result<Order, AppError> {
        validate_positive_amount("total_amount", input.total_amount)?;
        validate_non_negative_amount("platform_tip_amount", input.platform_tip_amount)?;
        validate_non_negative_amount("tax_amount", input.tax_amount)?;
        validate_currency(&input.currency)?;
        if input.platform_tip_amount >= input.total_amount {
            return Err(ValidationError::new(
                "platform_tip_amount",
                "must be lower than the total amount",
            )
            .into());
        }
        if input.tax_amount > input.total_amount - input.platform_tip_amount {
            return Err(ValidationError::new("tax_amount", "exceeds the contribution").into());
        }
        let interval = match input.interval.as_deref() {
            Some(value) => Some(Interval::parse(value).ok_or_else(|| {
                ValidationError::new("interval", "must be 'month' or 'year'")
            })?),
            None => None,
        };

        let collective = queries::get_collective(&self.pool, input.collective_id).await?;
        if !collective.is_hosted_and_approved() {
            return Err(AppError::Validation(format!(
                "collective {} cannot receive contributions yet",
                collective.slug
            )));
        }
        let contributor = queries::get_collective(&self.pool, input.from_collective_id).await?;

        if let Some(payment_method_id) = input.payment_method_id {
            let payment_method = queries::get_payment_method(&self.pool, payment_method_id).await?;
            if payment_method.collective_id != contributor.id {
                return Err(AppError::Validation(
                    "payment method does not belong to the contributor".to_string(),
                ));
            }
        }

        let description = match input.description {
            Some(description) => {
                let description = sanitize_string(&description);
                validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;
                description
            }
            None => match interval {
                Some(Interval::Month) => format!("Monthly financial contribution to {}", collective.name),
                Some(Interval::Year) => format!("Yearly financial contribution to {}", collective.name),
                None => format!("Financial contribution to {}", collective.name),
            },
        };

        let now = Utc::now();
        let order = Order {
            id: Uuid::new_v4(),
            from_collective_id: contributor.id,
            collective_id: collective.id,
            tier_id: input.tier_id,
            payment_method_id: input.payment_method_id,
            description,
            total_amount: input.total_amount,
            currency: input.currency,
            platform_tip_amount: input.platform_tip_amount,
            tax_amount: input.tax_amount,
            status: OrderStatus::New,
            recurrence_interval: interval.map(|i| i.as_str().to_string()),
            next_charge_date: None,
            charge_retry_count: 0,
            external_id: None,
            processed_at: None,
            data: None,
            created_at: now,
            updated_at: now,
        };

        let order = queries::insert_order(&self.pool, &order).await?;
        tracing::info!(
            order_id = %order.id,
            collective = %collective.slug,
            amount = order.total_amount,
            currency = %order.currency,
            "Order created"
        );
        Ok(order)
    }

    fn contribution_input(
        &self,
        order: &Order,
        parties: &Parties,
        charge: &Charge,
        features: ProviderFeatures,
        total_amount: i64,
        platform_tip: i64,
    ) -> Result<ContributionInput, AppError> {
        let fx_rate = match &charge.host_currency_fx_rate {
            Some(rate) => rate.clone(),
            None if order.currency == parties.host.currency => BigDecimal::from(1),
            None => {
                return Err(AppError::Validation(format!(
                    "a charge in {} needs an exchange rate to {}",
                    order.currency, parties.host.currency
                )))
            }
        };

        let host_fee_percent = if features.charges_host_fee {
            parties
                .collective
                .host_fee_percent
                .clone()
                .or_else(|| parties.host.host_fee_percent.clone())
                .unwrap_or_else(|| BigDecimal::from(0))
        } else {
            BigDecimal::from(0)
        };

        let mut data = serde_json::json!({ "charge_id": charge.external_id });
        if let (Some(target), Some(extra)) = (data.as_object_mut(), charge.data.as_object()) {
            for (key, value) in extra {
                target.insert(key.clone(), value.clone());
            }
        }

        Ok(ContributionInput {
            kind: TransactionKind::Contribution,
            order_id: Some(order.id),
            payment_method_id: order.payment_method_id,
            description: order.description.clone(),
            contributor_id: parties.contributor.id,
            contributor_host_id: parties.contributor.host_collective_id,
            collective_id: parties.collective.id,
            host_id: parties.host.id,
            platform_id: parties.platform.id,
            total_amount,
            currency: order.currency.clone(),
            platform_tip,
            tax_amount: order.tax_amount,
            host_currency: parties.host.currency.clone(),
            fx_rate,
            payment_processor_fee_in_host_currency: charge.processor_fee_in_host_currency,
            host_fee_percent,
            host_fee_share_percent: self.platform.host_fee_share_percent.clone(),
            settlement_mode: features.settlement,
            data: Some(data),
            created_at: Utc::now(),
        })
    }

    /// Platform cut routed by the processor at payment time, in order currency.
    fn application_fee(
        &self,
        order: &Order,
        parties: &Parties,
        features: ProviderFeatures,
    ) -> Result<i64, AppError> {
        if features.settlement != SettlementMode::Direct {
            return Ok(0);
        }
        let unit = BigDecimal::from(1);
        let preview = Charge {
            external_id: String::new(),
            processor_fee_in_host_currency: 0,
            host_currency_fx_rate: Some(unit.clone()),
            data: serde_json::Value::Null,
            balance_debit: None,
        };
        let input = self.contribution_input(
            order,
            parties,
            &preview,
            features,
            order.total_amount,
            order.platform_tip_amount,
        )?;
        Ok(fee_breakdown(&input)?.application_fee(&unit))
    }

    /// Writes the contribution batch and moves the order to its paid state.
    async fn record_charge(
        &self,
        order: &Order,
        parties: &Parties,
        charge: &Charge,
        features: ProviderFeatures,
        amounts: (i64, i64),
    ) -> Result<Order, AppError> {
        let input =
            self.contribution_input(order, parties, charge, features, amounts.0, amounts.1)?;
        let batch = build_contribution(&input)?;

        let (status, next_date) = match order.interval() {
            Some(interval) if features.schedules_charges => {
                let next = match order.next_charge_date {
                    Some(previous) if order.status == OrderStatus::Active => {
                        next_charge_date(interval, previous)
                    }
                    _ => first_charge_date(interval, input.created_at),
                };
                (OrderStatus::Active, next)
            }
            Some(_) => (OrderStatus::Active, None),
            None => (OrderStatus::Paid, None),
        };

        let mut tx = self.pool.begin().await?;
        let locked = queries::get_order_for_update(&mut tx, order.id).await?;
        if queries::charge_already_recorded(&mut *tx, order.id, &charge.external_id).await? {
            tracing::info!(
                order_id = %order.id,
                charge_id = %charge.external_id,
                "Charge already recorded"
            );
            return Ok(locked);
        }
        if !locked.status.accepts_charge(status) {
            return Err(AppError::Conflict(format!(
                "order {} is {} and cannot become {}",
                order.id,
                locked.status.as_str(),
                status.as_str()
            )));
        }
        if let Some(debit) = &charge.balance_debit {
            queries::lock_collective(&mut tx, debit.collective_id).await?;
            let available =
                queries::get_balance(&mut *tx, debit.collective_id, &debit.currency).await?;
            if available < debit.amount {
                return Err(PaymentError::InsufficientBalance {
                    available,
                    required: debit.amount,
                }
                .into());
            }
        }
        if let Err(e) = queries::insert_batch(&mut tx, &batch).await {
            if violates_unique(&e, ORDER_CHARGE_INDEX) {
                drop(tx);
                tracing::info!(
                    order_id = %order.id,
                    charge_id = %charge.external_id,
                    "Charge recorded concurrently"
                );
                return Ok(queries::get_order(&self.pool, order.id).await?);
            }
            return Err(e.into());
        }
        let updated =
            queries::mark_order_charged(&mut tx, order.id, status, next_date, Some(&charge.external_id))
                .await?;
        tx.commit().await?;

        tracing::info!(
            order_id = %order.id,
            transaction_group = %batch.group,
            rows = batch.transactions.len(),
            status = updated.status.as_str(),
            "Contribution recorded"
        );

        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderConfirmed,
                    serde_json::json!({
                        "amount": amounts.0,
                        "currency": order.currency,
                        "collective": parties.collective.slug,
                        "transaction_group": batch.group,
                    }),
                )
                .collective(parties.collective.id)
                .order(order.id)
                .recipient(parties.contributor.id),
            )
            .await;

        Ok(updated)
    }

    async fn fail_order(&self, order: &Order, error: &PaymentError) {
        tracing::warn!(order_id = %order.id, error = %error, "Order payment failed");
        if let Err(e) = queries::update_order_status(&self.pool, order.id, OrderStatus::Error).await {
            tracing::error!(order_id = %order.id, error = %e, "Failed to mark order as errored");
        }
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderPaymentFailed,
                    serde_json::json!({
                        "amount": order.total_amount,
                        "currency": order.currency,
                        "error": error.to_string(),
                    }),
                )
                .collective(order.collective_id)
                .order(order.id)
                .recipient(order.from_collective_id),
            )
            .await;
    }

    async fn charge(
        &self,
        order: &Order,
        off_session: bool,
    ) -> Result<OrderResult, AppError> {
        let (payment_method, provider) = self.payment_method(order).await?;
        let features = provider.features();
        if order.is_recurring() && !features.recurring {
            return Err(AppError::BadRequest(format!(
                "{} does not support recurring contributions",
                provider.service()
            )));
        }

        let parties = self.parties(order).await?;
        let host_account =
            queries::get_connected_account(&self.pool, parties.host.id, provider.service()).await?;
        let application_fee = self.application_fee(order, &parties, features)?;

        let ctx = OrderContext {
            order,
            payment_method: &payment_method,
            contributor: &parties.contributor,
            collective: &parties.collective,
            host: &parties.host,
            host_account: host_account.as_ref(),
            application_fee,
            off_session,
        };

        let outcome = match provider.process_order(&ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // Scheduled charges are retried by the recurring job.
                if !off_session {
                    self.fail_order(order, &e).await;
                }
                return Err(e.into());
            }
        };

        if off_session {
            if let Some(e) = off_session_failure(&outcome) {
                tracing::warn!(order_id = %order.id, error = %e, "Renewal did not complete");
                return Err(e.into());
            }
        }

        match outcome {
            ChargeOutcome::Paid(charge) => {
                let order = self
                    .record_charge(
                        order,
                        &parties,
                        &charge,
                        features,
                        (order.total_amount, order.platform_tip_amount),
                    )
                    .await
                    .map_err(|e| {
                        if charge.balance_debit.is_none() {
                            tracing::error!(
                                order_id = %order.id,
                                charge_id = %charge.external_id,
                                error = %e,
                                "Charge succeeded but could not be recorded"
                            );
                        }
                        e
                    })?;
                Ok(OrderResult {
                    order,
                    client_secret: None,
                })
            }
            ChargeOutcome::Pending => {
                let order =
                    queries::update_order_status(&self.pool, order.id, OrderStatus::Pending).await?;
                self.notifier
                    .notify(
                        NewActivity::new(
                            ActivityType::OrderPending,
                            serde_json::json!({
                                "amount": order.total_amount,
                                "currency": order.currency,
                                "collective": parties.collective.slug,
                            }),
                        )
                        .collective(parties.collective.id)
                        .order(order.id)
                        .recipient(parties.contributor.id),
                    )
                    .await;
                Ok(OrderResult {
                    order,
                    client_secret: None,
                })
            }
            ChargeOutcome::RequiresConfirmation {
                external_id,
                client_secret,
            } => {
                queries::set_order_external_id(&self.pool, order.id, &external_id).await?;
                let order = queries::update_order_status(
                    &self.pool,
                    order.id,
                    OrderStatus::RequireClientConfirmation,
                )
                .await?;
                Ok(OrderResult {
                    order,
                    client_secret: Some(client_secret),
                })
            }
            ChargeOutcome::Processing { external_id } => {
                queries::set_order_external_id(&self.pool, order.id, &external_id).await?;
                let order =
                    queries::update_order_status(&self.pool, order.id, OrderStatus::Processing)
                        .await?;
                Ok(OrderResult {
                    order,
                    client_secret: None,
                })
            }
        }
    }

    pub async fn execute_order(&self, order_id: Uuid) -> Result<OrderResult, AppError> {
        let order = queries::get_order(&self.pool, order_id).await?;
        if order.status != OrderStatus::New {
            return Err(AppError::Conflict(format!(
                "order {} was already processed ({})",
                order.id,
                order.status.as_str()
            )));
        }
        self.charge(&order, false).await
    }

    /// Charges an `ACTIVE` recurring order without the contributor present.
    pub async fn charge_recurring(&self, order: &Order) -> Result<Order, AppError> {
        let result = self.charge(order, true).await?;
        match result.order.status {
            OrderStatus::Active | OrderStatus::Paid => Ok(result.order),
            other => Err(AppError::Payment(format!(
                "recurring charge ended in {}",
                other.as_str()
            ))),
        }
    }

    pub async fn features_for(&self, order: &Order) -> Result<ProviderFeatures, AppError> {
        let (_, provider) = self.payment_method(order).await?;
        Ok(provider.features())
    }

    /// Records a charge the processor confirmed asynchronously. Safe to call
    /// more than once for the same charge.
    pub async fn record_external_charge(
        &self,
        order_id: Uuid,
        charge: Charge,
    ) -> Result<Order, AppError> {
        let order = queries::get_order(&self.pool, order_id).await?;
        let features = self.features_for(&order).await?;
        let parties = self.parties(&order).await?;
        self.record_charge(
            &order,
            &parties,
            &charge,
            features,
            (order.total_amount, order.platform_tip_amount),
        )
        .await
    }

    /// Host confirmation of a manual payment, e.g. a bank transfer.
    pub async fn mark_pending_as_paid(
        &self,
        order_id: Uuid,
        input: MarkPaid,
    ) -> Result<Order, AppError> {
        let order = queries::get_order(&self.pool, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(AppError::Conflict(format!(
                "order {} is {}, only PENDING orders can be marked as paid",
                order.id,
                order.status.as_str()
            )));
        }

        let total_amount = input.amount_received.unwrap_or(order.total_amount);
        let platform_tip = input.platform_tip.unwrap_or(order.platform_tip_amount);
        validate_positive_amount("amount_received", total_amount)?;
        validate_non_negative_amount("payment_processor_fee", input.payment_processor_fee)?;
        validate_non_negative_amount("platform_tip", platform_tip)?;

        let features = self.features_for(&order).await?;
        let parties = self.parties(&order).await?;
        let charge = Charge {
            external_id: format!("manual_{}", order.id),
            processor_fee_in_host_currency: input.payment_processor_fee,
            host_currency_fx_rate: input.host_currency_fx_rate,
            data: serde_json::json!({ "amount_received": total_amount }),
            balance_debit: None,
        };

        self.record_charge(&order, &parties, &charge, features, (total_amount, platform_tip))
            .await
    }

    async fn transition(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        let order = queries::get_order_for_update(&mut tx, order_id).await?;
        if !order.status.can_transition_to(next) {
            return Err(AppError::Conflict(format!(
                "order {} cannot go from {} to {}",
                order.id,
                order.status.as_str(),
                next.as_str()
            )));
        }
        let order = queries::update_order_status(&mut *tx, order_id, next).await?;
        tx.commit().await?;
        tracing::info!(order_id = %order.id, status = next.as_str(), "Order status updated");
        Ok(order)
    }

    pub async fn mark_expired(&self, order_id: Uuid) -> Result<Order, AppError> {
        self.transition(order_id, OrderStatus::Expired).await
    }

    pub async fn cancel(&self, order_id: Uuid) -> Result<Order, AppError> {
        let order = self.transition(order_id, OrderStatus::Cancelled).await?;
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderCancelled,
                    serde_json::json!({
                        "amount": order.total_amount,
                        "currency": order.currency,
                    }),
                )
                .collective(order.collective_id)
                .order(order.id)
                .recipient(order.from_collective_id),
            )
            .await;
        Ok(order)
    }

    /// Fails a first payment the processor reported as failed after the fact.
    /// Declined renewals leave `ACTIVE` orders untouched.
    pub async fn mark_payment_failed(&self, order_id: Uuid, reason: &str) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        let order = queries::get_order_for_update(&mut tx, order_id).await?;
        if order.status == OrderStatus::Active {
            tracing::info!(
                order_id = %order.id,
                reason,
                retry_count = order.charge_retry_count,
                "Renewal failure left to the recurring schedule"
            );
            return Ok(order);
        }
        if !order.status.awaits_payment() {
            return Err(AppError::Conflict(format!(
                "order {} is {} and is not awaiting a payment",
                order.id,
                order.status.as_str()
            )));
        }
        let order = queries::update_order_status(&mut *tx, order_id, OrderStatus::Error).await?;
        tx.commit().await?;
        tracing::warn!(order_id = %order.id, reason, "Order payment failed");

        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderPaymentFailed,
                    serde_json::json!({
                        "amount": order.total_amount,
                        "currency": order.currency,
                        "error": reason,
                    }),
                )
                .collective(order.collective_id)
                .order(order.id)
                .recipient(order.from_collective_id),
            )
            .await;
        Ok(order)
    }

    /// Reverses a transaction group. `refunded_fee` is used when the
    /// processor already refunded and reported its fee.
    pub async fn refund_transaction(
        &self,
        transaction_id: Uuid,
        skip_provider: bool,
        refunded_fee: Option<i64>,
    ) -> Result<RefundResult, AppError> {
        let transaction = queries::get_transaction(&self.pool, transaction_id).await?;
        let group = transaction.transaction_group;
        let original = queries::get_transaction_group(&self.pool, group).await?;
        if original
            .iter()
            .any(|t| t.is_refund || t.refund_transaction_id.is_some())
        {
            return Err(AppError::Conflict(format!(
                "transaction group {} was already refunded",
                group
            )));
        }

        let order = match transaction.order_id {
            Some(order_id) => Some(queries::get_order(&self.pool, order_id).await?),
            None => None,
        };

        let mut refunded_processor_fee = refunded_fee.unwrap_or(0);
        let mut refund_id = None;
        if let (Some(order), false) = (&order, skip_provider) {
            let credit = original
                .iter()
                .find(|t| {
                    t.kind == TransactionKind::Contribution
                        && t.entry_type == crate::domain::TransactionType::Credit
                })
                .ok_or_else(|| {
                    AppError::Validation(format!("group {} has no contribution", group))
                })?;
            let (payment_method, provider) = self.payment_method(order).await?;
            let collective = queries::get_collective(&self.pool, order.collective_id).await?;
            let host = self.host_of(&collective).await?;
            let host_account =
                queries::get_connected_account(&self.pool, host.id, provider.service()).await?;

            let outcome = provider
                .refund(&RefundContext {
                    order,
                    payment_method: &payment_method,
                    transaction: credit,
                    host_account: host_account.as_ref(),
                })
                .await?;
            refunded_processor_fee = outcome.refunded_processor_fee;
            refund_id = outcome.external_id;
        }

        let (batch, order) = match self
            .book_refund(group, order, refunded_processor_fee, refund_id.as_deref())
            .await
        {
            Ok(booked) => booked,
            Err(e) => {
                if let Some(refund_id) = &refund_id {
                    tracing::error!(
                        transaction_group = %group,
                        refund_id = %refund_id,
                        refunded_processor_fee,
                        error = %e,
                        "Processor refunded but the refund could not be recorded"
                    );
                }
                return Err(e);
            }
        };

        tracing::info!(
            transaction_group = %group,
            refund_group = %batch.group,
            refunded_processor_fee,
            "Transaction group refunded"
        );

        if let Some(order) = &order {
            self.notifier
                .notify(
                    NewActivity::new(
                        ActivityType::OrderRefunded,
                        serde_json::json!({
                            "amount": order.total_amount,
                            "currency": order.currency,
                            "transaction_group": batch.group,
                        }),
                    )
                    .collective(order.collective_id)
                    .order(order.id)
                    .recipient(order.from_collective_id),
                )
                .await;
        }

        Ok(RefundResult {
            transaction_group: batch.group,
            transactions: batch.transactions,
            order,
        })
    }

    /// Writes the reversal of `group` and moves the order to `REFUNDED`.
    async fn book_refund(
        &self,
        group: Uuid,
        order: Option<Order>,
        refunded_processor_fee: i64,
        refund_id: Option<&str>,
    ) -> Result<(LedgerBatch, Option<Order>), AppError> {
        let mut tx = self.pool.begin().await?;
        let original = queries::get_transaction_group(&mut *tx, group).await?;
        let settlements = queries::get_group_settlements(&mut *tx, group).await?;
        let refund = build_refund(&RefundInput {
            original: &original,
            refunded_processor_fee,
            settlements: &settlements,
            data: Some(serde_json::json!({ "refund_id": refund_id })),
            created_at: Utc::now(),
        })?;

        queries::insert_batch(&mut tx, &refund.batch).await?;
        for (original_id, refund_row_id) in &refund.links {
            queries::link_refund(&mut tx, *original_id, *refund_row_id).await?;
        }
        for kind in &refund.settle_original {
            queries::update_settlement_status(
                &mut tx,
                group,
                *kind,
                crate::domain::SettlementStatus::Settled,
            )
            .await?;
        }

        let order = match order {
            Some(order) if order.status.can_transition_to(OrderStatus::Refunded) => Some(
                queries::update_order_status(&mut *tx, order.id, OrderStatus::Refunded).await?,
            ),
            other => other,
        };
        tx.commit().await?;
        Ok((refund.batch, order))
    }

    pub async fn mark_disputed(&self, order_id: Uuid) -> Result<Order, AppError> {
        let mut tx = self.pool.begin().await?;
        let order = queries::get_order_for_update(&mut tx, order_id).await?;
        if !order.status.can_transition_to(OrderStatus::Disputed) {
            return Err(AppError::Conflict(format!(
                "order {} is {} and cannot be disputed",
                order.id,
                order.status.as_str()
            )));
        }
        let flagged = queries::mark_order_transactions_disputed(&mut tx, order_id).await?;
        let order = queries::update_order_status(&mut *tx, order_id, OrderStatus::Disputed).await?;
        tx.commit().await?;

        tracing::warn!(order_id = %order.id, flagged, "Order disputed");
        self.notifier
            .notify(
                NewActivity::new(
                    ActivityType::OrderDisputed,
                    serde_json::json!({
                        "amount": order.total_amount,
                        "currency": order.currency,
                    }),
                )
                .collective(order.collective_id)
                .order(order.id),
            )
            .await;
        Ok(order)
    }

    /// Money received by a host outside of any processor, credited directly.
    pub async fn add_funds(
        &self,
        collective: &Collective,
        input: AddFunds,
    ) -> Result<LedgerBatch, AppError> {
        validate_positive_amount("amount", input.amount)?;
        validate_non_negative_amount("platform_tip", input.platform_tip)?;
        if input.platform_tip >= input.amount {
            return Err(ValidationError::new("platform_tip", "must be lower than the amount").into());
        }
        if !collective.is_hosted_and_approved() {
            return Err(AppError::Validation(format!(
                "collective {} is not hosted",
                collective.slug
            )));
        }
        let host = self.host_of(collective).await?;
        let platform = self.platform_collective().await?;
        let source = match input.source_collective_id {
            Some(id) => queries::get_collective(&self.pool, id).await?,
            None => host.clone(),
        };

        let description = input
            .description
            .map(|d| sanitize_string(&d))
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| format!("Funds added to {}", collective.name));
        validate_max_len("description", &description, DESCRIPTION_MAX_LEN)?;

        let batch = build_added_funds(&ContributionInput {
            kind: TransactionKind::AddedFunds,
            order_id: None,
            payment_method_id: None,
            description,
            contributor_id: source.id,
            contributor_host_id: source.host_collective_id,
            collective_id: collective.id,
            host_id: host.id,
            platform_id: platform.id,
            total_amount: input.amount,
            currency: host.currency.clone(),
            platform_tip: input.platform_tip,
            tax_amount: 0,
            host_currency: host.currency.clone(),
            fx_rate: BigDecimal::from(1),
            payment_processor_fee_in_host_currency: 0,
            host_fee_percent: collective
                .host_fee_percent
                .clone()
                .or_else(|| host.host_fee_percent.clone())
                .unwrap_or_else(|| BigDecimal::from(0)),
            host_fee_share_percent: self.platform.host_fee_share_percent.clone(),
            settlement_mode: SettlementMode::Debt,
            data: Some(serde_json::json!({ "added_by_host": host.id })),
            created_at: Utc::now(),
        })?;

        let mut tx = self.pool.begin().await?;
        queries::insert_batch(&mut tx, &batch).await?;
        tx.commit().await?;

        tracing::info!(
            collective = %collective.slug,
            amount = input.amount,
            transaction_group = %batch.group,
            "Funds added"
        );
        Ok(batch)
    }
}
