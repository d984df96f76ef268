//! Payment providers.
//!
//! Each provider turns an order into a [`ChargeOutcome`]. Providers never
//! write to the ledger; the order service does that once a charge is final.

pub mod bank_transfer;
pub mod collective;
pub mod paypal;
pub mod stripe;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::db::models::{Collective, ConnectedAccount, Order, PaymentMethod, Transaction};
use crate::domain::SettlementMode;

pub use bank_transfer::BankTransferProvider;
pub use collective::CollectiveBalanceProvider;
pub use paypal::{PaypalClient, PaypalProvider};
pub use stripe::{StripeClient, StripeProvider};

#[derive(Error, Debug)]
pub enum PaymentError {
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Invalid payment request: {0}")]
    InvalidRequest(String),

    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProviderFeatures {
    pub recurring: bool,
    /// The platform triggers each recurring charge itself. Otherwise the
    /// processor runs the schedule and reports charges through webhooks.
    pub schedules_charges: bool,
    pub settlement: SettlementMode,
    pub charges_host_fee: bool,
}

/// Funds a charge takes from a collective balance held on the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceDebit {
    pub collective_id: Uuid,
    pub currency: String,
    pub amount: i64,
}

/// A charge the processor confirmed.
#[derive(Debug, Clone, PartialEq)]
pub struct Charge {
    pub external_id: String,
    pub processor_fee_in_host_currency: i64,
    /// Rate from the order currency to the host currency, when they differ.
    pub host_currency_fx_rate: Option<BigDecimal>,
    pub data: serde_json::Value,
    /// Checked again under a lock on the collective when the charge is booked.
    pub balance_debit: Option<BalanceDebit>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    Paid(Charge),
    /// Waiting for funds outside of the platform (bank transfer).
    Pending,
    /// The contributor has to confirm the payment client-side.
    RequiresConfirmation {
        external_id: String,
        client_secret: String,
    },
    /// The processor will confirm through a webhook.
    Processing { external_id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct RefundOutcome {
    pub external_id: Option<String>,
    /// Processor fee given back by the processor, in host currency.
    pub refunded_processor_fee: i64,
}

pub struct OrderContext<'a> {
    pub order: &'a Order,
    pub payment_method: &'a PaymentMethod,
    pub contributor: &'a Collective,
    pub collective: &'a Collective,
    pub host: &'a Collective,
    pub host_account: Option<&'a ConnectedAccount>,
    /// Platform tip plus host fee share, in the order currency.
    pub application_fee: i64,
    /// Charge made by the scheduler without the contributor present.
    pub off_session: bool,
}

pub struct RefundContext<'a> {
    pub order: &'a Order,
    pub payment_method: &'a PaymentMethod,
    /// The contribution CREDIT being refunded.
    pub transaction: &'a Transaction,
    pub host_account: Option<&'a ConnectedAccount>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn service(&self) -> &'static str;

    fn features(&self) -> ProviderFeatures;

    async fn process_order(&self, ctx: &OrderContext<'_>) -> Result<ChargeOutcome, PaymentError>;

    async fn refund(&self, ctx: &RefundContext<'_>) -> Result<RefundOutcome, PaymentError>;
}

/// Maps `payment_methods.service` to its provider.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<&'static str, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.service(), provider);
        self
    }

    pub fn get(&self, service: &str) -> Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.providers
            .get(service)
            .cloned()
            .ok_or_else(|| PaymentError::Unsupported(format!("payment service {}", service)))
    }

    pub fn services(&self) -> Vec<&'static str> {
        let mut services: Vec<_> = self.providers.keys().copied().collect();
        services.sort_unstable();
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_by_service() {
        let registry = ProviderRegistry::new().register(Arc::new(BankTransferProvider));
        assert_eq!(registry.services(), vec!["bank_transfer"]);
        assert!(registry.get("bank_transfer").is_ok());
        assert!(matches!(
            registry.get("stripe"),
            Err(PaymentError::Unsupported(_))
        ));
    }
}
