use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

use super::{
    Charge, ChargeOutcome, OrderContext, PaymentError, PaymentProvider, ProviderFeatures,
    RefundContext, RefundOutcome,
};
use crate::domain::SettlementMode;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook, in seconds.
pub const WEBHOOK_TOLERANCE_SECS: i64 = 300;

#[derive(Error, Debug)]
pub enum StripeError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Card declined: {0}")]
    CardDeclined(String),
    #[error("Stripe API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response from Stripe: {0}")]
    InvalidResponse(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

impl StripeError {
    /// Only outages count against the circuit breaker, never declines.
    fn is_transient(&self) -> bool {
        match self {
            StripeError::RequestError(_) => true,
            StripeError::Api { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<StripeError> for PaymentError {
    fn from(err: StripeError) -> Self {
        match err {
            StripeError::CardDeclined(message) => PaymentError::Declined(message),
            StripeError::Api { status, message } if status < 500 && status != 429 => {
                PaymentError::InvalidRequest(message)
            }
            other => PaymentError::Provider(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub status: String,
    pub amount: i64,
    pub currency: String,
    pub client_secret: Option<String>,
    pub latest_charge: Option<StripeCharge>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCharge {
    pub id: String,
    pub balance_transaction: Option<BalanceTransaction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceTransaction {
    pub id: String,
    pub fee: i64,
    pub currency: String,
    pub exchange_rate: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeRefund {
    pub id: String,
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(rename = "type")]
    error_type: String,
    message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub account: Option<String>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

pub struct PaymentIntentRequest<'a> {
    pub amount: i64,
    pub currency: &'a str,
    pub payment_method: &'a str,
    pub customer: Option<&'a str>,
    pub application_fee_amount: i64,
    pub description: &'a str,
    pub order_id: &'a str,
    pub off_session: bool,
}

impl PaymentIntentRequest<'_> {
    fn params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("amount".to_string(), self.amount.to_string()),
            ("currency".to_string(), self.currency.to_lowercase()),
            ("payment_method".to_string(), self.payment_method.to_string()),
            ("payment_method_types[]".to_string(), "card".to_string()),
            ("confirm".to_string(), "true".to_string()),
            ("description".to_string(), self.description.to_string()),
            ("metadata[order_id]".to_string(), self.order_id.to_string()),
            ("expand[]".to_string(), "latest_charge.balance_transaction".to_string()),
        ];
        if self.application_fee_amount > 0 {
            params.push((
                "application_fee_amount".to_string(),
                self.application_fee_amount.to_string(),
            ));
        }
        if let Some(customer) = self.customer {
            params.push(("customer".to_string(), customer.to_string()));
        }
        if self.off_session {
            params.push(("off_session".to_string(), "true".to_string()));
        }
        params
    }
}

/// HTTP client for the Stripe REST API, acting on connected accounts.
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    base_url: String,
    secret_key: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl StripeClient {
    pub fn new(base_url: String, secret_key: String) -> Self {
        Self::with_circuit_breaker(base_url, secret_key, 3, 60)
    }

    pub fn with_circuit_breaker(
        base_url: String,
        secret_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        StripeClient {
            client,
            base_url,
            secret_key,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        stripe_account: Option<&str>,
        params: Vec<(String, String)>,
    ) -> Result<T, StripeError> {
        let url = format!("{}/v1/{}", self.base_url.trim_end_matches('/'), path);
        let client = self.client.clone();
        let secret_key = self.secret_key.clone();
        let stripe_account = stripe_account.map(str::to_string);

        let result = self
            .circuit_breaker
            .call_with(StripeError::is_transient, async move {
                let mut request = client.request(method.clone(), &url).bearer_auth(&secret_key);
                request = if method == Method::GET {
                    request.query(&params)
                } else {
                    request.form(&params)
                };
                if let Some(account) = stripe_account {
                    request = request.header("Stripe-Account", account);
                }

                let response = request.send().await?;
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<T>()
                        .await
                        .map_err(|e| StripeError::InvalidResponse(e.to_string()));
                }

                let body = response
                    .json::<ApiErrorBody>()
                    .await
                    .map_err(|e| StripeError::InvalidResponse(e.to_string()))?;
                let message = body.error.message.unwrap_or_else(|| body.error.error_type.clone());
                if body.error.error_type == "card_error" {
                    return Err(StripeError::CardDeclined(message));
                }
                Err(StripeError::Api {
                    status: status.as_u16(),
                    message,
                })
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(StripeError::CircuitBreakerOpen(
                "Stripe API circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    pub async fn create_payment_intent(
        &self,
        request: &PaymentIntentRequest<'_>,
        stripe_account: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.send(
            Method::POST,
            "payment_intents",
            Some(stripe_account),
            request.params(),
        )
        .await
    }

    pub async fn retrieve_payment_intent(
        &self,
        id: &str,
        stripe_account: &str,
    ) -> Result<PaymentIntent, StripeError> {
        self.send(
            Method::GET,
            &format!("payment_intents/{}", id),
            Some(stripe_account),
            vec![(
                "expand[]".to_string(),
                "latest_charge.balance_transaction".to_string(),
            )],
        )
        .await
    }

    pub async fn create_refund(
        &self,
        payment_intent: &str,
        stripe_account: &str,
    ) -> Result<StripeRefund, StripeError> {
        self.send(
            Method::POST,
            "refunds",
            Some(stripe_account),
            vec![
                ("payment_intent".to_string(), payment_intent.to_string()),
                ("refund_application_fee".to_string(), "true".to_string()),
            ],
        )
        .await
    }
}

/// Reads the processor fee and exchange rate of a succeeded intent.
pub fn charge_from_intent(intent: &PaymentIntent) -> Result<Charge, PaymentError> {
    let charge = intent.latest_charge.as_ref().ok_or_else(|| {
        PaymentError::Provider(format!("payment intent {} has no charge", intent.id))
    })?;
    let balance = charge.balance_transaction.as_ref().ok_or_else(|| {
        PaymentError::Provider(format!("charge {} has no balance transaction", charge.id))
    })?;

    let host_currency_fx_rate = match balance.exchange_rate {
        Some(rate) => Some(
            BigDecimal::from_str(&rate.to_string())
                .map_err(|e| PaymentError::Provider(format!("invalid exchange rate: {}", e)))?,
        ),
        None => None,
    };

    Ok(Charge {
        external_id: intent.id.clone(),
        processor_fee_in_host_currency: balance.fee,
        host_currency_fx_rate,
        data: serde_json::json!({
            "stripe_charge_id": charge.id,
            "balance_transaction_id": balance.id,
            "settlement_currency": balance.currency.to_uppercase(),
        }),
        balance_debit: None,
    })
}

#[derive(Debug, Error, PartialEq)]
pub enum SignatureError {
    #[error("malformed Stripe-Signature header")]
    Malformed,
    #[error("webhook timestamp outside of the tolerance window")]
    Expired,
    #[error("no matching signature")]
    Mismatch,
}

/// Verifies a `Stripe-Signature: t=<ts>,v1=<hex>` header over `"{t}.{body}"`.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if (now - timestamp).abs() > WEBHOOK_TOLERANCE_SECS {
        return Err(SignatureError::Expired);
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac =
            HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::Malformed)?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }

    Err(SignatureError::Mismatch)
}

/// Card payments on the host's connected Stripe account. The platform cut
/// is taken as an application fee, so nothing is owed afterwards.
pub struct StripeProvider {
    client: StripeClient,
}

impl StripeProvider {
    pub fn new(client: StripeClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &StripeClient {
        &self.client
    }
}

fn connected_account<'a>(
    account: Option<&'a crate::db::models::ConnectedAccount>,
) -> Result<&'a str, PaymentError> {
    account
        .map(|a| a.username.as_str())
        .ok_or_else(|| {
            PaymentError::InvalidRequest("host has no connected Stripe account".to_string())
        })
}

#[async_trait]
impl PaymentProvider for StripeProvider {
    fn service(&self) -> &'static str {
        "stripe"
    }

    fn features(&self) -> ProviderFeatures {
        ProviderFeatures {
            schedules_charges: true,
            recurring: true,
            settlement: SettlementMode::Direct,
            charges_host_fee: true,
        }
    }

    async fn process_order(&self, ctx: &OrderContext<'_>) -> Result<ChargeOutcome, PaymentError> {
        let account = connected_account(ctx.host_account)?;
        let payment_method = ctx.payment_method.token.as_deref().ok_or_else(|| {
            PaymentError::InvalidRequest("payment method has no Stripe token".to_string())
        })?;
        let order_id = ctx.order.id.to_string();

        let request = PaymentIntentRequest {
            amount: ctx.order.total_amount,
            currency: &ctx.order.currency,
            payment_method,
            customer: ctx.payment_method.customer_id.as_deref(),
            application_fee_amount: ctx.application_fee,
            description: &ctx.order.description,
            order_id: &order_id,
            off_session: ctx.off_session,
        };

        let intent = self.client.create_payment_intent(&request, account).await?;
        tracing::info!(
            order_id = %ctx.order.id,
            payment_intent = %intent.id,
            status = %intent.status,
            "Stripe payment intent created"
        );

        match intent.status.as_str() {
            "succeeded" => Ok(ChargeOutcome::Paid(charge_from_intent(&intent)?)),
            "requires_action" | "requires_confirmation" => {
                Ok(ChargeOutcome::RequiresConfirmation {
                    client_secret: intent.client_secret.clone().unwrap_or_default(),
                    external_id: intent.id,
                })
            }
            "processing" => Ok(ChargeOutcome::Processing {
                external_id: intent.id,
            }),
            other => Err(PaymentError::Declined(format!(
                "payment intent {} ended in status {}",
                intent.id, other
            ))),
        }
    }

    async fn refund(&self, ctx: &RefundContext<'_>) -> Result<RefundOutcome, PaymentError> {
        let account = connected_account(ctx.host_account)?;
        let payment_intent = ctx
            .transaction
            .data
            .as_ref()
            .and_then(|d| d.get("charge_id"))
            .and_then(|v| v.as_str())
            .or(ctx.order.external_id.as_deref())
            .ok_or_else(|| {
                PaymentError::InvalidRequest("transaction has no Stripe payment".to_string())
            })?;

        let refund = self.client.create_refund(payment_intent, account).await?;
        tracing::info!(
            order_id = %ctx.order.id,
            refund_id = %refund.id,
            status = %refund.status,
            "Stripe refund created"
        );

        // Stripe keeps its processing fee on refunds.
        Ok(RefundOutcome {
            external_id: Some(refund.id),
            refunded_processor_fee: 0,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::models::{Collective, ConnectedAccount, Order, PaymentMethod};
    use crate::domain::{CollectiveType, OrderStatus};
    use chrono::Utc;
    use uuid::Uuid;

    pub(crate) fn order(total_amount: i64) -> Order {
        Order {
            id: Uuid::new_v4(),
            from_collective_id: Uuid::new_v4(),
            collective_id: Uuid::new_v4(),
            tier_id: None,
            payment_method_id: None,
            description: "Donation".to_string(),
            total_amount,
            currency: "USD".to_string(),
            platform_tip_amount: 0,
            tax_amount: 0,
            status: OrderStatus::New,
            recurrence_interval: None,
            next_charge_date: None,
            charge_retry_count: 0,
            external_id: None,
            processed_at: None,
            data: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn payment_method() -> PaymentMethod {
        PaymentMethod {
            id: Uuid::new_v4(),
            collective_id: Uuid::new_v4(),
            service: "stripe".to_string(),
            method_type: "creditcard".to_string(),
            customer_id: Some("cus_123".to_string()),
            token: Some("pm_card_visa".to_string()),
            currency: None,
            data: None,
            archived_at: None,
            created_at: Utc::now(),
        }
    }

    fn account() -> ConnectedAccount {
        ConnectedAccount {
            id: Uuid::new_v4(),
            collective_id: Uuid::new_v4(),
            service: "stripe".to_string(),
            username: "acct_host".to_string(),
            token: None,
            created_at: Utc::now(),
        }
    }

    fn collective(slug: &str) -> Collective {
        Collective::new(
            slug.to_string(),
            slug.to_string(),
            CollectiveType::Collective,
            None,
            "USD".to_string(),
        )
    }

    async fn process(
        provider: &StripeProvider,
        account: Option<&ConnectedAccount>,
    ) -> Result<ChargeOutcome, PaymentError> {
        let order = order(5000);
        let pm = payment_method();
        let contributor = collective("jo");
        let target = collective("webpack");
        let host = collective("host");
        provider
            .process_order(&OrderContext {
                order: &order,
                payment_method: &pm,
                contributor: &contributor,
                collective: &target,
                host: &host,
                host_account: account,
                application_fee: 150,
                off_session: false,
            })
            .await
    }

    #[test]
    fn test_stripe_client_creation() {
        let client = StripeClient::new("https://api.stripe.com".to_string(), "sk_test".to_string());
        assert_eq!(client.base_url, "https://api.stripe.com");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[test]
    fn test_payment_intent_params() {
        let params = PaymentIntentRequest {
            amount: 5000,
            currency: "EUR",
            payment_method: "pm_1",
            customer: None,
            application_fee_amount: 0,
            description: "Donation",
            order_id: "o1",
            off_session: true,
        }
        .params();

        assert!(params.contains(&("currency".to_string(), "eur".to_string())));
        assert!(params.contains(&("off_session".to_string(), "true".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "application_fee_amount"));
        assert!(!params.iter().any(|(k, _)| k == "customer"));
    }

    #[tokio::test]
    async fn test_successful_charge_reads_fees() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .match_header("stripe-account", "acct_host")
            .match_body(mockito::Matcher::UrlEncoded(
                "application_fee_amount".into(),
                "150".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "id": "pi_123",
                    "status": "succeeded",
                    "amount": 5000,
                    "currency": "usd",
                    "client_secret": "pi_123_secret",
                    "latest_charge": {
                        "id": "ch_123",
                        "balance_transaction": {
                            "id": "txn_123",
                            "fee": 175,
                            "currency": "eur",
                            "exchange_rate": 0.9
                        }
                    }
                }"#,
            )
            .create_async()
            .await;

        let provider = StripeProvider::new(StripeClient::new(server.url(), "sk_test".to_string()));
        let outcome = process(&provider, Some(&account())).await.unwrap();

        match outcome {
            ChargeOutcome::Paid(charge) => {
                assert_eq!(charge.external_id, "pi_123");
                assert_eq!(charge.processor_fee_in_host_currency, 175);
                assert_eq!(
                    charge.host_currency_fx_rate,
                    Some(BigDecimal::from_str("0.9").unwrap())
                );
                assert_eq!(charge.data["stripe_charge_id"], "ch_123");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requires_action_asks_for_confirmation() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": "pi_3ds", "status": "requires_action", "amount": 5000,
                    "currency": "usd", "client_secret": "pi_3ds_secret", "latest_charge": null}"#,
            )
            .create_async()
            .await;

        let provider = StripeProvider::new(StripeClient::new(server.url(), "sk_test".to_string()));
        let outcome = process(&provider, Some(&account())).await.unwrap();
        assert_eq!(
            outcome,
            ChargeOutcome::RequiresConfirmation {
                external_id: "pi_3ds".to_string(),
                client_secret: "pi_3ds_secret".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_card_error_is_a_decline() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(402)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"type": "card_error", "message": "Your card was declined."}}"#)
            .create_async()
            .await;

        let provider = StripeProvider::new(StripeClient::new(server.url(), "sk_test".to_string()));
        let result = process(&provider, Some(&account())).await;
        assert!(matches!(result, Err(PaymentError::Declined(_))));
        assert_eq!(provider.client().circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_missing_connected_account() {
        let provider = StripeProvider::new(StripeClient::new(
            "http://127.0.0.1:9".to_string(),
            "sk_test".to_string(),
        ));
        let result = process(&provider, None).await;
        assert!(matches!(result, Err(PaymentError::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_outages() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/payment_intents")
            .with_status(500)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": {"type": "api_error", "message": "boom"}}"#)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = StripeClient::with_circuit_breaker(server.url(), "sk_test".to_string(), 3, 60);
        let provider = StripeProvider::new(client);
        for _ in 0..3 {
            let _ = process(&provider, Some(&account())).await;
        }

        let result = process(&provider, Some(&account())).await;
        assert!(matches!(result, Err(PaymentError::Provider(ref m)) if m.contains("Circuit breaker")));
    }

    fn sign(secret: &str, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_webhook_signature_verification() {
        let payload = r#"{"id":"evt_1","type":"charge.refunded"}"#;
        let now = 1_760_000_000;
        let header = sign("whsec_test", now, payload);

        assert!(verify_webhook_signature(payload.as_bytes(), &header, "whsec_test", now).is_ok());
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), &header, "whsec_other", now),
            Err(SignatureError::Mismatch)
        );
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), &header, "whsec_test", now + 301),
            Err(SignatureError::Expired)
        );
        assert_eq!(
            verify_webhook_signature(payload.as_bytes(), "v1=abc", "whsec_test", now),
            Err(SignatureError::Malformed)
        );
    }
}
