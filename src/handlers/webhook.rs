use axum::{
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde_json::Value;
use uuid::Uuid;

use crate::db::models::Order;
use crate::db::queries;
use crate::domain::money::from_decimal_str;
use crate::error::AppError;
use crate::handlers::auth::VerifiedStripeEvent;
use crate::payments::paypal::{PaypalCredentials, WebhookHeaders};
use crate::payments::stripe::{charge_from_intent, StripeEvent};
use crate::payments::{Charge, PaymentError};
use crate::AppState;

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn received() -> Json<Value> {
    Json(serde_json::json!({ "received": true }))
}

/// Duplicate deliveries hit state transitions that already happened.
fn ignore_conflict<T>(result: Result<T, AppError>, event: &str) -> Result<(), AppError> {
    match result {
        Ok(_) => Ok(()),
        Err(AppError::Conflict(reason)) => {
            tracing::info!(event, reason = %reason, "Webhook already applied");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn order_for_intent(state: &AppState, intent: &Value) -> Result<Option<Order>, AppError> {
    if let Some(order_id) = str_at(intent, "/metadata/order_id").and_then(|id| Uuid::parse_str(id).ok()) {
        return match queries::get_order(&state.db, order_id).await {
            Ok(order) => Ok(Some(order)),
            Err(sqlx::Error::RowNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        };
    }
    match str_at(intent, "/id") {
        Some(id) => Ok(queries::find_order_by_external_id(&state.db, id).await?),
        None => Ok(None),
    }
}

async fn stripe_account_for(
    state: &AppState,
    event: &StripeEvent,
    order: &Order,
) -> Result<String, AppError> {
    if let Some(account) = &event.account {
        return Ok(account.clone());
    }
    let collective = queries::get_collective(&state.db, order.collective_id).await?;
    let host_id = collective
        .host_collective_id
        .ok_or_else(|| AppError::Validation(format!("{} has no host", collective.slug)))?;
    queries::get_connected_account(&state.db, host_id, "stripe")
        .await?
        .map(|a| a.username)
        .ok_or_else(|| AppError::Validation("host has no connected Stripe account".to_string()))
}

pub async fn stripe_webhook(
    State(state): State<AppState>,
    VerifiedStripeEvent(event): VerifiedStripeEvent,
) -> Result<impl IntoResponse, AppError> {
    let object = &event.data.object;
    tracing::info!(event_id = %event.id, event_type = %event.event_type, "Stripe webhook received");

    match event.event_type.as_str() {
        "payment_intent.succeeded" => {
            let Some(order) = order_for_intent(&state, object).await? else {
                tracing::warn!(event_id = %event.id, "No order for payment intent");
                return Ok(received());
            };
            let stripe = state
                .stripe
                .as_ref()
                .ok_or_else(|| AppError::Internal("Stripe is not configured".to_string()))?;
            let intent_id = str_at(object, "/id")
                .ok_or_else(|| AppError::BadRequest("payment intent without id".to_string()))?;
            let account = stripe_account_for(&state, &event, &order).await?;

            let intent = stripe
                .retrieve_payment_intent(intent_id, &account)
                .await
                .map_err(PaymentError::from)?;
            let charge = charge_from_intent(&intent)?;
            ignore_conflict(
                state.orders.record_external_charge(order.id, charge).await,
                &event.event_type,
            )?;
        }
        "payment_intent.payment_failed" => {
            let Some(order) = order_for_intent(&state, object).await? else {
                return Ok(received());
            };
            let reason = str_at(object, "/last_payment_error/message").unwrap_or("payment failed");
            ignore_conflict(
                state.orders.mark_payment_failed(order.id, reason).await,
                &event.event_type,
            )?;
        }
        "charge.refunded" => {
            let Some(intent_id) = str_at(object, "/payment_intent") else {
                return Ok(received());
            };
            match queries::find_credit_by_charge_id(&state.db, intent_id).await? {
                Some(credit) if credit.refund_transaction_id.is_none() => {
                    // Stripe keeps its processing fee on refunds.
                    ignore_conflict(
                        state.orders.refund_transaction(credit.id, true, Some(0)).await,
                        &event.event_type,
                    )?;
                }
                Some(_) => tracing::info!(payment_intent = intent_id, "Charge already refunded"),
                None => tracing::warn!(payment_intent = intent_id, "No ledger entry for refunded charge"),
            }
        }
        "charge.dispute.created" => {
            let Some(intent_id) = str_at(object, "/payment_intent") else {
                return Ok(received());
            };
            let order_id = queries::find_credit_by_charge_id(&state.db, intent_id)
                .await?
                .and_then(|credit| credit.order_id);
            match order_id {
                Some(order_id) => ignore_conflict(
                    state.orders.mark_disputed(order_id).await,
                    &event.event_type,
                )?,
                None => tracing::warn!(payment_intent = intent_id, "No order for disputed charge"),
            }
        }
        other => tracing::debug!(event_type = other, "Ignoring Stripe event"),
    }

    Ok(received())
}

fn webhook_headers(headers: &HeaderMap) -> Result<WebhookHeaders, AppError> {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| AppError::Unauthorized(format!("Missing {} header", name)))
    };
    Ok(WebhookHeaders {
        auth_algo: get("paypal-auth-algo")?,
        cert_url: get("paypal-cert-url")?,
        transmission_id: get("paypal-transmission-id")?,
        transmission_sig: get("paypal-transmission-sig")?,
        transmission_time: get("paypal-transmission-time")?,
    })
}

/// The capture a refund belongs to, from its `up` link.
pub fn capture_id_from_links(resource: &Value) -> Option<String> {
    resource
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("up"))
        .and_then(|link| link.get("href").and_then(Value::as_str))
        .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
        .map(str::to_string)
}

/// A PayPal money amount at `pointer`, in cents. Missing amounts are zero.
pub fn amount_at(resource: &Value, pointer: &str) -> Result<i64, AppError> {
    match str_at(resource, pointer) {
        Some(value) => from_decimal_str(value)
            .ok_or_else(|| AppError::BadRequest(format!("invalid PayPal amount {}", value))),
        None => Ok(0),
    }
}

/// Whether a subscription sale paid exactly what the order bills.
pub fn sale_matches(resource: &Value, total_amount: i64, currency: &str) -> Result<bool, AppError> {
    let paid = amount_at(resource, "/amount/total")?;
    Ok(paid == total_amount && str_at(resource, "/amount/currency") == Some(currency))
}

pub async fn paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(event): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let settings = &state.config.paypal;
    let (Some(client_id), Some(client_secret), Some(webhook_id)) = (
        settings.client_id.clone(),
        settings.client_secret.clone(),
        settings.webhook_id.as_deref(),
    ) else {
        return Err(AppError::Unauthorized(
            "PayPal webhooks are not configured".to_string(),
        ));
    };

    let transmission = webhook_headers(&headers)?;
    let credentials = PaypalCredentials {
        client_id,
        client_secret,
    };
    let verified = state
        .paypal
        .verify_webhook(&credentials, webhook_id, &transmission, &event)
        .await
        .map_err(PaymentError::from)?;
    if !verified {
        tracing::warn!(transmission_id = %transmission.transmission_id, "PayPal webhook rejected");
        return Err(AppError::Unauthorized(
            "PayPal webhook verification failed".to_string(),
        ));
    }

    let event_type = str_at(&event, "/event_type").unwrap_or_default().to_string();
    let resource = event.get("resource").cloned().unwrap_or(Value::Null);
    tracing::info!(event_type = %event_type, "PayPal webhook received");

    match event_type.as_str() {
        "PAYMENT.CAPTURE.REFUNDED" => {
            let Some(capture_id) = capture_id_from_links(&resource) else {
                return Ok(received());
            };
            let refunded_fee = amount_at(&resource, "/seller_payable_breakdown/paypal_fee/value")?;
            match queries::find_credit_by_charge_id(&state.db, &capture_id).await? {
                Some(credit) if credit.refund_transaction_id.is_none() => ignore_conflict(
                    state
                        .orders
                        .refund_transaction(credit.id, true, Some(refunded_fee))
                        .await,
                    &event_type,
                )?,
                Some(_) => tracing::info!(capture_id = %capture_id, "Capture already refunded"),
                None => tracing::warn!(capture_id = %capture_id, "No ledger entry for refunded capture"),
            }
        }
        "PAYMENT.SALE.COMPLETED" => {
            let (Some(sale_id), Some(subscription_id)) = (
                str_at(&resource, "/id"),
                str_at(&resource, "/billing_agreement_id"),
            ) else {
                return Ok(received());
            };
            let Some(order) = queries::find_order_by_external_id(&state.db, subscription_id).await?
            else {
                tracing::warn!(subscription_id, "No order for PayPal subscription");
                return Ok(received());
            };
            if !sale_matches(&resource, order.total_amount, &order.currency)? {
                tracing::error!(
                    order_id = %order.id,
                    sale_id,
                    subscription_id,
                    amount = ?str_at(&resource, "/amount/total"),
                    currency = ?str_at(&resource, "/amount/currency"),
                    "PayPal sale does not match the order, not recorded"
                );
                return Ok(received());
            }
            let charge = Charge {
                external_id: sale_id.to_string(),
                processor_fee_in_host_currency: amount_at(&resource, "/transaction_fee/value")?,
                host_currency_fx_rate: None,
                data: serde_json::json!({
                    "paypal_sale_id": sale_id,
                    "paypal_subscription_id": subscription_id,
                }),
                balance_debit: None,
            };
            ignore_conflict(
                state.orders.record_external_charge(order.id, charge).await,
                &event_type,
            )?;
        }
        "BILLING.SUBSCRIPTION.CANCELLED" => {
            let Some(subscription_id) = str_at(&resource, "/id") else {
                return Ok(received());
            };
            if let Some(order) = queries::find_order_by_external_id(&state.db, subscription_id).await? {
                ignore_conflict(state.orders.cancel(order.id).await, &event_type)?;
            }
        }
        other => tracing::debug!(event_type = other, "Ignoring PayPal event"),
    }

    Ok(received())
}
