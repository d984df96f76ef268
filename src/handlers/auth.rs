use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::payments::stripe::{verify_webhook_signature, SignatureError, StripeEvent};
use crate::AppState;

/// Upper bound for webhook bodies.
const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

/// Extractor that verifies the Stripe-Signature header against the raw body
/// before parsing the event.
pub struct VerifiedStripeEvent(pub StripeEvent);

#[async_trait]
impl FromRequest<AppState> for VerifiedStripeEvent {
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let secret = state
            .config
            .stripe
            .as_ref()
            .map(|s| s.webhook_secret.clone())
            .ok_or(AuthError::NotConfigured)?;

        let signature = req
            .headers()
            .get("Stripe-Signature")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AuthError::MissingSignature)?;

        let body = axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY)
            .await
            .map_err(|_| AuthError::BodyReadError)?;

        verify_webhook_signature(&body, &signature, &secret, Utc::now().timestamp())
            .map_err(AuthError::Signature)?;

        let event = serde_json::from_slice::<StripeEvent>(&body)
            .map_err(|e| AuthError::InvalidPayload(e.to_string()))?;
        Ok(VerifiedStripeEvent(event))
    }
}

#[derive(Debug)]
pub enum AuthError {
    NotConfigured,
    MissingSignature,
    Signature(SignatureError),
    BodyReadError,
    InvalidPayload(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::NotConfigured => (
                StatusCode::NOT_FOUND,
                "Stripe webhooks are not configured".to_string(),
            ),
            AuthError::MissingSignature => (
                StatusCode::UNAUTHORIZED,
                "Missing Stripe-Signature header".to_string(),
            ),
            AuthError::Signature(e) => (
                StatusCode::UNAUTHORIZED,
                format!("Signature verification failed: {}", e),
            ),
            AuthError::BodyReadError => (
                StatusCode::BAD_REQUEST,
                "Failed to read request body".to_string(),
            ),
            AuthError::InvalidPayload(e) => {
                (StatusCode::BAD_REQUEST, format!("Invalid event: {}", e))
            }
        };

        tracing::warn!("Webhook authentication failed: {:?}", self);
        (status, message).into_response()
    }
}
