use axum::{
    body::Body,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

const IDEMPOTENCY_TTL: u64 = 86400;
const PROCESSING_TTL: u64 = 300;
const IDEMPOTENCY_PREFIX: &str = "idempotency:";
const PROCESSING: &str = "PROCESSING";
const MAX_CACHED_BODY: usize = 64 * 1024;

#[derive(Clone)]
pub struct IdempotencyService {
    redis_client: redis::Client,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CachedResponse {
    status: u16,
    body: String,
}

#[derive(Debug)]
pub enum IdempotencyStatus {
    New,
    Processing,
    Completed(CachedResponse),
}

impl IdempotencyService {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    fn key(idempotency_key: &str) -> String {
        format!("{}{}", IDEMPOTENCY_PREFIX, idempotency_key)
    }

    pub async fn ping(&self) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    /// Takes the processing lock atomically, or reports what holds the key.
    pub async fn check_idempotency(&self, idempotency_key: &str) -> anyhow::Result<IdempotencyStatus> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = Self::key(idempotency_key);

        let acquired: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(PROCESSING)
            .arg("NX")
            .arg("EX")
            .arg(PROCESSING_TTL)
            .query_async(&mut conn)
            .await?;

        if acquired.is_some() {
            return Ok(IdempotencyStatus::New);
        }

        let existing: Option<String> = redis::cmd("GET").arg(&key).query_async(&mut conn).await?;
        match existing {
            Some(value) if value == PROCESSING => Ok(IdempotencyStatus::Processing),
            Some(value) => Ok(IdempotencyStatus::Completed(serde_json::from_str(&value)?)),
            // Expired between the two commands.
            None => Ok(IdempotencyStatus::Processing),
        }
    }

    pub async fn store_response(
        &self,
        idempotency_key: &str,
        status: u16,
        body: String,
    ) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(&CachedResponse { status, body })?;

        redis::cmd("SET")
            .arg(Self::key(idempotency_key))
            .arg(serialized)
            .arg("EX")
            .arg(IDEMPOTENCY_TTL)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    pub async fn release_lock(&self, idempotency_key: &str) -> anyhow::Result<()> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        redis::cmd("DEL")
            .arg(Self::key(idempotency_key))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// Replays the first successful response for a repeated `x-idempotency-key`.
pub async fn idempotency_middleware(
    State(service): State<IdempotencyService>,
    request: Request,
    next: Next,
) -> Response {
    let idempotency_key = match request.headers().get("x-idempotency-key") {
        Some(key) => match key.to_str() {
            Ok(k) if !k.is_empty() && k.len() <= 255 => k.to_string(),
            _ => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({
                        "error": "Invalid idempotency key format"
                    })),
                )
                    .into_response();
            }
        },
        None => return next.run(request).await,
    };

    match service.check_idempotency(&idempotency_key).await {
        Ok(IdempotencyStatus::New) => {
            let response = next.run(request).await;

            if !response.status().is_success() {
                if let Err(e) = service.release_lock(&idempotency_key).await {
                    tracing::error!("Failed to release idempotency lock: {}", e);
                }
                return response;
            }

            let (parts, body) = response.into_parts();
            let bytes = match axum::body::to_bytes(body, MAX_CACHED_BODY).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::error!("Failed to buffer response for idempotency cache: {}", e);
                    return (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read response")
                        .into_response();
                }
            };

            let cached_body = String::from_utf8_lossy(&bytes).to_string();
            if let Err(e) = service
                .store_response(&idempotency_key, parts.status.as_u16(), cached_body)
                .await
            {
                tracing::error!("Failed to store idempotency response: {}", e);
            }

            Response::from_parts(parts, Body::from(bytes))
        }
        Ok(IdempotencyStatus::Processing) => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(serde_json::json!({
                "error": "Request is currently being processed",
                "retry_after": 5
            })),
        )
            .into_response(),
        Ok(IdempotencyStatus::Completed(cached)) => {
            let status = StatusCode::from_u16(cached.status).unwrap_or(StatusCode::OK);
            let original = serde_json::from_str::<serde_json::Value>(&cached.body)
                .unwrap_or(serde_json::Value::Null);
            (
                status,
                Json(serde_json::json!({
                    "cached": true,
                    "response": original
                })),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Idempotency check failed: {}", e);
            next.run(request).await
        }
    }
}
