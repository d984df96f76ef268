use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::services::accounts::ConnectAccount;
use crate::services::expenses::PayExpense;
use crate::services::orders::{AddFunds, MarkPaid};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Record the refund without calling the processor.
    #[serde(default)]
    pub skip_provider: bool,
    pub refunded_processor_fee: Option<i64>,
}

pub async fn approve_collective(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.approve(&slug).await?;
    Ok(Json(collective))
}

pub async fn connect_account(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<ConnectAccount>,
) -> Result<impl IntoResponse, AppError> {
    let host = state.accounts.get_by_slug(&slug).await?;
    state.accounts.connect_account(&host, payload).await?;
    Ok(StatusCode::CREATED)
}

pub async fn add_funds(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<AddFunds>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.get_by_slug(&slug).await?;
    let batch = state.orders.add_funds(&collective, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "transaction_group": batch.group,
            "transactions": batch.transactions,
        })),
    ))
}

pub async fn mark_paid(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<MarkPaid>>,
) -> Result<impl IntoResponse, AppError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let order = state.orders.mark_pending_as_paid(id, input).await?;
    Ok(Json(order))
}

pub async fn mark_expired(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.mark_expired(id).await?;
    Ok(Json(order))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.cancel(id).await?;
    Ok(Json(order))
}

pub async fn refund_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<RefundRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let refund = state
        .orders
        .refund_transaction(id, request.skip_provider, request.refunded_processor_fee)
        .await?;
    Ok(Json(refund))
}

pub async fn approve_expense(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let expense = state.expenses.approve(id).await?;
    Ok(Json(expense))
}

pub async fn reject_expense(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let expense = state.expenses.reject(id).await?;
    Ok(Json(expense))
}

pub async fn pay_expense(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<PayExpense>>,
) -> Result<impl IntoResponse, AppError> {
    let input = payload.map(|Json(p)| p).unwrap_or_default();
    let paid = state.expenses.pay(id, input).await?;
    Ok(Json(paid))
}

pub async fn run_recurring(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let summary = state.recurring.process_due(Utc::now()).await?;
    Ok(Json(summary))
}
