use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::db::queries;
use crate::error::AppError;
use crate::payments::paypal::{create_subscription_plan, PaypalCredentials, PlanRequest};
use crate::services::accounts::{CreateCollective, CreatePaymentMethod};
use crate::validation::{validate_currency, validate_positive_amount};
use crate::AppState;

#[derive(Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Deserialize)]
pub struct ApplyToHost {
    pub host_slug: String,
}

pub async fn create_collective(
    State(state): State<AppState>,
    Json(payload): Json<CreateCollective>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.create_collective(payload).await?;
    Ok((StatusCode::CREATED, Json(collective)))
}

pub async fn get_collective(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.get_by_slug(&slug).await?;
    Ok(Json(collective))
}

pub async fn apply_to_host(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<ApplyToHost>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.apply_to_host(&slug, &payload.host_slug).await?;
    Ok(Json(collective))
}

pub async fn get_balance(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.get_by_slug(&slug).await?;
    let balances = state.accounts.balances(&collective).await?;
    Ok(Json(serde_json::json!({
        "collective": collective.slug,
        "balances": balances,
    })))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.get_by_slug(&slug).await?;
    let page = state
        .accounts
        .transactions(&collective, pagination.cursor.as_deref(), pagination.limit)
        .await?;
    Ok(Json(page))
}

pub async fn export_transactions(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let collective = state.accounts.get_by_slug(&slug).await?;
    let csv = state.accounts.export_csv(&collective).await?;
    let disposition = format!("attachment; filename=\"{}-transactions.csv\"", collective.slug);

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        csv,
    ))
}

pub async fn create_payment_method(
    State(state): State<AppState>,
    Json(payload): Json<CreatePaymentMethod>,
) -> Result<impl IntoResponse, AppError> {
    let payment_method = state.accounts.create_payment_method(payload).await?;
    Ok((StatusCode::CREATED, Json(payment_method)))
}

/// Billing plan under the collective's PayPal product. The contributor
/// subscribes to it, then places the recurring order with the subscription id.
pub async fn create_paypal_plan(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<PlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_positive_amount("amount", payload.amount)?;
    validate_currency(&payload.currency)?;

    let collective = state.accounts.get_by_slug(&slug).await?;
    let host_id = match collective.host_collective_id {
        Some(host_id) if collective.is_hosted_and_approved() => host_id,
        _ => {
            return Err(AppError::Validation(format!(
                "collective {} cannot receive contributions yet",
                collective.slug
            )))
        }
    };
    let account = queries::get_connected_account(&state.db, host_id, "paypal")
        .await?
        .ok_or_else(|| AppError::Validation("host has no connected PayPal account".to_string()))?;
    let credentials = PaypalCredentials::from_account(&account)?;

    let plan =
        create_subscription_plan(&state.paypal, &state.db, &credentials, &collective, &payload)
            .await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "plan_id": plan.id,
            "product_id": plan.product_id,
        })),
    ))
}
