use axum::{
    extract::{Query, State},
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use crate::db::queries;
use crate::domain::SettlementStatus;
use crate::error::AppError;
use crate::services::settlement::previous_period;
use crate::AppState;

#[derive(Deserialize)]
pub struct SettlementFilter {
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RunSettlements {
    pub year: Option<i32>,
    pub month: Option<u32>,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(filter): Query<SettlementFilter>,
) -> Result<impl IntoResponse, AppError> {
    let status = match filter.status.as_deref() {
        Some(value) => Some(SettlementStatus::parse(value).ok_or_else(|| {
            AppError::BadRequest(format!("Unknown settlement status {}", value))
        })?),
        None => None,
    };
    let limit = filter.limit.unwrap_or(20).clamp(1, 200);
    let offset = filter.offset.unwrap_or(0).max(0);

    let settlements = queries::list_settlements(&state.db, status, limit, offset).await?;
    Ok(Json(settlements))
}

/// Invoices hosts for a month, the previous one by default.
pub async fn run_settlements(
    State(state): State<AppState>,
    payload: Option<Json<RunSettlements>>,
) -> Result<impl IntoResponse, AppError> {
    let request = payload.map(|Json(p)| p).unwrap_or_default();
    let (default_year, default_month) = previous_period(Utc::now());
    let report = state
        .settlements
        .run_monthly(
            request.year.unwrap_or(default_year),
            request.month.unwrap_or(default_month),
            request.dry_run,
        )
        .await?;
    Ok(Json(report))
}
