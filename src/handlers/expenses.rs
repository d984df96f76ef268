use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::services::expenses::SubmitExpense;
use crate::AppState;

pub async fn submit_expense(
    State(state): State<AppState>,
    Json(payload): Json<SubmitExpense>,
) -> Result<impl IntoResponse, AppError> {
    let expense = state.expenses.submit(payload).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

pub async fn get_expense(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let expense = state.expenses.get(id).await.map_err(|e| match e {
        AppError::Database(sqlx::Error::RowNotFound) => {
            AppError::NotFound(format!("Expense {} not found", id))
        }
        other => other,
    })?;
    Ok(Json(expense))
}
