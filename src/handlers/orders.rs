use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::db::queries;
use crate::error::AppError;
use crate::services::orders::CreateOrder;
use crate::AppState;

/// Creates the order and charges it right away.
pub async fn create_order(
    State(state): State<AppState>,
    Json(payload): Json<CreateOrder>,
) -> Result<impl IntoResponse, AppError> {
    let order = state.orders.create_order(payload).await?;
    let result = state.orders.execute_order(order.id).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let order = queries::get_order(&state.db, id).await.map_err(|e| match e {
        sqlx::Error::RowNotFound => AppError::NotFound(format!("Order {} not found", id)),
        other => AppError::Database(other),
    })?;
    let activities = queries::list_activities(&state.db, id).await?;

    Ok(Json(serde_json::json!({
        "order": order,
        "activities": activities,
    })))
}
