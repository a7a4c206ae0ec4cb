use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use soko_order::{BackfillReport, MAX_BACKFILL_PAGE};

use crate::auth::Claims;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BackfillRequest {
    pub limit: Option<u32>,
}

/// POST /v1/admin/backfill-payments
/// Batch repair for delivered/completed orders whose payment rows went
/// missing or were left held. Admin only; the page size is capped
/// server-side whatever the caller asks for.
pub async fn backfill_payments(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<BackfillRequest>,
) -> Result<Json<BackfillReport>, AppError> {
    let caller = claims.caller()?;
    if !caller.is_admin() {
        return Err(AppError::AuthorizationError(
            "admin role required".to_string(),
        ));
    }

    let limit = payload.limit.unwrap_or(MAX_BACKFILL_PAGE);
    let report = state.reconciler.backfill(limit).await?;
    Ok(Json(report))
}
