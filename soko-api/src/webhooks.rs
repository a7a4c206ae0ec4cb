use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

#[derive(Debug, Deserialize)]
pub struct GatewayEvent {
    pub event: String,
    pub data: GatewayEventData,
}

#[derive(Debug, Deserialize)]
pub struct GatewayEventData {
    pub reference: String,
    pub amount: Option<i64>,
    pub channel: Option<String>,
    pub status: Option<String>,
}

/// POST /v1/webhooks/payments
/// Payment status updates pushed by the gateway. The signature is checked
/// over the raw body before anything is parsed; an invalid signature is
/// a 401 regardless of payload shape. Unknown event types are acknowledged
/// and dropped so the gateway stops retrying them.
pub async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            AppError::AuthenticationError("missing gateway signature".to_string())
        })?;

    if !state.gateway.verify_signature(&body, signature) {
        tracing::warn!("payment webhook rejected: bad signature");
        return Err(AppError::AuthenticationError(
            "invalid gateway signature".to_string(),
        ));
    }

    let payload: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|_| AppError::ValidationError("malformed webhook payload".to_string()))?;

    tracing::info!(
        event = %payload.event,
        reference = %payload.data.reference,
        "payment webhook received"
    );

    if payload.event == "charge.success" {
        let mode = payload.data.channel.as_deref().unwrap_or("GATEWAY");
        state
            .lifecycle
            .confirm_payment(&payload.data.reference, mode)
            .await?;
    }

    Ok(Json(json!({ "success": true })))
}
