use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use soko_core::{
    CourierLocation, Delivery, Order, OrderStatus, Payment, PaymentSession, Validation,
};
use uuid::Uuid;

use crate::auth::Claims;
use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub seller_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    /// Minor currency units
    pub amount: i64,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
}

#[derive(Debug, Serialize)]
pub struct OrderDetailResponse {
    pub order: Order,
    pub payment: Option<Payment>,
    pub delivery: Option<Delivery>,
    pub validation: Option<Validation>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub order_id: Uuid,
    pub courier_id: Uuid,
    pub tracking_code: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
}

#[derive(Debug, Deserialize)]
pub struct LocationPingRequest {
    pub order_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/orders
/// Buyer places an order; it starts in AWAITING_PAYMENT with no funds moved
pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    let caller = claims.caller()?;
    if payload.quantity <= 0 || payload.amount <= 0 {
        return Err(AppError::ValidationError(
            "quantity and amount must be positive".to_string(),
        ));
    }

    let order = Order::new(
        caller.user_id,
        payload.seller_id,
        payload.product_id,
        payload.product_name,
        payload.quantity,
        payload.amount,
        payload.recipient_name,
        payload.recipient_phone,
        payload.recipient_address,
    );
    state.orders.create_order(&order).await?;

    tracing::info!(order_id = %order.id, buyer_id = %caller.user_id, "order created");
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /v1/orders/{id}/checkout
/// Initialize a gateway payment session for the buyer and remember the
/// reference the webhook will carry back
pub async fn checkout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentSession>, AppError> {
    let caller = claims.caller()?;
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError("order not found".to_string()))?;
    if caller.user_id != order.buyer_id {
        return Err(AppError::AuthorizationError(
            "only the buyer can pay for this order".to_string(),
        ));
    }
    if order.status != OrderStatus::AwaitingPayment {
        return Err(AppError::conflict("order is already paid or closed"));
    }

    let session = state
        .gateway
        .initialize_transaction(&order)
        .await
        .map_err(|e| AppError::UnavailableError(e.to_string()))?;
    state
        .orders
        .set_payment_reference(id, &session.reference)
        .await?;

    Ok(Json(session))
}

/// GET /v1/orders/{id}
/// Full order detail, visible to its parties and admins only
pub async fn get_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetailResponse>, AppError> {
    let caller = claims.caller()?;
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError("order not found".to_string()))?;

    let is_party = caller.user_id == order.buyer_id
        || caller.user_id == order.seller_id
        || order.courier_id == Some(caller.user_id);
    if !is_party && !caller.is_admin() {
        return Err(AppError::AuthorizationError(
            "caller is not a party to this order".to_string(),
        ));
    }

    let payment = state.payments.get_by_order(id).await?;
    let delivery = state.deliveries.get_by_order(id).await?;
    let validation = state.validations.get(id).await?;

    Ok(Json(OrderDetailResponse {
        order,
        payment,
        delivery,
        validation,
    }))
}

/// POST /v1/orders/{id}/assign-courier
pub async fn assign_courier(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentResponse>, AppError> {
    let caller = claims.caller()?;
    let assignment = state.allocator.assign(id, &caller).await?;
    Ok(Json(AssignmentResponse {
        order_id: id,
        courier_id: assignment.courier_id,
        tracking_code: assignment.tracking_code,
    }))
}

/// POST /v1/orders/{id}/mark-shipped
pub async fn mark_shipped(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.tracker.mark_shipped(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/orders/{id}/start-transit
pub async fn start_transit(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.lifecycle.start_transit(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/orders/{id}/mark-delivered
pub async fn mark_delivered(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.lifecycle.mark_delivered(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/orders/{id}/confirm-reception
/// Buyer sign-off: releases the escrowed funds and completes the order
pub async fn confirm_reception(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.tracker.confirm_reception(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/orders/{id}/dispute
pub async fn open_dispute(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.lifecycle.open_dispute(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/orders/{id}/cancel
pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<StatusResponse>, AppError> {
    let caller = claims.caller()?;
    state.lifecycle.cancel(id, &caller).await?;
    status_of(&state, id).await
}

/// POST /v1/couriers/location
/// Courier-side location ping, stored for buyer-facing tracking
pub async fn record_location(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<LocationPingRequest>,
) -> Result<StatusCode, AppError> {
    let caller = claims.caller()?;
    let location = CourierLocation {
        courier_id: caller.user_id,
        order_id: payload.order_id,
        latitude: payload.latitude,
        longitude: payload.longitude,
        recorded_at: Utc::now(),
    };
    state.couriers.record_location(&location).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /v1/deliveries/{tracking_code}
/// Delivery lookup by human-readable tracking code, with the courier's
/// latest reported position when one exists
pub async fn track_delivery(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(tracking_code): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let caller = claims.caller()?;
    let delivery = state
        .deliveries
        .find_by_tracking_code(&tracking_code)
        .await?
        .ok_or_else(|| AppError::NotFoundError("delivery not found".to_string()))?;

    let is_party = caller.user_id == delivery.buyer_id
        || caller.user_id == delivery.seller_id
        || delivery.courier_id == Some(caller.user_id);
    if !is_party && !caller.is_admin() {
        return Err(AppError::AuthorizationError(
            "caller is not a party to this delivery".to_string(),
        ));
    }

    let location = match delivery.courier_id {
        Some(courier_id) => state.couriers.latest_location(courier_id).await?,
        None => None,
    };
    Ok(Json(serde_json::json!({
        "delivery": delivery,
        "courier_location": location,
    })))
}

async fn status_of(state: &AppState, id: Uuid) -> Result<Json<StatusResponse>, AppError> {
    let order = state
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| AppError::NotFoundError("order not found".to_string()))?;
    Ok(Json(StatusResponse {
        order_id: id,
        status: order.status,
    }))
}
