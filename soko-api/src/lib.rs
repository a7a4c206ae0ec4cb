use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod admin;
pub mod auth;
pub mod error;
pub mod orders;
pub mod state;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    // CORS Middleware
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::USER_AGENT,
        ]);

    // Everything except the webhook requires a bearer token; the gateway
    // authenticates with its HMAC signature instead
    let protected = Router::new()
        .route("/v1/orders", post(orders::create_order))
        .route("/v1/orders/{id}", get(orders::get_order))
        .route("/v1/orders/{id}/checkout", post(orders::checkout))
        .route("/v1/orders/{id}/assign-courier", post(orders::assign_courier))
        .route("/v1/orders/{id}/mark-shipped", post(orders::mark_shipped))
        .route("/v1/orders/{id}/start-transit", post(orders::start_transit))
        .route("/v1/orders/{id}/mark-delivered", post(orders::mark_delivered))
        .route(
            "/v1/orders/{id}/confirm-reception",
            post(orders::confirm_reception),
        )
        .route("/v1/orders/{id}/dispute", post(orders::open_dispute))
        .route("/v1/orders/{id}/cancel", post(orders::cancel_order))
        .route("/v1/couriers/location", post(orders::record_location))
        .route("/v1/deliveries/{tracking_code}", get(orders::track_delivery))
        .route("/v1/admin/backfill-payments", post(admin::backfill_payments))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth::require_auth,
        ));

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/v1/webhooks/payments", post(webhooks::handle_payment_webhook))
        .merge(protected)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
