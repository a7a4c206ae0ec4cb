use std::net::SocketAddr;
use std::sync::Arc;

use soko_api::{
    app,
    state::{AppState, AuthConfig},
};
use soko_order::{
    CourierAllocator, LifecycleEngine, SettlementReconciler, UniformRandom, ValidationTracker,
};
use soko_store::{
    DbClient, HttpPaymentGateway, PgCourierRepository, PgDeliveryRepository, PgNotifier,
    PgOrderRepository, PgPaymentRepository, PgValidationRepository,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "soko_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = soko_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Soko API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let orders = Arc::new(PgOrderRepository::new(db.pool.clone()));
    let payments = Arc::new(PgPaymentRepository::new(db.pool.clone()));
    let deliveries = Arc::new(PgDeliveryRepository::new(db.pool.clone()));
    let validations = Arc::new(PgValidationRepository::new(db.pool.clone()));
    let couriers = Arc::new(PgCourierRepository::new(db.pool.clone()));
    let notifier = Arc::new(PgNotifier::new(db.pool.clone()));
    let gateway = Arc::new(HttpPaymentGateway::new(
        config.gateway.secret.clone(),
        config.gateway.initialize_url.clone(),
    ));

    let lifecycle = Arc::new(LifecycleEngine::new(
        orders.clone(),
        payments.clone(),
        deliveries.clone(),
        validations.clone(),
        notifier.clone(),
    ));
    let allocator = Arc::new(CourierAllocator::new(
        orders.clone(),
        deliveries.clone(),
        couriers.clone(),
        notifier.clone(),
        Arc::new(UniformRandom),
    ));
    let reconciler = Arc::new(SettlementReconciler::new(
        orders.clone(),
        payments.clone(),
        deliveries.clone(),
        validations.clone(),
    ));
    let tracker = Arc::new(ValidationTracker::new(
        orders.clone(),
        deliveries.clone(),
        validations.clone(),
        notifier.clone(),
        reconciler.clone(),
    ));

    let app_state = AppState {
        orders,
        payments,
        deliveries,
        validations,
        couriers,
        lifecycle,
        allocator,
        tracker,
        reconciler,
        gateway,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listener");
    axum::serve(listener, app).await.expect("Server error");
}
