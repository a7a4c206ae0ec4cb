use std::sync::Arc;

use soko_core::{
    CourierRepository, DeliveryRepository, OrderRepository, PaymentGateway, PaymentRepository,
    ValidationRepository,
};
use soko_order::{CourierAllocator, LifecycleEngine, SettlementReconciler, ValidationTracker};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub orders: Arc<dyn OrderRepository>,
    pub payments: Arc<dyn PaymentRepository>,
    pub deliveries: Arc<dyn DeliveryRepository>,
    pub validations: Arc<dyn ValidationRepository>,
    pub couriers: Arc<dyn CourierRepository>,
    pub lifecycle: Arc<LifecycleEngine>,
    pub allocator: Arc<CourierAllocator>,
    pub tracker: Arc<ValidationTracker>,
    pub reconciler: Arc<SettlementReconciler>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub auth: AuthConfig,
}
