pub mod gateway;
pub mod models;
pub mod repository;

pub use gateway::{verify_hmac_signature, GatewayError, PaymentGateway, PaymentSession};
pub use models::{
    Caller, Channel, CourierLocation, CourierProfile, Delivery, DeliveryStatus, Notification,
    Order, OrderStatus, Party, Payment, PaymentStatus, Role, Validation,
};
pub use repository::{
    CourierRepository, DeliveryRepository, Notifier, OrderRepository, PaymentRepository,
    ReleaseOutcome, StoreError, ValidationRepository,
};
