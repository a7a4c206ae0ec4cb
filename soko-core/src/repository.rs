use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{
    Channel, CourierLocation, CourierProfile, Delivery, DeliveryStatus, Order, OrderStatus, Party,
    Payment, Validation,
};

/// Errors surfaced by the persistent store. Transient failures are not
/// retried inside the core; callers retry the whole operation, which is
/// safe because every step is idempotent.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of the idempotent "ensure released" write on a payment row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// No row existed; one was inserted directly in released state
    Created,
    /// A held row existed and was flipped to released
    Unlocked,
    /// Already released, nothing written
    AlreadyReleased,
    /// Refunded or cancelled payments are never force-released
    Blocked,
}

/// Repository trait for order data access
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn create_order(&self, order: &Order) -> Result<Uuid, StoreError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError>;

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Order>, StoreError>;

    /// Conditional status update: writes `to` only if the current status is
    /// one of `from`, and reports whether a row was actually changed. This
    /// is the compare-and-swap primitive every engine transition relies on.
    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool, StoreError>;

    async fn set_courier(&self, id: Uuid, courier_id: Uuid) -> Result<(), StoreError>;

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError>;

    /// Most recent orders currently in one of `statuses`, newest first
    async fn list_recent_with_status(
        &self,
        statuses: &[OrderStatus],
        limit: u32,
    ) -> Result<Vec<Order>, StoreError>;
}

/// Repository trait for escrow payment rows
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError>;

    /// Create-or-refresh the held payment row for an order. Keyed on
    /// order_id so webhook retries never produce a second row; an existing
    /// released row is left untouched.
    async fn upsert_held(
        &self,
        order_id: Uuid,
        amount: i64,
        mode: &str,
        reference: Option<&str>,
    ) -> Result<Payment, StoreError>;

    /// The idempotent release write (spec'd compare-and-swap): insert a
    /// released row if none exists, flip a held row preserving any
    /// pre-existing release timestamp, no-op if already released. Safe to
    /// call concurrently for the same order.
    async fn mark_released(
        &self,
        order_id: Uuid,
        amount: i64,
        released_at: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, StoreError>;
}

/// Repository trait for delivery rows, upserted keyed on order_id
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError>;

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Delivery>, StoreError>;

    /// Ensure a delivery row exists for the order (no-op if present)
    async fn upsert_pending(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<Delivery, StoreError>;

    /// Record a courier assignment: create the row if absent, else update
    /// courier id / status / tracking code in place
    async fn assign_courier(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
        courier_id: Uuid,
        tracking_code: &str,
    ) -> Result<Delivery, StoreError>;

    async fn update_status(
        &self,
        order_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError>;

    /// Stamp the delivery timestamp and flip status to delivered; keeps an
    /// earlier timestamp on replay
    async fn mark_delivered(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError>;
}

/// Repository trait for tri-party validation rows
#[async_trait]
pub trait ValidationRepository: Send + Sync {
    async fn get(&self, order_id: Uuid) -> Result<Option<Validation>, StoreError>;

    /// Lazily create the row and flip exactly one party's flag. Flags are
    /// independent; completion is a pure function of their current values,
    /// never of arrival order.
    async fn set_flag(&self, order_id: Uuid, party: Party) -> Result<Validation, StoreError>;
}

/// Courier pool and location pings. The pool is derived (role + profile
/// status) and read-only here; there is no reservation primitive, so two
/// concurrent orders may select the same courier. Assignment is advisory,
/// not a scarce seat allocation.
#[async_trait]
pub trait CourierRepository: Send + Sync {
    async fn list_active(&self) -> Result<Vec<CourierProfile>, StoreError>;

    async fn record_location(&self, location: &CourierLocation) -> Result<(), StoreError>;

    async fn latest_location(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<CourierLocation>, StoreError>;
}

/// Fire-and-forget notification sink, at-most-best-effort delivery
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, user_id: Uuid, message: &str, channel: Channel)
        -> Result<(), StoreError>;
}
