use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order status in the escrow lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    AwaitingPayment,
    FundsHeld,
    AwaitingCourier,
    InTransit,
    Delivered,
    Completed,
    Disputed,
    Cancelled,
}

impl OrderStatus {
    /// Terminal states: no further transition is legal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Disputed | OrderStatus::Cancelled
        )
    }

    /// True while the order has not yet reached physical delivery
    pub fn is_pre_delivery(self) -> bool {
        matches!(
            self,
            OrderStatus::AwaitingPayment
                | OrderStatus::FundsHeld
                | OrderStatus::AwaitingCourier
                | OrderStatus::InTransit
        )
    }

    /// Legal transitions. The graph is monotonic: no backward moves except
    /// Delivered → Disputed and pre-delivery → Cancelled.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, to) {
            (AwaitingPayment, FundsHeld) => true,
            (FundsHeld, AwaitingCourier) => true,
            (AwaitingCourier, InTransit) => true,
            (InTransit, Delivered) => true,
            (Delivered, Completed) => true,
            (Delivered, Disputed) => true,
            (from, Cancelled) => from.is_pre_delivery(),
            _ => false,
        }
    }
}

/// Payment escrow status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Held,
    Released,
    Refunded,
    Cancelled,
}

/// Delivery progress, tracked separately from the order status so courier
/// actions and order transitions can be reconciled independently
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    AwaitingCourier,
    InTransit,
    Delivered,
}

/// One purchase line item. Never physically deleted (audit trail).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub buyer_id: Uuid,
    pub seller_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: i32,
    /// Amount in minor currency units
    pub amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_reference: Option<String>,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        buyer_id: Uuid,
        seller_id: Uuid,
        product_id: Uuid,
        product_name: String,
        quantity: i32,
        amount: i64,
        recipient_name: String,
        recipient_phone: String,
        recipient_address: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            buyer_id,
            seller_id,
            courier_id: None,
            product_id,
            product_name,
            quantity,
            amount,
            currency: "XOF".to_string(),
            status: OrderStatus::AwaitingPayment,
            payment_reference: None,
            recipient_name,
            recipient_phone,
            recipient_address,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Escrowed funds for one order. At most one authoritative row per order;
/// the reconciler enforces this by upserting on order_id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub amount: i64,
    pub mode: String,
    pub status: PaymentStatus,
    pub reference: Option<String>,
    pub released_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Payment {
    pub fn held(order_id: Uuid, amount: i64, mode: String, reference: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            mode,
            status: PaymentStatus::Held,
            reference,
            released_at: None,
            created_at: Utc::now(),
        }
    }

    /// Fast-forward creation: completion evidence already exists, so the
    /// row is born released rather than held then released.
    pub fn released(order_id: Uuid, amount: i64, mode: String, reference: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount,
            mode,
            status: PaymentStatus::Released,
            reference,
            released_at: Some(now),
            created_at: now,
        }
    }
}

/// Physical delivery record, upserted keyed on order_id to tolerate
/// webhook retries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub order_id: Uuid,
    pub seller_id: Uuid,
    pub buyer_id: Uuid,
    pub courier_id: Option<Uuid>,
    pub status: DeliveryStatus,
    pub tracking_code: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    pub fn pending(order_id: Uuid, seller_id: Uuid, buyer_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            seller_id,
            buyer_id,
            courier_id: None,
            status: DeliveryStatus::Pending,
            tracking_code: None,
            assigned_at: None,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Tri-party sign-off record. Each party flips only its own flag; the row
/// is created lazily on first sign-off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub order_id: Uuid,
    pub buyer_ok: bool,
    pub seller_ok: bool,
    pub courier_ok: bool,
    pub updated_at: DateTime<Utc>,
}

impl Validation {
    pub fn empty(order_id: Uuid) -> Self {
        Self {
            order_id,
            buyer_ok: false,
            seller_ok: false,
            courier_ok: false,
            updated_at: Utc::now(),
        }
    }
}

/// Which validation flag a caller may flip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Party {
    Buyer,
    Seller,
    Courier,
}

/// A member of the courier assignment pool: active courier role AND active
/// profile. Computed fresh per assignment request, never persisted as a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierProfile {
    pub user_id: Uuid,
    pub display_name: String,
    pub phone: Option<String>,
    pub active: bool,
}

/// Courier-side location ping, correlated to a delivery via tracking code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierLocation {
    pub courier_id: Uuid,
    pub order_id: Option<Uuid>,
    pub latitude: f64,
    pub longitude: f64,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Order,
    Delivery,
    Payment,
}

/// Fire-and-forget message consumed asynchronously by recipients' UIs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub channel: Channel,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Buyer,
    Seller,
    Courier,
    Admin,
}

/// Explicit per-request caller identity. The engine never reads ambient
/// role state; every operation receives the caller and checks it against
/// the order's own party ids.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub user_id: Uuid,
    pub role: Role,
}

impl Caller {
    pub fn new(user_id: Uuid, role: Role) -> Self {
        Self { user_id, role }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_graph_is_monotonic() {
        use OrderStatus::*;
        assert!(AwaitingPayment.can_transition(FundsHeld));
        assert!(FundsHeld.can_transition(AwaitingCourier));
        assert!(AwaitingCourier.can_transition(InTransit));
        assert!(InTransit.can_transition(Delivered));
        assert!(Delivered.can_transition(Completed));
        assert!(Delivered.can_transition(Disputed));

        // No backward moves
        assert!(!FundsHeld.can_transition(AwaitingPayment));
        assert!(!Delivered.can_transition(InTransit));
        assert!(!Completed.can_transition(Delivered));

        // Cancellation is only legal pre-delivery
        assert!(AwaitingPayment.can_transition(Cancelled));
        assert!(InTransit.can_transition(Cancelled));
        assert!(!Delivered.can_transition(Cancelled));
        assert!(!Completed.can_transition(Cancelled));
    }

    #[test]
    fn terminal_states() {
        assert!(OrderStatus::Completed.is_terminal());
        assert!(OrderStatus::Disputed.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(!OrderStatus::Delivered.is_terminal());
    }

    #[test]
    fn status_wire_names_are_screaming_snake() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::AwaitingCourier).unwrap(),
            "\"AWAITING_COURIER\""
        );
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Released).unwrap(),
            "\"RELEASED\""
        );
    }

    #[test]
    fn released_payment_carries_timestamp() {
        let p = Payment::released(Uuid::new_v4(), 10_000, "MOBILE_MONEY".into(), None);
        assert_eq!(p.status, PaymentStatus::Released);
        assert!(p.released_at.is_some());

        let held = Payment::held(Uuid::new_v4(), 10_000, "MOBILE_MONEY".into(), None);
        assert!(held.released_at.is_none());
    }
}
