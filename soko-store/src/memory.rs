use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soko_core::{
    Channel, CourierLocation, CourierProfile, CourierRepository, Delivery, DeliveryRepository,
    DeliveryStatus, Notification, Notifier, Order, OrderRepository, OrderStatus, Party, Payment,
    PaymentRepository, PaymentStatus, ReleaseOutcome, StoreError, Validation,
    ValidationRepository,
};
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    orders: HashMap<Uuid, Order>,
    payments: HashMap<Uuid, Payment>,
    deliveries: HashMap<Uuid, Delivery>,
    validations: HashMap<Uuid, Validation>,
    couriers: Vec<CourierProfile>,
    locations: Vec<CourierLocation>,
    notifications: Vec<Notification>,
}

/// In-memory implementation of every repository trait. Used as the test
/// double across the workspace; a single mutex stands in for the store's
/// per-row update semantics, which is stricter than the real thing and
/// therefore safe for exercising the engines.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_order(&self, order: Order) {
        self.inner.lock().await.orders.insert(order.id, order);
    }

    pub async fn seed_courier(&self, courier: CourierProfile) {
        self.inner.lock().await.couriers.push(courier);
    }

    pub async fn seed_payment(&self, payment: Payment) {
        self.inner
            .lock()
            .await
            .payments
            .insert(payment.order_id, payment);
    }

    pub async fn seed_validation(&self, validation: Validation) {
        self.inner
            .lock()
            .await
            .validations
            .insert(validation.order_id, validation);
    }

    pub async fn order(&self, id: Uuid) -> Option<Order> {
        self.inner.lock().await.orders.get(&id).cloned()
    }

    pub async fn payment(&self, order_id: Uuid) -> Option<Payment> {
        self.inner.lock().await.payments.get(&order_id).cloned()
    }

    pub async fn delivery(&self, order_id: Uuid) -> Option<Delivery> {
        self.inner.lock().await.deliveries.get(&order_id).cloned()
    }

    pub async fn validation(&self, order_id: Uuid) -> Option<Validation> {
        self.inner.lock().await.validations.get(&order_id).cloned()
    }

    pub async fn notifications(&self) -> Vec<Notification> {
        self.inner.lock().await.notifications.clone()
    }
}

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn create_order(&self, order: &Order) -> Result<Uuid, StoreError> {
        self.inner
            .lock()
            .await
            .orders
            .insert(order.id, order.clone());
        Ok(order.id)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        Ok(self.inner.lock().await.orders.get(&id).cloned())
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .orders
            .values()
            .find(|o| o.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.orders.get_mut(&id) {
            Some(order) if from.contains(&order.status) => {
                order.status = to;
                order.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_courier(&self, id: Uuid, courier_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(order) = inner.orders.get_mut(&id) {
            order.courier_id = Some(courier_id);
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(order) = inner.orders.get_mut(&id) {
            order.payment_reference = Some(reference.to_string());
            order.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_recent_with_status(
        &self,
        statuses: &[OrderStatus],
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let inner = self.inner.lock().await;
        let mut matching: Vec<Order> = inner
            .orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        Ok(self.inner.lock().await.payments.get(&order_id).cloned())
    }

    async fn upsert_held(
        &self,
        order_id: Uuid,
        amount: i64,
        mode: &str,
        reference: Option<&str>,
    ) -> Result<Payment, StoreError> {
        let mut inner = self.inner.lock().await;
        let payment = inner
            .payments
            .entry(order_id)
            .or_insert_with(|| {
                Payment::held(
                    order_id,
                    amount,
                    mode.to_string(),
                    reference.map(str::to_string),
                )
            });
        if payment.status == PaymentStatus::Held {
            payment.amount = amount;
            payment.mode = mode.to_string();
            payment.reference = reference.map(str::to_string);
        }
        Ok(payment.clone())
    }

    async fn mark_released(
        &self,
        order_id: Uuid,
        amount: i64,
        released_at: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.payments.get_mut(&order_id) {
            None => {
                let mut payment =
                    Payment::released(order_id, amount, "ESCROW".to_string(), None);
                payment.released_at = Some(released_at);
                inner.payments.insert(order_id, payment);
                Ok(ReleaseOutcome::Created)
            }
            Some(p) => match p.status {
                PaymentStatus::Released => Ok(ReleaseOutcome::AlreadyReleased),
                PaymentStatus::Held => {
                    p.status = PaymentStatus::Released;
                    p.released_at.get_or_insert(released_at);
                    Ok(ReleaseOutcome::Unlocked)
                }
                PaymentStatus::Refunded | PaymentStatus::Cancelled => Ok(ReleaseOutcome::Blocked),
            },
        }
    }
}

#[async_trait]
impl DeliveryRepository for MemoryStore {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        Ok(self.inner.lock().await.deliveries.get(&order_id).cloned())
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Delivery>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .deliveries
            .values()
            .find(|d| d.tracking_code.as_deref() == Some(code))
            .cloned())
    }

    async fn upsert_pending(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<Delivery, StoreError> {
        let mut inner = self.inner.lock().await;
        let delivery = inner
            .deliveries
            .entry(order_id)
            .or_insert_with(|| Delivery::pending(order_id, seller_id, buyer_id));
        Ok(delivery.clone())
    }

    async fn assign_courier(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
        courier_id: Uuid,
        tracking_code: &str,
    ) -> Result<Delivery, StoreError> {
        let mut inner = self.inner.lock().await;
        let delivery = inner
            .deliveries
            .entry(order_id)
            .or_insert_with(|| Delivery::pending(order_id, seller_id, buyer_id));
        delivery.courier_id = Some(courier_id);
        delivery.status = DeliveryStatus::AwaitingCourier;
        delivery.tracking_code = Some(tracking_code.to_string());
        delivery.assigned_at = Some(Utc::now());
        Ok(delivery.clone())
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.deliveries.get_mut(&order_id) {
            Some(delivery) => {
                delivery.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_delivered(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().await;
        match inner.deliveries.get_mut(&order_id) {
            Some(delivery) => {
                delivery.status = DeliveryStatus::Delivered;
                delivery.delivered_at.get_or_insert(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ValidationRepository for MemoryStore {
    async fn get(&self, order_id: Uuid) -> Result<Option<Validation>, StoreError> {
        Ok(self.inner.lock().await.validations.get(&order_id).cloned())
    }

    async fn set_flag(&self, order_id: Uuid, party: Party) -> Result<Validation, StoreError> {
        let mut inner = self.inner.lock().await;
        let validation = inner
            .validations
            .entry(order_id)
            .or_insert_with(|| Validation::empty(order_id));
        match party {
            Party::Buyer => validation.buyer_ok = true,
            Party::Seller => validation.seller_ok = true,
            Party::Courier => validation.courier_ok = true,
        }
        validation.updated_at = Utc::now();
        Ok(validation.clone())
    }
}

#[async_trait]
impl CourierRepository for MemoryStore {
    async fn list_active(&self) -> Result<Vec<CourierProfile>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .couriers
            .iter()
            .filter(|c| c.active)
            .cloned()
            .collect())
    }

    async fn record_location(&self, location: &CourierLocation) -> Result<(), StoreError> {
        self.inner.lock().await.locations.push(location.clone());
        Ok(())
    }

    async fn latest_location(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<CourierLocation>, StoreError> {
        Ok(self
            .inner
            .lock()
            .await
            .locations
            .iter()
            .filter(|l| l.courier_id == courier_id)
            .max_by_key(|l| l.recorded_at)
            .cloned())
    }
}

#[async_trait]
impl Notifier for MemoryStore {
    async fn notify(
        &self,
        user_id: Uuid,
        message: &str,
        channel: Channel,
    ) -> Result<(), StoreError> {
        self.inner.lock().await.notifications.push(Notification {
            id: Uuid::new_v4(),
            user_id,
            message: message.to_string(),
            channel,
            created_at: Utc::now(),
        });
        Ok(())
    }
}
