use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use soko_core::{
    Caller, Channel, CourierProfile, CourierRepository, DeliveryRepository, Notifier,
    OrderRepository, OrderStatus,
};
use uuid::Uuid;

use crate::lifecycle::EngineError;

/// Courier selection policy over the eligible pool. Kept behind a trait so
/// a weighting strategy can replace the default without touching the
/// allocator itself.
pub trait SelectionPolicy: Send + Sync {
    fn select<'a>(&self, pool: &'a [CourierProfile]) -> Option<&'a CourierProfile>;
}

/// Uniform random choice among eligible couriers. No load-balancing, no
/// distance ranking.
pub struct UniformRandom;

impl SelectionPolicy for UniformRandom {
    fn select<'a>(&self, pool: &'a [CourierProfile]) -> Option<&'a CourierProfile> {
        pool.choose(&mut rand::thread_rng())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Assignment {
    pub courier_id: Uuid,
    pub tracking_code: String,
}

/// Picks a courier for a funded order and wires up the delivery record.
/// The pool is read fresh on every request and there is no reservation
/// step: two concurrent orders may pick the same courier, which is fine
/// because assignment is advisory.
pub struct CourierAllocator {
    orders: Arc<dyn OrderRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    couriers: Arc<dyn CourierRepository>,
    notifier: Arc<dyn Notifier>,
    policy: Arc<dyn SelectionPolicy>,
}

impl CourierAllocator {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        couriers: Arc<dyn CourierRepository>,
        notifier: Arc<dyn Notifier>,
        policy: Arc<dyn SelectionPolicy>,
    ) -> Self {
        Self {
            orders,
            deliveries,
            couriers,
            notifier,
            policy,
        }
    }

    pub async fn assign(&self, order_id: Uuid, caller: &Caller) -> Result<Assignment, EngineError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)?;
        if caller.user_id != order.seller_id && !caller.is_admin() {
            return Err(EngineError::Forbidden);
        }
        if !matches!(
            order.status,
            OrderStatus::FundsHeld | OrderStatus::AwaitingCourier
        ) {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::AwaitingCourier,
            });
        }

        // Eligible pool: active courier role AND active profile. Empty pool
        // is transient system state, not a client error, and mutates nothing.
        let pool: Vec<CourierProfile> = self
            .couriers
            .list_active()
            .await?
            .into_iter()
            .filter(|c| c.active)
            .collect();
        let courier = self
            .policy
            .select(&pool)
            .ok_or(EngineError::NoCourierAvailable)?
            .clone();

        let tracking_code = generate_tracking_code();

        self.deliveries
            .assign_courier(
                order_id,
                order.seller_id,
                order.buyer_id,
                courier.user_id,
                &tracking_code,
            )
            .await?;
        self.orders.set_courier(order_id, courier.user_id).await?;
        let advanced = self
            .orders
            .transition(
                order_id,
                &[OrderStatus::FundsHeld, OrderStatus::AwaitingCourier],
                OrderStatus::AwaitingCourier,
            )
            .await?;
        if !advanced {
            // The order left the assignable states between the precondition
            // read and the write (a concurrent cancel, typically). Report
            // the conflict instead of a phantom success; no fanout.
            let current = self
                .orders
                .get_order(order_id)
                .await?
                .map(|o| o.status)
                .unwrap_or(order.status);
            tracing::warn!(order_id = %order_id, status = ?current, "courier assignment lost the status race");
            return Err(EngineError::InvalidTransition {
                from: current,
                to: OrderStatus::AwaitingCourier,
            });
        }

        tracing::info!(order_id = %order_id, courier_id = %courier.user_id, tracking_code, "courier assigned");

        // Courier gets the full delivery sheet; buyer and seller get
        // status-only notices
        let _ = self
            .notifier
            .notify(
                courier.user_id,
                &format!(
                    "New delivery {}: {} x{} for {} ({}), {}",
                    tracking_code,
                    order.product_name,
                    order.quantity,
                    order.recipient_name,
                    order.recipient_phone,
                    order.recipient_address
                ),
                Channel::Delivery,
            )
            .await;
        let _ = self
            .notifier
            .notify(
                order.seller_id,
                &format!("A courier was assigned to order {}.", order_id),
                Channel::Order,
            )
            .await;
        let _ = self
            .notifier
            .notify(
                order.buyer_id,
                &format!("A courier was assigned to your order ({}).", tracking_code),
                Channel::Order,
            )
            .await;

        Ok(Assignment {
            courier_id: courier.user_id,
            tracking_code,
        })
    }
}

/// Human-readable tracking code: timestamp plus a short random suffix.
/// Collision probability is negligible but not guaranteed zero, which is
/// acceptable in this domain.
pub fn generate_tracking_code() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(4)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("SKO-{}-{}", Utc::now().timestamp(), suffix)
}
