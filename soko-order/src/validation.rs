use std::sync::Arc;

use soko_core::{
    Caller, Channel, Delivery, DeliveryRepository, DeliveryStatus, Notifier, Order,
    OrderRepository, OrderStatus, Party, Validation, ValidationRepository,
};
use uuid::Uuid;

use crate::lifecycle::EngineError;
use crate::settlement::SettlementReconciler;

/// Delivered-state and courier_ok are interchangeable evidence of physical
/// completion. Pure function of current values; arrival order of the three
/// validation flags never matters.
pub fn has_delivery_evidence(
    order: &Order,
    delivery: Option<&Delivery>,
    validation: &Validation,
) -> bool {
    matches!(order.status, OrderStatus::Delivered | OrderStatus::Completed)
        || delivery.map_or(false, |d| d.status == DeliveryStatus::Delivered)
        || validation.courier_ok
}

/// Owns the tri-party sign-off record and the completion sequence it gates
pub struct ValidationTracker {
    orders: Arc<dyn OrderRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    validations: Arc<dyn ValidationRepository>,
    notifier: Arc<dyn Notifier>,
    reconciler: Arc<SettlementReconciler>,
}

impl ValidationTracker {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        validations: Arc<dyn ValidationRepository>,
        notifier: Arc<dyn Notifier>,
        reconciler: Arc<SettlementReconciler>,
    ) -> Self {
        Self {
            orders,
            deliveries,
            validations,
            notifier,
            reconciler,
        }
    }

    /// Seller sign-off. A validation side-channel: the order status is left
    /// untouched, the delivery goes to Pending for the courier to accept.
    pub async fn mark_shipped(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)?;
        if caller.user_id != order.seller_id && !caller.is_admin() {
            return Err(EngineError::Forbidden);
        }

        self.validations.set_flag(order_id, Party::Seller).await?;
        self.deliveries
            .upsert_pending(order_id, order.seller_id, order.buyer_id)
            .await?;
        self.deliveries
            .update_status(order_id, DeliveryStatus::Pending)
            .await?;

        if let Some(courier_id) = order.courier_id {
            let _ = self
                .notifier
                .notify(
                    courier_id,
                    &format!("Order {} is packed and ready for pickup.", order_id),
                    Channel::Delivery,
                )
                .await;
        }
        let _ = self
            .notifier
            .notify(
                order.buyer_id,
                &format!("The seller shipped \"{}\".", order.product_name),
                Channel::Order,
            )
            .await;
        Ok(())
    }

    /// Buyer confirms reception. Each step is idempotent on retry; the
    /// payment release happens before the order flips to completed so a
    /// crash in between never leaves a completed order with unreleased
    /// funds. The opposite gap (released payment, order still delivered)
    /// is what the backfill repairs.
    pub async fn confirm_reception(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        // 1. Load the order and verify the caller is its buyer
        let order = self
            .orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)?;
        if caller.user_id != order.buyer_id {
            return Err(EngineError::Forbidden);
        }

        // 2. Without independent delivery evidence the request is a
        //    conflict that mutates nothing; the buyer retries once the
        //    evidence exists. The buyer's own flag is not evidence, so it
        //    is checked against the current row before being recorded.
        let delivery = self.deliveries.get_by_order(order_id).await?;
        let current = self
            .validations
            .get(order_id)
            .await?
            .unwrap_or_else(|| Validation::empty(order_id));
        if !has_delivery_evidence(&order, delivery.as_ref(), &current) {
            return Err(EngineError::NotYetDelivered {
                order_status: order.status,
                delivery_status: delivery.map(|d| d.status),
            });
        }

        // 3. Record the buyer's sign-off (no-op if already set)
        self.validations.set_flag(order_id, Party::Buyer).await?;

        // 4. Funds first
        self.reconciler.ensure_released(&order).await?;

        // 5. Then the terminal flip, unless already closed
        let completed_now = if order.status.is_terminal() {
            false
        } else {
            self.orders
                .transition(
                    order_id,
                    &[
                        OrderStatus::FundsHeld,
                        OrderStatus::AwaitingCourier,
                        OrderStatus::InTransit,
                        OrderStatus::Delivered,
                    ],
                    OrderStatus::Completed,
                )
                .await?
        };

        // 6. Fanout only on the first completion
        if completed_now {
            tracing::info!(order_id = %order_id, "order completed, funds released");
            let _ = self
                .notifier
                .notify(
                    order.seller_id,
                    &format!("Funds for order {} were released to you.", order_id),
                    Channel::Payment,
                )
                .await;
            if let Some(courier_id) = order.courier_id {
                let _ = self
                    .notifier
                    .notify(
                        courier_id,
                        &format!("Delivery of order {} was validated by the buyer.", order_id),
                        Channel::Delivery,
                    )
                    .await;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use soko_core::Order;

    fn order(status: OrderStatus) -> Order {
        let mut o = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            "Cement pallet".into(),
            2,
            10_000,
            "Awa D.".into(),
            "+221770000000".into(),
            "Dakar, Plateau".into(),
        );
        o.status = status;
        o
    }

    #[test]
    fn evidence_from_order_status() {
        let v = Validation::empty(Uuid::new_v4());
        assert!(has_delivery_evidence(&order(OrderStatus::Delivered), None, &v));
        assert!(has_delivery_evidence(&order(OrderStatus::Completed), None, &v));
        assert!(!has_delivery_evidence(&order(OrderStatus::InTransit), None, &v));
    }

    #[test]
    fn evidence_from_delivery_row() {
        let o = order(OrderStatus::InTransit);
        let v = Validation::empty(o.id);
        let mut d = Delivery::pending(o.id, o.seller_id, o.buyer_id);
        assert!(!has_delivery_evidence(&o, Some(&d), &v));
        d.status = DeliveryStatus::Delivered;
        d.delivered_at = Some(Utc::now());
        assert!(has_delivery_evidence(&o, Some(&d), &v));
    }

    #[test]
    fn courier_flag_is_interchangeable_evidence() {
        let o = order(OrderStatus::InTransit);
        let mut v = Validation::empty(o.id);
        v.courier_ok = true;
        assert!(has_delivery_evidence(&o, None, &v));
    }
}
