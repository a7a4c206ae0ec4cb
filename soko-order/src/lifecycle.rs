use std::sync::Arc;

use soko_core::{
    Caller, Channel, DeliveryRepository, DeliveryStatus, Notifier, Order, OrderRepository,
    OrderStatus, Party, PaymentRepository, StoreError, ValidationRepository,
};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("order not found")]
    OrderNotFound,

    #[error("caller is not a party to this order")]
    Forbidden,

    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("order has no delivery confirmation yet")]
    NotYetDelivered {
        order_status: OrderStatus,
        delivery_status: Option<DeliveryStatus>,
    },

    #[error("no courier available")]
    NoCourierAvailable,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Owns the order status state machine. Every transition is a conditional
/// store write, so concurrent callers (webhook retry, buyer action, admin
/// sweep) race safely: exactly one wins the compare-and-swap and only the
/// winner emits notifications.
pub struct LifecycleEngine {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    validations: Arc<dyn ValidationRepository>,
    notifier: Arc<dyn Notifier>,
}

impl LifecycleEngine {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        validations: Arc<dyn ValidationRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            orders,
            payments,
            deliveries,
            validations,
            notifier,
        }
    }

    /// Webhook effect: AwaitingPayment → FundsHeld, plus the payment and
    /// delivery companion rows. Replays re-upsert the rows (keyed on
    /// order_id) and return success without re-notifying.
    pub async fn confirm_payment(
        &self,
        reference: &str,
        mode: &str,
    ) -> Result<Order, EngineError> {
        let order = self
            .orders
            .find_by_reference(reference)
            .await?
            .ok_or(EngineError::OrderNotFound)?;

        if matches!(
            order.status,
            OrderStatus::Cancelled | OrderStatus::Disputed
        ) {
            // Late webhook against a closed order: acknowledge, touch nothing
            tracing::warn!(order_id = %order.id, status = ?order.status, "payment webhook for closed order ignored");
            return Ok(order);
        }

        let first = self
            .orders
            .transition(order.id, &[OrderStatus::AwaitingPayment], OrderStatus::FundsHeld)
            .await?;

        self.payments
            .upsert_held(order.id, order.amount, mode, Some(reference))
            .await?;
        self.deliveries
            .upsert_pending(order.id, order.seller_id, order.buyer_id)
            .await?;

        if first {
            tracing::info!(order_id = %order.id, reference, "order funds held");
            let _ = self
                .notifier
                .notify(
                    order.buyer_id,
                    &format!(
                        "Payment received for \"{}\". Funds are held in escrow until delivery.",
                        order.product_name
                    ),
                    Channel::Payment,
                )
                .await;
            let _ = self
                .notifier
                .notify(
                    order.seller_id,
                    &format!(
                        "Order {} for \"{}\" is paid. Prepare the shipment.",
                        order.id, order.product_name
                    ),
                    Channel::Order,
                )
                .await;
            if let Some(courier_id) = order.courier_id {
                let _ = self
                    .notifier
                    .notify(
                        courier_id,
                        &format!("Order {} is funded and awaiting pickup.", order.id),
                        Channel::Delivery,
                    )
                    .await;
            }
        }

        let order = self
            .orders
            .get_order(order.id)
            .await?
            .ok_or(EngineError::OrderNotFound)?;
        Ok(order)
    }

    /// Assigned courier accepts the delivery: AwaitingCourier → InTransit
    pub async fn start_transit(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        let order = self.get(order_id).await?;
        self.require_assigned_courier(&order, caller)?;

        if order.status == OrderStatus::InTransit {
            return Ok(());
        }
        let changed = self
            .orders
            .transition(order_id, &[OrderStatus::AwaitingCourier], OrderStatus::InTransit)
            .await?;
        if !changed {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::InTransit,
            });
        }

        self.deliveries
            .update_status(order_id, DeliveryStatus::InTransit)
            .await?;

        let _ = self
            .notifier
            .notify(
                order.buyer_id,
                &format!("Your order \"{}\" is on the way.", order.product_name),
                Channel::Delivery,
            )
            .await;
        Ok(())
    }

    /// Assigned courier hands over the package: InTransit → Delivered.
    /// Also records the courier's validation flag, since the delivered
    /// action is the courier's sign-off.
    pub async fn mark_delivered(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        let order = self.get(order_id).await?;
        self.require_assigned_courier(&order, caller)?;

        if matches!(order.status, OrderStatus::Delivered | OrderStatus::Completed) {
            return Ok(());
        }
        let changed = self
            .orders
            .transition(order_id, &[OrderStatus::InTransit], OrderStatus::Delivered)
            .await?;
        if !changed {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Delivered,
            });
        }

        self.deliveries
            .mark_delivered(order_id, chrono::Utc::now())
            .await?;
        self.validations.set_flag(order_id, Party::Courier).await?;

        tracing::info!(order_id = %order_id, "order delivered");
        let _ = self
            .notifier
            .notify(
                order.buyer_id,
                &format!(
                    "\"{}\" was delivered. Confirm reception to release the funds.",
                    order.product_name
                ),
                Channel::Delivery,
            )
            .await;
        Ok(())
    }

    /// Buyer contests a delivered order: Delivered → Disputed. Terminal
    /// here; resolution is manual admin work.
    pub async fn open_dispute(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        let order = self.get(order_id).await?;
        if caller.user_id != order.buyer_id {
            return Err(EngineError::Forbidden);
        }

        if order.status == OrderStatus::Disputed {
            return Ok(());
        }
        let changed = self
            .orders
            .transition(order_id, &[OrderStatus::Delivered], OrderStatus::Disputed)
            .await?;
        if !changed {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Disputed,
            });
        }

        tracing::warn!(order_id = %order_id, "dispute opened");
        let _ = self
            .notifier
            .notify(
                order.seller_id,
                &format!("A dispute was opened on order {}.", order_id),
                Channel::Order,
            )
            .await;
        Ok(())
    }

    /// Admin cancellation, legal from any pre-delivered state
    pub async fn cancel(&self, order_id: Uuid, caller: &Caller) -> Result<(), EngineError> {
        if !caller.is_admin() {
            return Err(EngineError::Forbidden);
        }
        let order = self.get(order_id).await?;

        if order.status == OrderStatus::Cancelled {
            return Ok(());
        }
        let changed = self
            .orders
            .transition(
                order_id,
                &[
                    OrderStatus::AwaitingPayment,
                    OrderStatus::FundsHeld,
                    OrderStatus::AwaitingCourier,
                    OrderStatus::InTransit,
                ],
                OrderStatus::Cancelled,
            )
            .await?;
        if !changed {
            return Err(EngineError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }
        tracing::info!(order_id = %order_id, "order cancelled");
        Ok(())
    }

    async fn get(&self, order_id: Uuid) -> Result<Order, EngineError> {
        self.orders
            .get_order(order_id)
            .await?
            .ok_or(EngineError::OrderNotFound)
    }

    fn require_assigned_courier(&self, order: &Order, caller: &Caller) -> Result<(), EngineError> {
        if caller.is_admin() {
            return Ok(());
        }
        match order.courier_id {
            Some(id) if id == caller.user_id => Ok(()),
            _ => Err(EngineError::Forbidden),
        }
    }
}
