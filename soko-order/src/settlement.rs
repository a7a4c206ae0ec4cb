use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use soko_core::{
    DeliveryRepository, OrderRepository, OrderStatus, PaymentRepository, ReleaseOutcome,
    Validation, ValidationRepository,
};
use soko_core::Order;
use uuid::Uuid;

use crate::lifecycle::EngineError;
use crate::validation::has_delivery_evidence;

/// Hard cap on a backfill page, regardless of the caller-supplied limit
pub const MAX_BACKFILL_PAGE: u32 = 500;

#[derive(Debug, Clone, Serialize)]
pub struct MissingEntry {
    pub order_id: Uuid,
    pub reason: String,
}

/// Result of one backfill sweep. Re-running the sweep immediately after
/// itself reports created = 0 and unlocked = 0 for everything the first
/// run already fixed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillReport {
    pub scanned: usize,
    pub created: usize,
    pub unlocked: usize,
    pub updated_orders: usize,
    pub missing: Vec<MissingEntry>,
}

/// The correctness backstop. Webhook or step-ordering failures can leave
/// payment and order rows inconsistent; this reconciler re-derives the
/// target state from validation + delivery evidence and writes it with
/// set-if-not-already-there semantics. There is no distributed
/// transaction to lean on, and none is faked.
pub struct SettlementReconciler {
    orders: Arc<dyn OrderRepository>,
    payments: Arc<dyn PaymentRepository>,
    deliveries: Arc<dyn DeliveryRepository>,
    validations: Arc<dyn ValidationRepository>,
}

impl SettlementReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        payments: Arc<dyn PaymentRepository>,
        deliveries: Arc<dyn DeliveryRepository>,
        validations: Arc<dyn ValidationRepository>,
    ) -> Self {
        Self {
            orders,
            payments,
            deliveries,
            validations,
        }
    }

    /// Ensure the order's payment row is in released state. Safe to call
    /// concurrently for the same order; the store's conditional update
    /// decides the single winner.
    pub async fn ensure_released(&self, order: &Order) -> Result<ReleaseOutcome, EngineError> {
        let outcome = self
            .payments
            .mark_released(order.id, order.amount, Utc::now())
            .await?;
        match outcome {
            ReleaseOutcome::Created => {
                tracing::info!(order_id = %order.id, "payment row created in released state")
            }
            ReleaseOutcome::Unlocked => {
                tracing::info!(order_id = %order.id, "payment released")
            }
            ReleaseOutcome::AlreadyReleased => {}
            ReleaseOutcome::Blocked => {
                tracing::warn!(order_id = %order.id, "refunded/cancelled payment left untouched")
            }
        }
        Ok(outcome)
    }

    /// Batch repair over recent delivered/completed orders. Funds are only
    /// released where buyer validation AND delivery evidence are both
    /// present; delivered-but-unconfirmed orders are reported, never
    /// force-completed.
    pub async fn backfill(&self, limit: u32) -> Result<BackfillReport, EngineError> {
        let limit = limit.min(MAX_BACKFILL_PAGE);
        let orders = self
            .orders
            .list_recent_with_status(&[OrderStatus::Delivered, OrderStatus::Completed], limit)
            .await?;

        let mut report = BackfillReport {
            scanned: orders.len(),
            ..Default::default()
        };

        for order in orders {
            let validation = self
                .validations
                .get(order.id)
                .await?
                .unwrap_or_else(|| Validation::empty(order.id));
            if !validation.buyer_ok {
                report.missing.push(MissingEntry {
                    order_id: order.id,
                    reason: "buyer validation missing".to_string(),
                });
                continue;
            }

            let delivery = self.deliveries.get_by_order(order.id).await?;
            if !has_delivery_evidence(&order, delivery.as_ref(), &validation) {
                report.missing.push(MissingEntry {
                    order_id: order.id,
                    reason: "no delivery evidence".to_string(),
                });
                continue;
            }

            match self.ensure_released(&order).await? {
                ReleaseOutcome::Created => report.created += 1,
                ReleaseOutcome::Unlocked => report.unlocked += 1,
                ReleaseOutcome::AlreadyReleased => {}
                ReleaseOutcome::Blocked => {
                    report.missing.push(MissingEntry {
                        order_id: order.id,
                        reason: "payment is refunded or cancelled".to_string(),
                    });
                    continue;
                }
            }

            if order.status == OrderStatus::Delivered {
                let advanced = self
                    .orders
                    .transition(order.id, &[OrderStatus::Delivered], OrderStatus::Completed)
                    .await?;
                if advanced {
                    report.updated_orders += 1;
                }
            }
        }

        tracing::info!(
            scanned = report.scanned,
            created = report.created,
            unlocked = report.unlocked,
            updated_orders = report.updated_orders,
            skipped = report.missing.len(),
            "backfill sweep finished"
        );
        Ok(report)
    }
}
