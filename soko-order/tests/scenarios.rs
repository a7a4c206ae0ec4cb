use std::sync::Arc;

use soko_core::{
    Caller, CourierProfile, CourierRepository, DeliveryRepository, DeliveryStatus, Notifier,
    Order, OrderRepository, OrderStatus, PaymentRepository, PaymentStatus, Role, StoreError,
    Validation, ValidationRepository,
};
use soko_order::{
    CourierAllocator, EngineError, LifecycleEngine, SettlementReconciler, UniformRandom,
    ValidationTracker, MAX_BACKFILL_PAGE,
};
use soko_store::MemoryStore;
use uuid::Uuid;

struct Harness {
    store: MemoryStore,
    lifecycle: LifecycleEngine,
    allocator: CourierAllocator,
    tracker: ValidationTracker,
    reconciler: Arc<SettlementReconciler>,
}

fn harness() -> Harness {
    let store = MemoryStore::new();
    let s = Arc::new(store.clone());
    let orders: Arc<dyn OrderRepository> = s.clone();
    let payments: Arc<dyn PaymentRepository> = s.clone();
    let deliveries: Arc<dyn DeliveryRepository> = s.clone();
    let validations: Arc<dyn ValidationRepository> = s.clone();
    let couriers: Arc<dyn CourierRepository> = s.clone();
    let notifier: Arc<dyn Notifier> = s.clone();

    let reconciler = Arc::new(SettlementReconciler::new(
        orders.clone(),
        payments.clone(),
        deliveries.clone(),
        validations.clone(),
    ));
    Harness {
        store,
        lifecycle: LifecycleEngine::new(
            orders.clone(),
            payments.clone(),
            deliveries.clone(),
            validations.clone(),
            notifier.clone(),
        ),
        allocator: CourierAllocator::new(
            orders.clone(),
            deliveries.clone(),
            couriers,
            notifier.clone(),
            Arc::new(UniformRandom),
        ),
        tracker: ValidationTracker::new(
            orders,
            deliveries,
            validations,
            notifier,
            reconciler.clone(),
        ),
        reconciler,
    }
}

fn new_order(reference: &str) -> Order {
    let mut order = Order::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        "Solar panel kit".into(),
        1,
        10_000,
        "Fatou N.".into(),
        "+22507000000".into(),
        "Abidjan, Cocody".into(),
    );
    order.payment_reference = Some(reference.to_string());
    order
}

fn buyer(order: &Order) -> Caller {
    Caller::new(order.buyer_id, Role::Buyer)
}

fn seller(order: &Order) -> Caller {
    Caller::new(order.seller_id, Role::Seller)
}

fn courier(id: Uuid) -> Caller {
    Caller::new(id, Role::Courier)
}

async fn seed_courier(store: &MemoryStore) -> Uuid {
    let id = Uuid::new_v4();
    store
        .seed_courier(CourierProfile {
            user_id: id,
            display_name: "Ibrahima S.".into(),
            phone: Some("+221760000000".into()),
            active: true,
        })
        .await;
    id
}

#[tokio::test]
async fn scenario_a_webhook_holds_funds() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    h.store.seed_order(order).await;

    h.lifecycle.confirm_payment("R1", "MOBILE_MONEY").await.unwrap();

    let order = h.store.order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::FundsHeld);

    let payment = h.store.payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Held);
    assert_eq!(payment.amount, 10_000);

    let delivery = h.store.delivery(id).await.unwrap();
    assert_eq!(delivery.status, DeliveryStatus::Pending);
}

#[tokio::test]
async fn webhook_replay_is_idempotent() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    h.store.seed_order(order).await;

    h.lifecycle.confirm_payment("R1", "MOBILE_MONEY").await.unwrap();
    let delivery_id = h.store.delivery(id).await.unwrap().id;
    let notified = h.store.notifications().await.len();

    h.lifecycle.confirm_payment("R1", "MOBILE_MONEY").await.unwrap();

    // Same delivery row, no second fanout
    assert_eq!(h.store.delivery(id).await.unwrap().id, delivery_id);
    assert_eq!(h.store.notifications().await.len(), notified);
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::FundsHeld);
}

#[tokio::test]
async fn webhook_unknown_reference_is_not_found() {
    let h = harness();
    let err = h.lifecycle.confirm_payment("nope", "CARD").await.unwrap_err();
    assert!(matches!(err, EngineError::OrderNotFound));
}

#[tokio::test]
async fn scenario_b_courier_assignment() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller = seller(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();

    let c1 = seed_courier(&h.store).await;
    let assignment = h.allocator.assign(id, &seller).await.unwrap();

    assert_eq!(assignment.courier_id, c1);
    assert!(!assignment.tracking_code.is_empty());

    let order = h.store.order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::AwaitingCourier);
    assert_eq!(order.courier_id, Some(c1));

    let delivery = h.store.delivery(id).await.unwrap();
    assert_eq!(delivery.courier_id, Some(c1));
    assert_eq!(delivery.tracking_code, Some(assignment.tracking_code));
}

#[tokio::test]
async fn assignment_requires_seller_or_admin() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let stranger = Caller::new(Uuid::new_v4(), Role::Seller);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    seed_courier(&h.store).await;

    let err = h.allocator.assign(id, &stranger).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));

    let admin = Caller::new(Uuid::new_v4(), Role::Admin);
    assert!(h.allocator.assign(id, &admin).await.is_ok());
}

#[tokio::test]
async fn empty_pool_mutates_nothing() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller = seller(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();

    // One courier exists but its profile is inactive
    h.store
        .seed_courier(CourierProfile {
            user_id: Uuid::new_v4(),
            display_name: "Off duty".into(),
            phone: None,
            active: false,
        })
        .await;

    let err = h.allocator.assign(id, &seller).await.unwrap_err();
    assert!(matches!(err, EngineError::NoCourierAvailable));

    let order = h.store.order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::FundsHeld);
    assert_eq!(order.courier_id, None);
}

#[tokio::test]
async fn scenario_c_delivery_and_completion() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller_c = seller(&order);
    let buyer_c = buyer(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    seed_courier(&h.store).await;
    let assignment = h.allocator.assign(id, &seller_c).await.unwrap();
    let courier_c = courier(assignment.courier_id);

    h.tracker.mark_shipped(id, &seller_c).await.unwrap();
    h.lifecycle.start_transit(id, &courier_c).await.unwrap();
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::InTransit);

    h.lifecycle.mark_delivered(id, &courier_c).await.unwrap();
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Delivered);
    assert!(h.store.delivery(id).await.unwrap().delivered_at.is_some());

    h.tracker.confirm_reception(id, &buyer_c).await.unwrap();

    let payment = h.store.payment(id).await.unwrap();
    assert_eq!(payment.status, PaymentStatus::Released);
    assert!(payment.released_at.is_some());
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Completed);

    let validation = h.store.validation(id).await.unwrap();
    assert!(validation.buyer_ok);
    assert!(validation.courier_ok);
    assert!(validation.seller_ok);
}

#[tokio::test]
async fn confirm_reception_twice_is_a_noop() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller_c = seller(&order);
    let buyer_c = buyer(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    seed_courier(&h.store).await;
    let assignment = h.allocator.assign(id, &seller_c).await.unwrap();
    let courier_c = courier(assignment.courier_id);
    h.lifecycle.start_transit(id, &courier_c).await.unwrap();
    h.lifecycle.mark_delivered(id, &courier_c).await.unwrap();

    h.tracker.confirm_reception(id, &buyer_c).await.unwrap();
    let payment_id = h.store.payment(id).await.unwrap().id;
    let released_at = h.store.payment(id).await.unwrap().released_at;
    let notified = h.store.notifications().await.len();

    // Second call succeeds, changes nothing, re-notifies nobody
    h.tracker.confirm_reception(id, &buyer_c).await.unwrap();
    let payment = h.store.payment(id).await.unwrap();
    assert_eq!(payment.id, payment_id);
    assert_eq!(payment.released_at, released_at);
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Completed);
    assert_eq!(h.store.notifications().await.len(), notified);
}

#[tokio::test]
async fn scenario_d_confirm_before_delivery_is_conflict() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller_c = seller(&order);
    let buyer_c = buyer(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    seed_courier(&h.store).await;
    let assignment = h.allocator.assign(id, &seller_c).await.unwrap();
    h.lifecycle
        .start_transit(id, &courier(assignment.courier_id))
        .await
        .unwrap();

    let err = h.tracker.confirm_reception(id, &buyer_c).await.unwrap_err();
    match err {
        EngineError::NotYetDelivered {
            order_status,
            delivery_status,
        } => {
            assert_eq!(order_status, OrderStatus::InTransit);
            assert_eq!(delivery_status, Some(DeliveryStatus::InTransit));
        }
        other => panic!("expected NotYetDelivered, got {other:?}"),
    }

    // Nothing was mutated: status intact, payment still held, buyer flag
    // not recorded
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::InTransit);
    assert_eq!(h.store.payment(id).await.unwrap().status, PaymentStatus::Held);
    assert!(h.store.validation(id).await.map_or(true, |v| !v.buyer_ok));
}

#[tokio::test]
async fn confirm_reception_rejects_non_buyer() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller_c = seller(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();

    let err = h.tracker.confirm_reception(id, &seller_c).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));
}

#[tokio::test]
async fn courier_flag_stands_in_for_delivery_status() {
    // Courier signed off but the delivery row never reached delivered:
    // the buyer's confirmation must still go through
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let buyer_c = buyer(&order);
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    let mut v = Validation::empty(id);
    v.courier_ok = true;
    h.store.seed_validation(v).await;

    h.tracker.confirm_reception(id, &buyer_c).await.unwrap();
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Completed);
    assert_eq!(
        h.store.payment(id).await.unwrap().status,
        PaymentStatus::Released
    );
}

#[tokio::test]
async fn scenario_e_backfill_repairs_stuck_order() {
    let h = harness();
    let mut order = new_order("R1");
    order.status = OrderStatus::Delivered;
    let id = order.id;
    h.store.seed_order(order).await;
    let mut v = Validation::empty(id);
    v.buyer_ok = true;
    h.store.seed_validation(v).await;

    let report = h.reconciler.backfill(100).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.created, 1);
    assert_eq!(report.unlocked, 0);
    assert_eq!(report.updated_orders, 1);
    assert!(report.missing.is_empty());

    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Completed);
    assert_eq!(
        h.store.payment(id).await.unwrap().status,
        PaymentStatus::Released
    );
}

#[tokio::test]
async fn backfill_rerun_reports_nothing_new() {
    let h = harness();
    let mut order = new_order("R1");
    order.status = OrderStatus::Delivered;
    let id = order.id;
    h.store.seed_order(order).await;
    let mut v = Validation::empty(id);
    v.buyer_ok = true;
    h.store.seed_validation(v).await;

    h.reconciler.backfill(100).await.unwrap();
    let second = h.reconciler.backfill(100).await.unwrap();

    assert_eq!(second.created, 0);
    assert_eq!(second.unlocked, 0);
    assert_eq!(second.updated_orders, 0);
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Completed);
}

#[tokio::test]
async fn backfill_never_completes_unconfirmed_orders() {
    let h = harness();
    let mut order = new_order("R1");
    order.status = OrderStatus::Delivered;
    let id = order.id;
    h.store.seed_order(order).await;

    let report = h.reconciler.backfill(100).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.created, 0);
    assert_eq!(report.missing.len(), 1);
    assert_eq!(report.missing[0].order_id, id);
    assert_eq!(report.missing[0].reason, "buyer validation missing");

    // Left exactly as found
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Delivered);
    assert!(h.store.payment(id).await.is_none());
}

#[tokio::test]
async fn backfill_unlocks_held_payment() {
    let h = harness();
    let mut order = new_order("R1");
    order.status = OrderStatus::Completed;
    let id = order.id;
    h.store.seed_order(order).await;
    let mut v = Validation::empty(id);
    v.buyer_ok = true;
    h.store.seed_validation(v).await;
    h.store
        .seed_payment(soko_core::Payment::held(id, 10_000, "CARD".into(), None))
        .await;

    let report = h.reconciler.backfill(100).await.unwrap();
    assert_eq!(report.unlocked, 1);
    assert_eq!(report.created, 0);
    assert_eq!(
        h.store.payment(id).await.unwrap().status,
        PaymentStatus::Released
    );
}

/// Order repo whose reads serve a fixed stale snapshot while writes go to
/// the real store, so a read-then-write race can be reproduced
/// deterministically
struct StaleOrderReads {
    inner: Arc<MemoryStore>,
    snapshot: Order,
}

#[async_trait::async_trait]
impl OrderRepository for StaleOrderReads {
    async fn create_order(&self, order: &Order) -> Result<Uuid, StoreError> {
        self.inner.create_order(order).await
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        if id == self.snapshot.id {
            return Ok(Some(self.snapshot.clone()));
        }
        self.inner.get_order(id).await
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        self.inner.find_by_reference(reference).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        self.inner.transition(id, from, to).await
    }

    async fn set_courier(&self, id: Uuid, courier_id: Uuid) -> Result<(), StoreError> {
        self.inner.set_courier(id, courier_id).await
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        self.inner.set_payment_reference(id, reference).await
    }

    async fn list_recent_with_status(
        &self,
        statuses: &[OrderStatus],
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        self.inner.list_recent_with_status(statuses, limit).await
    }
}

#[tokio::test]
async fn assignment_losing_the_status_race_is_a_conflict() {
    let store = MemoryStore::new();
    let s = Arc::new(store.clone());

    // The store holds the cancelled order; the allocator reads a snapshot
    // taken before the cancel landed
    let mut snapshot = new_order("R1");
    snapshot.status = OrderStatus::FundsHeld;
    let id = snapshot.id;
    let seller = seller(&snapshot);
    let mut cancelled = snapshot.clone();
    cancelled.status = OrderStatus::Cancelled;
    store.seed_order(cancelled).await;

    seed_courier(&store).await;

    let orders: Arc<dyn OrderRepository> = Arc::new(StaleOrderReads {
        inner: s.clone(),
        snapshot,
    });
    let allocator = CourierAllocator::new(
        orders,
        s.clone(),
        s.clone(),
        s.clone(),
        Arc::new(UniformRandom),
    );

    let err = allocator.assign(id, &seller).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));

    // The cancel stands and nobody was told an assignment happened
    assert_eq!(store.order(id).await.unwrap().status, OrderStatus::Cancelled);
    assert!(store.notifications().await.is_empty());
}

#[tokio::test]
async fn backfill_page_is_capped() {
    let h = harness();
    for _ in 0..(MAX_BACKFILL_PAGE + 5) {
        let mut order = new_order("R");
        order.status = OrderStatus::Delivered;
        h.store.seed_order(order).await;
    }

    let report = h.reconciler.backfill(u32::MAX).await.unwrap();
    assert_eq!(report.scanned, MAX_BACKFILL_PAGE as usize);

    let report = h.reconciler.backfill(7).await.unwrap();
    assert_eq!(report.scanned, 7);
}

#[tokio::test]
async fn dispute_from_delivered_notifies_seller() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let seller_c = seller(&order);
    let buyer_c = buyer(&order);
    let seller_id = order.seller_id;
    h.store.seed_order(order).await;
    h.lifecycle.confirm_payment("R1", "CARD").await.unwrap();
    seed_courier(&h.store).await;
    let assignment = h.allocator.assign(id, &seller_c).await.unwrap();
    let courier_c = courier(assignment.courier_id);
    h.lifecycle.start_transit(id, &courier_c).await.unwrap();
    h.lifecycle.mark_delivered(id, &courier_c).await.unwrap();

    h.lifecycle.open_dispute(id, &buyer_c).await.unwrap();
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Disputed);
    assert!(h
        .store
        .notifications()
        .await
        .iter()
        .any(|n| n.user_id == seller_id && n.message.contains("dispute")));
}

#[tokio::test]
async fn cancel_is_admin_only_and_pre_delivery_only() {
    let h = harness();
    let order = new_order("R1");
    let id = order.id;
    let buyer_c = buyer(&order);
    h.store.seed_order(order).await;

    let err = h.lifecycle.cancel(id, &buyer_c).await.unwrap_err();
    assert!(matches!(err, EngineError::Forbidden));

    let admin = Caller::new(Uuid::new_v4(), Role::Admin);
    h.lifecycle.cancel(id, &admin).await.unwrap();
    assert_eq!(h.store.order(id).await.unwrap().status, OrderStatus::Cancelled);

    // Delivered orders cannot be cancelled
    let mut delivered = new_order("R2");
    delivered.status = OrderStatus::Delivered;
    let did = delivered.id;
    h.store.seed_order(delivered).await;
    let err = h.lifecycle.cancel(did, &admin).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}
