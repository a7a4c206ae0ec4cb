use async_trait::async_trait;
use chrono::{DateTime, Utc};
use soko_core::{
    Channel, CourierLocation, CourierProfile, CourierRepository, Delivery, DeliveryRepository,
    DeliveryStatus, Notifier, Order, OrderRepository, OrderStatus, Party, Payment,
    PaymentRepository, PaymentStatus, ReleaseOutcome, StoreError, Validation,
    ValidationRepository,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn order_status_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
        OrderStatus::FundsHeld => "FUNDS_HELD",
        OrderStatus::AwaitingCourier => "AWAITING_COURIER",
        OrderStatus::InTransit => "IN_TRANSIT",
        OrderStatus::Delivered => "DELIVERED",
        OrderStatus::Completed => "COMPLETED",
        OrderStatus::Disputed => "DISPUTED",
        OrderStatus::Cancelled => "CANCELLED",
    }
}

fn parse_order_status(s: &str) -> Result<OrderStatus, StoreError> {
    Ok(match s {
        "AWAITING_PAYMENT" => OrderStatus::AwaitingPayment,
        "FUNDS_HELD" => OrderStatus::FundsHeld,
        "AWAITING_COURIER" => OrderStatus::AwaitingCourier,
        "IN_TRANSIT" => OrderStatus::InTransit,
        "DELIVERED" => OrderStatus::Delivered,
        "COMPLETED" => OrderStatus::Completed,
        "DISPUTED" => OrderStatus::Disputed,
        "CANCELLED" => OrderStatus::Cancelled,
        other => {
            return Err(StoreError::Serialization(format!(
                "unknown order status: {other}"
            )))
        }
    })
}

fn payment_status_str(s: PaymentStatus) -> &'static str {
    match s {
        PaymentStatus::Held => "HELD",
        PaymentStatus::Released => "RELEASED",
        PaymentStatus::Refunded => "REFUNDED",
        PaymentStatus::Cancelled => "CANCELLED",
    }
}

fn parse_payment_status(s: &str) -> Result<PaymentStatus, StoreError> {
    Ok(match s {
        "HELD" => PaymentStatus::Held,
        "RELEASED" => PaymentStatus::Released,
        "REFUNDED" => PaymentStatus::Refunded,
        "CANCELLED" => PaymentStatus::Cancelled,
        other => {
            return Err(StoreError::Serialization(format!(
                "unknown payment status: {other}"
            )))
        }
    })
}

fn delivery_status_str(s: DeliveryStatus) -> &'static str {
    match s {
        DeliveryStatus::Pending => "PENDING",
        DeliveryStatus::AwaitingCourier => "AWAITING_COURIER",
        DeliveryStatus::InTransit => "IN_TRANSIT",
        DeliveryStatus::Delivered => "DELIVERED",
    }
}

fn parse_delivery_status(s: &str) -> Result<DeliveryStatus, StoreError> {
    Ok(match s {
        "PENDING" => DeliveryStatus::Pending,
        "AWAITING_COURIER" => DeliveryStatus::AwaitingCourier,
        "IN_TRANSIT" => DeliveryStatus::InTransit,
        "DELIVERED" => DeliveryStatus::Delivered,
        other => {
            return Err(StoreError::Serialization(format!(
                "unknown delivery status: {other}"
            )))
        }
    })
}

fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Order {
        id: row.try_get("id").map_err(db_err)?,
        buyer_id: row.try_get("buyer_id").map_err(db_err)?,
        seller_id: row.try_get("seller_id").map_err(db_err)?,
        courier_id: row.try_get("courier_id").map_err(db_err)?,
        product_id: row.try_get("product_id").map_err(db_err)?,
        product_name: row.try_get("product_name").map_err(db_err)?,
        quantity: row.try_get("quantity").map_err(db_err)?,
        amount: row.try_get("amount").map_err(db_err)?,
        currency: row.try_get("currency").map_err(db_err)?,
        status: parse_order_status(&status)?,
        payment_reference: row.try_get("payment_reference").map_err(db_err)?,
        recipient_name: row.try_get("recipient_name").map_err(db_err)?,
        recipient_phone: row.try_get("recipient_phone").map_err(db_err)?,
        recipient_address: row.try_get("recipient_address").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Payment {
        id: row.try_get("id").map_err(db_err)?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        amount: row.try_get("amount").map_err(db_err)?,
        mode: row.try_get("mode").map_err(db_err)?,
        status: parse_payment_status(&status)?,
        reference: row.try_get("reference").map_err(db_err)?,
        released_at: row.try_get("released_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<Delivery, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    Ok(Delivery {
        id: row.try_get("id").map_err(db_err)?,
        order_id: row.try_get("order_id").map_err(db_err)?,
        seller_id: row.try_get("seller_id").map_err(db_err)?,
        buyer_id: row.try_get("buyer_id").map_err(db_err)?,
        courier_id: row.try_get("courier_id").map_err(db_err)?,
        status: parse_delivery_status(&status)?,
        tracking_code: row.try_get("tracking_code").map_err(db_err)?,
        assigned_at: row.try_get("assigned_at").map_err(db_err)?,
        delivered_at: row.try_get("delivered_at").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
    })
}

fn validation_from_row(row: &PgRow) -> Result<Validation, StoreError> {
    Ok(Validation {
        order_id: row.try_get("order_id").map_err(db_err)?,
        buyer_ok: row.try_get("buyer_ok").map_err(db_err)?,
        seller_ok: row.try_get("seller_ok").map_err(db_err)?,
        courier_ok: row.try_get("courier_ok").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

const ORDER_COLS: &str = "id, buyer_id, seller_id, courier_id, product_id, product_name, quantity, amount, currency, status, payment_reference, recipient_name, recipient_phone, recipient_address, created_at, updated_at";

pub struct PgOrderRepository {
    pool: PgPool,
}

impl PgOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PgOrderRepository {
    async fn create_order(&self, order: &Order) -> Result<Uuid, StoreError> {
        sqlx::query(
            "INSERT INTO orders (id, buyer_id, seller_id, courier_id, product_id, product_name, quantity, amount, currency, status, payment_reference, recipient_name, recipient_phone, recipient_address, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(order.id)
        .bind(order.buyer_id)
        .bind(order.seller_id)
        .bind(order.courier_id)
        .bind(order.product_id)
        .bind(&order.product_name)
        .bind(order.quantity)
        .bind(order.amount)
        .bind(&order.currency)
        .bind(order_status_str(order.status))
        .bind(&order.payment_reference)
        .bind(&order.recipient_name)
        .bind(&order.recipient_phone)
        .bind(&order.recipient_address)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(order.id)
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn find_by_reference(&self, reference: &str) -> Result<Option<Order>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ORDER_COLS} FROM orders WHERE payment_reference = $1"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        to: OrderStatus,
    ) -> Result<bool, StoreError> {
        let from_strs: Vec<String> = from.iter().map(|s| order_status_str(*s).to_string()).collect();
        let result = sqlx::query(
            "UPDATE orders SET status = $2, updated_at = NOW() WHERE id = $1 AND status = ANY($3)",
        )
        .bind(id)
        .bind(order_status_str(to))
        .bind(&from_strs)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_courier(&self, id: Uuid, courier_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET courier_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(courier_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn set_payment_reference(&self, id: Uuid, reference: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE orders SET payment_reference = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(reference)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn list_recent_with_status(
        &self,
        statuses: &[OrderStatus],
        limit: u32,
    ) -> Result<Vec<Order>, StoreError> {
        let status_strs: Vec<String> = statuses
            .iter()
            .map(|s| order_status_str(*s).to_string())
            .collect();
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLS} FROM orders WHERE status = ANY($1) ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(&status_strs)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(order_from_row).collect()
    }
}

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, order_id, amount, mode, status, reference, released_at, created_at \
             FROM payments WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(payment_from_row).transpose()
    }
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        self.fetch(order_id).await
    }

    async fn upsert_held(
        &self,
        order_id: Uuid,
        amount: i64,
        mode: &str,
        reference: Option<&str>,
    ) -> Result<Payment, StoreError> {
        // Keyed on order_id; a row that already left the held state is
        // never rewound by a webhook retry
        sqlx::query(
            "INSERT INTO payments (id, order_id, amount, mode, status, reference, created_at) \
             VALUES ($1, $2, $3, $4, 'HELD', $5, NOW()) \
             ON CONFLICT (order_id) DO UPDATE \
             SET amount = EXCLUDED.amount, mode = EXCLUDED.mode, reference = EXCLUDED.reference \
             WHERE payments.status = 'HELD'",
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(amount)
        .bind(mode)
        .bind(reference)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.fetch(order_id)
            .await?
            .ok_or_else(|| StoreError::Database("payment upsert produced no row".to_string()))
    }

    async fn mark_released(
        &self,
        order_id: Uuid,
        amount: i64,
        released_at: DateTime<Utc>,
    ) -> Result<ReleaseOutcome, StoreError> {
        // Conditional unlock first: only a held row is flipped, and an
        // earlier release timestamp survives
        let unlocked = sqlx::query(
            "UPDATE payments SET status = 'RELEASED', released_at = COALESCE(released_at, $2) \
             WHERE order_id = $1 AND status = 'HELD'",
        )
        .bind(order_id)
        .bind(released_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if unlocked.rows_affected() > 0 {
            return Ok(ReleaseOutcome::Unlocked);
        }

        match self.fetch(order_id).await? {
            Some(p) if p.status == PaymentStatus::Released => Ok(ReleaseOutcome::AlreadyReleased),
            Some(_) => Ok(ReleaseOutcome::Blocked),
            None => {
                // Fast-forward creation; a concurrent creator wins the
                // unique constraint and we fall back to already-released
                let inserted = sqlx::query(
                    "INSERT INTO payments (id, order_id, amount, mode, status, released_at, created_at) \
                     VALUES ($1, $2, $3, 'ESCROW', 'RELEASED', $4, NOW()) \
                     ON CONFLICT (order_id) DO NOTHING",
                )
                .bind(Uuid::new_v4())
                .bind(order_id)
                .bind(amount)
                .bind(released_at)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
                if inserted.rows_affected() > 0 {
                    Ok(ReleaseOutcome::Created)
                } else {
                    Ok(ReleaseOutcome::AlreadyReleased)
                }
            }
        }
    }
}

const DELIVERY_COLS: &str = "id, order_id, seller_id, buyer_id, courier_id, status, tracking_code, assigned_at, delivered_at, created_at";

pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries WHERE order_id = $1"
        ))
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(delivery_from_row).transpose()
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        self.fetch(order_id).await
    }

    async fn find_by_tracking_code(&self, code: &str) -> Result<Option<Delivery>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {DELIVERY_COLS} FROM deliveries WHERE tracking_code = $1"
        ))
        .bind(code)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(delivery_from_row).transpose()
    }

    async fn upsert_pending(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
    ) -> Result<Delivery, StoreError> {
        sqlx::query(
            "INSERT INTO deliveries (id, order_id, seller_id, buyer_id, status, created_at) \
             VALUES ($1, $2, $3, $4, 'PENDING', NOW()) \
             ON CONFLICT (order_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(seller_id)
        .bind(buyer_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.fetch(order_id)
            .await?
            .ok_or_else(|| StoreError::Database("delivery upsert produced no row".to_string()))
    }

    async fn assign_courier(
        &self,
        order_id: Uuid,
        seller_id: Uuid,
        buyer_id: Uuid,
        courier_id: Uuid,
        tracking_code: &str,
    ) -> Result<Delivery, StoreError> {
        sqlx::query(
            "INSERT INTO deliveries (id, order_id, seller_id, buyer_id, courier_id, status, tracking_code, assigned_at, created_at) \
             VALUES ($1, $2, $3, $4, $5, 'AWAITING_COURIER', $6, NOW(), NOW()) \
             ON CONFLICT (order_id) DO UPDATE \
             SET courier_id = EXCLUDED.courier_id, status = 'AWAITING_COURIER', \
                 tracking_code = EXCLUDED.tracking_code, assigned_at = NOW()",
        )
        .bind(Uuid::new_v4())
        .bind(order_id)
        .bind(seller_id)
        .bind(buyer_id)
        .bind(courier_id)
        .bind(tracking_code)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        self.fetch(order_id)
            .await?
            .ok_or_else(|| StoreError::Database("delivery upsert produced no row".to_string()))
    }

    async fn update_status(
        &self,
        order_id: Uuid,
        status: DeliveryStatus,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE deliveries SET status = $2 WHERE order_id = $1")
            .bind(order_id)
            .bind(delivery_status_str(status))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(&self, order_id: Uuid, at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE deliveries SET status = 'DELIVERED', delivered_at = COALESCE(delivered_at, $2) \
             WHERE order_id = $1",
        )
        .bind(order_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PgValidationRepository {
    pool: PgPool,
}

impl PgValidationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ValidationRepository for PgValidationRepository {
    async fn get(&self, order_id: Uuid) -> Result<Option<Validation>, StoreError> {
        let row = sqlx::query(
            "SELECT order_id, buyer_ok, seller_ok, courier_ok, updated_at \
             FROM validations WHERE order_id = $1",
        )
        .bind(order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;
        row.as_ref().map(validation_from_row).transpose()
    }

    async fn set_flag(&self, order_id: Uuid, party: Party) -> Result<Validation, StoreError> {
        // One statement per flag so each party can only ever touch its own
        // column
        let sql = match party {
            Party::Buyer => {
                "INSERT INTO validations (order_id, buyer_ok, updated_at) VALUES ($1, TRUE, NOW()) \
                 ON CONFLICT (order_id) DO UPDATE SET buyer_ok = TRUE, updated_at = NOW() \
                 RETURNING order_id, buyer_ok, seller_ok, courier_ok, updated_at"
            }
            Party::Seller => {
                "INSERT INTO validations (order_id, seller_ok, updated_at) VALUES ($1, TRUE, NOW()) \
                 ON CONFLICT (order_id) DO UPDATE SET seller_ok = TRUE, updated_at = NOW() \
                 RETURNING order_id, buyer_ok, seller_ok, courier_ok, updated_at"
            }
            Party::Courier => {
                "INSERT INTO validations (order_id, courier_ok, updated_at) VALUES ($1, TRUE, NOW()) \
                 ON CONFLICT (order_id) DO UPDATE SET courier_ok = TRUE, updated_at = NOW() \
                 RETURNING order_id, buyer_ok, seller_ok, courier_ok, updated_at"
            }
        };
        let row = sqlx::query(sql)
            .bind(order_id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        validation_from_row(&row)
    }
}

pub struct PgCourierRepository {
    pool: PgPool,
}

impl PgCourierRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CourierRepository for PgCourierRepository {
    async fn list_active(&self) -> Result<Vec<CourierProfile>, StoreError> {
        // The assignment pool is derived fresh: active courier role
        // intersected with active profile status
        let rows = sqlx::query(
            "SELECT p.user_id, p.display_name, p.phone \
             FROM courier_profiles p \
             JOIN user_roles r ON r.user_id = p.user_id \
             WHERE r.role = 'COURIER' AND r.active AND p.status = 'ACTIVE'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter()
            .map(|row| {
                Ok(CourierProfile {
                    user_id: row.try_get("user_id").map_err(db_err)?,
                    display_name: row.try_get("display_name").map_err(db_err)?,
                    phone: row.try_get("phone").map_err(db_err)?,
                    active: true,
                })
            })
            .collect()
    }

    async fn record_location(&self, location: &CourierLocation) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO courier_locations (courier_id, order_id, latitude, longitude, recorded_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(location.courier_id)
        .bind(location.order_id)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.recorded_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn latest_location(
        &self,
        courier_id: Uuid,
    ) -> Result<Option<CourierLocation>, StoreError> {
        let row = sqlx::query(
            "SELECT courier_id, order_id, latitude, longitude, recorded_at \
             FROM courier_locations WHERE courier_id = $1 \
             ORDER BY recorded_at DESC LIMIT 1",
        )
        .bind(courier_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(CourierLocation {
                courier_id: row.try_get("courier_id").map_err(db_err)?,
                order_id: row.try_get("order_id").map_err(db_err)?,
                latitude: row.try_get("latitude").map_err(db_err)?,
                longitude: row.try_get("longitude").map_err(db_err)?,
                recorded_at: row.try_get("recorded_at").map_err(db_err)?,
            })
        })
        .transpose()
    }
}

fn channel_str(c: Channel) -> &'static str {
    match c {
        Channel::Order => "ORDER",
        Channel::Delivery => "DELIVERY",
        Channel::Payment => "PAYMENT",
    }
}

pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Notifier for PgNotifier {
    async fn notify(
        &self,
        user_id: Uuid,
        message: &str,
        channel: Channel,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO notifications (id, user_id, message, channel, created_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(message)
        .bind(channel_str(channel))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
