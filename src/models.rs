use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Fulfillment state of an order.
///
/// `Pending -> Canceled` is the only transition driven by customers and
/// `Canceled` is terminal. Shipment creation moves `Pending`/`Processing`
/// orders to `Shipped`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "Pending")]
    Pending,
    #[sea_orm(string_value = "Processing")]
    Processing,
    #[sea_orm(string_value = "Shipped")]
    Shipped,
    #[sea_orm(string_value = "Delivered")]
    Delivered,
    #[sea_orm(string_value = "Canceled")]
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Canceled => "Canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Canceled | OrderStatus::Delivered)
    }

    /// Status after a cancel request. A second cancel is rejected rather
    /// than treated as a no-op.
    pub fn cancel(self) -> AppResult<OrderStatus> {
        match self {
            OrderStatus::Pending => Ok(OrderStatus::Canceled),
            OrderStatus::Canceled => Err(AppError::AlreadyCanceled),
            from => Err(AppError::InvalidTransition {
                from,
                to: OrderStatus::Canceled,
            }),
        }
    }

    /// Status after a shipment is recorded. Orders may ship in several parcels.
    pub fn ship(self) -> AppResult<OrderStatus> {
        if self.is_terminal() {
            return Err(AppError::InvalidTransition {
                from: self,
                to: OrderStatus::Shipped,
            });
        }
        Ok(OrderStatus::Shipped)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "Unpaid")]
    Unpaid,
    #[sea_orm(string_value = "Paid")]
    Paid,
    #[sea_orm(string_value = "Failed")]
    Failed,
}

/// Result reported by the payment provider webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum PaymentOutcome {
    Paid,
    Failed,
}

impl PaymentOutcome {
    /// Demo provider: every outcome is equally likely.
    pub fn simulate<R: Rng>(rng: &mut R) -> Self {
        if rng.gen_bool(0.5) {
            PaymentOutcome::Paid
        } else {
            PaymentOutcome::Failed
        }
    }
}

impl From<PaymentOutcome> for PaymentStatus {
    fn from(outcome: PaymentOutcome) -> Self {
        match outcome {
            PaymentOutcome::Paid => PaymentStatus::Paid,
            PaymentOutcome::Failed => PaymentStatus::Failed,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CartItem {
    pub id: Uuid,
    pub cart_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_amount: Decimal,
    pub tax: Option<Decimal>,
    pub shipping_amount: Option<Decimal>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub invoice_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub quantity: i32,
    /// Unit price captured when the order was placed.
    pub price: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Shipment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub tracking_number: String,
    pub carrier: String,
    pub status: String,
    pub shipped_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReturnRequest {
    pub id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}
