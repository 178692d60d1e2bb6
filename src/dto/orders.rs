use rust_decimal::Decimal;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Order, OrderItem};

/// Result of converting the active cart into an order.
#[derive(Debug, Serialize, ToSchema)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub total_amount: Decimal,
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OrderList {
    pub items: Vec<Order>,
}
