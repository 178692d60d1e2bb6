use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

use crate::models::{OrderStatus, PaymentStatus};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    #[sea_orm(column_type = "Decimal(None)")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub tax: Option<Decimal>,
    #[sea_orm(column_type = "Decimal(None)", nullable)]
    pub shipping_amount: Option<Decimal>,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub invoice_number: String,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_items::Entity")]
    OrderItems,
    #[sea_orm(has_many = "super::shipments::Entity")]
    Shipments,
    #[sea_orm(has_many = "super::return_requests::Entity")]
    ReturnRequests,
}

impl Related<super::order_items::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl Related<super::shipments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Shipments.def()
    }
}

impl Related<super::return_requests::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ReturnRequests.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
