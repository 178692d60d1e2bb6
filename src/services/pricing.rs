use rust_decimal::Decimal;
use sea_orm::FromQueryResult;
use uuid::Uuid;

/// A cart line joined with the product's current unit price.
#[derive(Debug, Clone, PartialEq, FromQueryResult)]
pub struct PricedLine {
    pub product_id: Uuid,
    pub quantity: i32,
    pub price: Decimal,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }
}

pub fn order_total(lines: &[PricedLine]) -> Decimal {
    lines.iter().map(PricedLine::line_total).sum()
}
