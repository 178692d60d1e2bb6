pub mod cart;
pub mod fulfillment;
pub mod orders;
pub mod payments;
