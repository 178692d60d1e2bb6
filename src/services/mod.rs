pub mod cart_service;
pub mod fulfillment_service;
pub mod order_service;
pub mod payment_service;
pub mod pricing;
