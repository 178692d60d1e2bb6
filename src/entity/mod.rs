pub mod cart_items;
pub mod carts;
pub mod order_items;
pub mod orders;
pub mod products;
pub mod return_requests;
pub mod shipments;

pub use cart_items::Entity as CartItems;
pub use carts::Entity as Carts;
pub use order_items::Entity as OrderItems;
pub use orders::Entity as Orders;
pub use products::Entity as Products;
pub use return_requests::Entity as ReturnRequests;
pub use shipments::Entity as Shipments;
