pub mod cart_item;
pub mod offer;
pub mod order;
pub mod order_item;
pub mod product;
pub mod refund;
pub mod user;

pub use cart_item::Entity as CartItem;
pub use offer::Entity as Offer;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use product::Entity as Product;
pub use refund::Entity as Refund;
pub use user::Entity as User;

pub use order::{OrderStatus, PaymentStatus};
pub use order_item::OrderItemStatus;
pub use refund::RefundStatus;
pub use user::UserRole;
