// Catalog and cart
pub mod cart;
pub mod offers;

// Order lifecycle
pub mod order_status;
pub mod orders;
pub mod refunds;

// Payment provider boundary
pub mod payments;

// Service factory for dependency injection
pub mod factory;
