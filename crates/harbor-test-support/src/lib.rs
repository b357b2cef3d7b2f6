//! Shared test fixtures for the harbor crates.
//!
//! A small order-management domain: orders have line items, line items have
//! adjustments, and orders belong to a customer who belongs to a region.

mod clock;
mod messages;
mod models;

pub use clock::{FixedClock, fixed_time};
pub use messages::{OrderPlaced, OrderShipped, PlaceOrder, ShipOrder};
pub use models::{Adjustment, Customer, LineItem, Order, Region, sample_registry, sample_schemas};
