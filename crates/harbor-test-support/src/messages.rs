//! Sample commands and events.

use harbor_core::command::Command;
use harbor_core::event::DomainEvent;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to place a new order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    /// Ordering customer, if known.
    pub customer_id: Option<Uuid>,
    /// Order total in cents.
    pub amount: i64,
}

impl Command for PlaceOrder {
    fn command_type(&self) -> &'static str {
        "orders.place_order"
    }
}

/// Request to ship an existing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipOrder {
    /// The order to ship.
    pub order_id: Uuid,
}

impl Command for ShipOrder {
    fn command_type(&self) -> &'static str {
        "orders.ship_order"
    }
}

/// An order was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    /// The new order.
    pub order_id: Uuid,
    /// Order total in cents.
    pub amount: i64,
}

impl DomainEvent for OrderPlaced {
    fn event_type(&self) -> &'static str {
        "orders.order_placed"
    }
}

/// An order was shipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    /// The shipped order.
    pub order_id: Uuid,
}

impl DomainEvent for OrderShipped {
    fn event_type(&self) -> &'static str {
        "orders.order_shipped"
    }
}
