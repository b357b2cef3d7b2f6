//! Sample aggregates and their schema registry.

use harbor_core::aggregate::{AggregateRoot, EntityBase};
use harbor_core::clock::Clock;
use harbor_query::schema::{Model, ModelSchema, SchemaRegistry};
use serde_json::Value;
use uuid::Uuid;

use crate::messages::{OrderPlaced, OrderShipped};

fn uuid_value(id: Option<Uuid>) -> Value {
    id.map_or(Value::Null, |id| Value::String(id.to_string()))
}

macro_rules! aggregate_root {
    ($model:ty) => {
        impl AggregateRoot for $model {
            fn base(&self) -> &EntityBase {
                &self.base
            }

            fn base_mut(&mut self) -> &mut EntityBase {
                &mut self.base
            }
        }
    };
}

/// An order placed by a customer.
#[derive(Debug, Clone)]
pub struct Order {
    /// Identity and timestamps.
    pub base: EntityBase,
    /// `pending`, `shipped`, ...
    pub status: String,
    /// Total in cents.
    pub amount: i64,
    /// Owning customer.
    pub customer_id: Option<Uuid>,
}

impl Order {
    /// Creates a pending order without raising events.
    #[must_use]
    pub fn new(clock: &dyn Clock, amount: i64, customer_id: Option<Uuid>) -> Self {
        Self {
            base: EntityBase::create(clock),
            status: "pending".to_owned(),
            amount,
            customer_id,
        }
    }

    /// Creates a pending order and raises [`OrderPlaced`].
    #[must_use]
    pub fn place(clock: &dyn Clock, amount: i64, customer_id: Option<Uuid>) -> Self {
        let mut order = Self::new(clock, amount, customer_id);
        let order_id = order.aggregate_id();
        order.raise(OrderPlaced { order_id, amount });
        order
    }

    /// Marks the order shipped and raises [`OrderShipped`].
    pub fn ship(&mut self, clock: &dyn Clock) {
        self.status = "shipped".to_owned();
        self.base.touch(clock);
        let order_id = self.aggregate_id();
        self.raise(OrderShipped { order_id });
    }
}

aggregate_root!(Order);

impl Model for Order {
    const NAME: &'static str = "order";

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "status" => Some(Value::from(self.status.as_str())),
            "amount" => Some(Value::from(self.amount)),
            "customer_id" => Some(uuid_value(self.customer_id)),
            other => self.base.field(other),
        }
    }
}

/// One product line of an order.
#[derive(Debug, Clone)]
pub struct LineItem {
    /// Identity and timestamps.
    pub base: EntityBase,
    /// Owning order.
    pub order_id: Uuid,
    /// Product code.
    pub sku: String,
    /// Units ordered.
    pub quantity: i64,
}

aggregate_root!(LineItem);

impl Model for LineItem {
    const NAME: &'static str = "line_item";

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "order_id" => Some(uuid_value(Some(self.order_id))),
            "sku" => Some(Value::from(self.sku.as_str())),
            "quantity" => Some(Value::from(self.quantity)),
            other => self.base.field(other),
        }
    }
}

/// A price adjustment on a line item.
#[derive(Debug, Clone)]
pub struct Adjustment {
    /// Identity and timestamps.
    pub base: EntityBase,
    /// Adjusted line item.
    pub line_item_id: Uuid,
    /// Free-text reason.
    pub reason: String,
}

aggregate_root!(Adjustment);

impl Model for Adjustment {
    const NAME: &'static str = "adjustment";

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "line_item_id" => Some(uuid_value(Some(self.line_item_id))),
            "reason" => Some(Value::from(self.reason.as_str())),
            other => self.base.field(other),
        }
    }
}

/// A customer placing orders.
#[derive(Debug, Clone)]
pub struct Customer {
    /// Identity and timestamps.
    pub base: EntityBase,
    /// Display name.
    pub name: String,
    /// Sales region.
    pub region_id: Option<Uuid>,
}

aggregate_root!(Customer);

impl Model for Customer {
    const NAME: &'static str = "customer";

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "name" => Some(Value::from(self.name.as_str())),
            "region_id" => Some(uuid_value(self.region_id)),
            other => self.base.field(other),
        }
    }
}

/// A sales region.
#[derive(Debug, Clone)]
pub struct Region {
    /// Identity and timestamps.
    pub base: EntityBase,
    /// Region code.
    pub code: String,
}

aggregate_root!(Region);

impl Model for Region {
    const NAME: &'static str = "region";

    fn field(&self, column: &str) -> Option<Value> {
        match column {
            "code" => Some(Value::from(self.code.as_str())),
            other => self.base.field(other),
        }
    }
}

/// Schemas of the sample domain:
/// order → line items → adjustments (children) and
/// order → customer → region (parents).
#[must_use]
pub fn sample_schemas() -> Vec<ModelSchema> {
    vec![
        ModelSchema::new(Order::NAME, "orders")
            .column("status")
            .column("amount")
            .column("customer_id")
            .child("line_items", LineItem::NAME, "id", "order_id")
            .parent("customer", Customer::NAME, "customer_id", "id"),
        ModelSchema::new(LineItem::NAME, "line_items")
            .column("order_id")
            .column("sku")
            .column("quantity")
            .child("adjustments", Adjustment::NAME, "id", "line_item_id"),
        ModelSchema::new(Adjustment::NAME, "adjustments")
            .column("line_item_id")
            .column("reason"),
        ModelSchema::new(Customer::NAME, "customers")
            .column("name")
            .column("region_id")
            .parent("region", Region::NAME, "region_id", "id"),
        ModelSchema::new(Region::NAME, "regions").column("code"),
    ]
}

/// A validated registry of [`sample_schemas`].
///
/// # Panics
///
/// Panics if the sample schemas stop validating.
#[must_use]
pub fn sample_registry() -> SchemaRegistry {
    SchemaRegistry::build(sample_schemas()).expect("sample schemas are consistent")
}
