//! Aggregate root abstraction.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::clock::Clock;
use crate::event::{DomainEvent, Event, EventBuffer};

/// Column names every aggregate exposes through [`EntityBase::field`].
pub const BASE_FIELDS: [&str; 3] = ["id", "created_at", "updated_at"];

/// Identity, timestamps and the outbound event buffer shared by every
/// aggregate.
///
/// Equality and hashing use the identity only. Use
/// [`EntityBase::recency_cmp`] to order by creation time.
#[derive(Clone)]
pub struct EntityBase {
    id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    events: EventBuffer,
}

impl EntityBase {
    /// Creates a base with the given identity, stamped with the clock's time.
    #[must_use]
    pub fn new(id: Uuid, clock: &dyn Clock) -> Self {
        let now = clock.now();
        Self {
            id,
            created_at: now,
            updated_at: now,
            events: EventBuffer::new(),
        }
    }

    /// Creates a base with a fresh time-ordered identity.
    #[must_use]
    pub fn create(clock: &dyn Clock) -> Self {
        Self::new(Uuid::now_v7(), clock)
    }

    /// Rebuilds a base from persisted values. The event buffer starts empty.
    #[must_use]
    pub fn restore(id: Uuid, created_at: DateTime<Utc>, updated_at: DateTime<Utc>) -> Self {
        Self {
            id,
            created_at,
            updated_at,
            events: EventBuffer::new(),
        }
    }

    /// The aggregate identity.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the aggregate was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// When the aggregate was last updated.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Events raised and not yet collected.
    #[must_use]
    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    /// Mutable access to the pending events.
    pub fn events_mut(&mut self) -> &mut EventBuffer {
        &mut self.events
    }

    /// Advances `updated_at` to the clock's current time.
    pub fn touch(&mut self, clock: &dyn Clock) {
        self.updated_at = clock.now();
    }

    /// Overwrites `updated_at`, e.g. with a value computed by the backend.
    pub fn set_updated_at(&mut self, updated_at: DateTime<Utc>) {
        self.updated_at = updated_at;
    }

    /// Orders two aggregates by creation time, oldest first.
    #[must_use]
    pub fn recency_cmp(&self, other: &Self) -> Ordering {
        self.created_at.cmp(&other.created_at)
    }

    /// Value of one of the [`BASE_FIELDS`], or `None` for any other name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::String(self.id.to_string())),
            "created_at" => Some(Value::String(self.created_at.to_rfc3339())),
            "updated_at" => Some(Value::String(self.updated_at.to_rfc3339())),
            _ => None,
        }
    }
}

impl PartialEq for EntityBase {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for EntityBase {}

impl Hash for EntityBase {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for EntityBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityBase(id={}, pending={})", self.id, self.events.len())
    }
}

/// Contract for aggregate roots handled by the repository and the bus.
pub trait AggregateRoot: Send + Sync + 'static {
    /// Shared identity, timestamps and events.
    fn base(&self) -> &EntityBase;

    /// Mutable access to the shared base.
    fn base_mut(&mut self) -> &mut EntityBase;

    /// Returns the aggregate identifier.
    fn aggregate_id(&self) -> Uuid {
        self.base().id()
    }

    /// Events raised by command handling and not yet collected.
    fn pending_events(&self) -> &EventBuffer {
        self.base().events()
    }

    /// Mutable access to the pending events.
    fn pending_events_mut(&mut self) -> &mut EventBuffer {
        self.base_mut().events_mut()
    }

    /// Appends a domain event to the outbound buffer.
    fn raise<E>(&mut self, event: E)
    where
        E: DomainEvent + PartialEq,
        Self: Sized,
    {
        self.pending_events_mut().push(Event::new(event));
    }
}
