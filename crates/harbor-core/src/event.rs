//! Domain event abstractions.
//!
//! Concrete events are plain value types. [`Event`] erases them so that an
//! aggregate can buffer events of several types and the bus can route them
//! by their concrete type, while keeping value equality for deduplication.

use std::any::{Any, TypeId};
use std::collections::VecDeque;
use std::collections::vec_deque;
use std::fmt;
use std::sync::Arc;

/// Trait that all domain events implement.
pub trait DomainEvent: fmt::Debug + Send + Sync + 'static {
    /// Returns the event type name (used for logging).
    fn event_type(&self) -> &'static str;
}

trait ErasedEvent: fmt::Debug + Send + Sync {
    fn event_type(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
    fn eq_erased(&self, other: &dyn ErasedEvent) -> bool;
}

impl<E> ErasedEvent for E
where
    E: DomainEvent + PartialEq,
{
    fn event_type(&self) -> &'static str {
        DomainEvent::event_type(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn eq_erased(&self, other: &dyn ErasedEvent) -> bool {
        other
            .as_any()
            .downcast_ref::<E>()
            .is_some_and(|other| self == other)
    }
}

/// An immutable, type-erased domain event.
///
/// Two `Event`s are equal when they wrap the same concrete type and the
/// wrapped values compare equal.
#[derive(Clone)]
pub struct Event(Arc<dyn ErasedEvent>);

impl Event {
    /// Wraps a concrete domain event.
    #[must_use]
    pub fn new<E>(event: E) -> Self
    where
        E: DomainEvent + PartialEq,
    {
        Self(Arc::new(event))
    }

    /// Returns the event type name of the wrapped event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        self.0.event_type()
    }

    /// Returns the `TypeId` of the wrapped concrete event, used for routing.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        Any::type_id(self.0.as_any())
    }

    /// Returns the wrapped event if it is of type `E`.
    #[must_use]
    pub fn downcast_ref<E: DomainEvent>(&self) -> Option<&E> {
        self.0.as_any().downcast_ref::<E>()
    }

    /// Returns `true` if the wrapped event is of type `E`.
    #[must_use]
    pub fn is<E: DomainEvent>(&self) -> bool {
        self.0.as_any().is::<E>()
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || self.0.eq_erased(other.0.as_ref())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

/// Ordered buffer of events an aggregate has raised but not yet handed to
/// the bus. Append-only until drained.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventBuffer {
    events: VecDeque<Event>,
}

impl EventBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the back of the buffer.
    pub fn push(&mut self, event: Event) {
        self.events.push_back(event);
    }

    /// Removes and returns the oldest buffered event.
    pub fn pop_front(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Number of buffered events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterates over the buffered events, oldest first.
    pub fn iter(&self) -> vec_deque::Iter<'_, Event> {
        self.events.iter()
    }

    /// Removes every buffered event, returning them oldest first.
    pub fn take(&mut self) -> Vec<Event> {
        self.events.drain(..).collect()
    }

    /// Replaces the buffer with `self ++ incoming`, keeping only the first
    /// occurrence of each event by value equality.
    pub fn merge<I>(&mut self, incoming: I)
    where
        I: IntoIterator<Item = Event>,
    {
        let combined: Vec<Event> = self.events.drain(..).chain(incoming).collect();
        for event in combined {
            if !self.events.contains(&event) {
                self.events.push_back(event);
            }
        }
    }
}

impl<'a> IntoIterator for &'a EventBuffer {
    type Item = &'a Event;
    type IntoIter = vec_deque::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.iter()
    }
}

impl FromIterator<Event> for EventBuffer {
    fn from_iter<T: IntoIterator<Item = Event>>(iter: T) -> Self {
        Self {
            events: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DomainEvent, Event, EventBuffer};

    #[derive(Debug, Clone, PartialEq)]
    struct Deposited {
        amount: i64,
    }

    impl DomainEvent for Deposited {
        fn event_type(&self) -> &'static str {
            "test.deposited"
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Withdrawn {
        amount: i64,
    }

    impl DomainEvent for Withdrawn {
        fn event_type(&self) -> &'static str {
            "test.withdrawn"
        }
    }

    #[test]
    fn test_events_with_equal_values_are_equal() {
        assert_eq!(
            Event::new(Deposited { amount: 5 }),
            Event::new(Deposited { amount: 5 })
        );
        assert_ne!(
            Event::new(Deposited { amount: 5 }),
            Event::new(Deposited { amount: 6 })
        );
    }

    #[test]
    fn test_events_of_different_types_are_never_equal() {
        assert_ne!(
            Event::new(Deposited { amount: 5 }),
            Event::new(Withdrawn { amount: 5 })
        );
    }

    #[test]
    fn test_downcast_returns_concrete_event() {
        let event = Event::new(Withdrawn { amount: 3 });

        assert!(event.is::<Withdrawn>());
        assert_eq!(event.downcast_ref::<Withdrawn>(), Some(&Withdrawn { amount: 3 }));
        assert!(event.downcast_ref::<Deposited>().is_none());
        assert_eq!(event.event_type(), "test.withdrawn");
    }

    #[test]
    fn test_merge_deduplicates_and_keeps_first_seen_order() {
        // Arrange
        let a = Event::new(Deposited { amount: 1 });
        let b = Event::new(Withdrawn { amount: 2 });
        let c = Event::new(Deposited { amount: 3 });
        let mut buffer: EventBuffer = [a.clone(), b.clone()].into_iter().collect();

        // Act
        buffer.merge([b.clone(), c.clone(), a.clone()]);

        // Assert
        let merged: Vec<Event> = buffer.iter().cloned().collect();
        assert_eq!(merged, vec![a, b, c]);
    }

    #[test]
    fn test_take_drains_the_buffer() {
        let mut buffer = EventBuffer::new();
        buffer.push(Event::new(Deposited { amount: 1 }));
        buffer.push(Event::new(Deposited { amount: 2 }));

        let drained = buffer.take();

        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }
}
