//! End-to-end dispatch over the in-memory backend: commands persist
//! aggregates, raised events are harvested from the unit of work and fed
//! back into the queue.

use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use harbor_bus::bootstrap::Bootstrap;
use harbor_bus::handler::{CommandHandler, EventHandler};
use harbor_bus::messagebus::MessageBus;
use harbor_bus::retry::RetryPolicy;
use harbor_core::error::DomainError;
use harbor_core::message::Message;
use harbor_query::filter::LogicalOperator;
use harbor_store::memory::InMemoryStore;
use harbor_store::unit_of_work::{TransactionalUnitOfWork, UnitOfWork, UnitOfWorkExt};
use harbor_test_support::{
    FixedClock, Order, OrderPlaced, OrderShipped, PlaceOrder, ShipOrder, sample_registry,
};
use serde_json::json;
use uuid::Uuid;

type Uow = TransactionalUnitOfWork<Order, InMemoryStore<Order>>;

struct PlaceOrderHandler {
    clock: FixedClock,
}

#[async_trait]
impl CommandHandler<PlaceOrder, Uow, Uuid> for PlaceOrderHandler {
    async fn handle(&self, command: PlaceOrder, uow: &mut Uow) -> Result<Uuid, DomainError> {
        let clock = self.clock;
        uow.scope(move |uow| {
            Box::pin(async move {
                let order = Order::place(&clock, command.amount, command.customer_id);
                let tracked = uow.repository()?.add(order).await?;
                uow.commit().await?;
                Ok(tracked.id())
            })
        })
        .await
    }
}

struct ShipPlacedOrder {
    clock: FixedClock,
}

#[async_trait]
impl EventHandler<OrderPlaced, Uow> for ShipPlacedOrder {
    async fn handle(&self, event: &OrderPlaced, uow: &mut Uow) -> Result<(), DomainError> {
        let clock = self.clock;
        let order_id = event.order_id;
        uow.scope(move |uow| {
            Box::pin(async move {
                let repository = uow.repository()?;
                let Some(order) = repository
                    .filter(LogicalOperator::And, [("id__eq", json!(order_id))])?
                    .get()
                    .await?
                else {
                    return Err(DomainError::AggregateNotFound(order_id));
                };
                order.update(|order| order.ship(&clock));
                repository.add(order.snapshot()).await?;
                uow.commit().await
            })
        })
        .await
    }
}

struct Fixture {
    store: Arc<InMemoryStore<Order>>,
    shipped: Arc<AtomicUsize>,
}

impl Fixture {
    fn new() -> Self {
        let store = InMemoryStore::new(
            Arc::new(sample_registry()),
            Arc::new(FixedClock::default()),
        )
        .unwrap();
        Self {
            store: Arc::new(store),
            shipped: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn bootstrap(&self) -> Bootstrap<Uow, Uuid> {
        let shipped = Arc::clone(&self.shipped);
        Bootstrap::new(TransactionalUnitOfWork::new(Arc::clone(&self.store)))
            .with_retry(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            })
            .command::<PlaceOrder, _>(PlaceOrderHandler {
                clock: FixedClock::default(),
            })
            .unwrap()
            .event_fn::<OrderShipped, _>(move |_event, _uow| {
                shipped.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
    }
}

#[tokio::test]
async fn test_command_cascades_through_harvested_events() {
    // Arrange
    let fixture = Fixture::new();
    let mut bus = fixture
        .bootstrap()
        .event::<OrderPlaced, _>(ShipPlacedOrder {
            clock: FixedClock::default(),
        })
        .build();

    // Act
    let results = bus
        .handle(Message::command(PlaceOrder {
            customer_id: None,
            amount: 42,
        }))
        .await
        .unwrap();

    // Assert
    let stored = fixture.store.snapshot();
    assert_eq!(results.len(), 1);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].base.id(), results[0]);
    assert_eq!(stored[0].status, "shipped");
    assert_eq!(fixture.shipped.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_raised_events_queue_behind_pending_messages() {
    // Arrange
    let fixture = Fixture::new();
    let log = Arc::new(Mutex::new(Vec::new()));
    let ship_log = Arc::clone(&log);
    let placed_log = Arc::clone(&log);
    let mut bus = fixture
        .bootstrap()
        .command_fn::<ShipOrder, _>(move |command, _uow| {
            ship_log.lock().unwrap().push("ship".to_owned());
            Ok(command.order_id)
        })
        .unwrap()
        .event_fn::<OrderPlaced, _>(move |event, _uow| {
            placed_log
                .lock()
                .unwrap()
                .push(format!("placed {}", event.amount));
            Ok(())
        })
        .build();
    let pending = Uuid::new_v4();

    // Act
    let results = bus
        .handle_all([
            Message::command(PlaceOrder {
                customer_id: None,
                amount: 8,
            }),
            Message::command(ShipOrder { order_id: pending }),
        ])
        .await
        .unwrap();

    // Assert
    assert_eq!(results.len(), 2);
    assert_eq!(results[1], pending);
    assert_eq!(*log.lock().unwrap(), vec!["ship", "placed 8"]);
}

#[tokio::test]
async fn test_events_are_collected_once() {
    // Arrange
    let fixture = Fixture::new();
    let placed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&placed);
    let mut bus = fixture
        .bootstrap()
        .event_fn::<OrderPlaced, _>(move |_event, _uow| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    // Act
    bus.handle(Message::command(PlaceOrder {
        customer_id: None,
        amount: 10,
    }))
    .await
    .unwrap();
    bus.handle(Message::command(PlaceOrder {
        customer_id: None,
        amount: 20,
    }))
    .await
    .unwrap();

    // Assert
    assert_eq!(placed.load(Ordering::SeqCst), 2);
    assert_eq!(bus.uow_mut().collect_new_events().count(), 0);
    assert_eq!(fixture.store.len(), 2);
}

#[tokio::test]
async fn test_failed_event_handler_leaves_no_partial_writes() {
    // Arrange
    let fixture = Fixture::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&attempts);
    let mut bus: MessageBus<Uow, Uuid> = fixture
        .bootstrap()
        .event::<OrderPlaced, _>(FailingAudit { attempts: counter })
        .build();

    // Act
    let results = bus
        .handle(Message::command(PlaceOrder {
            customer_id: None,
            amount: 5,
        }))
        .await
        .unwrap();

    // Assert
    assert_eq!(results.len(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(fixture.store.len(), 1);
    assert_eq!(fixture.shipped.load(Ordering::SeqCst), 0);
}

/// Writes an order and then fails, so every attempt must be rolled back.
struct FailingAudit {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler<OrderPlaced, Uow> for FailingAudit {
    async fn handle(&self, _event: &OrderPlaced, uow: &mut Uow) -> Result<(), DomainError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        uow.scope(|uow| {
            Box::pin(async move {
                let audit = Order::new(&FixedClock::default(), 0, None);
                uow.repository()?.add(audit).await?;
                Err(DomainError::Infrastructure("audit sink unavailable".into()))
            })
        })
        .await
    }
}

/// Places an order inside its scope and then fails before committing.
struct FailingReorder {
    attempts: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler<OrderShipped, Uow> for FailingReorder {
    async fn handle(&self, _event: &OrderShipped, uow: &mut Uow) -> Result<(), DomainError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        uow.scope(|uow| {
            Box::pin(async move {
                let reorder = Order::place(&FixedClock::default(), 15, None);
                uow.repository()?.add(reorder).await?;
                Err(DomainError::Infrastructure("supplier offline".into()))
            })
        })
        .await
    }
}

#[tokio::test]
async fn test_events_raised_by_a_failed_attempt_are_never_dispatched() {
    // Arrange
    let fixture = Fixture::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let placed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&placed);
    let mut bus = fixture
        .bootstrap()
        .event::<OrderShipped, _>(FailingReorder {
            attempts: Arc::clone(&attempts),
        })
        .event_fn::<OrderPlaced, _>(move |_event, _uow| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    // Act
    let results = bus
        .handle(Message::event(OrderShipped {
            order_id: Uuid::new_v4(),
        }))
        .await
        .unwrap();

    // Assert
    assert!(results.is_empty());
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert_eq!(placed.load(Ordering::SeqCst), 0);
    assert_eq!(fixture.store.len(), 0);
    assert_eq!(fixture.shipped.load(Ordering::SeqCst), 1);
    assert_eq!(bus.uow_mut().collect_new_events().count(), 0);
}

#[tokio::test]
async fn test_unknown_command_is_reported() {
    let fixture = Fixture::new();
    let mut bus = fixture.bootstrap().build();

    let result = bus
        .handle(Message::command(ShipOrder {
            order_id: Uuid::new_v4(),
        }))
        .await;

    assert!(matches!(result, Err(DomainError::HandlerNotFound(_))));
}
