//! The dispatch loop.

use std::collections::VecDeque;

use harbor_core::error::DomainError;
use harbor_core::event::Event;
use harbor_core::message::{CommandEnvelope, Message};
use harbor_store::unit_of_work::UnitOfWork;
use tracing::{debug, error, instrument, warn};

use crate::handler::HandlerRegistry;
use crate::retry::RetryPolicy;

/// Routes commands and events to their handlers.
///
/// The bus owns one unit of work for its lifetime; concurrent flows need
/// their own bus built over their own unit of work.
pub struct MessageBus<U, R> {
    uow: U,
    handlers: HandlerRegistry<U, R>,
    retry: RetryPolicy,
}

impl<U, R> MessageBus<U, R>
where
    U: UnitOfWork + 'static,
    R: Send + 'static,
{
    /// Assembles a bus. Prefer [`crate::bootstrap::Bootstrap`].
    #[must_use]
    pub fn new(uow: U, handlers: HandlerRegistry<U, R>, retry: RetryPolicy) -> Self {
        Self {
            uow,
            handlers,
            retry,
        }
    }

    /// Dispatches `message` and everything it causes.
    ///
    /// Returns the results of every command handled, in handling order.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerNotFound` for a command with no handler
    /// and propagates any command handler error. Either aborts the remaining
    /// queue. Event handler failures are logged and never returned.
    #[instrument(skip_all, fields(message = message.name()))]
    pub async fn handle(&mut self, message: Message) -> Result<Vec<R>, DomainError> {
        self.drain(VecDeque::from([message])).await
    }

    /// Dispatches several messages as one work queue, in the given order.
    ///
    /// # Errors
    ///
    /// Same as [`MessageBus::handle`].
    #[instrument(skip_all)]
    pub async fn handle_all<I>(&mut self, messages: I) -> Result<Vec<R>, DomainError>
    where
        I: IntoIterator<Item = Message> + Send,
    {
        self.drain(messages.into_iter().collect()).await
    }

    /// The bus's unit of work.
    #[must_use]
    pub fn uow(&self) -> &U {
        &self.uow
    }

    /// Mutable access to the bus's unit of work.
    pub fn uow_mut(&mut self) -> &mut U {
        &mut self.uow
    }

    /// The retry policy applied to event handlers.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Splits the bus back into its unit of work and handlers.
    #[must_use]
    pub fn into_parts(self) -> (U, HandlerRegistry<U, R>) {
        (self.uow, self.handlers)
    }

    async fn drain(&mut self, mut queue: VecDeque<Message>) -> Result<Vec<R>, DomainError> {
        let mut results = Vec::new();
        while let Some(message) = queue.pop_front() {
            match message {
                Message::Event(event) => self.handle_event(&event, &mut queue).await,
                Message::Command(command) => {
                    results.push(self.handle_command(command, &mut queue).await?);
                }
            }
        }
        Ok(results)
    }

    async fn handle_event(&mut self, event: &Event, queue: &mut VecDeque<Message>) {
        let handlers = self.handlers.event_handlers(event.type_id());
        if handlers.is_empty() {
            debug!(event = event.event_type(), "no handlers subscribed, skipping");
            return;
        }

        for (position, handler) in handlers.iter().enumerate() {
            let mut attempt = 1;
            loop {
                debug!(
                    event = event.event_type(),
                    handler = position,
                    attempt,
                    "handling event"
                );
                match handler(event, &mut self.uow).await {
                    Ok(()) => {
                        queue.extend(self.uow.collect_new_events().map(Message::Event));
                        break;
                    }
                    Err(err) if self.retry.should_retry(attempt) => {
                        discard_events_of_failed_attempt(&mut self.uow);
                        let delay = self.retry.delay_after(attempt);
                        warn!(
                            event = event.event_type(),
                            handler = position,
                            attempt,
                            ?delay,
                            error = %err,
                            "event handler failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(err) => {
                        discard_events_of_failed_attempt(&mut self.uow);
                        error!(
                            event = event.event_type(),
                            handler = position,
                            attempts = attempt,
                            error = %err,
                            "event handler failed, giving up"
                        );
                        break;
                    }
                }
            }
        }
    }

    async fn handle_command(
        &mut self,
        command: CommandEnvelope,
        queue: &mut VecDeque<Message>,
    ) -> Result<R, DomainError> {
        let name = command.command_type();
        debug!(command = name, "handling command");
        let Some(handler) = self.handlers.command_handler(command.type_id()) else {
            error!(command = name, "no handler registered for command");
            return Err(DomainError::HandlerNotFound(name));
        };

        match handler(command, &mut self.uow).await {
            Ok(result) => {
                queue.extend(self.uow.collect_new_events().map(Message::Event));
                Ok(result)
            }
            Err(err) => {
                discard_events_of_failed_attempt(&mut self.uow);
                error!(command = name, error = %err, "command handler failed");
                Err(err)
            }
        }
    }
}

/// A failed handler's writes were rolled back, so the events its aggregates
/// raised must never reach the queue.
fn discard_events_of_failed_attempt<U: UnitOfWork>(uow: &mut U) {
    let discarded = uow.discard_new_events();
    if discarded > 0 {
        debug!(discarded, "dropped events raised by a failed handler");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use harbor_core::error::DomainError;
    use harbor_core::message::Message;
    use harbor_store::memory::InMemoryStore;
    use harbor_store::unit_of_work::TransactionalUnitOfWork;
    use harbor_test_support::{
        FixedClock, Order, OrderPlaced, OrderShipped, PlaceOrder, ShipOrder, sample_registry,
    };
    use tokio::time::Instant;
    use uuid::Uuid;

    use super::MessageBus;
    use crate::handler::{FnCommandHandler, FnEventHandler, HandlerRegistry};
    use crate::retry::RetryPolicy;

    type Uow = TransactionalUnitOfWork<Order, InMemoryStore<Order>>;
    type Log = Arc<Mutex<Vec<String>>>;

    fn uow() -> Uow {
        let store =
            InMemoryStore::new(Arc::new(sample_registry()), Arc::new(FixedClock::default()))
                .unwrap();
        TransactionalUnitOfWork::new(Arc::new(store))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn recording_registry(log: &Log) -> HandlerRegistry<Uow, i64> {
        let mut registry = HandlerRegistry::new();
        let place_log = Arc::clone(log);
        registry
            .register_command::<PlaceOrder, _>(FnCommandHandler::new(
                move |command: PlaceOrder, _uow: &mut Uow| {
                    place_log
                        .lock()
                        .unwrap()
                        .push(format!("place {}", command.amount));
                    Ok(command.amount)
                },
            ))
            .unwrap();
        let ship_log = Arc::clone(log);
        registry
            .register_command::<ShipOrder, _>(FnCommandHandler::new(
                move |_command: ShipOrder, _uow: &mut Uow| {
                    ship_log.lock().unwrap().push("ship".to_owned());
                    Ok(0)
                },
            ))
            .unwrap();
        let event_log = Arc::clone(log);
        registry.subscribe::<OrderPlaced, _>(FnEventHandler::new(
            move |event: &OrderPlaced, _uow: &mut Uow| {
                event_log
                    .lock()
                    .unwrap()
                    .push(format!("placed {}", event.amount));
                Ok(())
            },
        ));
        registry
    }

    #[tokio::test]
    async fn test_batch_returns_one_result_per_command_in_order() {
        // Arrange
        let log = Log::default();
        let mut bus = MessageBus::new(uow(), recording_registry(&log), fast_retry());
        let order_id = Uuid::new_v4();

        // Act
        let results = bus
            .handle_all([
                Message::command(PlaceOrder {
                    customer_id: None,
                    amount: 7,
                }),
                Message::event(OrderPlaced {
                    order_id,
                    amount: 7,
                }),
                Message::command(ShipOrder { order_id }),
                Message::command(PlaceOrder {
                    customer_id: None,
                    amount: 9,
                }),
            ])
            .await
            .unwrap();

        // Assert
        assert_eq!(results, vec![7, 0, 9]);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["place 7", "placed 7", "ship", "place 9"]
        );
    }

    #[tokio::test]
    async fn test_event_only_queue_returns_no_results() {
        let log = Log::default();
        let mut bus = MessageBus::new(uow(), recording_registry(&log), fast_retry());

        let results = bus
            .handle(Message::event(OrderPlaced {
                order_id: Uuid::new_v4(),
                amount: 3,
            }))
            .await
            .unwrap();

        assert!(results.is_empty());
        assert_eq!(*log.lock().unwrap(), vec!["placed 3"]);
    }

    #[tokio::test]
    async fn test_event_without_subscribers_is_skipped() {
        let log = Log::default();
        let mut bus = MessageBus::new(uow(), recording_registry(&log), fast_retry());

        let results = bus
            .handle(Message::event(OrderShipped {
                order_id: Uuid::new_v4(),
            }))
            .await
            .unwrap();

        assert!(results.is_empty());
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregistered_command_fails_with_handler_not_found() {
        // Arrange
        let mut bus = MessageBus::new(uow(), HandlerRegistry::<Uow, i64>::new(), fast_retry());

        // Act
        let result = bus
            .handle(Message::command(ShipOrder {
                order_id: Uuid::new_v4(),
            }))
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::HandlerNotFound(_))));
    }

    #[tokio::test]
    async fn test_command_error_aborts_the_rest_of_the_queue() {
        // Arrange
        let log = Log::default();
        let mut registry = HandlerRegistry::<Uow, i64>::new();
        registry
            .register_command::<ShipOrder, _>(FnCommandHandler::new(
                |_command: ShipOrder, _uow: &mut Uow| {
                    Err(DomainError::Validation("cannot ship".into()))
                },
            ))
            .unwrap();
        let place_log = Arc::clone(&log);
        registry
            .register_command::<PlaceOrder, _>(FnCommandHandler::new(
                move |command: PlaceOrder, _uow: &mut Uow| {
                    place_log
                        .lock()
                        .unwrap()
                        .push(format!("place {}", command.amount));
                    Ok(command.amount)
                },
            ))
            .unwrap();
        let mut bus = MessageBus::new(uow(), registry, fast_retry());

        // Act
        let result = bus
            .handle_all([
                Message::command(ShipOrder {
                    order_id: Uuid::new_v4(),
                }),
                Message::command(PlaceOrder {
                    customer_id: None,
                    amount: 1,
                }),
            ])
            .await;

        // Assert
        assert!(matches!(result, Err(DomainError::Validation(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_event_handler_is_retried_then_skipped() {
        // Arrange
        let attempts = Arc::new(AtomicU32::new(0));
        let log = Log::default();
        let mut registry = recording_registry(&log);
        let counter = Arc::clone(&attempts);
        registry.subscribe::<OrderShipped, _>(FnEventHandler::new(
            move |_event: &OrderShipped, _uow: &mut Uow| {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::Infrastructure("mail server down".into()))
            },
        ));
        let mut bus = MessageBus::new(uow(), registry, fast_retry());

        // Act
        let results = bus
            .handle_all([
                Message::event(OrderShipped {
                    order_id: Uuid::new_v4(),
                }),
                Message::command(PlaceOrder {
                    customer_id: None,
                    amount: 5,
                }),
            ])
            .await
            .unwrap();

        // Assert
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(results, vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_wait_with_growing_delays() {
        // Arrange
        let started = Instant::now();
        let attempts: Arc<Mutex<Vec<Instant>>> = Arc::default();
        let mut registry = HandlerRegistry::<Uow, i64>::new();
        let seen = Arc::clone(&attempts);
        registry.subscribe::<OrderShipped, _>(FnEventHandler::new(
            move |_event: &OrderShipped, _uow: &mut Uow| {
                seen.lock().unwrap().push(Instant::now());
                Err(DomainError::Infrastructure("carrier down".into()))
            },
        ));
        let policy = RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
        };
        let mut bus = MessageBus::new(uow(), registry, policy);

        // Act
        bus.handle(Message::event(OrderShipped {
            order_id: Uuid::new_v4(),
        }))
        .await
        .unwrap();

        // Assert
        let attempts = attempts.lock().unwrap();
        assert_eq!(attempts.len(), 3);
        let first_wait = attempts[1] - attempts[0];
        let second_wait = attempts[2] - attempts[1];
        assert!(first_wait >= Duration::from_millis(100));
        assert!(second_wait >= Duration::from_millis(200));
        assert!(second_wait > first_wait);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn test_handler_succeeding_on_retry_runs_later_handlers_once() {
        // Arrange
        let attempts = Arc::new(AtomicU32::new(0));
        let log = Log::default();
        let mut registry = HandlerRegistry::<Uow, i64>::new();
        let counter = Arc::clone(&attempts);
        registry.subscribe::<OrderShipped, _>(FnEventHandler::new(
            move |_event: &OrderShipped, _uow: &mut Uow| {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(DomainError::Infrastructure("transient".into()))
                } else {
                    Ok(())
                }
            },
        ));
        let second = Arc::clone(&log);
        registry.subscribe::<OrderShipped, _>(FnEventHandler::new(
            move |_event: &OrderShipped, _uow: &mut Uow| {
                second.lock().unwrap().push("second".to_owned());
                Ok(())
            },
        ));
        let mut bus = MessageBus::new(uow(), registry, fast_retry());

        // Act
        bus.handle(Message::event(OrderShipped {
            order_id: Uuid::new_v4(),
        }))
        .await
        .unwrap();

        // Assert
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }
}
