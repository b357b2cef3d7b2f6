//! Handler contracts and the type-keyed handler registry.
//!
//! Handlers are registered against the concrete type of the command or
//! event they accept. Both async trait objects and plain synchronous
//! closures are supported; the registry erases either form into a single
//! boxed-future signature so the bus has exactly one way to invoke and
//! resolve a handler.

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use harbor_core::command::Command;
use harbor_core::error::DomainError;
use harbor_core::event::{DomainEvent, Event};
use harbor_core::message::CommandEnvelope;
use harbor_store::unit_of_work::UnitOfWork;
use tracing::debug;

/// Handles one command type. The returned value is collected by the bus.
#[async_trait]
pub trait CommandHandler<C: Command, U: UnitOfWork + 'static, R: Send + 'static>: Send + Sync {
    /// Executes the command against the bus's unit of work.
    async fn handle(&self, command: C, uow: &mut U) -> Result<R, DomainError>;
}

/// Reacts to one event type.
#[async_trait]
pub trait EventHandler<E: DomainEvent, U: UnitOfWork + 'static>: Send + Sync {
    /// Handles a single occurrence of the event.
    async fn handle(&self, event: &E, uow: &mut U) -> Result<(), DomainError>;
}

/// Adapts a synchronous closure into a [`CommandHandler`].
pub struct FnCommandHandler<F>(F);

impl<F> FnCommandHandler<F> {
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<C, U, R, F> CommandHandler<C, U, R> for FnCommandHandler<F>
where
    C: Command,
    U: UnitOfWork + 'static,
    R: Send + 'static,
    F: Fn(C, &mut U) -> Result<R, DomainError> + Send + Sync,
{
    async fn handle(&self, command: C, uow: &mut U) -> Result<R, DomainError> {
        (self.0)(command, uow)
    }
}

/// Adapts a synchronous closure into an [`EventHandler`].
pub struct FnEventHandler<F>(F);

impl<F> FnEventHandler<F> {
    /// Wraps the closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<E, U, F> EventHandler<E, U> for FnEventHandler<F>
where
    E: DomainEvent,
    U: UnitOfWork + 'static,
    F: Fn(&E, &mut U) -> Result<(), DomainError> + Send + Sync,
{
    async fn handle(&self, event: &E, uow: &mut U) -> Result<(), DomainError> {
        (self.0)(event, uow)
    }
}

pub(crate) type CommandFn<U, R> = Box<
    dyn for<'a> Fn(CommandEnvelope, &'a mut U) -> BoxFuture<'a, Result<R, DomainError>>
        + Send
        + Sync,
>;

pub(crate) type EventFn<U> = Box<
    dyn for<'a> Fn(&'a Event, &'a mut U) -> BoxFuture<'a, Result<(), DomainError>> + Send + Sync,
>;

fn erase_command<U, R, F>(f: F) -> CommandFn<U, R>
where
    F: for<'a> Fn(CommandEnvelope, &'a mut U) -> BoxFuture<'a, Result<R, DomainError>>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

fn erase_event<U, F>(f: F) -> EventFn<U>
where
    F: for<'a> Fn(&'a Event, &'a mut U) -> BoxFuture<'a, Result<(), DomainError>>
        + Send
        + Sync
        + 'static,
{
    Box::new(f)
}

/// One handler per command type, an ordered list of handlers per event type.
pub struct HandlerRegistry<U, R> {
    commands: HashMap<TypeId, CommandFn<U, R>>,
    events: HashMap<TypeId, Vec<EventFn<U>>>,
}

impl<U, R> Default for HandlerRegistry<U, R> {
    fn default() -> Self {
        Self {
            commands: HashMap::new(),
            events: HashMap::new(),
        }
    }
}

impl<U, R> fmt::Debug for HandlerRegistry<U, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("commands", &self.commands.len())
            .field("event_types", &self.events.len())
            .finish()
    }
}

impl<U, R> HandlerRegistry<U, R>
where
    U: UnitOfWork + 'static,
    R: Send + 'static,
{
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the handler for command type `C`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `C` already has a
    /// handler.
    pub fn register_command<C, H>(&mut self, handler: H) -> Result<(), DomainError>
    where
        C: Command,
        H: CommandHandler<C, U, R> + 'static,
    {
        let key = TypeId::of::<C>();
        if self.commands.contains_key(&key) {
            return Err(DomainError::HandlerAlreadyRegistered(type_name::<C>()));
        }

        let handler = Arc::new(handler);
        let erased = erase_command(move |envelope: CommandEnvelope, uow: &mut U| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let command = envelope.downcast::<C>().map_err(|envelope| {
                    DomainError::Infrastructure(format!(
                        "command {} routed to the handler for {}",
                        envelope.command_type(),
                        type_name::<C>()
                    ))
                })?;
                handler.handle(command, uow).await
            })
        });
        self.commands.insert(key, erased);
        debug!(command = type_name::<C>(), "registered command handler");
        Ok(())
    }

    /// Appends a handler for event type `E`. Handlers run in subscription
    /// order.
    pub fn subscribe<E, H>(&mut self, handler: H)
    where
        E: DomainEvent,
        H: EventHandler<E, U> + 'static,
    {
        let handler = Arc::new(handler);
        let erased = erase_event(move |event: &Event, uow: &mut U| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let event = event.downcast_ref::<E>().ok_or_else(|| {
                    DomainError::Infrastructure(format!(
                        "event {} routed to a handler for {}",
                        event.event_type(),
                        type_name::<E>()
                    ))
                })?;
                handler.handle(event, uow).await
            })
        });
        let handlers = self.events.entry(TypeId::of::<E>()).or_default();
        handlers.push(erased);
        debug!(
            event = type_name::<E>(),
            position = handlers.len(),
            "subscribed event handler"
        );
    }

    /// Whether a handler is registered for command type `C`.
    #[must_use]
    pub fn handles_command<C: Command>(&self) -> bool {
        self.commands.contains_key(&TypeId::of::<C>())
    }

    /// Number of handlers subscribed to event type `E`.
    #[must_use]
    pub fn subscriber_count<E: DomainEvent>(&self) -> usize {
        self.events.get(&TypeId::of::<E>()).map_or(0, Vec::len)
    }

    pub(crate) fn command_handler(&self, key: TypeId) -> Option<&CommandFn<U, R>> {
        self.commands.get(&key)
    }

    pub(crate) fn event_handlers(&self, key: TypeId) -> &[EventFn<U>] {
        self.events.get(&key).map(Vec::as_slice).unwrap_or_default()
    }
}
