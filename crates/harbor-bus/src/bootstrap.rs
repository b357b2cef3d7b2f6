//! Composition root for a message bus.
//!
//! Handlers receive the bus's unit of work on every call. Anything else a
//! handler needs (a clock, a notifier, a settings value) is captured by the
//! handler value when it is registered here.

use harbor_core::command::Command;
use harbor_core::error::DomainError;
use harbor_core::event::DomainEvent;
use harbor_store::unit_of_work::UnitOfWork;

use crate::config::Settings;
use crate::handler::{
    CommandHandler, EventHandler, FnCommandHandler, FnEventHandler, HandlerRegistry,
};
use crate::messagebus::MessageBus;
use crate::retry::RetryPolicy;

/// Collects handlers and builds a [`MessageBus`] over one unit of work.
#[derive(Debug)]
pub struct Bootstrap<U, R> {
    uow: U,
    handlers: HandlerRegistry<U, R>,
    retry: RetryPolicy,
}

impl<U, R> Bootstrap<U, R>
where
    U: UnitOfWork + 'static,
    R: Send + 'static,
{
    /// Starts from an empty handler set and the default retry policy.
    #[must_use]
    pub fn new(uow: U) -> Self {
        Self {
            uow,
            handlers: HandlerRegistry::new(),
            retry: RetryPolicy::default(),
        }
    }

    /// Takes the event retry policy from `settings`.
    #[must_use]
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.retry = settings.retry;
        self
    }

    /// Overrides the event retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Registers an async handler for command type `C`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `C` already has a
    /// handler.
    pub fn command<C, H>(mut self, handler: H) -> Result<Self, DomainError>
    where
        C: Command,
        H: CommandHandler<C, U, R> + 'static,
    {
        self.handlers.register_command::<C, H>(handler)?;
        Ok(self)
    }

    /// Registers a synchronous closure for command type `C`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::HandlerAlreadyRegistered` if `C` already has a
    /// handler.
    pub fn command_fn<C, F>(self, f: F) -> Result<Self, DomainError>
    where
        C: Command,
        F: Fn(C, &mut U) -> Result<R, DomainError> + Send + Sync + 'static,
    {
        self.command::<C, _>(FnCommandHandler::new(f))
    }

    /// Subscribes an async handler to event type `E`.
    #[must_use]
    pub fn event<E, H>(mut self, handler: H) -> Self
    where
        E: DomainEvent,
        H: EventHandler<E, U> + 'static,
    {
        self.handlers.subscribe::<E, H>(handler);
        self
    }

    /// Subscribes a synchronous closure to event type `E`.
    #[must_use]
    pub fn event_fn<E, F>(self, f: F) -> Self
    where
        E: DomainEvent,
        F: Fn(&E, &mut U) -> Result<(), DomainError> + Send + Sync + 'static,
    {
        self.event::<E, _>(FnEventHandler::new(f))
    }

    /// Finishes wiring.
    #[must_use]
    pub fn build(self) -> MessageBus<U, R> {
        MessageBus::new(self.uow, self.handlers, self.retry)
    }
}
