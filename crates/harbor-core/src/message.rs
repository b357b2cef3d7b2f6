//! The unit of work the message bus drains: either a command or an event.

use std::any::{Any, TypeId};
use std::fmt;

use crate::command::Command;
use crate::event::{DomainEvent, Event};

/// A type-erased command awaiting dispatch.
///
/// The envelope keeps the command's name and a debug formatter alongside the
/// boxed value, so a failed downcast can hand the envelope back intact.
pub struct CommandEnvelope {
    command: Box<dyn Any + Send>,
    command_type: &'static str,
    debug: fn(&(dyn Any + Send), &mut fmt::Formatter<'_>) -> fmt::Result,
}

fn debug_as<C: Command>(command: &(dyn Any + Send), f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match command.downcast_ref::<C>() {
        Some(command) => fmt::Debug::fmt(command, f),
        None => f.write_str(std::any::type_name::<C>()),
    }
}

impl CommandEnvelope {
    /// Wraps a concrete command.
    #[must_use]
    pub fn new<C: Command>(command: C) -> Self {
        Self {
            command_type: command.command_type(),
            command: Box::new(command),
            debug: debug_as::<C>,
        }
    }

    /// Returns the command type name of the wrapped command.
    #[must_use]
    pub fn command_type(&self) -> &'static str {
        self.command_type
    }

    /// Returns the `TypeId` of the wrapped concrete command, used for routing.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        (*self.command).type_id()
    }

    /// Unwraps the command as type `C`, handing the envelope back on mismatch.
    ///
    /// # Errors
    ///
    /// Returns the original envelope if the wrapped command is not a `C`.
    pub fn downcast<C: Command>(self) -> Result<C, Self> {
        let Self {
            command,
            command_type,
            debug,
        } = self;
        command.downcast::<C>().map(|command| *command).map_err(|command| Self {
            command,
            command_type,
            debug,
        })
    }
}

impl fmt::Debug for CommandEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (self.debug)(&*self.command, f)
    }
}

/// A message submitted to the bus.
///
/// Commands and events are disjoint variants; the bus dispatches each by its
/// concrete type.
#[derive(Debug)]
pub enum Message {
    /// A request to act, handled by exactly one handler.
    Command(CommandEnvelope),
    /// A fact that occurred, handled by every subscribed handler.
    Event(Event),
}

impl Message {
    /// Wraps a concrete command.
    #[must_use]
    pub fn command<C: Command>(command: C) -> Self {
        Self::Command(CommandEnvelope::new(command))
    }

    /// Wraps a concrete event.
    #[must_use]
    pub fn event<E>(event: E) -> Self
    where
        E: DomainEvent + PartialEq,
    {
        Self::Event(Event::new(event))
    }

    /// Type name of the wrapped command or event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command(command) => command.command_type(),
            Self::Event(event) => event.event_type(),
        }
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

impl From<CommandEnvelope> for Message {
    fn from(command: CommandEnvelope) -> Self {
        Self::Command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::{CommandEnvelope, Message};
    use crate::command::Command;
    use crate::event::DomainEvent;

    #[derive(Debug, PartialEq)]
    struct OpenAccount {
        owner: String,
    }

    impl Command for OpenAccount {
        fn command_type(&self) -> &'static str {
            "test.open_account"
        }
    }

    #[derive(Debug)]
    struct CloseAccount;

    impl Command for CloseAccount {
        fn command_type(&self) -> &'static str {
            "test.close_account"
        }
    }

    #[derive(Debug, PartialEq)]
    struct AccountOpened;

    impl DomainEvent for AccountOpened {
        fn event_type(&self) -> &'static str {
            "test.account_opened"
        }
    }

    #[test]
    fn test_downcast_to_matching_type_returns_command() {
        let envelope = CommandEnvelope::new(OpenAccount {
            owner: "ada".into(),
        });

        let command = envelope.downcast::<OpenAccount>().unwrap();

        assert_eq!(command, OpenAccount { owner: "ada".into() });
    }

    #[test]
    fn test_downcast_to_other_type_returns_envelope() {
        let envelope = CommandEnvelope::new(CloseAccount);

        let envelope = envelope.downcast::<OpenAccount>().unwrap_err();

        assert_eq!(envelope.command_type(), "test.close_account");
    }

    #[test]
    fn test_envelope_routes_and_prints_as_the_wrapped_command() {
        let envelope = CommandEnvelope::new(OpenAccount {
            owner: "ada".into(),
        });

        assert_eq!(envelope.type_id(), std::any::TypeId::of::<OpenAccount>());
        assert_eq!(format!("{envelope:?}"), r#"OpenAccount { owner: "ada" }"#);
    }

    #[test]
    fn test_message_name_reports_wrapped_type() {
        assert_eq!(Message::command(CloseAccount).name(), "test.close_account");
        assert_eq!(Message::event(AccountOpened).name(), "test.account_opened");
    }
}
