//! Command abstractions.

use std::fmt;

/// Trait that all commands implement.
///
/// A command is a request to act; the bus routes it to exactly one handler
/// by its concrete type.
pub trait Command: fmt::Debug + Send + 'static {
    /// The type name for this command (for logging).
    fn command_type(&self) -> &'static str;
}
