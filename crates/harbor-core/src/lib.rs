//! Harbor Core — shared domain abstractions.
//!
//! This crate defines the aggregate contract, the type-erased domain event
//! and command carriers used by the message bus, and the error taxonomy
//! shared by every other harbor crate. It contains no infrastructure code.

pub mod aggregate;
pub mod clock;
pub mod command;
pub mod error;
pub mod event;
pub mod message;
