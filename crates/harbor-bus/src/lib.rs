//! Harbor Bus — command and event dispatch.
//!
//! The [`messagebus::MessageBus`] drains a work queue of commands and events.
//! Commands go to exactly one handler and their results are returned to the
//! caller; events fan out to every subscribed handler with bounded retry.
//! Events raised by aggregates while a handler runs are harvested from the
//! unit of work and queued behind the current message.

pub mod bootstrap;
pub mod config;
pub mod handler;
pub mod messagebus;
pub mod retry;
pub mod telemetry;
