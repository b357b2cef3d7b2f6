//! Harbor Store — the persistence side of the repository pattern.
//!
//! A [`session::Session`] is one conversation with a persistence backend.
//! The [`repository::Repository`] builds queries against it and keeps an
//! identity map of every aggregate it has returned or staged, merging the
//! pending events of repeated loads. A [`unit_of_work::UnitOfWork`] owns the
//! session for one scope and hands the collected events to the message bus.

pub mod memory;
pub mod repository;
pub mod session;
pub mod unit_of_work;
