//! Persistence backend contract.

use std::sync::Arc;

use async_trait::async_trait;
use harbor_core::error::DomainError;
use harbor_query::query::Query;
use harbor_query::schema::{Model, SchemaRegistry};
use serde_json::Value;

/// One result row of a projection query, in column order.
pub type Row = Vec<Value>;

/// How a session treats writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Staged writes stay private until `commit`.
    Transactional,
    /// Every statement is committed as it runs.
    Autocommit,
}

/// A single conversation with the persistence backend.
///
/// Sessions are owned by exactly one unit of work and are never shared
/// between concurrent flows.
#[async_trait]
pub trait Session<M: Model>: Send {
    /// The mode this session was opened in.
    fn mode(&self) -> SessionMode;

    /// Loads the aggregates selected by an entity-projection query.
    async fn fetch(&mut self, query: &Query) -> Result<Vec<M>, DomainError>;

    /// Loads raw rows, honouring aggregate projections and grouping.
    async fn fetch_rows(&mut self, query: &Query) -> Result<Vec<Row>, DomainError>;

    /// Stages an aggregate for insertion or update.
    async fn stage(&mut self, model: &M) -> Result<(), DomainError>;

    /// Reloads an aggregate's persisted state, keeping its pending events.
    async fn refresh(&mut self, model: &mut M) -> Result<(), DomainError>;

    /// Sends staged changes to the backend without committing.
    async fn flush(&mut self) -> Result<(), DomainError>;

    /// Commits staged changes.
    async fn commit(&mut self) -> Result<(), DomainError>;

    /// Discards staged changes.
    async fn rollback(&mut self) -> Result<(), DomainError>;

    /// Releases the underlying connection.
    async fn close(&mut self) -> Result<(), DomainError>;
}

/// Opens sessions. Created once at process start and shared by every unit
/// of work.
#[async_trait]
pub trait SessionFactory<M: Model>: Send + Sync {
    /// Opens a new session.
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn Session<M>>, DomainError>;

    /// Schemas of every model the sessions can load.
    fn registry(&self) -> Arc<SchemaRegistry>;
}
