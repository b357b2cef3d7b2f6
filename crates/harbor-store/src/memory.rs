//! In-memory persistence backend.
//!
//! Committed aggregates live in a shared, insertion-ordered map. Each
//! session keeps its staged writes private until `commit`, stamps
//! `updated_at` from the store's clock when staging (the backend-computed
//! default a caller sees after `refresh`) and never persists pending events.
//! Aggregates are held fully materialised, so planned eager loads need no
//! extra work here.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use harbor_core::clock::Clock;
use harbor_core::error::DomainError;
use harbor_query::query::{Direction, Projection, Query};
use harbor_query::schema::{Model, SchemaRegistry};
use harbor_query::value;
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::session::{Row, Session, SessionFactory, SessionMode};

/// Committed aggregates of one model, shared by every session it opens.
pub struct InMemoryStore<M: Model> {
    rows: Arc<Mutex<IndexMap<Uuid, M>>>,
    registry: Arc<SchemaRegistry>,
    clock: Arc<dyn Clock>,
}

impl<M: Model> InMemoryStore<M> {
    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownModel` if `M` is not in the registry.
    pub fn new(registry: Arc<SchemaRegistry>, clock: Arc<dyn Clock>) -> Result<Self, DomainError> {
        registry.get(M::NAME)?;
        Ok(Self {
            rows: Arc::new(Mutex::new(IndexMap::new())),
            registry,
            clock,
        })
    }

    /// Stores an aggregate as already committed, without its pending events.
    pub fn insert(&self, model: M) {
        let model = without_events(model);
        self.lock().insert(model.aggregate_id(), model);
    }

    /// Committed aggregates in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<M> {
        self.lock().values().cloned().collect()
    }

    /// Number of committed aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns `true` if nothing has been committed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<Uuid, M>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M: Model> Clone for InMemoryStore<M> {
    fn clone(&self) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            registry: Arc::clone(&self.registry),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<M: Model> fmt::Debug for InMemoryStore<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("model", &M::NAME)
            .field("rows", &self.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<M: Model> SessionFactory<M> for InMemoryStore<M> {
    async fn open(&self, mode: SessionMode) -> Result<Box<dyn Session<M>>, DomainError> {
        debug!(model = M::NAME, ?mode, "session opened");
        Ok(Box::new(InMemorySession {
            store: self.clone(),
            mode,
            staged: IndexMap::new(),
            closed: false,
        }))
    }

    fn registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.registry)
    }
}

/// A session over an [`InMemoryStore`].
pub struct InMemorySession<M: Model> {
    store: InMemoryStore<M>,
    mode: SessionMode,
    staged: IndexMap<Uuid, M>,
    closed: bool,
}

impl<M: Model> InMemorySession<M> {
    fn ensure_open(&self) -> Result<(), DomainError> {
        if self.closed {
            return Err(DomainError::Infrastructure("session is closed".to_owned()));
        }
        Ok(())
    }

    /// Committed rows with this session's staged writes laid over them.
    fn visible(&self) -> Vec<M> {
        let mut rows = self.store.lock().clone();
        for (id, model) in &self.staged {
            rows.insert(*id, model.clone());
        }
        rows.into_values().collect()
    }

    fn selected(&self, query: &Query) -> Vec<M> {
        let mut rows: Vec<M> = self
            .visible()
            .into_iter()
            .filter(|model| query.matches(&|column: &str| model.field(column)))
            .collect();
        sort(query, &mut rows);
        rows
    }
}

impl<M: Model> fmt::Debug for InMemorySession<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemorySession")
            .field("model", &M::NAME)
            .field("mode", &self.mode)
            .field("staged", &self.staged.len())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<M: Model> Session<M> for InMemorySession<M> {
    fn mode(&self) -> SessionMode {
        self.mode
    }

    async fn fetch(&mut self, query: &Query) -> Result<Vec<M>, DomainError> {
        self.ensure_open()?;
        if query.projection() != Projection::Entity {
            return Err(DomainError::InvalidQuery(
                "entities cannot be loaded under an aggregate projection".to_owned(),
            ));
        }
        Ok(window(query, self.selected(query)))
    }

    async fn fetch_rows(&mut self, query: &Query) -> Result<Vec<Row>, DomainError> {
        self.ensure_open()?;
        let selected = self.selected(query);
        let rows = match query.projection() {
            Projection::Entity => {
                let columns = query.schema().columns();
                selected
                    .iter()
                    .map(|model| {
                        columns
                            .iter()
                            .map(|column| model.field(column).unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect()
            }
            Projection::Aggregate { column, func } => {
                let grouping = query.effective_grouping();
                let mut groups: IndexMap<String, (Value, Vec<Value>)> = IndexMap::new();
                for model in &selected {
                    let key: Vec<Value> = grouping
                        .iter()
                        .map(|c| model.field(c).unwrap_or(Value::Null))
                        .collect();
                    let attribute = model.field(column).unwrap_or(Value::Null);
                    groups
                        .entry(Value::Array(key).to_string())
                        .or_insert_with(|| (attribute.clone(), Vec::new()))
                        .1
                        .push(attribute);
                }
                groups
                    .into_values()
                    .map(|(attribute, values)| vec![attribute, func.apply(&values)])
                    .collect()
            }
        };
        Ok(window(query, rows))
    }

    async fn stage(&mut self, model: &M) -> Result<(), DomainError> {
        self.ensure_open()?;
        let mut staged = without_events(model.clone());
        staged.base_mut().set_updated_at(self.store.clock.now());
        let id = staged.aggregate_id();
        match self.mode {
            SessionMode::Transactional => {
                self.staged.insert(id, staged);
            }
            SessionMode::Autocommit => {
                self.store.lock().insert(id, staged);
            }
        }
        debug!(model = M::NAME, %id, "aggregate staged");
        Ok(())
    }

    async fn refresh(&mut self, model: &mut M) -> Result<(), DomainError> {
        self.ensure_open()?;
        let id = model.aggregate_id();
        let stored = match self.staged.get(&id) {
            Some(staged) => staged.clone(),
            None => self
                .store
                .lock()
                .get(&id)
                .cloned()
                .ok_or(DomainError::AggregateNotFound(id))?,
        };
        let pending = model.pending_events_mut().take();
        *model = stored;
        model.pending_events_mut().merge(pending);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), DomainError> {
        self.ensure_open()?;
        debug!(model = M::NAME, staged = self.staged.len(), "session flushed");
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DomainError> {
        self.ensure_open()?;
        let count = self.staged.len();
        let mut rows = self.store.lock();
        for (id, model) in self.staged.drain(..) {
            rows.insert(id, model);
        }
        drop(rows);
        debug!(model = M::NAME, count, "session committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DomainError> {
        if !self.staged.is_empty() {
            debug!(model = M::NAME, discarded = self.staged.len(), "session rolled back");
        }
        self.staged.clear();
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DomainError> {
        self.staged.clear();
        self.closed = true;
        debug!(model = M::NAME, "session closed");
        Ok(())
    }
}

fn without_events<M: Model>(mut model: M) -> M {
    model.pending_events_mut().take();
    model
}

fn sort<M: Model>(query: &Query, rows: &mut [M]) {
    if query.order().is_empty() {
        return;
    }
    rows.sort_by(|a, b| {
        query
            .order()
            .iter()
            .map(|term| {
                let left = a.field(term.column).unwrap_or(Value::Null);
                let right = b.field(term.column).unwrap_or(Value::Null);
                let ordering = value::sort_key_cmp(&left, &right);
                match term.direction {
                    Direction::Asc => ordering,
                    Direction::Desc => ordering.reverse(),
                }
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

fn window<T>(query: &Query, rows: Vec<T>) -> Vec<T> {
    let offset = query
        .offset()
        .map_or(0, |n| usize::try_from(n).unwrap_or(usize::MAX));
    let limit = query
        .limit()
        .map_or(usize::MAX, |n| usize::try_from(n).unwrap_or(usize::MAX));
    rows.into_iter().skip(offset).take(limit).collect()
}
