//! Identity-aware repository.
//!
//! Every aggregate the repository stages or loads is tracked by identity for
//! the life of its unit-of-work scope. Loading an identity that is already
//! tracked keeps the tracked state and merges the loaded copy's pending
//! events into it, so neither unsaved changes nor events raised on an
//! earlier copy are lost. Adding an identity that is already tracked
//! replaces the tracked state with the staged one and merges events the
//! same way.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use harbor_core::aggregate::AggregateRoot;
use harbor_core::error::DomainError;
use harbor_core::event::{Event, EventBuffer};
use harbor_query::filter::LogicalOperator;
use harbor_query::query::{Projection, Query};
use harbor_query::schema::{Model, SchemaRegistry};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::session::{Row, Session, SessionMode};

/// Shared handle to a tracked aggregate.
///
/// Clones point at the same aggregate; changes made through one handle,
/// including raised events, are visible through every other.
pub struct Tracked<M>(Arc<Mutex<M>>);

impl<M> Tracked<M> {
    fn new(model: M) -> Self {
        Self(Arc::new(Mutex::new(model)))
    }

    fn lock(&self) -> MutexGuard<'_, M> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads the aggregate.
    pub fn read<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.lock())
    }

    /// Mutates the aggregate.
    pub fn update<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        f(&mut self.lock())
    }

    /// Returns `true` if both handles track the same aggregate.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<M: Model> Tracked<M> {
    /// Identity of the tracked aggregate.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.read(AggregateRoot::aggregate_id)
    }

    /// A copy of the aggregate's current state, pending events included.
    #[must_use]
    pub fn snapshot(&self) -> M {
        self.read(Clone::clone)
    }

    /// A copy of the pending events.
    #[must_use]
    pub fn pending_events(&self) -> Vec<Event> {
        self.read(|model| model.pending_events().iter().cloned().collect())
    }
}

impl<M> Clone for Tracked<M> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<M: fmt::Debug> fmt::Debug for Tracked<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Tracked").field(&*self.lock()).finish()
    }
}

/// Aggregates observed in one scope, keyed by identity, in first-seen order.
pub struct IdentityMap<M> {
    seen: IndexMap<Uuid, Tracked<M>>,
}

impl<M: Model> IdentityMap<M> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self {
            seen: IndexMap::new(),
        }
    }

    /// Tracks a staged `model`. If its identity is already tracked, the
    /// existing handle takes the staged state and its events become
    /// `dedupe(existing ++ incoming)`; that handle is returned.
    pub fn track(&mut self, model: M) -> Tracked<M> {
        self.merge(model, true)
    }

    /// Tracks a loaded `model`. If its identity is already tracked, the
    /// existing handle keeps its state and only gains the loaded copy's
    /// events, `dedupe(existing ++ incoming)`; that handle is returned.
    pub fn observe(&mut self, model: M) -> Tracked<M> {
        self.merge(model, false)
    }

    fn merge(&mut self, mut model: M, replace_state: bool) -> Tracked<M> {
        let id = model.aggregate_id();
        let Some(existing) = self.seen.get(&id) else {
            let tracked = Tracked::new(model);
            self.seen.insert(id, tracked.clone());
            return tracked;
        };
        existing.update(|current| {
            let mut merged: EventBuffer = current.pending_events_mut().take().into_iter().collect();
            merged.merge(model.pending_events_mut().take());
            if replace_state {
                *current = model;
            }
            *current.pending_events_mut() = merged;
        });
        debug!(model = M::NAME, %id, replace_state, "merged into tracked aggregate");
        existing.clone()
    }

    /// The handle tracked for `id`.
    #[must_use]
    pub fn get(&self, id: &Uuid) -> Option<&Tracked<M>> {
        self.seen.get(id)
    }

    /// Tracked handles in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &Tracked<M>> {
        self.seen.values()
    }

    /// Lazily drains every tracked aggregate's pending events, aggregates in
    /// first-seen order and events oldest first.
    pub fn drain_events(&self) -> impl Iterator<Item = Event> + Send + '_ {
        self.seen
            .values()
            .flat_map(|tracked| tracked.update(|model| model.pending_events_mut().take()))
    }

    /// Number of tracked aggregates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl<M: Model> Default for IdentityMap<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: Model> fmt::Debug for IdentityMap<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.seen.keys()).finish()
    }
}

/// Repository over one model, bound to one session.
///
/// Query-building calls accumulate on a pending query. Every read consumes
/// the pending query, so the repository is back to an unfiltered query after
/// each `get`, `list` or `list_rows`, whether or not the read succeeded.
pub struct Repository<M: Model> {
    session: Box<dyn Session<M>>,
    registry: Arc<SchemaRegistry>,
    query: Query,
    seen: IdentityMap<M>,
    read_only: bool,
}

impl<M: Model> Repository<M> {
    /// Creates a repository on `session`.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownModel` if `M` is not in the registry.
    pub fn new(
        session: Box<dyn Session<M>>,
        registry: Arc<SchemaRegistry>,
        read_only: bool,
    ) -> Result<Self, DomainError> {
        let schema = registry.get(M::NAME)?;
        Ok(Self {
            session,
            registry,
            query: Query::new(schema),
            seen: IdentityMap::new(),
            read_only,
        })
    }

    /// Adds a group of `column__operator` conditions combined by `operator`.
    ///
    /// # Errors
    ///
    /// See [`Query::filter`].
    pub fn filter<I, K>(
        &mut self,
        operator: LogicalOperator,
        conditions: I,
    ) -> Result<&mut Self, DomainError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        self.query.filter(operator, conditions)?;
        Ok(self)
    }

    /// Appends ordering terms; a leading `-` sorts descending.
    ///
    /// # Errors
    ///
    /// See [`Query::order_by`].
    pub fn order_by<I, S>(&mut self, fields: I) -> Result<&mut Self, DomainError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.query.order_by(fields)?;
        Ok(self)
    }

    /// Selects one page of results.
    ///
    /// # Errors
    ///
    /// See [`Query::paginate`].
    pub fn paginate(&mut self, page: u64, size: u64) -> Result<&mut Self, DomainError> {
        self.query.paginate(page, size)?;
        Ok(self)
    }

    /// Projects `(attribute, func(attribute))`.
    ///
    /// # Errors
    ///
    /// See [`Query::aggregate`].
    pub fn aggregate(&mut self, attribute: &str, func: &str) -> Result<&mut Self, DomainError> {
        self.query.aggregate(attribute, func)?;
        Ok(self)
    }

    /// Groups results by `attribute`.
    ///
    /// # Errors
    ///
    /// See [`Query::group_by`].
    pub fn group_by(&mut self, attribute: &str) -> Result<&mut Self, DomainError> {
        self.query.group_by(attribute)?;
        Ok(self)
    }

    /// Plans eager loads for every relationship, or for the immediate
    /// relationship reaching `target`.
    ///
    /// # Errors
    ///
    /// See [`Query::load_relationships`].
    pub fn load_relationships(&mut self, target: Option<&str>) -> Result<&mut Self, DomainError> {
        self.query.load_relationships(&self.registry, target)?;
        Ok(self)
    }

    /// The pending query.
    #[must_use]
    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Stages `model` and tracks it. In a transactional session the model is
    /// refreshed afterwards so that backend-computed values are visible.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::NotSupported` on a read-only repository and
    /// propagates session errors.
    pub async fn add(&mut self, mut model: M) -> Result<Tracked<M>, DomainError> {
        if self.read_only {
            return Err(DomainError::NotSupported("add on a read-only repository"));
        }
        self.session.stage(&model).await?;
        if self.session.mode() == SessionMode::Transactional {
            self.session.refresh(&mut model).await?;
        }
        Ok(self.seen.track(model))
    }

    /// Fetches at most one aggregate matching the pending query and tracks
    /// it. Returns `None` when nothing matches.
    ///
    /// # Errors
    ///
    /// Propagates session errors.
    pub async fn get(&mut self) -> Result<Option<Tracked<M>>, DomainError> {
        let query = self.take_query().limit_one();
        let found = self.session.fetch(&query).await?.into_iter().next();
        Ok(found.map(|model| self.seen.observe(model)))
    }

    /// Fetches every aggregate matching the pending query. Results are not
    /// tracked.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::InvalidQuery` under an aggregate projection and
    /// propagates session errors.
    pub async fn list(&mut self) -> Result<Vec<M>, DomainError> {
        let query = self.take_query();
        if query.projection() != Projection::Entity {
            return Err(DomainError::InvalidQuery(
                "use list_rows to read an aggregate projection".to_owned(),
            ));
        }
        self.session.fetch(&query).await
    }

    /// Fetches raw rows: every column per aggregate, or one
    /// `(attribute, func(attribute))` row per group.
    ///
    /// # Errors
    ///
    /// Propagates session errors.
    pub async fn list_rows(&mut self) -> Result<Vec<Row>, DomainError> {
        let query = self.take_query();
        self.session.fetch_rows(&query).await
    }

    /// Aggregates observed in this scope.
    #[must_use]
    pub fn seen(&self) -> &IdentityMap<M> {
        &self.seen
    }

    /// The session this repository is bound to.
    pub fn session_mut(&mut self) -> &mut dyn Session<M> {
        self.session.as_mut()
    }

    /// Returns `true` if staging is refused.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn take_query(&mut self) -> Query {
        let pending = self.query.clone();
        self.query.reset();
        pending
    }
}

impl<M: Model> fmt::Debug for Repository<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("model", &M::NAME)
            .field("query", &self.query)
            .field("seen", &self.seen)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}
