//! Unit of work: one session scope and the events it harvests.
//!
//! Scope lifecycle is `inactive → active → released`. Entering opens a
//! session and binds a fresh repository to it. Exiting always rolls back
//! whatever was not committed and closes the session exactly once; a second
//! exit is a no-op. The repository's identity map outlives the exit so the
//! bus can still collect events raised inside the scope, and is discarded
//! on the next entry.

use std::marker::PhantomData;
use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use harbor_core::error::DomainError;
use harbor_core::event::Event;
use harbor_query::schema::Model;
use tracing::debug;

use crate::repository::Repository;
use crate::session::{SessionFactory, SessionMode};

/// Scope owner handed to command and event handlers.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Aggregate type the repository manages.
    type Model: Model;

    /// Opens a session and binds a fresh repository to it.
    async fn enter(&mut self) -> Result<(), DomainError>;

    /// Rolls back uncommitted work and releases the session. Idempotent.
    async fn exit(&mut self) -> Result<(), DomainError>;

    /// Commits staged work.
    async fn commit(&mut self) -> Result<(), DomainError>;

    /// Discards staged work.
    async fn rollback(&mut self) -> Result<(), DomainError>;

    /// The repository of the active scope.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ScopeInactive` outside an entered scope.
    fn repository(&mut self) -> Result<&mut Repository<Self::Model>, DomainError>;

    /// Drains the pending events of every aggregate seen in the current or
    /// most recent scope, in seen order, oldest event first.
    fn collect_new_events(&mut self) -> Box<dyn Iterator<Item = Event> + Send + '_>;

    /// Drops the pending events of every aggregate seen in the current or
    /// most recent scope and returns how many were dropped. Used after a
    /// handler fails, since its work was rolled back.
    fn discard_new_events(&mut self) -> usize {
        self.collect_new_events().count()
    }
}

/// Runs a closure inside an entered scope.
#[async_trait]
pub trait UnitOfWorkExt: UnitOfWork + Sized {
    /// Enters, runs `f`, then exits whether or not `f` succeeded. The
    /// closure's error takes precedence over an error from exiting.
    ///
    /// # Errors
    ///
    /// Propagates errors from entering, from `f` and from exiting.
    async fn scope<T, F>(&mut self, f: F) -> Result<T, DomainError>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T, DomainError>> + Send;
}

#[async_trait]
impl<U: UnitOfWork> UnitOfWorkExt for U {
    async fn scope<T, F>(&mut self, f: F) -> Result<T, DomainError>
    where
        T: Send,
        F: for<'a> FnOnce(&'a mut Self) -> BoxFuture<'a, Result<T, DomainError>> + Send,
    {
        self.enter().await?;
        let outcome = f(&mut *self).await;
        let released = self.exit().await;
        let value = outcome?;
        released?;
        Ok(value)
    }
}

enum ScopeState<M: Model> {
    Inactive,
    Active(Repository<M>),
    Released(Repository<M>),
}

/// Lifecycle shared by both unit-of-work flavours.
struct Scope<M: Model, F> {
    factory: Arc<F>,
    mode: SessionMode,
    state: ScopeState<M>,
}

impl<M, F> Scope<M, F>
where
    M: Model,
    F: SessionFactory<M>,
{
    fn new(factory: Arc<F>, mode: SessionMode) -> Self {
        Self {
            factory,
            mode,
            state: ScopeState::Inactive,
        }
    }

    async fn enter(&mut self) -> Result<(), DomainError> {
        if matches!(self.state, ScopeState::Active(_)) {
            return Err(DomainError::NotSupported(
                "entering a unit of work that is already active",
            ));
        }
        let session = self.factory.open(self.mode).await?;
        let repository = Repository::new(
            session,
            self.factory.registry(),
            self.mode == SessionMode::Autocommit,
        )?;
        self.state = ScopeState::Active(repository);
        debug!(model = M::NAME, mode = ?self.mode, "unit of work entered");
        Ok(())
    }

    async fn exit(&mut self) -> Result<(), DomainError> {
        let previous = mem::replace(&mut self.state, ScopeState::Inactive);
        let ScopeState::Active(mut repository) = previous else {
            self.state = previous;
            return Ok(());
        };
        let rolled_back = repository.session_mut().rollback().await;
        let closed = repository.session_mut().close().await;
        self.state = ScopeState::Released(repository);
        debug!(model = M::NAME, "unit of work released");
        rolled_back?;
        closed
    }

    fn active(&mut self) -> Result<&mut Repository<M>, DomainError> {
        match &mut self.state {
            ScopeState::Active(repository) => Ok(repository),
            ScopeState::Inactive | ScopeState::Released(_) => Err(DomainError::ScopeInactive),
        }
    }

    fn collect(&mut self) -> Box<dyn Iterator<Item = Event> + Send + '_> {
        match &self.state {
            ScopeState::Active(repository) | ScopeState::Released(repository) => {
                Box::new(repository.seen().drain_events())
            }
            ScopeState::Inactive => Box::new(std::iter::empty()),
        }
    }

    fn is_active(&self) -> bool {
        matches!(self.state, ScopeState::Active(_))
    }
}

/// Commit-capable unit of work over a transactional session.
pub struct TransactionalUnitOfWork<M: Model, F> {
    scope: Scope<M, F>,
    _model: PhantomData<fn() -> M>,
}

impl<M, F> TransactionalUnitOfWork<M, F>
where
    M: Model,
    F: SessionFactory<M>,
{
    /// Creates an inactive unit of work that opens sessions from `factory`.
    #[must_use]
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            scope: Scope::new(factory, SessionMode::Transactional),
            _model: PhantomData,
        }
    }

    /// Sends staged changes to the backend without committing.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ScopeInactive` outside an entered scope and
    /// propagates session errors.
    pub async fn flush(&mut self) -> Result<(), DomainError> {
        self.scope.active()?.session_mut().flush().await
    }

    /// Reloads an aggregate's persisted state, keeping its pending events.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::ScopeInactive` outside an entered scope and
    /// propagates session errors.
    pub async fn refresh(&mut self, model: &mut M) -> Result<(), DomainError> {
        self.scope.active()?.session_mut().refresh(model).await
    }

    /// Returns `true` between `enter` and `exit`.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.scope.is_active()
    }
}

#[async_trait]
impl<M, F> UnitOfWork for TransactionalUnitOfWork<M, F>
where
    M: Model,
    F: SessionFactory<M> + 'static,
{
    type Model = M;

    async fn enter(&mut self) -> Result<(), DomainError> {
        self.scope.enter().await
    }

    async fn exit(&mut self) -> Result<(), DomainError> {
        self.scope.exit().await
    }

    async fn commit(&mut self) -> Result<(), DomainError> {
        self.scope.active()?.session_mut().commit().await?;
        debug!(model = M::NAME, "unit of work committed");
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DomainError> {
        self.scope.active()?.session_mut().rollback().await
    }

    fn repository(&mut self) -> Result<&mut Repository<M>, DomainError> {
        self.scope.active()
    }

    fn collect_new_events(&mut self) -> Box<dyn Iterator<Item = Event> + Send + '_> {
        self.scope.collect()
    }
}

/// Read-side unit of work over an autocommit session. Its repository
/// refuses `add`, and `commit` and `rollback` fail with
/// `DomainError::NotSupported`.
pub struct ReadOnlyView<M: Model, F> {
    scope: Scope<M, F>,
    _model: PhantomData<fn() -> M>,
}

impl<M, F> ReadOnlyView<M, F>
where
    M: Model,
    F: SessionFactory<M>,
{
    /// Creates an inactive view that opens sessions from `factory`.
    #[must_use]
    pub fn new(factory: Arc<F>) -> Self {
        Self {
            scope: Scope::new(factory, SessionMode::Autocommit),
            _model: PhantomData,
        }
    }
}

#[async_trait]
impl<M, F> UnitOfWork for ReadOnlyView<M, F>
where
    M: Model,
    F: SessionFactory<M> + 'static,
{
    type Model = M;

    async fn enter(&mut self) -> Result<(), DomainError> {
        self.scope.enter().await
    }

    async fn exit(&mut self) -> Result<(), DomainError> {
        self.scope.exit().await
    }

    async fn commit(&mut self) -> Result<(), DomainError> {
        Err(DomainError::NotSupported("commit on a read-only unit of work"))
    }

    async fn rollback(&mut self) -> Result<(), DomainError> {
        Err(DomainError::NotSupported("rollback on a read-only unit of work"))
    }

    fn repository(&mut self) -> Result<&mut Repository<M>, DomainError> {
        self.scope.active()
    }

    fn collect_new_events(&mut self) -> Box<dyn Iterator<Item = Event> + Send + '_> {
        self.scope.collect()
    }
}
