//! Eager-loading plans built from declared relationships.
//!
//! Child relationships are to-many and are loaded with one batched secondary
//! query per step. Parent relationships are to-one and are loaded through a
//! join on the primary query. Planning is a pure function of the schema
//! registry: it walks children and parents depth first from the root model
//! and returns one [`LoadPath`] per leaf of each tree.

use std::fmt;
use std::sync::Arc;

use harbor_core::error::DomainError;
use tracing::debug;

use crate::schema::{ModelSchema, Relationship, RelationshipKind, SchemaRegistry};

/// How a relationship step is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStrategy {
    /// Secondary `IN (...)` query keyed by the parent rows' local column.
    Batch,
    /// Join on the primary query, fetched together with the root rows.
    Join,
}

/// One relationship hop in a load path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadStep {
    /// Model that declares the relationship.
    pub source: &'static str,
    /// The relationship being followed.
    pub relationship: Relationship,
    /// How the hop is fetched.
    pub strategy: LoadStrategy,
}

impl LoadStep {
    fn new(source: &'static str, relationship: &Relationship) -> Self {
        let strategy = match relationship.kind {
            RelationshipKind::Child => LoadStrategy::Batch,
            RelationshipKind::Parent => LoadStrategy::Join,
        };
        Self {
            source,
            relationship: relationship.clone(),
            strategy,
        }
    }

    /// Model reached by this step.
    #[must_use]
    pub fn target(&self) -> &'static str {
        self.relationship.target
    }
}

/// A chain of steps from the root model to a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadPath {
    steps: Vec<LoadStep>,
}

impl LoadPath {
    /// Returns a copy of this path with `step` appended.
    #[must_use]
    pub fn extended(&self, step: LoadStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// Steps from the root outwards.
    #[must_use]
    pub fn steps(&self) -> &[LoadStep] {
        &self.steps
    }

    /// The last step.
    #[must_use]
    pub fn leaf(&self) -> Option<&LoadStep> {
        self.steps.last()
    }

    /// Number of steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns `true` if the path has no steps.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl fmt::Display for LoadPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut steps = self.steps.iter();
        if let Some(first) = steps.next() {
            write!(f, "{}.{}", first.source, first.relationship.name)?;
        }
        for step in steps {
            write!(f, ".{}", step.relationship.name)?;
        }
        Ok(())
    }
}

/// A join the primary query needs for a parent step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    /// Model on the child side of the join.
    pub source: &'static str,
    /// Relationship names from the root model to `source`; empty when the
    /// source is the root.
    pub via: Vec<&'static str>,
    /// The parent relationship joined through.
    pub relationship: Relationship,
}

impl JoinClause {
    /// Alias of the joined table: the relationship path joined by `__`.
    #[must_use]
    pub fn alias(&self) -> String {
        let mut alias = self.source_alias().unwrap_or_default();
        if !alias.is_empty() {
            alias.push_str("__");
        }
        alias.push_str(self.relationship.name);
        alias
    }

    /// Alias of the table on the child side, or `None` for the root table.
    #[must_use]
    pub fn source_alias(&self) -> Option<String> {
        (!self.via.is_empty()).then(|| self.via.join("__"))
    }
}

/// Load paths plus the joins they require.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipPlan {
    /// One path per leaf of the child tree, then one per leaf of the parent tree.
    pub paths: Vec<LoadPath>,
    /// Joins for every parent edge traversed, without duplicates.
    pub joins: Vec<JoinClause>,
}

impl RelationshipPlan {
    fn add_join(&mut self, join: JoinClause) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }
}

/// Plans every declared relationship reachable from `root`.
///
/// # Errors
///
/// Returns `DomainError::UnknownModel` if a relationship targets an
/// unregistered model and `DomainError::CyclicRelationship` if a traversal
/// reaches a model already on its active path.
pub fn plan_all(registry: &SchemaRegistry, root: &str) -> Result<RelationshipPlan, DomainError> {
    let schema = registry.get(root)?;
    let active = [schema.name()];
    let mut plan = RelationshipPlan::default();

    plan.paths = child_paths(registry, &schema, &LoadPath::default(), &active)?;
    let (upward, joins) = parent_paths(registry, &schema, &LoadPath::default(), &active)?;
    plan.paths.extend(upward);
    for join in joins {
        plan.add_join(join);
    }

    debug!(
        root = schema.name(),
        paths = plan.paths.len(),
        joins = plan.joins.len(),
        "planned relationship loads"
    );
    Ok(plan)
}

/// Plans a single relationship of `root` whose target is `target`.
///
/// Immediate children are searched before immediate parents and the first
/// match wins.
///
/// # Errors
///
/// Returns `DomainError::UnknownModel` if `root` is not registered and
/// `DomainError::AttributeNotFound` if no immediate relationship reaches
/// `target`.
pub fn plan_target(
    registry: &SchemaRegistry,
    root: &str,
    target: &str,
) -> Result<RelationshipPlan, DomainError> {
    let schema = registry.get(root)?;
    let found = schema
        .children()
        .iter()
        .chain(schema.parents())
        .find(|relationship| relationship.target == target)
        .ok_or_else(|| DomainError::attribute_not_found(schema.name(), target))?;

    let step = LoadStep::new(schema.name(), found);
    let mut plan = RelationshipPlan::default();
    if step.strategy == LoadStrategy::Join {
        plan.add_join(JoinClause {
            source: schema.name(),
            via: Vec::new(),
            relationship: found.clone(),
        });
    }
    plan.paths.push(LoadPath::default().extended(step));
    Ok(plan)
}

fn enter(
    registry: &SchemaRegistry,
    active: &[&'static str],
    relationship: &Relationship,
) -> Result<(Arc<ModelSchema>, Vec<&'static str>), DomainError> {
    let target = registry.get(relationship.target)?;
    let mut next: Vec<&'static str> = active.to_vec();
    next.push(target.name());
    if active.contains(&target.name()) {
        return Err(DomainError::CyclicRelationship {
            path: next.join(" -> "),
        });
    }
    Ok((target, next))
}

fn child_paths(
    registry: &SchemaRegistry,
    schema: &ModelSchema,
    path: &LoadPath,
    active: &[&'static str],
) -> Result<Vec<LoadPath>, DomainError> {
    if schema.children().is_empty() {
        return Ok(if path.is_empty() {
            Vec::new()
        } else {
            vec![path.clone()]
        });
    }
    let mut paths = Vec::new();
    for relationship in schema.children() {
        let (target, next) = enter(registry, active, relationship)?;
        let extended = path.extended(LoadStep::new(schema.name(), relationship));
        paths.extend(child_paths(registry, &target, &extended, &next)?);
    }
    Ok(paths)
}

fn parent_paths(
    registry: &SchemaRegistry,
    schema: &ModelSchema,
    path: &LoadPath,
    active: &[&'static str],
) -> Result<(Vec<LoadPath>, Vec<JoinClause>), DomainError> {
    if schema.parents().is_empty() {
        let paths = if path.is_empty() {
            Vec::new()
        } else {
            vec![path.clone()]
        };
        return Ok((paths, Vec::new()));
    }
    let mut paths = Vec::new();
    let mut joins = Vec::new();
    for relationship in schema.parents() {
        let (target, next) = enter(registry, active, relationship)?;
        joins.push(JoinClause {
            source: schema.name(),
            via: path
                .steps()
                .iter()
                .map(|step| step.relationship.name)
                .collect(),
            relationship: relationship.clone(),
        });
        let extended = path.extended(LoadStep::new(schema.name(), relationship));
        let (nested_paths, nested_joins) = parent_paths(registry, &target, &extended, &next)?;
        paths.extend(nested_paths);
        joins.extend(nested_joins);
    }
    Ok((paths, joins))
}
