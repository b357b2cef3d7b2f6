//! Explicit per-model schema registry.
//!
//! Every model the repository can query is registered once at startup with
//! its table, columns and declared child (to-many) and parent (to-one)
//! relationships. Lookups by name are map accesses that fail with
//! `AttributeNotFound` or `UnknownModel`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use harbor_core::aggregate::{AggregateRoot, BASE_FIELDS};
use harbor_core::error::DomainError;
use serde_json::Value;

/// An aggregate the repository can load, filter and order.
pub trait Model: AggregateRoot + Clone + fmt::Debug {
    /// Registry key of this model's schema.
    const NAME: &'static str;

    /// Current value of a column, or `None` if the model has no such column.
    fn field(&self, column: &str) -> Option<Value>;
}

/// Which side of a relationship the declaring model is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    /// To-many relationship, loaded with a batched secondary query.
    Child,
    /// To-one relationship, loaded through a join.
    Parent,
}

/// A named relationship from the declaring model to a target model.
///
/// `local_column` lives on the declaring model and `remote_column` on the
/// target; the relationship holds where they are equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relationship {
    /// Relationship name, unique within the declaring model.
    pub name: &'static str,
    /// Registry key of the target model.
    pub target: &'static str,
    /// Column on the declaring model.
    pub local_column: &'static str,
    /// Column on the target model.
    pub remote_column: &'static str,
    /// Child or parent.
    pub kind: RelationshipKind,
}

/// Table, columns and relationships of one model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    name: &'static str,
    table: &'static str,
    columns: Vec<&'static str>,
    children: Vec<Relationship>,
    parents: Vec<Relationship>,
}

impl ModelSchema {
    /// Starts a schema for `name` stored in `table`. The base columns
    /// (`id`, `created_at`, `updated_at`) are always present.
    #[must_use]
    pub fn new(name: &'static str, table: &'static str) -> Self {
        Self {
            name,
            table,
            columns: BASE_FIELDS.to_vec(),
            children: Vec::new(),
            parents: Vec::new(),
        }
    }

    /// Declares a column.
    #[must_use]
    pub fn column(mut self, column: &'static str) -> Self {
        if !self.columns.contains(&column) {
            self.columns.push(column);
        }
        self
    }

    /// Declares a to-many relationship: `target.remote_column` references
    /// `self.local_column`.
    #[must_use]
    pub fn child(
        mut self,
        name: &'static str,
        target: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        self.children.push(Relationship {
            name,
            target,
            local_column,
            remote_column,
            kind: RelationshipKind::Child,
        });
        self
    }

    /// Declares a to-one relationship: `self.local_column` references
    /// `target.remote_column`.
    #[must_use]
    pub fn parent(
        mut self,
        name: &'static str,
        target: &'static str,
        local_column: &'static str,
        remote_column: &'static str,
    ) -> Self {
        self.parents.push(Relationship {
            name,
            target,
            local_column,
            remote_column,
            kind: RelationshipKind::Parent,
        });
        self
    }

    /// Registry key.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Backing table.
    #[must_use]
    pub fn table(&self) -> &'static str {
        self.table
    }

    /// Declared columns, base columns first.
    #[must_use]
    pub fn columns(&self) -> &[&'static str] {
        &self.columns
    }

    /// Declared child relationships, in declaration order.
    #[must_use]
    pub fn children(&self) -> &[Relationship] {
        &self.children
    }

    /// Declared parent relationships, in declaration order.
    #[must_use]
    pub fn parents(&self) -> &[Relationship] {
        &self.parents
    }

    /// Resolves a column name to its declared form.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` if the column is not declared.
    pub fn column_named(&self, column: &str) -> Result<&'static str, DomainError> {
        self.columns
            .iter()
            .copied()
            .find(|declared| *declared == column)
            .ok_or_else(|| DomainError::attribute_not_found(self.name, column))
    }

    /// Resolves a relationship by name, searching children then parents.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::AttributeNotFound` if no relationship has that name.
    pub fn relationship(&self, name: &str) -> Result<&Relationship, DomainError> {
        self.children
            .iter()
            .chain(&self.parents)
            .find(|relationship| relationship.name == name)
            .ok_or_else(|| DomainError::attribute_not_found(self.name, name))
    }
}

/// All model schemas known to the application, validated as a whole.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    models: HashMap<&'static str, Arc<ModelSchema>>,
}

impl SchemaRegistry {
    /// Registers every schema and validates the result.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` for a duplicate model name, and any
    /// error reported by [`SchemaRegistry::validate`].
    pub fn build<I>(schemas: I) -> Result<Self, DomainError>
    where
        I: IntoIterator<Item = ModelSchema>,
    {
        let mut registry = Self::default();
        for schema in schemas {
            registry.register(schema)?;
        }
        registry.validate()?;
        Ok(registry)
    }

    /// Adds one schema without validating cross references.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name is already registered.
    pub fn register(&mut self, schema: ModelSchema) -> Result<(), DomainError> {
        if self.models.contains_key(schema.name) {
            return Err(DomainError::Validation(format!(
                "model {} is registered twice",
                schema.name
            )));
        }
        self.models.insert(schema.name, Arc::new(schema));
        Ok(())
    }

    /// Checks that every relationship points at a registered model and that
    /// both join columns are declared.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownModel` for a dangling relationship target
    /// and `DomainError::AttributeNotFound` for an undeclared join column.
    pub fn validate(&self) -> Result<(), DomainError> {
        for schema in self.models.values() {
            for relationship in schema.children().iter().chain(schema.parents()) {
                let target = self.get(relationship.target)?;
                schema.column_named(relationship.local_column)?;
                target.column_named(relationship.remote_column)?;
            }
        }
        Ok(())
    }

    /// Looks up a schema by model name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::UnknownModel` if the name is not registered.
    pub fn get(&self, name: &str) -> Result<Arc<ModelSchema>, DomainError> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| DomainError::UnknownModel(name.to_owned()))
    }

    /// Number of registered models.
    #[must_use]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Returns `true` if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use harbor_core::error::DomainError;

    use super::{ModelSchema, RelationshipKind, SchemaRegistry};

    fn posts() -> ModelSchema {
        ModelSchema::new("post", "posts")
            .column("title")
            .column("author_id")
            .child("comments", "comment", "id", "post_id")
            .parent("author", "author", "author_id", "id")
    }

    fn comments() -> ModelSchema {
        ModelSchema::new("comment", "comments").column("post_id")
    }

    fn authors() -> ModelSchema {
        ModelSchema::new("author", "authors").column("name")
    }

    #[test]
    fn test_base_columns_are_always_declared() {
        let schema = ModelSchema::new("tag", "tags");

        assert_eq!(schema.columns(), &["id", "created_at", "updated_at"]);
        assert_eq!(schema.column_named("id").unwrap(), "id");
    }

    #[test]
    fn test_unknown_column_is_attribute_not_found() {
        let schema = posts();

        match schema.column_named("body").unwrap_err() {
            DomainError::AttributeNotFound { model, attribute } => {
                assert_eq!(model, "post");
                assert_eq!(attribute, "body");
            }
            other => panic!("expected AttributeNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_relationship_lookup_searches_children_then_parents() {
        let schema = posts();

        assert_eq!(
            schema.relationship("comments").unwrap().kind,
            RelationshipKind::Child
        );
        assert_eq!(
            schema.relationship("author").unwrap().kind,
            RelationshipKind::Parent
        );
        assert!(schema.relationship("tags").is_err());
    }

    #[test]
    fn test_build_accepts_consistent_registry() {
        let registry = SchemaRegistry::build([posts(), comments(), authors()]).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("comment").unwrap().table(), "comments");
    }

    #[test]
    fn test_build_rejects_dangling_relationship_target() {
        let result = SchemaRegistry::build([posts(), comments()]);

        match result.unwrap_err() {
            DomainError::UnknownModel(name) => assert_eq!(name, "author"),
            other => panic!("expected UnknownModel, got {other:?}"),
        }
    }

    #[test]
    fn test_build_rejects_undeclared_join_column() {
        let bare_comments = ModelSchema::new("comment", "comments");

        let result = SchemaRegistry::build([posts(), bare_comments, authors()]);

        assert!(matches!(
            result.unwrap_err(),
            DomainError::AttributeNotFound { .. }
        ));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = SchemaRegistry::default();
        registry.register(authors()).unwrap();

        assert!(matches!(
            registry.register(authors()),
            Err(DomainError::Validation(_))
        ));
    }
}
