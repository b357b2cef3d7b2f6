//! Domain error types.

use thiserror::Error;
use uuid::Uuid;

/// Top-level error type shared by the query builder, the repository, the
/// unit of work and the message bus.
#[derive(Debug, Error)]
pub enum DomainError {
    /// A filter, ordering, aggregate, grouping or relationship lookup named
    /// something the model does not declare.
    #[error("attribute not found: {model}.{attribute}")]
    AttributeNotFound {
        /// The model that was searched.
        model: String,
        /// The attribute or relationship that was requested.
        attribute: String,
    },

    /// A filter condition was malformed or used an unsupported operator.
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// A query clause other than a filter condition was rejected.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Relationship traversal reached a model that is already on the active path.
    #[error("cyclic relationship declaration: {path}")]
    CyclicRelationship {
        /// The traversal path that closed the cycle, e.g. `a -> b -> a`.
        path: String,
    },

    /// A model name is not present in the schema registry.
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// The operation is not available on this unit of work.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// A command was dispatched with no registered handler.
    #[error("no handler registered for command {0}")]
    HandlerNotFound(&'static str),

    /// A second handler was registered for a command type.
    #[error("a handler is already registered for command {0}")]
    HandlerAlreadyRegistered(&'static str),

    /// The repository was used outside of an entered unit-of-work scope.
    #[error("unit of work scope is not active")]
    ScopeInactive,

    /// An aggregate was not found.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(Uuid),

    /// A validation error in domain logic.
    #[error("validation error: {0}")]
    Validation(String),

    /// An infrastructure/persistence error.
    #[error("infrastructure error: {0}")]
    Infrastructure(String),
}

impl DomainError {
    /// Shorthand for [`DomainError::AttributeNotFound`].
    #[must_use]
    pub fn attribute_not_found(model: &str, attribute: &str) -> Self {
        Self::AttributeNotFound {
            model: model.to_owned(),
            attribute: attribute.to_owned(),
        }
    }

    /// Machine-readable code, distinct per variant, for outer layers that map
    /// failures onto response codes.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AttributeNotFound { .. } => "attribute_not_found",
            Self::InvalidCondition(_) => "invalid_condition",
            Self::InvalidQuery(_) => "invalid_query",
            Self::CyclicRelationship { .. } => "cyclic_relationship",
            Self::UnknownModel(_) => "unknown_model",
            Self::NotSupported(_) => "not_supported",
            Self::HandlerNotFound(_) => "handler_not_found",
            Self::HandlerAlreadyRegistered(_) => "handler_already_registered",
            Self::ScopeInactive => "scope_inactive",
            Self::AggregateNotFound(_) => "aggregate_not_found",
            Self::Validation(_) => "validation_error",
            Self::Infrastructure(_) => "infrastructure_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::DomainError;
    use uuid::Uuid;

    #[test]
    fn test_codes_are_distinct_per_variant() {
        let errors = [
            DomainError::attribute_not_found("orders", "missing"),
            DomainError::InvalidCondition("x".into()),
            DomainError::InvalidQuery("x".into()),
            DomainError::CyclicRelationship { path: "a -> a".into() },
            DomainError::UnknownModel("x".into()),
            DomainError::NotSupported("commit"),
            DomainError::HandlerNotFound("Cmd"),
            DomainError::HandlerAlreadyRegistered("Cmd"),
            DomainError::ScopeInactive,
            DomainError::AggregateNotFound(Uuid::nil()),
            DomainError::Validation("x".into()),
            DomainError::Infrastructure("x".into()),
        ];

        let codes: HashSet<&str> = errors.iter().map(DomainError::code).collect();

        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_attribute_not_found_message_names_model_and_attribute() {
        let err = DomainError::attribute_not_found("orders", "colour");

        assert_eq!(err.to_string(), "attribute not found: orders.colour");
    }
}
