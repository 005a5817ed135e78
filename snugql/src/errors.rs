use std::{borrow::Cow, fmt};

use thiserror::Error;

/// Whether a submitted entity is being created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Update,
}

impl Operation {
    pub fn for_new(is_new: bool) -> Self {
        if is_new { Self::Create } else { Self::Update }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("create"),
            Self::Update => f.write_str("update"),
        }
    }
}

/// Type name and client id of the entity an error refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRef {
    pub entity_type: String,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type: {}, id: {}", self.entity_type, self.id)
    }
}

/// Top-level error returned by a submission.
///
/// The `Display` output of every variant is the message callers see in the
/// GraphQL `errors` array, so the wording is part of the public contract.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The input payload did not match the input types; nothing was executed.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Aggregation references among the submitted entities form a cycle.
    #[error("Circular reference detected.")]
    CircularReference { entity: EntityRef },

    /// A single entity could not be created or updated, which aborts the submission.
    #[error("Cannot {operation} entity: {reason}")]
    Entity {
        operation: Operation,
        entity: EntityRef,
        reason: EntityFailure,
    },

    /// The data context failed while querying or saving.
    #[error("data context error: {0}")]
    Store(#[from] StoreError),

    /// The schema the engine was handed is inconsistent.
    #[error("{0}")]
    Schema(#[from] SchemaError),
}

impl MutationError {
    pub fn entity(operation: Operation, entity: EntityRef, reason: EntityFailure) -> Self {
        Self::Entity {
            operation,
            entity,
            reason,
        }
    }

    /// Returns the entity-level failure, if this error is one.
    pub fn failure(&self) -> Option<&EntityFailure> {
        match self {
            Self::Entity { reason, .. } => Some(reason),
            _ => None,
        }
    }
}

/// Why a single entity could not be saved.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityFailure {
    #[error("Unauthorized.")]
    Unauthorized,

    #[error("Entity not found ({entity}).")]
    NotFound { entity: EntityRef },

    #[error("More than one entity found ({entity}).")]
    Duplicate { entity: EntityRef },

    #[error("Field `{field}` cannot be null")]
    MandatoryFieldMissing { field: String },

    #[error("Cannot change field `{field}` of entity ({entity}): The field is not editable.")]
    FieldNotEditable { field: String, entity: EntityRef },

    #[error("Cannot change field `{field}` of entity ({entity}): {message}")]
    FieldEditDenied {
        field: String,
        entity: EntityRef,
        message: String,
    },

    #[error("Field `{field}` is invalid: {message}")]
    InvalidValue { field: String, message: String },

    #[error("{0}")]
    Rejected(String),
}

/// Error reported by the data context collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A stored document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A staged change conflicts with the stored state.
    #[error("conflict in `{collection}` for id {id}: {message}")]
    Conflict {
        collection: String,
        id: String,
        message: String,
    },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl StoreError {
    pub fn other(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }
}

/// Raised while assembling a [`Schema`](crate::registry::Schema).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid schema: {message}")]
pub struct SchemaError {
    pub message: String,
}

impl SchemaError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Error returned by user supplied hooks and loaders.
///
/// The message is surfaced verbatim as the reason of the failing entity.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct CallbackError {
    pub message: String,
}

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<&str> for CallbackError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for CallbackError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<StoreError> for CallbackError {
    fn from(err: StoreError) -> Self {
        Self::new(err.to_string())
    }
}

/// Collection of validation issues found in the input payload.
#[derive(Debug, Clone, Error)]
#[error("Argument validation failed: {}", summarize(.issues))]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

fn summarize(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|issue| format!("{}: {}", issue.field, issue.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self {
            issues: issues.into_iter().collect(),
        }
    }

    /// Convenience helper for constructing a single-field validation error.
    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    /// Returns true when any issue was raised for the given field path.
    pub fn mentions(&self, field: &str) -> bool {
        self.issues.iter().any(|issue| issue.field == field || issue.field.ends_with(&format!(".{field}")))
    }
}

/// Detailed validation failure for a single field or logical path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;
