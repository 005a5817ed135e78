//! SnugQL core library.
//!
//! A submission engine for multi-entity GraphQL `submit` mutations: entities
//! of several collections, possibly referencing each other through
//! placeholder ids, are created or updated as one unit with field-level
//! authorization, batched loaders and a single save through a [`DataContext`].

pub mod config;
pub mod context;
pub mod demo;
pub mod errors;
pub mod id;
pub mod keys;
pub mod mutation;
pub mod payload;
pub mod record;
pub mod registry;
pub mod store;
pub mod types;
pub mod validators;

pub use config::EngineConfig;
pub use context::ExecutionContext;
pub use errors::*;
pub use mutation::{DependencyGraph, EntityResult, MutationEngine, SubmitOutput};
pub use payload::{FieldSelection, InputEntity, PayloadTree, Selection, validate_input};
pub use record::Record;
pub use registry::{IncomingReference, Schema, SchemaBuilder};
pub use store::{
    CallJournal, DataContext, EntityQuery, MemoryContext, PendingReference, RedisContext, SaveReceipt, StageHandle,
    StagedEntity,
};
pub use types::{
    AffectedEntity, BoxFuture, EditableMode, EntityDescriptor, FieldChange, FieldDescriptor, FieldKind,
    ReferenceDescriptor, RelationKind, ValidationRule, ready,
};

// Re-export redis types so users don't need to depend on a specific redis version
pub use redis;
pub use redis::aio::ConnectionManager;
