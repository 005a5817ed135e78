//! The data access collaborator the mutation engine persists through.

mod memory;
mod redis_store;

pub use memory::{CallJournal, MemoryContext};
pub use redis_store::RedisContext;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde_json::Value;

use crate::{
    errors::StoreError,
    id::{IdKind, id_key},
    record::Record,
};

/// Lookup of the entities of one collection by identity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityQuery {
    pub collection: String,
    pub id_field: String,
    pub ids: Vec<Value>,
    /// Projection hint. `None` loads every stored field.
    pub fields: Option<Vec<String>>,
}

impl EntityQuery {
    pub fn by_ids(collection: impl Into<String>, id_field: impl Into<String>, ids: Vec<Value>) -> Self {
        Self {
            collection: collection.into(),
            id_field: id_field.into(),
            ids,
            fields: None,
        }
    }

    pub fn project(mut self, fields: Vec<String>) -> Self {
        self.fields = Some(fields);
        self
    }

    /// Applies the projection hint; the identity field is always kept.
    pub fn shape(&self, record: &Record) -> Record {
        match &self.fields {
            None => record.clone(),
            Some(fields) => record.project(
                std::iter::once(self.id_field.as_str()).chain(fields.iter().map(String::as_str)),
            ),
        }
    }
}

/// Opaque token naming one staged entity within a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageHandle(pub usize);

/// Foreign key whose value is the identity of another staged insert, known only once the save allocates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReference {
    pub field: String,
    pub target: StageHandle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StagedEntity {
    pub handle: StageHandle,
    pub id_field: String,
    pub id_kind: IdKind,
    pub record: Record,
    pub pending: Vec<PendingReference>,
}

impl StagedEntity {
    pub fn new(handle: StageHandle, id_field: impl Into<String>, id_kind: IdKind, record: Record) -> Self {
        Self {
            handle,
            id_field: id_field.into(),
            id_kind,
            record,
            pending: Vec::new(),
        }
    }

    pub fn with_pending(mut self, pending: Vec<PendingReference>) -> Self {
        self.pending = pending;
        self
    }
}

/// Outcome of a successful save.
#[derive(Debug, Clone)]
pub struct SaveReceipt {
    /// Final stored record of every staged entity, identities filled in.
    pub records: HashMap<StageHandle, Record>,
    pub saved_at: DateTime<Utc>,
}

impl SaveReceipt {
    pub fn record(&self, handle: StageHandle) -> Option<&Record> {
        self.records.get(&handle)
    }
}

/// Queryable, change-tracking storage used by one submission at a time.
///
/// Staging never touches storage; only [`DataContext::save`] writes, and a
/// failing save writes nothing.
#[allow(async_fn_in_trait)]
pub trait DataContext {
    async fn query(&mut self, query: &EntityQuery) -> Result<Vec<Record>, StoreError>;

    fn add_range(&mut self, collection: &str, entities: Vec<StagedEntity>);

    fn update_range(&mut self, collection: &str, entities: Vec<StagedEntity>);

    async fn save(&mut self) -> Result<SaveReceipt, StoreError>;
}

/// A fully resolved write produced by [`ChangeSet::resolve`].
#[derive(Debug, Clone)]
pub(crate) struct ResolvedWrite {
    pub collection: String,
    pub handle: StageHandle,
    pub id: Value,
    pub record: Record,
    pub is_insert: bool,
}

/// Inserts and updates staged since the last save, in staging order.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    entries: Vec<(String, StagedEntity, bool)>,
}

impl ChangeSet {
    pub fn stage(&mut self, collection: &str, entities: Vec<StagedEntity>, is_insert: bool) {
        self.entries
            .extend(entities.into_iter().map(|entity| (collection.to_string(), entity, is_insert)));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of integer identities each collection needs for its inserts.
    pub fn sequence_demand(&self) -> IndexMap<String, i64> {
        let mut demand = IndexMap::new();
        for (collection, entity, is_insert) in &self.entries {
            if *is_insert && entity.id_kind == IdKind::Int {
                *demand.entry(collection.clone()).or_insert(0) += 1;
            }
        }
        demand
    }

    /// Allocates identities and substitutes pending references.
    ///
    /// `next_sequence` holds, per collection, the first integer identity
    /// reserved for this save; consecutive inserts take consecutive values.
    pub fn resolve(&self, mut next_sequence: HashMap<String, i64>) -> Result<Vec<ResolvedWrite>, StoreError> {
        let mut writes = Vec::with_capacity(self.entries.len());
        let mut allocated: HashMap<StageHandle, Value> = HashMap::new();

        for (collection, entity, is_insert) in &self.entries {
            let id = if *is_insert {
                let sequence = match entity.id_kind {
                    IdKind::Int => {
                        let slot = next_sequence.get_mut(collection).ok_or_else(|| {
                            StoreError::other(format!("no identities reserved for `{collection}`"))
                        })?;
                        let value = *slot;
                        *slot += 1;
                        value
                    }
                    IdKind::String | IdKind::Uuid => 0,
                };
                entity.id_kind.generate(sequence)
            } else {
                let id = entity.record.value(&entity.id_field);
                if id.is_null() {
                    return Err(StoreError::Conflict {
                        collection: collection.clone(),
                        id: id_key(&id),
                        message: "staged update carries no identity".into(),
                    });
                }
                id
            };
            allocated.insert(entity.handle, id.clone());

            let mut record = entity.record.clone();
            record.set(entity.id_field.clone(), id.clone());
            writes.push(ResolvedWrite {
                collection: collection.clone(),
                handle: entity.handle,
                id,
                record,
                is_insert: *is_insert,
            });
        }

        for (write, (_, entity, _)) in writes.iter_mut().zip(&self.entries) {
            for pending in &entity.pending {
                let target = allocated.get(&pending.target).ok_or_else(|| {
                    StoreError::other(format!(
                        "field `{}` references stage {} which is not part of this save",
                        pending.field, pending.target.0
                    ))
                })?;
                write.record.set(pending.field.clone(), target.clone());
            }
        }

        Ok(writes)
    }
}
