use std::collections::HashMap;

use chrono::Utc;
use indexmap::IndexMap;
use log::debug;
use serde_json::{Map, Value};

use super::{ChangeSet, DataContext, EntityQuery, SaveReceipt, StagedEntity};
use crate::{errors::StoreError, id::id_key, record::Record};

/// Every collaborator call a [`MemoryContext`] has served.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallJournal {
    pub query_calls: Vec<EntityQuery>,
    /// Collection and entity count of each `add_range` call.
    pub add_range_calls: Vec<(String, usize)>,
    pub update_range_calls: Vec<(String, usize)>,
    pub save_calls: usize,
}

impl CallJournal {
    pub fn queries_for(&self, collection: &str) -> usize {
        self.query_calls.iter().filter(|query| query.collection == collection).count()
    }
}

/// In-process data context.
///
/// Rows are kept as plain lists so a seeded duplicate identity behaves like a
/// misconfigured base query would.
#[derive(Debug, Default)]
pub struct MemoryContext {
    collections: IndexMap<String, Vec<Record>>,
    sequences: HashMap<String, i64>,
    changes: ChangeSet,
    journal: CallJournal,
    fail_next_save: Option<String>,
}

impl MemoryContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends rows to a collection as-is.
    pub fn seed<I>(&mut self, collection: impl Into<String>, records: I) -> &mut Self
    where
        I: IntoIterator<Item = Record>,
    {
        self.collections.entry(collection.into()).or_default().extend(records);
        self
    }

    /// Loads `{ "<collection>": [ {...}, ... ] }`.
    pub fn from_json(value: &Value) -> Result<Self, StoreError> {
        let object = value
            .as_object()
            .ok_or_else(|| StoreError::other("store file must hold an object keyed by collection"))?;
        let mut context = Self::new();
        for (collection, rows) in object {
            let rows: Vec<Record> = serde_json::from_value(rows.clone())?;
            context.seed(collection.clone(), rows);
        }
        Ok(context)
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        for (collection, rows) in &self.collections {
            object.insert(
                collection.clone(),
                Value::Array(rows.iter().cloned().map(Value::from).collect()),
            );
        }
        Value::Object(object)
    }

    pub fn records(&self, collection: &str) -> &[Record] {
        self.collections.get(collection).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn find(&self, collection: &str, id_field: &str, id: &Value) -> Option<&Record> {
        let key = id_key(id);
        self.records(collection)
            .iter()
            .find(|record| record.get(id_field).is_some_and(|candidate| id_key(candidate) == key))
    }

    pub fn journal(&self) -> &CallJournal {
        &self.journal
    }

    pub fn reset_journal(&mut self) {
        self.journal = CallJournal::default();
    }

    /// Makes the next save fail with `message` without writing anything.
    pub fn fail_next_save(&mut self, message: impl Into<String>) {
        self.fail_next_save = Some(message.into());
    }

    fn next_sequence(&self, collection: &str, id_field: &str) -> i64 {
        let stored_max = self
            .records(collection)
            .iter()
            .filter_map(|record| record.get(id_field).and_then(Value::as_i64))
            .max()
            .unwrap_or(0);
        self.sequences.get(collection).copied().unwrap_or(0).max(stored_max) + 1
    }

    fn position_of(&self, collection: &str, id_field: &str, id: &Value) -> Option<usize> {
        let key = id_key(id);
        self.records(collection)
            .iter()
            .position(|record| record.get(id_field).is_some_and(|candidate| id_key(candidate) == key))
    }
}

impl DataContext for MemoryContext {
    async fn query(&mut self, query: &EntityQuery) -> Result<Vec<Record>, StoreError> {
        self.journal.query_calls.push(query.clone());
        let wanted: Vec<String> = query.ids.iter().map(id_key).collect();
        let rows = self
            .records(&query.collection)
            .iter()
            .filter(|record| {
                record
                    .get(&query.id_field)
                    .is_some_and(|id| wanted.contains(&id_key(id)))
            })
            .map(|record| query.shape(record))
            .collect();
        Ok(rows)
    }

    fn add_range(&mut self, collection: &str, entities: Vec<StagedEntity>) {
        self.journal.add_range_calls.push((collection.to_string(), entities.len()));
        self.changes.stage(collection, entities, true);
    }

    fn update_range(&mut self, collection: &str, entities: Vec<StagedEntity>) {
        self.journal.update_range_calls.push((collection.to_string(), entities.len()));
        self.changes.stage(collection, entities, false);
    }

    async fn save(&mut self) -> Result<SaveReceipt, StoreError> {
        self.journal.save_calls += 1;
        let changes = std::mem::take(&mut self.changes);

        if let Some(message) = self.fail_next_save.take() {
            return Err(StoreError::other(message));
        }

        let id_fields: HashMap<String, String> = changes
            .entries
            .iter()
            .map(|(collection, entity, _)| (collection.clone(), entity.id_field.clone()))
            .collect();
        let mut reserved = HashMap::new();
        let mut last_used = Vec::new();
        for (collection, count) in changes.sequence_demand() {
            let id_field = id_fields.get(&collection).map(String::as_str).unwrap_or("id");
            let start = self.next_sequence(&collection, id_field);
            last_used.push((collection.clone(), start + count - 1));
            reserved.insert(collection, start);
        }
        let writes = changes.resolve(reserved)?;

        // Check every write before touching any row.
        let mut targets = Vec::with_capacity(writes.len());
        for write in &writes {
            let id_field = &id_fields[&write.collection];
            let existing = self.position_of(&write.collection, id_field, &write.id);
            match (write.is_insert, existing) {
                (true, Some(_)) => {
                    return Err(StoreError::Conflict {
                        collection: write.collection.clone(),
                        id: id_key(&write.id),
                        message: "identity already taken".into(),
                    });
                }
                (false, None) => {
                    return Err(StoreError::Conflict {
                        collection: write.collection.clone(),
                        id: id_key(&write.id),
                        message: "entity no longer exists".into(),
                    });
                }
                (_, position) => targets.push(position),
            }
        }

        // Sequences only move once the whole save is known to apply.
        self.sequences.extend(last_used);

        let mut records = HashMap::with_capacity(writes.len());
        for (write, position) in writes.into_iter().zip(targets) {
            let rows = self.collections.entry(write.collection.clone()).or_default();
            match position {
                Some(index) => rows[index] = write.record.clone(),
                None => rows.push(write.record.clone()),
            }
            records.insert(write.handle, write.record);
        }
        debug!("memory context saved {} entities", records.len());

        Ok(SaveReceipt {
            records,
            saved_at: Utc::now(),
        })
    }
}
