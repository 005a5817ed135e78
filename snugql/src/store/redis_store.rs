use std::collections::HashMap;

use chrono::Utc;
use log::debug;
use redis::{Client, aio::ConnectionManager, cmd};

use super::{ChangeSet, DataContext, EntityQuery, SaveReceipt, StagedEntity};
use crate::{config::RedisSettings, errors::StoreError, id::id_key, keys::KeyContext, record::Record};

/// RedisJSON-backed data context.
///
/// Each entity is one JSON document at `prefix:namespace:collection:id`.
/// A save reserves integer identities with `INCRBY`, checks that updated
/// documents still exist and inserted ones do not, then writes everything in a
/// single `MULTI`/`EXEC` block.
pub struct RedisContext {
    conn: ConnectionManager,
    prefix: String,
    namespace: String,
    changes: ChangeSet,
}

impl RedisContext {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            namespace: namespace.into(),
            changes: ChangeSet::default(),
        }
    }

    pub async fn connect(settings: &RedisSettings) -> Result<Self, StoreError> {
        let client = Client::open(settings.resolved_url()?)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self::new(conn, settings.prefix.clone(), settings.namespace.clone()))
    }

    fn keys(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix, &self.namespace)
    }

    /// Writes rows directly, outside of any submission.
    pub async fn seed<I>(&mut self, collection: &str, id_field: &str, records: I) -> Result<(), StoreError>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut pipe = redis::pipe();
        let mut max_int_id = None;
        for record in records {
            let id = record.value(id_field);
            if id.is_null() {
                return Err(StoreError::other(format!("seeded `{collection}` row has no `{id_field}`")));
            }
            if let Some(value) = id.as_i64() {
                max_int_id = max_int_id.max(Some(value));
            }
            let key = self.keys().entity(collection, &id_key(&id));
            pipe.cmd("JSON.SET").arg(key).arg("$").arg(serde_json::to_string(&record)?).ignore();
        }
        if let Some(max) = max_int_id {
            // Keep generated identities clear of the seeded ones.
            let sequence = self.keys().sequence(collection);
            let current: Option<i64> = cmd("GET").arg(&sequence).query_async(&mut self.conn).await?;
            if current.unwrap_or(0) < max {
                pipe.cmd("SET").arg(sequence).arg(max).ignore();
            }
        }
        pipe.query_async::<()>(&mut self.conn).await?;
        Ok(())
    }

    /// Removes every key of the given collections, the identity counters included.
    pub async fn purge(&mut self, collections: &[&str]) -> Result<(), StoreError> {
        for collection in collections {
            let pattern = self.keys().collection_pattern(collection);
            let mut cursor: u64 = 0;
            loop {
                let (next_cursor, batch): (u64, Vec<String>) = cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(512)
                    .query_async(&mut self.conn)
                    .await?;
                if !batch.is_empty() {
                    cmd("DEL").arg(&batch).query_async::<()>(&mut self.conn).await?;
                }
                cursor = next_cursor;
                if cursor == 0 {
                    break;
                }
            }
        }
        Ok(())
    }
}

impl DataContext for RedisContext {
    async fn query(&mut self, query: &EntityQuery) -> Result<Vec<Record>, StoreError> {
        if query.ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = query
            .ids
            .iter()
            .map(|id| self.keys().entity(&query.collection, &id_key(id)))
            .collect();
        let documents: Vec<Option<String>> = cmd("JSON.MGET").arg(&keys).arg("$").query_async(&mut self.conn).await?;

        let mut rows = Vec::new();
        for document in documents.into_iter().flatten() {
            // `$` paths answer with an array holding the root document.
            let matches: Vec<Record> = serde_json::from_str(&document)?;
            rows.extend(matches.iter().map(|record| query.shape(record)));
        }
        Ok(rows)
    }

    fn add_range(&mut self, collection: &str, entities: Vec<StagedEntity>) {
        self.changes.stage(collection, entities, true);
    }

    fn update_range(&mut self, collection: &str, entities: Vec<StagedEntity>) {
        self.changes.stage(collection, entities, false);
    }

    async fn save(&mut self) -> Result<SaveReceipt, StoreError> {
        let changes = std::mem::take(&mut self.changes);
        if changes.is_empty() {
            return Ok(SaveReceipt {
                records: HashMap::new(),
                saved_at: Utc::now(),
            });
        }

        let mut reserved = HashMap::new();
        for (collection, count) in changes.sequence_demand() {
            let sequence = self.keys().sequence(&collection);
            let last: i64 = cmd("INCRBY").arg(sequence).arg(count).query_async(&mut self.conn).await?;
            reserved.insert(collection, last - count + 1);
        }
        let writes = changes.resolve(reserved)?;

        let keys: Vec<String> = writes
            .iter()
            .map(|write| self.keys().entity(&write.collection, &id_key(&write.id)))
            .collect();
        let mut probe = redis::pipe();
        for key in &keys {
            probe.cmd("EXISTS").arg(key);
        }
        let existing: Vec<bool> = probe.query_async(&mut self.conn).await?;
        for (write, exists) in writes.iter().zip(&existing) {
            if write.is_insert == *exists {
                return Err(StoreError::Conflict {
                    collection: write.collection.clone(),
                    id: id_key(&write.id),
                    message: if write.is_insert {
                        "identity already taken".into()
                    } else {
                        "entity no longer exists".into()
                    },
                });
            }
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for (write, key) in writes.iter().zip(&keys) {
            pipe.cmd("JSON.SET")
                .arg(key)
                .arg("$")
                .arg(serde_json::to_string(&write.record)?)
                .ignore();
        }
        pipe.query_async::<()>(&mut self.conn).await?;
        debug!("redis context saved {} entities", writes.len());

        let records = writes
            .into_iter()
            .map(|write| (write.handle, write.record))
            .collect::<HashMap<_, _>>();
        Ok(SaveReceipt {
            records,
            saved_at: Utc::now(),
        })
    }
}

impl std::fmt::Debug for RedisContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisContext")
            .field("prefix", &self.prefix)
            .field("namespace", &self.namespace)
            .finish()
    }
}

