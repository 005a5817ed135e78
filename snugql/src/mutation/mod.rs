//! The submit pipeline: dependency ordering, entity resolution, field
//! assignment, persistence and result correlation.

mod correlate;
mod fields;
mod graph;
mod persist;
mod resolve;

use std::{collections::HashMap, sync::Arc};

use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Serialize, Serializer, ser::SerializeMap};
use serde_json::Value;

use crate::{
    config::EngineConfig,
    context::ExecutionContext,
    errors::{EntityFailure, EntityRef, MutationError, Operation},
    id::id_key,
    payload::{InputEntity, PayloadTree, Selection, validate_input},
    record::Record,
    registry::Schema,
    store::{DataContext, PendingReference},
    types::{AffectedEntity, EntityDescriptor},
};

pub use graph::DependencyGraph;

/// Runs multi-entity submissions against a [`Schema`].
#[derive(Debug, Clone)]
pub struct MutationEngine {
    schema: Schema,
    config: EngineConfig,
}

impl MutationEngine {
    pub fn new(schema: Schema) -> Self {
        Self::with_config(schema, EngineConfig::default())
    }

    pub fn with_config(schema: Schema, config: EngineConfig) -> Self {
        Self { schema, config }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parses both JSON documents and runs [`MutationEngine::submit`].
    pub async fn submit_json<C>(
        &self,
        ctx: &ExecutionContext,
        data: &mut C,
        payload: &Value,
        selection: &Value,
    ) -> Result<SubmitOutput, MutationError>
    where
        C: DataContext,
    {
        let payload = PayloadTree::from_json(&self.schema, payload)?;
        let selection = Selection::from_json(selection)?;
        self.submit(ctx, data, &payload, &selection).await
    }

    /// Creates or updates every entity of `payload` as one unit.
    ///
    /// Either every entity is persisted through a single [`DataContext::save`]
    /// or nothing is. The output lists, per collection and in input order, the
    /// client id, the persisted id and the selected fields of each entity.
    pub async fn submit<C>(
        &self,
        ctx: &ExecutionContext,
        data: &mut C,
        payload: &PayloadTree,
        selection: &Selection,
    ) -> Result<SubmitOutput, MutationError>
    where
        C: DataContext,
    {
        validate_input(&self.schema, payload, selection, &self.config)?;
        debug!(
            "submission of {} entities across {} collections",
            payload.len(),
            payload.collections().count()
        );

        let mut plan = SubmissionPlan::build(&self.schema, payload);
        plan.order = DependencyGraph::build(&self.schema, &plan).order().map_err(|node| {
            let entity = plan.records[node].entity_ref();
            warn!("circular reference through {entity}");
            MutationError::CircularReference { entity }
        })?;

        resolve::resolve_entities(ctx, data, &mut plan).await?;
        fields::assign_fields(ctx, data, &self.schema, &mut plan).await?;
        if let Some(err) = plan.first_failure() {
            return Err(err);
        }

        let side_effects = persist::persist(ctx, data, &self.config, &mut plan).await?;
        correlate::correlate(ctx, data, payload, selection, &plan, side_effects).await
    }
}

/// Per-entity resolution progress.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResolutionState {
    Pending,
    Resolved,
    Failed(EntityFailure),
}

/// Working state of one input entity as it moves through the pipeline.
#[derive(Debug)]
pub(crate) struct ResolutionRecord<'p> {
    pub input: &'p InputEntity,
    pub descriptor: Arc<EntityDescriptor>,
    pub is_new: bool,
    pub state: ResolutionState,
    /// The entity being built; a blank instance for inserts, the loaded row for updates.
    pub record: Record,
    /// Row as loaded, for updates.
    pub original: Option<Record>,
    pub pending: Vec<PendingReference>,
    /// Final stored record once persisted.
    pub saved: Option<Record>,
}

impl ResolutionRecord<'_> {
    pub fn operation(&self) -> Operation {
        Operation::for_new(self.is_new)
    }

    pub fn entity_ref(&self) -> EntityRef {
        self.descriptor.entity_ref(&self.input.client_id)
    }

    pub fn is_alive(&self) -> bool {
        self.state == ResolutionState::Resolved
    }

    /// Marks the entity failed. Only the first failure of an entity is kept.
    pub fn fail(&mut self, failure: EntityFailure) {
        if matches!(self.state, ResolutionState::Failed(_)) {
            return;
        }
        warn!(
            "cannot {} entity ({}): {failure}",
            self.operation(),
            self.entity_ref()
        );
        self.state = ResolutionState::Failed(failure);
    }

    pub fn error(&self) -> Option<MutationError> {
        match &self.state {
            ResolutionState::Failed(failure) => Some(MutationError::entity(
                self.operation(),
                self.entity_ref(),
                failure.clone(),
            )),
            _ => None,
        }
    }

    /// Identity of the entity after save, or its client id before.
    pub fn persisted_id(&self) -> Value {
        let id_field = &self.descriptor.id_field;
        match &self.saved {
            Some(record) => record.value(id_field),
            None if self.is_new => self.input.client_id.clone(),
            None => self.record.value(id_field),
        }
    }
}

/// All resolution records of a submission, indexed by collection and client id.
#[derive(Debug)]
pub(crate) struct SubmissionPlan<'p> {
    /// In payload order; indices are the node ids used throughout the pipeline.
    pub records: Vec<ResolutionRecord<'p>>,
    /// Processing order: referenced entities before the entities referencing them.
    pub order: Vec<usize>,
    index: HashMap<(String, String), usize>,
}

impl<'p> SubmissionPlan<'p> {
    fn build(schema: &Schema, payload: &'p PayloadTree) -> Self {
        let mut records = Vec::with_capacity(payload.len());
        let mut index = HashMap::with_capacity(payload.len());
        for input in payload.entities() {
            let Some(descriptor) = schema.entity(&input.collection) else {
                continue;
            };
            index.insert((input.collection.clone(), id_key(&input.client_id)), records.len());
            records.push(ResolutionRecord {
                input,
                descriptor: descriptor.clone(),
                is_new: descriptor.is_fake_id(&input.client_id),
                state: ResolutionState::Pending,
                record: Record::new(),
                original: None,
                pending: Vec::new(),
                saved: None,
            });
        }
        let order = (0..records.len()).collect();
        Self { records, order, index }
    }

    /// Node holding the entity of `collection` submitted with client id `id`.
    pub fn lookup(&self, collection: &str, id: &Value) -> Option<usize> {
        self.index.get(&(collection.to_string(), id_key(id))).copied()
    }

    /// Nodes grouped by collection, groups ordered by first appearance in processing order.
    pub fn collection_groups(&self) -> Vec<(String, Vec<usize>)> {
        let mut groups: IndexMap<String, Vec<usize>> = IndexMap::new();
        for &node in &self.order {
            groups
                .entry(self.records[node].input.collection.clone())
                .or_default()
                .push(node);
        }
        groups.into_iter().collect()
    }

    /// Failure of the entity that comes first in processing order.
    pub fn first_failure(&self) -> Option<MutationError> {
        self.order.iter().find_map(|&node| self.records[node].error())
    }
}

/// Result of one submitted entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityResult {
    /// The id the client submitted, placeholder ids included.
    pub client_id: Value,
    /// The stored identity.
    pub id: Value,
    /// Selected fields of the stored entity; `None` when nothing was selected.
    pub payload: Option<Record>,
}

impl Serialize for EntityResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("id", &self.client_id)?;
        if let Some(payload) = &self.payload {
            map.serialize_entry("payload", payload)?;
        }
        map.end()
    }
}

/// Correlated output of a submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmitOutput {
    #[serde(flatten)]
    pub collections: IndexMap<String, Vec<EntityResult>>,
    /// Entities reported by after-save hooks.
    #[serde(rename = "sideEffects", skip_serializing_if = "Vec::is_empty")]
    pub side_effects: Vec<AffectedEntity>,
}

impl SubmitOutput {
    pub fn collection(&self, name: &str) -> &[EntityResult] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
