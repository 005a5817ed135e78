//! Parsed mutation input and the argument validation that runs before the engine.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::{
    config::EngineConfig,
    errors::{ValidationError, ValidationIssue, ValidationResult},
    id::id_key,
    registry::Schema,
};

/// One element of a submitted collection.
///
/// `fields` only holds what the payload supplied: a missing key means "not
/// specified", which is different from an explicit `null`.
#[derive(Debug, Clone, PartialEq)]
pub struct InputEntity {
    pub collection: String,
    /// Index within the submitted collection.
    pub position: usize,
    pub client_id: Value,
    pub fields: Map<String, Value>,
}

impl InputEntity {
    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    fn path(&self, field: &str) -> String {
        format!("{}[{}].{}", self.collection, self.position, field)
    }
}

/// Input entities grouped by collection, in submission order.
#[derive(Debug, Clone, Default)]
pub struct PayloadTree {
    collections: IndexMap<String, Vec<InputEntity>>,
}

impl PayloadTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `{ "<collection>": [ { "<id field>": ..., ... }, ... ], ... }`.
    pub fn from_json(schema: &Schema, value: &Value) -> ValidationResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::single("payload", "input.invalid_type", "expected an object keyed by collection")
        })?;

        let mut tree = Self::new();
        let mut issues = Vec::new();
        for (collection, entries) in object {
            let Some(descriptor) = schema.entity(collection) else {
                issues.push(ValidationIssue::new(
                    collection.clone(),
                    "input.unknown_collection",
                    format!("collection `{collection}` is not defined"),
                ));
                continue;
            };
            let Some(entries) = entries.as_array() else {
                issues.push(ValidationIssue::new(
                    collection.clone(),
                    "input.invalid_type",
                    "expected a list of entities",
                ));
                continue;
            };
            for (position, entry) in entries.iter().enumerate() {
                let Some(object) = entry.as_object() else {
                    issues.push(ValidationIssue::new(
                        format!("{collection}[{position}]"),
                        "input.invalid_type",
                        "expected an object",
                    ));
                    continue;
                };
                let mut fields = object.clone();
                let Some(client_id) = fields.remove(&descriptor.id_field) else {
                    issues.push(ValidationIssue::new(
                        format!("{collection}[{position}].{}", descriptor.id_field),
                        "input.required",
                        format!("field `{}` is required", descriptor.id_field),
                    ));
                    continue;
                };
                tree.push(collection.clone(), client_id, fields);
            }
        }

        if issues.is_empty() {
            Ok(tree)
        } else {
            Err(ValidationError::new(issues))
        }
    }

    /// Appends an entity to `collection` and returns its position.
    pub fn push(&mut self, collection: impl Into<String>, client_id: Value, fields: Map<String, Value>) -> usize {
        let collection = collection.into();
        let entries = self.collections.entry(collection.clone()).or_default();
        let position = entries.len();
        entries.push(InputEntity {
            collection,
            position,
            client_id,
            fields,
        });
        position
    }

    pub fn collection(&self, name: &str) -> &[InputEntity] {
        self.collections.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn collections(&self) -> impl Iterator<Item = (&str, &[InputEntity])> {
        self.collections
            .iter()
            .map(|(name, entries)| (name.as_str(), entries.as_slice()))
    }

    /// All entities, collection by collection, in submission order.
    pub fn entities(&self) -> impl Iterator<Item = &InputEntity> {
        self.collections.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output fields requested for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSelection {
    pub fields: Vec<String>,
}

impl FieldSelection {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|candidate| candidate == field)
    }
}

/// Output fields requested per collection. Collections without an entry get no payload.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    collections: IndexMap<String, FieldSelection>,
}

impl Selection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, collection: impl Into<String>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.collections.insert(collection.into(), FieldSelection::new(fields));
        self
    }

    /// Parses `{ "<collection>": ["field", ...] }`.
    pub fn from_json(value: &Value) -> ValidationResult<Self> {
        let object = value.as_object().ok_or_else(|| {
            ValidationError::single("selection", "selection.invalid_type", "expected an object keyed by collection")
        })?;
        let mut selection = Self::new();
        for (collection, fields) in object {
            let names = fields
                .as_array()
                .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>())
                .ok_or_else(|| {
                    ValidationError::single(
                        format!("selection.{collection}"),
                        "selection.invalid_type",
                        "expected a list of field names",
                    )
                })?;
            selection = selection.select(collection.clone(), names);
        }
        Ok(selection)
    }

    pub fn get(&self, collection: &str) -> Option<&FieldSelection> {
        self.collections.get(collection)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSelection)> {
        self.collections.iter().map(|(name, fields)| (name.as_str(), fields))
    }
}

/// Input-type validation, performed before any data context call.
///
/// Checks shape only: known collections and fields, identity and reference
/// value types, duplicate client ids, and fields that are mandatory when
/// updating an existing entity.
pub fn validate_input(
    schema: &Schema,
    payload: &PayloadTree,
    selection: &Selection,
    config: &EngineConfig,
) -> ValidationResult<()> {
    let mut issues = Vec::new();

    if payload.len() > config.engine.max_entities {
        issues.push(ValidationIssue::new(
            "payload",
            "input.too_many_entities",
            format!(
                "submission holds {} entities, the limit is {}",
                payload.len(),
                config.engine.max_entities
            ),
        ));
    }

    for (collection, entities) in payload.collections() {
        let Some(descriptor) = schema.entity(collection) else {
            issues.push(ValidationIssue::new(
                collection,
                "input.unknown_collection",
                format!("collection `{collection}` is not defined"),
            ));
            continue;
        };

        let mut seen_ids = HashSet::new();
        for entity in entities {
            if !descriptor.id_kind.accepts(&entity.client_id) {
                issues.push(ValidationIssue::new(
                    entity.path(&descriptor.id_field),
                    "input.invalid_id",
                    format!("`{}` is not a valid {:?} identity", entity.client_id, descriptor.id_kind),
                ));
                continue;
            }
            if !seen_ids.insert(id_key(&entity.client_id)) {
                issues.push(ValidationIssue::new(
                    entity.path(&descriptor.id_field),
                    "input.duplicate_id",
                    format!("id {} appears more than once in `{collection}`", entity.client_id),
                ));
            }

            for (name, value) in &entity.fields {
                let Some(field) = descriptor.get_field(name) else {
                    issues.push(ValidationIssue::new(
                        entity.path(name),
                        "input.unknown_field",
                        format!("field `{name}` is not defined on {}", descriptor.name),
                    ));
                    continue;
                };
                if !field.is_writable() {
                    issues.push(ValidationIssue::new(
                        entity.path(name),
                        "input.read_only",
                        format!("field `{name}` of {} cannot be set", descriptor.name),
                    ));
                    continue;
                }
                if let Some(reference) = field.reference_target()
                    && !value.is_null()
                    && let Some(target) = schema.entity(&reference.target)
                    && !target.id_kind.accepts(value)
                {
                    issues.push(ValidationIssue::new(
                        entity.path(name),
                        "input.invalid_reference",
                        format!("`{value}` is not a valid {} identity", target.name),
                    ));
                }
            }

            if descriptor.is_fake_id(&entity.client_id) {
                continue;
            }
            for field in descriptor.fields.iter().filter(|field| field.mandatory_on_update) {
                if entity.get(&field.name).is_none_or(Value::is_null) {
                    issues.push(ValidationIssue::new(
                        entity.path(&field.name),
                        "input.required",
                        format!(
                            "field `{}` of {} is required when updating an existing entity",
                            field.name, descriptor.name
                        ),
                    ));
                }
            }
        }
    }

    for (collection, fields) in selection.iter() {
        let Some(descriptor) = schema.entity(collection) else {
            issues.push(ValidationIssue::new(
                format!("selection.{collection}"),
                "selection.unknown_collection",
                format!("collection `{collection}` is not defined"),
            ));
            continue;
        };
        for field in &fields.fields {
            if descriptor.get_field(field).is_none() {
                issues.push(ValidationIssue::new(
                    format!("selection.{collection}.{field}"),
                    "selection.unknown_field",
                    format!("field `{field}` is not defined on {}", descriptor.name),
                ));
            }
        }
    }

    if issues.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(issues))
    }
}
