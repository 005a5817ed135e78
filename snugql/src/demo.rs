//! A small People/Departments schema, used by the `snugql` binary and the tests.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use serde_json::{Value, json};

use crate::{
    context::ExecutionContext,
    errors::{CallbackError, SchemaError},
    id::id_key,
    record::Record,
    registry::Schema,
    types::{EntityDescriptor, FieldDescriptor, RelationKind, ValidationRule, ready},
};

pub const PEOPLE: &str = "people";
pub const DEPARTMENTS: &str = "departments";

/// Role allowed to see restricted departments and move people between departments.
pub const ADMIN_ROLE: &str = "admin";
/// Role that may read but never save.
pub const READ_ONLY_ROLE: &str = "readonly";

#[derive(Debug, Clone)]
struct DepartmentEntry {
    id: Value,
    name: String,
    restricted: bool,
}

/// Department names by id, shared by the `departmentName` loader and save hook.
#[derive(Debug, Clone, Default)]
pub struct DepartmentDirectory {
    entries: Arc<RwLock<HashMap<String, DepartmentEntry>>>,
}

impl DepartmentDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the directory from stored department rows.
    pub fn from_records<'a, I>(records: I) -> Self
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let directory = Self::new();
        for record in records {
            if let Some(name) = record.get("name").and_then(Value::as_str) {
                let restricted = record.value("restricted") == json!(true);
                directory.insert(record.value("id"), name, restricted);
            }
        }
        directory
    }

    pub fn insert(&self, id: Value, name: impl Into<String>, restricted: bool) {
        if let Ok(mut entries) = self.entries.write() {
            let entry = DepartmentEntry {
                id: id.clone(),
                name: name.into(),
                restricted,
            };
            entries.insert(id_key(&id), entry);
        }
    }

    pub fn name_of(&self, id: &Value) -> Option<String> {
        let entries = self.entries.read().ok()?;
        entries.get(&id_key(id)).map(|entry| entry.name.clone())
    }

    /// Looks a department up by name, case-insensitively. Restricted departments
    /// are only found for administrators, the same rule the department security
    /// filter applies.
    pub fn id_visible_to(&self, ctx: &ExecutionContext, name: &str) -> Option<Value> {
        let entries = self.entries.read().ok()?;
        entries
            .values()
            .filter(|entry| !entry.restricted || ctx.has_role(ADMIN_ROLE))
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.id.clone())
    }
}

pub fn departments() -> EntityDescriptor {
    EntityDescriptor::new("Department", DEPARTMENTS)
        .field(
            FieldDescriptor::scalar("name")
                .mandatory()
                .validate(ValidationRule::Length { min: Some(1), max: Some(80) }),
        )
        .field(FieldDescriptor::scalar("restricted").default_value(|_| json!(false)))
        .security_filter(|ctx, record| ctx.has_role(ADMIN_ROLE) || record.value("restricted") != json!(true))
}

pub fn people(directory: DepartmentDirectory) -> EntityDescriptor {
    let names = directory.clone();
    EntityDescriptor::new("Person", PEOPLE)
        .field(
            FieldDescriptor::scalar("fullName")
                .mandatory_on_create()
                .validate(ValidationRule::Length { min: Some(1), max: Some(120) }),
        )
        .field(
            FieldDescriptor::scalar("salary")
                .mandatory_on_update()
                .validate(ValidationRule::Range { min: Some(0.0), max: None }),
        )
        .field(FieldDescriptor::reference("managerId", PEOPLE, RelationKind::Association))
        .field(FieldDescriptor::reference("departmentId", DEPARTMENTS, RelationKind::Aggregation))
        .field(
            FieldDescriptor::from_batch("departmentName", move |_ctx: &ExecutionContext, entities: &[Record]| {
                let values: Vec<Value> = entities
                    .iter()
                    .map(|entity| {
                        names
                            .name_of(&entity.value("departmentId"))
                            .map(Value::String)
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                ready(Ok(values))
            })
            .editable_if(
                |change| change.context.has_role(ADMIN_ROLE),
                |_| "only administrators may move people between departments".to_string(),
            )
            .save(move |ctx, entity, value| {
                let target = value
                    .as_str()
                    .map(|name| (name.to_string(), directory.id_visible_to(ctx, name)));
                Box::pin(async move {
                    match target {
                        None => entity.set("departmentId", Value::Null),
                        Some((_, Some(id))) => entity.set("departmentId", id),
                        Some((name, None)) => {
                            return Err(CallbackError::new(format!("unknown department `{name}`")));
                        }
                    }
                    Ok::<(), CallbackError>(())
                })
            }),
        )
        .can_save(|ctx, _entity, _is_new| {
            let allowed = !ctx.has_role(READ_ONLY_ROLE);
            ready(Ok(allowed))
        })
}

/// The People/Departments schema.
pub fn schema(directory: DepartmentDirectory) -> Result<Schema, SchemaError> {
    Schema::builder().entity(people(directory)).entity(departments()).build()
}
