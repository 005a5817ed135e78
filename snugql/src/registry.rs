use std::sync::Arc;

use indexmap::IndexMap;

use crate::{
    errors::SchemaError,
    types::{EntityDescriptor, FieldKind, RelationKind, ValidationRule},
};

/// The read-only set of entity descriptors a submission runs against.
///
/// Built once at startup; cloning is cheap and shares the descriptors.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: IndexMap<String, Arc<EntityDescriptor>>,
}

impl Schema {
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    pub fn entity(&self, collection: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(collection)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Arc<EntityDescriptor>> {
        self.entities.values()
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Reference fields of any entity type that point at `target_collection`.
    pub fn incoming_references(&self, target_collection: &str) -> Vec<IncomingReference> {
        let mut incoming = Vec::new();
        for descriptor in self.entities.values() {
            for (field, reference) in descriptor.references() {
                if reference.target == target_collection {
                    incoming.push(IncomingReference {
                        source_collection: descriptor.collection.clone(),
                        field: field.name.clone(),
                        relation: reference.relation,
                    });
                }
            }
        }
        incoming
    }
}

/// A reference field pointing at a collection from some entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingReference {
    pub source_collection: String,
    pub field: String,
    pub relation: RelationKind,
}

#[derive(Debug, Default)]
pub struct SchemaBuilder {
    entities: Vec<EntityDescriptor>,
}

impl SchemaBuilder {
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities.push(descriptor);
        self
    }

    /// Validates the descriptors against each other and freezes them.
    pub fn build(self) -> Result<Schema, SchemaError> {
        let mut entities: IndexMap<String, Arc<EntityDescriptor>> = IndexMap::new();
        for descriptor in self.entities {
            validate_descriptor(&descriptor)?;
            if entities.contains_key(&descriptor.collection) {
                return Err(SchemaError::new(format!(
                    "collection `{}` is registered more than once",
                    descriptor.collection
                )));
            }
            entities.insert(descriptor.collection.clone(), Arc::new(descriptor));
        }

        for descriptor in entities.values() {
            for (field, reference) in descriptor.references() {
                if !entities.contains_key(&reference.target) {
                    return Err(SchemaError::new(format!(
                        "field `{}` of {} references collection `{}`, which is not registered",
                        field.name, descriptor.name, reference.target
                    )));
                }
            }
        }

        Ok(Schema { entities })
    }
}

fn validate_descriptor(descriptor: &EntityDescriptor) -> Result<(), SchemaError> {
    let identities: Vec<_> = descriptor.fields.iter().filter(|field| field.is_identity).collect();
    match identities.as_slice() {
        [identity] if identity.name == descriptor.id_field => {}
        _ => {
            return Err(SchemaError::new(format!(
                "{} must declare exactly one identity field named `{}`",
                descriptor.name, descriptor.id_field
            )));
        }
    }

    for (index, field) in descriptor.fields.iter().enumerate() {
        if descriptor.fields[..index].iter().any(|earlier| earlier.name == field.name) {
            return Err(SchemaError::new(format!(
                "field `{}` is declared twice on {}",
                field.name, descriptor.name
            )));
        }
        if let FieldKind::Calculated { loader: None, getter: None } = field.kind {
            return Err(SchemaError::new(format!(
                "calculated field `{}` of {} has neither a loader nor a getter",
                field.name, descriptor.name
            )));
        }
        if field.reference_target().is_some() && field.save.is_some() {
            return Err(SchemaError::new(format!(
                "reference field `{}` of {} cannot use a save hook",
                field.name, descriptor.name
            )));
        }
        for rule in &field.validations {
            if let ValidationRule::Regex { pattern } = rule
                && let Err(err) = regex::Regex::new(pattern)
            {
                return Err(SchemaError::new(format!(
                    "field `{}` of {} has an invalid pattern: {err}",
                    field.name, descriptor.name
                )));
            }
        }
    }
    Ok(())
}
