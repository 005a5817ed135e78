use anyhow::{Result, bail};
use clap::Subcommand;
use comfy_table::{Cell, Table};
use serde::Serialize;

use snugql::{
    EditableMode, EntityDescriptor, FieldDescriptor, FieldKind, RelationKind, Schema,
    demo::{self, DepartmentDirectory},
};

use crate::examples::ExampleGroup;
use crate::output::{OutputManager, TableDisplay};
use crate::theme::MARKS;

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Schema Overview",
        commands: &[
            "snugql schema show                # List every collection and its fields",
            "snugql schema show people         # Fields of the people collection only",
            "snugql --output json schema show  # Machine readable field list",
        ],
    },
    ExampleGroup {
        title: "References",
        commands: &["snugql schema references departments  # Who points at departments"],
    },
];

#[derive(Subcommand)]
pub enum SchemaCommands {
    /// List the fields of one or all collections
    #[command(name = "show")]
    Show {
        /// Collection to show (optional, shows all if omitted)
        collection: Option<String>,
    },

    /// List the reference fields that target a collection
    #[command(name = "references")]
    References {
        /// Target collection
        collection: String,
    },
}

pub fn handle_schema_commands(command: SchemaCommands, output: &OutputManager) -> Result<()> {
    let schema = demo::schema(DepartmentDirectory::new())?;

    match command {
        SchemaCommands::Show { collection } => handle_show(&schema, collection.as_deref(), output),
        SchemaCommands::References { collection } => handle_references(&schema, &collection, output),
    }
}

fn handle_show(schema: &Schema, collection: Option<&str>, output: &OutputManager) -> Result<()> {
    let entities: Vec<&EntityDescriptor> = match collection {
        Some(name) => match schema.entity(name) {
            Some(entity) => vec![entity.as_ref()],
            None => bail!("Unknown collection `{name}`"),
        },
        None => schema.entities().map(|entity| entity.as_ref()).collect(),
    };

    let listing = SchemaListing {
        fields: entities
            .iter()
            .flat_map(|entity| entity.fields.iter().map(|field| FieldRow::describe(entity, field)))
            .collect(),
    };
    output.verbose(&format!("{} field(s) across {} collection(s)", listing.fields.len(), entities.len()));
    output.display(&listing)
}

fn handle_references(schema: &Schema, collection: &str, output: &OutputManager) -> Result<()> {
    if schema.entity(collection).is_none() {
        bail!("Unknown collection `{collection}`");
    }

    let incoming = schema.incoming_references(collection);
    output.heading(&format!("References to {collection}"));
    if incoming.is_empty() {
        output.info("No entity type references this collection");
        return Ok(());
    }
    for reference in incoming {
        let marker = match reference.relation {
            RelationKind::Aggregation => format!(" {}", MARKS.owned),
            RelationKind::Association => String::new(),
        };
        output.bullet(&format!(
            "{}.{} ({:?}){marker}",
            reference.source_collection, reference.field, reference.relation
        ));
    }
    Ok(())
}

#[derive(Serialize)]
struct SchemaListing {
    fields: Vec<FieldRow>,
}

#[derive(Serialize)]
struct FieldRow {
    collection: String,
    field: String,
    kind: String,
    required: String,
    editable: String,
    writable: bool,
}

impl FieldRow {
    fn describe(entity: &EntityDescriptor, field: &FieldDescriptor) -> Self {
        let kind = match &field.kind {
            _ if field.is_identity => format!("identity ({:?})", entity.id_kind).to_lowercase(),
            FieldKind::Scalar => "scalar".to_string(),
            FieldKind::Calculated { loader, .. } if loader.is_some() => "calculated (batched)".to_string(),
            FieldKind::Calculated { .. } => "calculated".to_string(),
            FieldKind::Reference(reference) => format!("{:?} -> {}", reference.relation, reference.target),
        };
        let required = match (field.mandatory_on_create, field.mandatory_on_update) {
            (true, true) => "always",
            (true, false) => "on create",
            (false, true) => "on update",
            (false, false) => "",
        };
        let editable = match field.editable {
            EditableMode::Never => "never",
            EditableMode::Always => "always",
            EditableMode::Predicate { .. } => "conditional",
            EditableMode::Batched { .. } => "conditional (batched)",
        };
        Self {
            collection: entity.collection.clone(),
            field: field.name.clone(),
            kind,
            required: required.to_string(),
            editable: editable.to_string(),
            writable: field.is_writable(),
        }
    }
}

impl TableDisplay for SchemaListing {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Collection", "Field", "Kind", "Required", "Editable", "Writable"]);
        for row in &self.fields {
            table.add_row(vec![
                Cell::new(&row.collection),
                Cell::new(&row.field),
                Cell::new(&row.kind),
                Cell::new(&row.required),
                Cell::new(&row.editable),
                Cell::new(if row.writable { MARKS.saved } else { "" }),
            ]);
        }
        table
    }

    fn to_compact(&self) -> String {
        self.fields
            .iter()
            .map(|row| format!("{}.{}", row.collection, row.field))
            .collect::<Vec<_>>()
            .join(" ")
    }
}
