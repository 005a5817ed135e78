use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::Args;
use comfy_table::{Cell, Table};
use serde::Serialize;
use serde_json::Value;

use snugql::{
    EngineConfig, ExecutionContext, MemoryContext, MutationEngine, PayloadTree, Selection, SubmitOutput,
    demo::{self, DepartmentDirectory},
};

use crate::examples::ExampleGroup;
use crate::output::{OutputManager, TableDisplay};

pub const EXAMPLES: &[ExampleGroup] = &[
    ExampleGroup {
        title: "Submit",
        commands: &[
            "snugql submit --payload people.json --select people=id,fullName",
            "snugql submit --payload move.json --role admin --select people=departmentName",
        ],
    },
    ExampleGroup {
        title: "Store File",
        commands: &[
            "snugql submit --payload people.json --store data/company.json",
            "snugql --output json submit --payload people.json   # Print the raw output document",
        ],
    },
];

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// JSON file holding `{ "<collection>": [ {...}, ... ] }`
    #[arg(long)]
    pub payload: PathBuf,

    /// JSON store file, created when missing and rewritten after a successful save
    #[arg(long, default_value = "snugql-store.json")]
    pub store: PathBuf,

    /// Fields to return, as `collection=field1,field2` (repeatable)
    #[arg(long = "select", value_name = "COLLECTION=FIELDS")]
    pub selections: Vec<String>,

    /// Role granted to the caller (repeatable)
    #[arg(long = "role")]
    pub roles: Vec<String>,

    /// Name of the calling principal
    #[arg(long)]
    pub principal: Option<String>,
}

pub async fn handle_submit(args: SubmitArgs, config_path: &Path, output: &OutputManager) -> Result<()> {
    let config = EngineConfig::load(config_path)
        .with_context(|| format!("Failed to read configuration {}", config_path.display()))?;
    if !args.store.exists() {
        output.warning(&format!("Store {} does not exist yet, starting empty", args.store.display()));
    }
    let mut store = load_store(&args.store)?;
    output.verbose(&format!("Loaded store {}", args.store.display()));

    let directory = DepartmentDirectory::from_records(store.records(demo::DEPARTMENTS));
    let engine = MutationEngine::with_config(demo::schema(directory)?, config);

    let document: Value = serde_json::from_str(
        &std::fs::read_to_string(&args.payload)
            .with_context(|| format!("Failed to read payload {}", args.payload.display()))?,
    )
    .context("Payload is not valid JSON")?;
    let payload = PayloadTree::from_json(engine.schema(), &document)?;
    let selection = parse_selection(&args.selections)?;

    let mut ctx = match args.principal {
        Some(principal) => ExecutionContext::for_principal(principal),
        None => ExecutionContext::new(),
    };
    for role in args.roles {
        ctx = ctx.with_role(role);
    }

    let result = engine.submit(&ctx, &mut store, &payload, &selection).await?;
    save_store(&args.store, &store)?;

    output.success(&format!("Submitted {} entit(ies)", payload.len()));
    output.display(&SubmitReport(result))
}

/// Opens the store file, starting empty when it does not exist yet.
fn load_store(path: &Path) -> Result<MemoryContext> {
    if !path.exists() {
        return Ok(MemoryContext::new());
    }
    let content = std::fs::read_to_string(path).with_context(|| format!("Failed to read store {}", path.display()))?;
    let value: Value = serde_json::from_str(&content).context("Store file is not valid JSON")?;
    Ok(MemoryContext::from_json(&value)?)
}

fn save_store(path: &Path, store: &MemoryContext) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(&store.to_json())?;
    std::fs::write(path, content).with_context(|| format!("Failed to write store {}", path.display()))
}

fn parse_selection(specs: &[String]) -> Result<Selection> {
    let mut selection = Selection::new();
    for spec in specs {
        let (collection, fields) = spec
            .split_once('=')
            .ok_or_else(|| anyhow!("Selection `{spec}` must look like collection=field1,field2"))?;
        let fields: Vec<&str> = fields
            .split(',')
            .map(str::trim)
            .filter(|field| !field.is_empty())
            .collect();
        selection = selection.select(collection.trim(), fields);
    }
    Ok(selection)
}

#[derive(Serialize)]
#[serde(transparent)]
struct SubmitReport(SubmitOutput);

impl TableDisplay for SubmitReport {
    fn to_table(&self, output: &OutputManager) -> Table {
        let mut table = output.create_table(&["Collection", "Client id", "Id", "Payload"]);
        for (collection, results) in &self.0.collections {
            for result in results {
                let payload = result
                    .payload
                    .as_ref()
                    .map(|record| Value::Object(record.as_map().clone()).to_string())
                    .unwrap_or_default();
                table.add_row(vec![
                    Cell::new(collection),
                    Cell::new(result.client_id.to_string()),
                    Cell::new(result.id.to_string()),
                    Cell::new(payload),
                ]);
            }
        }
        table
    }

    fn to_compact(&self) -> String {
        self.0.to_json().to_string()
    }
}
