use std::collections::{HashMap, HashSet};

use log::debug;
use serde_json::Value;

use super::{EntityResult, SubmissionPlan, SubmitOutput};
use crate::{
    context::ExecutionContext,
    errors::{MutationError, StoreError},
    id::id_key,
    payload::{FieldSelection, PayloadTree, Selection},
    record::Record,
    store::{DataContext, EntityQuery},
    types::{AffectedEntity, EntityDescriptor, FieldKind},
};

/// Builds the output in input order, re-reading only what the selection asks for.
///
/// A collection with no selection, or one selecting only the identity field,
/// costs no query. Otherwise its persisted entities are re-read with a single
/// query, and each batched calculated field runs its loader once.
pub(crate) async fn correlate<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    payload: &PayloadTree,
    selection: &Selection,
    plan: &SubmissionPlan<'_>,
    side_effects: Vec<AffectedEntity>,
) -> Result<SubmitOutput, MutationError>
where
    C: DataContext,
{
    let mut output = SubmitOutput {
        side_effects,
        ..SubmitOutput::default()
    };

    for (collection, inputs) in payload.collections() {
        let nodes: Vec<usize> = inputs
            .iter()
            .filter_map(|input| plan.lookup(collection, &input.client_id))
            .collect();
        let ids: Vec<Value> = nodes.iter().map(|&node| plan.records[node].persisted_id()).collect();

        let payloads = match (nodes.first(), selection.get(collection)) {
            (Some(&first), Some(fields)) if !fields.is_empty() => {
                let descriptor = &plan.records[first].descriptor;
                if fields.fields.iter().all(|field| *field == descriptor.id_field) {
                    ids.iter()
                        .map(|id| Some(Record::new().with(descriptor.id_field.clone(), id.clone())))
                        .collect()
                } else {
                    load_payloads(ctx, data, descriptor, &ids, fields).await?
                }
            }
            _ => vec![None; nodes.len()],
        };

        let results = nodes
            .iter()
            .zip(ids)
            .zip(payloads)
            .map(|((&node, id), payload)| EntityResult {
                client_id: plan.records[node].input.client_id.clone(),
                id,
                payload,
            })
            .collect();
        output.collections.insert(collection.to_string(), results);
    }
    Ok(output)
}

async fn load_payloads<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    descriptor: &EntityDescriptor,
    ids: &[Value],
    selection: &FieldSelection,
) -> Result<Vec<Option<Record>>, MutationError>
where
    C: DataContext,
{
    let calculated: Vec<_> = selection
        .fields
        .iter()
        .filter_map(|name| descriptor.get_field(name))
        .filter(|field| field.is_calculated())
        .collect();

    let mut seen = HashSet::new();
    let unique_ids: Vec<Value> = ids.iter().filter(|id| seen.insert(id_key(id))).cloned().collect();
    let mut query = EntityQuery::by_ids(descriptor.collection.clone(), descriptor.id_field.clone(), unique_ids);
    if calculated.is_empty() {
        query = query.project(selection.fields.clone());
    }
    debug!("re-reading {} `{}` entities for the output", ids.len(), descriptor.collection);
    let rows = data.query(&query).await?;

    let mut by_id: HashMap<String, Record> = HashMap::new();
    for row in rows.into_iter().filter(|row| descriptor.permits(ctx, row)) {
        by_id.insert(id_key(&row.value(&descriptor.id_field)), row);
    }

    let found: Vec<Record> = ids
        .iter()
        .filter_map(|id| by_id.get(&id_key(id)).cloned())
        .collect();
    let mut computed: HashMap<&str, Vec<Value>> = HashMap::new();
    for field in &calculated {
        let values = match &field.kind {
            FieldKind::Calculated {
                loader: Some(loader), ..
            } => loader(ctx, &found).await.map_err(|err| {
                StoreError::other(format!("loading `{}` of {} failed: {err}", field.name, descriptor.name))
            })?,
            FieldKind::Calculated {
                getter: Some(getter), ..
            } => found.iter().map(|row| getter(row)).collect(),
            _ => continue,
        };
        computed.insert(field.name.as_str(), values);
    }

    let mut position = 0;
    let mut payloads = Vec::with_capacity(ids.len());
    for id in ids {
        let Some(row) = by_id.get(&id_key(id)) else {
            payloads.push(None);
            continue;
        };
        let mut payload = Record::new();
        for name in &selection.fields {
            let value = match computed.get(name.as_str()) {
                Some(values) => values.get(position).cloned().unwrap_or(Value::Null),
                None => row.value(name),
            };
            payload.set(name.clone(), value);
        }
        payloads.push(Some(payload));
        position += 1;
    }
    Ok(payloads)
}
