use std::collections::HashSet;

use log::{debug, trace, warn};
use serde_json::Value;

use super::SubmissionPlan;
use crate::{
    context::ExecutionContext,
    errors::{CallbackError, EntityFailure, MutationError},
    id::id_key,
    record::Record,
    registry::Schema,
    store::{DataContext, EntityQuery, PendingReference, StageHandle},
    types::{EditableMode, FieldChange, FieldDescriptor, FieldKind, ReferenceDescriptor, RelationKind},
    validators::check_value,
};

/// Assigns every field of every resolved entity.
///
/// Work is field-major within each collection: all entities of a collection
/// go through one field before the next field starts, so each batched loader
/// runs once per field over the entities still alive at that point.
pub(crate) async fn assign_fields<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    schema: &Schema,
    plan: &mut SubmissionPlan<'_>,
) -> Result<(), MutationError>
where
    C: DataContext,
{
    for (collection, nodes) in plan.collection_groups() {
        let Some(descriptor) = schema.entity(&collection).cloned() else {
            continue;
        };
        for field in descriptor.fields.iter().filter(|field| !field.is_identity) {
            let candidates: Vec<usize> = nodes
                .iter()
                .copied()
                .filter(|&node| plan.records[node].is_alive())
                .collect();
            if candidates.is_empty() {
                break;
            }

            let writes = collect_writes(ctx, plan, field, &candidates).await;
            if writes.is_empty() {
                continue;
            }
            trace!("assigning `{collection}.{}` on {} entities", field.name, writes.len());
            match &field.kind {
                FieldKind::Reference(reference) => {
                    assign_references(ctx, data, schema, plan, field, reference, writes).await?;
                }
                FieldKind::Scalar | FieldKind::Calculated { .. } => {
                    assign_values(ctx, plan, field, writes).await;
                }
            }
        }
    }
    Ok(())
}

/// Decides which candidates receive a value for `field`, and which value.
///
/// Covers presence (supplied, defaulted, mandatory), editability of updates
/// and declarative value rules. Entities whose value is unchanged are left
/// out. Failing entities are marked and left out as well.
async fn collect_writes(
    ctx: &ExecutionContext,
    plan: &mut SubmissionPlan<'_>,
    field: &FieldDescriptor,
    candidates: &[usize],
) -> Vec<(usize, Value)> {
    let mut writes = Vec::new();
    for &node in candidates {
        let record = &mut plan.records[node];
        let input = record.input;
        let value = match input.get(&field.name) {
            Some(value) => value.clone(),
            None if record.is_new && field.is_writable() => match &field.default_value {
                Some(provider) => provider(&record.record),
                None if field.mandatory_on_create => {
                    record.fail(EntityFailure::MandatoryFieldMissing {
                        field: field.name.clone(),
                    });
                    continue;
                }
                None => continue,
            },
            None => continue,
        };
        if record.is_new && field.mandatory_on_create && value.is_null() {
            record.fail(EntityFailure::MandatoryFieldMissing {
                field: field.name.clone(),
            });
            continue;
        }
        writes.push((node, value));
    }

    let updates: Vec<usize> = writes
        .iter()
        .map(|(node, _)| *node)
        .filter(|&node| !plan.records[node].is_new)
        .collect();
    if !updates.is_empty() {
        let rejected = check_editability(ctx, plan, field, &updates, &writes).await;
        writes.retain(|(node, _)| !rejected.contains(node));
    }

    writes.retain(|(node, value)| {
        let record = &mut plan.records[*node];
        if let Some(message) = check_value(&field.validations, value) {
            record.fail(EntityFailure::InvalidValue {
                field: field.name.clone(),
                message,
            });
            return false;
        }
        true
    });
    writes
}

/// Runs the editability rule of `field` for the updated entities in `writes`.
///
/// Returns the nodes that must not be written: those that failed and those
/// whose value does not change.
async fn check_editability(
    ctx: &ExecutionContext,
    plan: &mut SubmissionPlan<'_>,
    field: &FieldDescriptor,
    updates: &[usize],
    writes: &[(usize, Value)],
) -> HashSet<usize> {
    let mut rejected = HashSet::new();
    let entities: Vec<Record> = updates.iter().map(|&node| plan.records[node].record.clone()).collect();

    let previous = match previous_values(ctx, field, &entities).await {
        Ok(values) => values,
        Err(err) => {
            fail_all(plan, updates, &err);
            return updates.iter().copied().collect();
        }
    };
    let batch = match &field.editable {
        EditableMode::Batched { loader, .. } => {
            debug!("loading editability context of `{}` for {} entities", field.name, entities.len());
            match loader(ctx, &entities).await {
                Ok(values) => Some(values),
                Err(err) => {
                    fail_all(plan, updates, &err);
                    return updates.iter().copied().collect();
                }
            }
        }
        _ => None,
    };

    let null = Value::Null;
    for (position, &node) in updates.iter().enumerate() {
        let Some((_, next)) = writes.iter().find(|(candidate, _)| *candidate == node) else {
            continue;
        };
        let previous = previous.get(position).unwrap_or(&null);
        if previous == next {
            trace!("`{}` unchanged on {}", field.name, plan.records[node].entity_ref());
            rejected.insert(node);
            continue;
        }

        let record = &plan.records[node];
        let change = FieldChange {
            context: ctx,
            entity: &record.record,
            field: &field.name,
            previous,
            next,
            batch: batch.as_ref().and_then(|values| values.get(position)),
        };
        let failure = match &field.editable {
            EditableMode::Always => None,
            EditableMode::Never => Some(EntityFailure::FieldNotEditable {
                field: field.name.clone(),
                entity: record.entity_ref(),
            }),
            EditableMode::Predicate { check, message } | EditableMode::Batched { check, message, .. } => {
                (!check(&change)).then(|| EntityFailure::FieldEditDenied {
                    field: field.name.clone(),
                    entity: record.entity_ref(),
                    message: message(&change),
                })
            }
        };
        if let Some(failure) = failure {
            plan.records[node].fail(failure);
            rejected.insert(node);
        }
    }
    rejected
}

/// Current values of `field`, positional to `entities`.
async fn previous_values(
    ctx: &ExecutionContext,
    field: &FieldDescriptor,
    entities: &[Record],
) -> Result<Vec<Value>, CallbackError> {
    match &field.kind {
        FieldKind::Calculated {
            loader: Some(loader), ..
        } => {
            debug!("loading current `{}` for {} entities", field.name, entities.len());
            let values = loader(ctx, entities).await?;
            if values.len() != entities.len() {
                warn!(
                    "loader of `{}` returned {} values for {} entities",
                    field.name,
                    values.len(),
                    entities.len()
                );
            }
            Ok(values)
        }
        FieldKind::Calculated {
            getter: Some(getter), ..
        } => Ok(entities.iter().map(|entity| getter(entity)).collect()),
        _ => Ok(entities.iter().map(|entity| entity.value(&field.name)).collect()),
    }
}

fn fail_all(plan: &mut SubmissionPlan<'_>, nodes: &[usize], err: &CallbackError) {
    for &node in nodes {
        plan.records[node].fail(EntityFailure::Rejected(err.message.clone()));
    }
}

async fn assign_values(
    ctx: &ExecutionContext,
    plan: &mut SubmissionPlan<'_>,
    field: &FieldDescriptor,
    writes: Vec<(usize, Value)>,
) {
    for (node, value) in writes {
        let record = &mut plan.records[node];
        match &field.save {
            Some(hook) => {
                if let Err(err) = hook(ctx, &mut record.record, value).await {
                    record.fail(EntityFailure::Rejected(err.message));
                }
            }
            None if field.is_calculated() => {}
            None => record.record.set(field.name.clone(), value),
        }
    }
}

/// Points reference fields at their targets.
///
/// Targets submitted alongside are taken from the submission: existing ones
/// by identity, new ones as a pending reference the save fills in. Other
/// targets are looked up in one security-filtered query per field. An
/// unreachable Aggregation target fails the referencing entity; an
/// unreachable Association target leaves the field untouched.
async fn assign_references<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    schema: &Schema,
    plan: &mut SubmissionPlan<'_>,
    field: &FieldDescriptor,
    reference: &ReferenceDescriptor,
    writes: Vec<(usize, Value)>,
) -> Result<(), MutationError>
where
    C: DataContext,
{
    let Some(target_descriptor) = schema.entity(&reference.target).cloned() else {
        return Ok(());
    };

    let mut outside = Vec::new();
    for (node, value) in writes {
        if value.is_null() {
            plan.records[node].record.set(field.name.clone(), Value::Null);
            continue;
        }
        if let Some(target) = plan.lookup(&reference.target, &value) {
            let (target_alive, target_is_new, target_id) = {
                let target_record = &plan.records[target];
                (
                    target_record.is_alive(),
                    target_record.is_new,
                    target_record.record.value(&target_descriptor.id_field),
                )
            };
            let record = &mut plan.records[node];
            if !target_alive {
                target_unreachable(record, field, reference.relation);
            } else if target_is_new {
                record.record.set(field.name.clone(), Value::Null);
                record.pending.push(PendingReference {
                    field: field.name.clone(),
                    target: StageHandle(target),
                });
            } else {
                record.record.set(field.name.clone(), target_id);
            }
        } else if target_descriptor.is_fake_id(&value) {
            target_unreachable(&mut plan.records[node], field, reference.relation);
        } else {
            outside.push((node, value));
        }
    }
    if outside.is_empty() {
        return Ok(());
    }

    let mut seen = HashSet::new();
    let ids: Vec<Value> = outside
        .iter()
        .filter(|(_, value)| seen.insert(id_key(value)))
        .map(|(_, value)| value.clone())
        .collect();
    debug!("looking up {} `{}` targets of `{}`", ids.len(), reference.target, field.name);
    let rows = data
        .query(&EntityQuery::by_ids(
            reference.target.clone(),
            target_descriptor.id_field.clone(),
            ids,
        ))
        .await?;
    let visible: HashSet<String> = rows
        .iter()
        .filter(|row| target_descriptor.permits(ctx, row))
        .filter_map(|row| row.get(&target_descriptor.id_field).map(id_key))
        .collect();

    for (node, value) in outside {
        let record = &mut plan.records[node];
        if visible.contains(&id_key(&value)) {
            record.record.set(field.name.clone(), value);
        } else {
            target_unreachable(record, field, reference.relation);
        }
    }
    Ok(())
}

fn target_unreachable(record: &mut super::ResolutionRecord<'_>, field: &FieldDescriptor, relation: RelationKind) {
    match relation {
        RelationKind::Aggregation => record.fail(EntityFailure::Unauthorized),
        RelationKind::Association => {
            trace!("leaving `{}` of {} unassigned", field.name, record.entity_ref());
        }
    }
}
