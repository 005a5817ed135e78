use indexmap::IndexMap;
use log::{debug, trace};

use super::{ResolutionState, SubmissionPlan};
use crate::{
    context::ExecutionContext,
    errors::{EntityFailure, MutationError},
    id::id_key,
    record::Record,
    store::{DataContext, EntityQuery},
};

/// Decides insert or update for every entity, loads existing rows and runs
/// the before-create, before-update and can-save hooks.
///
/// Existing rows are loaded with one query per collection. Rows hidden by the
/// type's security filter count as missing.
pub(crate) async fn resolve_entities<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    plan: &mut SubmissionPlan<'_>,
) -> Result<(), MutationError>
where
    C: DataContext,
{
    let mut loaded: IndexMap<String, Vec<Record>> = IndexMap::new();
    for (collection, nodes) in plan.collection_groups() {
        let ids: Vec<_> = nodes
            .iter()
            .map(|&node| &plan.records[node])
            .filter(|record| !record.is_new)
            .map(|record| record.input.client_id.clone())
            .collect();
        if ids.is_empty() {
            continue;
        }
        let descriptor = plan.records[nodes[0]].descriptor.clone();
        debug!("loading {} existing `{collection}` entities", ids.len());
        let rows = data
            .query(&EntityQuery::by_ids(collection.clone(), descriptor.id_field.clone(), ids))
            .await?;
        let visible = rows.into_iter().filter(|row| descriptor.permits(ctx, row)).collect();
        loaded.insert(collection, visible);
    }

    for position in 0..plan.order.len() {
        let node = plan.order[position];
        let record = &mut plan.records[node];
        let descriptor = record.descriptor.clone();

        if record.is_new {
            let mut entity = descriptor.instantiate();
            if let Some(hook) = &descriptor.hooks.before_create
                && let Err(err) = hook(ctx, &mut entity)
            {
                record.fail(EntityFailure::Rejected(err.message));
                continue;
            }
            record.record = entity;
        } else {
            let key = id_key(&record.input.client_id);
            let matches: Vec<&Record> = loaded
                .get(&record.input.collection)
                .into_iter()
                .flatten()
                .filter(|row| row.get(&descriptor.id_field).is_some_and(|id| id_key(id) == key))
                .collect();
            let found = match matches.as_slice() {
                [found] => *found,
                [] => {
                    record.fail(EntityFailure::NotFound {
                        entity: record.entity_ref(),
                    });
                    continue;
                }
                _ => {
                    record.fail(EntityFailure::Duplicate {
                        entity: record.entity_ref(),
                    });
                    continue;
                }
            };
            let mut entity = found.clone();
            if let Some(hook) = &descriptor.hooks.before_update
                && let Err(err) = hook(ctx, &mut entity)
            {
                record.fail(EntityFailure::Rejected(err.message));
                continue;
            }
            record.original = Some(found.clone());
            record.record = entity;
        }

        if let Some(can_save) = &descriptor.hooks.can_save {
            match can_save(ctx, &record.record, record.is_new).await {
                Ok(true) => {}
                Ok(false) => {
                    record.fail(EntityFailure::Unauthorized);
                    continue;
                }
                Err(err) => {
                    record.fail(EntityFailure::Rejected(err.message));
                    continue;
                }
            }
        }

        trace!("resolved {} as {}", record.entity_ref(), record.operation());
        record.state = ResolutionState::Resolved;
    }
    Ok(())
}
