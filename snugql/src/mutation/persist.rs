use indexmap::IndexMap;
use log::{debug, trace};

use super::SubmissionPlan;
use crate::{
    config::EngineConfig,
    context::ExecutionContext,
    errors::{EntityFailure, MutationError},
    record::Record,
    store::{DataContext, StageHandle, StagedEntity},
    types::AffectedEntity,
};

/// Stages every entity, saves once, then runs the after-save hooks.
///
/// Inserts are staged in processing order, one `add_range` per run of
/// consecutive entities of the same collection, so a referenced insert is
/// always staged before the inserts referencing it. Updates follow, one
/// `update_range` per collection.
pub(crate) async fn persist<C>(
    ctx: &ExecutionContext,
    data: &mut C,
    config: &EngineConfig,
    plan: &mut SubmissionPlan<'_>,
) -> Result<Vec<AffectedEntity>, MutationError>
where
    C: DataContext,
{
    let mut inserts: Vec<(String, Vec<StagedEntity>)> = Vec::new();
    let mut updates: IndexMap<String, Vec<StagedEntity>> = IndexMap::new();
    let mut staged_nodes = Vec::new();

    for &node in &plan.order {
        let record = &plan.records[node];
        let descriptor = &record.descriptor;
        let collection = &record.input.collection;
        if !record.is_new
            && config.engine.skip_unchanged_updates
            && record.pending.is_empty()
            && record.original.as_ref() == Some(&record.record)
        {
            trace!("{} is unchanged, not staging it", record.entity_ref());
            continue;
        }

        let mut entity = record.record.clone();
        if record.is_new {
            entity.remove(&descriptor.id_field);
        }
        let staged = StagedEntity::new(StageHandle(node), descriptor.id_field.clone(), descriptor.id_kind, entity)
            .with_pending(record.pending.clone());
        staged_nodes.push(node);

        if record.is_new {
            match inserts.last_mut() {
                Some((run_collection, run)) if run_collection == collection => run.push(staged),
                _ => inserts.push((collection.clone(), vec![staged])),
            }
        } else {
            updates.entry(collection.clone()).or_default().push(staged);
        }
    }

    if staged_nodes.is_empty() {
        debug!("no entity changed, skipping save");
    } else {
        for (collection, entities) in inserts {
            data.add_range(&collection, entities);
        }
        for (collection, entities) in updates {
            data.update_range(&collection, entities);
        }
        let receipt = data.save().await?;
        debug!("saved {} entities at {}", receipt.records.len(), receipt.saved_at);
        for &node in &staged_nodes {
            plan.records[node].saved = receipt.record(StageHandle(node)).cloned();
        }
    }
    for record in plan.records.iter_mut().filter(|record| record.saved.is_none()) {
        record.saved = Some(record.record.clone());
    }

    let mut side_effects = Vec::new();
    for (collection, nodes) in plan.collection_groups() {
        let saved: Vec<usize> = nodes.into_iter().filter(|node| staged_nodes.contains(node)).collect();
        let Some(&first) = saved.first() else {
            continue;
        };
        let descriptor = plan.records[first].descriptor.clone();
        let Some(hook) = &descriptor.hooks.after_save else {
            continue;
        };
        let entities: Vec<Record> = saved
            .iter()
            .filter_map(|&node| plan.records[node].saved.clone())
            .collect();
        match hook(ctx, &entities).await {
            Ok(extra) => {
                debug!("after-save of `{collection}` reported {} affected entities", extra.len());
                side_effects.extend(extra);
            }
            Err(err) => {
                let record = &plan.records[first];
                return Err(MutationError::entity(
                    record.operation(),
                    record.entity_ref(),
                    EntityFailure::Rejected(err.message),
                ));
            }
        }
    }
    Ok(side_effects)
}
