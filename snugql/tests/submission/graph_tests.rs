use super::support::*;
use snugql::DependencyGraph;

#[tokio::test]
async fn self_reference_is_a_cycle() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "categories": [{ "id": -1, "name": "Loop", "parentId": -1 }] }),
            &no_selection(),
        )
        .await
        .expect_err("self reference");

    assert_eq!(err.to_string(), "Circular reference detected.");
    assert!(store.journal().query_calls.is_empty());
    assert!(store.journal().add_range_calls.is_empty());
    assert_eq!(store.journal().save_calls, 0);
}

#[tokio::test]
async fn two_entity_cycle_aborts_everything() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({
                "people": [{ "id": -1, "fullName": "Bystander" }],
                "categories": [
                    { "id": -1, "name": "A", "parentId": -2 },
                    { "id": -2, "name": "B", "parentId": -1 }
                ]
            }),
            &no_selection(),
        )
        .await
        .expect_err("cycle");

    assert!(matches!(err, MutationError::CircularReference { .. }));
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(store.records(PEOPLE).len(), 2);
    assert_eq!(store.records(CATEGORIES).len(), 1);
}

#[tokio::test]
async fn association_cycles_are_allowed() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Self managed", "managerId": -1 }] }),
            &no_selection(),
        )
        .await
        .expect("association edges do not order entities");

    assert_eq!(stored(&store, PEOPLE, 3).value("managerId"), json!(3));
}

#[tokio::test]
async fn chains_of_new_entities_are_saved_parents_first() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "categories": [
                { "id": -1, "name": "Leaf", "parentId": -2 },
                { "id": -2, "name": "Branch", "parentId": -3 },
                { "id": -3, "name": "Trunk", "parentId": 1 }
            ] }),
            &json!({ "categories": ["id", "name", "parentId"] }),
        )
        .await
        .expect("submit");

    let results = output.collection(CATEGORIES);
    let client_ids: Vec<Value> = results.iter().map(|result| result.client_id.clone()).collect();
    assert_eq!(client_ids, vec![json!(-1), json!(-2), json!(-3)]);

    let trunk = results[2].payload.as_ref().expect("trunk");
    let branch = results[1].payload.as_ref().expect("branch");
    let leaf = results[0].payload.as_ref().expect("leaf");
    assert_eq!(trunk.value("parentId"), json!(1));
    assert_eq!(branch.value("parentId"), trunk.value("id"));
    assert_eq!(leaf.value("parentId"), branch.value("id"));
    assert_eq!(trunk.value("id"), json!(2));
    assert_eq!(store.journal().add_range_calls, vec![(CATEGORIES.to_string(), 3)]);
}

#[test]
fn diamond_dependencies_are_ordered_once() {
    // 0 -> 1, 0 -> 2, 1 -> 3, 2 -> 3
    let graph = DependencyGraph::from_edges(vec![vec![1, 2], vec![3], vec![3], vec![]]);
    let order = graph.order().expect("acyclic");
    assert_eq!(order, vec![3, 1, 2, 0]);
}
