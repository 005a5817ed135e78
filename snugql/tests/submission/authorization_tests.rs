use super::support::*;

#[tokio::test]
async fn can_save_false_blocks_the_whole_submission() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();
    let ctx = user().with_role("readonly");

    let err = engine
        .submit_json(
            &ctx,
            &mut store,
            &json!({
                "departments": [{ "id": -1, "name": "Legal" }],
                "people": [{ "id": -1, "fullName": "Blocked" }]
            }),
            &no_selection(),
        )
        .await
        .expect_err("read-only caller");

    assert_eq!(err.to_string(), "Cannot create entity: Unauthorized.");
    assert_eq!(store.journal().save_calls, 0);
    assert!(store.journal().add_range_calls.is_empty());
    assert_eq!(store.records(DEPARTMENTS).len(), 3);
}

#[tokio::test]
async fn can_save_false_on_update_names_the_operation() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user().with_role("readonly"),
            &mut store,
            &json!({ "people": [{ "id": 2, "salary": 999 }] }),
            &no_selection(),
        )
        .await
        .expect_err("read-only caller");

    assert_eq!(err.to_string(), "Cannot update entity: Unauthorized.");
    assert_eq!(stored(&store, PEOPLE, 2).value("salary"), json!(200));
}

#[tokio::test]
async fn hidden_aggregation_target_is_unauthorized() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Director", "departmentId": 3 }] }),
            &no_selection(),
        )
        .await
        .expect_err("department 3 is restricted");

    assert_eq!(err.to_string(), "Cannot create entity: Unauthorized.");
    assert_eq!(store.journal().save_calls, 0);
}

#[tokio::test]
async fn admins_see_restricted_aggregation_targets() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &admin(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Director", "departmentId": 3 }] }),
            &no_selection(),
        )
        .await
        .expect("admin");

    assert_eq!(stored(&store, PEOPLE, 3).value("departmentId"), json!(3));
}

#[tokio::test]
async fn missing_aggregation_target_fails_an_update() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 100, "departmentId": 42 }] }),
            &no_selection(),
        )
        .await
        .expect_err("no department 42");

    assert_eq!(err.to_string(), "Cannot update entity: Unauthorized.");
}

#[tokio::test]
async fn placeholder_aggregation_target_outside_the_payload_is_unauthorized() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Orphan", "departmentId": -9 }] }),
            &no_selection(),
        )
        .await
        .expect_err("department -9 is not submitted");

    assert!(matches!(err.failure(), Some(EntityFailure::Unauthorized)));
    assert!(store.journal().queries_for(DEPARTMENTS) == 0);
}

#[tokio::test]
async fn unreachable_association_target_is_left_unassigned() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [
                { "id": -1, "fullName": "Loner", "managerId": 42 },
                { "id": -2, "fullName": "Dreamer", "managerId": -8 }
            ] }),
            &no_selection(),
        )
        .await
        .expect("association misses are silent");

    assert!(!stored(&store, PEOPLE, 3).contains("managerId"));
    assert!(!stored(&store, PEOPLE, 4).contains("managerId"));
}

#[tokio::test]
async fn failed_parent_makes_its_new_children_unauthorized() {
    let probes = Probes::default();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow))
        .entity(departments().can_save(|_ctx, entity, _is_new| {
            let allowed = entity.value("name") != json!("Forbidden");
            ready(Ok(allowed))
        }))
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({
                "people": [{ "id": -1, "fullName": "Member", "departmentId": -1 }],
                "departments": [{ "id": -1, "name": "Forbidden" }]
            }),
            &no_selection(),
        )
        .await
        .expect_err("parent denied");

    let MutationError::Entity { entity, reason, .. } = &err else {
        panic!("expected an entity error, got {err:?}");
    };
    assert_eq!(reason, &EntityFailure::Unauthorized);
    assert_eq!(entity.entity_type, "Department");
    assert_eq!(store.journal().save_calls, 0);
}

#[tokio::test]
async fn before_create_errors_reject_the_entity() {
    let probes = Probes::default();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow))
        .entity(departments().before_create(|ctx, _entity| {
            if ctx.principal() == Some("alice") {
                return Err(CallbackError::new("alice cannot found departments"));
            }
            Ok(())
        }))
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "departments": [{ "id": -1, "name": "Legal" }] }),
            &no_selection(),
        )
        .await
        .expect_err("hook refuses");

    assert_eq!(err.to_string(), "Cannot create entity: alice cannot found departments");
}
