use super::support::*;

#[tokio::test]
async fn missing_mandatory_for_update_field_fails_before_execution() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "fullName": "Ada Lovelace" }] }),
            &no_selection(),
        )
        .await
        .expect_err("salary is required on update");

    let MutationError::Validation(validation) = &err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert!(validation.mentions("salary"));
    assert_eq!(validation.issues[0].code, "input.required");
    assert!(store.journal().query_calls.is_empty());
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(probes.value_loads(), 0);
    assert_eq!(probes.saves(), 0);
}

#[tokio::test]
async fn editable_if_false_denies_the_change_with_its_message() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Deny);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 100, "departmentName": "Research" }] }),
            &no_selection(),
        )
        .await
        .expect_err("department is not editable");

    assert_eq!(
        err.to_string(),
        "Cannot update entity: Cannot change field `departmentName` of entity (type: Person, id: 1): prohibited"
    );
    assert_eq!(probes.value_loads(), 1);
    assert_eq!(probes.saves(), 0);
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(stored(&store, PEOPLE, 1).value("departmentId"), json!(1));
}

#[tokio::test]
async fn unchanged_value_is_not_checked_for_editability() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Deny);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 100, "departmentName": "Sales" }] }),
            &no_selection(),
        )
        .await
        .expect("same department");

    assert_eq!(probes.value_loads(), 1);
    assert_eq!(probes.saves(), 0);
}

#[tokio::test]
async fn unchanged_entities_are_not_saved() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 100 }] }),
            &json!({ "people": ["id"] }),
        )
        .await
        .expect("submit");

    assert_eq!(output.collection(PEOPLE)[0].id, json!(1));
    assert!(store.journal().update_range_calls.is_empty());
    assert_eq!(store.journal().save_calls, 0);
}

#[tokio::test]
async fn updates_change_only_the_supplied_fields() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 2, "salary": 250 }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    let grace = stored(&store, PEOPLE, 2);
    assert_eq!(grace.value("salary"), json!(250));
    assert_eq!(grace.value("fullName"), json!("Grace"));
    assert_eq!(grace.value("managerId"), json!(1));
    assert_eq!(store.journal().update_range_calls, vec![(PEOPLE.to_string(), 1)]);
    assert_eq!(store.journal().queries_for(PEOPLE), 1);
}

#[tokio::test]
async fn allowed_move_goes_through_the_save_hook() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 100, "departmentName": "research" }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    assert_eq!(probes.saves(), 1);
    assert_eq!(stored(&store, PEOPLE, 1).value("departmentId"), json!(2));
}

#[tokio::test]
async fn batched_editability_loads_once_for_all_candidates() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Batched);
    let mut store = company_store();
    store.seed(
        PEOPLE,
        [Record::new()
            .with("id", json!(3))
            .with("fullName", json!("Linus"))
            .with("salary", json!(300))
            .with("departmentId", json!(1))],
    );

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [
                { "id": 1, "salary": 100, "departmentName": "Research" },
                { "id": 3, "salary": 300, "departmentName": "Research" },
                { "id": 2, "salary": 200, "departmentName": "Board" }
            ] }),
            &no_selection(),
        )
        .await
        .expect_err("Grace may not leave Research");

    assert_eq!(probes.edit_loads(), 1);
    assert_eq!(*probes.edit_batches.lock().expect("lock"), vec![3]);
    assert_eq!(probes.value_loads(), 1);
    assert_eq!(*probes.value_batches.lock().expect("lock"), vec![3]);
}

#[tokio::test]
async fn batched_editability_reports_the_denied_entity() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Batched);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [
                { "id": 1, "salary": 100, "departmentName": "Research" },
                { "id": 2, "salary": 200, "departmentName": "Sales" }
            ] }),
            &no_selection(),
        )
        .await
        .expect_err("Grace may not leave Research");

    assert_eq!(
        err.to_string(),
        "Cannot update entity: Cannot change field `departmentName` of entity (type: Person, id: 2): \"Grace\" cannot leave \"Research\""
    );
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(stored(&store, PEOPLE, 1).value("departmentId"), json!(1));
}

#[tokio::test]
async fn unknown_id_is_not_found() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 99, "salary": 1 }] }),
            &no_selection(),
        )
        .await
        .expect_err("no person 99");

    assert_eq!(err.to_string(), "Cannot update entity: Entity not found (type: Person, id: 99).");
}

#[tokio::test]
async fn duplicate_rows_are_rejected() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();
    store.seed(
        PEOPLE,
        [
            Record::new().with("id", json!(5)).with("fullName", json!("Twin")),
            Record::new().with("id", json!(5)).with("fullName", json!("Twin")),
        ],
    );

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 5, "salary": 1 }] }),
            &no_selection(),
        )
        .await
        .expect_err("two rows share id 5");

    assert_eq!(err.to_string(), "Cannot update entity: More than one entity found (type: Person, id: 5).");
}

#[tokio::test]
async fn before_update_runs_on_the_loaded_entity() {
    let probes = Probes::default();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow).before_update(|ctx, entity| {
            entity.set("updatedBy", json!(ctx.principal()));
            Ok(())
        }))
        .entity(departments())
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": 1, "salary": 120 }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    let ada = stored(&store, PEOPLE, 1);
    assert_eq!(ada.value("updatedBy"), json!("alice"));
    assert_eq!(ada.value("salary"), json!(120));
}

#[tokio::test]
async fn read_only_field_cannot_change() {
    let probes = Probes::default();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow))
        .entity(
            EntityDescriptor::new("Department", DEPARTMENTS)
                .field(FieldDescriptor::scalar("name").read_only())
                .field(FieldDescriptor::scalar("restricted").default_value(|_| json!(false))),
        )
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "departments": [{ "id": 1, "name": "Marketing" }] }),
            &no_selection(),
        )
        .await
        .expect_err("name is read only");

    assert_eq!(
        err.to_string(),
        "Cannot update entity: Cannot change field `name` of entity (type: Department, id: 1): The field is not editable."
    );
    assert!(matches!(err.failure(), Some(EntityFailure::FieldNotEditable { .. })));
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(stored(&store, DEPARTMENTS, 1).value("name"), json!("Sales"));
}

#[tokio::test]
async fn uuid_ids_match_regardless_of_letter_case() {
    let schema = Schema::builder()
        .entity(
            EntityDescriptor::new("Tag", "tags")
                .identity("id", IdKind::Uuid)
                .field(FieldDescriptor::scalar("name").mandatory_on_create()),
        )
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = MemoryContext::from_json(&json!({
        "tags": [{ "id": "550e8400-e29b-41d4-a716-446655440000", "name": "a" }]
    }))
    .expect("store");

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "tags": [{ "id": "550E8400-E29B-41D4-A716-446655440000", "name": "b" }] }),
            &json!({ "tags": ["name"] }),
        )
        .await
        .expect("same tag, different spelling");

    let result = &output.collection("tags")[0];
    assert_eq!(result.payload.as_ref().expect("payload").value("name"), json!("b"));
    assert_eq!(store.records("tags").len(), 1);
    assert_eq!(store.records("tags")[0].value("id"), json!("550e8400-e29b-41d4-a716-446655440000"));
    assert_eq!(store.records("tags")[0].value("name"), json!("b"));
}
