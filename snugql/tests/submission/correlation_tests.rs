use super::support::*;

#[tokio::test]
async fn output_follows_input_order_not_processing_order() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({
                "categories": [
                    { "id": -1, "name": "Child", "parentId": -2 },
                    { "id": 1, "name": "Renamed root" },
                    { "id": -2, "name": "Parent" }
                ]
            }),
            &json!({ "categories": ["name"] }),
        )
        .await
        .expect("submit");

    let results = output.collection(CATEGORIES);
    assert_eq!(results.len(), 3);
    let pairs: Vec<(Value, Value)> = results
        .iter()
        .map(|result| (result.client_id.clone(), result.id.clone()))
        .collect();
    assert_eq!(
        pairs,
        vec![(json!(-1), json!(3)), (json!(1), json!(1)), (json!(-2), json!(2))]
    );
    let names: Vec<Value> = results
        .iter()
        .map(|result| result.payload.as_ref().expect("payload").value("name"))
        .collect();
    assert_eq!(names, vec![json!("Child"), json!("Renamed root"), json!("Parent")]);
}

#[tokio::test]
async fn nothing_selected_costs_no_query() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Quiet" }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    assert!(store.journal().query_calls.is_empty());
    assert_eq!(output.to_json(), json!({ "people": [{ "id": -1 }] }));
}

#[tokio::test]
async fn selecting_only_the_id_costs_no_query() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Quiet" }, { "id": -2, "fullName": "Quieter" }] }),
            &json!({ "people": ["id"] }),
        )
        .await
        .expect("submit");

    assert!(store.journal().query_calls.is_empty());
    assert_eq!(
        output.to_json(),
        json!({ "people": [
            { "id": -1, "payload": { "id": 3 } },
            { "id": -2, "payload": { "id": 4 } }
        ] })
    );
}

#[tokio::test]
async fn selected_calculated_field_loads_once() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [
                { "id": 1, "salary": 110 },
                { "id": -1, "fullName": "New", "departmentId": 2 },
                { "id": 2, "salary": 210 }
            ] }),
            &json!({ "people": ["fullName", "departmentName"] }),
        )
        .await
        .expect("submit");

    assert_eq!(probes.value_loads(), 1);
    assert_eq!(*probes.value_batches.lock().expect("lock"), vec![3]);
    let departments: Vec<Value> = output
        .collection(PEOPLE)
        .iter()
        .map(|result| result.payload.as_ref().expect("payload").value("departmentName"))
        .collect();
    assert_eq!(departments, vec![json!("Sales"), json!("Research"), json!("Research")]);
    assert_eq!(store.journal().queries_for(PEOPLE), 2);
}

#[tokio::test]
async fn entities_hidden_by_the_security_filter_have_no_payload() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "departments": [
                { "id": -1, "name": "Secret", "restricted": true },
                { "id": -2, "name": "Open" }
            ] }),
            &json!({ "departments": ["name"] }),
        )
        .await
        .expect("submit");

    let results = output.collection(DEPARTMENTS);
    assert_eq!(results[0].id, json!(4));
    assert!(results[0].payload.is_none());
    assert_eq!(results[1].payload.as_ref().expect("payload").value("name"), json!("Open"));
}

#[tokio::test]
async fn after_save_side_effects_are_reported() {
    let probes = Probes::default();
    let audited = Arc::new(AtomicUsize::new(0));
    let counter = audited.clone();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow))
        .entity(departments().after_save(move |_ctx, saved| {
            counter.fetch_add(saved.len(), Ordering::SeqCst);
            let affected: Vec<AffectedEntity> = saved
                .iter()
                .map(|department| {
                    AffectedEntity::new(
                        "audit",
                        Record::new().with("department", department.value("id")),
                    )
                })
                .collect();
            ready(Ok(affected))
        }))
        .build()
        .expect("schema");
    let engine = engine_with(schema);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "departments": [{ "id": -1, "name": "Legal" }, { "id": 2, "name": "R&D" }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    assert_eq!(audited.load(Ordering::SeqCst), 2);
    assert_eq!(output.side_effects.len(), 2);
    assert_eq!(output.to_json()["sideEffects"][0]["collection"], json!("audit"));
}

#[tokio::test]
async fn after_save_errors_fail_the_submission() {
    let probes = Probes::default();
    let schema = Schema::builder()
        .entity(people(&probes, MoveRule::Allow))
        .entity(departments().after_save(|_ctx, _saved| ready(Err(CallbackError::new("audit log unavailable")))))
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
        .expect_err("after save fails");

    assert_eq!(err.to_string(), "Cannot create entity: audit log unavailable");
}

#[tokio::test]
async fn store_failures_propagate_and_write_nothing() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();
    store.fail_next_save("disk full");

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Lost" }, { "id": 2, "salary": 1 }] }),
            &no_selection(),
        )
        .await
        .expect_err("save fails");

    assert!(matches!(err, MutationError::Store(_)));
    assert_eq!(err.to_string(), "data context error: disk full");
    assert_eq!(store.records(PEOPLE).len(), 2);
    assert_eq!(stored(&store, PEOPLE, 2).value("salary"), json!(200));
}
