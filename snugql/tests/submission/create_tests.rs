use super::support::*;

#[tokio::test]
async fn insert_returns_generated_id_and_selected_fields() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Test" }] }),
            &json!({ "people": ["id", "fullName"] }),
        )
        .await
        .expect("submit");

    assert_eq!(
        output.to_json(),
        json!({ "people": [{ "id": -1, "payload": { "id": 3, "fullName": "Test" } }] })
    );
    assert_eq!(store.journal().add_range_calls, vec![(PEOPLE.to_string(), 1)]);
    assert!(store.journal().update_range_calls.is_empty());
    assert_eq!(store.journal().save_calls, 1);
    assert_eq!(stored(&store, PEOPLE, 3).value("fullName"), json!("Test"));
    assert_eq!(probes.value_loads(), 0);
}

#[tokio::test]
async fn missing_mandatory_field_fails_the_create() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(&user(), &mut store, &json!({ "people": [{ "id": -1, "salary": 10 }] }), &no_selection())
        .await
        .expect_err("fullName is mandatory");

    assert_eq!(err.to_string(), "Cannot create entity: Field `fullName` cannot be null");
    assert_eq!(store.journal().save_calls, 0);
    assert_eq!(store.records(PEOPLE).len(), 2);
}

#[tokio::test]
async fn explicit_null_counts_as_missing_on_create() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": null }] }),
            &no_selection(),
        )
        .await
        .expect_err("null fullName");

    assert!(matches!(
        err.failure(),
        Some(EntityFailure::MandatoryFieldMissing { field }) if field == "fullName"
    ));
}

#[tokio::test]
async fn defaults_fill_fields_left_out_of_a_create() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "departments": [{ "id": -1, "name": "Legal" }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    let legal = stored(&store, DEPARTMENTS, 4);
    assert_eq!(legal.value("name"), json!("Legal"));
    assert_eq!(legal.value("restricted"), json!(false));
}

#[tokio::test]
async fn value_rules_reject_invalid_values() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let err = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Test", "salary": -5 }] }),
            &no_selection(),
        )
        .await
        .expect_err("negative salary");

    assert!(matches!(
        &err,
        MutationError::Entity { reason: EntityFailure::InvalidValue { field, .. }, .. } if field == "salary"
    ));
    assert_eq!(store.journal().save_calls, 0);
}

#[tokio::test]
async fn new_parent_id_is_substituted_regardless_of_submission_order() {
    let payloads = [
        json!({
            "people": [{ "id": -1, "fullName": "Newcomer", "departmentId": -7 }],
            "departments": [{ "id": -7, "name": "Legal" }]
        }),
        json!({
            "departments": [{ "id": -7, "name": "Legal" }],
            "people": [{ "id": -1, "fullName": "Newcomer", "departmentId": -7 }]
        }),
    ];

    for payload in payloads {
        let probes = Probes::default();
        let engine = engine(&probes, MoveRule::Allow);
        let mut store = company_store();

        let output = engine
            .submit_json(&user(), &mut store, &payload, &no_selection())
            .await
            .expect("submit");

        let department_id = output.collection(DEPARTMENTS)[0].id.clone();
        let person_id = output.collection(PEOPLE)[0].id.clone();
        assert_eq!(department_id, json!(4));
        assert_eq!(person_id, json!(3));

        let person = stored(&store, PEOPLE, 3);
        assert_eq!(person.value("departmentId"), department_id);
        assert_eq!(
            store.journal().add_range_calls,
            vec![(DEPARTMENTS.to_string(), 1), (PEOPLE.to_string(), 1)]
        );
        assert_eq!(store.journal().save_calls, 1);
    }
}

#[tokio::test]
async fn new_entities_reference_existing_ones() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Intern", "managerId": 2, "departmentId": 2 }] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    let intern = stored(&store, PEOPLE, 3);
    assert_eq!(intern.value("managerId"), json!(2));
    assert_eq!(intern.value("departmentId"), json!(2));
    assert_eq!(store.journal().queries_for(DEPARTMENTS), 1);
    assert_eq!(store.journal().queries_for(PEOPLE), 1);
}

#[tokio::test]
async fn save_hook_writes_through_on_create() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Deny);
    let mut store = company_store();

    engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [{ "id": -1, "fullName": "Analyst", "departmentName": "research" }] }),
            &no_selection(),
        )
        .await
        .expect("editability only applies to updates");

    assert_eq!(probes.saves(), 1);
    assert_eq!(probes.value_loads(), 0);
    assert_eq!(stored(&store, PEOPLE, 3).value("departmentId"), json!(2));
}

#[tokio::test]
async fn inserts_of_one_collection_share_an_add_range_call() {
    let probes = Probes::default();
    let engine = engine(&probes, MoveRule::Allow);
    let mut store = company_store();

    let output = engine
        .submit_json(
            &user(),
            &mut store,
            &json!({ "people": [
                { "id": -1, "fullName": "One" },
                { "id": -2, "fullName": "Two" },
                { "id": -3, "fullName": "Three" }
            ] }),
            &no_selection(),
        )
        .await
        .expect("submit");

    let ids: Vec<Value> = output.collection(PEOPLE).iter().map(|result| result.id.clone()).collect();
    assert_eq!(ids, vec![json!(3), json!(4), json!(5)]);
    assert_eq!(store.journal().add_range_calls, vec![(PEOPLE.to_string(), 3)]);
}
