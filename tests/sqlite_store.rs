//! SQLite flow store tests.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use stitchflow::flow::{Activity, Link};
use stitchflow::instance::{FlowInstanceData, Payload};
use stitchflow::runner::{Endpoint, FlowStore};
use stitchflow::runtime::ExecutionState;
use uuid::Uuid;

fn snapshot(definition_id: Uuid, state: ExecutionState) -> FlowInstanceData {
    FlowInstanceData {
        id: Uuid::new_v4(),
        name: "stored".to_string(),
        caller: Some(identity()),
        flow_definition_id: definition_id,
        context: "{}".to_string(),
        execution_state: state,
        start: Some(chrono::Utc::now()),
        end: None,
    }
}

#[tokio::test]
async fn definitions_are_upserted() {
    let mut definition = definition("v1", vec![Activity::new("Start", "start")], vec![]);
    let store = store_with(&[definition.clone()]).await;

    definition.name = "v2".to_string();
    definition.flow.activities.push(Activity::new("A", "pass"));
    definition.flow.links.push(Link::new("Start", "A"));
    store.save_definition(&definition).await.unwrap();

    let fetched = store.get_definition(&Endpoint::default(), definition.id).await.unwrap();
    assert_eq!(fetched.name, "v2");
    assert_eq!(fetched.flow.activities.len(), 2);
}

#[tokio::test]
async fn results_overwrite_by_instance_id() {
    let store = store_with(&[]).await;
    let definition_id = Uuid::new_v4();
    let mut data = snapshot(definition_id, ExecutionState::Suspended);

    store.save_result(&Endpoint::default(), &data).await.unwrap();
    data.execution_state = ExecutionState::Complete;
    data.end = Some(chrono::Utc::now());
    store.save_result(&Endpoint::default(), &data).await.unwrap();

    let fetched = store.get_instance(&Endpoint::default(), data.id).await.unwrap();
    assert_eq!(fetched, data);

    let all = store.list_instances(definition_id).await.unwrap();
    assert_eq!(all.len(), 1);
}

#[tokio::test]
async fn missing_rows_are_errors() {
    let store = store_with(&[]).await;
    assert!(store.get_definition(&Endpoint::default(), Uuid::new_v4()).await.is_err());
    assert!(store.get_instance(&Endpoint::default(), Uuid::new_v4()).await.is_err());
}

#[tokio::test]
async fn runner_saves_every_attempt_of_an_instance() {
    let definition = definition(
        "two-step",
        vec![Activity::new("Start", "start"), Activity::new("F", "form")],
        vec![Link::new("Start", "F")],
    );
    let store = store_with(&[definition.clone()]).await;
    let runner = runner(store.clone());
    let instance_id = Uuid::new_v4();

    runner
        .run(start_request(definition.id, instance_id, Payload::Empty))
        .await
        .unwrap();
    runner
        .run(resume_request(instance_id, "F", Payload::Empty))
        .await
        .unwrap();

    let all = store.list_instances(definition.id).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].execution_state, ExecutionState::Complete);
}
