//! End-to-end execution scenarios run through the runner and an in-memory store.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use stitchflow::flow::{Activity, ActivityState, Link};
use stitchflow::instance::{FlowInstance, FlowInstanceData, Payload, WorkflowRequest};
use stitchflow::runner::{Endpoint, FlowStore, StaticIdentity};
use stitchflow::runtime::{
    ActivityRegistry, ChannelLogSink, ExecutionContext, ExecutionEnv, ExecutionState, LogLevel, LogRelay, LogSink,
};
use stitchflow::script::ScriptEngine;
use uuid::Uuid;

fn state_of(context: &ExecutionContext, reference: &str) -> ActivityState {
    context.flow.activity(reference).unwrap().state
}

fn position(context: &ExecutionContext, message: &str) -> usize {
    context
        .log
        .messages()
        .iter()
        .position(|m| *m == message)
        .unwrap_or_else(|| panic!("missing log line: {message}"))
}

#[tokio::test]
async fn linear_flow_completes_with_stitched_edges() {
    let definition = definition(
        "linear",
        vec![
            Activity::new("Start", "start"),
            Activity::new("A", "pass"),
            Activity::new("B", "pass"),
        ],
        vec![Link::new("Start", "A"), Link::new("A", "B")],
    );

    let relay = Arc::new(LogRelay::disabled());
    let env = ExecutionEnv {
        script: ScriptEngine::default(),
        activities: Arc::new(ActivityRegistry::with_builtins()),
        relay: Arc::clone(&relay),
    };
    let mut instance = FlowInstance::from_definition(&definition, &relay).await.unwrap();
    let request = start_request(definition.id, Uuid::new_v4(), Payload::Empty);

    let snapshot = instance
        .execute(&request, &StaticIdentity(identity()), &default_imports(), &env)
        .await
        .unwrap();

    assert_eq!(snapshot.execution_state, ExecutionState::Complete);
    assert_eq!(instance.flow.activity("A").unwrap().previous, vec!["Start".to_string()]);
    assert_eq!(instance.flow.activity("B").unwrap().previous, vec!["A".to_string()]);
    assert_eq!(instance.flow.activity("Start").unwrap().next, vec!["A".to_string()]);
}

#[tokio::test]
async fn suspended_run_resumes_without_rerunning_upstream() {
    let definition = definition(
        "approval",
        vec![
            Activity::new("Start", "start"),
            Activity::new("Prepare", "script").with_config(json!({ "code": "return variables.user_name" })),
            Activity::new("F", "form"),
            Activity::new("Notify", "pass"),
        ],
        vec![
            Link::new("Start", "Prepare"),
            Link::new("Prepare", "F"),
            Link::new("F", "Notify").with_expression("destination.data.approved = source.data.approved"),
        ],
    );
    let store = store_with(&[definition.clone()]).await;
    let runner = runner(Arc::clone(&store));
    let instance_id = Uuid::new_v4();

    let first = runner
        .run(start_request(definition.id, instance_id, Payload::Empty))
        .await
        .unwrap();
    assert_eq!(first.execution_state, ExecutionState::Suspended);
    let context = first.execution_context().unwrap();
    assert_eq!(state_of(&context, "F"), ActivityState::Suspended);
    assert_eq!(state_of(&context, "Notify"), ActivityState::Pending);
    assert_eq!(
        context.flow.activity("Prepare").unwrap().data,
        json!({ "result": "Ada Lovelace" })
    );

    let form = json!({ "approved": true }).as_object().unwrap().clone();
    let second = runner
        .run(resume_request(instance_id, "F", Payload::Form(form)))
        .await
        .unwrap();
    assert_eq!(second.execution_state, ExecutionState::Complete);

    let resumed = second.execution_context().unwrap();
    assert_eq!(resumed.flow.activity("Notify").unwrap().data, json!({ "approved": true }));
    // Upstream activities keep their earlier results and are not executed again
    assert_eq!(
        resumed.flow.activity("Prepare").unwrap(),
        context.flow.activity("Prepare").unwrap()
    );
    assert!(!resumed.log.messages().contains(&"Executing activity Prepare (script)"));
    assert!(resumed.log.messages().contains(&"Executing activity F (form)"));

    let stored = store.get_instance(&Endpoint::default(), instance_id).await.unwrap();
    assert_eq!(stored, second);
}

#[tokio::test]
async fn fan_in_waits_for_every_predecessor() {
    let definition = definition(
        "fan-in",
        vec![
            Activity::new("Start", "start"),
            Activity::new("A", "script").with_config(json!({ "code": "return 1" })),
            Activity::new("B", "pass"),
            Activity::new("B2", "script").with_config(json!({ "code": "return 2" })),
            Activity::new("C", "script").with_config(json!({ "code": "return activity.data.a + activity.data.b" })),
        ],
        vec![
            Link::new("Start", "A"),
            Link::new("Start", "B"),
            Link::new("B", "B2"),
            Link::new("A", "C").with_expression("destination.data.a = source.data.result"),
            Link::new("B2", "C").with_expression("destination.data.b = source.data.result"),
        ],
    );
    let store = store_with(&[definition.clone()]).await;

    let snapshot = runner(store)
        .run(start_request(definition.id, Uuid::new_v4(), Payload::Empty))
        .await
        .unwrap();
    assert_eq!(snapshot.execution_state, ExecutionState::Complete);

    let context = snapshot.execution_context().unwrap();
    assert_eq!(context.flow.activity("C").unwrap().data, json!({ "a": 1, "b": 2, "result": 3 }));

    let c_started = position(&context, "Executing activity C (script)");
    assert!(position(&context, "Activity A complete") < c_started);
    assert!(position(&context, "Activity B2 complete") < c_started);
    assert_eq!(
        context
            .log
            .messages()
            .iter()
            .filter(|m| **m == "Executing activity C (script)")
            .count(),
        1
    );
}

#[tokio::test]
async fn fan_in_waits_when_the_first_branch_is_the_longer_one() {
    let definition = definition(
        "fan-in-long-first",
        vec![
            Activity::new("Start", "start"),
            Activity::new("A", "pass"),
            Activity::new("A2", "script").with_config(json!({ "code": "return 10" })),
            Activity::new("B", "script").with_config(json!({ "code": "return 5" })),
            Activity::new("C", "script").with_config(json!({ "code": "return activity.data.a - activity.data.b" })),
        ],
        vec![
            Link::new("Start", "A"),
            Link::new("Start", "B"),
            Link::new("A", "A2"),
            Link::new("A2", "C").with_expression("destination.data.a = source.data.result"),
            Link::new("B", "C").with_expression("destination.data.b = source.data.result"),
        ],
    );
    let store = store_with(&[definition.clone()]).await;

    let snapshot = runner(store)
        .run(start_request(definition.id, Uuid::new_v4(), Payload::Empty))
        .await
        .unwrap();
    assert_eq!(snapshot.execution_state, ExecutionState::Complete);

    let context = snapshot.execution_context().unwrap();
    assert_eq!(context.flow.activity("C").unwrap().data, json!({ "a": 10, "b": 5, "result": 5 }));

    // The A branch is walked first, so C is only released once B finishes
    let c_started = position(&context, "Executing activity C (script)");
    assert!(position(&context, "Activity A2 complete") < position(&context, "Executing activity B (script)"));
    assert!(position(&context, "Activity B complete") < c_started);
    assert_eq!(
        context
            .log
            .messages()
            .iter()
            .filter(|m| **m == "Executing activity C (script)")
            .count(),
        1
    );
}

#[tokio::test]
async fn script_passes_keep_empty_lists_and_missing_tokens() {
    let definition = definition(
        "round-trip",
        vec![
            Activity::new("Start", "start"),
            Activity::new("S", "script").with_config(json!({ "code": "return 1" })),
        ],
        vec![Link::new("Start", "S")],
    );
    let store = store_with(&[definition.clone()]).await;
    let mut request = start_request(definition.id, Uuid::new_v4(), Payload::Json(json!([])));
    if let WorkflowRequest::Start { auth_token, .. } = &mut request {
        *auth_token = None;
    }

    let snapshot = runner(store).run(request).await.unwrap();
    assert_eq!(snapshot.execution_state, ExecutionState::Complete);

    let context = snapshot.execution_context().unwrap();
    assert_eq!(context.variables.get("data"), Some(&json!([])));
    assert_eq!(context.variables.get("auth_token"), Some(&serde_json::Value::Null));
}

#[tokio::test]
async fn disallowed_namespace_in_link_fails_the_run() {
    let definition = definition(
        "sandbox",
        vec![Activity::new("Start", "start"), Activity::new("A", "pass")],
        vec![Link::new("Start", "A").with_expression("destination.data.when = os.time()")],
    );
    let store = store_with(&[definition.clone()]).await;

    let snapshot = runner(store)
        .run(start_request(definition.id, Uuid::new_v4(), Payload::Empty))
        .await
        .unwrap();

    assert_eq!(snapshot.execution_state, ExecutionState::Failed);
    let context = snapshot.execution_context().unwrap();
    assert_eq!(state_of(&context, "Start"), ActivityState::Complete);
    assert_eq!(state_of(&context, "A"), ActivityState::Failed);

    let failure = context
        .log
        .entries()
        .iter()
        .find(|e| e.level == LogLevel::Error)
        .unwrap();
    assert!(failure.message.starts_with("activity `A` failed: link data transfer failed"));
    assert!(failure.message.contains("unresolved name `os`"));
    assert_eq!(context.log.messages().last(), Some(&"Execution failed."));
}

#[tokio::test]
async fn oversized_messages_are_truncated_in_log_and_stream() {
    let definition = definition(
        "chatty",
        vec![
            Activity::new("Start", "start"),
            Activity::new("Shout", "log").with_config(json!({ "message": "string.rep('x', 5000)" })),
        ],
        vec![Link::new("Start", "Shout")],
    );
    let store = store_with(&[definition.clone()]).await;
    let (sink, mut events) = ChannelLogSink::channel();
    let runner = runner(store).with_log_sink(Arc::new(move |_: &Endpoint| {
        Some(Box::new(sink.clone()) as Box<dyn LogSink>)
    }));
    let instance_id = Uuid::new_v4();

    let snapshot = runner
        .run(start_request(definition.id, instance_id, Payload::Empty))
        .await
        .unwrap();

    let expected = format!("{} ... 3100 characters cut due to excessive length.", "x".repeat(1900));
    let context = snapshot.execution_context().unwrap();
    assert!(context.log.messages().contains(&expected.as_str()));

    let mut streamed = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.instance_id, Some(instance_id));
        streamed.push(event.message);
    }
    assert!(streamed.contains(&expected));
    assert_eq!(streamed.first().map(String::as_str), Some("Request received by workflow, processing ..."));
    assert_eq!(streamed.last().map(String::as_str), Some("Done!"));
}

#[tokio::test]
async fn broken_sink_is_disabled_once_and_run_still_completes() {
    let definition = definition(
        "offline-hub",
        vec![Activity::new("Start", "start"), Activity::new("A", "pass")],
        vec![Link::new("Start", "A")],
    );
    let store = store_with(&[definition.clone()]).await;
    let runner = runner(store).with_log_sink(Arc::new(|_: &Endpoint| Some(Box::new(BrokenSink) as Box<dyn LogSink>)));

    let snapshot = runner
        .run(start_request(definition.id, Uuid::new_v4(), Payload::Empty))
        .await
        .unwrap();
    assert_eq!(snapshot.execution_state, ExecutionState::Complete);

    // The runner's greeting disables the sink before the context exists
    let context = snapshot.execution_context().unwrap();
    let notices: Vec<_> = context
        .log
        .entries()
        .iter()
        .filter(|e| e.message.contains("Log streaming has been disabled."))
        .collect();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, LogLevel::Warning);
    assert!(notices[0].message.contains("hub offline"));
}

#[tokio::test]
async fn sink_failure_during_traversal_is_recorded_once() {
    let definition = definition(
        "flaky-hub",
        vec![
            Activity::new("Start", "start"),
            Activity::new("A", "pass"),
            Activity::new("B", "pass"),
        ],
        vec![Link::new("Start", "A"), Link::new("A", "B")],
    );
    let relay = Arc::new(LogRelay::new(Box::new(BrokenSink)));
    let env = ExecutionEnv {
        script: ScriptEngine::default(),
        activities: Arc::new(ActivityRegistry::with_builtins()),
        relay: Arc::clone(&relay),
    };
    let mut instance = FlowInstance::from_definition(&definition, &LogRelay::disabled())
        .await
        .unwrap();

    let snapshot = instance
        .execute(
            &start_request(definition.id, Uuid::new_v4(), Payload::Empty),
            &StaticIdentity(identity()),
            &default_imports(),
            &env,
        )
        .await
        .unwrap();
    assert_eq!(snapshot.execution_state, ExecutionState::Complete);

    let context = snapshot.execution_context().unwrap();
    let warnings: Vec<_> = context
        .log
        .entries()
        .iter()
        .filter(|e| e.level == LogLevel::Warning)
        .collect();
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("hub offline"));
    assert!(warnings[0].message.ends_with("Log streaming has been disabled."));
}

#[tokio::test]
async fn unknown_definition_is_abandoned_but_done_is_logged() {
    let store = store_with(&[]).await;
    let (sink, mut events) = ChannelLogSink::channel();
    let runner = runner(store).with_log_sink(Arc::new(move |_: &Endpoint| {
        Some(Box::new(sink.clone()) as Box<dyn LogSink>)
    }));

    let outcome = runner
        .run(start_request(Uuid::new_v4(), Uuid::new_v4(), Payload::Empty))
        .await;
    assert_eq!(outcome, None::<FlowInstanceData>);

    let mut streamed = Vec::new();
    while let Ok(event) = events.try_recv() {
        streamed.push(event);
    }
    let fatal = streamed.iter().find(|e| e.level == LogLevel::Fatal).unwrap();
    assert!(fatal.message.starts_with("Failed to process request, abandoning execution"));
    assert!(fatal.message.contains("Flow definition not found"));
    assert_eq!(streamed.last().unwrap().message, "Done!");
}

#[tokio::test]
async fn unknown_resume_point_produces_no_snapshot() {
    let definition = definition(
        "resume-miss",
        vec![Activity::new("Start", "start"), Activity::new("F", "form")],
        vec![Link::new("Start", "F")],
    );
    let store = store_with(&[definition.clone()]).await;
    let runner = runner(Arc::clone(&store));
    let instance_id = Uuid::new_v4();

    let first = runner
        .run(start_request(definition.id, instance_id, Payload::Empty))
        .await
        .unwrap();
    assert_eq!(first.execution_state, ExecutionState::Suspended);

    let outcome = runner
        .run(resume_request(instance_id, "Elsewhere", Payload::Empty))
        .await;
    assert!(outcome.is_none());

    // The stored snapshot is the suspended one
    let stored = store.get_instance(&Endpoint::default(), instance_id).await.unwrap();
    assert_eq!(stored, first);
}

#[tokio::test]
async fn snapshot_context_round_trips() {
    let definition = definition(
        "round-trip",
        vec![
            Activity::new("Start", "start"),
            Activity::new("Note", "log").with_config(json!({ "message": "'hello ' .. variables.user_name" })),
            Activity::new("F", "form"),
        ],
        vec![Link::new("Start", "Note"), Link::new("Note", "F")],
    );
    let store = store_with(&[definition.clone()]).await;

    let snapshot = runner(store)
        .run(start_request(definition.id, Uuid::new_v4(), Payload::Text("hi".to_string())))
        .await
        .unwrap();

    let context = snapshot.execution_context().unwrap();
    assert!(context.log.messages().contains(&"hello Ada Lovelace"));
    assert_eq!(context.variables.text("data").unwrap(), "hi");
    assert_eq!(context.variables.integer("app_id").unwrap(), 11);

    let again: ExecutionContext = serde_json::from_str(&serde_json::to_string(&context).unwrap()).unwrap();
    assert_eq!(again.state, context.state);
    assert_eq!(again.variables, context.variables);
    assert_eq!(again.log, context.log);
}
