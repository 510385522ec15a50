//! Command surface tests: dispatch by wire name and the JSON-lines server.

#![cfg(unix)]

mod common;

use common::Fixture;
use serde_json::{json, Value};
use superterminals::api::handler::CommandHandler;
use superterminals::api::schemas::{Request, Response};
use superterminals::api::server::serve;
use superterminals::utils::audit_logger::AuditLogger;
use tokio::io::AsyncReadExt;

fn request(id: u64, command: &str, args: Value) -> Request {
    serde_json::from_value(json!({ "id": id, "command": command, "args": args })).unwrap()
}

fn handler(fx: &Fixture) -> CommandHandler {
    CommandHandler::new(fx.supervisor.clone(), None)
}

fn draft_json(fx: &Fixture, name: &str, command: &str) -> Value {
    json!({ "name": name, "path": fx.dir.path().to_string_lossy(), "command": command })
}

#[tokio::test]
async fn full_lifecycle_through_command_names() {
    let fx = Fixture::new();
    let handler = handler(&fx);

    let added = handler
        .handle(request(1, "add_terminal", json!({ "data": draft_json(&fx, "web", "echo hi; sleep 30") })))
        .await;
    assert!(added.ok, "{:?}", added.error);
    let id = added.result.unwrap()["id"].as_str().unwrap().to_string();

    let listed = handler.handle(request(2, "get_terminals", json!({}))).await;
    let terminals = listed.result.unwrap();
    assert_eq!(terminals.as_array().unwrap().len(), 1);
    assert_eq!(terminals[0]["status"], json!("stopped"));
    assert_eq!(terminals[0]["name"], json!("web"));

    let started = handler.handle(request(3, "start_process", json!({ "id": id }))).await;
    assert!(started.ok, "{:?}", started.error);
    assert_eq!(started.id, json!(3));

    let status = handler
        .handle(request(4, "get_process_status", json!({ "id": id })))
        .await;
    assert_eq!(status.result, Some(json!("running")));

    fx.wait_for_log(&id, "[OUT] hi").await;
    let logs = handler.handle(request(5, "get_logs", json!({ "id": id }))).await;
    assert_eq!(logs.result, Some(json!(["[OUT] hi"])));

    let busy = handler.handle(request(6, "delete_terminal", json!({ "id": id }))).await;
    assert_eq!(busy.error.unwrap().kind, "AlreadyRunning");

    let stopped = handler.handle(request(7, "stop_process", json!({ "id": id }))).await;
    assert!(stopped.ok, "{:?}", stopped.error);

    let updated = handler
        .handle(request(
            8,
            "update_terminal",
            json!({ "id": id, "data": draft_json(&fx, "web-2", "true") }),
        ))
        .await;
    assert_eq!(updated.result.unwrap()["name"], json!("web-2"));

    let deleted = handler.handle(request(9, "delete_terminal", json!({ "id": id }))).await;
    assert!(deleted.ok);
    let listed = handler.handle(request(10, "get_terminals", json!({}))).await;
    assert_eq!(listed.result, Some(json!([])));
}

#[tokio::test]
async fn validation_errors_carry_fields() {
    let fx = Fixture::new();
    let response = handler(&fx)
        .handle(request(
            1,
            "add_terminal",
            json!({ "data": { "name": "x", "path": "/definitely/not/here", "command": "" } }),
        ))
        .await;

    assert!(!response.ok);
    let error = response.error.unwrap();
    assert_eq!(error.kind, "ValidationError");
    let fields: Vec<&str> = error.fields.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["path", "command"]);
}

#[tokio::test]
async fn bad_arguments_and_unknown_ids_are_reported() {
    let fx = Fixture::new();
    let handler = handler(&fx);

    let missing_arg = handler.handle(request(1, "start_process", json!({}))).await;
    assert_eq!(missing_arg.error.unwrap().kind, "InvalidRequest");

    let unknown_id = handler
        .handle(request(2, "get_logs", json!({ "id": "nope" })))
        .await;
    assert_eq!(unknown_id.error.unwrap().kind, "NotFound");

    let not_running = {
        let view = fx.add("idle", "true").await;
        handler
            .handle(request(3, "stop_process", json!({ "id": view.id })))
            .await
    };
    assert_eq!(not_running.error.unwrap().kind, "NotRunning");
}

#[tokio::test]
async fn unknown_command_is_rejected() {
    let fx = Fixture::new();
    let response = handler(&fx)
        .handle(request(1, "restart_everything", json!({})))
        .await;
    let error = response.error.unwrap();
    assert_eq!(error.kind, "UnknownCommand");
    assert!(error.message.contains("restart_everything"));
    assert!(error.message.contains("get_process_status"));
}

#[tokio::test]
async fn mutations_are_audited() {
    let fx = Fixture::new();
    let audit_path = fx.dir.path().join("audit.log");
    let logger = std::sync::Arc::new(AuditLogger::with_path(audit_path.clone(), 1024 * 1024));
    let handler = CommandHandler::new(fx.supervisor.clone(), Some(logger));

    handler.handle(request(1, "get_terminals", json!({}))).await;
    let added = handler
        .handle(request(2, "add_terminal", json!({ "data": draft_json(&fx, "audited", "true") })))
        .await;
    assert!(added.ok);

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert!(audit.contains("add_terminal"));
    assert!(audit.contains("audited"));
    assert!(!audit.contains("get_terminals"));
}

#[tokio::test]
async fn server_answers_every_line_including_malformed_ones() {
    let fx = Fixture::new();
    let input = concat!(
        "{\"id\":1,\"command\":\"get_terminals\"}\n",
        "\n",
        "this is not json\n",
        "{\"id\":\"two\",\"command\":\"get_logs\",\"args\":{\"id\":\"missing\"}}\n",
    );
    let (server_out, mut client_out) = tokio::io::duplex(1 << 20);

    serve(handler(&fx), input.as_bytes(), server_out).await.unwrap();

    let mut raw = String::new();
    client_out.read_to_string(&mut raw).await.unwrap();
    let responses: Vec<Response> = raw
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(responses.len(), 3);

    let by_id = |id: Value| responses.iter().find(|r| r.id == id).unwrap();
    assert_eq!(by_id(json!(1)).result, Some(json!([])));
    assert_eq!(by_id(json!("two")).error.as_ref().unwrap().kind, "NotFound");
    assert_eq!(by_id(Value::Null).error.as_ref().unwrap().kind, "InvalidRequest");
}
