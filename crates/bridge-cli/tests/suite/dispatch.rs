use std::{collections::HashMap, sync::Arc, time::Duration};

use bridge_cli::{serve, Dispatcher, Reply};
use bridge_config::BackendConfig;
use bridge_rpc::{
    api::Variable,
    mock::{MockRpcServer, MockRpcServerConfig},
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};

async fn call(dispatcher: &Dispatcher, tool: &str, arguments: Value) -> Reply {
    let line = json!({"id": 1, "tool": tool, "arguments": arguments}).to_string();
    dispatcher.handle_line(&line).await
}

fn ok(reply: Reply) -> String {
    assert!(reply.ok, "{:?}", reply.error);
    reply.result.unwrap_or_default()
}

fn err(reply: Reply) -> String {
    assert!(!reply.ok, "{:?}", reply.result);
    reply.error.unwrap_or_default()
}

#[tokio::test]
async fn remote_session_end_to_end() {
    let server = MockRpcServer::spawn().await.unwrap();
    let dispatcher = Dispatcher::new(BackendConfig::default());
    let dir = tempfile::tempdir().unwrap();
    let cwd = dir.path().display().to_string();
    let address = server.addr().to_string();

    let started = ok(call(
        &dispatcher,
        "start_debug_remote",
        json!({"cwd": cwd, "address": address}),
    )
    .await);
    assert_eq!(
        started,
        format!("Remote debug session started with ID: session-1\nAddress: {address}\nWorking Directory: {cwd}")
    );

    let listing = ok(call(&dispatcher, "list_debug_sessions", json!({})).await);
    assert_eq!(
        listing,
        format!("Active debug sessions:\n\nID: session-1\nProgram: {address}\nState: running\n\n")
    );

    assert_eq!(
        ok(call(
            &dispatcher,
            "set_breakpoint",
            json!({"session_id": "session-1", "file": "/src/app/main.go", "line": 12}),
        )
        .await),
        "Breakpoint set at /src/app/main.go:12 (ID: 1)"
    );
    assert_eq!(
        ok(call(&dispatcher, "continue", json!({"session_id": "session-1"})).await),
        "Execution continued"
    );
    assert_eq!(
        ok(call(&dispatcher, "next", json!({"session_id": "session-1"})).await),
        "Stepped over current line"
    );
    assert_eq!(
        ok(call(&dispatcher, "list_breakpoints", json!({"session_id": "session-1"})).await),
        "Breakpoints:\n1: /src/app/main.go:12 (enabled)\n"
    );
    assert_eq!(
        ok(call(
            &dispatcher,
            "toggle_breakpoint",
            json!({"session_id": "session-1", "breakpoint_id": 1.0}),
        )
        .await),
        "Breakpoint 1 toggled (now disabled)"
    );

    assert_eq!(
        ok(call(&dispatcher, "terminate_debug", json!({"session_id": "session-1"})).await),
        "Debug session session-1 terminated"
    );
    assert!(server.detached());
    assert_eq!(
        ok(call(&dispatcher, "list_debug_sessions", json!({})).await),
        "No active debug sessions"
    );
}

#[tokio::test]
async fn missing_arguments_are_rejected_before_the_backend_is_touched() {
    let server = MockRpcServer::spawn().await.unwrap();
    let dispatcher = Dispatcher::new(BackendConfig::default());
    ok(call(
        &dispatcher,
        "start_debug_remote",
        json!({"cwd": "/tmp", "address": server.addr().to_string()}),
    )
    .await);

    let message = err(call(
        &dispatcher,
        "set_breakpoint",
        json!({"session_id": "session-1", "file": "/src/app/main.go"}),
    )
    .await);
    assert_eq!(message, "missing required argument `line`");

    let message = err(call(&dispatcher, "evaluate", json!({"session_id": "session-1"})).await);
    assert_eq!(message, "missing required argument `expression`");

    let message = err(call(
        &dispatcher,
        "disassemble",
        json!({"session_id": "session-1", "start_pc": -1, "end_pc": 16}),
    )
    .await);
    assert_eq!(message, "argument `start_pc` must not be negative");

    assert!(server.requests().await.is_empty());
}

#[tokio::test]
async fn unknown_sessions_and_tools_are_errors() {
    let dispatcher = Dispatcher::new(BackendConfig::default());

    assert_eq!(
        err(call(&dispatcher, "continue", json!({"session_id": "session-9"})).await),
        "session session-9 not found"
    );
    assert_eq!(
        err(call(&dispatcher, "terminate_debug", json!({"session_id": "session-9"})).await),
        "session session-9 not found"
    );
    assert_eq!(
        err(call(&dispatcher, "teleport", json!({})).await),
        "unknown tool `teleport`"
    );

    let reply = dispatcher.handle_line("{\"tool\": 3}").await;
    assert_eq!(reply.id, Value::Null);
    assert!(err(reply).starts_with("invalid request: "));
}

#[tokio::test]
async fn start_debug_reports_a_missing_program() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = Dispatcher::new(BackendConfig::default());

    let message = err(call(
        &dispatcher,
        "start_debug",
        json!({"cwd": dir.path().display().to_string(), "program": "nope.go"}),
    )
    .await);
    assert!(message.starts_with("failed to infer mode for "), "{message}");
    assert!(dispatcher.manager().is_empty());
}

#[tokio::test]
async fn end_of_input_terminates_every_session() {
    let server = MockRpcServer::spawn().await.unwrap();
    let dispatcher = Arc::new(Dispatcher::new(BackendConfig::default()));
    let input = format!(
        "{}\n{}\n",
        json!({"id": 1, "tool": "start_debug_remote", "arguments": {"cwd": "/tmp", "address": server.addr().to_string()}}),
        json!({"id": 2, "tool": "list_debug_sessions"}),
    );

    let mut output = Vec::new();
    serve(
        Arc::clone(&dispatcher),
        BufReader::new(input.as_bytes()),
        &mut output,
    )
    .await
    .unwrap();

    // Replies arrive in completion order.
    let replies: HashMap<i64, Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str::<Value>(line).unwrap())
        .map(|reply| (reply["id"].as_i64().unwrap(), reply))
        .collect();
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[&1]["ok"], true);
    assert_eq!(replies[&2]["ok"], true);

    assert!(dispatcher.manager().is_empty());
    assert!(server.detached());
}

async fn send(input: &mut DuplexStream, request: Value) {
    let mut line = request.to_string();
    line.push('\n');
    input.write_all(line.as_bytes()).await.unwrap();
}

async fn next_reply(replies: &mut Lines<BufReader<DuplexStream>>) -> Value {
    let line = tokio::time::timeout(Duration::from_secs(10), replies.next_line())
        .await
        .expect("reply within 10s")
        .unwrap()
        .expect("output still open");
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn a_blocked_continue_does_not_hold_up_terminate() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        reply_delay: Duration::from_secs(30),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let dispatcher = Arc::new(Dispatcher::new(BackendConfig::default()));
    let (mut input, input_rx) = tokio::io::duplex(4096);
    let (output_tx, output) = tokio::io::duplex(4096);
    let serving = tokio::spawn(serve(
        Arc::clone(&dispatcher),
        BufReader::new(input_rx),
        output_tx,
    ));
    let mut replies = BufReader::new(output).lines();

    send(
        &mut input,
        json!({"id": 1, "tool": "start_debug_remote", "arguments": {"cwd": "/tmp", "address": server.addr().to_string()}}),
    )
    .await;
    let started = next_reply(&mut replies).await;
    assert_eq!(started["ok"], true, "{started}");

    send(
        &mut input,
        json!({"id": 2, "tool": "continue", "arguments": {"session_id": "session-1"}}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    send(
        &mut input,
        json!({"id": 3, "tool": "terminate_debug", "arguments": {"session_id": "session-1"}}),
    )
    .await;

    let mut by_id = HashMap::new();
    for _ in 0..2 {
        let reply = next_reply(&mut replies).await;
        by_id.insert(reply["id"].as_i64().unwrap(), reply);
    }
    assert_eq!(
        by_id[&3],
        json!({"id": 3, "ok": true, "result": "Debug session session-1 terminated"})
    );
    assert_eq!(by_id[&2]["ok"], false);
    assert!(dispatcher.manager().is_empty());

    drop(input);
    serving.await.unwrap().unwrap();
}

#[tokio::test]
async fn set_variable_accepts_empty_strings_and_numbers() {
    let mut variables = HashMap::new();
    for name in ["label", "count"] {
        variables.insert(
            name.to_owned(),
            Variable {
                name: name.to_owned(),
                ..Variable::default()
            },
        );
    }
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        variables,
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let dispatcher = Dispatcher::new(BackendConfig::default());
    ok(call(
        &dispatcher,
        "start_debug_remote",
        json!({"cwd": "/tmp", "address": server.addr().to_string()}),
    )
    .await);

    assert_eq!(
        ok(call(
            &dispatcher,
            "set_variable",
            json!({"session_id": "session-1", "name": "label", "value": ""}),
        )
        .await),
        "Variable label set to "
    );
    assert_eq!(
        ok(call(
            &dispatcher,
            "set_variable",
            json!({"session_id": "session-1", "name": "count", "value": 5}),
        )
        .await),
        "Variable count set to 5"
    );
    assert_eq!(
        err(call(
            &dispatcher,
            "set_variable",
            json!({"session_id": "session-1", "name": "count"}),
        )
        .await),
        "missing required argument `value`"
    );

    let values: Vec<Value> = server
        .requests()
        .await
        .iter()
        .map(|request| request.params["Value"].clone())
        .collect();
    assert_eq!(values, vec![json!(""), json!("5")]);
}

#[tokio::test]
async fn send_request_forwards_a_raw_method() {
    let server = MockRpcServer::spawn().await.unwrap();
    let dispatcher = Dispatcher::new(BackendConfig::default());
    ok(call(
        &dispatcher,
        "start_debug_remote",
        json!({"cwd": "/tmp", "address": server.addr().to_string()}),
    )
    .await);

    let text = ok(call(
        &dispatcher,
        "send_request",
        json!({"session_id": "session-1", "method": "RPCServer.ListBreakpoints"}),
    )
    .await);
    let result: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(result, json!({"Breakpoints": []}));
    assert_eq!(server.methods().await, vec!["RPCServer.ListBreakpoints"]);
    assert_eq!(server.requests().await[0].params, json!({}));

    assert_eq!(
        err(call(&dispatcher, "send_request", json!({"session_id": "session-1"})).await),
        "missing required argument `method`"
    );
}
