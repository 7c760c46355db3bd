use std::{collections::HashMap, sync::Arc, time::Duration};

use bridge_rpc::{
    api::{Variable, VariableKind},
    mock::{Exchange, MockRpcServer, MockRpcServerConfig},
};
use bridge_session::{ProtocolClient, SessionError, SessionState};

use super::rpc_session;

fn int_var(name: &str, value: &str) -> Variable {
    Variable {
        name: name.to_owned(),
        type_name: "int".to_owned(),
        kind: VariableKind::Int.to_reflect(),
        value: value.to_owned(),
        ..Variable::default()
    }
}

#[tokio::test]
async fn execution_commands_update_the_paused_flag_from_the_reply() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        stop_location: Some(("/src/app/main.go".into(), 12)),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;
    assert_eq!(session.state(), SessionState::Running);

    session.continue_execution().await.unwrap();
    assert!(session.is_paused());
    session.next().await.unwrap();
    session.step_in().await.unwrap();
    session.step_out().await.unwrap();
    assert!(session.wait_until_paused(Duration::from_secs(1)).await);

    let names: Vec<String> = server
        .requests()
        .await
        .iter()
        .map(|r| r.params["name"].as_str().unwrap_or_default().to_owned())
        .collect();
    assert_eq!(names, vec!["continue", "next", "step", "stepOut"]);
}

#[tokio::test]
async fn exited_debuggee_is_not_paused() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    server.set_exited(true);
    session.continue_execution().await.unwrap();
    assert!(!session.is_paused());
    assert_eq!(session.state(), SessionState::Running);
}

#[tokio::test]
async fn breakpoints_return_backend_ids() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(session.set_breakpoint("/src/app/main.go", 12).await.unwrap(), 1);
    assert_eq!(session.set_breakpoint("/src/app/util.go", 3).await.unwrap(), 2);

    let breakpoints = server.breakpoints().await;
    assert_eq!(breakpoints[0].file, "/src/app/main.go");
    assert_eq!(breakpoints[0].line, 12);

    let err = session.set_breakpoint("/src/app/main.go", 0).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
}

#[tokio::test]
async fn evaluate_formats_the_variable_or_names_the_operation() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        variables: HashMap::from([("answer".to_owned(), int_var("answer", "42"))]),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(session.evaluate("answer").await.unwrap(), "42");

    let err = session.evaluate("nope").await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to evaluate: rpc: error from Delve: could not find symbol value for nope"
    );

    let request = &server.requests().await[0];
    assert_eq!(request.params["Scope"]["GoroutineID"], -1);
    assert_eq!(request.params["Cfg"]["MaxStringLen"], 64);
}

#[tokio::test]
async fn concurrent_callers_never_overlap_on_the_wire() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        reply_delay: Duration::from_millis(10),
        variables: HashMap::from([("x".to_owned(), int_var("x", "1"))]),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = Arc::new(rpc_session(&server).await);

    let mut tasks = Vec::new();
    for i in 0..6 {
        let session = session.clone();
        tasks.push(tokio::spawn(async move {
            if i % 2 == 0 {
                session.evaluate("x").await.map(|_| ())
            } else {
                session.set_breakpoint("/src/app/main.go", i).await.map(|_| ())
            }
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let exchanges = server.exchanges().await;
    assert_eq!(exchanges.len(), 12);
    for pair in exchanges.chunks(2) {
        match pair {
            [Exchange::Received(a), Exchange::Replied(b)] => assert_eq!(a, b),
            other => panic!("interleaved exchange: {other:?}"),
        }
    }
}

#[tokio::test]
async fn terminate_skips_the_exit_command_when_the_debuggee_already_exited() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        exited: true,
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    session.terminate().await.unwrap();

    let methods = server.methods().await;
    assert_eq!(methods, vec!["RPCServer.State"]);
    assert!(!server.detached());
    assert!(session.transport().is_closed());
    assert_eq!(session.state(), SessionState::Terminated);
}

#[tokio::test]
async fn terminate_kills_a_live_debuggee() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    session.terminate().await.unwrap();

    assert_eq!(
        server.methods().await,
        vec!["RPCServer.State", "RPCServer.Detach"]
    );
    assert_eq!(server.requests().await[1].params["Kill"], true);
    assert!(server.detached());

    // A second terminate is a no-op.
    session.terminate().await.unwrap();
    assert_eq!(server.methods().await.len(), 2);
}

#[tokio::test]
async fn failing_state_query_is_treated_as_exited() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        state_error: Some("Process 4242 has exited with status 0".into()),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    session.terminate().await.unwrap();
    assert!(!server.detached());
}

#[tokio::test]
async fn known_exit_skips_the_state_query() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;
    server.set_exited(true);
    session.continue_execution().await.unwrap();

    session.terminate().await.unwrap();
    assert_eq!(server.methods().await, vec!["RPCServer.Command"]);
}

#[tokio::test]
async fn verbs_after_terminate_fail_with_a_state_error() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;
    session.terminate().await.unwrap();

    let err = session.continue_execution().await.unwrap_err();
    assert_eq!(err.to_string(), "cannot continue: session is terminated");
    let err = session.set_breakpoint("/src/app/main.go", 3).await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::InvalidState {
            state: SessionState::Terminated,
            ..
        }
    ));
}

#[tokio::test]
async fn terminate_interrupts_a_blocked_execution_command() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        reply_delay: Duration::from_secs(30),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = Arc::new(rpc_session(&server).await);

    let running = tokio::spawn({
        let session = Arc::clone(&session);
        async move { session.continue_execution().await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;

    tokio::time::timeout(Duration::from_secs(10), session.terminate())
        .await
        .expect("terminate finishes while continue is blocked")
        .unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(session.transport().is_closed());

    let blocked = tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("continue is released by terminate")
        .unwrap();
    assert!(blocked.is_err());
}

#[tokio::test]
async fn raw_requests_pass_through_the_transport() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    let created = session
        .send_request(
            "RPCServer.CreateBreakpoint",
            serde_json::json!({"Breakpoint": {"File": "/src/app/main.go", "Line": "14"}}),
        )
        .await
        .unwrap();
    assert_eq!(created["Breakpoint"]["line"], 14);
    assert_eq!(created["Breakpoint"]["file"], "/src/app/main.go");

    let err = session
        .send_request("RPCServer.NoSuchMethod", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to send request: "), "{err}");

    let err = session.send_request(" ", serde_json::json!({})).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
}
