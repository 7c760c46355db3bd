use std::{collections::HashMap, time::Duration};

use bridge_dap::{
    mock::{MockDapServer, MockDapServerConfig},
    protocol::Variable,
    DapClientConfig,
};
use bridge_session::{SessionError, SessionState};
use pretty_assertions::assert_eq;

use super::dap_session;

const WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn stepping_requires_a_stopped_debuggee() {
    let server = MockDapServer::spawn_with_config(MockDapServerConfig {
        stop_on_entry: false,
        ..MockDapServerConfig::default()
    })
    .await
    .unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;
    assert_eq!(session.state(), SessionState::Running);

    let err = session.next().await.unwrap_err();
    assert!(matches!(err, SessionError::NotPaused { operation: "next" }));
    let err = session.evaluate("x").await.unwrap_err();
    assert_eq!(err.to_string(), "cannot evaluate: program is not paused");

    // Continue needs no stop.
    session.continue_execution().await.unwrap();
    assert!(session.wait_until_paused(WAIT).await);
    session.next().await.unwrap();
    assert!(session.wait_until_paused(WAIT).await);
    session.step_in().await.unwrap();

    assert_eq!(server.commands().await.last().map(String::as_str), Some("stepIn"));
    let continue_request = server
        .requests()
        .await
        .into_iter()
        .find(|r| r.command == "continue")
        .unwrap();
    assert_eq!(continue_request.arguments["threadId"], 1);
}

#[tokio::test]
async fn breakpoints_resend_every_line_for_the_file() {
    let server = MockDapServer::spawn().await.unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;

    assert_eq!(session.set_breakpoint("/src/app/main.go", 10).await.unwrap(), 1);
    assert_eq!(session.set_breakpoint("/src/app/main.go", 20).await.unwrap(), 3);
    // Setting the same line again does not grow the request.
    assert_eq!(session.set_breakpoint("/src/app/main.go", 20).await.unwrap(), 5);

    let requests: Vec<_> = server
        .requests()
        .await
        .into_iter()
        .filter(|r| r.command == "setBreakpoints")
        .collect();
    assert_eq!(requests.len(), 3);
    let lines: Vec<i64> = requests[2].arguments["breakpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|bp| bp["line"].as_i64().unwrap())
        .collect();
    assert_eq!(lines, vec![10, 20]);
    assert_eq!(requests[2].arguments["source"]["path"], "/src/app/main.go");
}

#[tokio::test]
async fn rejected_breakpoints_are_not_remembered() {
    let server = MockDapServer::spawn_with_config(MockDapServerConfig {
        failing_commands: vec!["setBreakpoints".into()],
        ..MockDapServerConfig::default()
    })
    .await
    .unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;

    let err = session
        .set_breakpoint("/src/app/main.go", 10)
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("failed to set breakpoint: "));
    session
        .set_breakpoint("/src/app/main.go", 11)
        .await
        .unwrap_err();

    let requests = server.requests().await;
    let last = requests
        .iter()
        .rev()
        .find(|r| r.command == "setBreakpoints")
        .unwrap();
    assert_eq!(last.arguments["breakpoints"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn evaluate_falls_back_to_frame_variables() {
    let server = MockDapServer::spawn_with_config(MockDapServerConfig {
        evaluate_results: HashMap::from([("answer".to_owned(), "42".to_owned())]),
        variables: vec![Variable {
            name: "local".into(),
            value: "7".into(),
            type_name: Some("int".into()),
            variables_reference: 0,
        }],
        ..MockDapServerConfig::default()
    })
    .await
    .unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;
    assert!(session.wait_until_paused(WAIT).await);

    assert_eq!(session.evaluate("answer").await.unwrap(), "42");
    assert_eq!(session.evaluate("local").await.unwrap(), "7");

    let err = session.evaluate("missing").await.unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("failed to evaluate: "), "{message}");
    assert!(
        message.contains("unable to find function context for missing"),
        "{message}"
    );

    let evaluate = server
        .requests()
        .await
        .into_iter()
        .find(|r| r.command == "evaluate")
        .unwrap();
    assert_eq!(evaluate.arguments["frameId"], 1000);
    assert_eq!(evaluate.arguments["context"], "repl");
}

#[tokio::test]
async fn terminate_disconnects_a_live_debuggee() {
    let server = MockDapServer::spawn().await.unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;

    session.terminate().await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);

    let disconnect = server
        .requests()
        .await
        .into_iter()
        .find(|r| r.command == "disconnect")
        .unwrap();
    assert_eq!(disconnect.arguments["terminateDebuggee"], true);
}

#[tokio::test]
async fn terminate_after_exit_skips_disconnect() {
    let server = MockDapServer::spawn_with_config(MockDapServerConfig {
        exit_on_continue: true,
        stop_on_entry: false,
        ..MockDapServerConfig::default()
    })
    .await
    .unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;

    session.continue_execution().await.unwrap();
    // Returns once the exit is observed; the debuggee never stops again.
    assert!(!session.wait_until_paused(WAIT).await);

    session.terminate().await.unwrap();
    assert!(!server.commands().await.iter().any(|c| c == "disconnect"));
}
