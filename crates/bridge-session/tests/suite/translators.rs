use std::collections::HashMap;

use bridge_dap::{mock::MockDapServer, DapClientConfig};
use bridge_rpc::{
    api::{AsmInstruction, Function, Location, Stackframe, Variable, VariableKind},
    mock::{MockRpcServer, MockRpcServerConfig},
};
use bridge_session::{ext, SessionError};
use pretty_assertions::assert_eq;

use super::{dap_session, rpc_session};

fn var(name: &str, kind: VariableKind, type_name: &str, value: &str) -> Variable {
    Variable {
        name: name.to_owned(),
        kind: kind.to_reflect(),
        type_name: type_name.to_owned(),
        value: value.to_owned(),
        ..Variable::default()
    }
}

#[tokio::test]
async fn toggling_twice_restores_the_breakpoint() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;
    let id = session.set_breakpoint("/src/app/main.go", 12).await.unwrap();

    assert_eq!(
        ext::toggle_breakpoint(&session, id).await.unwrap(),
        "Breakpoint 1 toggled (now disabled)"
    );
    assert!(server.breakpoints().await[0].disabled);
    assert_eq!(
        ext::toggle_breakpoint(&session, id).await.unwrap(),
        "Breakpoint 1 toggled (now enabled)"
    );
    assert!(!server.breakpoints().await[0].disabled);

    let err = ext::toggle_breakpoint(&session, 99).await.unwrap_err();
    assert_eq!(err.to_string(), "invalid argument: breakpoint 99 not found");
}

#[tokio::test]
async fn listing_and_clearing_breakpoints() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::list_breakpoints(&session).await.unwrap(),
        "Breakpoints:\nNo breakpoints set."
    );

    session.set_breakpoint("/src/app/main.go", 12).await.unwrap();
    session.set_breakpoint("/src/app/util.go", 7).await.unwrap();
    ext::toggle_breakpoint(&session, 2).await.unwrap();
    assert_eq!(
        ext::list_breakpoints(&session).await.unwrap(),
        "Breakpoints:\n1: /src/app/main.go:12 (enabled)\n2: /src/app/util.go:7 (disabled)\n"
    );

    assert_eq!(
        ext::clear_breakpoint(&session, 1).await.unwrap(),
        "Breakpoint 1 cleared"
    );
    let err = ext::clear_breakpoint(&session, 1).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "failed to clear breakpoint: rpc: error from Delve: no breakpoint with id 1"
    );
}

#[tokio::test]
async fn watchpoints_show_up_in_the_breakpoint_list() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    let created = ext::create_watchpoint(&session, "counter", None, Some(true), Some(false))
        .await
        .unwrap();
    assert_eq!(
        created,
        "Watchpoint 1 created on variable 'counter' (scope: , write: true, read: false)"
    );

    let listing = ext::list_breakpoints(&session).await.unwrap();
    let watching: Vec<&str> = listing
        .lines()
        .filter(|line| line.contains("watch counter"))
        .collect();
    assert_eq!(watching, vec!["1: watch counter (write) (enabled)"]);

    ext::create_watchpoint(&session, "total", Some("main"), Some(true), Some(true))
        .await
        .unwrap();
    let stored = &server.breakpoints().await[1];
    assert_eq!(stored.variables, vec!["main.total"]);
    assert_eq!(stored.watch_type, 3);
}

#[tokio::test]
async fn memory_dump_of_twenty_bytes_has_two_lines() {
    let memory: Vec<u8> = (0u8..32).map(|b| b.wrapping_add(60)).collect();
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        memory,
        memory_base: 0x1000,
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    let text = ext::examine_memory(&session, "0x1000", 20).await.unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0], "Memory at 0x1000:");
    assert!(lines[1].starts_with("0x0000000000001000: 3c 3d "));
    assert!(lines[2].starts_with("0x0000000000001010: 4c 4d 4e 4f "));
    assert!(lines[2].ends_with("|LMNO|"));
    assert_eq!(lines[1].len(), lines[2].len() + 12);

    let request = &server.requests().await[0];
    assert_eq!(request.params["Address"], 0x1000);
    assert_eq!(request.params["Length"], 20);
}

#[tokio::test]
async fn bad_memory_arguments_are_rejected_before_sending() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    let err = ext::examine_memory(&session, "0xnothex", 16).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    let err = ext::examine_memory(&session, "1000", 0).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    assert!(server.requests().await.is_empty());
}

#[tokio::test]
async fn checkpoints_round_trip_through_the_backend() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::create_checkpoint(&session, None).await.unwrap(),
        "Created checkpoint 1"
    );
    assert_eq!(
        ext::list_checkpoints(&session).await.unwrap(),
        "Checkpoints:\n1: #1\n"
    );
    assert_eq!(
        ext::clear_checkpoint(&session, 1).await.unwrap(),
        "Cleared checkpoint 1"
    );
    assert_eq!(
        ext::list_checkpoints(&session).await.unwrap(),
        "Checkpoints:\nNo checkpoints set."
    );
}

#[tokio::test]
async fn stacktrace_lists_frames_with_their_variables() {
    let frame = Stackframe {
        location: Location {
            pc: 0x4a1f20,
            file: "/src/app/main.go".into(),
            line: 12,
            function: Some(Function {
                name: "main.main".into(),
                ..Function::default()
            }),
        },
        arguments: Some(vec![var("n", VariableKind::Int, "int", "3")]),
        locals: Some(vec![var("msg", VariableKind::String, "string", "hi")]),
        ..Stackframe::default()
    };
    let caller = Stackframe {
        location: Location {
            file: "/usr/lib/go/src/runtime/proc.go".into(),
            line: 250,
            ..Location::default()
        },
        ..Stackframe::default()
    };
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        stack: vec![frame, caller],
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::stacktrace(&session).await.unwrap(),
        "Stack trace:\n\
         0: /src/app/main.go:12 main.main\n    n = 3\n    msg = \"hi\"\n\
         1: /usr/lib/go/src/runtime/proc.go:250 unknown\n"
    );
    let request = &server.requests().await[0];
    assert_eq!(request.params["Id"], -1);
    assert_eq!(request.params["Depth"], 20);
    assert_eq!(request.params["Full"], true);
}

#[tokio::test]
async fn locals_args_and_assignment() {
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        locals: vec![
            var("count", VariableKind::Int, "int", "2"),
            var("names", VariableKind::Slice, "[]string", ""),
        ],
        variables: HashMap::from([("count".to_owned(), var("count", VariableKind::Int, "int", "2"))]),
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::list_local_vars(&session).await.unwrap(),
        "Local variables:\ncount = 2\nnames = []\n"
    );
    assert_eq!(
        ext::list_function_args(&session).await.unwrap(),
        "Function arguments:\nNo function arguments found."
    );

    assert_eq!(
        ext::set_variable(&session, "count", "5").await.unwrap(),
        "Variable count set to 5"
    );
    assert_eq!(session.evaluate("count").await.unwrap(), "5");
}

#[tokio::test]
async fn disassembly_and_sources() {
    let instruction = |pc: u64, text: &str| AsmInstruction {
        loc: Location {
            pc,
            ..Location::default()
        },
        text: text.to_owned(),
        ..AsmInstruction::default()
    };
    let server = MockRpcServer::spawn_with_config(MockRpcServerConfig {
        instructions: vec![
            instruction(0x1000, "MOVQ AX, BX"),
            instruction(0x1004, "RET"),
            instruction(0x2000, "NOP"),
        ],
        sources: vec!["/src/app/main.go".into(), "/usr/lib/go/src/fmt/print.go".into()],
        ..MockRpcServerConfig::default()
    })
    .await
    .unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::disassemble(&session, 0x1000, 0x1008).await.unwrap(),
        "Disassembly:\n0x1000: MOVQ AX, BX\n0x1004: RET\n"
    );
    assert!(ext::disassemble(&session, 0x1008, 0x1000).await.is_err());

    assert_eq!(
        ext::list_sources(&session, Some("app")).await.unwrap(),
        "Source files matching filter 'app':\n\n/src/app/\n  main.go\n\nTotal: 1 source files\n"
    );
}

#[tokio::test]
async fn process_control_translators() {
    let server = MockRpcServer::spawn().await.unwrap();
    let session = rpc_session(&server).await;

    assert_eq!(
        ext::switch_goroutine(&session, 5).await.unwrap(),
        "Switched to goroutine 5"
    );
    assert_eq!(
        ext::switch_thread(&session, 7).await.unwrap(),
        "Switched to thread 7"
    );
    assert_eq!(ext::restart(&session).await.unwrap(), "Process restarted");
    assert!(session.is_paused());
    assert_eq!(
        ext::detach(&session, false).await.unwrap(),
        "Detached from process (kill: false)"
    );

    let requests = server.requests().await;
    assert_eq!(requests[0].params["name"], "switchGoroutine");
    assert_eq!(requests[0].params["goroutineID"], 5);
    assert_eq!(requests[1].params["threadID"], 7);

    // Detached sessions do not ask the backend to exit again.
    session.terminate().await.unwrap();
    let detaches = server
        .methods()
        .await
        .iter()
        .filter(|m| m.as_str() == "RPCServer.Detach")
        .count();
    assert_eq!(detaches, 1);
}

#[tokio::test]
async fn translators_need_a_json_rpc_session() {
    let server = MockDapServer::spawn().await.unwrap();
    let session = dap_session(server.addr(), DapClientConfig::default()).await;

    let err = ext::list_breakpoints(&session).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "list breakpoints requires a JSON-RPC backend session"
    );
}
