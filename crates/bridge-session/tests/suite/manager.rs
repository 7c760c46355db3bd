use std::path::{Path, PathBuf};

use bridge_config::{BackendConfig, BackendKind};
use bridge_rpc::mock::MockRpcServer;
use bridge_session::{LaunchMode, SessionError, SessionManager, SessionState};
use pretty_assertions::assert_eq;

fn quick_config() -> BackendConfig {
    BackendConfig {
        startup_timeout_ms: 2_000,
        connect_timeout_ms: 500,
        ..BackendConfig::default()
    }
}

#[tokio::test]
async fn remote_sessions_are_registered_listed_and_removed() {
    let server = MockRpcServer::spawn().await.unwrap();
    let manager = SessionManager::new(quick_config());
    let addr = server.addr().to_string();

    let first = manager
        .connect_remote(&addr, Some(PathBuf::from("/src/app")))
        .await
        .unwrap();
    let second = manager.connect_remote(&addr, None).await.unwrap();
    assert_eq!(first.id, "session-1");
    assert_eq!(second.id, "session-2");
    assert_eq!(first.program_path, addr);
    assert_eq!(first.mode, LaunchMode::Remote);
    assert_eq!(first.backend, BackendKind::Rpc);
    assert_eq!(first.state, SessionState::Running);
    assert_eq!(first.working_dir, "/src/app");
    assert_eq!(second.working_dir, ".");

    let ids: Vec<String> = manager.list_sessions().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["session-1", "session-2"]);

    let session = manager.get_session("session-1").unwrap();
    assert_eq!(session.id(), "session-1");

    manager.terminate_session("session-1").await.unwrap();
    assert_eq!(session.state(), SessionState::Terminated);
    assert!(matches!(
        manager.get_session("session-1"),
        Err(SessionError::NotFound(_))
    ));
    assert!(matches!(
        manager.terminate_session("session-1").await,
        Err(SessionError::NotFound(_))
    ));
    assert_eq!(manager.len(), 1);
}

#[tokio::test]
async fn remote_mode_registers_an_unconnected_session() {
    let server = MockRpcServer::spawn().await.unwrap();
    let manager = SessionManager::new(quick_config());

    let info = manager
        .create_session(Path::new("/src/app/main.go"), &[], LaunchMode::Remote)
        .await
        .unwrap();
    assert_eq!(info.state, SessionState::Initializing);
    assert_eq!(info.working_dir, "/src/app");

    let session = manager.get_session(&info.id).unwrap();
    let err = session.continue_execution().await.unwrap_err();
    assert_eq!(err.to_string(), "cannot continue: session is initializing");

    session
        .connect_remote(&server.addr().to_string())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(manager.list_sessions()[0].state, SessionState::Running);
}

#[tokio::test]
async fn failed_remote_connections_are_not_registered() {
    let manager = SessionManager::new(quick_config());

    let unused = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    assert!(manager.connect_remote(&unused.to_string(), None).await.is_err());

    let err = manager.connect_remote("  ", None).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidArgument(_)));
    assert!(manager.is_empty());
}

#[tokio::test]
async fn missing_debugger_binary_is_a_spawn_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(BackendConfig {
        dlv_path: dir.path().join("no-such-dlv"),
        ..quick_config()
    });

    let err = manager
        .create_session(&dir.path().join("main.go"), &[], LaunchMode::Debug)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Spawn { .. }), "{err}");
    assert!(manager.is_empty());
}

#[cfg(unix)]
#[tokio::test]
async fn backend_that_exits_immediately_fails_startup() {
    let dir = tempfile::tempdir().unwrap();
    let manager = SessionManager::new(BackendConfig {
        dlv_path: PathBuf::from("false"),
        ..quick_config()
    });

    let err = manager
        .create_session(dir.path(), &["--verbose".to_owned()], LaunchMode::Test)
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::BackendStartup { .. }), "{err}");
    assert!(manager.is_empty());
}

#[tokio::test]
async fn shutdown_terminates_every_session() {
    let server = MockRpcServer::spawn().await.unwrap();
    let manager = SessionManager::new(quick_config());
    let addr = server.addr().to_string();

    manager.connect_remote(&addr, None).await.unwrap();
    manager.connect_remote(&addr, None).await.unwrap();
    let sessions = [
        manager.get_session("session-1").unwrap(),
        manager.get_session("session-2").unwrap(),
    ];

    manager.shutdown().await;
    assert!(manager.is_empty());
    for session in sessions {
        assert_eq!(session.state(), SessionState::Terminated);
    }
    assert!(server.detached());
}
