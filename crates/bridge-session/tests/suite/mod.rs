mod dap_session;
mod manager;
mod rpc_session;
mod translators;

use bridge_dap::{DapClient, DapClientConfig};
use bridge_rpc::{mock::MockRpcServer, RpcClient};
use bridge_session::{LaunchMode, Session, Transport};

/// A remote-mode session attached to the mock JSON-RPC backend.
pub(crate) async fn rpc_session(server: &MockRpcServer) -> Session {
    let session = Session::new(
        "session-1",
        Transport::Rpc(RpcClient::default()),
        "/src/app/main.go",
        LaunchMode::Remote,
        "/src/app",
        None,
    );
    session
        .connect_remote(&server.addr().to_string())
        .await
        .unwrap();
    session
}

pub(crate) async fn dap_session(addr: std::net::SocketAddr, config: DapClientConfig) -> Session {
    let session = Session::new(
        "session-1",
        Transport::Dap(DapClient::new(config)),
        "/src/app/main.go",
        LaunchMode::Remote,
        "/src/app",
        None,
    );
    session.connect_remote(&addr.to_string()).await.unwrap();
    session
}
