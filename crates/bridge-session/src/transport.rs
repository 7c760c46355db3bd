use std::path::PathBuf;

use async_trait::async_trait;
use bridge_config::{BackendConfig, BackendKind};
use bridge_dap::{protocol::LaunchArguments, DapClient, DapClientConfig};
use bridge_rpc::{RpcClient, RpcClientConfig, RpcError};
use serde_json::Value;

use crate::error::SessionResult;
use crate::session::LaunchMode;

/// What to launch (or attach to) once the backend connection is up.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchSpec {
    pub mode: LaunchMode,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Contract shared by both backend transports.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn connect(&self, addr: &str) -> SessionResult<()>;

    async fn close(&self);

    /// Protocol handshake once connected.
    async fn initialize(&self, launch: &LaunchSpec) -> SessionResult<()>;

    /// Generic request; `method` is an RPC method name or a DAP command.
    async fn send_request(&self, method: &str, params: Value) -> SessionResult<Value>;

    fn is_closed(&self) -> bool;
}

#[async_trait]
impl ProtocolClient for RpcClient {
    async fn connect(&self, addr: &str) -> SessionResult<()> {
        Ok(RpcClient::connect(self, addr).await?)
    }

    async fn close(&self) {
        RpcClient::close(self).await;
    }

    async fn initialize(&self, _launch: &LaunchSpec) -> SessionResult<()> {
        // The headless backend launches the debuggee itself; only the
        // connection needs to be live.
        if self.is_connected().await {
            Ok(())
        } else {
            Err(RpcError::NotConnected.into())
        }
    }

    async fn send_request(&self, method: &str, params: Value) -> SessionResult<Value> {
        Ok(RpcClient::send_request(self, method, params).await?)
    }

    fn is_closed(&self) -> bool {
        RpcClient::is_closed(self)
    }
}

#[async_trait]
impl ProtocolClient for DapClient {
    async fn connect(&self, addr: &str) -> SessionResult<()> {
        Ok(DapClient::connect(self, addr).await?)
    }

    async fn close(&self) {
        DapClient::close(self).await;
    }

    async fn initialize(&self, launch: &LaunchSpec) -> SessionResult<()> {
        if launch.mode == LaunchMode::Remote {
            return Ok(self.start_attach_remote().await?);
        }

        let mut arguments = LaunchArguments::new(
            launch.mode.as_str(),
            launch.program.to_string_lossy(),
            launch.args.clone(),
        );
        arguments.cwd = Some(launch.working_dir.to_string_lossy().into_owned());
        Ok(self.start_launch(&arguments).await?)
    }

    async fn send_request(&self, method: &str, params: Value) -> SessionResult<Value> {
        let response = DapClient::send_request(self, method, params).await?;
        Ok(response.body())
    }

    fn is_closed(&self) -> bool {
        DapClient::is_closed(self)
    }
}

/// The transport a session talks through, fixed at session creation.
#[derive(Debug, Clone)]
pub enum Transport {
    Rpc(RpcClient),
    Dap(DapClient),
}

impl Transport {
    pub fn from_config(config: &BackendConfig) -> Self {
        match config.kind {
            BackendKind::Rpc => Transport::Rpc(RpcClient::new(RpcClientConfig {
                connect_timeout: config.connect_timeout(),
            })),
            BackendKind::Dap => Transport::Dap(DapClient::new(DapClientConfig {
                connect_timeout: config.connect_timeout(),
                reply_timeout: config.reply_timeout(),
                variables_timeout: config.variables_timeout(),
                ..DapClientConfig::default()
            })),
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Transport::Rpc(_) => BackendKind::Rpc,
            Transport::Dap(_) => BackendKind::Dap,
        }
    }

    fn client(&self) -> &dyn ProtocolClient {
        match self {
            Transport::Rpc(client) => client,
            Transport::Dap(client) => client,
        }
    }
}

#[async_trait]
impl ProtocolClient for Transport {
    async fn connect(&self, addr: &str) -> SessionResult<()> {
        self.client().connect(addr).await
    }

    async fn close(&self) {
        self.client().close().await
    }

    async fn initialize(&self, launch: &LaunchSpec) -> SessionResult<()> {
        self.client().initialize(launch).await
    }

    async fn send_request(&self, method: &str, params: Value) -> SessionResult<Value> {
        self.client().send_request(method, params).await
    }

    fn is_closed(&self) -> bool {
        self.client().is_closed()
    }
}
