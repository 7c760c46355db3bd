use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicI64, Ordering},
        Arc,
    },
};

use serde_json::{json, Value};
use tokio::{
    net::{tcp::OwnedWriteHalf, TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::{DapReader, DapWriter},
    protocol::{make_event, make_response, Request, Variable},
};

/// A small in-process DAP backend used by unit and integration tests.
pub struct MockDapServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug)]
pub struct MockDapServerConfig {
    /// Commands that never receive a response.
    pub silent_commands: Vec<String>,
    /// Emit a `stopped` event when a silent command arrives.
    pub stop_on_silent: bool,
    /// Emit an unrelated `output` event before every response.
    pub event_before_response: bool,
    /// Commands answered with `success: false`.
    pub failing_commands: Vec<String>,
    /// Emit `stopped` after `continue`/`next`/`stepIn`/`stepOut`.
    pub stop_after_resume: bool,
    /// Emit `stopped` with reason `entry` after `configurationDone`.
    pub stop_on_entry: bool,
    /// Emit `exited` + `terminated` instead of `stopped` after `continue`.
    pub exit_on_continue: bool,
    /// Variables returned for every `variables` request.
    pub variables: Vec<Variable>,
    /// `evaluate` results keyed by expression.
    pub evaluate_results: HashMap<String, String>,
}

impl Default for MockDapServerConfig {
    fn default() -> Self {
        Self {
            silent_commands: Vec::new(),
            stop_on_silent: false,
            event_before_response: false,
            failing_commands: Vec::new(),
            stop_after_resume: true,
            stop_on_entry: true,
            exit_on_continue: false,
            variables: Vec::new(),
            evaluate_results: HashMap::new(),
        }
    }
}

impl MockDapServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(MockDapServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockDapServerConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State {
            config,
            next_seq: AtomicI64::new(1),
            next_breakpoint_id: AtomicI64::new(1),
            requests: Mutex::new(Vec::new()),
        });
        let task_shutdown = shutdown.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            let _ = run(listener, task_state, task_shutdown).await;
        });

        Ok(Self {
            addr,
            shutdown,
            state,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn requests(&self) -> Vec<Request> {
        self.state.requests.lock().await.clone()
    }

    pub async fn commands(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .await
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }
}

impl Drop for MockDapServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct State {
    config: MockDapServerConfig,
    next_seq: AtomicI64,
    next_breakpoint_id: AtomicI64,
    requests: Mutex<Vec<Request>>,
}

impl State {
    fn seq(&self) -> i64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }
}

async fn run(
    listener: TcpListener,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            accept = listener.accept() => {
                let (socket, _) = accept?;
                let state = state.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let _ = serve_connection(socket, state, shutdown).await;
                });
            }
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    state: Arc<State>,
    shutdown: CancellationToken,
) -> crate::Result<()> {
    let (reader, writer) = socket.into_split();
    let mut reader = DapReader::new(reader);
    let mut writer = DapWriter::new(writer);

    loop {
        let value = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = reader.read_value() => res?,
        };
        let Some(value) = value else {
            return Ok(());
        };
        let request: Request = serde_json::from_value(value)?;
        state.requests.lock().await.push(request.clone());
        handle(&state, &mut writer, &request).await?;
    }
}

async fn send_event(
    state: &State,
    writer: &mut DapWriter<OwnedWriteHalf>,
    event: &str,
    body: Value,
) -> crate::Result<()> {
    let event = make_event(state.seq(), event, Some(body));
    writer.write_value(&serde_json::to_value(event)?).await
}

async fn handle(
    state: &State,
    writer: &mut DapWriter<OwnedWriteHalf>,
    request: &Request,
) -> crate::Result<()> {
    let config = &state.config;
    let command = request.command.as_str();

    if config.silent_commands.iter().any(|c| c == command) {
        if config.stop_on_silent {
            send_event(
                state,
                writer,
                "stopped",
                json!({"reason": "breakpoint", "threadId": 1}),
            )
            .await?;
        }
        return Ok(());
    }

    if config.event_before_response {
        send_event(
            state,
            writer,
            "output",
            json!({"category": "stdout", "output": "hello\n"}),
        )
        .await?;
    }

    if config.failing_commands.iter().any(|c| c == command) {
        let response = make_response(
            state.seq(),
            request,
            false,
            None,
            Some(format!("{command} failed")),
        );
        return writer.write_value(&serde_json::to_value(response)?).await;
    }

    let args = &request.arguments;
    let (success, body, message) = match command {
        "initialize" => (
            true,
            Some(json!({"supportsConfigurationDoneRequest": true})),
            None,
        ),
        "launch" | "attach" | "configurationDone" | "disconnect" | "terminate" => {
            (true, None, None)
        }
        "continue" => (true, Some(json!({"allThreadsContinued": true})), None),
        "next" | "stepIn" | "stepOut" => (true, None, None),
        "setBreakpoints" => {
            let breakpoints: Vec<Value> = args
                .get("breakpoints")
                .and_then(Value::as_array)
                .map(|requested| {
                    requested
                        .iter()
                        .map(|bp| {
                            json!({
                                "id": state.next_breakpoint_id.fetch_add(1, Ordering::SeqCst),
                                "verified": true,
                                "line": bp.get("line").cloned(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            (true, Some(json!({ "breakpoints": breakpoints })), None)
        }
        "threads" => (true, Some(json!({"threads": [{"id": 1, "name": "main"}]})), None),
        "stackTrace" => (
            true,
            Some(json!({
                "stackFrames": [{
                    "id": 1000,
                    "name": "main.main",
                    "source": {"path": "/src/main.go"},
                    "line": 12,
                }],
                "totalFrames": 1,
            })),
            None,
        ),
        "scopes" => (
            true,
            Some(json!({"scopes": [{"name": "Locals", "variablesReference": 1}]})),
            None,
        ),
        "variables" => (
            true,
            Some(json!({ "variables": serde_json::to_value(&config.variables)? })),
            None,
        ),
        "evaluate" => {
            let expression = args
                .get("expression")
                .and_then(Value::as_str)
                .unwrap_or_default();
            match config.evaluate_results.get(expression) {
                Some(result) => (
                    true,
                    Some(json!({"result": result, "variablesReference": 0})),
                    None,
                ),
                None => (
                    false,
                    None,
                    Some(format!("unable to find function context for {expression}")),
                ),
            }
        }
        other => (false, None, Some(format!("unsupported command {other}"))),
    };

    let response = make_response(state.seq(), request, success, body, message);
    writer.write_value(&serde_json::to_value(response)?).await?;

    match command {
        "initialize" => send_event(state, writer, "initialized", json!({})).await?,
        "configurationDone" if config.stop_on_entry => {
            send_event(
                state,
                writer,
                "stopped",
                json!({"reason": "entry", "threadId": 1}),
            )
            .await?
        }
        "continue" if config.exit_on_continue => {
            send_event(state, writer, "exited", json!({"exitCode": 0})).await?;
            send_event(state, writer, "terminated", json!({})).await?;
        }
        "continue" | "next" | "stepIn" | "stepOut" if config.stop_after_resume => {
            let reason = if command == "continue" {
                "breakpoint"
            } else {
                "step"
            };
            send_event(
                state,
                writer,
                "stopped",
                json!({"reason": reason, "threadId": 1}),
            )
            .await?
        }
        "disconnect" | "terminate" => {
            send_event(state, writer, "terminated", json!({})).await?
        }
        _ => {}
    }

    Ok(())
}
