use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use bridge_config::BackendKind;
use bridge_dap::{
    protocol::{
        EvaluateResponseBody, ScopesResponseBody, SetBreakpointsArguments,
        SetBreakpointsResponseBody, Source, SourceBreakpoint, StackTraceResponseBody,
        VariablesResponseBody,
    },
    DapClient, DapError,
};
use bridge_rpc::{
    api::{
        command, Breakpoint, CommandOut, CreateBreakpointIn, CreateBreakpointOut, DebuggerCommand,
        DebuggerState, DetachIn, EvalIn, EvalOut, EvalScope, LoadConfig, RpcMethod, StateIn,
        StateOut,
    },
    RpcClient, RpcError,
};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::{process::Child, sync::Mutex, time::Instant};

use crate::{
    error::{ResultExt, SessionError, SessionResult},
    format,
    transport::{LaunchSpec, ProtocolClient, Transport},
};

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const PROCESS_EXIT_TIMEOUT: Duration = Duration::from_secs(5);
// Bounds the state query and exit command sent while terminating. An
// execution command in flight holds the JSON-RPC connection until the
// debuggee stops, which may be never.
const EXIT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle of a [`Session`].
///
/// `Initializing -> Running <-> Paused`, and `Terminated` from anywhere.
/// `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Initializing,
    Running,
    Paused,
    Terminated,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionState::Initializing => "initializing",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
            SessionState::Terminated => "terminated",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the backend obtains the debuggee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LaunchMode {
    /// Build and debug a main package.
    Debug,
    /// Build and debug a test binary.
    Test,
    /// Debug a precompiled executable.
    Exec,
    /// Attach to a backend that is already running elsewhere.
    Remote,
}

impl LaunchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LaunchMode::Debug => "debug",
            LaunchMode::Test => "test",
            LaunchMode::Exec => "exec",
            LaunchMode::Remote => "remote",
        }
    }
}

impl fmt::Display for LaunchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LaunchMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LaunchMode::Debug),
            "test" => Ok(LaunchMode::Test),
            "exec" => Ok(LaunchMode::Exec),
            "remote" => Ok(LaunchMode::Remote),
            other => Err(format!(
                "unknown mode `{other}` (expected `debug`, `test`, `exec` or `remote`)"
            )),
        }
    }
}

/// Snapshot of a session for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub id: String,
    pub program_path: String,
    pub mode: LaunchMode,
    pub backend: BackendKind,
    pub state: SessionState,
    pub working_dir: String,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {} ({} via {}, cwd {})",
            self.id, self.state, self.program_path, self.mode, self.backend, self.working_dir
        )
    }
}

/// One debugging session: a transport, the backend process it owns and the
/// session state machine.
///
/// All methods take `&self`; sessions are shared behind an `Arc` by the
/// [`SessionManager`](crate::SessionManager) and may be driven concurrently.
/// Requests on one session are serialized by its transport.
#[derive(Debug)]
pub struct Session {
    id: String,
    transport: Transport,
    program: PathBuf,
    mode: LaunchMode,
    working_dir: parking_lot::Mutex<PathBuf>,
    process: Mutex<Option<Child>>,
    state: parking_lot::Mutex<SessionState>,
    debuggee_exited: AtomicBool,
    // Lines requested per source file; `setBreakpoints` replaces the whole
    // set for a file, so every request re-sends all of them.
    dap_breakpoints: Mutex<HashMap<String, Vec<i64>>>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        transport: Transport,
        program: impl Into<PathBuf>,
        mode: LaunchMode,
        working_dir: impl Into<PathBuf>,
        process: Option<Child>,
    ) -> Self {
        Self {
            id: id.into(),
            transport,
            program: program.into(),
            mode,
            working_dir: parking_lot::Mutex::new(working_dir.into()),
            process: Mutex::new(process),
            state: parking_lot::Mutex::new(SessionState::Initializing),
            debuggee_exited: AtomicBool::new(false),
            dap_breakpoints: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn mode(&self) -> LaunchMode {
        self.mode
    }

    pub fn working_dir(&self) -> PathBuf {
        self.working_dir.lock().clone()
    }

    pub fn set_working_dir(&self, dir: impl Into<PathBuf>) {
        *self.working_dir.lock() = dir.into();
    }

    /// Current state. On the DAP transport paused/running is read from the
    /// client's execution status, which the event listener keeps current.
    pub fn state(&self) -> SessionState {
        let state = *self.state.lock();
        match (&self.transport, state) {
            (Transport::Dap(client), SessionState::Running | SessionState::Paused) => {
                if client.execution_status().is_stopped() {
                    SessionState::Paused
                } else {
                    SessionState::Running
                }
            }
            _ => state,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SessionState::Paused
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            program_path: self.program.display().to_string(),
            mode: self.mode,
            backend: self.transport.kind(),
            state: self.state(),
            working_dir: self.working_dir().display().to_string(),
        }
    }

    /// Connects to a freshly spawned backend and runs the launch handshake.
    ///
    /// The backend needs a moment to start listening, so connecting is
    /// retried until `startup_timeout` elapses or the backend process exits.
    pub async fn start(
        &self,
        launch: &LaunchSpec,
        addr: &str,
        startup_timeout: Duration,
    ) -> SessionResult<()> {
        self.ensure_state("start", SessionState::Initializing)?;

        let deadline = Instant::now() + startup_timeout;
        loop {
            let err = match self.transport.connect(addr).await {
                Ok(()) => break,
                Err(err) => err,
            };
            if let Some(status) = self.backend_exit_status().await {
                return Err(SessionError::BackendStartup {
                    addr: addr.to_owned(),
                    reason: format!("backend exited early ({status})"),
                });
            }
            if Instant::now() + CONNECT_RETRY_INTERVAL >= deadline {
                return Err(SessionError::BackendStartup {
                    addr: addr.to_owned(),
                    reason: err.to_string(),
                });
            }
            tracing::trace!(target: "bridge.session", session = %self.id, addr, error = %err, "backend not ready yet");
            tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
        }

        self.transport.initialize(launch).await.during("initialize")?;
        self.set_state(SessionState::Running);
        tracing::info!(
            target: "bridge.session",
            session = %self.id,
            addr,
            mode = %launch.mode,
            program = %launch.program.display(),
            "session started"
        );
        Ok(())
    }

    /// Connects to a backend that is already running at `addr`.
    pub async fn connect_remote(&self, addr: &str) -> SessionResult<()> {
        self.ensure_state("connect", SessionState::Initializing)?;

        self.transport.connect(addr).await.during("connect")?;
        let launch = LaunchSpec {
            mode: LaunchMode::Remote,
            program: self.program.clone(),
            args: Vec::new(),
            working_dir: self.working_dir(),
        };
        self.transport.initialize(&launch).await.during("attach")?;
        self.set_state(SessionState::Running);
        tracing::info!(target: "bridge.session", session = %self.id, addr, "attached to remote backend");
        Ok(())
    }

    /// Sets a line breakpoint and returns the backend's id for it.
    pub async fn set_breakpoint(&self, file: &str, line: i64) -> SessionResult<i64> {
        self.ensure_active("set breakpoint")?;
        if file.is_empty() {
            return Err(SessionError::InvalidArgument("file must not be empty".into()));
        }
        if line <= 0 {
            return Err(SessionError::InvalidArgument(format!(
                "line must be positive, got {line}"
            )));
        }

        match &self.transport {
            Transport::Rpc(client) => {
                let input = CreateBreakpointIn {
                    breakpoint: Breakpoint {
                        file: file.to_owned(),
                        line,
                        ..Breakpoint::default()
                    },
                };
                let out: CreateBreakpointOut = client
                    .call(RpcMethod::CreateBreakpoint, &input)
                    .await
                    .during("set breakpoint")?;
                tracing::debug!(target: "bridge.session", session = %self.id, id = out.breakpoint.id, file, line, "breakpoint set");
                Ok(out.breakpoint.id)
            }
            Transport::Dap(client) => self.set_dap_breakpoint(client, file, line).await,
        }
    }

    async fn set_dap_breakpoint(
        &self,
        client: &DapClient,
        file: &str,
        line: i64,
    ) -> SessionResult<i64> {
        let mut cache = self.dap_breakpoints.lock().await;
        let lines = cache.entry(file.to_owned()).or_default();
        let added = !lines.contains(&line);
        if added {
            lines.push(line);
        }

        let arguments = SetBreakpointsArguments {
            source: Source {
                name: None,
                path: Some(file.to_owned()),
            },
            breakpoints: lines
                .iter()
                .map(|&line| SourceBreakpoint {
                    line,
                    condition: None,
                })
                .collect(),
        };

        let response = match client
            .send_request("setBreakpoints", serde_json::to_value(&arguments)?)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                if added {
                    lines.retain(|&l| l != line);
                }
                return Err(SessionError::from(err).during("set breakpoint"));
            }
        };
        drop(cache);

        let body: SetBreakpointsResponseBody = serde_json::from_value(response.body())?;
        let id = body
            .breakpoints
            .iter()
            .find(|bp| bp.line == Some(line))
            .and_then(|bp| bp.id);
        match id {
            Some(id) => Ok(id),
            None => {
                tracing::warn!(
                    target: "bridge.session",
                    session = %self.id,
                    file,
                    line,
                    "backend did not report an id for the breakpoint"
                );
                Ok(0)
            }
        }
    }

    pub async fn continue_execution(&self) -> SessionResult<()> {
        self.ensure_active("continue")?;
        match &self.transport {
            Transport::Rpc(client) => self.rpc_command(client, command::CONTINUE, "continue").await,
            // Continue is accepted whatever the pause state.
            Transport::Dap(client) => self.dap_resume(client, "continue", "continue").await,
        }
    }

    pub async fn next(&self) -> SessionResult<()> {
        self.step("next", command::NEXT, "next").await
    }

    pub async fn step_in(&self) -> SessionResult<()> {
        self.step("step in", command::STEP, "stepIn").await
    }

    pub async fn step_out(&self) -> SessionResult<()> {
        self.step("step out", command::STEP_OUT, "stepOut").await
    }

    async fn step(
        &self,
        operation: &'static str,
        rpc_command: &str,
        dap_command: &str,
    ) -> SessionResult<()> {
        self.ensure_active(operation)?;
        match &self.transport {
            // The JSON-RPC backend reports its own error when not stopped.
            Transport::Rpc(client) => self.rpc_command(client, rpc_command, operation).await,
            Transport::Dap(client) => {
                self.ensure_paused(operation)?;
                self.dap_resume(client, dap_command, operation).await
            }
        }
    }

    async fn rpc_command(
        &self,
        client: &RpcClient,
        name: &str,
        operation: &'static str,
    ) -> SessionResult<()> {
        let previous = self.set_state(SessionState::Running);
        let out: CommandOut = match client
            .call(RpcMethod::Command, &DebuggerCommand::named(name))
            .await
        {
            Ok(out) => out,
            Err(err) => {
                self.set_state(previous);
                return Err(SessionError::from(err).during(operation));
            }
        };
        self.apply_rpc_state(&out.state);
        Ok(())
    }

    async fn dap_resume(
        &self,
        client: &DapClient,
        command: &str,
        operation: &'static str,
    ) -> SessionResult<()> {
        let thread_id = client.execution_status().stopped_thread().unwrap_or(1);
        client
            .send_request(command, json!({ "threadId": thread_id }))
            .await
            .during(operation)?;
        tracing::debug!(target: "bridge.session", session = %self.id, command, thread_id, "resumed");
        Ok(())
    }

    /// Records the debugger state returned by a JSON-RPC execution command.
    pub(crate) fn apply_rpc_state(&self, state: &DebuggerState) {
        if state.exited {
            self.debuggee_exited.store(true, Ordering::SeqCst);
            tracing::info!(target: "bridge.session", session = %self.id, exit_status = state.exit_status, "debuggee exited");
            self.set_state(SessionState::Running);
        } else if state.is_paused() {
            self.debuggee_exited.store(false, Ordering::SeqCst);
            self.set_state(SessionState::Paused);
        } else {
            self.set_state(SessionState::Running);
        }
    }

    /// The backend restarted the debuggee from the beginning.
    pub(crate) fn mark_restarted(&self) {
        self.debuggee_exited.store(false, Ordering::SeqCst);
        self.set_state(SessionState::Paused);
    }

    /// The backend let go of the debuggee; terminating must not ask again.
    pub(crate) fn mark_detached(&self) {
        self.debuggee_exited.store(true, Ordering::SeqCst);
        self.set_state(SessionState::Running);
    }

    /// Waits for the debuggee to stop. Returns whether it is paused.
    pub async fn wait_until_paused(&self, timeout: Duration) -> bool {
        match &self.transport {
            Transport::Dap(client) => {
                let mut execution = client.watch_execution();
                // The borrowed status must be released before reading it again.
                let _ = tokio::time::timeout(
                    timeout,
                    execution.wait_for(|status| status.is_stopped() || status.is_exited()),
                )
                .await;
                self.is_paused()
            }
            Transport::Rpc(_) => {
                let deadline = Instant::now() + timeout;
                loop {
                    match self.state() {
                        SessionState::Paused => return true,
                        SessionState::Terminated => return false,
                        _ if Instant::now() >= deadline => return false,
                        _ => tokio::time::sleep(Duration::from_millis(20)).await,
                    }
                }
            }
        }
    }

    /// Evaluates `expr` in the current frame and renders the result as text.
    pub async fn evaluate(&self, expr: &str) -> SessionResult<String> {
        self.ensure_active("evaluate")?;
        if expr.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "expression must not be empty".into(),
            ));
        }

        match &self.transport {
            Transport::Rpc(client) => {
                let input = EvalIn {
                    scope: EvalScope::CURRENT,
                    expr: expr.to_owned(),
                    cfg: Some(LoadConfig::BOUNDED),
                };
                let out: EvalOut = client
                    .call(RpcMethod::Eval, &input)
                    .await
                    .during("evaluate")?;
                let variable = out.variable.ok_or_else(|| {
                    SessionError::from(RpcError::Protocol("eval returned no variable".into()))
                        .during("evaluate")
                })?;
                Ok(format::summarize(&variable))
            }
            Transport::Dap(client) => {
                self.ensure_paused("evaluate")?;
                self.evaluate_dap(client, expr).await
            }
        }
    }

    async fn evaluate_dap(&self, client: &DapClient, expr: &str) -> SessionResult<String> {
        let thread_id = client.execution_status().stopped_thread().unwrap_or(1);
        let stack = client
            .send_request(
                "stackTrace",
                json!({ "threadId": thread_id, "startFrame": 0, "levels": 1 }),
            )
            .await
            .during("evaluate")?;
        let stack: StackTraceResponseBody = serde_json::from_value(stack.body())?;
        let frame = stack.stack_frames.first().ok_or_else(|| {
            SessionError::from(DapError::Protocol("stopped thread has no frames".into()))
                .during("evaluate")
        })?;

        let evaluated = client
            .send_request(
                "evaluate",
                json!({ "expression": expr, "frameId": frame.id, "context": "repl" }),
            )
            .await;
        match evaluated {
            Ok(response) => {
                let body: EvaluateResponseBody = serde_json::from_value(response.body())?;
                Ok(body.result)
            }
            Err(err) => {
                tracing::debug!(target: "bridge.session", session = %self.id, expr, error = %err, "evaluate failed; searching frame scopes");
                match self.lookup_in_scopes(client, frame.id, expr).await? {
                    Some(value) => Ok(value),
                    None => Err(SessionError::from(err).during("evaluate")),
                }
            }
        }
    }

    async fn lookup_in_scopes(
        &self,
        client: &DapClient,
        frame_id: i64,
        name: &str,
    ) -> SessionResult<Option<String>> {
        let scopes = client
            .send_request("scopes", json!({ "frameId": frame_id }))
            .await
            .during("evaluate")?;
        let scopes: ScopesResponseBody = serde_json::from_value(scopes.body())?;

        for scope in scopes.scopes {
            let variables = client
                .send_request(
                    "variables",
                    json!({ "variablesReference": scope.variables_reference }),
                )
                .await
                .during("evaluate")?;
            let variables: VariablesResponseBody = serde_json::from_value(variables.body())?;
            if let Some(variable) = variables.variables.into_iter().find(|v| v.name == name) {
                return Ok(Some(variable.value));
            }
        }
        Ok(None)
    }

    /// Sends `method` with `params` as-is and returns the backend's result.
    ///
    /// `method` is an RPC method name (`RPCServer.ListGoroutines`) or a DAP
    /// command (`threads`). The session state is not updated, so execution
    /// commands should go through the dedicated verbs.
    pub async fn send_request(&self, method: &str, params: Value) -> SessionResult<Value> {
        self.ensure_active("send request")?;
        if method.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "method must not be empty".into(),
            ));
        }
        tracing::debug!(target: "bridge.session", session = %self.id, method, "raw request");
        self.transport
            .send_request(method, params)
            .await
            .during("send request")
    }

    /// Ends the session. Always succeeds; cleanup failures are logged.
    ///
    /// Unless the debuggee already exited, the backend is asked to kill it
    /// first, within a short bound. The connection is closed and the owned
    /// backend process killed in every case, which also fails any request
    /// still waiting on the backend. Terminating twice is a no-op.
    pub async fn terminate(&self) -> SessionResult<()> {
        let previous = std::mem::replace(&mut *self.state.lock(), SessionState::Terminated);
        if previous == SessionState::Terminated {
            return Ok(());
        }

        if previous != SessionState::Initializing && !self.transport.is_closed() {
            let exit = async {
                if self.debuggee_has_exited().await {
                    return Ok(());
                }
                self.send_exit().await
            };
            match tokio::time::timeout(EXIT_COMMAND_TIMEOUT, exit).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(target: "bridge.session", session = %self.id, error = %err, "exit command failed")
                }
                Err(_) => {
                    tracing::warn!(target: "bridge.session", session = %self.id, "backend busy; closing without an exit command")
                }
            }
        }

        self.transport.close().await;
        self.kill_backend().await;
        tracing::info!(target: "bridge.session", session = %self.id, "session terminated");
        Ok(())
    }

    async fn debuggee_has_exited(&self) -> bool {
        match &self.transport {
            Transport::Rpc(client) => {
                if self.debuggee_exited.load(Ordering::SeqCst) {
                    return true;
                }
                let state: Result<StateOut, _> = client
                    .call(RpcMethod::State, &StateIn { non_blocking: true })
                    .await;
                match state {
                    Ok(out) => out.state.is_some_and(|state| state.exited),
                    Err(err) => {
                        tracing::debug!(target: "bridge.session", session = %self.id, error = %err, "state query failed; assuming the debuggee exited");
                        true
                    }
                }
            }
            Transport::Dap(client) => client.execution_status().is_exited() || client.is_closed(),
        }
    }

    async fn send_exit(&self) -> SessionResult<()> {
        match &self.transport {
            Transport::Rpc(client) => {
                let _: Value = client
                    .call(RpcMethod::Detach, &DetachIn { kill: true })
                    .await?;
            }
            Transport::Dap(client) => {
                client
                    .send_request("disconnect", json!({ "terminateDebuggee": true }))
                    .await?;
            }
        }
        Ok(())
    }

    async fn kill_backend(&self) {
        let Some(mut child) = self.process.lock().await.take() else {
            return;
        };
        if let Err(err) = child.start_kill() {
            tracing::debug!(target: "bridge.session", session = %self.id, error = %err, "backend already gone");
        }
        match tokio::time::timeout(PROCESS_EXIT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(target: "bridge.session", session = %self.id, %status, "backend exited")
            }
            Ok(Err(err)) => {
                tracing::warn!(target: "bridge.session", session = %self.id, error = %err, "waiting for backend failed")
            }
            Err(_) => {
                tracing::warn!(target: "bridge.session", session = %self.id, "backend did not exit after kill")
            }
        }
    }

    async fn backend_exit_status(&self) -> Option<std::process::ExitStatus> {
        let mut process = self.process.lock().await;
        process.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// The JSON-RPC client, for operations only that backend supports.
    pub(crate) fn rpc_for(&self, operation: &'static str) -> SessionResult<&RpcClient> {
        self.ensure_active(operation)?;
        match &self.transport {
            Transport::Rpc(client) => Ok(client),
            Transport::Dap(_) => Err(SessionError::UnsupportedTransport { operation }),
        }
    }

    fn ensure_active(&self, operation: &'static str) -> SessionResult<()> {
        match self.state() {
            state @ (SessionState::Initializing | SessionState::Terminated) => {
                Err(SessionError::InvalidState { operation, state })
            }
            _ => Ok(()),
        }
    }

    fn ensure_state(&self, operation: &'static str, expected: SessionState) -> SessionResult<()> {
        let state = self.state();
        if state == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidState { operation, state })
        }
    }

    fn ensure_paused(&self, operation: &'static str) -> SessionResult<()> {
        if self.is_paused() {
            Ok(())
        } else {
            Err(SessionError::NotPaused { operation })
        }
    }

    /// Moves to `next` unless already terminated; returns the previous state.
    fn set_state(&self, next: SessionState) -> SessionState {
        let mut state = self.state.lock();
        let previous = *state;
        if previous != SessionState::Terminated {
            *state = next;
        }
        previous
    }
}
