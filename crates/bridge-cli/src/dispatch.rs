use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use bridge_config::BackendConfig;
use bridge_session::{ext, LaunchMode, Session, SessionManager};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinSet,
};

/// One tool call: `{"id": .., "tool": "..", "arguments": {..}}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: Value,
    pub tool: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub id: Value,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Reply {
    fn ok(id: Value, result: String) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn error(id: Value, error: String) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }
}

/// Typed access to a request's `arguments` object.
struct Arguments<'a>(&'a Map<String, Value>);

impl Arguments<'_> {
    fn str(&self, name: &str) -> Result<&str> {
        self.opt_str(name)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow!("missing required argument `{name}`"))
    }

    fn opt_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    /// A present scalar as text: strings as-is (empty included), numbers and
    /// booleans as their JSON text.
    fn scalar(&self, name: &str) -> Result<String> {
        match self.0.get(name) {
            None | Some(Value::Null) => bail!("missing required argument `{name}`"),
            Some(Value::String(value)) => Ok(value.clone()),
            Some(value @ (Value::Number(_) | Value::Bool(_))) => Ok(value.to_string()),
            Some(value) => bail!("argument `{name}` must be a string, number or boolean, got {value}"),
        }
    }

    fn int(&self, name: &str) -> Result<i64> {
        match self.0.get(name) {
            None | Some(Value::Null) => bail!("missing required argument `{name}`"),
            Some(value) => as_integer(value)
                .ok_or_else(|| anyhow!("argument `{name}` must be an integer, got {value}")),
        }
    }

    fn address(&self, name: &str) -> Result<u64> {
        let value = self.int(name)?;
        u64::try_from(value).map_err(|_| anyhow!("argument `{name}` must not be negative"))
    }

    fn opt_bool(&self, name: &str) -> Option<bool> {
        self.0.get(name).and_then(Value::as_bool)
    }

    /// String items of an array argument; anything else is skipped.
    fn strings(&self, name: &str) -> Vec<String> {
        self.0
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// Tool callers often send whole numbers as floats.
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

/// Tools that act on an existing session and take a `session_id`.
const SESSION_TOOLS: &[&str] = &[
    "set_breakpoint",
    "continue",
    "next",
    "step_in",
    "step_out",
    "evaluate",
    "list_breakpoints",
    "toggle_breakpoint",
    "clear_breakpoint",
    "create_watchpoint",
    "stacktrace",
    "switch_goroutine",
    "switch_thread",
    "create_checkpoint",
    "list_checkpoints",
    "clear_checkpoint",
    "restart",
    "detach",
    "disassemble",
    "list_local_vars",
    "list_function_args",
    "set_variable",
    "examine_memory",
    "list_sources",
    "send_request",
];

/// Routes tool calls to the [`SessionManager`].
pub struct Dispatcher {
    manager: SessionManager,
}

impl Dispatcher {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            manager: SessionManager::new(config),
        }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Parses and handles one input line.
    pub async fn handle_line(&self, line: &str) -> Reply {
        match serde_json::from_str::<Request>(line) {
            Ok(request) => self.handle(request).await,
            Err(err) => Reply::error(Value::Null, format!("invalid request: {err}")),
        }
    }

    pub async fn handle(&self, request: Request) -> Reply {
        tracing::debug!(target: "bridge.cli", tool = %request.tool, id = %request.id, "tool call");
        match self.call(&request.tool, &Arguments(&request.arguments)).await {
            Ok(result) => Reply::ok(request.id, result),
            Err(err) => {
                tracing::warn!(target: "bridge.cli", tool = %request.tool, error = %err, "tool call failed");
                Reply::error(request.id, err.to_string())
            }
        }
    }

    /// Terminates every session.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    async fn call(&self, tool: &str, args: &Arguments<'_>) -> Result<String> {
        match tool {
            "start_debug" => self.start_debug(args).await,
            "start_debug_remote" => self.start_debug_remote(args).await,
            "terminate_debug" => {
                let id = args.str("session_id")?;
                self.manager.terminate_session(id).await?;
                Ok(format!("Debug session {id} terminated"))
            }
            "list_debug_sessions" => Ok(self.list_sessions()),
            tool if SESSION_TOOLS.contains(&tool) => {
                let session = self.manager.get_session(args.str("session_id")?)?;
                session_tool(&session, tool, args).await
            }
            other => bail!("unknown tool `{other}`"),
        }
    }

    async fn start_debug(&self, args: &Arguments<'_>) -> Result<String> {
        let cwd = absolute(Path::new(args.str("cwd")?))?;
        let program = args.str("program")?;
        let full_program = absolute(&cwd.join(program))?;
        let mode = match args.opt_str("mode").filter(|m| !m.is_empty()) {
            Some(mode) => mode.parse::<LaunchMode>().map_err(|err| anyhow!(err))?,
            None => infer_mode(&full_program)?,
        };
        let program_args = args.strings("args");

        let info = self
            .manager
            .create_session(&full_program, &program_args, mode)
            .await?;
        tracing::info!(target: "bridge.cli", session = %info.id, program = %info.program_path, %mode, "debug session started");
        Ok(format!(
            "Debug session started with ID: {}\nProgram: {}\nMode: {mode}",
            info.id, info.program_path
        ))
    }

    async fn start_debug_remote(&self, args: &Arguments<'_>) -> Result<String> {
        let cwd = absolute(Path::new(args.str("cwd")?))?;
        let address = args.str("address")?;

        let info = self
            .manager
            .connect_remote(address, Some(cwd.clone()))
            .await?;
        tracing::info!(target: "bridge.cli", session = %info.id, address, "remote debug session started");
        Ok(format!(
            "Remote debug session started with ID: {}\nAddress: {address}\nWorking Directory: {}",
            info.id,
            cwd.display()
        ))
    }

    fn list_sessions(&self) -> String {
        let sessions = self.manager.list_sessions();
        if sessions.is_empty() {
            return "No active debug sessions".to_owned();
        }
        let mut text = String::from("Active debug sessions:\n\n");
        for info in sessions {
            text.push_str(&format!(
                "ID: {}\nProgram: {}\nState: {}\n\n",
                info.id, info.program_path, info.state
            ));
        }
        text
    }
}

async fn session_tool(session: &Session, tool: &str, args: &Arguments<'_>) -> Result<String> {
    let text = match tool {
        "set_breakpoint" => {
            let file = args.str("file")?;
            let line = args.int("line")?;
            let id = session.set_breakpoint(file, line).await?;
            format!("Breakpoint set at {file}:{line} (ID: {id})")
        }
        "continue" => {
            session.continue_execution().await?;
            "Execution continued".to_owned()
        }
        "next" => {
            session.next().await?;
            "Stepped over current line".to_owned()
        }
        "step_in" => {
            session.step_in().await?;
            "Stepped into function".to_owned()
        }
        "step_out" => {
            session.step_out().await?;
            "Stepped out of function".to_owned()
        }
        "evaluate" => {
            let result = session.evaluate(args.str("expression")?).await?;
            format!("Expression result: {result}")
        }

        "list_breakpoints" => ext::list_breakpoints(session).await?,
        "toggle_breakpoint" => ext::toggle_breakpoint(session, args.int("breakpoint_id")?).await?,
        "clear_breakpoint" => ext::clear_breakpoint(session, args.int("breakpoint_id")?).await?,
        "create_watchpoint" => {
            ext::create_watchpoint(
                session,
                args.str("variable")?,
                args.opt_str("scope"),
                args.opt_bool("write"),
                args.opt_bool("read"),
            )
            .await?
        }
        "stacktrace" => ext::stacktrace(session).await?,
        "switch_goroutine" => ext::switch_goroutine(session, args.int("goroutine_id")?).await?,
        "switch_thread" => ext::switch_thread(session, args.int("thread_id")?).await?,
        "create_checkpoint" => ext::create_checkpoint(session, args.opt_str("note")).await?,
        "list_checkpoints" => ext::list_checkpoints(session).await?,
        "clear_checkpoint" => ext::clear_checkpoint(session, args.int("checkpoint_id")?).await?,
        "restart" => ext::restart(session).await?,
        "detach" => ext::detach(session, args.opt_bool("kill").unwrap_or(false)).await?,
        "disassemble" => {
            let start = args.address("start_pc")?;
            let end = args.address("end_pc")?;
            ext::disassemble(session, start, end).await?
        }
        "list_local_vars" => ext::list_local_vars(session).await?,
        "list_function_args" => ext::list_function_args(session).await?,
        "set_variable" => {
            let name = args.str("name")?;
            let value = args.scalar("value")?;
            ext::set_variable(session, name, &value).await?
        }
        "examine_memory" => {
            let address = args.str("address")?;
            let length = args.int("length")?;
            ext::examine_memory(session, address, length).await?
        }
        "list_sources" => ext::list_sources(session, args.opt_str("filter")).await?,
        "send_request" => {
            let method = args.str("method")?;
            let params = match args.0.get("params") {
                None | Some(Value::Null) => Value::Object(Map::new()),
                Some(params) => params.clone(),
            };
            let result = session.send_request(method, params).await?;
            serde_json::to_string_pretty(&result)?
        }
        other => bail!("unknown tool `{other}`"),
    };
    Ok(text)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("failed to resolve the current directory")?;
    Ok(cwd.join(path))
}

/// Directories and `.go` files are debugged, `_test.go` files run as tests and
/// anything else is treated as a prebuilt executable.
pub fn infer_mode(program: &Path) -> Result<LaunchMode> {
    let metadata = std::fs::metadata(program)
        .with_context(|| format!("failed to infer mode for {}", program.display()))?;
    if metadata.is_dir() {
        return Ok(LaunchMode::Debug);
    }
    let name = program
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default();
    Ok(if name.ends_with("_test.go") {
        LaunchMode::Test
    } else if name.ends_with(".go") {
        LaunchMode::Debug
    } else {
        LaunchMode::Exec
    })
}

/// Reads requests line by line until end of input, writing one reply per
/// request.
///
/// Each request runs on its own task, so a blocked execution command does not
/// hold up later lines; replies are written in completion order. At end of
/// input every session is terminated, which fails any request still waiting
/// on a backend, and the remaining replies are flushed before returning.
pub async fn serve<R, W>(dispatcher: Arc<Dispatcher>, input: R, mut output: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let (reply_tx, mut replies) = mpsc::unbounded_channel::<Reply>();
    let mut in_flight = JoinSet::new();

    let mut result = async {
        loop {
            tokio::select! {
                Some(reply) = replies.recv() => write_reply(&mut output, &reply).await?,
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    let line = line.trim().to_owned();
                    if line.is_empty() {
                        continue;
                    }
                    let dispatcher = Arc::clone(&dispatcher);
                    let reply_tx = reply_tx.clone();
                    in_flight.spawn(async move {
                        let _ = reply_tx.send(dispatcher.handle_line(&line).await);
                    });
                }
            }
            while in_flight.try_join_next().is_some() {}
        }
        anyhow::Ok(())
    }
    .await;

    tracing::info!(target: "bridge.cli", pending = in_flight.len(), "input closed; shutting down");
    drop(reply_tx);
    dispatcher.shutdown().await;
    while in_flight.join_next().await.is_some() {}
    // A session started by a request that was still in flight registers late.
    dispatcher.shutdown().await;

    while let Some(reply) = replies.recv().await {
        if result.is_ok() {
            result = write_reply(&mut output, &reply).await;
        }
    }
    result
}

async fn write_reply<W: AsyncWrite + Unpin>(output: &mut W, reply: &Reply) -> Result<()> {
    let mut bytes = serde_json::to_vec(reply)?;
    bytes.push(b'\n');
    output.write_all(&bytes).await?;
    output.flush().await?;
    Ok(())
}
