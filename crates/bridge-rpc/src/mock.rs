use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    sync::Mutex,
};
use tokio_util::sync::CancellationToken;

use crate::api::{
    command, AmendBreakpointIn, AsmInstruction, Breakpoint, Checkpoint, CheckpointIn,
    ClearBreakpointIn, ClearCheckpointIn, CreateBreakpointIn, DebuggerCommand, DebuggerState,
    DetachIn, DisassembleIn, EvalIn, ExamineMemoryIn, ListSourcesIn, SetIn, Stackframe, Thread,
    Variable,
};

/// A small in-process JSON-RPC backend used by unit and integration tests.
///
/// It keeps just enough state (breakpoints, checkpoints, variables) to
/// exercise the client and the session layer without a real debugger.
pub struct MockRpcServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    state: Arc<State>,
}

#[derive(Clone, Debug, Default)]
pub struct MockRpcServerConfig {
    /// Number of requests that are read and then answered by closing the
    /// connection instead of replying.
    pub drop_requests: usize,
    /// Number of requests answered with an id that does not match.
    pub mismatched_replies: usize,
    /// Delay applied before every reply.
    pub reply_delay: Duration,
    /// Report the debuggee as already exited.
    pub exited: bool,
    /// Answer `RPCServer.State` with this error.
    pub state_error: Option<String>,
    /// Variables resolvable through `Eval`/`Set`, keyed by expression.
    pub variables: HashMap<String, Variable>,
    pub locals: Vec<Variable>,
    pub args: Vec<Variable>,
    pub stack: Vec<Stackframe>,
    pub instructions: Vec<AsmInstruction>,
    /// Memory image starting at `memory_base`.
    pub memory: Vec<u8>,
    pub memory_base: u64,
    pub sources: Vec<String>,
    /// Location reported by stop-producing commands.
    pub stop_location: Option<(String, i64)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MockRequest {
    pub id: u64,
    pub method: String,
    pub params: Value,
}

/// Order in which the server observed requests and wrote replies.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exchange {
    Received(u64),
    Replied(u64),
}

impl MockRpcServer {
    pub async fn spawn() -> std::io::Result<Self> {
        Self::spawn_with_config(MockRpcServerConfig::default()).await
    }

    pub async fn spawn_with_config(config: MockRpcServerConfig) -> std::io::Result<Self> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();

        let state = Arc::new(State::new(config));
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

    /// Accepted connection count, including reconnects.
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<MockRequest> {
        self.state.requests.lock().await.clone()
    }

    pub async fn methods(&self) -> Vec<String> {
        self.state
            .requests
            .lock()
            .await
            .iter()
            .map(|r| r.method.clone())
            .collect()
    }

    pub async fn exchanges(&self) -> Vec<Exchange> {
        self.state.exchanges.lock().await.clone()
    }

    pub async fn breakpoints(&self) -> Vec<Breakpoint> {
        self.state.breakpoints.lock().await.clone()
    }

    pub fn set_exited(&self, exited: bool) {
        self.state.exited.store(exited, Ordering::SeqCst);
    }

    pub fn detached(&self) -> bool {
        self.state.detached.load(Ordering::SeqCst)
    }
}

impl Drop for MockRpcServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

struct State {
    config: MockRpcServerConfig,
    connections: AtomicUsize,
    drops_left: AtomicUsize,
    mismatches_left: AtomicUsize,
    exited: AtomicBool,
    detached: AtomicBool,
    next_breakpoint_id: AtomicI64,
    next_checkpoint_id: AtomicI64,
    requests: Mutex<Vec<MockRequest>>,
    exchanges: Mutex<Vec<Exchange>>,
    breakpoints: Mutex<Vec<Breakpoint>>,
    checkpoints: Mutex<Vec<Checkpoint>>,
    variables: Mutex<HashMap<String, Variable>>,
}

impl State {
    fn new(config: MockRpcServerConfig) -> Self {
        Self {
            connections: AtomicUsize::new(0),
            drops_left: AtomicUsize::new(config.drop_requests),
            mismatches_left: AtomicUsize::new(config.mismatched_replies),
            exited: AtomicBool::new(config.exited),
            detached: AtomicBool::new(false),
            next_breakpoint_id: AtomicI64::new(1),
            next_checkpoint_id: AtomicI64::new(1),
            requests: Mutex::new(Vec::new()),
            exchanges: Mutex::new(Vec::new()),
            breakpoints: Mutex::new(Vec::new()),
            checkpoints: Mutex::new(Vec::new()),
            variables: Mutex::new(config.variables.clone()),
            config,
        }
    }

    fn debugger_state(&self, running: bool) -> DebuggerState {
        let exited = self.exited.load(Ordering::SeqCst);
        let current_thread = match (&self.config.stop_location, exited) {
            (Some((file, line)), false) => Some(Thread {
                id: 1,
                file: file.clone(),
                line: *line,
                goroutine_id: 1,
                ..Thread::default()
            }),
            _ => None,
        };
        DebuggerState {
            pid: 4242,
            running: running && !exited,
            current_thread,
            exited,
            ..DebuggerState::default()
        }
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
                state.connections.fetch_add(1, Ordering::SeqCst);
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
) -> std::io::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let read = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            res = reader.read_line(&mut line) => res?,
        };
        if read == 0 {
            return Ok(());
        }

        let Ok(envelope) = serde_json::from_str::<Value>(line.trim_end()) else {
            return Ok(());
        };
        let id = envelope.get("id").and_then(Value::as_u64).unwrap_or(0);
        let method = envelope
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let params = envelope
            .get("params")
            .and_then(|p| p.get(0))
            .cloned()
            .unwrap_or(Value::Null);

        state.requests.lock().await.push(MockRequest {
            id,
            method: method.clone(),
            params: params.clone(),
        });
        state.exchanges.lock().await.push(Exchange::Received(id));

        if take_one(&state.drops_left) {
            return Ok(());
        }

        if !state.config.reply_delay.is_zero() {
            tokio::time::sleep(state.config.reply_delay).await;
        }

        let reply_id = if take_one(&state.mismatches_left) {
            id + 1
        } else {
            id
        };
        let reply = match handle(&state, &method, params).await {
            Ok(result) => json!({"id": reply_id, "result": result, "error": null}),
            Err(message) => json!({"id": reply_id, "result": null, "error": message}),
        };

        state.exchanges.lock().await.push(Exchange::Replied(id));
        let mut bytes = serde_json::to_vec(&reply)?;
        bytes.push(b'\n');
        writer.write_all(&bytes).await?;
        writer.flush().await?;
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn parse<T: DeserializeOwned>(params: Value) -> Result<T, String> {
    serde_json::from_value(params).map_err(|err| format!("invalid params: {err}"))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|err| err.to_string())
}

async fn handle(state: &State, method: &str, params: Value) -> Result<Value, String> {
    match method {
        "RPCServer.State" => {
            if let Some(message) = &state.config.state_error {
                return Err(message.clone());
            }
            Ok(json!({"State": to_value(state.debugger_state(false))?}))
        }
        "RPCServer.Command" => {
            let cmd: DebuggerCommand = parse(params)?;
            match cmd.name.as_str() {
                command::CONTINUE
                | command::NEXT
                | command::STEP
                | command::STEP_OUT
                | command::HALT
                | command::SWITCH_GOROUTINE
                | command::SWITCH_THREAD => {}
                other => return Err(format!("unknown command {other}")),
            }
            Ok(json!({"State": to_value(state.debugger_state(false))?}))
        }
        "RPCServer.CreateBreakpoint" => {
            let input: CreateBreakpointIn = parse(params)?;
            let mut bp = input.breakpoint;
            bp.id = state.next_breakpoint_id.fetch_add(1, Ordering::SeqCst);
            state.breakpoints.lock().await.push(bp.clone());
            Ok(json!({"Breakpoint": to_value(bp)?}))
        }
        "RPCServer.ListBreakpoints" => {
            let breakpoints = state.breakpoints.lock().await.clone();
            Ok(json!({"Breakpoints": to_value(breakpoints)?}))
        }
        "RPCServer.AmendBreakpoint" => {
            let input: AmendBreakpointIn = parse(params)?;
            let mut breakpoints = state.breakpoints.lock().await;
            let slot = breakpoints
                .iter_mut()
                .find(|bp| bp.id == input.breakpoint.id)
                .ok_or_else(|| format!("no breakpoint with id {}", input.breakpoint.id))?;
            *slot = input.breakpoint;
            Ok(json!({}))
        }
        "RPCServer.ClearBreakpoint" => {
            let input: ClearBreakpointIn = parse(params)?;
            let mut breakpoints = state.breakpoints.lock().await;
            let index = breakpoints
                .iter()
                .position(|bp| bp.id == input.id)
                .ok_or_else(|| format!("no breakpoint with id {}", input.id))?;
            let removed = breakpoints.remove(index);
            Ok(json!({"Breakpoint": to_value(removed)?}))
        }
        "RPCServer.Eval" => {
            let input: EvalIn = parse(params)?;
            let variables = state.variables.lock().await;
            let variable = variables
                .get(&input.expr)
                .cloned()
                .ok_or_else(|| format!("could not find symbol value for {}", input.expr))?;
            Ok(json!({"Variable": to_value(variable)?}))
        }
        "RPCServer.Set" => {
            let input: SetIn = parse(params)?;
            let mut variables = state.variables.lock().await;
            let variable = variables
                .get_mut(&input.symbol)
                .ok_or_else(|| format!("could not find symbol value for {}", input.symbol))?;
            variable.value = input.value;
            Ok(json!({}))
        }
        "RPCServer.Stacktrace" => Ok(json!({"Locations": to_value(&state.config.stack)?})),
        "RPCServer.ListLocalVars" => Ok(json!({"Variables": to_value(&state.config.locals)?})),
        "RPCServer.ListFunctionArgs" => Ok(json!({"Args": to_value(&state.config.args)?})),
        "RPCServer.Checkpoint" => {
            let input: CheckpointIn = parse(params)?;
            let id = state.next_checkpoint_id.fetch_add(1, Ordering::SeqCst);
            state.checkpoints.lock().await.push(Checkpoint {
                id,
                when: format!("#{id}"),
                r#where: input.r#where,
            });
            Ok(json!({"ID": id}))
        }
        "RPCServer.ListCheckpoints" => {
            let checkpoints = state.checkpoints.lock().await.clone();
            Ok(json!({"Checkpoints": to_value(checkpoints)?}))
        }
        "RPCServer.ClearCheckpoint" => {
            let input: ClearCheckpointIn = parse(params)?;
            let mut checkpoints = state.checkpoints.lock().await;
            let before = checkpoints.len();
            checkpoints.retain(|c| c.id != input.id);
            if checkpoints.len() == before {
                return Err(format!("could not find checkpoint {}", input.id));
            }
            Ok(json!({}))
        }
        "RPCServer.Restart" => {
            state.exited.store(false, Ordering::SeqCst);
            Ok(json!({"DiscardedBreakpoints": []}))
        }
        "RPCServer.Detach" => {
            let _input: DetachIn = parse(params)?;
            state.detached.store(true, Ordering::SeqCst);
            Ok(json!({}))
        }
        "RPCServer.Disassemble" => {
            let input: DisassembleIn = parse(params)?;
            let instructions: Vec<_> = state
                .config
                .instructions
                .iter()
                .filter(|inst| inst.loc.pc >= input.start_pc && inst.loc.pc < input.end_pc)
                .cloned()
                .collect();
            Ok(json!({"Disassemble": to_value(instructions)?}))
        }
        "RPCServer.ExamineMemory" => {
            let input: ExamineMemoryIn = parse(params)?;
            let offset = input
                .address
                .checked_sub(state.config.memory_base)
                .ok_or_else(|| format!("cannot read memory at {:#x}", input.address))?
                as usize;
            let len = usize::try_from(input.length).map_err(|_| "invalid length".to_owned())?;
            let mem: Vec<u8> = state
                .config
                .memory
                .iter()
                .skip(offset)
                .take(len)
                .copied()
                .collect();
            let out = crate::api::ExaminedMemoryOut {
                mem,
                is_little_endian: true,
            };
            to_value(out)
        }
        "RPCServer.ListSources" => {
            let input: ListSourcesIn = parse(params)?;
            let sources: Vec<_> = state
                .config
                .sources
                .iter()
                .filter(|s| input.filter.is_empty() || s.contains(&input.filter))
                .cloned()
                .collect();
            Ok(json!({"Sources": sources}))
        }
        other => Err(format!("rpc: can't find method {other}")),
    }
}
