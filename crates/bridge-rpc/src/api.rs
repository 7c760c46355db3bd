//! Request and reply payloads of the Delve JSON-RPC v2 API.
//!
//! Field names follow the backend's JSON encoding: API records use the
//! lower-camel tags Delve declares, while the `*In`/`*Out` argument structs
//! carry no tags and therefore serialize with capitalized Go field names.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// JSON-RPC method names understood by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    Command,
    State,
    CreateBreakpoint,
    ListBreakpoints,
    ClearBreakpoint,
    AmendBreakpoint,
    Eval,
    Set,
    Stacktrace,
    ListLocalVars,
    ListFunctionArgs,
    Checkpoint,
    ListCheckpoints,
    ClearCheckpoint,
    Restart,
    Detach,
    Disassemble,
    ExamineMemory,
    ListSources,
}

impl RpcMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcMethod::Command => "RPCServer.Command",
            RpcMethod::State => "RPCServer.State",
            RpcMethod::CreateBreakpoint => "RPCServer.CreateBreakpoint",
            RpcMethod::ListBreakpoints => "RPCServer.ListBreakpoints",
            RpcMethod::ClearBreakpoint => "RPCServer.ClearBreakpoint",
            RpcMethod::AmendBreakpoint => "RPCServer.AmendBreakpoint",
            RpcMethod::Eval => "RPCServer.Eval",
            RpcMethod::Set => "RPCServer.Set",
            RpcMethod::Stacktrace => "RPCServer.Stacktrace",
            RpcMethod::ListLocalVars => "RPCServer.ListLocalVars",
            RpcMethod::ListFunctionArgs => "RPCServer.ListFunctionArgs",
            RpcMethod::Checkpoint => "RPCServer.Checkpoint",
            RpcMethod::ListCheckpoints => "RPCServer.ListCheckpoints",
            RpcMethod::ClearCheckpoint => "RPCServer.ClearCheckpoint",
            RpcMethod::Restart => "RPCServer.Restart",
            RpcMethod::Detach => "RPCServer.Detach",
            RpcMethod::Disassemble => "RPCServer.Disassemble",
            RpcMethod::ExamineMemory => "RPCServer.ExamineMemory",
            RpcMethod::ListSources => "RPCServer.ListSources",
        }
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Names accepted by `RPCServer.Command`.
pub mod command {
    pub const CONTINUE: &str = "continue";
    pub const NEXT: &str = "next";
    pub const STEP: &str = "step";
    pub const STEP_OUT: &str = "stepOut";
    pub const HALT: &str = "halt";
    pub const SWITCH_THREAD: &str = "switchThread";
    pub const SWITCH_GOROUTINE: &str = "switchGoroutine";
}

/// Read/write mask carried by watchpoints.
pub const WATCH_READ: u8 = 1 << 0;
pub const WATCH_WRITE: u8 = 1 << 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Breakpoint {
    #[serde(rename = "id", default)]
    pub id: i64,
    #[serde(rename = "name", default)]
    pub name: String,
    #[serde(rename = "addr", default)]
    pub addr: u64,
    #[serde(rename = "file", default)]
    pub file: String,
    #[serde(rename = "line", default)]
    pub line: i64,
    #[serde(
        rename = "functionName",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub function_name: String,
    #[serde(rename = "Cond", default, skip_serializing_if = "String::is_empty")]
    pub cond: String,
    #[serde(rename = "continue", default)]
    pub tracepoint: bool,
    #[serde(rename = "goroutine", default)]
    pub goroutine: bool,
    #[serde(rename = "stacktrace", default)]
    pub stacktrace: i64,
    #[serde(rename = "variables", default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,
    #[serde(rename = "WatchExpr", default, skip_serializing_if = "String::is_empty")]
    pub watch_expr: String,
    #[serde(rename = "WatchType", default, skip_serializing_if = "is_zero")]
    pub watch_type: u8,
    #[serde(rename = "hitCount", default)]
    pub hit_count: HashMap<String, u64>,
    #[serde(rename = "totalHitCount", default)]
    pub total_hit_count: u64,
    #[serde(rename = "disabled", default)]
    pub disabled: bool,
}

fn is_zero(value: &u8) -> bool {
    *value == 0
}

impl Breakpoint {
    pub fn is_watchpoint(&self) -> bool {
        !self.watch_expr.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LoadConfig {
    #[serde(rename = "FollowPointers")]
    pub follow_pointers: bool,
    #[serde(rename = "MaxVariableRecurse")]
    pub max_variable_recurse: i64,
    #[serde(rename = "MaxStringLen")]
    pub max_string_len: i64,
    #[serde(rename = "MaxArrayValues")]
    pub max_array_values: i64,
    #[serde(rename = "MaxStructFields")]
    pub max_struct_fields: i64,
}

impl LoadConfig {
    /// Bounded load used for every variable-returning request: pointers are
    /// followed one level deep, strings and arrays capped at 64 entries, struct
    /// fields unlimited.
    pub const BOUNDED: LoadConfig = LoadConfig {
        follow_pointers: true,
        max_variable_recurse: 1,
        max_string_len: 64,
        max_array_values: 64,
        max_struct_fields: -1,
    };
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self::BOUNDED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalScope {
    #[serde(rename = "GoroutineID")]
    pub goroutine_id: i64,
    #[serde(rename = "Frame")]
    pub frame: i64,
    #[serde(rename = "DeferredCall", default)]
    pub deferred_call: i64,
}

impl EvalScope {
    /// Topmost frame of the currently selected goroutine.
    pub const CURRENT: EvalScope = EvalScope {
        goroutine_id: -1,
        frame: 0,
        deferred_call: 0,
    };
}

impl Default for EvalScope {
    fn default() -> Self {
        Self::CURRENT
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Function {
    #[serde(rename = "name", default)]
    pub name: String,
    #[serde(rename = "value", default)]
    pub value: u64,
    #[serde(rename = "optimized", default)]
    pub optimized: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    #[serde(rename = "pc", default)]
    pub pc: u64,
    #[serde(rename = "file", default)]
    pub file: String,
    #[serde(rename = "line", default)]
    pub line: i64,
    #[serde(rename = "function", default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
}

impl Location {
    pub fn function_name(&self) -> &str {
        self.function.as_ref().map(|f| f.name.as_str()).unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stackframe {
    #[serde(flatten)]
    pub location: Location,
    #[serde(rename = "Locals", default)]
    pub locals: Option<Vec<Variable>>,
    #[serde(rename = "Arguments", default)]
    pub arguments: Option<Vec<Variable>>,
    #[serde(rename = "FrameOffset", default)]
    pub frame_offset: i64,
    #[serde(rename = "Err", default, skip_serializing_if = "String::is_empty")]
    pub err: String,
}

/// Go `reflect.Kind` of a variable, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    Invalid,
    Bool,
    Int,
    Uint,
    Float,
    Complex,
    String,
    Array,
    Slice,
    Map,
    Struct,
    Pointer,
    Interface,
    Chan,
    Func,
    UnsafePointer,
}

impl VariableKind {
    pub fn from_reflect(kind: u32) -> Self {
        match kind {
            1 => VariableKind::Bool,
            2..=6 => VariableKind::Int,
            7..=12 => VariableKind::Uint,
            13 | 14 => VariableKind::Float,
            15 | 16 => VariableKind::Complex,
            17 => VariableKind::Array,
            18 => VariableKind::Chan,
            19 => VariableKind::Func,
            20 => VariableKind::Interface,
            21 => VariableKind::Map,
            22 => VariableKind::Pointer,
            23 => VariableKind::Slice,
            24 => VariableKind::String,
            25 => VariableKind::Struct,
            26 => VariableKind::UnsafePointer,
            _ => VariableKind::Invalid,
        }
    }

    pub fn to_reflect(self) -> u32 {
        match self {
            VariableKind::Invalid => 0,
            VariableKind::Bool => 1,
            VariableKind::Int => 2,
            VariableKind::Uint => 7,
            VariableKind::Float => 14,
            VariableKind::Complex => 16,
            VariableKind::Array => 17,
            VariableKind::Chan => 18,
            VariableKind::Func => 19,
            VariableKind::Interface => 20,
            VariableKind::Map => 21,
            VariableKind::Pointer => 22,
            VariableKind::Slice => 23,
            VariableKind::String => 24,
            VariableKind::Struct => 25,
            VariableKind::UnsafePointer => 26,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    #[serde(rename = "name", default)]
    pub name: String,
    #[serde(rename = "addr", default)]
    pub addr: u64,
    #[serde(rename = "type", default)]
    pub type_name: String,
    #[serde(rename = "realType", default)]
    pub real_type: String,
    #[serde(rename = "kind", default)]
    pub kind: u32,
    #[serde(rename = "value", default)]
    pub value: String,
    #[serde(rename = "len", default)]
    pub len: i64,
    #[serde(rename = "cap", default)]
    pub cap: i64,
    #[serde(rename = "children", default)]
    pub children: Option<Vec<Variable>>,
    #[serde(rename = "unreadable", default, skip_serializing_if = "String::is_empty")]
    pub unreadable: String,
}

impl Variable {
    pub fn kind(&self) -> VariableKind {
        VariableKind::from_reflect(self.kind)
    }

    pub fn children(&self) -> &[Variable] {
        self.children.as_deref().unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    #[serde(rename = "id", default)]
    pub id: i64,
    #[serde(rename = "pc", default)]
    pub pc: u64,
    #[serde(rename = "file", default)]
    pub file: String,
    #[serde(rename = "line", default)]
    pub line: i64,
    #[serde(rename = "function", default, skip_serializing_if = "Option::is_none")]
    pub function: Option<Function>,
    #[serde(rename = "goroutineID", default)]
    pub goroutine_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goroutine {
    #[serde(rename = "id", default)]
    pub id: i64,
    #[serde(rename = "threadID", default)]
    pub thread_id: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerState {
    #[serde(rename = "Pid", default)]
    pub pid: i64,
    #[serde(rename = "Running", default)]
    pub running: bool,
    #[serde(
        rename = "currentThread",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_thread: Option<Thread>,
    #[serde(
        rename = "currentGoroutine",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub selected_goroutine: Option<Goroutine>,
    #[serde(rename = "NextInProgress", default)]
    pub next_in_progress: bool,
    #[serde(rename = "exited", default)]
    pub exited: bool,
    #[serde(rename = "exitStatus", default)]
    pub exit_status: i64,
    #[serde(rename = "When", default, skip_serializing_if = "String::is_empty")]
    pub when: String,
}

impl DebuggerState {
    /// The debuggee is stopped and inspectable.
    pub fn is_paused(&self) -> bool {
        !self.running && !self.exited
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebuggerCommand {
    #[serde(rename = "name")]
    pub name: String,
    #[serde(rename = "threadID", default, skip_serializing_if = "is_zero_i64")]
    pub thread_id: i64,
    #[serde(rename = "goroutineID", default, skip_serializing_if = "is_zero_i64")]
    pub goroutine_id: i64,
    #[serde(rename = "expr", default, skip_serializing_if = "String::is_empty")]
    pub expr: String,
}

fn is_zero_i64(value: &i64) -> bool {
    *value == 0
}

impl DebuggerCommand {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(rename = "id", default)]
    pub id: i64,
    #[serde(rename = "when", default)]
    pub when: String,
    #[serde(rename = "where", default)]
    pub r#where: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AsmInstruction {
    #[serde(rename = "Loc", default)]
    pub loc: Location,
    #[serde(rename = "Text", default)]
    pub text: String,
    #[serde(rename = "Breakpoint", default)]
    pub breakpoint: bool,
    #[serde(rename = "AtPC", default)]
    pub at_pc: bool,
}

// Argument and result envelopes.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateIn {
    #[serde(rename = "NonBlocking")]
    pub non_blocking: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateOut {
    #[serde(rename = "State", default)]
    pub state: Option<DebuggerState>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOut {
    #[serde(rename = "State", default)]
    pub state: DebuggerState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBreakpointIn {
    #[serde(rename = "Breakpoint")]
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateBreakpointOut {
    #[serde(rename = "Breakpoint", default)]
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBreakpointsIn {
    #[serde(rename = "All")]
    pub all: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListBreakpointsOut {
    #[serde(rename = "Breakpoints", default)]
    pub breakpoints: Option<Vec<Breakpoint>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearBreakpointIn {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Name", default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearBreakpointOut {
    #[serde(rename = "Breakpoint", default)]
    pub breakpoint: Option<Breakpoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AmendBreakpointIn {
    #[serde(rename = "Breakpoint")]
    pub breakpoint: Breakpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalIn {
    #[serde(rename = "Scope")]
    pub scope: EvalScope,
    #[serde(rename = "Expr")]
    pub expr: String,
    #[serde(rename = "Cfg")]
    pub cfg: Option<LoadConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalOut {
    #[serde(rename = "Variable", default)]
    pub variable: Option<Variable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetIn {
    #[serde(rename = "Scope")]
    pub scope: EvalScope,
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Value")]
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacktraceIn {
    #[serde(rename = "Id")]
    pub id: i64,
    #[serde(rename = "Depth")]
    pub depth: i64,
    #[serde(rename = "Full")]
    pub full: bool,
    #[serde(rename = "Defers", default)]
    pub defers: bool,
    #[serde(rename = "Cfg")]
    pub cfg: Option<LoadConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacktraceOut {
    #[serde(rename = "Locations", default)]
    pub locations: Option<Vec<Stackframe>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVarsIn {
    #[serde(rename = "Scope")]
    pub scope: EvalScope,
    #[serde(rename = "Cfg")]
    pub cfg: LoadConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListLocalVarsOut {
    #[serde(rename = "Variables", default)]
    pub variables: Option<Vec<Variable>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFunctionArgsOut {
    #[serde(rename = "Args", default)]
    pub args: Option<Vec<Variable>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointIn {
    #[serde(rename = "Where")]
    pub r#where: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointOut {
    #[serde(rename = "ID", default)]
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCheckpointsOut {
    #[serde(rename = "Checkpoints", default)]
    pub checkpoints: Option<Vec<Checkpoint>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClearCheckpointIn {
    #[serde(rename = "ID")]
    pub id: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestartIn {
    #[serde(rename = "Position", default)]
    pub position: String,
    #[serde(rename = "ResetArgs", default)]
    pub reset_args: bool,
    #[serde(rename = "NewArgs", default)]
    pub new_args: Vec<String>,
    #[serde(rename = "Rerecord", default)]
    pub rerecord: bool,
    #[serde(rename = "Rebuild", default)]
    pub rebuild: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetachIn {
    #[serde(rename = "Kill")]
    pub kill: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisassembleIn {
    #[serde(rename = "Scope")]
    pub scope: EvalScope,
    #[serde(rename = "StartPC")]
    pub start_pc: u64,
    #[serde(rename = "EndPC")]
    pub end_pc: u64,
    #[serde(rename = "Flavour", default)]
    pub flavour: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisassembleOut {
    #[serde(rename = "Disassemble", default)]
    pub instructions: Option<Vec<AsmInstruction>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamineMemoryIn {
    #[serde(rename = "Address")]
    pub address: u64,
    #[serde(rename = "Length")]
    pub length: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExaminedMemoryOut {
    #[serde(rename = "Mem", default, with = "go_bytes")]
    pub mem: Vec<u8>,
    #[serde(rename = "IsLittleEndian", default)]
    pub is_little_endian: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSourcesIn {
    #[serde(rename = "Filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSourcesOut {
    #[serde(rename = "Sources", default)]
    pub sources: Option<Vec<String>>,
}

/// The backend encodes byte slices as standard base64 strings (`null` when
/// empty).
mod go_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = Option::<String>::deserialize(deserializer)?;
        match encoded {
            None => Ok(Vec::new()),
            Some(text) => base64::engine::general_purpose::STANDARD
                .decode(text.as_bytes())
                .map_err(serde::de::Error::custom),
        }
    }
}
