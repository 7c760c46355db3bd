use std::fmt::Write as _;

use bridge_rpc::api::{
    EvalScope, ExamineMemoryIn, ExaminedMemoryOut, ListFunctionArgsOut, ListLocalVarsOut,
    ListVarsIn, LoadConfig, RpcMethod, SetIn, Variable,
};
use serde_json::Value;

use crate::error::{ResultExt, SessionError, SessionResult};
use crate::format;
use crate::session::Session;

const BYTES_PER_LINE: usize = 16;

fn current_frame() -> ListVarsIn {
    ListVarsIn {
        scope: EvalScope::CURRENT,
        cfg: LoadConfig::BOUNDED,
    }
}

pub async fn list_local_vars(session: &Session) -> SessionResult<String> {
    let out: ListLocalVarsOut = session
        .rpc_for("list local variables")?
        .call(RpcMethod::ListLocalVars, &current_frame())
        .await
        .during("list local variables")?;
    Ok(render_variables(
        "Local variables:\n",
        "No local variables found.",
        &out.variables.unwrap_or_default(),
    ))
}

pub async fn list_function_args(session: &Session) -> SessionResult<String> {
    let out: ListFunctionArgsOut = session
        .rpc_for("list function arguments")?
        .call(RpcMethod::ListFunctionArgs, &current_frame())
        .await
        .during("list function arguments")?;
    Ok(render_variables(
        "Function arguments:\n",
        "No function arguments found.",
        &out.args.unwrap_or_default(),
    ))
}

fn render_variables(header: &str, empty: &str, variables: &[Variable]) -> String {
    let mut text = String::from(header);
    if variables.is_empty() {
        text.push_str(empty);
        return text;
    }
    for variable in variables {
        let _ = writeln!(text, "{}", format::variable_line(variable));
    }
    text
}

/// Assigns `value` to `name` in the current frame.
pub async fn set_variable(session: &Session, name: &str, value: &str) -> SessionResult<String> {
    if name.trim().is_empty() {
        return Err(SessionError::InvalidArgument(
            "variable name must not be empty".into(),
        ));
    }

    let input = SetIn {
        scope: EvalScope::CURRENT,
        symbol: name.to_owned(),
        value: value.to_owned(),
    };
    let _: Value = session
        .rpc_for("set variable")?
        .call(RpcMethod::Set, &input)
        .await
        .during("set variable")?;
    Ok(format!("Variable {name} set to {value}"))
}

/// Parses a hex address, with or without a `0x` prefix.
pub fn parse_address(address: &str) -> SessionResult<u64> {
    let trimmed = address.trim();
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|err| {
        SessionError::InvalidArgument(format!("failed to parse address '{address}': {err}"))
    })
}

/// Reads `length` bytes at `address` and renders a hex dump.
pub async fn examine_memory(
    session: &Session,
    address: &str,
    length: i64,
) -> SessionResult<String> {
    let base = parse_address(address)?;
    if length <= 0 {
        return Err(SessionError::InvalidArgument(format!(
            "length must be positive, got {length}"
        )));
    }

    let out: ExaminedMemoryOut = session
        .rpc_for("examine memory")?
        .call(
            RpcMethod::ExamineMemory,
            &ExamineMemoryIn {
                address: base,
                length,
            },
        )
        .await
        .during("examine memory")?;

    let mut text = format!("Memory at {address}:\n");
    if out.mem.is_empty() {
        text.push_str("No memory data found.");
        return Ok(text);
    }
    text.push_str(&format_memory_dump(&out.mem, base));
    Ok(text)
}

/// 16 bytes per line: address, hex bytes, then the printable characters.
///
/// Bytes outside `[32, 126]` show as `.` and a short last line is padded so
/// the character column stays aligned.
pub fn format_memory_dump(mem: &[u8], base: u64) -> String {
    let mut text = String::new();
    for (index, chunk) in mem.chunks(BYTES_PER_LINE).enumerate() {
        let offset = (index * BYTES_PER_LINE) as u64;
        let _ = write!(text, "0x{:016x}: ", base.wrapping_add(offset));
        for byte in chunk {
            let _ = write!(text, "{byte:02x} ");
        }
        for _ in chunk.len()..BYTES_PER_LINE {
            text.push_str("   ");
        }
        text.push_str(" |");
        text.extend(chunk.iter().map(|&b| {
            if (32..=126).contains(&b) {
                b as char
            } else {
                '.'
            }
        }));
        text.push_str("|\n");
    }
    text
}
