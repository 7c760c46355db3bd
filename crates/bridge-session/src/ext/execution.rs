use std::fmt::Write as _;

use bridge_rpc::api::{DetachIn, DisassembleIn, DisassembleOut, EvalScope, RestartIn, RpcMethod};
use serde_json::Value;

use crate::error::{ResultExt, SessionError, SessionResult};
use crate::session::Session;

/// Restarts the debuggee from the beginning with its original arguments.
pub async fn restart(session: &Session) -> SessionResult<String> {
    let _: Value = session
        .rpc_for("restart process")?
        .call(RpcMethod::Restart, &RestartIn::default())
        .await
        .during("restart process")?;
    session.mark_restarted();
    Ok("Process restarted".to_owned())
}

/// Detaches from the debuggee, killing it when `kill` is set.
pub async fn detach(session: &Session, kill: bool) -> SessionResult<String> {
    let _: Value = session
        .rpc_for("detach")?
        .call(RpcMethod::Detach, &DetachIn { kill })
        .await
        .during("detach")?;
    session.mark_detached();
    Ok(format!("Detached from process (kill: {kill})"))
}

/// Disassembles `[start_pc, end_pc)` in the current frame.
pub async fn disassemble(session: &Session, start_pc: u64, end_pc: u64) -> SessionResult<String> {
    if end_pc <= start_pc {
        return Err(SessionError::InvalidArgument(format!(
            "end address {end_pc:#x} must be greater than start address {start_pc:#x}"
        )));
    }

    let input = DisassembleIn {
        scope: EvalScope::CURRENT,
        start_pc,
        end_pc,
        flavour: 0,
    };
    let out: DisassembleOut = session
        .rpc_for("disassemble")?
        .call(RpcMethod::Disassemble, &input)
        .await
        .during("disassemble")?;

    let instructions = out.instructions.unwrap_or_default();
    let mut text = String::from("Disassembly:\n");
    if instructions.is_empty() {
        text.push_str("No instructions found.");
        return Ok(text);
    }
    for instruction in &instructions {
        let _ = writeln!(text, "0x{:x}: {}", instruction.loc.pc, instruction.text);
    }
    Ok(text)
}
