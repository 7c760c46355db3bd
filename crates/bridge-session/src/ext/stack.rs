use std::fmt::Write as _;

use bridge_rpc::api::{
    command, CommandOut, DebuggerCommand, LoadConfig, RpcMethod, StacktraceIn, StacktraceOut,
};

use crate::error::{ResultExt, SessionResult};
use crate::format;
use crate::session::Session;

const STACK_DEPTH: i64 = 20;

/// Stack of the selected goroutine, with arguments and locals per frame.
pub async fn stacktrace(session: &Session) -> SessionResult<String> {
    let input = StacktraceIn {
        id: -1,
        depth: STACK_DEPTH,
        full: true,
        defers: false,
        cfg: Some(LoadConfig::BOUNDED),
    };
    let out: StacktraceOut = session
        .rpc_for("get stacktrace")?
        .call(RpcMethod::Stacktrace, &input)
        .await
        .during("get stacktrace")?;

    let mut text = String::from("Stack trace:\n");
    for (i, frame) in out.locations.unwrap_or_default().iter().enumerate() {
        let function = match frame.location.function_name() {
            "" => "unknown",
            name => name,
        };
        let _ = writeln!(
            text,
            "{i}: {}:{} {function}",
            frame.location.file, frame.location.line
        );
        let variables = frame
            .arguments
            .iter()
            .flatten()
            .chain(frame.locals.iter().flatten());
        for variable in variables {
            let _ = writeln!(text, "    {}", format::variable_line(variable));
        }
    }
    Ok(text)
}

pub async fn switch_goroutine(session: &Session, goroutine_id: i64) -> SessionResult<String> {
    let cmd = DebuggerCommand {
        goroutine_id,
        ..DebuggerCommand::named(command::SWITCH_GOROUTINE)
    };
    let _: CommandOut = session
        .rpc_for("switch goroutine")?
        .call(RpcMethod::Command, &cmd)
        .await
        .during("switch goroutine")?;
    Ok(format!("Switched to goroutine {goroutine_id}"))
}

pub async fn switch_thread(session: &Session, thread_id: i64) -> SessionResult<String> {
    let cmd = DebuggerCommand {
        thread_id,
        ..DebuggerCommand::named(command::SWITCH_THREAD)
    };
    let _: CommandOut = session
        .rpc_for("switch thread")?
        .call(RpcMethod::Command, &cmd)
        .await
        .during("switch thread")?;
    Ok(format!("Switched to thread {thread_id}"))
}
