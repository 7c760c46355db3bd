use std::fmt::Write as _;

use bridge_rpc::api::{
    AmendBreakpointIn, Breakpoint, ClearBreakpointIn, ClearBreakpointOut, CreateBreakpointIn,
    CreateBreakpointOut, ListBreakpointsIn, ListBreakpointsOut, RpcMethod, WATCH_READ,
    WATCH_WRITE,
};
use serde_json::Value;

use crate::error::{ResultExt, SessionError, SessionResult};
use crate::session::Session;

pub async fn list_breakpoints(session: &Session) -> SessionResult<String> {
    let breakpoints = fetch_breakpoints(session, "list breakpoints").await?;

    let mut out = String::from("Breakpoints:\n");
    if breakpoints.is_empty() {
        out.push_str("No breakpoints set.");
        return Ok(out);
    }
    for bp in &breakpoints {
        let status = status(bp.disabled);
        if bp.is_watchpoint() {
            let _ = writeln!(
                out,
                "{}: watch {} ({}) ({status})",
                bp.id,
                bp.watch_expr,
                access(bp.watch_type)
            );
        } else {
            let _ = writeln!(out, "{}: {}:{} ({status})", bp.id, bp.file, bp.line);
        }
    }
    Ok(out)
}

/// Flips the enabled state of breakpoint `id`.
///
/// The backend only amends whole records, so the current record is fetched,
/// modified and sent back.
pub async fn toggle_breakpoint(session: &Session, id: i64) -> SessionResult<String> {
    let breakpoints = fetch_breakpoints(session, "toggle breakpoint").await?;
    let mut target = breakpoints
        .into_iter()
        .find(|bp| bp.id == id)
        .ok_or_else(|| SessionError::InvalidArgument(format!("breakpoint {id} not found")))?;
    target.disabled = !target.disabled;
    let disabled = target.disabled;

    let _: Value = session
        .rpc_for("toggle breakpoint")?
        .call(
            RpcMethod::AmendBreakpoint,
            &AmendBreakpointIn { breakpoint: target },
        )
        .await
        .during("toggle breakpoint")?;
    Ok(format!("Breakpoint {id} toggled (now {})", status(disabled)))
}

pub async fn clear_breakpoint(session: &Session, id: i64) -> SessionResult<String> {
    let input = ClearBreakpointIn {
        id,
        name: String::new(),
    };
    let _: ClearBreakpointOut = session
        .rpc_for("clear breakpoint")?
        .call(RpcMethod::ClearBreakpoint, &input)
        .await
        .during("clear breakpoint")?;
    Ok(format!("Breakpoint {id} cleared"))
}

/// Creates a watchpoint on `variable`, optionally qualified by `scope`.
///
/// `write` defaults to true and `read` to false; both set watch either
/// access.
pub async fn create_watchpoint(
    session: &Session,
    variable: &str,
    scope: Option<&str>,
    write: Option<bool>,
    read: Option<bool>,
) -> SessionResult<String> {
    if variable.trim().is_empty() {
        return Err(SessionError::InvalidArgument(
            "variable must not be empty".into(),
        ));
    }
    let write = write.unwrap_or(true);
    let read = read.unwrap_or(false);
    let scope = scope.filter(|s| !s.is_empty());

    let qualified = match scope {
        Some(scope) => format!("{scope}.{variable}"),
        None => variable.to_owned(),
    };
    let input = CreateBreakpointIn {
        breakpoint: Breakpoint {
            name: variable.to_owned(),
            watch_expr: variable.to_owned(),
            watch_type: watch_mask(read, write),
            variables: vec![qualified],
            ..Breakpoint::default()
        },
    };

    let out: CreateBreakpointOut = session
        .rpc_for("create watchpoint")?
        .call(RpcMethod::CreateBreakpoint, &input)
        .await
        .during("create watchpoint")?;
    Ok(format!(
        "Watchpoint {} created on variable '{variable}' (scope: {}, write: {write}, read: {read})",
        out.breakpoint.id,
        scope.unwrap_or("")
    ))
}

async fn fetch_breakpoints(
    session: &Session,
    operation: &'static str,
) -> SessionResult<Vec<Breakpoint>> {
    let out: ListBreakpointsOut = session
        .rpc_for(operation)?
        .call(RpcMethod::ListBreakpoints, &ListBreakpointsIn { all: false })
        .await
        .during(operation)?;
    Ok(out.breakpoints.unwrap_or_default())
}

fn watch_mask(read: bool, write: bool) -> u8 {
    match (read, write) {
        (true, true) => WATCH_READ | WATCH_WRITE,
        (true, false) => WATCH_READ,
        _ => WATCH_WRITE,
    }
}

fn access(mask: u8) -> &'static str {
    match (mask & WATCH_READ != 0, mask & WATCH_WRITE != 0) {
        (true, true) => "read/write",
        (true, false) => "read",
        _ => "write",
    }
}

fn status(disabled: bool) -> &'static str {
    if disabled {
        "disabled"
    } else {
        "enabled"
    }
}
