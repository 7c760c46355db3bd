use std::fmt::Write as _;

use bridge_rpc::api::{
    CheckpointIn, CheckpointOut, ClearCheckpointIn, ListCheckpointsOut, RpcMethod,
};
use serde_json::{json, Value};

use crate::error::{ResultExt, SessionResult};
use crate::session::Session;

/// Saves the current execution state. `note` is stored with the checkpoint.
pub async fn create_checkpoint(session: &Session, note: Option<&str>) -> SessionResult<String> {
    let input = CheckpointIn {
        r#where: note.unwrap_or_default().to_owned(),
    };
    let out: CheckpointOut = session
        .rpc_for("create checkpoint")?
        .call(RpcMethod::Checkpoint, &input)
        .await
        .during("create checkpoint")?;
    Ok(format!("Created checkpoint {}", out.id))
}

pub async fn list_checkpoints(session: &Session) -> SessionResult<String> {
    let out: ListCheckpointsOut = session
        .rpc_for("list checkpoints")?
        .call(RpcMethod::ListCheckpoints, &json!({}))
        .await
        .during("list checkpoints")?;

    let checkpoints = out.checkpoints.unwrap_or_default();
    let mut text = String::from("Checkpoints:\n");
    if checkpoints.is_empty() {
        text.push_str("No checkpoints set.");
        return Ok(text);
    }
    for checkpoint in &checkpoints {
        let _ = writeln!(text, "{}: {}", checkpoint.id, checkpoint.when);
    }
    Ok(text)
}

pub async fn clear_checkpoint(session: &Session, id: i64) -> SessionResult<String> {
    let _: Value = session
        .rpc_for("clear checkpoint")?
        .call(RpcMethod::ClearCheckpoint, &ClearCheckpointIn { id })
        .await
        .during("clear checkpoint")?;
    Ok(format!("Cleared checkpoint {id}"))
}
