use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use bridge_rpc::api::{ListSourcesIn, ListSourcesOut, RpcMethod};

use crate::error::{ResultExt, SessionResult};
use crate::session::Session;

/// Source files known to the debuggee, optionally filtered by the backend.
pub async fn list_sources(session: &Session, filter: Option<&str>) -> SessionResult<String> {
    let filter = filter.unwrap_or_default();
    let out: ListSourcesOut = session
        .rpc_for("list source files")?
        .call(
            RpcMethod::ListSources,
            &ListSourcesIn {
                filter: filter.to_owned(),
            },
        )
        .await
        .during("list source files")?;
    Ok(format_sources(filter, out.sources.unwrap_or_default()))
}

/// Groups files by directory, both sorted, followed by the total count.
pub fn format_sources(filter: &str, mut sources: Vec<String>) -> String {
    let mut text = if filter.is_empty() {
        String::from("All source files:\n")
    } else {
        format!("Source files matching filter '{filter}':\n")
    };
    if sources.is_empty() {
        text.push_str("No source files found.");
        return text;
    }

    sources.sort();
    let mut by_dir: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for source in &sources {
        let path = Path::new(source);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.display().to_string(),
            _ => ".".to_owned(),
        };
        let file = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.clone());
        by_dir.entry(dir).or_default().push(file);
    }

    for (dir, files) in &by_dir {
        let _ = writeln!(text, "\n{dir}/");
        for file in files {
            let _ = writeln!(text, "  {file}");
        }
    }
    let _ = writeln!(text, "\nTotal: {} source files", sources.len());
    text
}
