use std::{
    fmt,
    net::TcpListener,
    path::{Path, PathBuf},
    process::Stdio,
};

use bridge_config::{BackendConfig, BackendKind};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::{Child, Command},
};

use crate::{
    error::{SessionError, SessionResult},
    session::LaunchMode,
};

/// A backend command line, displayable for logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendCommand {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl fmt::Display for BackendCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Readable, not shell-exact.
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(' ') || arg.contains('\t') {
                write!(f, " \"{}\"", arg.replace('"', "\\\""))?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// A spawned backend and the address it listens on.
#[derive(Debug)]
pub struct LaunchedBackend {
    pub addr: String,
    pub child: Child,
}

/// Spawns `dlv` processes for local sessions.
#[derive(Debug, Clone)]
pub struct BackendLauncher {
    config: BackendConfig,
}

impl BackendLauncher {
    pub fn new(config: BackendConfig) -> Self {
        Self { config }
    }

    /// Address for the next backend: the configured port, or a free one.
    pub fn listen_addr(&self) -> SessionResult<String> {
        let host = self.config.listen_host.as_str();
        let port = match self.config.port {
            0 => free_port(host)?,
            port => port,
        };
        Ok(format!("{host}:{port}"))
    }

    /// Arguments passed to the debugger executable.
    ///
    /// Program arguments follow `--` on the JSON-RPC backend; the DAP backend
    /// receives them in its `launch` request instead.
    pub fn command_args(
        &self,
        mode: LaunchMode,
        program: &Path,
        args: &[String],
        addr: &str,
    ) -> SessionResult<Vec<String>> {
        if mode == LaunchMode::Remote {
            return Err(SessionError::InvalidArgument(
                "remote sessions attach to an existing backend".into(),
            ));
        }

        let listen = format!("--listen={addr}");
        let argv = match self.config.kind {
            BackendKind::Rpc => {
                let mut argv = vec![
                    mode.as_str().to_owned(),
                    "--headless".to_owned(),
                    "--api-version=2".to_owned(),
                    "--accept-multiclient".to_owned(),
                    listen,
                    program.display().to_string(),
                ];
                if !args.is_empty() {
                    argv.push("--".to_owned());
                    argv.extend(args.iter().cloned());
                }
                argv
            }
            BackendKind::Dap => vec!["dap".to_owned(), listen],
        };
        Ok(argv)
    }

    /// Spawns the backend for `program` in `working_dir`.
    ///
    /// The child is killed when dropped. Its output is forwarded to tracing.
    pub fn spawn(
        &self,
        mode: LaunchMode,
        program: &Path,
        args: &[String],
        working_dir: &Path,
    ) -> SessionResult<LaunchedBackend> {
        let addr = self.listen_addr()?;
        let command = BackendCommand {
            cwd: working_dir.to_path_buf(),
            program: self.config.dlv_path.clone(),
            args: self.command_args(mode, program, args, &addr)?,
        };
        tracing::info!(target: "bridge.session", command = %command, cwd = %command.cwd.display(), "starting backend");

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .current_dir(&command.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SessionError::Spawn {
                program: command.program.display().to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        Ok(LaunchedBackend { addr, child })
    }
}

fn free_port(host: &str) -> SessionResult<u16> {
    let unavailable = |err: std::io::Error| SessionError::BackendStartup {
        addr: format!("{host}:0"),
        reason: format!("no free port: {err}"),
    };
    let listener = TcpListener::bind((host, 0)).map_err(unavailable)?;
    Ok(listener.local_addr().map_err(unavailable)?.port())
}

async fn forward_output<R>(stream: R, stream_name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::debug!(target: "bridge.backend", stream = stream_name, "{line}");
            }
            Ok(None) => break,
            Err(err) => {
                tracing::debug!(target: "bridge.backend", stream = stream_name, error = %err, "stopped reading backend output");
                break;
            }
        }
    }
}
