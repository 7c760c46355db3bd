use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use bridge_config::BackendConfig;
use parking_lot::Mutex;

use crate::{
    error::{SessionError, SessionResult},
    launcher::BackendLauncher,
    session::{LaunchMode, Session, SessionInfo},
    transport::{LaunchSpec, Transport},
};

/// Registry of live sessions.
///
/// The map lock only guards insert/lookup/remove; it is never held while a
/// session talks to its backend.
#[derive(Debug)]
pub struct SessionManager {
    config: BackendConfig,
    launcher: BackendLauncher,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            launcher: BackendLauncher::new(config.clone()),
            config,
            sessions: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// Starts a backend for `program` and registers the session.
    ///
    /// `LaunchMode::Remote` registers an unconnected session; attach it with
    /// [`Session::connect_remote`] or use [`SessionManager::connect_remote`].
    pub async fn create_session(
        &self,
        program: &Path,
        args: &[String],
        mode: LaunchMode,
    ) -> SessionResult<SessionInfo> {
        let id = self.allocate_id();
        let working_dir = working_dir_for(program);
        let transport = Transport::from_config(&self.config);

        if mode == LaunchMode::Remote {
            let session = Session::new(id, transport, program, mode, working_dir, None);
            return Ok(self.insert(session));
        }

        let backend = self.launcher.spawn(mode, program, args, &working_dir)?;
        let session = Session::new(
            id,
            transport,
            program,
            mode,
            working_dir.clone(),
            Some(backend.child),
        );
        let launch = LaunchSpec {
            mode,
            program: program.to_path_buf(),
            args: args.to_vec(),
            working_dir,
        };

        if let Err(err) = session
            .start(&launch, &backend.addr, self.config.startup_timeout())
            .await
        {
            tracing::warn!(target: "bridge.session", session = %session.id(), error = %err, "session failed to start");
            let _ = session.terminate().await;
            return Err(err);
        }
        Ok(self.insert(session))
    }

    /// Registers a session attached to a backend already listening at
    /// `address`.
    pub async fn connect_remote(
        &self,
        address: &str,
        working_dir: Option<PathBuf>,
    ) -> SessionResult<SessionInfo> {
        if address.trim().is_empty() {
            return Err(SessionError::InvalidArgument(
                "address must not be empty".into(),
            ));
        }

        let working_dir = working_dir.unwrap_or_else(|| PathBuf::from("."));
        let session = Session::new(
            self.allocate_id(),
            Transport::from_config(&self.config),
            address,
            LaunchMode::Remote,
            working_dir,
            None,
        );
        if let Err(err) = session.connect_remote(address).await {
            let _ = session.terminate().await;
            return Err(err);
        }
        Ok(self.insert(session))
    }

    pub fn get_session(&self, id: &str) -> SessionResult<Arc<Session>> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_owned()))
    }

    /// Terminates the session and removes it from the registry.
    pub async fn terminate_session(&self, id: &str) -> SessionResult<()> {
        let session = self
            .sessions
            .lock()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound(id.to_owned()))?;
        session.terminate().await
    }

    /// Every registered session, ordered by id.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().values().cloned().collect();
        let mut infos: Vec<SessionInfo> = sessions.iter().map(|s| s.info()).collect();
        infos.sort_by(|a, b| (a.id.len(), &a.id).cmp(&(b.id.len(), &b.id)));
        infos
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Terminates every session.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        if !sessions.is_empty() {
            tracing::info!(target: "bridge.session", count = sessions.len(), "terminating all sessions");
        }
        for session in sessions {
            let _ = session.terminate().await;
        }
    }

    fn allocate_id(&self) -> String {
        format!("session-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn insert(&self, session: Session) -> SessionInfo {
        let info = session.info();
        self.sessions
            .lock()
            .insert(info.id.clone(), Arc::new(session));
        tracing::debug!(target: "bridge.session", session = %info.id, "session registered");
        info
    }
}

/// A directory is its own working directory; a file runs in its parent.
fn working_dir_for(program: &Path) -> PathBuf {
    if program.is_dir() {
        return program.to_path_buf();
    }
    match program.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}
