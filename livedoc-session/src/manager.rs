//! Per-document owner of all render sessions.

use crate::error::{Result, SessionError};
use crate::framing::ReplyFraming;
use crate::session::{LeftoverStore, RenderCommand, RenderSession, SessionState};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Owns at most one live [`RenderSession`] per working directory
///
/// Requests for the same directory are serialized through that session's
/// stdin and FIFO queue. Requests for different directories run in
/// parallel. A dead session is replaced lazily on the next request, and the
/// replacement inherits the requests its predecessor left unanswered.
#[derive(Debug)]
pub struct RenderSessionManager {
    command: RwLock<RenderCommand>,
    framing: ReplyFraming,
    timeout: Option<Duration>,
    sessions: Mutex<HashMap<PathBuf, Arc<RenderSession>>>,
    store: Arc<LeftoverStore>,
}

impl RenderSessionManager {
    pub fn new(command: RenderCommand) -> Self {
        Self {
            command: RwLock::new(command),
            framing: ReplyFraming::default(),
            timeout: None,
            sessions: Mutex::new(HashMap::new()),
            store: Arc::new(LeftoverStore::new()),
        }
    }

    pub fn with_framing(mut self, framing: ReplyFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Give up waiting for a reply after `timeout`
    ///
    /// The abandoned resolver stays queued so later replies keep their
    /// alignment with the requests that produced them.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Command used for sessions started from now on
    pub fn set_command(&self, command: RenderCommand) {
        *self.command.write() = command;
    }

    pub fn command(&self) -> RenderCommand {
        self.command.read().clone()
    }

    /// Send `request` to the renderer for `dir` and wait for its reply
    pub async fn render(&self, dir: &Path, request: &str) -> Result<String> {
        let session = self.session_for(dir)?;
        let (ticket, rx) = session.send(request).await?;

        let reply = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(dir = %dir.display(), ticket, "render request timed out");
                    return Err(SessionError::Timeout(limit));
                }
            },
            None => rx.await,
        };

        let reply = reply.map_err(|_| SessionError::Abandoned)?;
        debug!(dir = %dir.display(), ticket, bytes = reply.len(), "render reply received");
        Ok(reply)
    }

    /// The live session for `dir`, spawning one if there is none
    pub fn session_for(&self, dir: &Path) -> Result<Arc<RenderSession>> {
        let mut sessions = self.sessions.lock();
        if let Some(session) = sessions.get(dir) {
            if session.state() != SessionState::Dead {
                return Ok(session.clone());
            }
            debug!(dir = %dir.display(), "replacing dead render session");
        }

        let command = self.command.read().clone();
        let session = RenderSession::spawn(dir, &command, self.framing.clone(), self.store.clone())?;
        sessions.insert(dir.to_path_buf(), session.clone());
        Ok(session)
    }

    /// Existing session for `dir`, dead or alive
    pub fn session(&self, dir: &Path) -> Option<Arc<RenderSession>> {
        self.sessions.lock().get(dir).cloned()
    }

    /// Requests for `dir` still waiting, in a live session or handed off
    pub fn pending(&self, dir: &Path) -> usize {
        let live = self
            .session(dir)
            .filter(|session| !session.is_dead())
            .map_or(0, |session| session.pending_len());
        live + self.store.pending_len(dir)
    }

    /// Requests for `dir` orphaned by a dead session
    pub fn handed_off(&self, dir: &Path) -> usize {
        self.store.pending_len(dir)
    }

    /// Close every renderer's stdin
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.shutdown().await;
        }
    }
}
