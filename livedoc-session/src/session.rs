//! One long-lived renderer process and its FIFO of pending requests.

use crate::error::{Result, SessionError};
use crate::framing::ReplyFraming;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, instrument, warn};

/// Identifies one submitted request across session restarts
pub type Ticket = u64;

const READ_CHUNK: usize = 8 * 1024;

/// Program and arguments used to start a renderer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RenderCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Only between process spawn and the reply reader being attached;
    /// [`RenderSession::spawn`] never returns a session in this state
    Starting,
    /// Accepting requests; a session becomes ready as soon as its stdout is read
    Ready,
    Dead,
}

#[derive(Debug)]
pub(crate) struct Pending {
    ticket: Ticket,
    tx: oneshot::Sender<String>,
}

/// Unfinished state a dead session hands to its successor
#[derive(Debug, Default)]
pub struct Leftover {
    buffer: Vec<u8>,
    pending: VecDeque<Pending>,
}

impl Leftover {
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty() && self.pending.is_empty()
    }

    /// Append a newer leftover behind this one
    fn absorb(&mut self, newer: Leftover) {
        self.buffer.extend(newer.buffer);
        self.pending.extend(newer.pending);
    }
}

/// Directory-keyed hand-off between a dead session and the next one
///
/// The successor assumes its process's first replies line up 1:1 with the
/// inherited queue. Nothing verifies that: a reply the dead process had
/// half-written will be completed by the new process's output and handed to
/// the oldest waiter.
#[derive(Debug, Default)]
pub struct LeftoverStore {
    inner: Mutex<HashMap<PathBuf, Leftover>>,
    tickets: AtomicU64,
}

impl LeftoverStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn next_ticket(&self) -> Ticket {
        self.tickets.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn publish(&self, dir: &Path, leftover: Leftover) {
        if leftover.is_empty() {
            return;
        }
        let mut inner = self.inner.lock();
        match inner.get_mut(dir) {
            Some(existing) => existing.absorb(leftover),
            None => {
                inner.insert(dir.to_path_buf(), leftover);
            }
        }
    }

    pub(crate) fn take(&self, dir: &Path) -> Leftover {
        self.inner.lock().remove(dir).unwrap_or_default()
    }

    pub(crate) fn retract(&self, dir: &Path, ticket: Ticket) -> bool {
        let mut inner = self.inner.lock();
        let Some(leftover) = inner.get_mut(dir) else {
            return false;
        };
        match leftover.pending.iter().position(|p| p.ticket == ticket) {
            Some(pos) => {
                leftover.pending.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Requests waiting for a successor session in `dir`
    pub fn pending_len(&self, dir: &Path) -> usize {
        self.inner
            .lock()
            .get(dir)
            .map_or(0, |leftover| leftover.pending_len())
    }
}

#[derive(Debug)]
struct Shared {
    state: SessionState,
    buffer: Vec<u8>,
    pending: VecDeque<Pending>,
}

/// A renderer process bound to one working directory
///
/// Requests are written one per line to stdin. Replies are read from stdout,
/// split by [`ReplyFraming`], and handed to waiters strictly in submission
/// order.
#[derive(Debug)]
pub struct RenderSession {
    dir: PathBuf,
    pid: Option<u32>,
    shared: Arc<Mutex<Shared>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    store: Arc<LeftoverStore>,
}

impl RenderSession {
    /// Start a renderer in `dir`, first inheriting any leftover from a dead predecessor
    #[instrument(skip(command, framing, store), fields(dir = %dir.display(), program = %command.program))]
    pub fn spawn(
        dir: &Path,
        command: &RenderCommand,
        framing: ReplyFraming,
        store: Arc<LeftoverStore>,
    ) -> Result<Arc<Self>> {
        let leftover = store.take(dir);

        let spawned = Command::new(&command.program)
            .args(&command.args)
            .current_dir(dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(source) => {
                store.publish(dir, leftover);
                return Err(SessionError::Spawn {
                    program: command.program.clone(),
                    dir: dir.to_path_buf(),
                    source,
                });
            }
        };

        if !leftover.is_empty() {
            info!(
                pending = leftover.pending_len(),
                bytes = leftover.buffered_bytes(),
                "inheriting unfinished requests from previous renderer"
            );
        }

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Starting,
            buffer: leftover.buffer,
            pending: leftover.pending,
        }));

        let session = Arc::new(Self {
            dir: dir.to_path_buf(),
            pid: child.id(),
            shared: shared.clone(),
            stdin: tokio::sync::Mutex::new(stdin),
            store: store.clone(),
        });

        if let Some(stderr) = stderr {
            tokio::spawn(log_stderr(dir.to_path_buf(), stderr));
        }

        match stdout {
            Some(stdout) => {
                shared.lock().state = SessionState::Ready;
                tokio::spawn(read_replies(
                    dir.to_path_buf(),
                    stdout,
                    child,
                    shared,
                    framing,
                    store,
                ));
            }
            None => teardown(dir, &shared, &store),
        }

        debug!(pid = ?session.pid, "renderer started");
        Ok(session)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().state
    }

    pub fn is_dead(&self) -> bool {
        self.state() == SessionState::Dead
    }

    /// Requests written but not yet answered
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Write one request and queue its resolver
    ///
    /// Holding the stdin lock across the queue push and the write keeps the
    /// queue order identical to the order requests reach the process.
    pub async fn send(&self, request: &str) -> Result<(Ticket, oneshot::Receiver<String>)> {
        let mut stdin = self.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return Err(SessionError::Dead(self.dir.clone()));
        };

        let (tx, rx) = oneshot::channel();
        let ticket = self.store.next_ticket();
        {
            let mut shared = self.shared.lock();
            if shared.state == SessionState::Dead {
                return Err(SessionError::Dead(self.dir.clone()));
            }
            shared.pending.push_back(Pending { ticket, tx });
        }

        let mut line = request.to_string();
        if !line.ends_with('\n') {
            line.push('\n');
        }

        if let Err(err) = write_line(pipe, &line).await {
            warn!(dir = %self.dir.display(), ticket, %err, "renderer rejected request");
            self.retract(ticket);
            *stdin = None;
            return Err(SessionError::Write(err));
        }

        debug!(dir = %self.dir.display(), ticket, "request sent");
        Ok((ticket, rx))
    }

    /// Close stdin so the renderer exits once it has drained its input
    pub async fn shutdown(&self) {
        self.stdin.lock().await.take();
    }

    fn retract(&self, ticket: Ticket) {
        {
            let mut shared = self.shared.lock();
            if let Some(pos) = shared.pending.iter().position(|p| p.ticket == ticket) {
                shared.pending.remove(pos);
                return;
            }
        }
        self.store.retract(&self.dir, ticket);
    }
}

async fn write_line(pipe: &mut ChildStdin, line: &str) -> std::io::Result<()> {
    pipe.write_all(line.as_bytes()).await?;
    pipe.flush().await
}

async fn read_replies(
    dir: PathBuf,
    mut stdout: ChildStdout,
    mut child: Child,
    shared: Arc<Mutex<Shared>>,
    framing: ReplyFraming,
    store: Arc<LeftoverStore>,
) {
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        match stdout.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => {
                let mut guard = shared.lock();
                let Shared {
                    buffer, pending, ..
                } = &mut *guard;
                buffer.extend_from_slice(&chunk[..n]);
                for reply in framing.drain_replies(buffer) {
                    match pending.pop_front() {
                        Some(waiter) => {
                            if waiter.tx.send(reply).is_err() {
                                debug!(ticket = waiter.ticket, "requester went away before its reply");
                            }
                        }
                        None => warn!(dir = %dir.display(), "renderer produced a reply nobody asked for"),
                    }
                }
            }
            Err(err) => {
                warn!(dir = %dir.display(), %err, "failed reading renderer output");
                break;
            }
        }
    }

    teardown(&dir, &shared, &store);

    match child.wait().await {
        Ok(status) => info!(dir = %dir.display(), %status, "renderer exited"),
        Err(err) => warn!(dir = %dir.display(), %err, "failed to reap renderer"),
    }
}

/// Mark the session dead and publish what it still owes
///
/// Pending resolvers are handed off, not resolved.
fn teardown(dir: &Path, shared: &Mutex<Shared>, store: &LeftoverStore) {
    let leftover = {
        let mut guard = shared.lock();
        guard.state = SessionState::Dead;
        Leftover {
            buffer: std::mem::take(&mut guard.buffer),
            pending: std::mem::take(&mut guard.pending),
        }
    };

    if !leftover.is_empty() {
        warn!(
            dir = %dir.display(),
            pending = leftover.pending_len(),
            bytes = leftover.buffered_bytes(),
            "renderer died with unfinished requests"
        );
    }
    store.publish(dir, leftover);
}

async fn log_stderr(dir: PathBuf, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(dir = %dir.display(), "renderer: {}", line);
    }
}
