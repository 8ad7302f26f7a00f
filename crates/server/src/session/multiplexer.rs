//! The session multiplexer.
//!
//! One session per process. It owns the child PTY, fans PTY output out
//! to every connected client, arbitrates which client's input reaches
//! the PTY, tracks controller succession, enforces the idle timeout,
//! and tears everything down exactly once.

use std::collections::HashMap;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{ClientCount, ClientMessage, Role, RoleAssignment, ServerMessage};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;

use super::client::{Client, ClientId, WireReceiver, WireSender};
use super::pty::{PtyHandle, SessionError};

/// Bytes pulled from the PTY master per read.
const READ_BUFFER_SIZE: usize = 4096;

/// How often the idle watcher samples activity.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Hook invoked exactly once after teardown completes.
pub type CloseHook = Box<dyn FnOnce() + Send>;

/// Session construction parameters.
pub struct SessionConfig {
    /// Command to run in the PTY. Empty selects the default shell.
    pub command: String,
    /// Allow every client to type, not just the controller.
    pub shared_input: bool,
    /// Close the session after this much inactivity. Zero disables.
    pub idle_timeout: Duration,
    /// Invoked once after the session has fully closed.
    pub on_close: Option<CloseHook>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            command: String::new(),
            shared_input: false,
            idle_timeout: Duration::ZERO,
            on_close: None,
        }
    }
}

/// A shared PTY session.
///
/// The client set is guarded by a readers-writer lock: broadcasts take
/// shared access, membership and role changes take exclusive access.
/// Activity tracking sits behind its own lock so the PTY reader and the
/// client readers never contend on the set for it.
pub struct Session {
    pty: PtyHandle,
    clients: RwLock<HashMap<ClientId, Arc<Client>>>,
    shared_input: bool,
    idle_timeout: Duration,
    last_active: std::sync::Mutex<Instant>,
    done_tx: watch::Sender<bool>,
    closed: AtomicBool,
    on_close: std::sync::Mutex<Option<CloseHook>>,
}

impl Session {
    /// Spawns the configured command on a fresh PTY and starts the
    /// background activities. The session is fully operational when
    /// this returns.
    pub fn spawn(config: SessionConfig) -> Result<Arc<Self>, SessionError> {
        let command = if config.command.is_empty() {
            "bash"
        } else {
            config.command.as_str()
        };
        let (pty, reader) = PtyHandle::spawn(command)?;

        let (done_tx, _) = watch::channel(false);
        let session = Arc::new(Session {
            pty,
            clients: RwLock::new(HashMap::new()),
            shared_input: config.shared_input,
            idle_timeout: config.idle_timeout,
            last_active: std::sync::Mutex::new(Instant::now()),
            done_tx,
            closed: AtomicBool::new(false),
            on_close: std::sync::Mutex::new(config.on_close),
        });

        session.start_pty_reader(reader);
        if !session.idle_timeout.is_zero() {
            session.start_idle_watcher();
        }

        Ok(session)
    }

    /// Registers a connected client and starts its inbound reader.
    ///
    /// The first client into an empty set becomes the controller. The
    /// client's first frame is always its role assignment: the channel
    /// write lock is held across insertion so no broadcast can slip in
    /// ahead of it.
    pub async fn add_client(
        self: &Arc<Self>,
        id: ClientId,
        sender: Box<dyn WireSender>,
        receiver: Box<dyn WireReceiver>,
    ) -> Arc<Client> {
        let client = Arc::new(Client::new(id.clone(), sender));
        let mut tx = client.lock_sender().await;

        let is_controller;
        {
            let mut clients = self.clients.write().await;
            is_controller = clients.is_empty();
            client.set_controller(is_controller);
            clients.insert(id.clone(), Arc::clone(&client));
        }

        let role = if is_controller {
            Role::Controller
        } else {
            Role::Viewer
        };
        tracing::info!(client = %id, role = ?role, "client connected");

        let assignment = ServerMessage::Role(RoleAssignment {
            role,
            shared_input: Some(self.shared_input),
        });
        match protocol::encode_server(&assignment) {
            Ok(frame) => {
                if let Err(e) = tx.send_text(frame).await {
                    tracing::debug!(client = %id, error = %e, "role write failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to encode role frame"),
        }
        drop(tx);

        self.broadcast_client_count().await;
        self.start_client_reader(Arc::clone(&client), receiver);
        client
    }

    /// Removes a client, promoting a successor when the controller
    /// departs. A no-op for unknown ids.
    pub async fn remove_client(&self, id: &str) {
        let removed = {
            let mut clients = self.clients.write().await;
            let Some(removed) = clients.remove(id) else {
                return;
            };
            if removed.is_controller() {
                if let Some(next) = clients.values().next() {
                    next.set_controller(true);
                    tracing::info!(client = %next.id(), "promoted client to controller");
                    let msg = ServerMessage::Role(RoleAssignment {
                        role: Role::Controller,
                        shared_input: None,
                    });
                    if let Err(e) = next.send_msg(&msg).await {
                        tracing::debug!(client = %next.id(), error = %e, "promotion write failed");
                    }
                }
            }
            removed
        };

        tracing::info!(client = %id, "client disconnected");
        removed.close_channel(None).await;
        self.broadcast_client_count().await;
    }

    /// Number of currently connected clients.
    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Observable closed signal; transitions to `true` exactly once.
    pub fn done(&self) -> watch::Receiver<bool> {
        self.done_tx.subscribe()
    }

    /// Resolves once the session has closed.
    pub async fn wait_closed(&self) {
        let mut done = self.done_tx.subscribe();
        while !*done.borrow_and_update() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// Tears the session down. Safe to call from any task, any number
    /// of times; only the first call does work.
    ///
    /// Order: signal done, disconnect every client with a graceful
    /// close frame, close the PTY master, terminate and reap the child,
    /// then fire the on-close hook.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.done_tx.send(true);
        tracing::info!("closing session");

        {
            let mut clients = self.clients.write().await;
            for (_, client) in clients.drain() {
                client.close_channel(Some("session closed")).await;
            }
        }

        self.pty.close_master().await;
        self.pty.kill_and_reap().await;

        let hook = self.on_close.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
    }

    fn may_write(&self, client: &Client) -> bool {
        self.shared_input || client.is_controller()
    }

    fn touch_activity(&self) {
        *self.last_active.lock().unwrap() = Instant::now();
    }

    fn idle_elapsed(&self) -> Duration {
        self.last_active.lock().unwrap().elapsed()
    }

    /// Fans one pre-encoded output frame out to every client. Write
    /// failures never evict here; the failing client's inbound reader
    /// owns removal.
    async fn broadcast_output(&self, data: &[u8]) {
        let frame = match protocol::encode_server(&ServerMessage::output_from_bytes(data)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode output frame");
                return;
            }
        };

        let clients = self.clients.read().await;
        for client in clients.values() {
            if let Err(e) = client.send_frame(&frame).await {
                tracing::debug!(client = %client.id(), error = %e, "broadcast write failed");
            }
        }
    }

    async fn broadcast_client_count(&self) {
        let clients = self.clients.read().await;
        let msg = ServerMessage::Clients(ClientCount {
            count: clients.len(),
        });
        let frame = match protocol::encode_server(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode client count frame");
                return;
            }
        };
        for client in clients.values() {
            if let Err(e) = client.send_frame(&frame).await {
                tracing::debug!(client = %client.id(), error = %e, "client count write failed");
            }
        }
    }

    fn start_pty_reader(self: &Arc<Self>, reader: Box<dyn Read + Send>) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let reader = Arc::new(std::sync::Mutex::new(reader));
            loop {
                let reader = Arc::clone(&reader);
                let result = tokio::task::spawn_blocking(move || {
                    let mut buf = vec![0u8; READ_BUFFER_SIZE];
                    let mut reader = reader.lock().unwrap();
                    match reader.read(&mut buf) {
                        Ok(0) => Ok(None),
                        Ok(n) => {
                            buf.truncate(n);
                            Ok(Some(buf))
                        }
                        Err(e) => Err(e),
                    }
                })
                .await;

                match result {
                    Ok(Ok(Some(data))) => {
                        session.touch_activity();
                        session.broadcast_output(&data).await;
                    }
                    // EOF: the child went away.
                    Ok(Ok(None)) => break,
                    Ok(Err(e)) => {
                        tracing::debug!(error = %e, "pty read error");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "pty read task failed");
                        break;
                    }
                }
            }
            session.close().await;
        });
    }

    fn start_client_reader(
        self: &Arc<Self>,
        client: Arc<Client>,
        mut receiver: Box<dyn WireReceiver>,
    ) {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let frame = match receiver.recv_text().await {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        tracing::debug!(client = %client.id(), error = %e, "client read failed");
                        break;
                    }
                    None => break,
                };

                match protocol::decode_client(&frame) {
                    Ok(ClientMessage::Input(data)) => {
                        if !session.may_write(&client) {
                            continue;
                        }
                        session.touch_activity();
                        if let Err(e) = session.pty.write(data.as_bytes()).await {
                            tracing::debug!(error = %e, "pty write failed");
                            break;
                        }
                    }
                    Ok(ClientMessage::Resize(size)) => {
                        if let Err(e) = session.pty.resize(size.cols, size.rows).await {
                            tracing::debug!(error = %e, "pty resize failed");
                        }
                    }
                    Err(e) => {
                        tracing::debug!(client = %client.id(), error = %e, "invalid client frame");
                    }
                }
            }
            session.remove_client(client.id()).await;
        });
    }

    fn start_idle_watcher(self: &Arc<Self>) {
        let session = Arc::clone(self);
        let mut done = self.done_tx.subscribe();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(IDLE_CHECK_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let idle = session.idle_elapsed();
                        if idle > session.idle_timeout {
                            tracing::warn!(
                                idle_secs = idle.as_secs(),
                                "idle timeout reached, closing session"
                            );
                            session.close().await;
                            return;
                        }
                    }
                    _ = done.changed() => return,
                }
            }
        });
    }
}
