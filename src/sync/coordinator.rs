//! Host-facing facade over election, routing and shutdown
//!
//! The host creates one `Coordinator`, installs a listener, calls `start`
//! and then `announce`s its own changes. Announcements made before the
//! role is decided are buffered and replayed in order once it is.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::protocol::{Notification, NotificationKind};

use super::{socket, NotificationListener, SharedListener, SyncClient, SyncOptions, SyncServer};

/// Role this instance settled into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRole {
    Uninitialized,
    Server,
    Client,
}

impl SyncRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRole::Uninitialized => "uninitialized",
            SyncRole::Server => "server",
            SyncRole::Client => "client",
        }
    }
}

impl std::fmt::Display for SyncRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone)]
enum ActiveRole {
    Server(Arc<SyncServer>),
    Client(Arc<SyncClient>),
}

impl ActiveRole {
    async fn deliver(&self, notification: Notification) -> Result<()> {
        match self {
            ActiveRole::Server(server) => server.broadcast(notification).await.map(|_| ()),
            ActiveRole::Client(client) => client.send(&notification).await,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Role decided, pending buffer still draining
    Replaying,
    Active,
    Stopped,
}

struct State {
    phase: Phase,
    role: SyncRole,
    active: Option<ActiveRole>,
    pending: Vec<Notification>,
}

// ─────────────────────────────────────────────────────────────────
// Dispatch
// ─────────────────────────────────────────────────────────────────

/// Listener handed to the roles; forwards to whatever the host installed
#[derive(Default)]
struct Dispatch {
    handler: RwLock<Option<SharedListener>>,
    last_activity: Mutex<Option<Instant>>,
}

impl Dispatch {
    fn mark(&self) {
        *self.last_activity.lock() = Some(Instant::now());
    }
}

impl NotificationListener for Dispatch {
    fn on_notification(&self, notification: Notification) {
        if notification.is_heartbeat() {
            return;
        }
        self.mark();

        let handler = self.handler.read().clone();
        match handler {
            Some(handler) => handler.on_notification(notification),
            None => debug!(notification = %notification, "No listener installed, dropping"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Coordinator
// ─────────────────────────────────────────────────────────────────

/// Entry point for the host
pub struct Coordinator {
    socket_path: PathBuf,
    options: SyncOptions,
    lifecycle: AsyncMutex<()>,
    state: Mutex<State>,
    dispatch: Arc<Dispatch>,
}

impl Coordinator {
    pub fn new(options: SyncOptions, socket_path: impl AsRef<Path>) -> Self {
        Self {
            socket_path: socket_path.as_ref().to_path_buf(),
            options,
            lifecycle: AsyncMutex::new(()),
            state: Mutex::new(State {
                phase: Phase::Idle,
                role: SyncRole::Uninitialized,
                active: None,
                pending: Vec::new(),
            }),
            dispatch: Arc::new(Dispatch::default()),
        }
    }

    /// Build from configuration, resolving the socket path
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let path = config.socket_path()?;
        Ok(Self::new(config.sync_options(), path))
    }

    /// Install the host callback for notifications from other instances
    pub fn set_listener(&self, listener: SharedListener) {
        *self.dispatch.handler.write() = Some(listener);
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn role(&self) -> SyncRole {
        self.state.lock().role
    }

    pub fn is_primary(&self) -> bool {
        self.role() == SyncRole::Server
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Replaying | Phase::Active)
    }

    /// Connected secondaries when primary; 1 or 0 when secondary
    pub fn peer_count(&self) -> usize {
        match &self.state.lock().active {
            Some(ActiveRole::Server(server)) => server.peer_count(),
            Some(ActiveRole::Client(client)) => usize::from(client.is_connected()),
            None => 0,
        }
    }

    /// Announcements waiting for the role decision
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    // ─────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Decide the role and begin synchronizing.
    ///
    /// Tries to become primary; if a live primary already owns the socket,
    /// waits the settle delay and joins it as a secondary. Calling again
    /// while started does nothing.
    pub async fn start(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let phase = self.state.lock().phase;
        match phase {
            Phase::Idle => {}
            Phase::Stopped => return Err(Error::AlreadyStopped),
            Phase::Replaying | Phase::Active => return Ok(()),
        }

        socket::validate_socket_path(&self.socket_path)?;
        let listener: SharedListener = self.dispatch.clone();

        let (role, active) =
            match SyncServer::bind(&self.socket_path, self.options.clone(), listener.clone()).await
            {
                Ok(server) => {
                    info!(path = %self.socket_path.display(), "Elected primary");
                    (SyncRole::Server, ActiveRole::Server(server))
                }
                Err(Error::AddressInUse { .. }) => {
                    info!(path = %self.socket_path.display(), "Primary already running, joining as secondary");
                    tokio::time::sleep(self.options.settle_delay).await;
                    let client =
                        SyncClient::start(&self.socket_path, self.options.clone(), listener).await?;
                    (SyncRole::Client, ActiveRole::Client(client))
                }
                Err(e) => return Err(e),
            };

        {
            let mut state = self.state.lock();
            state.role = role;
            state.active = Some(active);
            state.phase = Phase::Replaying;
        }

        self.replay_pending().await;
        Ok(())
    }

    async fn replay_pending(&self) {
        loop {
            let (batch, active) = {
                let mut state = self.state.lock();
                if state.pending.is_empty() || state.phase != Phase::Replaying {
                    if state.phase == Phase::Replaying {
                        state.phase = Phase::Active;
                    }
                    return;
                }
                (std::mem::take(&mut state.pending), state.active.clone())
            };

            let Some(active) = active else { return };
            debug!(count = batch.len(), "Replaying buffered announcements");
            for notification in batch {
                if let Err(e) = active.deliver(notification).await {
                    warn!(notification = %notification, error = %e, "Buffered announcement not delivered");
                }
            }
        }
    }

    /// Tell other instances that `subject_id` changed.
    ///
    /// Before `start` has decided the role the announcement is buffered.
    /// After `stop` it is dropped.
    pub async fn announce(&self, kind: NotificationKind, subject_id: i64) -> Result<()> {
        self.announce_notification(Notification::new(kind, subject_id))
            .await
    }

    pub async fn announce_notification(&self, notification: Notification) -> Result<()> {
        let active = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Idle | Phase::Replaying => {
                    state.pending.push(notification);
                    return Ok(());
                }
                Phase::Stopped => return Ok(()),
                Phase::Active => state.active.clone(),
            }
        };

        match active {
            Some(active) => active.deliver(notification).await,
            None => Ok(()),
        }
    }

    /// Shut down whichever role is running. Safe to call more than once,
    /// and a no-op before `start`.
    pub async fn stop(&self) -> Result<()> {
        let _lifecycle = self.lifecycle.lock().await;

        let active = {
            let mut state = self.state.lock();
            match state.phase {
                Phase::Idle | Phase::Stopped => return Ok(()),
                Phase::Replaying | Phase::Active => {}
            }
            state.phase = Phase::Stopped;
            state.pending.clear();
            state.active.take()
        };

        match active {
            Some(ActiveRole::Server(server)) => server.stop().await,
            Some(ActiveRole::Client(client)) => client.stop().await,
            None => Ok(()),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // External activity
    // ─────────────────────────────────────────────────────────────

    /// Record that the host refreshed because of another instance
    pub fn mark_external_activity(&self) {
        self.dispatch.mark();
    }

    pub fn last_external_activity(&self) -> Option<Instant> {
        *self.dispatch.last_activity.lock()
    }

    pub fn since_last_external_activity(&self) -> Option<Duration> {
        self.last_external_activity().map(|at| at.elapsed())
    }

    /// Whether a periodic reload can be skipped because a peer
    /// notification arrived within `window`
    pub fn should_skip_poll(&self, window: Duration) -> bool {
        self.since_last_external_activity()
            .is_some_and(|elapsed| elapsed < window)
    }

    /// Deliver a notification as if it came from a peer
    pub fn on_peer_notification(&self, notification: Notification) {
        self.dispatch.on_notification(notification);
    }
}

impl NotificationListener for Coordinator {
    fn on_notification(&self, notification: Notification) {
        self.on_peer_notification(notification);
    }
}
