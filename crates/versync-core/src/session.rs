//! Session context and polling loop.
//!
//! A [`SyncSession`] owns everything one synchronization run needs: the
//! store, the current connection (if any), the do-not-retry set, and the
//! notice channel. It replaces the ambient mutable state of the original
//! surface with one explicit object, reset on disconnect.
//!
//! The loop is expressed as an externally steppable [`SyncSession::tick`]
//! plus a thin [`SyncSession::run`] wrapper, so tests can single-step the
//! state machine without timers.

use crate::channel;
use crate::config::{AgentConfig, SyncConfig};
use crate::discovery::ProcessDiscovery;
use crate::error::{Result, SyncError};
use crate::protocol::{AgentClient, Dump};
use crate::shutdown::ShutdownToken;
use crate::store::VersionStore;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Establishes an agent session against a target process.
///
/// The production implementation injects and handshakes; tests substitute
/// scripted agents behind the same seam.
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, pid: u32) -> Result<AgentClient>;
}

/// Production connector: inject the agent, then complete the handshake.
pub struct InjectConnector;

#[async_trait]
impl AgentConnector for InjectConnector {
    async fn connect(&self, pid: u32) -> Result<AgentClient> {
        let handle = channel::attach(pid).await?;
        AgentClient::handshake(handle, AgentConfig::CONNECT_TIMEOUT).await
    }
}

/// User-visible event emitted by the sync loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncNotice {
    /// A connection was established and the initial dump merged.
    Connected { pid: u32 },
    /// An attach or handshake attempt failed; the pid will not be retried
    /// this session while the process lives.
    ConnectFailed { pid: u32, reason: String },
    /// The agent declared the connection invalid during polling.
    ConnectionLost { pid: u32 },
    /// A dump or imported document could not be decoded; the batch was
    /// rejected as a whole and the store is unchanged.
    DumpRejected { source: String, reason: String },
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Disconnected and no eligible candidate connected.
    Idle,
    /// A connection was established this tick.
    Connected { pid: u32 },
    /// A connected poll completed; `new_keys` tag keys were merged.
    Polled { new_keys: usize },
    /// The connection was lost this tick.
    Lost { pid: u32 },
}

/// One synchronization session: store, connection, and retry bookkeeping.
pub struct SyncSession {
    store: VersionStore,
    connection: Option<AgentClient>,
    /// Pids already attempted this session. Distinct from the startup grace
    /// filter: grace covers processes too young to be ready, this set covers
    /// processes that already rejected us. Exited pids are purged each scan
    /// so a restarted target is retried.
    no_retry: HashSet<u32>,
    target_name: String,
    discovery: Box<dyn ProcessDiscovery>,
    connector: Box<dyn AgentConnector>,
    notices: mpsc::UnboundedSender<SyncNotice>,
}

impl SyncSession {
    /// Create a session and the receiving end of its notice channel.
    pub fn new(
        target_name: impl Into<String>,
        discovery: Box<dyn ProcessDiscovery>,
        connector: Box<dyn AgentConnector>,
    ) -> (Self, mpsc::UnboundedReceiver<SyncNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store: VersionStore::new(),
                connection: None,
                no_retry: HashSet::new(),
                target_name: target_name.into(),
                discovery,
                connector,
                notices: tx,
            },
            rx,
        )
    }

    /// The synchronized dataset.
    pub fn store(&self) -> &VersionStore {
        &self.store
    }

    /// Pid of the active connection, if any.
    pub fn connected_pid(&self) -> Option<u32> {
        self.connection.as_ref().map(|c| c.pid())
    }

    /// Run one iteration of the state machine.
    ///
    /// Disconnected: scan for candidates and try to connect. Connected:
    /// pull an incremental key dump. Failures are converted to notices;
    /// a tick never panics and never leaves a half-merged batch.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.connection.is_some() {
            self.poll_connected().await
        } else {
            self.scan_and_connect().await
        }
    }

    /// Drive ticks at the poll interval until shutdown is requested.
    ///
    /// The in-flight tick always completes; the token is only checked
    /// between iterations.
    pub async fn run(&mut self, shutdown: ShutdownToken) {
        info!("sync loop started for target '{}'", self.target_name);
        while !shutdown.is_requested() {
            let outcome = self.tick().await;
            debug!("tick outcome: {:?}", outcome);
            if shutdown.is_requested() {
                break;
            }
            tokio::time::sleep(SyncConfig::POLL_INTERVAL).await;
        }
        info!("sync loop stopped");
    }

    /// Connect to an explicit pid (the manual connect surface).
    ///
    /// Rejected while another connection is active. A failed attempt joins
    /// the do-not-retry set like any other rejection; a successful one does
    /// not, so the target is rediscovered after a later disconnect.
    pub async fn connect_to(&mut self, pid: u32) -> Result<()> {
        if let Some(active) = self.connected_pid() {
            return Err(SyncError::AlreadyConnected { pid: active });
        }
        let result = self.try_connect(pid).await;
        if result.is_err() {
            self.no_retry.insert(pid);
        }
        result
    }

    /// Tear down the active connection, if any. Always succeeds.
    pub async fn disconnect(&mut self) {
        if let Some(client) = self.connection.take() {
            client.disconnect().await;
        }
    }

    /// Merge a JSON document from disk into the store.
    ///
    /// Malformed documents are rejected as a whole; malformed individual
    /// records are trimmed silently and the import still succeeds. Returns
    /// the number of records that survived the trim.
    pub fn import(&mut self, path: &Path) -> Result<usize> {
        let mut other = VersionStore::load(path)?;
        other.trim_versions();
        let merged = other.record_count();
        self.store.merge_from(other);
        self.store.sort_versions();
        Ok(merged)
    }

    /// Export the sorted, deduplicated store to disk.
    pub fn export(&self, path: &Path) -> Result<()> {
        self.store.save(path)
    }

    async fn scan_and_connect(&mut self) -> TickOutcome {
        {
            let discovery = &*self.discovery;
            self.no_retry.retain(|pid| discovery.is_alive(*pid));
        }

        let candidates = self.discovery.candidates(&self.target_name);
        for candidate in candidates {
            if candidate.uptime < SyncConfig::STARTUP_GRACE {
                debug!(
                    "skipping process {}: only {:?} old",
                    candidate.pid, candidate.uptime
                );
                continue;
            }
            if !self.no_retry.insert(candidate.pid) {
                continue;
            }
            match self.try_connect(candidate.pid).await {
                Ok(()) => return TickOutcome::Connected { pid: candidate.pid },
                Err(e) => {
                    warn!("connection to process {} failed: {}", candidate.pid, e);
                    self.notify(SyncNotice::ConnectFailed {
                        pid: candidate.pid,
                        reason: e.to_string(),
                    });
                }
            }
        }
        TickOutcome::Idle
    }

    /// Attach, handshake, and merge the initial bulk dump.
    async fn try_connect(&mut self, pid: u32) -> Result<()> {
        let client = self.connector.connect(pid).await?;

        match client.list_dump().await {
            Ok(Dump::Data(mut other)) => {
                other.trim_versions();
                self.store.merge_from(other);
                self.store.sort_versions();
            }
            // The agent has nothing yet; keys will arrive incrementally.
            Ok(Dump::Empty) => {}
            Ok(Dump::Unavailable) => {
                client.disconnect().await;
                return Err(SyncError::ConnectionLost { pid });
            }
            // A frame-level error leaves the stream mid-frame; nothing
            // after it can be read correctly.
            Err(e) if e.is_fatal_to_connection() => {
                client.disconnect().await;
                return Err(e);
            }
            Err(e) => {
                // Undecodable initial dump: reject the batch, keep the
                // connection. The store is untouched.
                self.notify(SyncNotice::DumpRejected {
                    source: "live dump".to_string(),
                    reason: e.to_string(),
                });
            }
        }

        self.connection = Some(client);
        self.notify(SyncNotice::Connected { pid });
        Ok(())
    }

    async fn poll_connected(&mut self) -> TickOutcome {
        let Some(client) = &self.connection else {
            return TickOutcome::Idle;
        };
        let pid = client.pid();

        match client.key_dump().await {
            Ok(Dump::Data(keys)) => {
                let mut new_keys = 0;
                for (name, value) in keys {
                    if self.store.merge_tag_key(name, value) {
                        new_keys += 1;
                    }
                }
                if new_keys > 0 {
                    debug!("merged {} new tag key(s) from process {}", new_keys, pid);
                }
                TickOutcome::Polled { new_keys }
            }
            Ok(Dump::Empty) => TickOutcome::Polled { new_keys: 0 },
            Ok(Dump::Unavailable) => {
                warn!("connection to process {} lost", pid);
                self.disconnect().await;
                self.notify(SyncNotice::ConnectionLost { pid });
                TickOutcome::Lost { pid }
            }
            // Frame-level errors desync the stream; the connection cannot
            // deliver another valid response.
            Err(e) if e.is_fatal_to_connection() => {
                warn!("connection to process {} lost: {}", pid, e);
                self.disconnect().await;
                self.notify(SyncNotice::ConnectionLost { pid });
                TickOutcome::Lost { pid }
            }
            Err(e) => {
                self.notify(SyncNotice::DumpRejected {
                    source: "live dump".to_string(),
                    reason: e.to_string(),
                });
                TickOutcome::Polled { new_keys: 0 }
            }
        }
    }

    fn notify(&self, notice: SyncNotice) {
        // The receiver side is the user surface; a dropped receiver just
        // means nobody is listening.
        let _ = self.notices.send(notice);
    }
}
