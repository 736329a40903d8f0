//! Centralized configuration constants for versync.

use std::time::Duration;

/// Synchronization loop policy.
pub struct SyncConfig;

impl SyncConfig {
    /// Interval between sync loop iterations.
    pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

    /// Processes younger than this are skipped during discovery so the
    /// controller does not race the target's own startup.
    pub const STARTUP_GRACE: Duration = Duration::from_secs(10);

    /// Default name of the target process to discover.
    pub const TARGET_PROCESS_NAME: &'static str = "monitored-app";
}

/// Agent channel and protocol parameters.
pub struct AgentConfig;

impl AgentConfig {
    /// Loopback port the injected agent dials back to. The agent library
    /// carries the same constant.
    pub const RENDEZVOUS_PORT: u16 = 47_801;

    /// File name of the agent library loaded into the target.
    pub const LIBRARY_NAME: &'static str = "versync_agent.dll";

    /// How long to wait for the agent to dial back and send its hello frame.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Protocol revision spoken over the channel. A hello frame with a
    /// different value is an incompatible agent.
    pub const PROTOCOL_VERSION: u32 = 1;

    /// Upper bound on a single frame payload.
    pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
}
