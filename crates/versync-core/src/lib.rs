//! versync core - cross-process synchronization of version records and tag
//! keys.
//!
//! The engine attaches a small agent to an uncontrolled target process,
//! pulls bulk and incremental dumps over a framed loopback channel, and
//! merges everything into a single deduplicated, ordered [`VersionStore`]
//! that round-trips to a JSON document.
//!
//! # Example
//!
//! ```rust,ignore
//! use versync_core::{InjectConnector, ShutdownToken, SyncSession, SystemDiscovery};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (mut session, mut notices) = SyncSession::new(
//!         "monitored-app",
//!         Box::new(SystemDiscovery::new()),
//!         Box::new(InjectConnector),
//!     );
//!
//!     let shutdown = ShutdownToken::new();
//!     session.run(shutdown).await;
//! }
//! ```

pub mod channel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod session;
pub mod shutdown;
pub mod store;

// Re-export commonly used types
pub use channel::ChannelHandle;
pub use config::{AgentConfig, SyncConfig};
pub use discovery::{Candidate, ProcessDiscovery, SystemDiscovery};
pub use error::{Result, SyncError};
pub use protocol::{AgentClient, Dump};
pub use session::{AgentConnector, InjectConnector, SyncNotice, SyncSession, TickOutcome};
pub use shutdown::ShutdownToken;
pub use store::{VersionRecord, VersionStore};
