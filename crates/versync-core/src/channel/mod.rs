//! Injection channel into the target process.
//!
//! Attaching loads the agent library into the target's address space and
//! waits for the agent to dial back over a loopback rendezvous socket. The
//! resulting handle is a byte-oriented duplex stream; all protocol semantics
//! live in [`crate::protocol`].
//!
//! Loading a module into a foreign process is irreversible for that
//! process's lifetime, so attach is at-most-once per target. The agent
//! enforces that; a second attach surfaces whatever error results.

pub mod inject;

use crate::config::AgentConfig;
use crate::error::{Result, SyncError};
use std::net::Ipv4Addr;
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;

/// A duplex byte stream to the agent inside one target process.
#[derive(Debug)]
pub struct ChannelHandle {
    stream: TcpStream,
    pid: u32,
}

impl ChannelHandle {
    /// Wrap an already-established stream.
    ///
    /// Used by alternate transports and test harnesses that stand in for an
    /// injected agent.
    pub fn from_stream(stream: TcpStream, pid: u32) -> Self {
        Self { stream, pid }
    }

    /// Target process id this channel is attached to.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn into_parts(self) -> (TcpStream, u32) {
        (self.stream, self.pid)
    }
}

/// Attach the agent to the process identified by `pid`.
///
/// Binds the rendezvous listener first so the agent has somewhere to dial
/// as soon as it loads, injects the agent library, then waits up to
/// [`AgentConfig::CONNECT_TIMEOUT`] for the dial-back. OS-level failures
/// (process gone, access denied, agent already loaded) surface as
/// [`SyncError::Attach`]; a silent agent surfaces as [`SyncError::Connect`].
pub async fn attach(pid: u32) -> Result<ChannelHandle> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, AgentConfig::RENDEZVOUS_PORT))
        .await
        .map_err(|e| SyncError::Attach {
            pid,
            message: format!(
                "cannot bind rendezvous port {}: {}",
                AgentConfig::RENDEZVOUS_PORT,
                e
            ),
            source: Some(e),
        })?;

    inject::load_agent_library(pid, AgentConfig::LIBRARY_NAME)?;
    debug!("agent library injected into process {}", pid);

    let (stream, peer) = tokio::time::timeout(AgentConfig::CONNECT_TIMEOUT, listener.accept())
        .await
        .map_err(|_| SyncError::Connect {
            pid,
            message: "agent did not dial back before the connect timeout".to_string(),
        })?
        .map_err(|e| SyncError::Connect {
            pid,
            message: format!("rendezvous accept failed: {}", e),
        })?;

    debug!("agent for process {} connected from {}", pid, peer);
    Ok(ChannelHandle::from_stream(stream, pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_stream_keeps_pid() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        client.await.unwrap();

        let handle = ChannelHandle::from_stream(server_side, 7);
        assert_eq!(handle.pid(), 7);
    }
}
