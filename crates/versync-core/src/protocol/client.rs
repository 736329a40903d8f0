//! Protocol client for one connected agent session.
//!
//! # Thread Safety
//!
//! The client serializes access to the underlying stream with a tokio
//! `Mutex`, so it is safe to share behind an `Arc` even though the sync
//! loop only ever drives it from one control flow.

use super::frame::{read_frame, write_frame, AgentHello, AgentRequest, AgentResponse, DumpMethod};
use super::Dump;
use crate::channel::ChannelHandle;
use crate::config::AgentConfig;
use crate::error::{Result, SyncError};
use crate::store::VersionStore;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Client side of an established agent session.
#[derive(Debug)]
pub struct AgentClient {
    stream: Mutex<TcpStream>,
    next_id: AtomicU64,
    /// Target process id (for error reporting and notices).
    pid: u32,
}

impl AgentClient {
    /// Complete the connect handshake over a freshly attached channel.
    ///
    /// Waits up to `timeout` for the agent's single hello frame and checks
    /// the protocol revision. Stream loss or a malformed hello is a connect
    /// failure; a revision mismatch is an incompatible agent.
    pub async fn handshake(channel: ChannelHandle, timeout: Duration) -> Result<Self> {
        let (mut stream, pid) = channel.into_parts();

        let hello_bytes = tokio::time::timeout(timeout, read_frame(&mut stream))
            .await
            .map_err(|_| SyncError::Connect {
                pid,
                message: "agent sent no hello before the handshake timeout".to_string(),
            })??
            .ok_or_else(|| SyncError::Connect {
                pid,
                message: "stream closed during handshake".to_string(),
            })?;

        let hello: AgentHello =
            serde_json::from_slice(&hello_bytes).map_err(|e| SyncError::Connect {
                pid,
                message: format!("malformed hello frame: {}", e),
            })?;

        if hello.protocol != AgentConfig::PROTOCOL_VERSION {
            return Err(SyncError::ProtocolMismatch {
                pid,
                got: hello.protocol,
                expected: AgentConfig::PROTOCOL_VERSION,
            });
        }

        debug!("handshake with agent in process {} complete", pid);
        Ok(Self {
            stream: Mutex::new(stream),
            next_id: AtomicU64::new(1),
            pid,
        })
    }

    /// Target process id this session is bound to.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Request the agent's full current dataset.
    ///
    /// `Empty` means the agent has nothing yet, which is normal early in the
    /// target's lifetime.
    pub async fn list_dump(&self) -> Result<Dump<VersionStore>> {
        self.pull(DumpMethod::ListDump).await
    }

    /// Request tag keys reported since the session began.
    ///
    /// `Unavailable` is the liveness-failure signal; the caller must drop
    /// the connection and tell the user which process went away.
    pub async fn key_dump(&self) -> Result<Dump<BTreeMap<String, u64>>> {
        self.pull(DumpMethod::KeyDump).await
    }

    /// Tear down the session. Always succeeds locally, even if the remote
    /// end is already gone.
    pub async fn disconnect(self) {
        use tokio::io::AsyncWriteExt;
        let mut stream = self.stream.into_inner();
        let _ = stream.shutdown().await;
        debug!("disconnected from agent in process {}", self.pid);
    }

    /// Issue one pull request and classify the response.
    ///
    /// Stream errors and EOF map to `Unavailable` rather than hard errors:
    /// a vanished target is an expected liveness event, not a bug. Only a
    /// present-but-undecodable payload is an error, and it rejects the
    /// batch while leaving the connection up.
    async fn pull<T: DeserializeOwned>(&self, method: DumpMethod) -> Result<Dump<T>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = AgentRequest { method, id };
        let request_bytes = serde_json::to_vec(&request).map_err(SyncError::decode_live)?;

        let mut stream = self.stream.lock().await;
        let (mut reader, mut writer) = stream.split();

        if write_frame(&mut writer, &request_bytes).await.is_err() {
            return Ok(Dump::Unavailable);
        }

        let response_bytes = match read_frame(&mut reader).await {
            Ok(Some(bytes)) => bytes,
            // Clean EOF or stream error: the target is gone.
            Ok(None) | Err(SyncError::Io { .. }) => return Ok(Dump::Unavailable),
            Err(e) => return Err(e),
        };

        let response: AgentResponse =
            serde_json::from_slice(&response_bytes).map_err(SyncError::decode_live)?;

        let value = match response.result {
            None => return Ok(Dump::Unavailable),
            Some(v) => v,
        };

        if is_empty_payload(&value) {
            return Ok(Dump::Empty);
        }

        let data = serde_json::from_value(value).map_err(SyncError::decode_live)?;
        Ok(Dump::Data(data))
    }
}

/// An explicit empty response: `[]`, `{}`, or `""`.
fn is_empty_payload(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Array(a) => a.is_empty(),
        serde_json::Value::Object(o) => o.is_empty(),
        serde_json::Value::String(s) => s.is_empty(),
        _ => false,
    }
}
