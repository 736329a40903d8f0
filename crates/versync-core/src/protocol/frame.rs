//! Wire framing and message types for the agent channel.
//!
//! Frame format: 4-byte big-endian length prefix followed by a UTF-8 JSON
//! payload.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::config::AgentConfig;
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// First frame sent by the agent after dialing back.
///
/// Sent exactly once per session; the controller rejects the connection when
/// `protocol` does not match its own revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentHello {
    pub protocol: u32,
}

/// A pull request issued by the controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub method: DumpMethod,
    pub id: u64,
}

/// The two idempotent pull operations the agent answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpMethod {
    /// Full dataset dump: a serialized candidate store.
    ListDump,
    /// Incremental tag-key dump: name -> value pairs.
    KeyDump,
}

/// The agent's answer to a request.
///
/// `result: null` is the agent's way of declaring itself permanently
/// unavailable; an empty-but-present result means "nothing new".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed the connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > AgentConfig::MAX_FRAME_SIZE {
        return Err(SyncError::FrameTooLarge {
            size: len,
            max: AgentConfig::MAX_FRAME_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_round_trip() {
        let payload = b"hello agent";
        let mut buf = Vec::new();

        write_frame(&mut buf, payload).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_frame(&mut cursor).await.unwrap();
        assert_eq!(read_back, Some(payload.to_vec()));
    }

    #[tokio::test]
    async fn test_read_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let huge_len = (AgentConfig::MAX_FRAME_SIZE + 1) as u32;
        let mut buf = Vec::new();
        buf.extend_from_slice(&huge_len.to_be_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_frame(&mut cursor).await;
        assert!(matches!(result, Err(SyncError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_request_serialization() {
        let req = AgentRequest {
            method: DumpMethod::KeyDump,
            id: 3,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"key_dump\""));

        let parsed: AgentRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.method, DumpMethod::KeyDump);
        assert_eq!(parsed.id, 3);
    }

    #[test]
    fn test_response_null_result_decodes_as_none() {
        let parsed: AgentResponse = serde_json::from_str(r#"{"id": 1, "result": null}"#).unwrap();
        assert!(parsed.result.is_none());

        let parsed: AgentResponse = serde_json::from_str(r#"{"id": 2}"#).unwrap();
        assert!(parsed.result.is_none());
    }
}
