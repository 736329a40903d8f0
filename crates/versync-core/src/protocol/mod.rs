//! Typed request/response layer over the injection channel.
//!
//! The client drives two idempotent pull operations against the agent: a
//! full list dump and an incremental tag-key dump. Results are expressed as
//! [`Dump`] variants so the polling loop can tell a transient empty tick
//! from a fatal liveness event without exceptions-as-control-flow.

pub mod client;
pub mod frame;

pub use client::AgentClient;
pub use frame::{read_frame, write_frame, AgentHello, AgentRequest, AgentResponse, DumpMethod};

/// Outcome of a pull operation while connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dump<T> {
    /// The agent returned a batch of data.
    Data(T),
    /// The agent answered but has nothing new this round. Not an error.
    Empty,
    /// The agent declared the connection invalid (null result or stream
    /// loss). The caller must transition to disconnected.
    Unavailable,
}

impl<T> Dump<T> {
    /// True when the connection is no longer usable.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Dump::Unavailable)
    }
}
