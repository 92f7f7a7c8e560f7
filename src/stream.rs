//! Staged event stream for a single request.
//!
//! Events go out over one `mpsc` channel and are framed as
//! `data: {"event": ..., "data": ...}\n\n` by the transport.

use crate::error::{AgentError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

pub const STATUS_GENERATING: &str = "Generating SQL Query";
pub const DONE_PAYLOAD: &str = "Done.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Status(String),
    Sql(String),
    Text(String),
    Error(String),
    Done(String),
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamEvent::Status(_) => "status",
            StreamEvent::Sql(_) => "sql",
            StreamEvent::Text(_) => "text",
            StreamEvent::Error(_) => "error",
            StreamEvent::Done(_) => "done",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            StreamEvent::Status(s)
            | StreamEvent::Sql(s)
            | StreamEvent::Text(s)
            | StreamEvent::Error(s)
            | StreamEvent::Done(s) => s,
        }
    }

    /// `error` and `done` end the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Error(_) | StreamEvent::Done(_))
    }

    /// Wire form: `data: <json>\n\n`.
    pub fn to_frame(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// Inverse of [`StreamEvent::to_frame`], for a single frame.
    pub fn from_frame(frame: &str) -> Result<Self> {
        let json = frame
            .trim_end_matches('\n')
            .strip_prefix("data: ")
            .ok_or_else(|| AgentError::BadRequest(format!("Not an event frame: {:?}", frame)))?;
        Ok(serde_json::from_str(json)?)
    }
}

/// Split a raw stream body into its events.
pub fn parse_frames(body: &str) -> Result<Vec<StreamEvent>> {
    body.split("\n\n")
        .filter(|chunk| !chunk.trim().is_empty())
        .map(StreamEvent::from_frame)
        .collect()
}

/// Sending half of a request's event stream.
///
/// Once a terminal event has been sent, further emits are dropped.
pub struct StreamEmitter {
    tx: mpsc::Sender<StreamEvent>,
    closed: bool,
}

/// The receiving side has gone away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

impl StreamEmitter {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx, closed: false }
    }

    /// Emitter plus the receiver the transport drains.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Resolves once the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub async fn emit(&mut self, event: StreamEvent) -> std::result::Result<(), Disconnected> {
        if self.closed {
            debug!(event = event.kind(), "dropping event after stream end");
            return Ok(());
        }
        let terminal = event.is_terminal();
        self.tx.send(event).await.map_err(|_| Disconnected)?;
        if terminal {
            self.closed = true;
        }
        Ok(())
    }
}
