//! Closed status vocabulary and the event types derived from transitions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// QueueStatus
// ---------------------------------------------------------------------------

/// Every status a queue entry can occupy.
///
/// Declaration order carries no meaning. Legality of a change is decided by
/// the transition graph, never by comparing variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Registered, holding a token, not yet called.
    Waiting,
    /// Called to a counter.
    Serving,
    /// Service work in progress. Entry and exit are timestamped.
    Processing,
    /// Service finished. **Terminal.**
    Completed,
    /// Abandoned or withdrawn. **Terminal.**
    Cancelled,
}

impl QueueStatus {
    pub const ALL: [QueueStatus; 5] = [
        QueueStatus::Waiting,
        QueueStatus::Serving,
        QueueStatus::Processing,
        QueueStatus::Completed,
        QueueStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Waiting => "waiting",
            QueueStatus::Serving => "serving",
            QueueStatus::Processing => "processing",
            QueueStatus::Completed => "completed",
            QueueStatus::Cancelled => "cancelled",
        }
    }

    /// Returns `true` if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }

    /// Match a raw string against the vocabulary after trimming and
    /// case-folding. `None` when nothing matches.
    pub fn match_folded(raw: &str) -> Option<Self> {
        let folded = raw.trim().to_lowercase();
        Self::ALL.into_iter().find(|s| s.as_str() == folded)
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::match_folded(s).ok_or_else(|| StatusParseError { raw: s.to_string() })
    }
}

/// A status string that is not a member of the vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown queue status: {raw:?}")]
pub struct StatusParseError {
    pub raw: String,
}

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Ledger event type recorded for each committed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Entry called to a counter (`serving`).
    Called,
    /// Entry entered `processing`.
    ProcessingStarted,
    /// Entry reached `completed`.
    Served,
    /// Entry reached `cancelled`.
    Cancelled,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Called => "called",
            EventType::ProcessingStarted => "processing_started",
            EventType::Served => "served",
            EventType::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "called" => Some(EventType::Called),
            "processing_started" => Some(EventType::ProcessingStarted),
            "served" => Some(EventType::Served),
            "cancelled" => Some(EventType::Cancelled),
            _ => None,
        }
    }

    /// Event type for a transition landing on `to`.
    ///
    /// `waiting` is never a transition target, so it has no event type.
    pub fn for_target(to: QueueStatus) -> Option<Self> {
        match to {
            QueueStatus::Waiting => None,
            QueueStatus::Serving => Some(EventType::Called),
            QueueStatus::Processing => Some(EventType::ProcessingStarted),
            QueueStatus::Completed => Some(EventType::Served),
            QueueStatus::Cancelled => Some(EventType::Cancelled),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
