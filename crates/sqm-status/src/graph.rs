//! Transition graph.
//!
//! ```text
//!              fast track
//!      ┌────────────────────────┐
//!      │                        ▼
//!   waiting ──► serving ──► processing ──► completed (term.)
//!      │           │            │
//!      └───────────┴────────────┴──────► cancelled (term.)
//! ```
//!
//! The graph is independent of who asks; role gating lives in [`crate::rbac`].

use crate::vocabulary::QueueStatus;
use crate::vocabulary::QueueStatus::{Cancelled, Completed, Processing, Serving, Waiting};

/// A directed `(from, to)` pair.
pub type Edge = (QueueStatus, QueueStatus);

/// Every legal edge. Pairs not listed here are illegal.
pub const LEGAL_EDGES: &[Edge] = &[
    (Waiting, Serving),
    (Waiting, Processing),
    (Serving, Processing),
    (Processing, Completed),
    (Waiting, Cancelled),
    (Serving, Cancelled),
    (Processing, Cancelled),
];

/// `true` when `from → to` is an edge of the graph. A transition must change
/// state, so same-status pairs are always illegal.
pub fn is_legal_transition(from: QueueStatus, to: QueueStatus) -> bool {
    from != to && LEGAL_EDGES.contains(&(from, to))
}

/// Statuses reachable from `from` in one step.
pub fn legal_targets(from: QueueStatus) -> impl Iterator<Item = QueueStatus> {
    LEGAL_EDGES
        .iter()
        .filter(move |(f, _)| *f == from)
        .map(|(_, t)| *t)
}
