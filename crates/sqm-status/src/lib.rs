//! Queue status vocabulary, normalizer, transition graph and RBAC matrix.
//!
//! Everything in this crate is pure: no IO, no clock, no shared mutable
//! state. The tables are process-wide constants and need no locking.

pub mod graph;
pub mod normalizer;
pub mod rbac;
pub mod vocabulary;

pub use graph::{is_legal_transition, legal_targets, Edge, LEGAL_EDGES};
pub use normalizer::{normalize, parse_requested, Normalized};
pub use rbac::{check_transition, is_allowed_for_role, Role, Verdict};
pub use vocabulary::{EventType, QueueStatus, StatusParseError};
