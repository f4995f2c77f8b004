//! Queue status transition engine.
//!
//! [`StatusEngine`] is the single write path for queue statuses. It validates
//! each request against the transition graph and the role matrix, persists
//! the change and its ledger row atomically under the entity's row lock, then
//! notifies publishers and analytics.

pub mod analytics;
pub mod entity;
pub mod error;
pub mod executor;
pub mod publisher;

pub use analytics::{
    duration_sample, spawn_worker, stamp_processing_window, AnalyticsHandle, AnalyticsRecorder,
    WindowStamp,
};
pub use entity::{Actor, ActorRole, CommittedTransition, QueueEntity};
pub use error::{PublishError, TransitionError};
pub use executor::{EngineOptions, StatusEngine};
pub use publisher::{is_processing_edge, BroadcastPublisher, EventPublisher, TransitionNotice};
