//! Actor-based monitoring pipeline
//!
//! This module implements the runtime of the engine. Each actor runs as an
//! independent async task communicating via Tokio channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌─────────────────┐
//!                  │  Hub (main)     │
//!                  └────────┬────────┘
//!                           │ spawns
//!          ┌────────────────┼────────────────┐
//!          │                │                │
//!  ┌───────▼───────┐ ┌──────▼──────┐ ┌───────▼───────┐
//!  │ SchedulerActor│ │NotifierActor│ │RetentionActor │
//!  └───────┬───────┘ └──────▲──────┘ └───────────────┘
//!          │ spawns per due │ subscribe
//!          │ target         │
//!  ┌───────▼───────┐  ┌─────┴──────────┐
//!  │ Pipeline task │  │ Broadcast Chan │ (AlertEvent)
//!  │ scan → diff → ├─►│ (MPMC)         │
//!  │ alert         │  └────────────────┘
//!  └───────────────┘
//! ```
//!
//! ## Actor Types
//!
//! - **SchedulerActor**: Ticks at a fixed interval, selects due targets, and
//!   spawns pipeline tasks under a global concurrency bound with per-target
//!   mutual exclusion
//! - **NotifierActor**: Fans alerts out to notification transports without
//!   ever blocking the pipeline
//! - **RetentionActor**: Prunes old snapshots and resolved alerts
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: Each actor has an mpsc command channel for control messages
//! 2. **Events**: Pipeline tasks publish alerts to a broadcast channel
//! 3. **Request/Response**: oneshot channels for synchronous queries

pub mod messages;
pub mod notifier;
pub mod pipeline;
pub mod retention;
pub mod scheduler;
