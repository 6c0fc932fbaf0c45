//! sosync-core: emergency SOS session coordination
//!
//! This crate owns the lifecycle of a single emergency session shared between
//! a primary device and a paired companion. It runs the countdown, drives the
//! remote emergency service, persists a snapshot after every adoption,
//! reconciles with the server on cold start and replicates state to the
//! companion.
//!
//! ## Layering
//! ```text
//! sosync-cli -> sosync-core <- sosync-api-client (EmergencyService over HTTP)
//! ```
//!
//! Everything outside the coordinator is a collaborator behind a trait:
//! - [`EmergencyService`] - create/activate/cancel/recover/complete/location/fetch
//! - [`KeyValueStore`] - where the `{state, session}` snapshot lives
//! - [`LocationSource`] - latest fix and a stream of new fixes
//! - [`CompanionChannel`] - immediate and queued delivery to the paired device
//!
//! ## Quick Start
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use sosync_core::{CoordinatorBuilder, InMemoryEmergencyService, SessionState};
//! # async fn example() -> sosync_core::SessionResult<()> {
//! let handle = CoordinatorBuilder::new()
//!     .identity(42, "device-1234")
//!     .service(Arc::new(InMemoryEmergencyService::new()))
//!     .build()
//!     .await?;
//!
//! handle.initiate();
//! let snapshot = handle.wait_for(|s| s.state == SessionState::Active).await?;
//! println!("emergency {:?} active", snapshot.session_id());
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod companion;
pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod location;
pub mod recovery;
pub mod service;
pub mod state_table;
pub mod store;
pub mod types;

mod coordinator;
mod timer;

pub use builder::CoordinatorBuilder;
pub use companion::{CompanionChannel, CompanionLink, SessionUpdateSink, deliver};
pub use config::{CoordinatorConfig, DeliveryPreference};
pub use error::{SessionError, SessionResult};
pub use events::{ChangeSource, EventPriority, Operation, SessionEvent};
pub use handle::CoordinatorHandle;
pub use location::{LocationSource, ManualLocationSource, TrackingAccuracy};
pub use recovery::{RetryConfig, call_with_retry, with_timeout};
pub use service::{CreateEmergencyRequest, EmergencyService, InMemoryEmergencyService};
pub use store::{FileStore, KeyValueStore, MemoryStore, SESSION_KEY, STATE_KEY, SnapshotStore};
pub use types::{
    CompanionMessage, Coordinates, DeviceOrigin, EmergencyId, EmergencySession, Location,
    SessionSnapshot, SessionState,
};

/// sosync-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
