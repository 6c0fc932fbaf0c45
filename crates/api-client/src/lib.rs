//! sosync-api-client: HTTP transport for the emergency service
//!
//! Implements [`sosync_core::EmergencyService`] on top of `reqwest`. Status
//! codes outside 2xx surface as [`SessionError::ServerError`](sosync_core::SessionError::ServerError),
//! an empty body as `NoData`, an undecodable one as `InvalidResponse`, and
//! transport failures as `NetworkError` or `OperationTimeout`.
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use sosync_api_client::{HttpEmergencyService, HttpServiceConfig};
//! # use sosync_core::CoordinatorBuilder;
//! # async fn example() -> sosync_core::SessionResult<()> {
//! let service = HttpEmergencyService::new(
//!     HttpServiceConfig::new("https://api.example.com/api").with_access_token("token"),
//! )?;
//! let handle = CoordinatorBuilder::new()
//!     .identity(42, "device-1234")
//!     .service(Arc::new(service))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;

pub use client::HttpEmergencyService;
pub use config::HttpServiceConfig;
