//! rxperm: future-based runtime permissions
//!
//! Turns a callback-style host permission API (check, prompt with a request
//! code, receive results in a callback) into futures that compose with the
//! rest of an async program.
//!
//! # Architecture
//!
//! ```text
//!  caller ──► Permissions ──check──────────────► PermissionHost
//!                 │        ──prompt(token)──────►      │
//!                 ▼                                    │ callback(token, results)
//!          RequestCorrelator ◄── on_request_permissions_result
//!          token → pending notifier
//! ```
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use rxperm::{Permissions, PermissionKind};
//!
//! let permissions = Permissions::builder()
//!     .host(MyPlatformHost::new(activity))
//!     .audit(rxperm::audit::TracingAuditSink)
//!     .build()?;
//!
//! // Forward the platform callback:
//! // permissions.on_request_permissions_result(token, &names, &results);
//!
//! if permissions.request(vec![PermissionKind::Camera]).await? {
//!     open_camera();
//! }
//! ```

pub mod audit;
pub mod config;
pub mod correlator;
pub mod error;
pub mod facade;
pub mod host;
pub mod rationale;
#[cfg(feature = "subscriber")]
pub mod tracing_support;

pub use config::{ConfigError, PermissionsBuilder, PermissionsConfig};
pub use correlator::{CorrelatorConfig, GrantNotifier, PendingRequest, RequestCorrelator, TokenPolicy};
pub use error::PermissionError;
pub use facade::Permissions;
pub use host::{HostError, MemoryPermissionHost, PermissionHost};
pub use rationale::{RationaleAck, RationaleDialog, RationalePolicy};
pub use rxperm_api::{GrantResult, PermissionKind, RequestToken, BASE_REQUEST_TOKEN};
