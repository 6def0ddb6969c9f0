//! gcsfuse-sidecar-injector - mutating admission webhook for Cloud Storage FUSE
//!
//! Pods annotated with `gke-gcsfuse/volumes: "true"` get a FUSE sidecar
//! container and its scratch volume prepended to their spec at admission time.
//! Sidecar resources come from process-wide defaults, overridable per pod
//! through annotations.
//!
//! # Modules
//!
//! - [`annotations`] - Recognized pod annotations
//! - [`quantity`] - Resource quantities and request/limit resolution
//! - [`config`] - Sidecar defaults and per-pod configuration
//! - [`image`] - Image references and the placeholder image override
//! - [`sidecar`] - Sidecar container/volume specs and injection detection
//! - [`injector`] - The per-request admission decision
//! - [`webhook`] - HTTP(S) transport
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod annotations;
pub mod config;
pub mod error;
pub mod image;
pub mod injector;
pub mod quantity;
pub mod sidecar;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Sidecar Constants
// =============================================================================

/// Name of the injected container, also reserved for the placeholder
pub const SIDECAR_CONTAINER_NAME: &str = "gke-gcsfuse-sidecar";

/// Name of the sidecar's emptyDir scratch volume
pub const SIDECAR_VOLUME_NAME: &str = "gke-gcsfuse-tmp";

/// Where the scratch volume is mounted inside the sidecar
pub const SIDECAR_VOLUME_MOUNT_PATH: &str = "/gcsfuse-tmp";

/// UID the sidecar runs as (nobody)
pub const NOBODY_UID: i64 = 65534;

/// GID the sidecar runs as (nogroup)
pub const NOBODY_GID: i64 = 65534;

// =============================================================================
// Default Server Configuration
// =============================================================================

/// Default port for the TLS webhook listener
pub const DEFAULT_WEBHOOK_PORT: u16 = 22030;

/// Default port for the plain HTTP health listener
pub const DEFAULT_HEALTH_PORT: u16 = 22031;
