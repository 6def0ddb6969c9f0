//! Pod annotations understood by the injector
//!
//! The resource override keys are mapped to config fields through
//! [`RESOURCE_OVERRIDES`]; adding or renaming a key means touching that table.

/// Opt-in flag: `"true"` requests injection, `"false"` declines it
pub const ENABLE_KEY: &str = "gke-gcsfuse/volumes";

/// Sidecar CPU request override
pub const CPU_REQUEST_KEY: &str = "gke-gcsfuse/cpu-request";
/// Sidecar CPU limit override
pub const CPU_LIMIT_KEY: &str = "gke-gcsfuse/cpu-limit";
/// Sidecar memory request override
pub const MEMORY_REQUEST_KEY: &str = "gke-gcsfuse/memory-request";
/// Sidecar memory limit override
pub const MEMORY_LIMIT_KEY: &str = "gke-gcsfuse/memory-limit";
/// Sidecar ephemeral storage request override
pub const EPHEMERAL_STORAGE_REQUEST_KEY: &str = "gke-gcsfuse/ephemeral-storage-request";
/// Sidecar ephemeral storage limit override
pub const EPHEMERAL_STORAGE_LIMIT_KEY: &str = "gke-gcsfuse/ephemeral-storage-limit";

/// A resource dimension of the sidecar
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dimension {
    /// CPU
    Cpu,
    /// Memory
    Memory,
    /// Ephemeral storage
    EphemeralStorage,
}

impl Dimension {
    /// Resource name as used in a container's resource lists
    pub fn resource_name(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::Memory => "memory",
            Self::EphemeralStorage => "ephemeral-storage",
        }
    }
}

/// Which half of a request/limit pair an override targets
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Bound {
    /// The request
    Request,
    /// The limit
    Limit,
}

/// Override key and the field it sets
#[derive(Clone, Copy, Debug)]
pub struct ResourceOverride {
    /// Annotation key
    pub key: &'static str,
    /// Dimension the key targets
    pub dimension: Dimension,
    /// Request or limit
    pub bound: Bound,
}

/// Every recognized resource override annotation
pub const RESOURCE_OVERRIDES: [ResourceOverride; 6] = [
    ResourceOverride {
        key: CPU_REQUEST_KEY,
        dimension: Dimension::Cpu,
        bound: Bound::Request,
    },
    ResourceOverride {
        key: CPU_LIMIT_KEY,
        dimension: Dimension::Cpu,
        bound: Bound::Limit,
    },
    ResourceOverride {
        key: MEMORY_REQUEST_KEY,
        dimension: Dimension::Memory,
        bound: Bound::Request,
    },
    ResourceOverride {
        key: MEMORY_LIMIT_KEY,
        dimension: Dimension::Memory,
        bound: Bound::Limit,
    },
    ResourceOverride {
        key: EPHEMERAL_STORAGE_REQUEST_KEY,
        dimension: Dimension::EphemeralStorage,
        bound: Bound::Request,
    },
    ResourceOverride {
        key: EPHEMERAL_STORAGE_LIMIT_KEY,
        dimension: Dimension::EphemeralStorage,
        bound: Bound::Limit,
    },
];
