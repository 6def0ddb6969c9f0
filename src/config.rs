//! Sidecar configuration: startup defaults and per-pod resolution
//!
//! The defaults are built once from command line flags (or their environment
//! variables) and shared read-only by every request. Each admission request
//! resolves its own [`SidecarConfig`] from those defaults and the pod's
//! annotations via [`SidecarConfig::resolve`].

use std::collections::BTreeMap;
use std::fmt;

use clap::ValueEnum;

use crate::annotations::{Bound, Dimension, RESOURCE_OVERRIDES};
use crate::image;
use crate::quantity::{ResolvedPair, ResourceAmount, ResourcePair};
use crate::{Error, Result};

/// Image pull policy of the injected container
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ImagePullPolicy {
    /// Always pull
    #[value(name = "Always")]
    Always,
    /// Pull only when the image is missing on the node
    #[default]
    #[value(name = "IfNotPresent")]
    IfNotPresent,
    /// Never pull
    #[value(name = "Never")]
    Never,
}

impl ImagePullPolicy {
    /// Kubernetes spelling of the policy
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        }
    }
}

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved sidecar configuration
///
/// Also used for the process-wide defaults, which are simply a configuration
/// no pod has overridden yet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SidecarConfig {
    /// Sidecar container image
    pub container_image: String,
    /// Sidecar image pull policy
    pub image_pull_policy: ImagePullPolicy,
    /// CPU request and limit
    pub cpu: ResolvedPair,
    /// Memory request and limit
    pub memory: ResolvedPair,
    /// Ephemeral storage request and limit
    pub ephemeral_storage: ResolvedPair,
}

impl SidecarConfig {
    /// Resolve the configuration for one pod
    ///
    /// Image and pull policy always come from `defaults`. Each resource pair
    /// starts unset, is filled from the override annotations present, then
    /// resolved against the matching default pair. Unknown annotations are
    /// ignored; an override that is not a valid quantity fails the whole
    /// resolution.
    pub fn resolve(
        defaults: &SidecarConfig,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut cpu = ResourcePair::default();
        let mut memory = ResourcePair::default();
        let mut ephemeral_storage = ResourcePair::default();

        for entry in &RESOURCE_OVERRIDES {
            let Some(value) = annotations.get(entry.key) else {
                continue;
            };
            let amount = ResourceAmount::parse(value)
                .map_err(|e| Error::malformed_override(entry.key, value, e.to_string()))?;

            let pair = match entry.dimension {
                Dimension::Cpu => &mut cpu,
                Dimension::Memory => &mut memory,
                Dimension::EphemeralStorage => &mut ephemeral_storage,
            };
            match entry.bound {
                Bound::Request => pair.request = Some(amount),
                Bound::Limit => pair.limit = Some(amount),
            }
        }

        Ok(Self {
            container_image: defaults.container_image.clone(),
            image_pull_policy: defaults.image_pull_policy,
            cpu: cpu.resolve(&defaults.cpu),
            memory: memory.resolve(&defaults.memory),
            ephemeral_storage: ephemeral_storage.resolve(&defaults.ephemeral_storage),
        })
    }

    /// The resolved pair for a dimension
    pub fn pair(&self, dimension: Dimension) -> &ResolvedPair {
        match dimension {
            Dimension::Cpu => &self.cpu,
            Dimension::Memory => &self.memory,
            Dimension::EphemeralStorage => &self.ephemeral_storage,
        }
    }
}

/// Command line flags for the sidecar defaults
#[derive(clap::Args, Clone, Debug)]
pub struct SidecarArgs {
    /// Default sidecar container image
    #[arg(long = "sidecar-image", env = "SIDECAR_IMAGE")]
    pub image: String,

    /// Sidecar image pull policy
    #[arg(
        long = "sidecar-image-pull-policy",
        env = "SIDECAR_IMAGE_PULL_POLICY",
        value_enum,
        default_value = "IfNotPresent"
    )]
    pub image_pull_policy: ImagePullPolicy,

    /// Default sidecar CPU request
    #[arg(
        long = "sidecar-cpu-request",
        env = "SIDECAR_CPU_REQUEST",
        value_parser = ResourceAmount::parse,
        default_value = "250m"
    )]
    pub cpu_request: ResourceAmount,

    /// Default sidecar CPU limit
    #[arg(
        long = "sidecar-cpu-limit",
        env = "SIDECAR_CPU_LIMIT",
        value_parser = ResourceAmount::parse,
        default_value = "250m"
    )]
    pub cpu_limit: ResourceAmount,

    /// Default sidecar memory request
    #[arg(
        long = "sidecar-memory-request",
        env = "SIDECAR_MEMORY_REQUEST",
        value_parser = ResourceAmount::parse,
        default_value = "256Mi"
    )]
    pub memory_request: ResourceAmount,

    /// Default sidecar memory limit
    #[arg(
        long = "sidecar-memory-limit",
        env = "SIDECAR_MEMORY_LIMIT",
        value_parser = ResourceAmount::parse,
        default_value = "256Mi"
    )]
    pub memory_limit: ResourceAmount,

    /// Default sidecar ephemeral storage request
    #[arg(
        long = "sidecar-ephemeral-storage-request",
        env = "SIDECAR_EPHEMERAL_STORAGE_REQUEST",
        value_parser = ResourceAmount::parse,
        default_value = "5Gi"
    )]
    pub ephemeral_storage_request: ResourceAmount,

    /// Default sidecar ephemeral storage limit
    #[arg(
        long = "sidecar-ephemeral-storage-limit",
        env = "SIDECAR_EPHEMERAL_STORAGE_LIMIT",
        value_parser = ResourceAmount::parse,
        default_value = "5Gi"
    )]
    pub ephemeral_storage_limit: ResourceAmount,
}

impl SidecarArgs {
    /// Build the process-wide defaults, rejecting an unusable default image
    pub fn into_config(self) -> Result<SidecarConfig> {
        image::validate_reference(&self.image)
            .map_err(|e| Error::config(format!("--sidecar-image: {e}")))?;

        Ok(SidecarConfig {
            container_image: self.image,
            image_pull_policy: self.image_pull_policy,
            cpu: ResolvedPair::new(self.cpu_request, self.cpu_limit),
            memory: ResolvedPair::new(self.memory_request, self.memory_limit),
            ephemeral_storage: ResolvedPair::new(
                self.ephemeral_storage_request,
                self.ephemeral_storage_limit,
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::*;
    use clap::Parser;

    fn amount(s: &str) -> ResourceAmount {
        ResourceAmount::parse(s).unwrap()
    }

    fn defaults() -> SidecarConfig {
        SidecarConfig {
            container_image: "gcr.io/gke-release/gcs-fuse-csi-driver-sidecar-mounter:v1"
                .to_string(),
            image_pull_policy: ImagePullPolicy::IfNotPresent,
            cpu: ResolvedPair::new(amount("250m"), amount("250m")),
            memory: ResolvedPair::new(amount("256Mi"), amount("256Mi")),
            ephemeral_storage: ResolvedPair::new(amount("5Gi"), amount("5Gi")),
        }
    }

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    #[test]
    fn no_overrides_yields_defaults() {
        let config = SidecarConfig::resolve(&defaults(), &BTreeMap::new()).unwrap();
        assert_eq!(config, defaults());
    }

    #[test]
    fn unrelated_annotations_are_ignored() {
        let config = SidecarConfig::resolve(
            &defaults(),
            &annotations(&[
                (ENABLE_KEY, "true"),
                ("gke-gcsfuse/future-knob", "not-a-quantity"),
                ("app.kubernetes.io/name", "web"),
            ]),
        )
        .unwrap();
        assert_eq!(config, defaults());
    }

    #[test]
    fn full_overrides_replace_every_amount() {
        let config = SidecarConfig::resolve(
            &defaults(),
            &annotations(&[
                (CPU_REQUEST_KEY, "500m"),
                (CPU_LIMIT_KEY, "1"),
                (MEMORY_REQUEST_KEY, "1Gi"),
                (MEMORY_LIMIT_KEY, "2Gi"),
                (EPHEMERAL_STORAGE_REQUEST_KEY, "10Gi"),
                (EPHEMERAL_STORAGE_LIMIT_KEY, "20Gi"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cpu, ResolvedPair::new(amount("500m"), amount("1")));
        assert_eq!(config.memory, ResolvedPair::new(amount("1Gi"), amount("2Gi")));
        assert_eq!(
            config.ephemeral_storage,
            ResolvedPair::new(amount("10Gi"), amount("20Gi"))
        );
    }

    #[test]
    fn partial_override_only_touches_its_dimension() {
        let config = SidecarConfig::resolve(&defaults(), &annotations(&[(MEMORY_LIMIT_KEY, "1Gi")]))
            .unwrap();

        assert_eq!(config.memory, ResolvedPair::new(amount("1Gi"), amount("1Gi")));
        assert_eq!(config.cpu, defaults().cpu);
        assert_eq!(config.ephemeral_storage, defaults().ephemeral_storage);
    }

    #[test]
    fn image_and_pull_policy_come_from_defaults() {
        let mut base = defaults();
        base.image_pull_policy = ImagePullPolicy::Always;
        let config = SidecarConfig::resolve(&base, &annotations(&[(CPU_LIMIT_KEY, "1")])).unwrap();
        assert_eq!(config.container_image, base.container_image);
        assert_eq!(config.image_pull_policy, ImagePullPolicy::Always);
    }

    #[test]
    fn malformed_override_fails_with_key_and_value() {
        let err = SidecarConfig::resolve(
            &defaults(),
            &annotations(&[(CPU_REQUEST_KEY, "100m"), (MEMORY_LIMIT_KEY, "lots")]),
        )
        .unwrap_err();

        match err {
            Error::MalformedOverride { key, value, .. } => {
                assert_eq!(key, MEMORY_LIMIT_KEY);
                assert_eq!(value, "lots");
            }
            other => panic!("Expected MalformedOverride, got {other:?}"),
        }
    }

    #[test]
    fn empty_override_is_malformed() {
        let err = SidecarConfig::resolve(&defaults(), &annotations(&[(CPU_LIMIT_KEY, "")]));
        assert!(matches!(err, Err(Error::MalformedOverride { .. })));
    }

    #[test]
    fn pair_accessor_matches_fields() {
        let config = defaults();
        assert_eq!(config.pair(Dimension::Cpu), &config.cpu);
        assert_eq!(config.pair(Dimension::Memory), &config.memory);
        assert_eq!(
            config.pair(Dimension::EphemeralStorage),
            &config.ephemeral_storage
        );
    }

    // =========================================================================
    // Command line defaults
    // =========================================================================

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        sidecar: SidecarArgs,
    }

    #[test]
    fn flags_fall_back_to_builtin_defaults() {
        let cli = TestCli::try_parse_from(["test", "--sidecar-image", "repo/img:tag"]).unwrap();
        let config = cli.sidecar.into_config().unwrap();

        assert_eq!(config.container_image, "repo/img:tag");
        assert_eq!(config.image_pull_policy, ImagePullPolicy::IfNotPresent);
        assert_eq!(config.cpu, ResolvedPair::new(amount("250m"), amount("250m")));
        assert_eq!(config.memory, ResolvedPair::new(amount("256Mi"), amount("256Mi")));
        assert_eq!(
            config.ephemeral_storage,
            ResolvedPair::new(amount("5Gi"), amount("5Gi"))
        );
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "test",
            "--sidecar-image",
            "repo/img:tag",
            "--sidecar-image-pull-policy",
            "Always",
            "--sidecar-cpu-limit",
            "0",
        ])
        .unwrap();
        let config = cli.sidecar.into_config().unwrap();
        assert_eq!(config.image_pull_policy, ImagePullPolicy::Always);
        assert!(config.cpu.limit.is_zero());
    }

    #[test]
    fn bad_quantity_flag_is_rejected_by_parser() {
        let result = TestCli::try_parse_from([
            "test",
            "--sidecar-image",
            "repo/img:tag",
            "--sidecar-memory-limit",
            "1 GB",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn bad_default_image_is_a_config_error() {
        let cli = TestCli::try_parse_from(["test", "--sidecar-image", "Repo/IMG"]).unwrap();
        assert!(matches!(cli.sidecar.into_config(), Err(Error::Config(_))));
    }

    #[test]
    fn pull_policy_renders_kubernetes_spelling() {
        assert_eq!(ImagePullPolicy::Always.to_string(), "Always");
        assert_eq!(ImagePullPolicy::IfNotPresent.to_string(), "IfNotPresent");
        assert_eq!(ImagePullPolicy::Never.to_string(), "Never");
    }
}
