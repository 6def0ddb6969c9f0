//! Sidecar container and volume specs
//!
//! Builders for what gets injected, plus the predicate telling whether a pod
//! already carries an injected sidecar.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, Pod, ResourceRequirements, SeccompProfile,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::annotations::Dimension;
use crate::config::SidecarConfig;
use crate::quantity::ResourceAmount;
use crate::{
    NOBODY_GID, NOBODY_UID, SIDECAR_CONTAINER_NAME, SIDECAR_VOLUME_MOUNT_PATH, SIDECAR_VOLUME_NAME,
};

const DIMENSIONS: [Dimension; 3] = [
    Dimension::Cpu,
    Dimension::Memory,
    Dimension::EphemeralStorage,
];

/// Build the sidecar container for a resolved configuration
pub fn container(config: &SidecarConfig) -> Container {
    Container {
        name: SIDECAR_CONTAINER_NAME.to_string(),
        image: Some(config.container_image.clone()),
        image_pull_policy: Some(config.image_pull_policy.to_string()),
        args: Some(vec!["--v=5".to_string()]),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            read_only_root_filesystem: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            seccomp_profile: Some(SeccompProfile {
                type_: "RuntimeDefault".to_string(),
                ..Default::default()
            }),
            run_as_non_root: Some(true),
            run_as_user: Some(NOBODY_UID),
            run_as_group: Some(NOBODY_GID),
            ..Default::default()
        }),
        resources: Some(resources(config)),
        volume_mounts: Some(vec![VolumeMount {
            name: SIDECAR_VOLUME_NAME.to_string(),
            mount_path: SIDECAR_VOLUME_MOUNT_PATH.to_string(),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Requests and limits, leaving out zero amounts
fn resources(config: &SidecarConfig) -> ResourceRequirements {
    let mut requests = BTreeMap::new();
    let mut limits = BTreeMap::new();

    for dimension in DIMENSIONS {
        let pair = config.pair(dimension);
        insert_nonzero(&mut requests, dimension, &pair.request);
        insert_nonzero(&mut limits, dimension, &pair.limit);
    }

    ResourceRequirements {
        requests: (!requests.is_empty()).then_some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }
}

fn insert_nonzero(
    list: &mut BTreeMap<String, Quantity>,
    dimension: Dimension,
    amount: &ResourceAmount,
) {
    if !amount.is_zero() {
        list.insert(dimension.resource_name().to_string(), amount.to_quantity());
    }
}

/// Volumes to prepend to a pod's volume list
///
/// Empty when the pod already has a volume with the sidecar's volume name.
pub fn volumes(existing: &[Volume]) -> Vec<Volume> {
    if existing.iter().any(|v| v.name == SIDECAR_VOLUME_NAME) {
        return Vec::new();
    }

    vec![Volume {
        name: SIDECAR_VOLUME_NAME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }]
}

/// Whether the pod already carries an injected sidecar
///
/// Requires a sidecar-named container mounting the sidecar volume, and an
/// emptyDir volume of that name. In strict mode the container must also run
/// as the nobody user and group, which a pod author's placeholder does not.
pub fn is_injected(pod: &Pod, strict: bool) -> bool {
    let Some(spec) = pod.spec.as_ref() else {
        return false;
    };

    let container_injected = spec
        .containers
        .iter()
        .find(|c| c.name == SIDECAR_CONTAINER_NAME)
        .is_some_and(|c| mounts_sidecar_volume(c) && (!strict || runs_as_nobody(c)));

    let volume_injected = spec
        .volumes
        .iter()
        .flatten()
        .any(|v| v.name == SIDECAR_VOLUME_NAME && v.empty_dir.is_some());

    container_injected && volume_injected
}

fn mounts_sidecar_volume(container: &Container) -> bool {
    container
        .volume_mounts
        .iter()
        .flatten()
        .any(|m| m.name == SIDECAR_VOLUME_NAME && m.mount_path == SIDECAR_VOLUME_MOUNT_PATH)
}

fn runs_as_nobody(container: &Container) -> bool {
    container.security_context.as_ref().is_some_and(|sc| {
        sc.run_as_user == Some(NOBODY_UID) && sc.run_as_group == Some(NOBODY_GID)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImagePullPolicy;
    use crate::quantity::ResolvedPair;
    use k8s_openapi::api::core::v1::PodSpec;

    fn amount(s: &str) -> ResourceAmount {
        ResourceAmount::parse(s).unwrap()
    }

    fn config() -> SidecarConfig {
        SidecarConfig {
            container_image: "repo/sidecar:v1".to_string(),
            image_pull_policy: ImagePullPolicy::Always,
            cpu: ResolvedPair::new(amount("250m"), amount("500m")),
            memory: ResolvedPair::new(amount("256Mi"), amount("256Mi")),
            ephemeral_storage: ResolvedPair::new(amount("5Gi"), amount("5Gi")),
        }
    }

    fn pod(containers: Vec<Container>, volumes: Vec<Volume>) -> Pod {
        Pod {
            spec: Some(PodSpec {
                containers,
                volumes: Some(volumes),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    // =========================================================================
    // Container spec
    // =========================================================================

    #[test]
    fn container_carries_config() {
        let c = container(&config());
        assert_eq!(c.name, SIDECAR_CONTAINER_NAME);
        assert_eq!(c.image.as_deref(), Some("repo/sidecar:v1"));
        assert_eq!(c.image_pull_policy.as_deref(), Some("Always"));

        let resources = c.resources.unwrap();
        let requests = resources.requests.unwrap();
        let limits = resources.limits.unwrap();
        assert_eq!(requests["cpu"], Quantity("250m".to_string()));
        assert_eq!(limits["cpu"], Quantity("500m".to_string()));
        assert_eq!(requests["memory"], Quantity("256Mi".to_string()));
        assert_eq!(limits["ephemeral-storage"], Quantity("5Gi".to_string()));
    }

    #[test]
    fn container_is_locked_down() {
        let sc = container(&config()).security_context.unwrap();
        assert_eq!(sc.allow_privilege_escalation, Some(false));
        assert_eq!(sc.read_only_root_filesystem, Some(true));
        assert_eq!(sc.run_as_non_root, Some(true));
        assert_eq!(sc.run_as_user, Some(NOBODY_UID));
        assert_eq!(sc.run_as_group, Some(NOBODY_GID));
        assert_eq!(
            sc.capabilities.unwrap().drop,
            Some(vec!["ALL".to_string()])
        );
        assert_eq!(sc.seccomp_profile.unwrap().type_, "RuntimeDefault");
    }

    #[test]
    fn zero_amounts_are_left_out() {
        let mut cfg = config();
        cfg.cpu = ResolvedPair::new(amount("0"), amount("0"));
        cfg.memory.limit = amount("0Mi");

        let resources = container(&cfg).resources.unwrap();
        let requests = resources.requests.unwrap();
        let limits = resources.limits.unwrap();
        assert!(!requests.contains_key("cpu"));
        assert!(!limits.contains_key("cpu"));
        assert!(!limits.contains_key("memory"));
        assert!(requests.contains_key("memory"));
    }

    #[test]
    fn all_zero_amounts_leave_no_lists() {
        let zero = ResolvedPair::new(amount("0"), amount("0"));
        let mut cfg = config();
        cfg.cpu = zero.clone();
        cfg.memory = zero.clone();
        cfg.ephemeral_storage = zero;

        let resources = container(&cfg).resources.unwrap();
        assert!(resources.requests.is_none());
        assert!(resources.limits.is_none());
    }

    // =========================================================================
    // Volume spec
    // =========================================================================

    #[test]
    fn volume_is_added_when_missing() {
        let vols = volumes(&[]);
        assert_eq!(vols.len(), 1);
        assert_eq!(vols[0].name, SIDECAR_VOLUME_NAME);
        assert!(vols[0].empty_dir.is_some());
    }

    #[test]
    fn volume_is_not_duplicated() {
        let existing = volumes(&[]);
        assert!(volumes(&existing).is_empty());
    }

    // =========================================================================
    // Injection detection
    // =========================================================================

    #[test]
    fn freshly_injected_pod_is_detected() {
        let pod = pod(vec![container(&config())], volumes(&[]));
        assert!(is_injected(&pod, true));
        assert!(is_injected(&pod, false));
    }

    #[test]
    fn pod_without_spec_is_not_injected() {
        assert!(!is_injected(&Pod::default(), false));
    }

    #[test]
    fn missing_volume_means_not_injected() {
        let pod = pod(vec![container(&config())], vec![]);
        assert!(!is_injected(&pod, false));
    }

    /// Story: A pod author's placeholder is not mistaken for an injection
    ///
    /// The placeholder shares the sidecar's name; strict mode looks at the
    /// security context the injector sets so the pod still gets injected.
    #[test]
    fn story_placeholder_is_not_an_injection_in_strict_mode() {
        let mut placeholder = container(&config());
        placeholder.security_context = None;
        let pod = pod(vec![placeholder], volumes(&[]));

        assert!(!is_injected(&pod, true));
        assert!(is_injected(&pod, false));
    }
}
