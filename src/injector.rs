//! Injection decision for a single admission request
//!
//! [`SidecarInjector::admit`] walks one request through the checks, first
//! match wins:
//!
//! 1. object missing or not a Pod: rejected
//! 2. not a CREATE: allowed unchanged
//! 3. no `gke-gcsfuse/volumes` annotation, or `false`: allowed unchanged
//! 4. annotation neither `true` nor `false`: rejected
//! 5. sidecar already injected: allowed unchanged
//! 6. config resolution or placeholder extraction fails: rejected
//! 7. otherwise the pod is mutated
//!
//! Nothing here performs I/O and nothing is shared between requests except
//! the read-only defaults.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::StatusCode;
use json_patch::Patch;
use k8s_openapi::api::core::v1::Pod;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use kube::core::DynamicObject;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::annotations::ENABLE_KEY;
use crate::config::SidecarConfig;
use crate::{image, sidecar, Error, Result};

/// Outcome of an admission request
#[derive(Debug)]
pub enum Admission {
    /// Let the pod through unchanged
    Allowed(String),
    /// Refuse the pod
    Rejected {
        /// HTTP-equivalent status
        status: StatusCode,
        /// Human readable cause
        cause: String,
    },
    /// Let the pod through with this patch applied
    Mutated(Patch),
}

impl Admission {
    fn allowed(reason: impl Into<String>) -> Self {
        Self::Allowed(reason.into())
    }

    fn bad_request(err: Error) -> Self {
        Self::Rejected {
            status: StatusCode::BAD_REQUEST,
            cause: err.to_string(),
        }
    }

    /// Encode the outcome as a response to `request`
    pub fn into_response<T>(self, request: &AdmissionRequest<T>) -> AdmissionResponse
    where
        T: kube::Resource,
    {
        match self {
            Self::Allowed(reason) => {
                let mut response = AdmissionResponse::from(request);
                response.result.code = StatusCode::OK.as_u16();
                response.result.message = reason;
                response
            }
            Self::Rejected { status, cause } => {
                let mut response = AdmissionResponse::from(request).deny(cause);
                response.result.code = status.as_u16();
                response
            }
            Self::Mutated(patch) => match AdmissionResponse::from(request).with_patch(patch) {
                Ok(response) => response,
                Err(e) => {
                    warn!(uid = %request.uid, error = %e, "Failed to serialize patch");
                    let mut response = AdmissionResponse::from(request)
                        .deny(format!("patch serialization error: {e}"));
                    response.result.code = StatusCode::BAD_REQUEST.as_u16();
                    response
                }
            },
        }
    }
}

/// Decides on and performs sidecar injection
#[derive(Clone, Debug)]
pub struct SidecarInjector {
    defaults: Arc<SidecarConfig>,
}

impl SidecarInjector {
    /// Create an injector around the process-wide defaults
    pub fn new(defaults: Arc<SidecarConfig>) -> Self {
        Self { defaults }
    }

    /// The defaults every request starts from
    pub fn defaults(&self) -> &SidecarConfig {
        &self.defaults
    }

    /// Decide what happens to the pod in `request`
    pub fn admit(&self, request: &AdmissionRequest<DynamicObject>) -> Admission {
        let uid = &request.uid;
        let is_create = matches!(request.operation, Operation::Create);

        let object = match &request.object {
            Some(obj) => obj,
            None if !is_create => {
                debug!(uid = %uid, operation = ?request.operation, "No object in request, allowing unchanged");
                return Admission::allowed(format!(
                    "No injection required for operation {:?}.",
                    request.operation
                ));
            }
            None => {
                warn!(uid = %uid, "CREATE request without an object");
                return Admission::bad_request(Error::decode("admission request has no object"));
            }
        };

        let (original, pod) = match decode_pod(object) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(uid = %uid, name = %request.name, namespace = ?request.namespace, error = %e, "Could not decode pod");
                return Admission::bad_request(e);
            }
        };

        if !is_create {
            return Admission::allowed(format!(
                "No injection required for operation {:?}.",
                request.operation
            ));
        }

        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let Some(enabled) = annotations.get(ENABLE_KEY) else {
            return Admission::allowed(format!(
                "The annotation key {ENABLE_KEY:?} is not found, no injection required."
            ));
        };

        match enabled.to_lowercase().as_str() {
            "false" => {
                debug!(uid = %uid, pod = %PodName(&pod), "Injection explicitly disabled");
                return Admission::allowed(format!(
                    "Found annotation '{ENABLE_KEY}: false', no injection required."
                ));
            }
            "true" => {
                info!(uid = %uid, pod = %PodName(&pod), "Injection requested, preparing sidecar");
            }
            _ => {
                warn!(uid = %uid, pod = %PodName(&pod), value = %enabled, "Invalid opt-in annotation value");
                return Admission::bad_request(Error::InvalidAnnotationValue {
                    key: ENABLE_KEY.to_string(),
                    value: enabled.clone(),
                });
            }
        }

        if sidecar::is_injected(&pod, true) {
            return Admission::allowed("The sidecar container was injected, no injection required.");
        }

        match self.inject(pod, &original, &annotations) {
            Ok(patch) => Admission::Mutated(patch),
            Err(e) => {
                warn!(uid = %uid, error = %e, "Rejecting pod");
                Admission::bad_request(e)
            }
        }
    }

    /// Resolve the config, apply any image override and build the patch
    fn inject(
        &self,
        mut pod: Pod,
        original: &Value,
        annotations: &BTreeMap<String, String>,
    ) -> Result<Patch> {
        let mut config = SidecarConfig::resolve(&self.defaults, annotations)?;

        let name = PodName(&pod).to_string();
        let spec = pod.spec.get_or_insert_with(Default::default);

        if let Some(image) = image::take_placeholder_image(&mut spec.containers)? {
            config.container_image = image;
        }

        info!(
            pod = %name,
            image = %config.container_image,
            cpu_request = %config.cpu.request,
            cpu_limit = %config.cpu.limit,
            memory_request = %config.memory.request,
            memory_limit = %config.memory.limit,
            ephemeral_storage_request = %config.ephemeral_storage.request,
            ephemeral_storage_limit = %config.ephemeral_storage.limit,
            "Mutating pod"
        );

        // The sidecar must start before the containers consuming its volume
        let mut containers = Vec::with_capacity(spec.containers.len() + 1);
        containers.push(sidecar::container(&config));
        containers.append(&mut spec.containers);
        spec.containers = containers;

        let existing = spec.volumes.take().unwrap_or_default();
        let mut volumes = sidecar::volumes(&existing);
        volumes.extend(existing);
        spec.volumes = Some(volumes);

        let mutated = serde_json::to_value(&pod)?;
        Ok(json_patch::diff(original, &mutated))
    }
}

/// Serialize the request object and read it back as a Pod
fn decode_pod(object: &DynamicObject) -> Result<(Value, Pod)> {
    let original = serde_json::to_value(object)?;
    let pod = serde_json::from_value(original.clone()).map_err(|e| Error::decode(e.to_string()))?;
    Ok((original, pod))
}

/// `namespace/name` of a pod, falling back to its generate name
struct PodName<'a>(&'a Pod);

impl std::fmt::Display for PodName<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = &self.0.metadata;
        let namespace = meta.namespace.as_deref().unwrap_or_default();
        match (&meta.name, &meta.generate_name) {
            (Some(name), _) => write!(f, "{namespace}/{name}"),
            (None, Some(prefix)) => write!(f, "{namespace}/{prefix}*"),
            (None, None) => write!(f, "{namespace}/<unnamed>"),
        }
    }
}
