//! Image references and the placeholder image override
//!
//! Pod authors can pin the sidecar image by declaring a container named
//! [`SIDECAR_CONTAINER_NAME`] with only an image set. The injector takes that
//! image for the real sidecar and drops the placeholder before injecting.
//!
//! References are checked against the container registry grammar:
//! `[host[:port]/]path[/path...][:tag][@algorithm:hex]`. Digests must use a
//! known algorithm with an encoded part of exactly that algorithm's length.

use k8s_openapi::api::core::v1::Container;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{Error, Result, SIDECAR_CONTAINER_NAME};

/// Longest repository name accepted by registries
pub const MAX_NAME_LEN: usize = 255;

static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    let path_component = r"[a-z0-9]+(?:(?:[._]|__|[-]+)[a-z0-9]+)*";
    let domain_component = r"(?:[a-zA-Z0-9]|[a-zA-Z0-9][a-zA-Z0-9-]*[a-zA-Z0-9])";
    let host = format!(r"(?:{domain_component}(?:\.{domain_component})*|\[[a-fA-F0-9:]+\])");
    let tag = r"[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}";
    let digest = r"[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*:[0-9a-fA-F]{32,}";

    Regex::new(&format!(
        r"^(?P<name>(?:{host}(?::[0-9]+)?/)?{path_component}(?:/{path_component})*)(?::(?P<tag>{tag}))?(?:@(?P<digest>{digest}))?$"
    ))
    .expect("reference grammar is a valid regex")
});

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-f0-9]{64}$").expect("identifier grammar is a valid regex"));

/// Digest algorithms a registry will resolve, with their hex length
const DIGEST_ALGORITHMS: [(&str, usize); 3] = [("sha256", 64), ("sha384", 96), ("sha512", 128)];

/// A parsed image reference
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    /// Repository, including the registry host when one was given
    pub name: String,
    /// Tag, if any
    pub tag: Option<String>,
    /// Content digest, if any
    pub digest: Option<String>,
}

/// Parse an image reference
pub fn parse_reference(reference: &str) -> Result<ImageReference> {
    if reference.is_empty() {
        return Err(Error::invalid_image(reference, "empty image reference"));
    }
    if IDENTIFIER_RE.is_match(reference) {
        return Err(Error::invalid_image(
            reference,
            "cannot specify 64-byte hexadecimal strings",
        ));
    }

    let remote = remote_name(reference);
    if remote.to_lowercase() != remote {
        return Err(Error::invalid_image(
            reference,
            format!("repository name {remote:?} must be lowercase"),
        ));
    }

    let captures = REFERENCE_RE
        .captures(reference)
        .ok_or_else(|| Error::invalid_image(reference, "invalid reference format"))?;

    let name = captures
        .name("name")
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid_image(
            reference,
            format!("repository name must not be more than {MAX_NAME_LEN} characters"),
        ));
    }

    let digest = captures.name("digest").map(|m| m.as_str());
    if let Some(digest) = digest {
        validate_digest(digest).map_err(|reason| Error::invalid_image(reference, reason))?;
    }

    Ok(ImageReference {
        name,
        tag: captures.name("tag").map(|m| m.as_str().to_string()),
        digest: digest.map(str::to_string),
    })
}

/// Check a syntactically valid `algorithm:hex` digest against the known algorithms
fn validate_digest(digest: &str) -> std::result::Result<(), String> {
    let (algorithm, encoded) = digest
        .split_once(':')
        .ok_or_else(|| "invalid checksum digest format".to_string())?;

    let Some((_, len)) = DIGEST_ALGORITHMS.iter().find(|(name, _)| *name == algorithm) else {
        return Err(format!("unsupported digest algorithm {algorithm:?}"));
    };
    if encoded.len() != *len {
        return Err(format!("invalid checksum digest length for {algorithm}"));
    }
    if !encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return Err("invalid checksum digest format".to_string());
    }
    Ok(())
}

/// Check that a string is a valid image reference
pub fn validate_reference(reference: &str) -> Result<()> {
    parse_reference(reference).map(|_| ())
}

/// Repository path after the registry host, without tag or digest
fn remote_name(reference: &str) -> &str {
    let remainder = match reference.split_once('/') {
        Some((first, rest)) if is_registry_host(first) => rest,
        _ => reference,
    };
    let end = remainder.find([':', '@']).unwrap_or(remainder.len());
    &remainder[..end]
}

/// Whether the first path segment names a registry rather than a repository
fn is_registry_host(segment: &str) -> bool {
    segment.contains(['.', ':'])
        || segment == "localhost"
        || segment.chars().any(|c| c.is_ascii_uppercase())
}

/// Take the image override out of a container list
///
/// Returns `Ok(None)` and leaves the list alone when no placeholder exists.
/// With exactly one placeholder, its image is validated, the container is
/// removed (other containers keep their order) and the image is returned.
/// Several placeholders, or an invalid image, fail without touching the list.
pub fn take_placeholder_image(containers: &mut Vec<Container>) -> Result<Option<String>> {
    let matches: Vec<usize> = containers
        .iter()
        .enumerate()
        .filter(|(_, c)| c.name == SIDECAR_CONTAINER_NAME)
        .map(|(i, _)| i)
        .collect();

    match matches.as_slice() {
        [] => Ok(None),
        [index] => {
            let image = containers[*index].image.clone().unwrap_or_default();
            validate_reference(&image)?;
            containers.remove(*index);
            Ok(Some(image))
        }
        many => Err(Error::DuplicatePlaceholder(many.len())),
    }
}
