// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::Result;

use super::ImageReference;
use crate::reference::DockerReference;

pub const DOCKER_TRANSPORT: &str = "docker";

/// An image in a docker registry, e.g. `docker://quay.io/ns/image:tag`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DockerImageReference {
    reference: DockerReference,
}

impl DockerImageReference {
    /// Name-only references get the default tag, matching how the image
    /// would be pulled.
    pub fn new(reference: DockerReference) -> Self {
        DockerImageReference {
            reference: reference.with_default_tag(),
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        Ok(Self::new(DockerReference::parse_normalized(s)?))
    }
}

impl TryFrom<&str> for DockerImageReference {
    type Error = anyhow::Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl ImageReference for DockerImageReference {
    fn transport_name(&self) -> &str {
        DOCKER_TRANSPORT
    }

    fn string_within_transport(&self) -> String {
        format!("//{}", self.reference)
    }

    fn policy_configuration_identity(&self) -> String {
        self.reference.to_string()
    }

    fn policy_configuration_namespaces(&self) -> Vec<String> {
        get_image_namespaces(&self.reference)
    }

    fn docker_reference(&self) -> Option<&DockerReference> {
        Some(&self.reference)
    }
}

// Returns a list of other policy configuration namespaces to search.
pub fn get_image_namespaces(image_ref: &DockerReference) -> Vec<String> {
    // Look for a match of the repository, and then of the possible parent
    // namespaces. Note that this only happens on the expanded host names
    // and repository names, i.e. "busybox" is looked up as "docker.io/library/busybox",
    // then in its parent "docker.io/library"; in none of "busybox",
    // un-namespaced "library" nor in "" supposedly implicitly representing "library/".
    //
    // image_full_name == host_name + "/" + repository_name, so the last
    // iteration matches the host name (for any namespace).
    let mut res = Vec::new();
    let mut name = image_ref.name();

    loop {
        res.push(name.clone());
        match name.rsplit_once('/') {
            None => break,
            Some((parent, _)) => name = parent.to_string(),
        }
    }

    // Strip port number if any, before appending to res slice.
    // Currently, the most compatible behavior is to return
    // example.com:8443/ns, example.com:8443, *.com.
    // If a port number is not specified, the expected behavior would be
    // example.com/ns, example.com, *.com
    if let Some((host, _)) = name.rsplit_once(':') {
        name = host.to_string();
    }

    // Append wildcarded domains to res slice
    while let Some((_, rest)) = name.split_once('.') {
        name = rest.to_string();
        res.push(format!("*.{name}"));
    }

    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(
        "docker.io/opensuse/leap:15.3",
        &["docker.io/opensuse/leap", "docker.io/opensuse", "docker.io", "*.io"],
    )]
    #[case(
        "test:5000/library/busybox:latest",
        &["test:5000/library/busybox", "test:5000/library", "test:5000"],
    )]
    #[case(
        "test:5000/library/busybox@sha256:ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        &["test:5000/library/busybox", "test:5000/library", "test:5000"],
    )]
    #[case(
        "registry.access.redhat.com/busybox:latest",
        &[
            "registry.access.redhat.com/busybox",
            "registry.access.redhat.com",
            "*.access.redhat.com",
            "*.redhat.com",
            "*.com",
        ],
    )]
    fn test_get_image_namespaces(#[case] reference: &str, #[case] namespaces: &[&str]) {
        let image_ref = DockerImageReference::parse(reference).unwrap();
        assert_eq!(image_ref.policy_configuration_namespaces(), namespaces);
    }

    #[test]
    fn test_docker_image_reference() {
        let image_ref = DockerImageReference::parse("busybox").unwrap();
        assert_eq!(image_ref.transport_name(), "docker");
        assert_eq!(
            image_ref.policy_configuration_identity(),
            "docker.io/library/busybox:latest"
        );
        assert_eq!(
            image_ref.string_within_transport(),
            "//docker.io/library/busybox:latest"
        );
        assert_eq!(
            super::super::image_name(&image_ref),
            "docker://docker.io/library/busybox:latest"
        );
    }
}
