// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Normalized docker references.
//!
//! Parsing and normalization (implicit `docker.io` and `library/`) are
//! delegated to [`oci_client::Reference`]. On top of that we remember
//! whether a tag or a digest was actually written, because a reference
//! without either (a "name-only" reference) must never be treated as
//! if it carried the default tag when matching signatures.

use std::fmt;

use anyhow::{anyhow, bail, Result};
use oci_client::Reference;

use crate::digest::Digest;

pub const DEFAULT_TAG: &str = "latest";

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DockerReference {
    domain: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl DockerReference {
    /// Parse a possibly abbreviated reference, e.g. `busybox` becomes
    /// `docker.io/library/busybox`.
    pub fn parse_normalized(s: &str) -> Result<Self> {
        let (name_part, has_digest) = match s.split_once('@') {
            Some((name, _)) => (name, true),
            None => (s, false),
        };
        let last_component = name_part.rsplit('/').next().unwrap_or(name_part);
        let has_tag = last_component.contains(':');

        let reference = Reference::try_from(s)
            .map_err(|e| anyhow!("invalid docker reference {s:?}: {e}"))?;

        let tag = match (has_tag, reference.tag()) {
            (true, Some(tag)) => Some(tag.to_string()),
            (true, None) => bail!("invalid docker reference {s:?}: tag lost while parsing"),
            (false, _) => None,
        };
        let digest = match (has_digest, reference.digest()) {
            (true, Some(digest)) => {
                digest
                    .parse::<Digest>()
                    .map_err(|e| anyhow!("invalid docker reference {s:?}: {e}"))?;
                Some(digest.to_string())
            }
            (true, None) => bail!("invalid docker reference {s:?}: digest lost while parsing"),
            (false, _) => None,
        };

        Ok(DockerReference {
            domain: reference.registry().to_string(),
            repository: reference.repository().to_string(),
            tag,
            digest,
        })
    }

    /// Parse a reference which must already be in its canonical,
    /// fully-qualified form.
    pub fn parse_named(s: &str) -> Result<Self> {
        let reference = Self::parse_normalized(s)?;
        if reference.to_string() != s {
            bail!("repository name must be canonical: {s:?}");
        }
        Ok(reference)
    }

    /// `domain/repository`, without tag or digest.
    pub fn name(&self) -> String {
        if self.domain.is_empty() {
            self.repository.clone()
        } else {
            format!("{}/{}", self.domain, self.repository)
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    pub fn is_name_only(&self) -> bool {
        self.tag.is_none() && self.digest.is_none()
    }

    /// Add the default tag to a name-only reference.
    pub fn with_default_tag(mut self) -> Self {
        if self.is_name_only() {
            self.tag = Some(DEFAULT_TAG.to_string());
        }
        self
    }
}

impl fmt::Display for DockerReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(tag) = &self.tag {
            write!(f, ":{tag}")?;
        }
        if let Some(digest) = &self.digest {
            write!(f, "@{digest}")?;
        }
        Ok(())
    }
}

/// Whether `s` is a bare registry domain, optionally with a port.
pub fn is_domain(s: &str) -> bool {
    if s.is_empty() || s.contains('/') {
        return false;
    }
    let host = match s.rsplit_once(':') {
        Some((host, port)) => {
            if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            host
        }
        None => s,
    };
    !host.is_empty()
        && host.split('.').all(|label| {
            !label.is_empty()
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                && !label.starts_with('-')
                && !label.ends_with('-')
        })
}

/// Whether `s` is a repository name (no tag or digest) whose first
/// component is an explicit domain.
pub fn is_name_with_domain(s: &str) -> bool {
    let Some((domain, _)) = s.split_once('/') else {
        return false;
    };
    if !is_domain(domain) || s.contains('@') {
        return false;
    }
    match DockerReference::parse_normalized(s) {
        Ok(r) => r.is_name_only() && r.domain() == domain && r.name() == s,
        Err(_) => false,
    }
}
