// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::str::FromStr;

use anyhow::anyhow;
use log::debug;
use serde::Serialize;
use strum::{Display, EnumString};

use super::{check_type, type_field};
use crate::error::{Error, Result};
use crate::image::{image_name, ImageReference};
use crate::reference::{is_domain, is_name_with_domain, DockerReference};
use crate::strict_json::{JsonFormatError, StrictObject};

#[derive(EnumString, Display, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PrmType {
    #[strum(serialize = "matchExact")]
    MatchExact,
    #[strum(serialize = "matchRepoDigestOrExact")]
    MatchRepoDigestOrExact,
    #[strum(serialize = "matchRepository")]
    MatchRepository,
    #[strum(serialize = "exactReference")]
    ExactReference,
    #[strum(serialize = "exactRepository")]
    ExactRepository,
    #[strum(serialize = "remapIdentity")]
    RemapIdentity,
}

// PolicyReferenceMatch specifies a set of image identities accepted in PolicyRequirement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PolicyReferenceMatch {
    /// The signed identity must be exactly the image's own reference.
    MatchExact,

    /// Exact match if the image is referenced by tag, repository match
    /// if it is referenced by digest only.
    MatchRepoDigestOrExact,

    /// Any tag or digest of the image's repository is accepted.
    MatchRepository,

    /// The signed identity must be exactly a fixed reference.
    ExactReference(PrmExactReference),

    /// The signed identity must be in a fixed repository.
    ExactRepository(PrmExactRepository),

    /// Like `MatchRepoDigestOrExact`, after rewriting the image reference
    /// from `prefix` to `signedPrefix`.
    RemapIdentity(PrmRemapIdentity),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrmExactReference {
    docker_reference: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrmExactRepository {
    docker_repository: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrmRemapIdentity {
    prefix: String,
    signed_prefix: String,
}

impl Default for PolicyReferenceMatch {
    fn default() -> Self {
        PolicyReferenceMatch::MatchRepoDigestOrExact
    }
}

impl PolicyReferenceMatch {
    pub fn exact_reference(docker_reference: &str) -> Result<Self> {
        let parsed = DockerReference::parse_normalized(docker_reference).map_err(|e| {
            Error::invalid_policy(format!(
                "Invalid format of dockerReference {docker_reference:?}: {e}"
            ))
        })?;
        if parsed.is_name_only() {
            return Err(Error::invalid_policy(format!(
                "dockerReference {docker_reference:?} contains neither a tag nor digest"
            )));
        }
        Ok(PolicyReferenceMatch::ExactReference(PrmExactReference {
            docker_reference: docker_reference.to_string(),
        }))
    }

    pub fn exact_repository(docker_repository: &str) -> Result<Self> {
        DockerReference::parse_normalized(docker_repository).map_err(|e| {
            Error::invalid_policy(format!(
                "Invalid format of dockerRepository {docker_repository:?}: {e}"
            ))
        })?;
        Ok(PolicyReferenceMatch::ExactRepository(PrmExactRepository {
            docker_repository: docker_repository.to_string(),
        }))
    }

    pub fn remap_identity(prefix: &str, signed_prefix: &str) -> Result<Self> {
        validate_identity_remapping_prefix(prefix)?;
        validate_identity_remapping_prefix(signed_prefix)?;
        Ok(PolicyReferenceMatch::RemapIdentity(PrmRemapIdentity {
            prefix: prefix.to_string(),
            signed_prefix: signed_prefix.to_string(),
        }))
    }

    pub fn prm_type(&self) -> PrmType {
        match self {
            PolicyReferenceMatch::MatchExact => PrmType::MatchExact,
            PolicyReferenceMatch::MatchRepoDigestOrExact => PrmType::MatchRepoDigestOrExact,
            PolicyReferenceMatch::MatchRepository => PrmType::MatchRepository,
            PolicyReferenceMatch::ExactReference(_) => PrmType::ExactReference,
            PolicyReferenceMatch::ExactRepository(_) => PrmType::ExactRepository,
            PolicyReferenceMatch::RemapIdentity(_) => PrmType::RemapIdentity,
        }
    }

    /// Parse a JSON object, dispatching on its `type` member.
    pub(crate) fn from_json(data: &str) -> Result<Self> {
        let t = type_field(data)?;
        let prm_type = PrmType::from_str(&t).map_err(|_| {
            Error::invalid_policy(format!("Unknown policy reference match type {t:?}"))
        })?;
        let policy_err = JsonFormatError::into_policy_error;

        match prm_type {
            PrmType::MatchExact | PrmType::MatchRepoDigestOrExact | PrmType::MatchRepository => {
                let mut fields = StrictObject::parse(data)
                    .and_then(|o| o.exact(&["type"]))
                    .map_err(policy_err)?;
                check_type(&fields.require::<String>("type").map_err(policy_err)?, prm_type)?;
                Ok(match prm_type {
                    PrmType::MatchExact => PolicyReferenceMatch::MatchExact,
                    PrmType::MatchRepository => PolicyReferenceMatch::MatchRepository,
                    _ => PolicyReferenceMatch::MatchRepoDigestOrExact,
                })
            }
            PrmType::ExactReference => {
                let mut fields = StrictObject::parse(data)
                    .and_then(|o| o.exact(&["type", "dockerReference"]))
                    .map_err(policy_err)?;
                check_type(&fields.require::<String>("type").map_err(policy_err)?, prm_type)?;
                let docker_reference: String =
                    fields.require("dockerReference").map_err(policy_err)?;
                Self::exact_reference(&docker_reference)
            }
            PrmType::ExactRepository => {
                let mut fields = StrictObject::parse(data)
                    .and_then(|o| o.exact(&["type", "dockerRepository"]))
                    .map_err(policy_err)?;
                check_type(&fields.require::<String>("type").map_err(policy_err)?, prm_type)?;
                let docker_repository: String =
                    fields.require("dockerRepository").map_err(policy_err)?;
                Self::exact_repository(&docker_repository)
            }
            PrmType::RemapIdentity => {
                let mut fields = StrictObject::parse(data)
                    .and_then(|o| o.exact(&["type", "prefix", "signedPrefix"]))
                    .map_err(policy_err)?;
                check_type(&fields.require::<String>("type").map_err(policy_err)?, prm_type)?;
                let prefix: String = fields.require("prefix").map_err(policy_err)?;
                let signed_prefix: String = fields.require("signedPrefix").map_err(policy_err)?;
                Self::remap_identity(&prefix, &signed_prefix)
            }
        }
    }

    /// Whether `signature_docker_reference`, as claimed by a signature, is an
    /// acceptable identity for `image`.
    pub fn matches_docker_reference(
        &self,
        image: &dyn ImageReference,
        signature_docker_reference: &str,
    ) -> bool {
        match self {
            PolicyReferenceMatch::MatchExact => {
                let Some((intended, signature)) =
                    parse_image_and_docker_reference(image, signature_docker_reference)
                else {
                    return false;
                };
                // No default tags are added on either side: both must be exact.
                !intended.is_name_only() && !signature.is_name_only() && signature == *intended
            }
            PolicyReferenceMatch::MatchRepoDigestOrExact => {
                parse_image_and_docker_reference(image, signature_docker_reference)
                    .map(|(intended, signature)| match_repo_digest_or_exact(intended, &signature))
                    .unwrap_or(false)
            }
            PolicyReferenceMatch::MatchRepository => {
                parse_image_and_docker_reference(image, signature_docker_reference)
                    .map(|(intended, signature)| signature.name() == intended.name())
                    .unwrap_or(false)
            }
            PolicyReferenceMatch::ExactReference(prm) => {
                let Some((intended, signature)) =
                    parse_docker_references(&prm.docker_reference, signature_docker_reference)
                else {
                    return false;
                };
                !intended.is_name_only() && !signature.is_name_only() && signature == intended
            }
            PolicyReferenceMatch::ExactRepository(prm) => {
                parse_docker_references(&prm.docker_repository, signature_docker_reference)
                    .map(|(intended, signature)| signature.name() == intended.name())
                    .unwrap_or(false)
            }
            PolicyReferenceMatch::RemapIdentity(prm) => {
                let Some((intended, signature)) =
                    parse_image_and_docker_reference(image, signature_docker_reference)
                else {
                    return false;
                };
                match prm.remap_reference_prefix(intended) {
                    Ok(remapped) => match_repo_digest_or_exact(&remapped, &signature),
                    Err(e) => {
                        debug!("{e}");
                        false
                    }
                }
            }
        }
    }
}

impl PrmExactReference {
    pub fn docker_reference(&self) -> &str {
        &self.docker_reference
    }
}

impl PrmExactRepository {
    pub fn docker_repository(&self) -> &str {
        &self.docker_repository
    }
}

impl PrmRemapIdentity {
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn signed_prefix(&self) -> &str {
        &self.signed_prefix
    }

    // Only `reference.name()` is compared, so the only separator that may
    // follow the prefix is '/'. A `host:port` domain must match exactly.
    fn ref_matches_prefix(&self, reference: &DockerReference) -> bool {
        match reference.name().strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// Rewrite `reference` if it is within `prefix`, otherwise return it as is.
    pub fn remap_reference_prefix(
        &self,
        reference: &DockerReference,
    ) -> anyhow::Result<DockerReference> {
        if !self.ref_matches_prefix(reference) {
            return Ok(reference.clone());
        }
        let ref_string = reference.to_string();
        let new_ref = ref_string.replacen(&self.prefix, &self.signed_prefix, 1);
        DockerReference::parse_named(&new_ref).map_err(|e| {
            anyhow!("error rewriting reference from {ref_string:?} to {new_ref:?}: {e}")
        })
    }
}

// A prefix is either a bare domain, or a repository name starting with an
// explicit domain. Short names are not detected here; they simply never match.
fn validate_identity_remapping_prefix(s: &str) -> Result<()> {
    if is_domain(s) || is_name_with_domain(s) {
        return Ok(());
    }
    Err(Error::invalid_policy(format!("prefix {s:?} is not valid")))
}

fn parse_image_and_docker_reference<'a>(
    image: &'a dyn ImageReference,
    signature_docker_reference: &str,
) -> Option<(&'a DockerReference, DockerReference)> {
    let Some(intended) = image.docker_reference() else {
        debug!(
            "Docker reference match attempted on image {} with no known Docker reference identity",
            image_name(image)
        );
        return None;
    };
    let signature = DockerReference::parse_normalized(signature_docker_reference).ok()?;
    Some((intended, signature))
}

fn parse_docker_references(s1: &str, s2: &str) -> Option<(DockerReference, DockerReference)> {
    let r1 = DockerReference::parse_normalized(s1).ok()?;
    let r2 = DockerReference::parse_normalized(s2).ok()?;
    Some((r1, r2))
}

fn match_repo_digest_or_exact(intended: &DockerReference, signature: &DockerReference) -> bool {
    if signature.is_name_only() {
        return false;
    }
    if intended.tag().is_some() {
        // Also covers an intended reference with both a tag and a digest.
        return signature == intended;
    }
    if intended.digest().is_some() {
        // The digest itself is checked against the manifest separately.
        return signature.name() == intended.name();
    }
    false
}
