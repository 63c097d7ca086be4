// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Evaluation of single policy requirements against an image.

use log::error;
use strum::Display;

use crate::context::TrustBackends;
use crate::digest::{manifest_matches_digest, Digest};
use crate::error::{Error, Result};
use crate::image::{image_name, UnparsedImage};
use crate::payload::Signature;
use crate::policy::{PolicyReferenceMatch, PolicyRequirement};

mod signed_by;
mod sigstore;

/// What a requirement concludes about the author of one signature.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SignatureAcceptanceResult {
    #[strum(to_string = "signatureAccepted")]
    Accepted,
    #[strum(to_string = "signatureRejected")]
    Rejected,
    #[strum(to_string = "signatureUnknown")]
    Unknown,
}

/// The outcome of checking a signature author: on `Accepted` the parsed
/// signature, on `Rejected` the reason.
#[derive(Debug)]
pub(crate) struct AuthorDecision {
    pub result: SignatureAcceptanceResult,
    pub signature: Option<Signature>,
    pub error: Option<Error>,
}

impl AuthorDecision {
    pub fn accepted(signature: Signature) -> Self {
        AuthorDecision {
            result: SignatureAcceptanceResult::Accepted,
            signature: Some(signature),
            error: None,
        }
    }

    pub fn rejected(error: Error) -> Self {
        AuthorDecision {
            result: SignatureAcceptanceResult::Rejected,
            signature: None,
            error: Some(error),
        }
    }

    pub fn unknown() -> Self {
        AuthorDecision {
            result: SignatureAcceptanceResult::Unknown,
            signature: None,
            error: None,
        }
    }
}

impl PolicyRequirement {
    /// Whether the author of `signature` is trusted to sign `image`.
    ///
    /// The signature is expected to be embedded with the image. The answer
    /// may be "don't know", which callers must not treat as acceptance.
    pub(crate) fn is_signature_author_accepted(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
        signature: &[u8],
    ) -> AuthorDecision {
        match self {
            PolicyRequirement::InsecureAcceptAnything => AuthorDecision::unknown(),
            PolicyRequirement::Reject => AuthorDecision::rejected(Error::policy_requirement(
                format!(
                    "Any signatures for image {} are rejected by policy.",
                    image_name(image.reference())
                ),
            )),
            PolicyRequirement::SignedBy(pr) => {
                pr.is_signature_author_accepted(backends, image, signature)
            }
            PolicyRequirement::SignedBaseLayer(_) => AuthorDecision::unknown(),
            PolicyRequirement::SigstoreSigned(pr) => pr.is_signature_author_accepted(),
        }
    }

    /// Whether `image` may run as far as this requirement is concerned.
    ///
    /// Never returns `Ok(false)`: a denial always carries its reason.
    pub(crate) fn is_running_image_allowed(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
    ) -> Result<bool> {
        match self {
            PolicyRequirement::InsecureAcceptAnything => Ok(true),
            PolicyRequirement::Reject => Err(Error::policy_requirement(format!(
                "Running image {} is rejected by policy.",
                image_name(image.reference())
            ))),
            PolicyRequirement::SignedBy(pr) => pr.is_running_image_allowed(backends, image),
            PolicyRequirement::SignedBaseLayer(_) => {
                error!("signedBaseLayer not implemented yet!");
                Err(Error::policy_requirement(
                    "signedBaseLayer not implemented yet!",
                ))
            }
            PolicyRequirement::SigstoreSigned(pr) => pr.is_running_image_allowed(backends, image),
        }
    }
}

/// Rejects a signed identity the requirement's `signedIdentity` does not
/// accept for `image`.
pub(crate) fn validate_signed_reference(
    signed_identity: &PolicyReferenceMatch,
    image: &dyn UnparsedImage,
    signed_reference: &str,
) -> Result<()> {
    if !signed_identity.matches_docker_reference(image.reference(), signed_reference) {
        return Err(Error::policy_requirement(format!(
            "Signature for identity {signed_reference:?} is not accepted"
        )));
    }
    Ok(())
}

/// Rejects a signed digest which is not the digest of the manifest of
/// `image`. The claim is checked against the manifest bytes, never trusted.
pub(crate) fn validate_signed_manifest_digest(
    image: &dyn UnparsedImage,
    signed_digest: &Digest,
) -> Result<()> {
    let (manifest, _) = image.manifest().map_err(Error::Image)?;
    if !manifest_matches_digest(&manifest, signed_digest) {
        return Err(Error::policy_requirement(format!(
            "Signature for digest {signed_digest} does not match"
        )));
    }
    Ok(())
}

/// Folds the reasons every candidate signature was rejected into one error.
/// `no_signatures` is used when there was nothing to reject.
pub(crate) fn summarize_rejections(rejections: Vec<Error>, no_signatures: Error) -> Error {
    match rejections.len() {
        0 => no_signatures,
        1 => rejections
            .into_iter()
            .next()
            .unwrap_or(no_signatures),
        _ => {
            let reasons = rejections
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Error::policy_requirement(format!(
                "None of the signatures were accepted, reasons: {reasons}"
            ))
        }
    }
}

pub(crate) fn unexpected_result(result: SignatureAcceptanceResult) -> Error {
    Error::internal(format!(
        "Internal error: Unexpected signature verification result {:?}",
        result.to_string()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::manifest_digest;
    use crate::image::{DockerImageReference, Image};
    use crate::policy::PrSignedBaseLayer;
    use rstest::rstest;

    const MANIFEST: &[u8] = br#"{"schemaVersion": 2}"#;

    fn image() -> Image {
        let reference = DockerImageReference::parse("quay.io/ns/app:v1").unwrap();
        Image::new(reference, MANIFEST.to_vec()).with_signature(b"sig".to_vec())
    }

    fn base_layer() -> PolicyRequirement {
        PolicyRequirement::SignedBaseLayer(PrSignedBaseLayer::new(PolicyReferenceMatch::MatchRepository))
    }

    #[rstest]
    #[case(PolicyRequirement::InsecureAcceptAnything, SignatureAcceptanceResult::Unknown)]
    #[case(PolicyRequirement::Reject, SignatureAcceptanceResult::Rejected)]
    #[case(base_layer(), SignatureAcceptanceResult::Unknown)]
    fn test_simple_requirements_author(
        #[case] requirement: PolicyRequirement,
        #[case] expected: SignatureAcceptanceResult,
    ) {
        let decision =
            requirement.is_signature_author_accepted(&TrustBackends::default(), &image(), b"sig");
        assert_eq!(decision.result, expected);
        assert!(decision.signature.is_none());
        assert_eq!(decision.error.is_some(), expected == SignatureAcceptanceResult::Rejected);
    }

    #[test]
    fn test_reject_messages() {
        let backends = TrustBackends::default();
        let decision = PolicyRequirement::Reject.is_signature_author_accepted(&backends, &image(), b"");
        assert_eq!(
            decision.error.unwrap().to_string(),
            "Any signatures for image docker://quay.io/ns/app:v1 are rejected by policy."
        );

        let err = PolicyRequirement::Reject
            .is_running_image_allowed(&backends, &image())
            .unwrap_err();
        assert!(matches!(err, Error::PolicyRequirement(_)));
        assert_eq!(
            err.to_string(),
            "Running image docker://quay.io/ns/app:v1 is rejected by policy."
        );
    }

    #[test]
    fn test_running_image_simple_requirements() {
        let backends = TrustBackends::default();
        assert!(PolicyRequirement::InsecureAcceptAnything
            .is_running_image_allowed(&backends, &image())
            .unwrap());

        let err = base_layer()
            .is_running_image_allowed(&backends, &image())
            .unwrap_err();
        assert_eq!(err.to_string(), "signedBaseLayer not implemented yet!");
    }

    #[test]
    fn test_validate_signed_manifest_digest() {
        let image = image();
        assert!(validate_signed_manifest_digest(&image, &manifest_digest(MANIFEST)).is_ok());

        let other = manifest_digest(b"other");
        let err = validate_signed_manifest_digest(&image, &other).unwrap_err();
        assert_eq!(
            err.to_string(),
            format!("Signature for digest {other} does not match")
        );
    }

    #[test]
    fn test_validate_signed_reference() {
        let image = image();
        let identity = PolicyReferenceMatch::MatchRepository;
        assert!(validate_signed_reference(&identity, &image, "quay.io/ns/app:other").is_ok());
        let err = validate_signed_reference(&identity, &image, "quay.io/ns/other:v1").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Signature for identity \"quay.io/ns/other:v1\" is not accepted"
        );
    }

    #[test]
    fn test_summarize_rejections() {
        let none = || Error::policy_requirement("none");
        assert_eq!(summarize_rejections(vec![], none()).to_string(), "none");
        assert_eq!(
            summarize_rejections(vec![Error::policy_requirement("a")], none()).to_string(),
            "a"
        );
        assert_eq!(
            summarize_rejections(
                vec![Error::policy_requirement("a"), Error::invalid_signature("b")],
                none()
            )
            .to_string(),
            "None of the signatures were accepted, reasons: a; invalid signature: b"
        );
    }
}
