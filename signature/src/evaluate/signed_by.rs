// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::fs;

use log::{debug, warn};

use super::{
    summarize_rejections, unexpected_result, validate_signed_manifest_digest,
    validate_signed_reference, AuthorDecision, SignatureAcceptanceResult,
};
use crate::context::TrustBackends;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::image::UnparsedImage;
use crate::payload::simple_signing::{verify_and_extract_signature, SignatureAcceptanceRules};
use crate::payload::PayloadAcceptanceRules;
use crate::policy::{KeyType, PrSignedBy, SignedByKeySource};

impl PrSignedBy {
    fn trusted_key_blobs(&self) -> Result<Vec<Vec<u8>>> {
        match self.key_source() {
            SignedByKeySource::KeyPath(path) => {
                Ok(vec![fs::read(path).map_err(|e| Error::read_file(path, e))?])
            }
            SignedByKeySource::KeyPaths(paths) => paths
                .iter()
                .map(|path| fs::read(path).map_err(|e| Error::read_file(path, e)))
                .collect(),
            SignedByKeySource::KeyData(data) => Ok(vec![data.clone()]),
        }
    }

    fn verify_signature(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
        signature: &[u8],
    ) -> Result<crate::payload::Signature> {
        match self.key_type() {
            KeyType::GpgKeys => {}
            key_type @ (KeyType::SignedByGpgKeys
            | KeyType::X509Certificates
            | KeyType::SignedByX509Cas) => {
                return Err(Error::policy_requirement(format!(
                    "Unimplemented \"keyType\" value {:?}",
                    key_type.to_string()
                )))
            }
        }

        let Some(factory) = backends.gpg.as_ref() else {
            return Err(Error::policy_requirement(
                "signedBy requires a GPG verification backend, but none is configured",
            ));
        };

        let key_blobs = self.trusted_key_blobs()?;
        let (mut mech, trusted_identities) =
            factory.new_ephemeral(&key_blobs).map_err(Error::Mechanism)?;

        let result = if trusted_identities.is_empty() {
            Err(Error::policy_requirement("No public keys imported"))
        } else {
            let validate_reference =
                |signed: &str| validate_signed_reference(self.signed_identity(), image, signed);
            let validate_digest =
                |signed: &Digest| validate_signed_manifest_digest(image, signed);
            let rules = SignatureAcceptanceRules {
                accepted_key_identities: &trusted_identities,
                payload: PayloadAcceptanceRules {
                    validate_signed_docker_reference: &validate_reference,
                    validate_signed_docker_manifest_digest: &validate_digest,
                },
            };
            verify_and_extract_signature(mech.as_ref(), signature, &rules)
                .map(|(signature, _)| signature)
        };

        if let Err(e) = mech.close() {
            warn!("Closing ephemeral signing mechanism failed: {e:#}");
        }
        result
    }

    pub(crate) fn is_signature_author_accepted(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
        signature: &[u8],
    ) -> AuthorDecision {
        match self.verify_signature(backends, image, signature) {
            Ok(signature) => AuthorDecision::accepted(signature),
            Err(e) => AuthorDecision::rejected(e),
        }
    }

    pub(crate) fn is_running_image_allowed(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
    ) -> Result<bool> {
        let signatures = image.signatures().map_err(Error::Image)?;
        let mut rejections = Vec::new();
        for (index, signature) in signatures.iter().enumerate() {
            let decision = self.is_signature_author_accepted(backends, image, signature);
            let reason = match decision.result {
                SignatureAcceptanceResult::Accepted => {
                    debug!("signedBy: signature {index} accepted");
                    return Ok(true);
                }
                SignatureAcceptanceResult::Rejected => decision.error.unwrap_or_else(|| {
                    Error::internal("Internal error: signature rejected without a reason")
                }),
                SignatureAcceptanceResult::Unknown => unexpected_result(decision.result),
            };
            debug!("signedBy: signature {index} rejected: {reason}");
            rejections.push(reason);
        }

        Err(summarize_rejections(
            rejections,
            Error::policy_requirement("A signature was required, but no signature exists"),
        ))
    }
}
