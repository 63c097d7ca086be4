// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use log::debug;

use super::{
    summarize_rejections, validate_signed_manifest_digest, validate_signed_reference,
    AuthorDecision,
};
use crate::context::TrustBackends;
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::image::attachment::{
    SIGSTORE_CERTIFICATE_ANNOTATION_KEY, SIGSTORE_INTERMEDIATE_CERTIFICATE_CHAIN_ANNOTATION_KEY,
    SIGSTORE_SET_ANNOTATION_KEY, SIGSTORE_SIGNATURE_ANNOTATION_KEY, SIGSTORE_SIGNATURE_MIME_TYPE,
};
use crate::image::{SignatureAttachment, SigstoreAttachment, UnparsedImage};
use crate::mechanism::{PublicKeyPem, SigstoreVerifier};
use crate::payload::sigstore::verify_sigstore_payload;
use crate::payload::PayloadAcceptanceRules;
use crate::policy::{PrSigstoreSigned, SigstoreTrustRoot};

fn required_annotation<'a>(attachment: &'a SigstoreAttachment, key: &str) -> Result<&'a str> {
    attachment
        .untrusted_annotations()
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| Error::invalid_signature(format!("missing {key} annotation")))
}

// Returns the first key the Rekor SET was recorded for. A SET covers a
// single key, so the remaining keys cannot match it.
fn key_recorded_in_rekor(
    verifier: &dyn SigstoreVerifier,
    public_keys: &[PublicKeyPem],
    rekor_public_keys: &[PublicKeyPem],
    attachment: &SigstoreAttachment,
    base64_signature: &str,
) -> Result<PublicKeyPem> {
    let set = required_annotation(attachment, SIGSTORE_SET_ANNOTATION_KEY)?;
    let mut failures = Vec::new();
    for candidate in public_keys {
        match verifier.verify_rekor_set(
            rekor_public_keys,
            set.as_bytes(),
            candidate,
            base64_signature,
            attachment.untrusted_payload(),
        ) {
            Ok(()) => return Ok(candidate.clone()),
            Err(e) => failures.push(e.to_string()),
        }
    }

    if failures.is_empty() {
        return Err(Error::internal(
            "Internal inconsistency: Rekor SET did not match any key but we have no failures.",
        ));
    }
    Err(Error::invalid_signature(format!(
        "No public key verified against the RekorSET: {}",
        failures.join(", ")
    )))
}

impl PrSigstoreSigned {
    /// Sigstore signatures are never embedded with an image, so there is
    /// nothing to decide here.
    pub(crate) fn is_signature_author_accepted(&self) -> AuthorDecision {
        AuthorDecision::rejected(Error::policy_requirement(
            "isSignatureAuthorAccepted is not implemented for sigstore",
        ))
    }

    /// Verify one sigstore signature attachment of `image`.
    pub(crate) fn is_signature_accepted(
        &self,
        verifier: &dyn SigstoreVerifier,
        image: &dyn UnparsedImage,
        attachment: &SigstoreAttachment,
    ) -> Result<()> {
        // Keys are read from the policy for every signature, so a policy
        // file update applies without rebuilding the context.
        let trust_root = self.prepare_trust_root()?;

        let base64_signature = required_annotation(attachment, SIGSTORE_SIGNATURE_ANNOTATION_KEY)?;
        let payload = attachment.untrusted_payload();
        let chain = attachment
            .untrusted_annotations()
            .get(SIGSTORE_INTERMEDIATE_CERTIFICATE_CHAIN_ANNOTATION_KEY)
            .map(String::as_bytes);

        let public_keys = match trust_root {
            SigstoreTrustRoot::PublicKeys {
                public_keys,
                rekor_public_keys: None,
            } => public_keys,
            SigstoreTrustRoot::PublicKeys {
                public_keys,
                rekor_public_keys: Some(rekor_public_keys),
            } => vec![key_recorded_in_rekor(
                verifier,
                &public_keys,
                &rekor_public_keys,
                attachment,
                base64_signature,
            )?],
            SigstoreTrustRoot::Fulcio {
                fulcio,
                rekor_public_keys,
            } => {
                let set = required_annotation(attachment, SIGSTORE_SET_ANNOTATION_KEY)?;
                let certificate =
                    required_annotation(attachment, SIGSTORE_CERTIFICATE_ANNOTATION_KEY)?;
                let key = verifier
                    .verify_fulcio(
                        &rekor_public_keys,
                        &fulcio,
                        set.as_bytes(),
                        certificate.as_bytes(),
                        chain,
                        base64_signature,
                        payload,
                    )
                    .map_err(Error::Mechanism)?;
                vec![key]
            }
            SigstoreTrustRoot::Pki(pki) => {
                let certificate =
                    required_annotation(attachment, SIGSTORE_CERTIFICATE_ANNOTATION_KEY)?;
                let key = verifier
                    .verify_pki(&pki, certificate.as_bytes(), chain)
                    .map_err(Error::Mechanism)?;
                vec![key]
            }
        };

        if public_keys.is_empty() {
            return Err(Error::internal(
                "Internal inconsistency: publicKey not set before verifying sigstore payload",
            ));
        }

        let validate_reference =
            |signed: &str| validate_signed_reference(self.signed_identity(), image, signed);
        let validate_digest = |signed: &Digest| validate_signed_manifest_digest(image, signed);
        let rules = PayloadAcceptanceRules {
            validate_signed_docker_reference: &validate_reference,
            validate_signed_docker_manifest_digest: &validate_digest,
        };
        verify_sigstore_payload(verifier, &public_keys, payload, base64_signature, &rules)?;
        Ok(())
    }

    pub(crate) fn is_running_image_allowed(
        &self,
        backends: &TrustBackends,
        image: &dyn UnparsedImage,
    ) -> Result<bool> {
        let attachments = image.untrusted_signatures().map_err(Error::Image)?;

        let mut rejections = Vec::new();
        let mut non_sigstore_signatures = 0;
        let mut non_signature_attachments = 0;
        for (index, attachment) in attachments.iter().enumerate() {
            let SignatureAttachment::Sigstore(attachment) = attachment else {
                non_sigstore_signatures += 1;
                continue;
            };
            if attachment.untrusted_mime_type() != SIGSTORE_SIGNATURE_MIME_TYPE {
                non_signature_attachments += 1;
                continue;
            }

            let result = match backends.sigstore.as_ref() {
                Some(verifier) => self.is_signature_accepted(verifier.as_ref(), image, attachment),
                None => Err(Error::policy_requirement(
                    "sigstoreSigned requires a sigstore verification backend, but none is configured",
                )),
            };
            match result {
                Ok(()) => {
                    debug!("sigstoreSigned: signature {index} accepted");
                    return Ok(true);
                }
                Err(e) => {
                    debug!("sigstoreSigned: signature {index} rejected: {e}");
                    rejections.push(e);
                }
            }
        }

        let no_signatures = if non_sigstore_signatures == 0 && non_signature_attachments == 0 {
            Error::policy_requirement("A signature was required, but no signature exists")
        } else {
            Error::policy_requirement(format!(
                "A signature was required, but no signature exists ({non_sigstore_signatures} non-sigstore signatures, {non_signature_attachments} sigstore non-signature attachments)"
            ))
        };
        Err(summarize_rejections(rejections, no_signatures))
    }
}
