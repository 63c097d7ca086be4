// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Payload format of sigstore (cosign) signatures

use base64::Engine;

use super::{PayloadAcceptanceRules, PayloadFields};
use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::mechanism::{PublicKeyPem, SigstoreVerifier};

/// `critical.type` of sigstore payloads.
pub const SIGSTORE_SIGNATURE_TYPE: &str = "cosign container image signature";

/// A sigstore payload before its signature has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntrustedSigstorePayload {
    fields: PayloadFields,
}

impl UntrustedSigstorePayload {
    pub fn new(docker_manifest_digest: Digest, docker_reference: impl Into<String>) -> Self {
        UntrustedSigstorePayload {
            fields: PayloadFields {
                docker_manifest_digest,
                docker_reference: docker_reference.into(),
                creator_id: Some(format!("containers/image {}", env!("CARGO_PKG_VERSION"))),
                timestamp: Some(chrono::Utc::now().timestamp()),
            },
        }
    }

    pub fn docker_manifest_digest(&self) -> &Digest {
        &self.fields.docker_manifest_digest
    }

    pub fn docker_reference(&self) -> &str {
        &self.fields.docker_reference
    }

    pub fn creator_id(&self) -> Option<&str> {
        self.fields.creator_id.as_deref()
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.fields.timestamp
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        self.fields.encode(SIGSTORE_SIGNATURE_TYPE)
    }

    /// cosign writes `"optional": null`, so that is accepted here.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(UntrustedSigstorePayload {
            fields: PayloadFields::decode(data, SIGSTORE_SIGNATURE_TYPE, true)?,
        })
    }
}

/// Verify `unverified_base64_signature` over `unverified_payload` with any of
/// `public_keys`, then check the payload claims against `rules`.
pub fn verify_sigstore_payload(
    verifier: &dyn SigstoreVerifier,
    public_keys: &[PublicKeyPem],
    unverified_payload: &[u8],
    unverified_base64_signature: &str,
    rules: &PayloadAcceptanceRules,
) -> Result<UntrustedSigstorePayload> {
    let signature = base64::engine::general_purpose::STANDARD
        .decode(unverified_base64_signature)
        .map_err(|e| Error::invalid_signature(format!("base64 decoding: {e}")))?;

    verifier
        .verify_payload_signature(public_keys, unverified_payload, &signature)
        .map_err(|e| {
            Error::invalid_signature(format!(
                "cryptographic signature verification failed: {e}"
            ))
        })?;

    let payload = UntrustedSigstorePayload::from_json(unverified_payload)?;
    rules.apply(&payload.fields)?;
    Ok(payload)
}
