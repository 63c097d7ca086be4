// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Signed payload formats.
//!
//! Both the simple signing format and the sigstore payload share one JSON
//! layout, differing only in the `critical.type` value:
//!
//! ```json
//! {
//!     "critical": {
//!         "type": "atomic container signature",
//!         "image": { "docker-manifest-digest": "sha256:..." },
//!         "identity": { "docker-reference": "quay.io/ns/image:tag" }
//!     },
//!     "optional": { "creator": "...", "timestamp": 1634533638 }
//! }
//! ```
//!
//! The format is described in
//! <https://github.com/containers/image/blob/main/docs/containers-signature.5.md>.

use serde::Serialize;

use crate::digest::Digest;
use crate::error::{Error, Result};
use crate::strict_json::{integer_value, JsonFormatError, StrictObject};

pub mod simple_signing;
pub mod sigstore;

pub use simple_signing::{Signature, UntrustedSignature, UntrustedSignatureInformation};
pub use sigstore::UntrustedSigstorePayload;

/// The fields every payload carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PayloadFields {
    pub docker_manifest_digest: Digest,
    pub docker_reference: String,
    pub creator_id: Option<String>,
    pub timestamp: Option<i64>,
}

#[derive(Serialize)]
struct SigPayload<'a> {
    critical: SigPayloadCritical<'a>,
    optional: SigPayloadOptional<'a>,
}

// A JSON object which contains data critical to correctly evaluating the validity of a signature.
#[derive(Serialize)]
struct SigPayloadCritical<'a> {
    r#type: &'a str,
    image: PayloadCriticalImage,
    identity: PayloadCriticalIdentity<'a>,
}

// A JSON object which identifies the container image this signature applies to.
#[derive(Serialize)]
struct PayloadCriticalImage {
    #[serde(rename = "docker-manifest-digest")]
    docker_manifest_digest: String,
}

// A JSON object which identifies the claimed identity of the image, as
// asserted by the author of the signature.
#[derive(Serialize)]
struct PayloadCriticalIdentity<'a> {
    #[serde(rename = "docker-reference")]
    docker_reference: &'a str,
}

#[derive(Serialize)]
struct SigPayloadOptional<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    creator: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
}

impl PayloadFields {
    pub fn encode(&self, signature_type: &str) -> Result<Vec<u8>> {
        if self.docker_reference.is_empty() {
            return Err(Error::invalid_signature("Unexpected empty signature content"));
        }
        let payload = SigPayload {
            critical: SigPayloadCritical {
                r#type: signature_type,
                image: PayloadCriticalImage {
                    docker_manifest_digest: self.docker_manifest_digest.to_string(),
                },
                identity: PayloadCriticalIdentity {
                    docker_reference: &self.docker_reference,
                },
            },
            optional: SigPayloadOptional {
                creator: self.creator_id.as_deref(),
                timestamp: self.timestamp,
            },
        };
        Ok(serde_json::to_vec(&payload)?)
    }

    /// Strictly parse a payload. `optional` may only be `null` when
    /// `allow_null_optional` is set.
    pub fn decode(data: &[u8], signature_type: &str, allow_null_optional: bool) -> Result<Self> {
        let sig_err = JsonFormatError::into_signature_error;

        let mut top = StrictObject::parse_slice(data)
            .and_then(|o| o.exact(&["critical", "optional"]))
            .map_err(sig_err)?;
        let critical = top.require_raw("critical").map_err(sig_err)?;
        let optional = top.require_raw("optional").map_err(sig_err)?;

        let mut creator_id = None;
        let mut timestamp = None;
        if !(allow_null_optional && optional.get().trim() == "null") {
            let mut optional = StrictObject::parse(optional.get())
                .map_err(sig_err)?
                .into_fields();
            creator_id = optional.take::<String>("creator").map_err(sig_err)?;
            if let Some(n) = optional
                .take::<serde_json::Number>("timestamp")
                .map_err(sig_err)?
            {
                let ts = integer_value(&n).ok_or_else(|| {
                    Error::invalid_signature("Field optional.timestamp is not an integer")
                })?;
                timestamp = Some(ts);
            }
        }

        let mut critical = StrictObject::parse(critical.get())
            .and_then(|o| o.exact(&["type", "image", "identity"]))
            .map_err(sig_err)?;
        let t: String = critical.require("type").map_err(sig_err)?;
        if t != signature_type {
            return Err(Error::invalid_signature(format!(
                "Unrecognized signature type {t}"
            )));
        }

        let image = critical.require_raw("image").map_err(sig_err)?;
        let digest_string: String = StrictObject::parse(image.get())
            .and_then(|o| o.exact(&["docker-manifest-digest"]))
            .and_then(|mut f| f.require("docker-manifest-digest"))
            .map_err(sig_err)?;
        let docker_manifest_digest = digest_string.parse::<Digest>().map_err(|e| {
            Error::invalid_signature(format!(
                "invalid docker-manifest-digest value {digest_string:?}: {e}"
            ))
        })?;

        let identity = critical.require_raw("identity").map_err(sig_err)?;
        let docker_reference: String = StrictObject::parse(identity.get())
            .and_then(|o| o.exact(&["docker-reference"]))
            .and_then(|mut f| f.require("docker-reference"))
            .map_err(sig_err)?;

        Ok(PayloadFields {
            docker_manifest_digest,
            docker_reference,
            creator_id,
            timestamp,
        })
    }
}

/// Caller-supplied checks of the claims inside a verified payload.
pub struct PayloadAcceptanceRules<'a> {
    pub validate_signed_docker_reference: &'a dyn Fn(&str) -> Result<()>,
    pub validate_signed_docker_manifest_digest: &'a dyn Fn(&Digest) -> Result<()>,
}

impl PayloadAcceptanceRules<'_> {
    pub(crate) fn apply(&self, fields: &PayloadFields) -> Result<()> {
        (self.validate_signed_docker_manifest_digest)(&fields.docker_manifest_digest)?;
        (self.validate_signed_docker_reference)(&fields.docker_reference)
    }
}
