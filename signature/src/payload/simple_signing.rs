// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Payload format of simple signing

use chrono::{DateTime, TimeZone, Utc};
use log::debug;

use super::{PayloadAcceptanceRules, PayloadFields};
use crate::digest::{manifest_digest, manifest_matches_digest, Digest};
use crate::error::{Error, Result};
use crate::mechanism::SigningMechanism;
use crate::reference::DockerReference;

/// `critical.type` of simple signing payloads.
pub const SIGNATURE_TYPE: &str = "atomic container signature";

// Signature is a parsed content of a signature.
// The only way to get this structure from a blob should be as a return value
// from a successful call to `verify_and_extract_signature` below.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub docker_manifest_digest: Digest,
    pub docker_reference: String,
}

/// The contents of a signature before it has been verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntrustedSignature {
    fields: PayloadFields,
}

impl UntrustedSignature {
    /// A signature claim for `docker_reference` with the usual creator and
    /// the current time.
    pub fn new(docker_manifest_digest: Digest, docker_reference: impl Into<String>) -> Self {
        Self::with_metadata(
            docker_manifest_digest,
            docker_reference,
            Some(format!("atomic {}", env!("CARGO_PKG_VERSION"))),
            Some(Utc::now().timestamp()),
        )
    }

    pub fn with_metadata(
        docker_manifest_digest: Digest,
        docker_reference: impl Into<String>,
        creator_id: Option<String>,
        timestamp: Option<i64>,
    ) -> Self {
        UntrustedSignature {
            fields: PayloadFields {
                docker_manifest_digest,
                docker_reference: docker_reference.into(),
                creator_id,
                timestamp,
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
        self.fields.encode(SIGNATURE_TYPE)
    }

    pub fn from_json(data: &[u8]) -> Result<Self> {
        Ok(UntrustedSignature {
            fields: PayloadFields::decode(data, SIGNATURE_TYPE, false)?,
        })
    }

    /// Serialize the claim and sign it with `key_identity`.
    ///
    /// A non-empty `passphrase` requires a mechanism which supports
    /// passphrases.
    pub fn sign(
        &self,
        mech: &dyn SigningMechanism,
        key_identity: &str,
        passphrase: &str,
    ) -> Result<Vec<u8>> {
        mech.supports_signing()
            .map_err(|e| Error::SigningNotSupported(e.to_string()))?;
        let payload = self.to_json()?;

        if let Some(signer) = mech.as_passphrase_signer() {
            return signer
                .sign_with_passphrase(&payload, key_identity, passphrase)
                .map_err(Error::Mechanism);
        }

        if !passphrase.is_empty() {
            return Err(Error::SigningNotSupported(
                "signing mechanism does not support passphrases".into(),
            ));
        }

        mech.sign(&payload, key_identity).map_err(Error::Mechanism)
    }
}

/// How to decide whether a simple signing signature is acceptable.
pub struct SignatureAcceptanceRules<'a> {
    pub accepted_key_identities: &'a [String],
    pub payload: PayloadAcceptanceRules<'a>,
}

/// Verify `unverified_signature` and check its claims against `rules`.
///
/// Returns the accepted signature and the identity of the (primary) key
/// which signed it.
pub fn verify_and_extract_signature(
    mech: &dyn SigningMechanism,
    unverified_signature: &[u8],
    rules: &SignatureAcceptanceRules,
) -> Result<(Signature, String)> {
    let (signed, mut key_identity) = mech
        .verify(unverified_signature)
        .map_err(Error::Mechanism)?;

    if !rules.accepted_key_identities.contains(&key_identity) {
        let Some(lookup) = mech.as_identity_lookup() else {
            return Err(Error::invalid_signature(format!(
                "signature by key {key_identity} is not accepted"
            )));
        };
        let primary_key = lookup
            .key_identity_for_verification_key_identity(&key_identity)
            .map_err(Error::Mechanism)?;
        if !rules.accepted_key_identities.contains(&primary_key) {
            return Err(Error::invalid_signature(format!(
                "signature by key {key_identity} of {primary_key} is not accepted"
            )));
        }
        debug!("signing subkey {key_identity} belongs to accepted key {primary_key}");
        key_identity = primary_key;
    }

    let untrusted = UntrustedSignature::from_json(&signed)?;
    rules.payload.apply(&untrusted.fields)?;

    Ok((
        Signature {
            docker_manifest_digest: untrusted.fields.docker_manifest_digest,
            docker_reference: untrusted.fields.docker_reference,
        },
        key_identity,
    ))
}

/// Information read from a signature WITHOUT verifying it.
///
/// Do not base any security decision on these values.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UntrustedSignatureInformation {
    pub untrusted_docker_manifest_digest: Digest,
    pub untrusted_docker_reference: String,
    pub untrusted_creator_id: Option<String>,
    pub untrusted_timestamp: Option<DateTime<Utc>>,
    pub untrusted_short_key_identifier: String,
}

pub fn get_untrusted_signature_information_without_verifying(
    mech: &dyn SigningMechanism,
    untrusted_signature: &[u8],
) -> Result<UntrustedSignatureInformation> {
    let (contents, short_key_identifier) = mech
        .untrusted_signature_contents(untrusted_signature)
        .map_err(Error::Mechanism)?;
    let decoded = UntrustedSignature::from_json(&contents)?;

    let untrusted_timestamp = match decoded.fields.timestamp {
        Some(ts) => Some(Utc.timestamp_opt(ts, 0).single().ok_or_else(|| {
            Error::invalid_signature(format!("timestamp {ts} out of range"))
        })?),
        None => None,
    };

    Ok(UntrustedSignatureInformation {
        untrusted_docker_manifest_digest: decoded.fields.docker_manifest_digest,
        untrusted_docker_reference: decoded.fields.docker_reference,
        untrusted_creator_id: decoded.fields.creator_id,
        untrusted_timestamp,
        untrusted_short_key_identifier: short_key_identifier,
    })
}

/// Sign `manifest` as the image `docker_reference`.
pub fn sign_docker_manifest(
    manifest: &[u8],
    docker_reference: &str,
    mech: &dyn SigningMechanism,
    key_identity: &str,
    passphrase: &str,
) -> Result<Vec<u8>> {
    let reference = DockerReference::parse_normalized(docker_reference)
        .map_err(|e| Error::invalid_signature(e.to_string()))?;
    UntrustedSignature::new(manifest_digest(manifest), reference.to_string()).sign(
        mech,
        key_identity,
        passphrase,
    )
}

/// Verify that `unverified_signature` was made by one of
/// `expected_key_identities` for `unverified_manifest` as
/// `expected_docker_reference`.
pub fn verify_docker_manifest_signature(
    unverified_signature: &[u8],
    unverified_manifest: &[u8],
    expected_docker_reference: &str,
    mech: &dyn SigningMechanism,
    expected_key_identities: &[String],
) -> Result<(Signature, String)> {
    let expected = DockerReference::parse_normalized(expected_docker_reference)
        .map_err(|e| Error::invalid_signature(e.to_string()))?;

    let validate_reference = |signed: &str| -> Result<()> {
        let signed_ref = DockerReference::parse_normalized(signed).map_err(|_| {
            Error::invalid_signature(format!("Invalid docker reference {signed:?} in signature"))
        })?;
        if signed_ref != expected {
            return Err(Error::invalid_signature(format!(
                "Docker reference {signed:?} does not match {expected_docker_reference:?}"
            )));
        }
        Ok(())
    };
    let validate_digest = |signed: &Digest| -> Result<()> {
        if !manifest_matches_digest(unverified_manifest, signed) {
            return Err(Error::invalid_signature(format!(
                "Signature for docker digest \"{signed}\" does not match"
            )));
        }
        Ok(())
    };

    verify_and_extract_signature(
        mech,
        unverified_signature,
        &SignatureAcceptanceRules {
            accepted_key_identities: expected_key_identities,
            payload: PayloadAcceptanceRules {
                validate_signed_docker_reference: &validate_reference,
                validate_signed_docker_manifest_digest: &validate_digest,
            },
        },
    )
}
