// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;
use std::str::FromStr;

use serde::Serialize;
use serde_with::{base64::Base64, serde_as};
use strum::{Display, EnumString};

use super::ref_match::PolicyReferenceMatch;
use super::sigstore::PrSigstoreSigned;
use super::{check_type, take, take_base64, type_field};
use crate::error::{Error, Result};
use crate::strict_json::{JsonFormatError, StrictObject};

#[derive(EnumString, Display, Debug, PartialEq, Eq, Clone, Copy)]
pub enum PrType {
    #[strum(serialize = "insecureAcceptAnything")]
    InsecureAcceptAnything,
    #[strum(serialize = "reject")]
    Reject,
    #[strum(serialize = "signedBy")]
    SignedBy,
    #[strum(serialize = "signedBaseLayer")]
    SignedBaseLayer,
    #[strum(serialize = "sigstoreSigned")]
    SigstoreSigned,
}

/// A rule which must be satisfied regarding an image's signatures.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PolicyRequirement {
    /// Accept any image. Makes no claim about signature authorship.
    InsecureAcceptAnything,

    /// Reject every image and every signature.
    Reject,

    /// Require a simple signing signature by a trusted GPG key.
    SignedBy(PrSignedBy),

    /// Require the base layer to be signed. Not implemented.
    SignedBaseLayer(PrSignedBaseLayer),

    /// Require a sigstore signature attachment.
    SigstoreSigned(PrSigstoreSigned),
}

impl PolicyRequirement {
    pub fn pr_type(&self) -> PrType {
        match self {
            PolicyRequirement::InsecureAcceptAnything => PrType::InsecureAcceptAnything,
            PolicyRequirement::Reject => PrType::Reject,
            PolicyRequirement::SignedBy(_) => PrType::SignedBy,
            PolicyRequirement::SignedBaseLayer(_) => PrType::SignedBaseLayer,
            PolicyRequirement::SigstoreSigned(_) => PrType::SigstoreSigned,
        }
    }

    /// Parse a JSON object, dispatching on its `type` member.
    pub(crate) fn from_json(data: &str) -> Result<Self> {
        let t = type_field(data)?;
        let pr_type = PrType::from_str(&t).map_err(|_| {
            Error::invalid_policy(format!("Unknown policy requirement type {t:?}"))
        })?;

        match pr_type {
            PrType::InsecureAcceptAnything | PrType::Reject => {
                let policy_err = JsonFormatError::into_policy_error;
                let mut fields = StrictObject::parse(data)
                    .and_then(|o| o.exact(&["type"]))
                    .map_err(policy_err)?;
                check_type(&fields.require::<String>("type").map_err(policy_err)?, pr_type)?;
                Ok(match pr_type {
                    PrType::Reject => PolicyRequirement::Reject,
                    _ => PolicyRequirement::InsecureAcceptAnything,
                })
            }
            PrType::SignedBy => Ok(PolicyRequirement::SignedBy(PrSignedBy::from_json(data)?)),
            PrType::SignedBaseLayer => Ok(PolicyRequirement::SignedBaseLayer(
                PrSignedBaseLayer::from_json(data)?,
            )),
            PrType::SigstoreSigned => Ok(PolicyRequirement::SigstoreSigned(
                PrSigstoreSigned::from_json(data)?,
            )),
        }
    }
}

/// Kinds of keys `signedBy` may refer to. Only [`KeyType::GpgKeys`] is
/// implemented; the others are accepted in a policy but reject every
/// signature.
#[derive(EnumString, Display, Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub enum KeyType {
    #[strum(serialize = "GPGKeys")]
    #[serde(rename = "GPGKeys")]
    GpgKeys,
    #[strum(serialize = "signedByGPGKeys")]
    #[serde(rename = "signedByGPGKeys")]
    SignedByGpgKeys,
    #[strum(serialize = "X509Certificates")]
    #[serde(rename = "X509Certificates")]
    X509Certificates,
    #[strum(serialize = "signedByX509CAs")]
    #[serde(rename = "signedByX509CAs")]
    SignedByX509Cas,
}

/// Where the trusted keys of a `signedBy` requirement come from.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SignedByKeySource {
    /// A file containing the keys.
    #[serde(rename = "keyPath")]
    KeyPath(PathBuf),

    /// Files containing the keys.
    #[serde(rename = "keyPaths")]
    KeyPaths(Vec<PathBuf>),

    /// Inline key material, base64 encoded in a policy document.
    #[serde(rename = "keyData")]
    KeyData(#[serde_as(as = "Base64")] Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSignedBy {
    key_type: KeyType,
    #[serde(flatten)]
    key_source: SignedByKeySource,
    signed_identity: PolicyReferenceMatch,
}

impl PrSignedBy {
    pub fn new(
        key_type: KeyType,
        key_source: SignedByKeySource,
        signed_identity: PolicyReferenceMatch,
    ) -> Result<Self> {
        // An empty keyPath does not count as a key source.
        if matches!(&key_source, SignedByKeySource::KeyPath(p) if p.as_os_str().is_empty()) {
            return Err(Error::invalid_policy(
                "exactly one of keyPath, keyPaths and keyData must be specified",
            ));
        }
        Ok(PrSignedBy {
            key_type,
            key_source,
            signed_identity,
        })
    }

    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    pub fn key_source(&self) -> &SignedByKeySource {
        &self.key_source
    }

    pub fn signed_identity(&self) -> &PolicyReferenceMatch {
        &self.signed_identity
    }

    pub(crate) fn from_json(data: &str) -> Result<Self> {
        let policy_err = JsonFormatError::into_policy_error;
        let mut fields = StrictObject::parse(data)
            .and_then(|o| {
                o.only(&[
                    "type",
                    "keyType",
                    "keyPath",
                    "keyPaths",
                    "keyData",
                    "signedIdentity",
                ])
            })
            .map_err(policy_err)?;

        let key_type = match take::<String>(&mut fields, "keyType")? {
            Some(s) => Some(KeyType::from_str(&s).map_err(|_| {
                Error::invalid_policy(format!("Unrecognized keyType value {s:?}"))
            })?),
            None => None,
        };

        check_type(
            &take::<String>(&mut fields, "type")?.unwrap_or_default(),
            PrType::SignedBy,
        )?;

        let signed_identity = match fields.take_raw("signedIdentity") {
            Some(raw) => PolicyReferenceMatch::from_json(raw.get())?,
            None => PolicyReferenceMatch::default(),
        };

        let mut sources = Vec::new();
        if let Some(path) = take::<PathBuf>(&mut fields, "keyPath")? {
            sources.push(SignedByKeySource::KeyPath(path));
        }
        if let Some(paths) = take::<Vec<PathBuf>>(&mut fields, "keyPaths")? {
            sources.push(SignedByKeySource::KeyPaths(paths));
        }
        if let Some(data) = take_base64(&mut fields, "keyData")? {
            sources.push(SignedByKeySource::KeyData(data));
        }
        let key_source = match sources.len() {
            0 => {
                return Err(Error::invalid_policy(
                    "Exactly one of keyPath, keyPaths and keyData must be specified, none of them present",
                ))
            }
            1 => sources.remove(0),
            _ => {
                return Err(Error::invalid_policy(
                    "Exactly one of keyPath, keyPaths and keyData must be specified, more than one present",
                ))
            }
        };

        let Some(key_type) = key_type else {
            return Err(Error::invalid_policy("invalid keyType \"\""));
        };

        Self::new(key_type, key_source, signed_identity)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSignedBaseLayer {
    base_layer_identity: PolicyReferenceMatch,
}

impl PrSignedBaseLayer {
    pub fn new(base_layer_identity: PolicyReferenceMatch) -> Self {
        PrSignedBaseLayer {
            base_layer_identity,
        }
    }

    pub fn base_layer_identity(&self) -> &PolicyReferenceMatch {
        &self.base_layer_identity
    }

    pub(crate) fn from_json(data: &str) -> Result<Self> {
        let policy_err = JsonFormatError::into_policy_error;
        let mut fields = StrictObject::parse(data)
            .and_then(|o| o.exact(&["type", "baseLayerIdentity"]))
            .map_err(policy_err)?;
        check_type(
            &fields.require::<String>("type").map_err(policy_err)?,
            PrType::SignedBaseLayer,
        )?;
        let identity = fields.require_raw("baseLayerIdentity").map_err(policy_err)?;
        Ok(Self::new(PolicyReferenceMatch::from_json(identity.get())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn test_parse_simple_requirements() {
        assert_eq!(
            PolicyRequirement::from_json(r#"{"type": "insecureAcceptAnything"}"#).unwrap(),
            PolicyRequirement::InsecureAcceptAnything
        );
        assert_eq!(
            PolicyRequirement::from_json(r#"{"type": "reject"}"#).unwrap(),
            PolicyRequirement::Reject
        );
    }

    #[rstest]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyPath": "/keys/key.gpg"}),
        PrSignedBy::new(
            KeyType::GpgKeys,
            SignedByKeySource::KeyPath("/keys/key.gpg".into()),
            PolicyReferenceMatch::MatchRepoDigestOrExact,
        )
        .unwrap()
    )]
    #[case(
        json!({
            "type": "signedBy",
            "keyType": "signedByX509CAs",
            "keyPaths": ["/a", "/b"],
            "signedIdentity": {"type": "matchRepository"}
        }),
        PrSignedBy::new(
            KeyType::SignedByX509Cas,
            SignedByKeySource::KeyPaths(vec!["/a".into(), "/b".into()]),
            PolicyReferenceMatch::MatchRepository,
        )
        .unwrap()
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyData": "a2V5", "signedIdentity": {"type": "matchExact"}}),
        PrSignedBy::new(
            KeyType::GpgKeys,
            SignedByKeySource::KeyData(b"key".to_vec()),
            PolicyReferenceMatch::MatchExact,
        )
        .unwrap()
    )]
    fn test_parse_signed_by(#[case] input: serde_json::Value, #[case] expected: PrSignedBy) {
        let parsed = PolicyRequirement::from_json(&input.to_string()).unwrap();
        assert_eq!(parsed, PolicyRequirement::SignedBy(expected));
    }

    #[test]
    fn test_signed_by_serialization() {
        let pr = PolicyRequirement::SignedBy(PrSignedBy::new(
            KeyType::GpgKeys,
            SignedByKeySource::KeyData(b"key".to_vec()),
            PolicyReferenceMatch::MatchExact,
        )
        .unwrap());
        assert_eq!(
            serde_json::to_value(&pr).unwrap(),
            json!({
                "type": "signedBy",
                "keyType": "GPGKeys",
                "keyData": "a2V5",
                "signedIdentity": {"type": "matchExact"}
            })
        );
        let reparsed =
            PolicyRequirement::from_json(&serde_json::to_string(&pr).unwrap()).unwrap();
        assert_eq!(reparsed, pr);
    }

    #[rstest]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys"}),
        "Exactly one of keyPath, keyPaths and keyData must be specified, none of them present"
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyPath": "/a", "keyData": "a2V5"}),
        "Exactly one of keyPath, keyPaths and keyData must be specified, more than one present"
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyPath": ""}),
        "exactly one of keyPath, keyPaths and keyData must be specified"
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "RSAKeys", "keyPath": "/a"}),
        "Unrecognized keyType value \"RSAKeys\""
    )]
    #[case(json!({"type": "signedBy", "keyPath": "/a"}), "invalid keyType \"\"")]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyData": "not base64!"}),
        "invalid value of key \"keyData\""
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyPath": "/a", "unknown": true}),
        "Unknown key \"unknown\""
    )]
    #[case(
        json!({"type": "signedBy", "keyType": "GPGKeys", "keyPath": "/a", "signedIdentity": {"type": "bogus"}}),
        "Unknown policy reference match type \"bogus\""
    )]
    #[case(json!({"type": "signedBaseLayer"}), "Key \"baseLayerIdentity\" missing")]
    #[case(
        json!({"type": "signedBaseLayer", "baseLayerIdentity": {"type": "matchExact"}, "x": 1}),
        "Unknown key \"x\""
    )]
    #[case(json!({"type": "reject", "keyPath": "/a"}), "Unknown key \"keyPath\"")]
    #[case(json!({"type": "Reject"}), "Unknown policy requirement type \"Reject\"")]
    #[case(json!({"keyPath": "/a"}), "Unknown policy requirement type \"\"")]
    fn test_parse_invalid(#[case] input: serde_json::Value, #[case] expected: &str) {
        let err = PolicyRequirement::from_json(&input.to_string()).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicyFormat(_)));
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_new_signed_by_rejects_empty_key_path() {
        let err = PrSignedBy::new(
            KeyType::GpgKeys,
            SignedByKeySource::KeyPath(PathBuf::new()),
            PolicyReferenceMatch::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidPolicyFormat(_)));
    }

    #[test]
    fn test_variant_parser_checks_type() {
        let err = PrSignedBy::from_json(r#"{"type": "reject", "keyType": "GPGKeys", "keyPath": "/a"}"#)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid policy format: Unexpected policy requirement type \"reject\""
        );

        let err = PrSignedBaseLayer::from_json(
            r#"{"type": "signedBy", "baseLayerIdentity": {"type": "matchExact"}}"#,
        )
        .unwrap_err();
        assert!(err
            .to_string()
            .ends_with("Unexpected policy requirement type \"signedBy\""));
    }

    #[test]
    fn test_parse_signed_base_layer() {
        let parsed = PolicyRequirement::from_json(
            &json!({
                "type": "signedBaseLayer",
                "baseLayerIdentity": {"type": "exactRepository", "dockerRepository": "example.com/base"}
            })
            .to_string(),
        )
        .unwrap();
        assert_eq!(
            parsed,
            PolicyRequirement::SignedBaseLayer(PrSignedBaseLayer::new(
                PolicyReferenceMatch::exact_repository("example.com/base").unwrap()
            ))
        );
        assert_eq!(parsed.pr_type().to_string(), "signedBaseLayer");
    }
}
