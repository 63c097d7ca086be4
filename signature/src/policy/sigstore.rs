// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! The `sigstoreSigned` requirement and its trust roots.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_with::{base64::Base64, serde_as};

use super::policy_requirement::PrType;
use super::ref_match::PolicyReferenceMatch;
use super::{check_type, take, take_base64, take_base64_list};
use crate::error::{Error, Result};
use crate::mechanism::{FulcioTrustRoot, PkiTrustRoot, PublicKeyPem};
use crate::strict_json::{JsonFormatError, StrictObject};

/// Where the public keys (or the certificate authority) of a
/// `sigstoreSigned` requirement come from. Exactly one is used.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SigstoreKeySource {
    #[serde(rename = "keyPath")]
    KeyPath(PathBuf),
    #[serde(rename = "keyPaths")]
    KeyPaths(Vec<PathBuf>),
    #[serde(rename = "keyData")]
    KeyData(#[serde_as(as = "Base64")] Vec<u8>),
    #[serde(rename = "keyDatas")]
    KeyDatas(#[serde_as(as = "Vec<Base64>")] Vec<Vec<u8>>),
    #[serde(rename = "fulcio")]
    Fulcio(PrSigstoreSignedFulcio),
    #[serde(rename = "pki")]
    Pki(PrSigstoreSignedPki),
}

/// Rekor public keys used to verify signed entry timestamps (SETs).
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum RekorKeySource {
    #[serde(rename = "rekorPublicKeyPath")]
    Path(PathBuf),
    #[serde(rename = "rekorPublicKeyPaths")]
    Paths(Vec<PathBuf>),
    #[serde(rename = "rekorPublicKeyData")]
    Data(#[serde_as(as = "Base64")] Vec<u8>),
    #[serde(rename = "rekorPublicKeyDatas")]
    Datas(#[serde_as(as = "Vec<Base64>")] Vec<Vec<u8>>),
}

/// A single PEM bundle, from a file or inline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateSource {
    Path(PathBuf),
    Data(Vec<u8>),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSigstoreSigned {
    #[serde(flatten)]
    key_source: SigstoreKeySource,
    #[serde(flatten)]
    rekor_public_key: Option<RekorKeySource>,
    signed_identity: PolicyReferenceMatch,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSigstoreSignedFulcio {
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_path: Option<PathBuf>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_data: Option<Vec<u8>>,
    oidc_issuer: String,
    subject_email: String,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSigstoreSignedPki {
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_roots_path: Option<PathBuf>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_roots_data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_intermediates_path: Option<PathBuf>,
    #[serde_as(as = "Option<Base64>")]
    #[serde(skip_serializing_if = "Option::is_none")]
    ca_intermediates_data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject_hostname: Option<String>,
}

/// Key material loaded from a [`PrSigstoreSigned`], ready for verification.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SigstoreTrustRoot {
    PublicKeys {
        public_keys: Vec<PublicKeyPem>,
        rekor_public_keys: Option<Vec<PublicKeyPem>>,
    },
    Fulcio {
        fulcio: FulcioTrustRoot,
        rekor_public_keys: Vec<PublicKeyPem>,
    },
    Pki(PkiTrustRoot),
}

fn no_entries(key: &str) -> Error {
    Error::invalid_policy(format!("{key:?} contains no entries"))
}

fn read_pem(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::read_file(path, e))
}

fn read_pems(paths: &[PathBuf]) -> Result<Vec<Vec<u8>>> {
    paths.iter().map(|p| read_pem(p)).collect()
}

impl SigstoreKeySource {
    fn validate(&self) -> Result<()> {
        match self {
            SigstoreKeySource::KeyPath(p) if p.as_os_str().is_empty() => Err(Error::invalid_policy(
                "exactly one of keyPath, keyPaths, keyData, keyDatas, fulcio, and pki must be specified",
            )),
            SigstoreKeySource::KeyPaths(p) if p.is_empty() => Err(no_entries("keyPaths")),
            SigstoreKeySource::KeyDatas(d) if d.is_empty() => Err(no_entries("keyDatas")),
            _ => Ok(()),
        }
    }
}

impl RekorKeySource {
    fn validate(&self) -> Result<()> {
        match self {
            RekorKeySource::Paths(p) if p.is_empty() => Err(no_entries("rekorPublicKeyPaths")),
            RekorKeySource::Datas(d) if d.is_empty() => Err(no_entries("rekorPublicKeyDatas")),
            _ => Ok(()),
        }
    }

    fn load(&self) -> Result<Vec<PublicKeyPem>> {
        let pems = match self {
            RekorKeySource::Path(p) => vec![read_pem(p)?],
            RekorKeySource::Paths(p) => read_pems(p)?,
            RekorKeySource::Data(d) => vec![d.clone()],
            RekorKeySource::Datas(d) => d.clone(),
        };
        if pems.is_empty() {
            return Err(Error::internal(
                r#"Internal inconsistency: "rekorPublicKeyPath", "rekorPublicKeyPaths", "rekorPublicKeyData" and "rekorPublicKeyDatas" produced no public keys"#,
            ));
        }
        Ok(pems.into_iter().map(PublicKeyPem).collect())
    }
}

impl CertificateSource {
    fn load(&self) -> Result<Vec<u8>> {
        match self {
            CertificateSource::Path(p) => read_pem(p),
            CertificateSource::Data(d) => Ok(d.clone()),
        }
    }
}

// Combines the two optional members of a certificate source, rejecting
// both being set.
fn certificate_source(
    path: Option<PathBuf>,
    data: Option<Vec<u8>>,
    conflict: &str,
) -> Result<Option<CertificateSource>> {
    match (path, data) {
        (Some(_), Some(_)) => Err(Error::invalid_policy(conflict)),
        (Some(p), None) if !p.as_os_str().is_empty() => Ok(Some(CertificateSource::Path(p))),
        (Some(_), None) => Ok(None),
        (None, Some(d)) => Ok(Some(CertificateSource::Data(d))),
        (None, None) => Ok(None),
    }
}

impl PrSigstoreSigned {
    pub fn new(
        key_source: SigstoreKeySource,
        rekor_public_key: Option<RekorKeySource>,
        signed_identity: PolicyReferenceMatch,
    ) -> Result<Self> {
        key_source.validate()?;
        if let Some(rekor) = &rekor_public_key {
            rekor.validate()?;
        }

        match (&key_source, &rekor_public_key) {
            (SigstoreKeySource::Fulcio(_), None) => {
                return Err(Error::invalid_policy(
                    "At least one of rekorPublickeyPath, rekorPublicKeyPaths, rekorPublickeyData and rekorPublicKeyDatas must be specified if fulcio is used",
                ))
            }
            (SigstoreKeySource::Pki(_), Some(_)) => {
                return Err(Error::invalid_policy(
                    "rekorPublickeyPath, rekorPublicKeyPaths, rekorPublickeyData and rekorPublicKeyDatas are not supported for pki",
                ))
            }
            _ => {}
        }

        Ok(PrSigstoreSigned {
            key_source,
            rekor_public_key,
            signed_identity,
        })
    }

    pub fn key_source(&self) -> &SigstoreKeySource {
        &self.key_source
    }

    pub fn rekor_public_key(&self) -> Option<&RekorKeySource> {
        self.rekor_public_key.as_ref()
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
                    "keyPath",
                    "keyPaths",
                    "keyData",
                    "keyDatas",
                    "fulcio",
                    "rekorPublicKeyPath",
                    "rekorPublicKeyPaths",
                    "rekorPublicKeyData",
                    "rekorPublicKeyDatas",
                    "pki",
                    "signedIdentity",
                ])
            })
            .map_err(policy_err)?;

        check_type(
            &take::<String>(&mut fields, "type")?.unwrap_or_default(),
            PrType::SigstoreSigned,
        )?;

        let signed_identity = match fields.take_raw("signedIdentity") {
            Some(raw) => PolicyReferenceMatch::from_json(raw.get())?,
            None => PolicyReferenceMatch::default(),
        };

        let mut key_sources = Vec::new();
        if let Some(path) = take::<PathBuf>(&mut fields, "keyPath")? {
            if !path.as_os_str().is_empty() {
                key_sources.push(SigstoreKeySource::KeyPath(path));
            }
        }
        if let Some(paths) = take::<Vec<PathBuf>>(&mut fields, "keyPaths")? {
            key_sources.push(SigstoreKeySource::KeyPaths(paths));
        }
        if let Some(data) = take_base64(&mut fields, "keyData")? {
            key_sources.push(SigstoreKeySource::KeyData(data));
        }
        if let Some(datas) = take_base64_list(&mut fields, "keyDatas")? {
            key_sources.push(SigstoreKeySource::KeyDatas(datas));
        }
        if let Some(raw) = fields.take_raw("fulcio") {
            key_sources.push(SigstoreKeySource::Fulcio(
                PrSigstoreSignedFulcio::from_json(raw.get())?,
            ));
        }
        if let Some(raw) = fields.take_raw("pki") {
            key_sources.push(SigstoreKeySource::Pki(PrSigstoreSignedPki::from_json(
                raw.get(),
            )?));
        }

        let mut rekor_sources = Vec::new();
        if let Some(path) = take::<PathBuf>(&mut fields, "rekorPublicKeyPath")? {
            if !path.as_os_str().is_empty() {
                rekor_sources.push(RekorKeySource::Path(path));
            }
        }
        if let Some(paths) = take::<Vec<PathBuf>>(&mut fields, "rekorPublicKeyPaths")? {
            rekor_sources.push(RekorKeySource::Paths(paths));
        }
        if let Some(data) = take_base64(&mut fields, "rekorPublicKeyData")? {
            rekor_sources.push(RekorKeySource::Data(data));
        }
        if let Some(datas) = take_base64_list(&mut fields, "rekorPublicKeyDatas")? {
            rekor_sources.push(RekorKeySource::Datas(datas));
        }

        for source in &key_sources {
            source.validate()?;
        }
        for source in &rekor_sources {
            source.validate()?;
        }

        if key_sources.len() != 1 {
            return Err(Error::invalid_policy(
                "exactly one of keyPath, keyPaths, keyData, keyDatas, fulcio, and pki must be specified",
            ));
        }
        if rekor_sources.len() > 1 {
            return Err(Error::invalid_policy(
                "at most one of rekorPublickeyPath, rekorPublicKeyPaths, rekorPublickeyData and rekorPublicKeyDatas can be used simultaneously",
            ));
        }

        Self::new(key_sources.remove(0), rekor_sources.pop(), signed_identity)
    }

    /// Load all key material referenced by the requirement.
    pub fn prepare_trust_root(&self) -> Result<SigstoreTrustRoot> {
        let rekor_public_keys = self
            .rekor_public_key
            .as_ref()
            .map(RekorKeySource::load)
            .transpose()?;

        let public_key_pems = match &self.key_source {
            SigstoreKeySource::KeyPath(p) => vec![read_pem(p)?],
            SigstoreKeySource::KeyPaths(p) => read_pems(p)?,
            SigstoreKeySource::KeyData(d) => vec![d.clone()],
            SigstoreKeySource::KeyDatas(d) => d.clone(),
            SigstoreKeySource::Fulcio(fulcio) => {
                let Some(rekor_public_keys) = rekor_public_keys else {
                    return Err(Error::internal(
                        "Internal inconsistency: Fulcio CA specified without a Rekor public key",
                    ));
                };
                return Ok(SigstoreTrustRoot::Fulcio {
                    fulcio: fulcio.prepare_trust_root()?,
                    rekor_public_keys,
                });
            }
            SigstoreKeySource::Pki(pki) => {
                if rekor_public_keys.is_some() {
                    return Err(Error::internal(
                        "Internal inconsistency: PKI specified with a Rekor public key",
                    ));
                }
                return Ok(SigstoreTrustRoot::Pki(pki.prepare_trust_root()?));
            }
        };

        if public_key_pems.is_empty() {
            return Err(Error::internal(
                r#"Internal inconsistency: "keyPath", "keyPaths", "keyData" and "keyDatas" produced no public keys"#,
            ));
        }
        Ok(SigstoreTrustRoot::PublicKeys {
            public_keys: public_key_pems.into_iter().map(PublicKeyPem).collect(),
            rekor_public_keys,
        })
    }
}

impl PrSigstoreSignedFulcio {
    pub fn new(
        ca: CertificateSource,
        oidc_issuer: impl Into<String>,
        subject_email: impl Into<String>,
    ) -> Result<Self> {
        let (ca_path, ca_data) = match ca {
            CertificateSource::Path(p) => (Some(p), None),
            CertificateSource::Data(d) => (None, Some(d)),
        };
        Self::from_parts(ca_path, ca_data, oidc_issuer.into(), subject_email.into())
    }

    fn from_parts(
        ca_path: Option<PathBuf>,
        ca_data: Option<Vec<u8>>,
        oidc_issuer: String,
        subject_email: String,
    ) -> Result<Self> {
        let ca = certificate_source(
            ca_path,
            ca_data,
            "caPath and caData cannot be used simultaneously",
        )?
        .ok_or_else(|| Error::invalid_policy("At least one of caPath and caData must be specified"))?;
        if oidc_issuer.is_empty() {
            return Err(Error::invalid_policy("oidcIssuer not specified"));
        }
        if subject_email.is_empty() {
            return Err(Error::invalid_policy("subjectEmail not specified"));
        }

        let (ca_path, ca_data) = match ca {
            CertificateSource::Path(p) => (Some(p), None),
            CertificateSource::Data(d) => (None, Some(d)),
        };
        Ok(PrSigstoreSignedFulcio {
            ca_path,
            ca_data,
            oidc_issuer,
            subject_email,
        })
    }

    pub fn oidc_issuer(&self) -> &str {
        &self.oidc_issuer
    }

    pub fn subject_email(&self) -> &str {
        &self.subject_email
    }

    fn from_json(data: &str) -> Result<Self> {
        let mut fields = StrictObject::parse(data)
            .and_then(|o| o.only(&["caPath", "caData", "oidcIssuer", "subjectEmail"]))
            .map_err(JsonFormatError::into_policy_error)?;
        Self::from_parts(
            take(&mut fields, "caPath")?,
            take_base64(&mut fields, "caData")?,
            take(&mut fields, "oidcIssuer")?.unwrap_or_default(),
            take(&mut fields, "subjectEmail")?.unwrap_or_default(),
        )
    }

    pub fn prepare_trust_root(&self) -> Result<FulcioTrustRoot> {
        let ca_certificates = match (&self.ca_path, &self.ca_data) {
            (Some(path), None) => read_pem(path)?,
            (None, Some(data)) => data.clone(),
            (Some(_), Some(_)) => {
                return Err(Error::internal(
                    r#"Internal inconsistency: both "caPath" and "caData" specified"#,
                ))
            }
            (None, None) => {
                return Err(Error::internal(
                    r#"Internal inconsistency: Fulcio specified with not exactly one of "caPath" nor "caData""#,
                ))
            }
        };
        Ok(FulcioTrustRoot {
            ca_certificates,
            oidc_issuer: self.oidc_issuer.clone(),
            subject_email: self.subject_email.clone(),
        })
    }
}

impl PrSigstoreSignedPki {
    pub fn new(
        ca_roots: CertificateSource,
        ca_intermediates: Option<CertificateSource>,
        subject_email: Option<String>,
        subject_hostname: Option<String>,
    ) -> Result<Self> {
        let (ca_roots_path, ca_roots_data) = match ca_roots {
            CertificateSource::Path(p) => (Some(p), None),
            CertificateSource::Data(d) => (None, Some(d)),
        };
        let (ca_intermediates_path, ca_intermediates_data) = match ca_intermediates {
            Some(CertificateSource::Path(p)) => (Some(p), None),
            Some(CertificateSource::Data(d)) => (None, Some(d)),
            None => (None, None),
        };
        Self::from_parts(PrSigstoreSignedPki {
            ca_roots_path,
            ca_roots_data,
            ca_intermediates_path,
            ca_intermediates_data,
            subject_email,
            subject_hostname,
        })
    }

    fn from_parts(mut pki: PrSigstoreSignedPki) -> Result<Self> {
        let roots = certificate_source(
            pki.ca_roots_path.take(),
            pki.ca_roots_data.take(),
            "caRootsPath and caRootsData cannot be used simultaneously",
        )?
        .ok_or_else(|| {
            Error::invalid_policy("At least one of caRootsPath and caRootsData must be specified")
        })?;
        let intermediates = certificate_source(
            pki.ca_intermediates_path.take(),
            pki.ca_intermediates_data.take(),
            "caIntermediatesPath and caIntermediatesData cannot be used simultaneously",
        )?;

        pki.subject_email = pki.subject_email.filter(|s| !s.is_empty());
        pki.subject_hostname = pki.subject_hostname.filter(|s| !s.is_empty());
        if pki.subject_email.is_none() && pki.subject_hostname.is_none() {
            return Err(Error::invalid_policy(
                "At least one of subjectEmail, subjectHostname must be specified",
            ));
        }

        match roots {
            CertificateSource::Path(p) => pki.ca_roots_path = Some(p),
            CertificateSource::Data(d) => pki.ca_roots_data = Some(d),
        }
        match intermediates {
            Some(CertificateSource::Path(p)) => pki.ca_intermediates_path = Some(p),
            Some(CertificateSource::Data(d)) => pki.ca_intermediates_data = Some(d),
            None => {}
        }
        Ok(pki)
    }

    pub fn subject_email(&self) -> Option<&str> {
        self.subject_email.as_deref()
    }

    pub fn subject_hostname(&self) -> Option<&str> {
        self.subject_hostname.as_deref()
    }

    fn from_json(data: &str) -> Result<Self> {
        let mut fields = StrictObject::parse(data)
            .and_then(|o| {
                o.only(&[
                    "caRootsPath",
                    "caRootsData",
                    "caIntermediatesPath",
                    "caIntermediatesData",
                    "subjectEmail",
                    "subjectHostname",
                ])
            })
            .map_err(JsonFormatError::into_policy_error)?;
        Self::from_parts(PrSigstoreSignedPki {
            ca_roots_path: take(&mut fields, "caRootsPath")?,
            ca_roots_data: take_base64(&mut fields, "caRootsData")?,
            ca_intermediates_path: take(&mut fields, "caIntermediatesPath")?,
            ca_intermediates_data: take_base64(&mut fields, "caIntermediatesData")?,
            subject_email: take(&mut fields, "subjectEmail")?,
            subject_hostname: take(&mut fields, "subjectHostname")?,
        })
    }

    pub fn prepare_trust_root(&self) -> Result<PkiTrustRoot> {
        let roots = match (&self.ca_roots_path, &self.ca_roots_data) {
            (Some(path), None) => CertificateSource::Path(path.clone()),
            (None, Some(data)) => CertificateSource::Data(data.clone()),
            (Some(_), Some(_)) => {
                return Err(Error::internal(
                    r#"Internal inconsistency: both "caRootsPath" and "caRootsData" specified"#,
                ))
            }
            (None, None) => {
                return Err(Error::internal(
                    r#"Internal inconsistency: PKI specified with not exactly one of "caRootsPath" nor "caRootsData""#,
                ))
            }
        };
        let intermediates = match (&self.ca_intermediates_path, &self.ca_intermediates_data) {
            (Some(path), None) => Some(CertificateSource::Path(path.clone())),
            (None, Some(data)) => Some(CertificateSource::Data(data.clone())),
            (None, None) => None,
            (Some(_), Some(_)) => {
                return Err(Error::internal(
                    r#"Internal inconsistency: both "caIntermediatesPath" and "caIntermediatesData" specified"#,
                ))
            }
        };

        Ok(PkiTrustRoot {
            ca_roots_certificates: roots.load()?,
            ca_intermediate_certificates: intermediates.as_ref().map(|c| c.load()).transpose()?,
            subject_email: self.subject_email.clone(),
            subject_hostname: self.subject_hostname.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyRequirement;
    use rstest::rstest;
    use serde_json::json;

    fn parse(input: serde_json::Value) -> Result<PrSigstoreSigned> {
        match PolicyRequirement::from_json(&input.to_string())? {
            PolicyRequirement::SigstoreSigned(pr) => Ok(pr),
            other => panic!("unexpected requirement {other:?}"),
        }
    }

    fn fulcio() -> PrSigstoreSignedFulcio {
        PrSigstoreSignedFulcio::new(
            CertificateSource::Data(b"ca".to_vec()),
            "https://issuer.example.com",
            "user@example.com",
        )
        .unwrap()
    }

    #[test]
    fn test_parse_key_data() {
        let pr = parse(json!({
            "type": "sigstoreSigned",
            "keyData": "a2V5",
            "rekorPublicKeyPaths": ["/rekor.pub"],
            "signedIdentity": {"type": "matchRepository"}
        }))
        .unwrap();
        assert_eq!(pr.key_source(), &SigstoreKeySource::KeyData(b"key".to_vec()));
        assert_eq!(
            pr.rekor_public_key(),
            Some(&RekorKeySource::Paths(vec!["/rekor.pub".into()]))
        );
        assert_eq!(pr.signed_identity(), &PolicyReferenceMatch::MatchRepository);
    }

    #[test]
    fn test_parse_fulcio_and_serialize() {
        let input = json!({
            "type": "sigstoreSigned",
            "fulcio": {
                "caData": "Y2E=",
                "oidcIssuer": "https://issuer.example.com",
                "subjectEmail": "user@example.com"
            },
            "rekorPublicKeyData": "cmVrb3I=",
            "signedIdentity": {"type": "matchRepoDigestOrExact"}
        });
        let pr = parse(input.clone()).unwrap();
        assert_eq!(pr.key_source(), &SigstoreKeySource::Fulcio(fulcio()));

        let serialized =
            serde_json::to_value(PolicyRequirement::SigstoreSigned(pr.clone())).unwrap();
        assert_eq!(serialized, input);
    }

    #[test]
    fn test_parse_pki() {
        let pr = parse(json!({
            "type": "sigstoreSigned",
            "pki": {
                "caRootsPath": "/roots.pem",
                "caIntermediatesData": "aW50",
                "subjectHostname": "example.com"
            }
        }))
        .unwrap();
        let expected = PrSigstoreSignedPki::new(
            CertificateSource::Path("/roots.pem".into()),
            Some(CertificateSource::Data(b"int".to_vec())),
            None,
            Some("example.com".into()),
        )
        .unwrap();
        assert_eq!(pr.key_source(), &SigstoreKeySource::Pki(expected));
        assert_eq!(pr.signed_identity(), &PolicyReferenceMatch::MatchRepoDigestOrExact);
    }

    #[rstest]
    #[case(
        json!({"type": "sigstoreSigned"}),
        "exactly one of keyPath, keyPaths, keyData, keyDatas, fulcio, and pki must be specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "keyPath": "/a", "keyData": "a2V5"}),
        "exactly one of keyPath, keyPaths, keyData, keyDatas, fulcio, and pki must be specified"
    )]
    #[case(json!({"type": "sigstoreSigned", "keyPaths": []}), "\"keyPaths\" contains no entries")]
    #[case(json!({"type": "sigstoreSigned", "keyDatas": []}), "\"keyDatas\" contains no entries")]
    #[case(
        json!({"type": "sigstoreSigned", "keyPath": "/a", "rekorPublicKeyPaths": []}),
        "\"rekorPublicKeyPaths\" contains no entries"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "keyPath": "/a", "rekorPublicKeyPath": "/r", "rekorPublicKeyData": "a2V5"}),
        "at most one of rekorPublickeyPath, rekorPublicKeyPaths, rekorPublickeyData and rekorPublicKeyDatas can be used simultaneously"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"caPath": "/ca", "oidcIssuer": "i", "subjectEmail": "e"}}),
        "must be specified if fulcio is used"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "pki": {"caRootsPath": "/ca", "subjectEmail": "e"}, "rekorPublicKeyPath": "/r"}),
        "are not supported for pki"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"caPath": "/ca", "caData": "Y2E=", "oidcIssuer": "i", "subjectEmail": "e"}, "rekorPublicKeyPath": "/r"}),
        "caPath and caData cannot be used simultaneously"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"oidcIssuer": "i", "subjectEmail": "e"}, "rekorPublicKeyPath": "/r"}),
        "At least one of caPath and caData must be specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"caPath": "/ca", "subjectEmail": "e"}, "rekorPublicKeyPath": "/r"}),
        "oidcIssuer not specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"caPath": "/ca", "oidcIssuer": "i"}, "rekorPublicKeyPath": "/r"}),
        "subjectEmail not specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "fulcio": {"caPath": "/ca", "oidcIssuer": "i", "subjectEmail": "e", "x": 1}, "rekorPublicKeyPath": "/r"}),
        "Unknown key \"x\""
    )]
    #[case(
        json!({"type": "sigstoreSigned", "pki": {"caRootsPath": "/ca", "caRootsData": "Y2E=", "subjectEmail": "e"}}),
        "caRootsPath and caRootsData cannot be used simultaneously"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "pki": {"subjectEmail": "e"}}),
        "At least one of caRootsPath and caRootsData must be specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "pki": {"caRootsPath": "/ca", "caIntermediatesPath": "/i", "caIntermediatesData": "aQ==", "subjectEmail": "e"}}),
        "caIntermediatesPath and caIntermediatesData cannot be used simultaneously"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "pki": {"caRootsPath": "/ca"}}),
        "At least one of subjectEmail, subjectHostname must be specified"
    )]
    #[case(
        json!({"type": "sigstoreSigned", "keyPath": "/a", "signedIdentity": {"type": "remapIdentity", "prefix": "!", "signedPrefix": "example.com"}}),
        "prefix \"!\" is not valid"
    )]
    fn test_parse_invalid(#[case] input: serde_json::Value, #[case] expected: &str) {
        let err = parse(input).unwrap_err();
        assert!(matches!(err, Error::InvalidPolicyFormat(_)), "{err:?}");
        assert!(err.to_string().contains(expected), "{err}");
    }

    #[test]
    fn test_constructor_validation() {
        assert!(PrSigstoreSigned::new(
            SigstoreKeySource::Fulcio(fulcio()),
            None,
            PolicyReferenceMatch::default()
        )
        .is_err());
        assert!(PrSigstoreSigned::new(
            SigstoreKeySource::Fulcio(fulcio()),
            Some(RekorKeySource::Data(b"rekor".to_vec())),
            PolicyReferenceMatch::default()
        )
        .is_ok());
        assert!(PrSigstoreSigned::new(
            SigstoreKeySource::KeyPaths(vec![]),
            None,
            PolicyReferenceMatch::default()
        )
        .is_err());
        assert!(PrSigstoreSignedFulcio::new(CertificateSource::Data(vec![]), "", "e").is_err());
        assert!(PrSigstoreSignedPki::new(CertificateSource::Data(vec![]), None, None, None).is_err());
    }

    #[test]
    fn test_prepare_trust_root() {
        let dir = tempfile::tempdir().unwrap();
        let key1 = dir.path().join("key1.pub");
        let key2 = dir.path().join("key2.pub");
        fs::write(&key1, "KEY1").unwrap();
        fs::write(&key2, "KEY2").unwrap();

        let pr = PrSigstoreSigned::new(
            SigstoreKeySource::KeyPaths(vec![key1.clone(), key2]),
            Some(RekorKeySource::Datas(vec![b"R1".to_vec(), b"R2".to_vec()])),
            PolicyReferenceMatch::default(),
        )
        .unwrap();
        assert_eq!(
            pr.prepare_trust_root().unwrap(),
            SigstoreTrustRoot::PublicKeys {
                public_keys: vec![PublicKeyPem(b"KEY1".to_vec()), PublicKeyPem(b"KEY2".to_vec())],
                rekor_public_keys: Some(vec![PublicKeyPem(b"R1".to_vec()), PublicKeyPem(b"R2".to_vec())]),
            }
        );

        let pr = PrSigstoreSigned::new(
            SigstoreKeySource::KeyPath(dir.path().join("missing.pub")),
            None,
            PolicyReferenceMatch::default(),
        )
        .unwrap();
        assert!(matches!(pr.prepare_trust_root(), Err(Error::Io { .. })));

        let pki = PrSigstoreSignedPki::new(
            CertificateSource::Path(key1),
            None,
            Some("user@example.com".into()),
            None,
        )
        .unwrap();
        let pr = PrSigstoreSigned::new(
            SigstoreKeySource::Pki(pki),
            None,
            PolicyReferenceMatch::default(),
        )
        .unwrap();
        assert_eq!(
            pr.prepare_trust_root().unwrap(),
            SigstoreTrustRoot::Pki(PkiTrustRoot {
                ca_roots_certificates: b"KEY1".to_vec(),
                ca_intermediate_certificates: None,
                subject_email: Some("user@example.com".into()),
                subject_hostname: None,
            })
        );

        let pr = PrSigstoreSigned::new(
            SigstoreKeySource::Fulcio(fulcio()),
            Some(RekorKeySource::Data(b"R".to_vec())),
            PolicyReferenceMatch::default(),
        )
        .unwrap();
        assert_eq!(
            pr.prepare_trust_root().unwrap(),
            SigstoreTrustRoot::Fulcio {
                fulcio: FulcioTrustRoot {
                    ca_certificates: b"ca".to_vec(),
                    oidc_issuer: "https://issuer.example.com".into(),
                    subject_email: "user@example.com".into(),
                },
                rekor_public_keys: vec![PublicKeyPem(b"R".to_vec())],
            }
        );
    }
}
