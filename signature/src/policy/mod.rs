// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::ops::Deref;
use std::path::Path;
use std::str::FromStr;

use base64::Engine;
use log::debug;
use serde::Serialize;
use serde_json::value::RawValue;

use crate::config::PolicyConfig;
use crate::error::{Error, Result};
use crate::image::ImageReference;
use crate::strict_json::{Fields, JsonFormatError, StrictObject};

mod policy_requirement;
mod ref_match;
mod sigstore;

pub use policy_requirement::{
    KeyType, PolicyRequirement, PrSignedBaseLayer, PrSignedBy, PrType, SignedByKeySource,
};
pub use ref_match::{
    PolicyReferenceMatch, PrmExactReference, PrmExactRepository, PrmRemapIdentity, PrmType,
};
pub use sigstore::{
    CertificateSource, PrSigstoreSigned, PrSigstoreSignedFulcio, PrSigstoreSignedPki,
    RekorKeySource, SigstoreKeySource, SigstoreTrustRoot,
};

// Policy defines requirements for considering a signature, or an image, valid.
// The format is defined in https://github.com/containers/image/blob/main/docs/containers-policy.json.5.md
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Policy {
    // `default` applies to any image which does not have a matching policy in Transports.
    // Note that this can happen even if a matching `PolicyTransportScopes` exists in `transports`.
    default: PolicyRequirements,
    transports: HashMap<String, PolicyTransportScopes>,
}

/// Requirements per scope of one transport. The `""` scope applies to the
/// whole transport.
pub type PolicyTransportScopes = HashMap<String, PolicyRequirements>;

/// A non-empty list of requirements, all of which must be satisfied.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PolicyRequirements(Vec<PolicyRequirement>);

impl PolicyRequirements {
    pub fn new(requirements: Vec<PolicyRequirement>) -> Result<Self> {
        if requirements.is_empty() {
            return Err(Error::invalid_policy(
                "List of verification policy requirements must not be empty",
            ));
        }
        Ok(PolicyRequirements(requirements))
    }

    pub(crate) fn from_json(data: &str) -> Result<Self> {
        let raw_requirements: Vec<Box<RawValue>> =
            serde_json::from_str(data).map_err(|e| Error::invalid_policy(e.to_string()))?;
        let requirements = raw_requirements
            .iter()
            .map(|raw| PolicyRequirement::from_json(raw.get()))
            .collect::<Result<Vec<_>>>()?;
        Self::new(requirements)
    }
}

impl Deref for PolicyRequirements {
    type Target = [PolicyRequirement];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Policy {
    pub fn new(default: PolicyRequirements) -> Self {
        Policy {
            default,
            transports: HashMap::new(),
        }
    }

    pub fn with_transport_scopes(mut self, transport: &str, scopes: PolicyTransportScopes) -> Self {
        self.transports.insert(transport.to_string(), scopes);
        self
    }

    pub fn default_requirements(&self) -> &PolicyRequirements {
        &self.default
    }

    pub fn transports(&self) -> &HashMap<String, PolicyTransportScopes> {
        &self.transports
    }

    /// Strictly parse a policy document: unknown or duplicate keys anywhere
    /// fail the whole parse.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let policy_err = JsonFormatError::into_policy_error;
        let mut fields = StrictObject::parse_slice(data)
            .and_then(|o| o.only(&["default", "transports"]))
            .map_err(policy_err)?;

        let Some(default) = fields.take_raw("default") else {
            return Err(Error::invalid_policy("Default policy is missing"));
        };
        let default = PolicyRequirements::from_json(default.get())?;

        let transports = fields.require_raw("transports").map_err(policy_err)?;
        let transports = parse_transports(transports.get())?;

        Ok(Policy {
            default,
            transports,
        })
    }

    // Parse the JSON file of policy (policy.json).
    pub fn from_file(file_path: impl AsRef<Path>) -> Result<Self> {
        let file_path = file_path.as_ref();
        let content = fs::read(file_path).map_err(|e| Error::read_file(file_path, e))?;
        Self::from_bytes(&content).map_err(|e| Error::InvalidPolicyFile {
            source: Box::new(e),
            path: file_path.to_path_buf(),
        })
    }

    /// The policy configured for the system, see
    /// [`PolicyConfig::default_policy_path`].
    pub fn default_policy(config: &PolicyConfig) -> Result<Self> {
        Self::from_file(config.default_policy_path()?)
    }

    // selects the appropriate requirements for the image from Policy.
    pub fn requirements_for_image(&self, reference: &dyn ImageReference) -> &PolicyRequirements {
        let transport_name = reference.transport_name();

        if let Some(transport_scopes) = self.transports.get(transport_name) {
            // Look for a full match.
            let identity = reference.policy_configuration_identity();
            if let Some(reqs) = transport_scopes.get(&identity) {
                debug!(" Using transport {transport_name:?} policy section {identity:?}");
                return reqs;
            }

            // Look for a match of the possible parent namespaces.
            for name in reference.policy_configuration_namespaces() {
                if let Some(reqs) = transport_scopes.get(&name) {
                    debug!(" Using transport {transport_name:?} specific policy section {name:?}");
                    return reqs;
                }
            }

            // Look for a default match for the transport.
            if let Some(reqs) = transport_scopes.get("") {
                debug!(" Using transport {transport_name:?} policy section \"\"");
                return reqs;
            }
        }

        debug!(" Using default policy section");
        &self.default
    }
}

impl FromStr for Policy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_bytes(s.as_bytes())
    }
}

fn parse_transports(data: &str) -> Result<HashMap<String, PolicyTransportScopes>> {
    let policy_err = JsonFormatError::into_policy_error;
    let mut transports = HashMap::new();
    for (transport, scopes) in StrictObject::parse(data).map_err(policy_err)?.into_members() {
        let mut parsed_scopes = HashMap::new();
        for (scope, requirements) in StrictObject::parse(scopes.get())
            .map_err(policy_err)?
            .into_members()
        {
            parsed_scopes.insert(scope, PolicyRequirements::from_json(requirements.get())?);
        }
        transports.insert(transport, parsed_scopes);
    }
    Ok(transports)
}

// Reads the `type` member used to dispatch to a variant. A missing member
// reads as "", which no variant accepts.
pub(crate) fn type_field(data: &str) -> Result<String> {
    let mut fields = StrictObject::parse(data)
        .map_err(JsonFormatError::into_policy_error)?
        .into_fields();
    Ok(fields
        .take::<String>("type")
        .map_err(JsonFormatError::into_policy_error)?
        .unwrap_or_default())
}

pub(crate) fn check_type(found: &str, expected: impl fmt::Display) -> Result<()> {
    if found != expected.to_string() {
        return Err(Error::invalid_policy(format!(
            "Unexpected policy requirement type {found:?}"
        )));
    }
    Ok(())
}

pub(crate) fn take<T: serde::de::DeserializeOwned>(
    fields: &mut Fields,
    key: &str,
) -> Result<Option<T>> {
    fields.take(key).map_err(JsonFormatError::into_policy_error)
}

fn decode_base64(key: &str, data: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| Error::invalid_policy(format!("invalid value of key {key:?}: {e}")))
}

/// A base64 encoded binary member.
pub(crate) fn take_base64(fields: &mut Fields, key: &str) -> Result<Option<Vec<u8>>> {
    take::<String>(fields, key)?
        .map(|data| decode_base64(key, &data))
        .transpose()
}

/// A list of base64 encoded binary members.
pub(crate) fn take_base64_list(fields: &mut Fields, key: &str) -> Result<Option<Vec<Vec<u8>>>> {
    take::<Vec<String>>(fields, key)?
        .map(|list| list.iter().map(|data| decode_base64(key, data)).collect())
        .transpose()
}
