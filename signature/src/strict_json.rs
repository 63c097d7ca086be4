// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Field-by-field JSON object parsing which refuses duplicate keys and,
//! where the caller asks for it, unknown keys.
//!
//! Values are kept as [`RawValue`] so that nested objects can be walked
//! with the same rules instead of being silently collapsed by a generic
//! map type.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;
use thiserror::Error;

use crate::error::Error;

#[derive(Error, Debug)]
pub enum JsonFormatError {
    #[error("{0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Duplicate key \"{0}\"")]
    DuplicateKey(String),

    #[error("Unknown key \"{0}\"")]
    UnknownKey(String),

    #[error("Key \"{0}\" missing in a JSON object")]
    MissingKey(String),

    #[error("invalid value of key \"{key}\": {source}")]
    InvalidValue {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

impl JsonFormatError {
    pub(crate) fn into_policy_error(self) -> Error {
        Error::InvalidPolicyFormat(self.to_string())
    }

    pub(crate) fn into_signature_error(self) -> Error {
        Error::InvalidSignature(self.to_string())
    }
}

/// A JSON object with its members in document order.
pub(crate) struct StrictObject {
    members: Vec<(String, Box<RawValue>)>,
}

impl<'de> Deserialize<'de> for StrictObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_map(StrictObjectVisitor)
    }
}

struct StrictObjectVisitor;

impl<'de> Visitor<'de> for StrictObjectVisitor {
    type Value = StrictObject;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON object")
    }

    fn visit_map<A>(self, mut json_map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut members = Vec::new();
        while let Some(key) = json_map.next_key::<String>()? {
            let value: Box<RawValue> = json_map.next_value()?;
            members.push((key, value));
        }
        Ok(StrictObject { members })
    }
}

impl StrictObject {
    pub fn parse(data: &str) -> Result<Self, JsonFormatError> {
        Self::check_unique(serde_json::from_str(data)?)
    }

    pub fn parse_slice(data: &[u8]) -> Result<Self, JsonFormatError> {
        Self::check_unique(serde_json::from_slice(data)?)
    }

    fn check_unique(object: StrictObject) -> Result<Self, JsonFormatError> {
        let mut seen = HashSet::new();
        for (key, _) in object.members.iter() {
            if !seen.insert(key.as_str()) {
                return Err(JsonFormatError::DuplicateKey(key.clone()));
            }
        }
        Ok(object)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(k, _)| k.as_str())
    }

    /// Members in document order.
    pub fn into_members(self) -> Vec<(String, Box<RawValue>)> {
        self.members
    }

    /// Accept any keys; unknown ones are simply never taken.
    pub fn into_fields(self) -> Fields {
        Fields(self.members.into_iter().collect())
    }

    /// Reject any key outside `allowed`. Keys in `allowed` are optional.
    pub fn only(self, allowed: &[&str]) -> Result<Fields, JsonFormatError> {
        if let Some(key) = self.keys().find(|k| !allowed.contains(k)) {
            return Err(JsonFormatError::UnknownKey(key.to_string()));
        }
        Ok(self.into_fields())
    }

    /// Require exactly the keys in `fields`.
    pub fn exact(self, fields: &[&str]) -> Result<Fields, JsonFormatError> {
        let res = self.only(fields)?;
        if let Some(missing) = fields.iter().find(|f| !res.0.contains_key(**f)) {
            return Err(JsonFormatError::MissingKey(missing.to_string()));
        }
        Ok(res)
    }
}

/// Members of a parsed object, taken one by one.
pub(crate) struct Fields(HashMap<String, Box<RawValue>>);

impl Fields {
    pub fn take<T: DeserializeOwned>(&mut self, key: &str) -> Result<Option<T>, JsonFormatError> {
        match self.0.remove(key) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw.get()).map(Some).map_err(|source| {
                JsonFormatError::InvalidValue {
                    key: key.to_string(),
                    source,
                }
            }),
        }
    }

    pub fn require<T: DeserializeOwned>(&mut self, key: &str) -> Result<T, JsonFormatError> {
        self.take(key)?
            .ok_or_else(|| JsonFormatError::MissingKey(key.to_string()))
    }

    pub fn take_raw(&mut self, key: &str) -> Option<Box<RawValue>> {
        self.0.remove(key)
    }

    pub fn require_raw(&mut self, key: &str) -> Result<Box<RawValue>, JsonFormatError> {
        self.take_raw(key)
            .ok_or_else(|| JsonFormatError::MissingKey(key.to_string()))
    }
}

/// Interpret a JSON number as whole seconds, refusing fractional values.
pub(crate) fn integer_value(n: &serde_json::Number) -> Option<i64> {
    if let Some(i) = n.as_i64() {
        return Some(i);
    }
    if n.is_u64() {
        return None;
    }
    let f = n.as_f64()?;
    // i64::MAX as f64 rounds up to 2^63, which is out of range.
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}
