// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The policy document or a programmatic policy constructor is malformed.
    #[error("invalid policy format: {0}")]
    InvalidPolicyFormat(String),

    /// A policy requirement was evaluated and rejected the image or signature.
    #[error("{0}")]
    PolicyRequirement(String),

    /// A signature blob or its payload is malformed or not acceptable.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("signing not supported: {0}")]
    SigningNotSupported(String),

    #[error("Invalid PolicyContext state, expected \"{expected}\", found \"{found}\"")]
    InvalidContextState {
        expected: crate::context::ContextState,
        found: crate::context::ContextState,
    },

    /// A consistency check that should never fail did.
    #[error("{0}")]
    Internal(String),

    #[error("invalid policy in {path:?}: {source}")]
    InvalidPolicyFile {
        #[source]
        source: Box<Error>,
        path: PathBuf,
    },

    #[error("failed to read {path:?}")]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("no policy.json file found at any of the following: {candidates:?}")]
    NoPolicyFile { candidates: Vec<PathBuf> },

    #[error("failed to parse config file")]
    Config {
        #[source]
        source: toml::de::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// Errors raised by an injected signing mechanism or verifier, unchanged.
    #[error(transparent)]
    Mechanism(anyhow::Error),

    /// Errors raised while reading image data, unchanged.
    #[error(transparent)]
    Image(anyhow::Error),
}

impl Error {
    pub(crate) fn policy_requirement(msg: impl Into<String>) -> Self {
        Error::PolicyRequirement(msg.into())
    }

    pub(crate) fn invalid_policy(msg: impl Into<String>) -> Self {
        Error::InvalidPolicyFormat(msg.into())
    }

    pub(crate) fn invalid_signature(msg: impl Into<String>) -> Self {
        Error::InvalidSignature(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub(crate) fn read_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            source,
            path: path.into(),
        }
    }
}
