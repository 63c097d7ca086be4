// Copyright (c) 2022 Intel Corporation
//
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::str::FromStr;

use sha2::Digest as _;
use strum::{AsRefStr, Display, EnumString};
use thiserror::Error;

pub const DIGEST_SHA256_PREFIX: &str = "sha256:";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DigestError {
    #[error("invalid checksum digest format")]
    InvalidFormat,

    #[error("unsupported digest algorithm")]
    Unsupported,

    #[error("invalid checksum digest length")]
    InvalidLength,
}

#[derive(EnumString, Display, AsRefStr, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DigestAlgorithm {
    #[strum(serialize = "sha256")]
    Sha256,
    #[strum(serialize = "sha384")]
    Sha384,
    #[strum(serialize = "sha512")]
    Sha512,
}

impl DigestAlgorithm {
    fn hex_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 => 64,
            DigestAlgorithm::Sha384 => 96,
            DigestAlgorithm::Sha512 => 128,
        }
    }

    fn hasher(&self) -> ManifestDigestHasher {
        match self {
            DigestAlgorithm::Sha256 => ManifestDigestHasher::Sha256(sha2::Sha256::new()),
            DigestAlgorithm::Sha384 => ManifestDigestHasher::Sha384(sha2::Sha384::new()),
            DigestAlgorithm::Sha512 => ManifestDigestHasher::Sha512(sha2::Sha512::new()),
        }
    }
}

pub trait DigestHasher {
    fn digest_update(&mut self, buf: &[u8]);
    fn digest_finalize(self) -> String;
}

#[derive(Clone, Debug)]
pub enum ManifestDigestHasher {
    Sha256(sha2::Sha256),
    Sha384(sha2::Sha384),
    Sha512(sha2::Sha512),
}

impl DigestHasher for ManifestDigestHasher {
    fn digest_update(&mut self, buf: &[u8]) {
        match self {
            ManifestDigestHasher::Sha256(hasher) => hasher.update(buf),
            ManifestDigestHasher::Sha384(hasher) => hasher.update(buf),
            ManifestDigestHasher::Sha512(hasher) => hasher.update(buf),
        }
    }

    /// Lower-case hex, without the algorithm prefix.
    fn digest_finalize(self) -> String {
        match self {
            ManifestDigestHasher::Sha256(hasher) => hex::encode(hasher.finalize()),
            ManifestDigestHasher::Sha384(hasher) => hex::encode(hasher.finalize()),
            ManifestDigestHasher::Sha512(hasher) => hex::encode(hasher.finalize()),
        }
    }
}

/// A content digest in the `algorithm:hex` form used by OCI and docker.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    encoded: String,
}

impl Digest {
    /// Compute the digest of `data`.
    pub fn from_bytes(algorithm: DigestAlgorithm, data: &[u8]) -> Self {
        let mut hasher = algorithm.hasher();
        hasher.digest_update(data);
        Digest {
            algorithm,
            encoded: hasher.digest_finalize(),
        }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, encoded) = s.split_once(':').ok_or(DigestError::InvalidFormat)?;
        if algorithm.is_empty() || encoded.is_empty() {
            return Err(DigestError::InvalidFormat);
        }
        let algorithm = DigestAlgorithm::from_str(algorithm).map_err(|_| DigestError::Unsupported)?;
        if encoded.len() != algorithm.hex_len() {
            return Err(DigestError::InvalidLength);
        }
        if !encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(DigestError::InvalidFormat);
        }
        Ok(Digest {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl TryFrom<&str> for Digest {
    type Error = DigestError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

/// The digest a registry would use to address `manifest`.
pub fn manifest_digest(manifest: &[u8]) -> Digest {
    Digest::from_bytes(DigestAlgorithm::Sha256, manifest)
}

/// Whether `manifest` hashes to `expected`, using the algorithm of `expected`.
pub fn manifest_matches_digest(manifest: &[u8], expected: &Digest) -> bool {
    Digest::from_bytes(expected.algorithm, manifest) == *expected
}
