// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! # Overall
//! Evaluation of container image signature policies, following the
//! `policy.json` format of containers/image.
//!
//! # Interfaces
//! #### Policy
//! A [`Policy`] is the trust configuration: a default list of requirements
//! plus per-transport, per-scope overrides. It is parsed strictly from a
//! `policy.json` document, or constructed programmatically.
//!
//! #### PolicyContext
//! A [`PolicyContext`] applies a policy to images: whether an image may
//! run, and which of its signatures have an accepted author.
//!
//! #### Image
//! Images are consumed through the [`UnparsedImage`] trait. [`Image`] is an
//! in-memory implementation for callers which already fetched the manifest
//! and signatures.
//!
//! #### Mechanisms
//! Cryptography is injected through [`TrustBackends`]: a
//! [`mechanism::EphemeralMechanismFactory`] for GPG signatures and a
//! [`mechanism::SigstoreVerifier`] for sigstore signatures. The
//! `signature-simple` feature provides a sequoia-openpgp backed GPG
//! verifier.

pub mod config;
pub mod context;
pub mod digest;
pub mod error;
mod evaluate;
pub mod image;
pub mod mechanism;
pub mod payload;
pub mod policy;
pub mod reference;
mod strict_json;

pub use config::PolicyConfig;
pub use context::{ContextState, PolicyContext, TrustBackends};
pub use error::{Error, Result};
pub use evaluate::SignatureAcceptanceResult;
pub use image::{Image, ImageReference, UnparsedImage};
pub use payload::Signature;
pub use policy::{Policy, PolicyReferenceMatch, PolicyRequirement, PolicyRequirements};
