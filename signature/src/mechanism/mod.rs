// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Cryptographic backends consumed by the policy engine.
//!
//! The engine never implements signature algorithms itself. GPG-style
//! signatures go through a [`SigningMechanism`], usually created per
//! evaluation by an [`EphemeralMechanismFactory`] from the keys named in
//! the policy. Sigstore signatures go through a [`SigstoreVerifier`].

use anyhow::Result;

#[cfg(feature = "signature-simple")]
pub mod simple;

/// A PEM-encoded public key, passed through to a [`SigstoreVerifier`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKeyPem(pub Vec<u8>);

impl AsRef<[u8]> for PublicKeyPem {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

pub trait SigningMechanism {
    /// Returns an error if this mechanism cannot sign at all, e.g. because
    /// it only holds public keys.
    fn supports_signing(&self) -> Result<()>;

    /// Create a signature over `input` using the key `key_identity`.
    fn sign(&self, input: &[u8], key_identity: &str) -> Result<Vec<u8>>;

    /// Verify `unverified_signature` and return the signed content and the
    /// identity of the key which made the signature.
    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)>;

    /// Extract the content and a short key identifier WITHOUT verifying
    /// anything. Never use the result for a security decision.
    fn untrusted_signature_contents(&self, untrusted_signature: &[u8])
        -> Result<(Vec<u8>, String)>;

    /// Release any resources held by the mechanism.
    fn close(&mut self) -> Result<()>;

    fn as_passphrase_signer(&self) -> Option<&dyn PassphraseSigningMechanism> {
        None
    }

    fn as_identity_lookup(&self) -> Option<&dyn VerificationIdentityLookup> {
        None
    }
}

/// Mechanisms which can unlock a signing key with a passphrase.
pub trait PassphraseSigningMechanism {
    fn sign_with_passphrase(
        &self,
        input: &[u8],
        key_identity: &str,
        passphrase: &str,
    ) -> Result<Vec<u8>>;
}

/// Mechanisms which may report a subkey as the signer, and can map it
/// back to its primary key.
pub trait VerificationIdentityLookup {
    fn key_identity_for_verification_key_identity(&self, key_identity: &str) -> Result<String>;
}

/// Creates a [`SigningMechanism`] which trusts exactly the imported keys.
pub trait EphemeralMechanismFactory {
    /// Import each blob (each may hold several keys) and return the
    /// mechanism with the identities of all imported keys.
    fn new_ephemeral(
        &self,
        key_blobs: &[Vec<u8>],
    ) -> Result<(Box<dyn SigningMechanism>, Vec<String>)>;
}

/// Fulcio trust settings prepared from a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FulcioTrustRoot {
    /// PEM bundle of trusted Fulcio CA certificates.
    pub ca_certificates: Vec<u8>,
    pub oidc_issuer: String,
    pub subject_email: String,
}

/// X.509 PKI trust settings prepared from a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PkiTrustRoot {
    /// PEM bundle of trusted root CA certificates.
    pub ca_roots_certificates: Vec<u8>,
    /// PEM bundle of trusted intermediate certificates, if configured.
    pub ca_intermediate_certificates: Option<Vec<u8>>,
    pub subject_email: Option<String>,
    pub subject_hostname: Option<String>,
}

/// Sigstore cryptography: payload signatures, Rekor SETs and certificate
/// chains. All inputs are untrusted.
pub trait SigstoreVerifier {
    /// Succeeds if `signature` over `payload` was made by any of `public_keys`.
    fn verify_payload_signature(
        &self,
        public_keys: &[PublicKeyPem],
        payload: &[u8],
        signature: &[u8],
    ) -> Result<()>;

    /// Succeeds if `set` is a Rekor SET, signed by one of `rekor_keys`,
    /// recording `base64_signature` of `payload` by `public_key`.
    fn verify_rekor_set(
        &self,
        rekor_keys: &[PublicKeyPem],
        set: &[u8],
        public_key: &PublicKeyPem,
        base64_signature: &str,
        payload: &[u8],
    ) -> Result<()>;

    /// Verify a Fulcio-issued certificate (with its Rekor SET) and return
    /// the public key it certifies.
    #[allow(clippy::too_many_arguments)]
    fn verify_fulcio(
        &self,
        rekor_keys: &[PublicKeyPem],
        fulcio: &FulcioTrustRoot,
        set: &[u8],
        certificate: &[u8],
        intermediate_chain: Option<&[u8]>,
        base64_signature: &str,
        payload: &[u8],
    ) -> Result<PublicKeyPem>;

    /// Verify a certificate against a PKI trust root and return the public
    /// key it certifies.
    fn verify_pki(
        &self,
        pki: &PkiTrustRoot,
        certificate: &[u8],
        intermediate_chain: Option<&[u8]>,
    ) -> Result<PublicKeyPem>;
}
