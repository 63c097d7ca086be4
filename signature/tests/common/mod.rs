// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, ensure, Result};
use base64::Engine;
use signature_policy::digest::manifest_digest;
use signature_policy::image::attachment::{
    SIGSTORE_SIGNATURE_ANNOTATION_KEY, SIGSTORE_SIGNATURE_MIME_TYPE,
};
use signature_policy::image::{DockerImageReference, SignatureAttachment, SigstoreAttachment};
use signature_policy::mechanism::{
    EphemeralMechanismFactory, FulcioTrustRoot, PkiTrustRoot, PublicKeyPem, SigningMechanism,
    SigstoreVerifier,
};
use signature_policy::payload::{UntrustedSignature, UntrustedSigstorePayload};
use signature_policy::{Image, TrustBackends};

pub const MANIFEST: &[u8] = br#"{"schemaVersion": 2, "mediaType": "application/vnd.oci.image.manifest.v1+json"}"#;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Keys are names; a signature blob is `<key>\n<payload>`. Only keys
/// imported through [`FakeFactory`] verify.
pub struct FakeMechanism {
    keys: Vec<String>,
}

impl SigningMechanism for FakeMechanism {
    fn supports_signing(&self) -> Result<()> {
        Ok(())
    }

    fn sign(&self, input: &[u8], key_identity: &str) -> Result<Vec<u8>> {
        let mut blob = format!("{key_identity}\n").into_bytes();
        blob.extend_from_slice(input);
        Ok(blob)
    }

    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let (payload, key) = self.untrusted_signature_contents(unverified_signature)?;
        ensure!(self.keys.contains(&key), "unknown key {key}");
        Ok((payload, key))
    }

    fn untrusted_signature_contents(&self, untrusted_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let text = std::str::from_utf8(untrusted_signature)?;
        let Some((key, payload)) = text.split_once('\n') else {
            bail!("malformed signature");
        };
        Ok((payload.as_bytes().to_vec(), key.to_string()))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Each line of a key blob is one key name.
pub struct FakeFactory;

impl EphemeralMechanismFactory for FakeFactory {
    fn new_ephemeral(&self, key_blobs: &[Vec<u8>]) -> Result<(Box<dyn SigningMechanism>, Vec<String>)> {
        let keys: Vec<String> = key_blobs
            .iter()
            .flat_map(|blob| {
                String::from_utf8_lossy(blob)
                    .lines()
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();
        Ok((Box::new(FakeMechanism { keys: keys.clone() }), keys))
    }
}

/// A sigstore signature is the public key it was made with.
pub struct FakeSigstoreVerifier;

impl SigstoreVerifier for FakeSigstoreVerifier {
    fn verify_payload_signature(
        &self,
        public_keys: &[PublicKeyPem],
        _payload: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        ensure!(
            public_keys.iter().any(|k| k.as_ref() == signature),
            "signature not made by a trusted key"
        );
        Ok(())
    }

    fn verify_rekor_set(
        &self,
        _rekor_keys: &[PublicKeyPem],
        _set: &[u8],
        _public_key: &PublicKeyPem,
        _base64_signature: &str,
        _payload: &[u8],
    ) -> Result<()> {
        bail!("Rekor is not supported by the fake verifier")
    }

    fn verify_fulcio(
        &self,
        _rekor_keys: &[PublicKeyPem],
        _fulcio: &FulcioTrustRoot,
        _set: &[u8],
        _certificate: &[u8],
        _intermediate_chain: Option<&[u8]>,
        _base64_signature: &str,
        _payload: &[u8],
    ) -> Result<PublicKeyPem> {
        bail!("Fulcio is not supported by the fake verifier")
    }

    fn verify_pki(
        &self,
        _pki: &PkiTrustRoot,
        _certificate: &[u8],
        _intermediate_chain: Option<&[u8]>,
    ) -> Result<PublicKeyPem> {
        bail!("PKI is not supported by the fake verifier")
    }
}

pub fn backends() -> TrustBackends {
    TrustBackends {
        gpg: Some(Arc::new(FakeFactory)),
        sigstore: Some(Arc::new(FakeSigstoreVerifier)),
    }
}

/// A simple signing signature by `key` claiming `reference` for `manifest`.
pub fn simple_signature(key: &str, manifest: &[u8], reference: &str) -> Vec<u8> {
    let payload = UntrustedSignature::new(manifest_digest(manifest), reference)
        .to_json()
        .unwrap();
    let mut blob = format!("{key}\n").into_bytes();
    blob.extend_from_slice(&payload);
    blob
}

/// A sigstore signature attachment by `key` claiming `reference` for `manifest`.
pub fn sigstore_signature(key: &str, manifest: &[u8], reference: &str) -> SignatureAttachment {
    let payload = UntrustedSigstorePayload::new(manifest_digest(manifest), reference)
        .to_json()
        .unwrap();
    let annotations = HashMap::from([(
        SIGSTORE_SIGNATURE_ANNOTATION_KEY.to_string(),
        base64::engine::general_purpose::STANDARD.encode(key),
    )]);
    SignatureAttachment::Sigstore(SigstoreAttachment::new(
        SIGSTORE_SIGNATURE_MIME_TYPE,
        payload,
        annotations,
    ))
}

/// An image named `reference` with [`MANIFEST`] and the given signatures.
pub fn image(reference: &str, signatures: Vec<SignatureAttachment>) -> Image {
    let reference = DockerImageReference::parse(reference).unwrap();
    Image::new(reference, MANIFEST.to_vec()).with_attachments(signatures)
}
