// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! GPG verification backed by sequoia-openpgp.
//!
//! Only verification is supported. Key identities are upper-case hex
//! fingerprints, matching what gpg reports.

use anyhow::{anyhow, bail, Result};
use openpgp::packet::key::{KeyParts, KeyRole};
use openpgp::packet::Key;
use openpgp::parse::Parse;
use openpgp::{Packet, PacketPile};
use sequoia_openpgp as openpgp;

use super::{EphemeralMechanismFactory, SigningMechanism, VerificationIdentityLookup};

/// Creates a [`SequoiaMechanism`] trusting the keys in the given keyrings.
#[derive(Clone, Copy, Debug, Default)]
pub struct SequoiaFactory;

impl EphemeralMechanismFactory for SequoiaFactory {
    fn new_ephemeral(
        &self,
        key_blobs: &[Vec<u8>],
    ) -> Result<(Box<dyn SigningMechanism>, Vec<String>)> {
        let keyrings = key_blobs
            .iter()
            .map(|blob| PacketPile::from_bytes(blob))
            .collect::<openpgp::Result<Vec<_>>>()
            .map_err(|e| anyhow!("Parsing public key ring failed: {e}"))?;

        let identities = keyrings
            .iter()
            .flat_map(|keyring| keyring.descendants())
            .filter_map(|packet| match packet {
                Packet::PublicKey(key) => Some(key.fingerprint().to_hex()),
                _ => None,
            })
            .collect();

        Ok((Box::new(SequoiaMechanism { keyrings }), identities))
    }
}

/// A verify-only [`SigningMechanism`] over a fixed set of public keyrings.
pub struct SequoiaMechanism {
    keyrings: Vec<PacketPile>,
}

// Path of the packets of a signed message, relative to its container:
// one-pass signature, literal data, signature.
const ONE_PASS_SIG_INDEX: usize = 0;
const LITERAL_INDEX: usize = 1;
const SIGNATURE_INDEX: usize = 2;

// gpg compresses signed messages by default; the packets then live inside
// the compressed data packet.
fn packet_path(message: &PacketPile, index: usize) -> Vec<usize> {
    match message.path_ref(&[0]) {
        Some(Packet::CompressedData(_)) => vec![0, index],
        _ => vec![index],
    }
}

fn signature_verifies<P: KeyParts, R: KeyRole>(message: &mut PacketPile, key: &Key<P, R>) -> bool {
    let path = packet_path(message, SIGNATURE_INDEX);
    match message.path_ref_mut(&path) {
        Some(Packet::Signature(signature)) => signature.verify_document(key).is_ok(),
        _ => false,
    }
}

fn literal_body(message: &PacketPile) -> Result<Vec<u8>> {
    match message.path_ref(&packet_path(message, LITERAL_INDEX)) {
        Some(Packet::Literal(literal)) => Ok(literal.body().to_vec()),
        _ => bail!("Signature format error: no literal field in it!"),
    }
}

impl SigningMechanism for SequoiaMechanism {
    fn supports_signing(&self) -> Result<()> {
        bail!("signing is not supported by the sequoia verification mechanism")
    }

    fn sign(&self, _input: &[u8], _key_identity: &str) -> Result<Vec<u8>> {
        self.supports_signing()?;
        bail!("signing is not supported by the sequoia verification mechanism")
    }

    fn verify(&self, unverified_signature: &[u8]) -> Result<(Vec<u8>, String)> {
        let mut message = PacketPile::from_bytes(unverified_signature)?;

        let mut signer = None;
        'keyrings: for keyring in &self.keyrings {
            for packet in keyring.descendants() {
                let verified = match packet {
                    Packet::PublicKey(key) => signature_verifies(&mut message, key)
                        .then(|| key.fingerprint().to_hex()),
                    Packet::PublicSubkey(key) => signature_verifies(&mut message, key)
                        .then(|| key.fingerprint().to_hex()),
                    _ => None,
                };
                if verified.is_some() {
                    signer = verified;
                    break 'keyrings;
                }
            }
        }

        let Some(signer) = signer else {
            bail!("signature verify failed! There is no pubkey can verify the signature!");
        };
        Ok((literal_body(&message)?, signer))
    }

    fn untrusted_signature_contents(
        &self,
        untrusted_signature: &[u8],
    ) -> Result<(Vec<u8>, String)> {
        let message = PacketPile::from_bytes(untrusted_signature)?;
        let short_key_identifier = match message.path_ref(&packet_path(&message, ONE_PASS_SIG_INDEX)) {
            Some(Packet::OnePassSig(sig_info)) => sig_info.issuer().to_hex(),
            _ => bail!("Signature format error: no one-pass signature in it!"),
        };
        Ok((literal_body(&message)?, short_key_identifier))
    }

    fn close(&mut self) -> Result<()> {
        self.keyrings.clear();
        Ok(())
    }

    fn as_identity_lookup(&self) -> Option<&dyn VerificationIdentityLookup> {
        Some(self)
    }
}

impl VerificationIdentityLookup for SequoiaMechanism {
    fn key_identity_for_verification_key_identity(&self, key_identity: &str) -> Result<String> {
        for keyring in &self.keyrings {
            let mut primary = None;
            for packet in keyring.descendants() {
                match packet {
                    Packet::PublicKey(key) => primary = Some(key.fingerprint().to_hex()),
                    Packet::PublicSubkey(key) if key.fingerprint().to_hex() == key_identity => {
                        if let Some(primary) = primary {
                            return Ok(primary);
                        }
                    }
                    _ => {}
                }
            }
        }
        bail!("no primary key found for key {key_identity}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_keyring() {
        let (mech, identities) = SequoiaFactory.new_ephemeral(&[]).unwrap();
        assert!(identities.is_empty());
        assert!(mech.supports_signing().is_err());
        assert!(mech.sign(b"payload", "KEY").is_err());
        assert!(mech
            .as_identity_lookup()
            .unwrap()
            .key_identity_for_verification_key_identity("KEY")
            .is_err());
    }

    #[test]
    fn test_garbage() {
        assert!(SequoiaFactory
            .new_ephemeral(&[b"not a keyring".to_vec()])
            .is_err());

        let (mut mech, _) = SequoiaFactory.new_ephemeral(&[]).unwrap();
        assert!(mech.verify(b"not a signature").is_err());
        assert!(mech.untrusted_signature_contents(b"not a signature").is_err());
        mech.close().unwrap();
    }
}
