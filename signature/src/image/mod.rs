// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use anyhow::Result;

use crate::reference::DockerReference;

pub mod attachment;
pub mod docker;

pub use attachment::{SignatureAttachment, SigstoreAttachment};
pub use docker::DockerImageReference;

/// Default media type recorded for manifests handed to [`Image`].
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// The identity of an image within a transport, and the names it is
/// looked up under in a policy.
pub trait ImageReference {
    fn transport_name(&self) -> &str;

    /// The reference without the transport prefix.
    fn string_within_transport(&self) -> String;

    /// The most specific policy scope this image belongs to.
    fn policy_configuration_identity(&self) -> String;

    /// Less specific scopes, most specific first, excluding the identity
    /// itself and the transport-wide `""` scope.
    fn policy_configuration_namespaces(&self) -> Vec<String>;

    /// The docker reference identity of the image, if it has one.
    fn docker_reference(&self) -> Option<&DockerReference>;
}

/// `transport:reference`, for messages.
pub fn image_name(reference: &dyn ImageReference) -> String {
    format!(
        "{}:{}",
        reference.transport_name(),
        reference.string_within_transport()
    )
}

/// An image whose manifest and signatures are available but not yet
/// verified in any way.
pub trait UnparsedImage {
    fn reference(&self) -> &dyn ImageReference;

    /// The manifest bytes and their media type.
    fn manifest(&self) -> Result<(Vec<u8>, String)>;

    /// Signatures embedded with the image in the simple signing format.
    fn signatures(&self) -> Result<Vec<Vec<u8>>>;

    /// Every signature associated with the image, in any format.
    fn untrusted_signatures(&self) -> Result<Vec<SignatureAttachment>>;
}

// Image contains information about the image which may be used in signature verification.
pub struct Image {
    reference: Box<dyn ImageReference + Send + Sync>,
    manifest: Vec<u8>,
    manifest_media_type: String,
    signatures: Vec<SignatureAttachment>,
}

impl Image {
    pub fn new(reference: impl ImageReference + Send + Sync + 'static, manifest: Vec<u8>) -> Self {
        Image {
            reference: Box::new(reference),
            manifest,
            manifest_media_type: OCI_MANIFEST_MEDIA_TYPE.to_string(),
            signatures: Vec::new(),
        }
    }

    pub fn with_manifest_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.manifest_media_type = media_type.into();
        self
    }

    /// Add an embedded simple signing signature.
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signatures
            .push(SignatureAttachment::SimpleSigning(signature));
        self
    }

    pub fn with_sigstore_attachment(mut self, attachment: SigstoreAttachment) -> Self {
        self.signatures.push(SignatureAttachment::Sigstore(attachment));
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<SignatureAttachment>) -> Self {
        self.signatures.extend(attachments);
        self
    }
}

impl UnparsedImage for Image {
    fn reference(&self) -> &dyn ImageReference {
        self.reference.as_ref()
    }

    fn manifest(&self) -> Result<(Vec<u8>, String)> {
        Ok((self.manifest.clone(), self.manifest_media_type.clone()))
    }

    fn signatures(&self) -> Result<Vec<Vec<u8>>> {
        Ok(self
            .signatures
            .iter()
            .filter_map(|s| match s {
                SignatureAttachment::SimpleSigning(blob) => Some(blob.clone()),
                SignatureAttachment::Sigstore(_) => None,
            })
            .collect())
    }

    fn untrusted_signatures(&self) -> Result<Vec<SignatureAttachment>> {
        Ok(self.signatures.clone())
    }
}
