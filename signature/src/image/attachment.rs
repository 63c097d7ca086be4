// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::HashMap;

/// MIME type of sigstore attachments which carry an image signature.
pub const SIGSTORE_SIGNATURE_MIME_TYPE: &str = "application/vnd.dev.cosign.simplesigning.v1+json";

/// Annotation holding the base64-encoded signature of the payload.
pub const SIGSTORE_SIGNATURE_ANNOTATION_KEY: &str = "dev.cosignproject.cosign/signature";

/// Annotation holding the PEM certificate of the signing key.
pub const SIGSTORE_CERTIFICATE_ANNOTATION_KEY: &str = "dev.sigstore.cosign/certificate";

/// Annotation holding PEM intermediate certificates for the signing certificate.
pub const SIGSTORE_INTERMEDIATE_CERTIFICATE_CHAIN_ANNOTATION_KEY: &str = "dev.sigstore.cosign/chain";

/// Annotation holding the Rekor signed entry timestamp (SET).
pub const SIGSTORE_SET_ANNOTATION_KEY: &str = "dev.sigstore.cosign/bundle";

/// A signature stored with an image, in any of the supported formats.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignatureAttachment {
    /// A signature blob embedded with the image (the "atomic" / simple signing format).
    SimpleSigning(Vec<u8>),
    /// A detached sigstore attachment.
    Sigstore(SigstoreAttachment),
}

/// A sigstore attachment. Nothing in it has been verified.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SigstoreAttachment {
    mime_type: String,
    payload: Vec<u8>,
    annotations: HashMap<String, String>,
}

impl SigstoreAttachment {
    pub fn new(
        mime_type: impl Into<String>,
        payload: Vec<u8>,
        annotations: HashMap<String, String>,
    ) -> Self {
        SigstoreAttachment {
            mime_type: mime_type.into(),
            payload,
            annotations,
        }
    }

    pub fn untrusted_mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn untrusted_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn untrusted_annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }
}
