// Copyright (c) 2022 Alibaba Cloud
//
// SPDX-License-Identifier: Apache-2.0
//

//! Evaluating a [`Policy`] against images.

use std::cell::Cell;
use std::fmt;
use std::sync::Arc;

use log::debug;
use strum::Display;

use crate::error::{Error, Result};
use crate::evaluate::SignatureAcceptanceResult;
use crate::image::{ImageReference, UnparsedImage};
use crate::mechanism::{EphemeralMechanismFactory, SigstoreVerifier};
use crate::payload::Signature;
use crate::policy::{Policy, PolicyRequirements};

/// Lifecycle of a [`PolicyContext`].
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum ContextState {
    Initializing,
    Ready,
    InUse,
    Destroying,
    Destroyed,
}

/// The cryptographic backends requirements verify signatures with.
///
/// A requirement whose backend is missing rejects every signature.
#[derive(Clone, Default)]
pub struct TrustBackends {
    /// Imports the keys of `signedBy` requirements.
    pub gpg: Option<Arc<dyn EphemeralMechanismFactory + Send + Sync>>,
    /// Verifies `sigstoreSigned` requirements.
    pub sigstore: Option<Arc<dyn SigstoreVerifier + Send + Sync>>,
}

impl fmt::Debug for TrustBackends {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustBackends")
            .field("gpg", &self.gpg.is_some())
            .field("sigstore", &self.sigstore.is_some())
            .finish()
    }
}

/// A [`Policy`] ready to be applied to images.
///
/// A context is for use by a single caller at a time. Calls which overlap,
/// e.g. from an image implementation calling back into the context, fail
/// with [`Error::InvalidContextState`] instead of being serialized. Create
/// one context per thread over a shared `Arc<Policy>` to evaluate
/// concurrently.
#[derive(Debug)]
pub struct PolicyContext {
    policy: Arc<Policy>,
    backends: TrustBackends,
    state: Cell<ContextState>,
}

fn policy_identity_log_name(reference: &dyn ImageReference) -> String {
    format!(
        "{}:{}",
        reference.transport_name(),
        reference.policy_configuration_identity()
    )
}

// Puts an in-use context back to Ready, also when the evaluation unwinds.
struct InUseGuard<'a> {
    context: &'a PolicyContext,
}

impl InUseGuard<'_> {
    fn release(self) -> Result<()> {
        let res = self
            .context
            .change_state(ContextState::InUse, ContextState::Ready);
        std::mem::forget(self);
        res
    }
}

impl Drop for InUseGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .context
            .change_state(ContextState::InUse, ContextState::Ready);
    }
}

impl PolicyContext {
    pub fn new(policy: impl Into<Arc<Policy>>, backends: TrustBackends) -> Result<Self> {
        let context = PolicyContext {
            policy: policy.into(),
            backends,
            state: Cell::new(ContextState::Initializing),
        };
        context.change_state(ContextState::Initializing, ContextState::Ready)?;
        Ok(context)
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn state(&self) -> ContextState {
        self.state.get()
    }

    fn change_state(&self, expected: ContextState, new: ContextState) -> Result<()> {
        let found = self.state.get();
        if found != expected {
            return Err(Error::InvalidContextState { expected, found });
        }
        self.state.set(new);
        Ok(())
    }

    // Runs `f` with the context marked in use.
    fn with_in_use<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.change_state(ContextState::Ready, ContextState::InUse)?;
        let guard = InUseGuard { context: self };
        let res = f();
        guard.release()?;
        res
    }

    /// Release the context. Any later use fails.
    pub fn destroy(&self) -> Result<()> {
        self.change_state(ContextState::Ready, ContextState::Destroying)?;
        self.change_state(ContextState::Destroying, ContextState::Destroyed)
    }

    fn requirements_for_image(&self, reference: &dyn ImageReference) -> &PolicyRequirements {
        self.policy.requirements_for_image(reference)
    }

    /// The signatures embedded with `image` whose author every applicable
    /// requirement accepts, or at least one accepts and none rejects.
    ///
    /// A signature is only returned if some requirement positively
    /// accepted it: requirements which do not look at signatures (like
    /// `insecureAcceptAnything`) never make a signature acceptable on their
    /// own. Rejected signatures are skipped, not reported as errors.
    pub fn get_signatures_with_accepted_author(
        &self,
        image: &dyn UnparsedImage,
    ) -> Result<Vec<Signature>> {
        self.with_in_use(|| {
            debug!(
                "GetSignaturesWithAcceptedAuthor for image {}",
                policy_identity_log_name(image.reference())
            );
            let reqs = self.requirements_for_image(image.reference());
            let unverified_signatures = image.signatures().map_err(Error::Image)?;

            let mut accepted = Vec::with_capacity(unverified_signatures.len());
            for (sig_number, sig) in unverified_signatures.iter().enumerate() {
                debug!("Evaluating signature {sig_number}:");
                match self.evaluate_signature_author(reqs, image, sig) {
                    Some(signature) => {
                        debug!(" Overall: OK, signature accepted");
                        accepted.push(signature);
                    }
                    None => debug!(" Overall: Signature not accepted"),
                }
            }
            Ok(accepted)
        })
    }

    fn evaluate_signature_author(
        &self,
        reqs: &PolicyRequirements,
        image: &dyn UnparsedImage,
        sig: &[u8],
    ) -> Option<Signature> {
        let mut accepted_sig: Option<Signature> = None;
        for (req_number, req) in reqs.iter().enumerate() {
            let decision = req.is_signature_author_accepted(&self.backends, image, sig);
            match decision.result {
                SignatureAcceptanceResult::Accepted => {
                    let Some(signature) = decision.signature else {
                        debug!(" Requirement {req_number}: internal inconsistency: signatureAccepted but no parsed contents");
                        return None;
                    };
                    debug!(" Requirement {req_number}: signature accepted");
                    match &accepted_sig {
                        None => accepted_sig = Some(signature),
                        Some(previous) if *previous != signature => {
                            debug!(" Requirement {req_number}: internal inconsistency: signatureAccepted but different parsed contents");
                            return None;
                        }
                        Some(_) => {}
                    }
                }
                SignatureAcceptanceResult::Rejected => {
                    match decision.error {
                        Some(e) => debug!(" Requirement {req_number}: signature rejected: {e}"),
                        None => debug!(" Requirement {req_number}: signature rejected"),
                    }
                    return None;
                }
                SignatureAcceptanceResult::Unknown => {
                    if let Some(e) = decision.error {
                        debug!(" Requirement {req_number}: internal inconsistency: signatureUnknown but an error message {e}");
                        return None;
                    }
                    debug!(" Requirement {req_number}: signature state unknown, continuing");
                }
            }
        }
        accepted_sig
    }

    /// Whether `image` may run. A denial is returned as the error explaining
    /// it, so `Ok(false)` is never returned.
    ///
    /// Every applicable requirement must allow the image.
    pub fn is_running_image_allowed(&self, image: &dyn UnparsedImage) -> Result<bool> {
        self.with_in_use(|| {
            debug!(
                "IsRunningImageAllowed for image {}",
                policy_identity_log_name(image.reference())
            );
            let reqs = self.requirements_for_image(image.reference());
            if reqs.is_empty() {
                return Err(Error::policy_requirement(
                    "List of verification policy requirements must not be empty",
                ));
            }

            for (req_number, req) in reqs.iter().enumerate() {
                if let Err(e) = req.is_running_image_allowed(&self.backends, image) {
                    debug!("Requirement {req_number}: denied, done");
                    return Err(e);
                }
                debug!(" Requirement {req_number}: allowed");
            }
            debug!("Overall: allowed");
            Ok(true)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::AssertUnwindSafe;

    use crate::image::{DockerImageReference, Image, SignatureAttachment};
    use crate::policy::PolicyRequirement;
    use rstest::rstest;

    fn policy(reqs: Vec<PolicyRequirement>) -> Policy {
        Policy::new(PolicyRequirements::new(reqs).unwrap())
    }

    fn image() -> Image {
        let reference = DockerImageReference::parse("busybox").unwrap();
        Image::new(reference, b"{}".to_vec()).with_signature(b"sig".to_vec())
    }

    #[test]
    fn test_lifecycle() {
        let pc = PolicyContext::new(
            policy(vec![PolicyRequirement::InsecureAcceptAnything]),
            TrustBackends::default(),
        )
        .unwrap();
        assert_eq!(pc.state(), ContextState::Ready);
        assert!(pc.is_running_image_allowed(&image()).unwrap());
        assert_eq!(pc.state(), ContextState::Ready);

        pc.destroy().unwrap();
        assert_eq!(pc.state(), ContextState::Destroyed);

        let err = pc.destroy().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid PolicyContext state, expected \"Ready\", found \"Destroyed\""
        );
        assert!(matches!(
            pc.is_running_image_allowed(&image()),
            Err(Error::InvalidContextState {
                expected: ContextState::Ready,
                found: ContextState::Destroyed
            })
        ));
        assert!(pc.get_signatures_with_accepted_author(&image()).is_err());
    }

    #[test]
    fn test_reentrant_use_fails() {
        let pc = PolicyContext::new(
            policy(vec![PolicyRequirement::InsecureAcceptAnything]),
            TrustBackends::default(),
        )
        .unwrap();
        let nested = pc.with_in_use(|| Ok(pc.is_running_image_allowed(&image())));
        assert!(matches!(
            nested.unwrap(),
            Err(Error::InvalidContextState {
                expected: ContextState::Ready,
                found: ContextState::InUse
            })
        ));
        assert_eq!(pc.state(), ContextState::Ready);
    }

    struct PanickingImage(Image);

    impl UnparsedImage for PanickingImage {
        fn reference(&self) -> &dyn ImageReference {
            self.0.reference()
        }

        fn manifest(&self) -> anyhow::Result<(Vec<u8>, String)> {
            panic!("manifest unavailable")
        }

        fn signatures(&self) -> anyhow::Result<Vec<Vec<u8>>> {
            panic!("signatures unavailable")
        }

        fn untrusted_signatures(&self) -> anyhow::Result<Vec<SignatureAttachment>> {
            panic!("signatures unavailable")
        }
    }

    #[test]
    fn test_state_restored_after_panic() {
        let pc = PolicyContext::new(
            policy(vec![PolicyRequirement::InsecureAcceptAnything]),
            TrustBackends::default(),
        )
        .unwrap();
        let panicking = PanickingImage(image());
        let res = std::panic::catch_unwind(AssertUnwindSafe(|| {
            pc.get_signatures_with_accepted_author(&panicking)
        }));
        assert!(res.is_err());
        assert_eq!(pc.state(), ContextState::Ready);
        assert!(pc.is_running_image_allowed(&image()).unwrap());
    }

    #[rstest]
    #[case(vec![PolicyRequirement::InsecureAcceptAnything], true)]
    #[case(vec![PolicyRequirement::Reject], false)]
    #[case(vec![PolicyRequirement::InsecureAcceptAnything, PolicyRequirement::Reject], false)]
    #[case(vec![PolicyRequirement::Reject, PolicyRequirement::InsecureAcceptAnything], false)]
    #[case(vec![PolicyRequirement::InsecureAcceptAnything; 3], true)]
    fn test_running_image_and_semantics(
        #[case] reqs: Vec<PolicyRequirement>,
        #[case] allowed: bool,
    ) {
        let pc = PolicyContext::new(policy(reqs), TrustBackends::default()).unwrap();
        match pc.is_running_image_allowed(&image()) {
            Ok(res) => assert!(res && allowed),
            Err(e) => {
                assert!(!allowed);
                assert!(matches!(e, Error::PolicyRequirement(_)));
                assert_eq!(
                    e.to_string(),
                    "Running image docker://docker.io/library/busybox:latest is rejected by policy."
                );
            }
        }
    }

    #[rstest]
    #[case(vec![PolicyRequirement::InsecureAcceptAnything])]
    #[case(vec![PolicyRequirement::Reject])]
    #[case(vec![PolicyRequirement::InsecureAcceptAnything, PolicyRequirement::Reject])]
    fn test_unknown_is_not_accepted(#[case] reqs: Vec<PolicyRequirement>) {
        let pc = PolicyContext::new(policy(reqs), TrustBackends::default()).unwrap();
        assert!(pc.get_signatures_with_accepted_author(&image()).unwrap().is_empty());
    }
}
