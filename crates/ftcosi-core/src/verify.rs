//! Verifying a finished round's aggregate signature against a completion
//! policy.
//!
//! This is the only place the protocol decides "did this round succeed" —
//! everything upstream (tree building, subtree collection, root orchestration)
//! just produces an aggregate signature and a mask; this module is where that
//! pair is turned into an accept/reject decision.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::crypto::{self, CryptoError, PublicKey};
use crate::final_signature::{FinalSignature, FinalSignatureError};
use crate::mask::{Mask, MaskError};

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("final signature bytes shorter than the {expected}-byte G1 point: got {got}")]
    MalformedSignature { expected: usize, got: usize },
    #[error("mask bytes malformed: {0}")]
    MalformedMask(MaskError),
    #[error("policy not satisfied: {0}")]
    PolicyNotSatisfied(String),
    #[error("pairing check failed: the aggregate signature does not verify under the aggregate key")]
    InvalidSignature,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl From<FinalSignatureError> for VerifyError {
    fn from(err: FinalSignatureError) -> Self {
        match err {
            FinalSignatureError::MalformedSignature { expected, got } => {
                VerifyError::MalformedSignature { expected, got }
            }
        }
    }
}

/// A completion policy decides, from a mask alone, whether a round counts as
/// successful before the (expensive) pairing check is even attempted.
pub trait Policy: std::fmt::Debug {
    /// Return `Ok(())` if `mask` satisfies this policy, or an error
    /// describing why not.
    fn check(&self, mask: &Mask) -> Result<(), String>;
}

/// Every roster member must have signed.
#[derive(Debug, Clone, Copy, Default)]
pub struct Complete;

impl Policy for Complete {
    fn check(&self, mask: &Mask) -> Result<(), String> {
        if mask.count_enabled() == mask.count_total() {
            Ok(())
        } else {
            Err(format!(
                "{} of {} members signed, all were required",
                mask.count_enabled(),
                mask.count_total()
            ))
        }
    }
}

/// At least `0` signers are required (a simple numeric floor).
#[derive(Debug, Clone, Copy)]
pub struct Threshold(pub usize);

impl Policy for Threshold {
    fn check(&self, mask: &Mask) -> Result<(), String> {
        if mask.count_enabled() >= self.0 {
            Ok(())
        } else {
            Err(format!(
                "{} of {} members signed, at least {} were required",
                mask.count_enabled(),
                mask.count_total(),
                self.0
            ))
        }
    }
}

/// Verify a round's final aggregate signature.
///
/// Steps (§4.D): split `final_bytes` into a signature point and mask bytes,
/// rebuild the mask against `roster_publics`, check it against `policy`,
/// then — only if the policy passed — run the pairing check of the
/// aggregate signature under the mask's aggregate public key. An empty mask
/// (nobody signed) is rejected outright since there is no aggregate key to
/// pair against.
pub fn verify(
    roster_publics: Arc<[PublicKey]>,
    message: &[u8],
    final_bytes: &[u8],
    policy: &dyn Policy,
) -> Result<Mask, VerifyError> {
    let span = tracing::info_span!("verify_round", roster_len = roster_publics.len());
    let _enter = span.enter();

    let final_signature = FinalSignature::from_bytes(final_bytes)?;

    let mut mask = Mask::new(roster_publics, None).map_err(VerifyError::MalformedMask)?;
    mask.set_from_bytes(&final_signature.mask_bytes).map_err(VerifyError::MalformedMask)?;

    if let Err(reason) = policy.check(&mask) {
        warn!(%reason, "round did not satisfy completion policy");
        return Err(VerifyError::PolicyNotSatisfied(reason));
    }

    let aggregate_key = match mask.aggregate_public() {
        Some(key) => key,
        None => {
            warn!("mask is empty, nothing to verify against");
            return Err(VerifyError::InvalidSignature);
        }
    };

    let ok = crypto::verify_single(aggregate_key, message, &final_signature.signature)?;
    if ok {
        info!(signers = mask.count_enabled(), total = mask.count_total(), "round verified");
        Ok(mask)
    } else {
        warn!("aggregate signature failed pairing check");
        Err(VerifyError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{key_pair, SignaturePoint};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn roster(n: usize) -> (Vec<crate::crypto::PrivateKey>, Arc<[PublicKey]>) {
        let mut r = ChaCha20Rng::seed_from_u64(11);
        let pairs: Vec<_> = (0..n).map(|_| key_pair(&mut r)).collect();
        let publics: Arc<[PublicKey]> = pairs.iter().map(|(_, pk)| pk.clone()).collect::<Vec<_>>().into();
        let privates = pairs.into_iter().map(|(sk, _)| sk).collect();
        (privates, publics)
    }

    fn sign_all(sks: &[crate::crypto::PrivateKey], publics: &Arc<[PublicKey]>, msg: &[u8]) -> Vec<u8> {
        let mut mask = Mask::new(publics.clone(), None).unwrap();
        let mut sigs = Vec::new();
        for (i, sk) in sks.iter().enumerate() {
            sigs.push(sk.sign(msg));
            mask.set_bit(i, true).unwrap();
        }
        let refs: Vec<&SignaturePoint> = sigs.iter().collect();
        let agg = crypto::aggregate_signatures(&refs).unwrap();
        FinalSignature::new(agg, mask.bytes()).to_bytes()
    }

    #[test]
    fn full_participation_verifies_under_complete_policy() {
        let (sks, publics) = roster(4);
        let msg = b"round-1";
        let wire = sign_all(&sks, &publics, msg);
        let mask = verify(publics, msg, &wire, &Complete).unwrap();
        assert_eq!(mask.count_enabled(), 4);
    }

    #[test]
    fn partial_participation_fails_complete_policy() {
        let (sks, publics) = roster(4);
        let msg = b"round-1";
        let mut mask = Mask::new(publics.clone(), None).unwrap();
        let sig = sks[0].sign(msg);
        mask.set_bit(0, true).unwrap();
        let wire = FinalSignature::new(sig, mask.bytes()).to_bytes();

        let err = verify(publics, msg, &wire, &Complete).unwrap_err();
        assert!(matches!(err, VerifyError::PolicyNotSatisfied(_)));
    }

    #[test]
    fn partial_participation_passes_threshold_policy() {
        let (sks, publics) = roster(4);
        let msg = b"round-1";
        let mut mask = Mask::new(publics.clone(), None).unwrap();
        let sig = sks[0].sign(msg);
        mask.set_bit(0, true).unwrap();
        let wire = FinalSignature::new(sig, mask.bytes()).to_bytes();

        let result = verify(publics, msg, &wire, &Threshold(1)).unwrap();
        assert_eq!(result.count_enabled(), 1);
    }

    #[test]
    fn tampered_signature_fails_pairing_check() {
        let (sks, publics) = roster(3);
        let msg = b"round-1";
        let wire = sign_all(&sks, &publics, msg);
        let bogus_sig = sks[0].sign(b"a different message entirely");
        let mut tampered = wire.clone();
        tampered[..crate::crypto::POINT_LEN_G1].copy_from_slice(&bogus_sig.0);

        let err = verify(publics, msg, &tampered, &Complete).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature));
    }

    #[test]
    fn empty_mask_is_rejected() {
        let (sks, publics) = roster(3);
        let empty_mask = Mask::new(publics.clone(), None).unwrap();
        // A well-formed but irrelevant signature: the empty-mask check must
        // reject before any pairing is attempted against it.
        let sig = sks[0].sign(b"msg");
        let wire = FinalSignature::new(sig, empty_mask.bytes()).to_bytes();

        let err = verify(publics, b"msg", &wire, &Threshold(0)).unwrap_err();
        assert!(matches!(err, VerifyError::InvalidSignature));
    }

    #[test]
    fn off_curve_signature_is_malformed_not_crypto() {
        let (sks, publics) = roster(3);
        let msg = b"round-1";
        let wire = sign_all(&sks, &publics, msg);
        let mut tampered = wire.clone();
        // Right length, but zeroing the point's bytes leaves it off-curve.
        tampered[..crate::crypto::POINT_LEN_G1].fill(0);

        let err = verify(publics, msg, &tampered, &Complete).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedSignature { .. }));
    }

    #[test]
    fn truncated_wire_bytes_are_malformed() {
        let (_, publics) = roster(3);
        let err = verify(publics, b"msg", &[0u8; 4], &Complete).unwrap_err();
        assert!(matches!(err, VerifyError::MalformedSignature { .. }));
    }
}
