//! Combining (signature, mask) partials into a single aggregate.
//!
//! The protocol guarantees the masks it feeds here are pairwise disjoint
//! (each node sets only its own bit; see the subtree/root invariants). This
//! module does not enforce disjointness in release builds — the signature
//! sum would silently double-count an overlapping bit rather than fail loud
//! — but a debug-only check catches the bug class cheaply during testing.

use thiserror::Error;

use crate::crypto::{self, CryptoError, SignaturePoint};
use crate::mask::{Mask, MaskError};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("no partials to aggregate")]
    EmptyInput,
    #[error("partial masks have differing lengths: {a} vs {b}")]
    MaskLengthMismatch { a: usize, b: usize },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Mask(#[from] MaskError),
}

/// One (signature, mask) pair, e.g. a subleader's partial result or a leaf's
/// individual response.
#[derive(Clone, Debug)]
pub struct Partial {
    pub signature: SignaturePoint,
    pub mask: Mask,
}

/// Sum the signature points and OR-combine the masks of `partials`.
///
/// Preconditions: `partials` is non-empty and every mask has the same
/// length. Returns the combined signature and mask.
pub fn aggregate(partials: &[Partial]) -> Result<(SignaturePoint, Mask), AggregateError> {
    let (first, rest) = partials.split_first().ok_or(AggregateError::EmptyInput)?;

    let expected_len = first.mask.len();
    for p in rest {
        if p.mask.len() != expected_len {
            return Err(AggregateError::MaskLengthMismatch {
                a: expected_len,
                b: p.mask.len(),
            });
        }
    }

    let sigs: Vec<&SignaturePoint> = partials.iter().map(|p| &p.signature).collect();
    let summed = crypto::aggregate_signatures(&sigs)?;

    let mut combined = first.mask.clone();
    let pre_fold_popcount: usize = partials.iter().map(|p| p.mask.count_enabled()).sum();
    for p in rest {
        combined.or_with(&p.mask)?;
    }

    debug_assert_eq!(
        combined.count_enabled(),
        pre_fold_popcount,
        "overlapping partial masks: popcount after OR-folding does not match the sum of inputs"
    );

    Ok((summed, combined))
}
