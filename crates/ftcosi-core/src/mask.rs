//! Participation bitmask over an ordered roster of public keys.
//!
//! A [`Mask`] tracks which roster positions contributed to a signature and
//! caches the aggregate public key of the enabled set. The cache is never
//! trusted across (de)serialization: [`Mask::set_from_bytes`] always
//! recomputes it from the bits it just read, never from whatever the
//! previous owner claimed.

use std::sync::Arc;

use bitvec::prelude::*;
use thiserror::Error;

use crate::crypto::{self, CryptoError, PublicKey};

#[derive(Debug, Error)]
pub enum MaskError {
    #[error("self key is not present in the roster's public key list")]
    KeyNotInRoster,
    #[error("mask length mismatch: expected {expected} bytes, got {got}")]
    LengthMismatch { expected: usize, got: usize },
    #[error("bit index {index} out of range for a roster of size {len}")]
    BitIndexOutOfRange { index: usize, len: usize },
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A fixed-width bitmask over `publics`, one bit per roster position.
#[derive(Clone, Debug)]
pub struct Mask {
    publics: Arc<[PublicKey]>,
    bits: BitVec<u8, Lsb0>,
    /// Cached aggregate of the enabled public keys. `None` means the empty
    /// (identity) aggregate — no positions are enabled.
    aggregate: Option<PublicKey>,
}

impl Mask {
    /// Build a mask over `roster_publics`. If `self_key` is given it must be
    /// present in `roster_publics`; its bit is set and becomes the initial
    /// aggregate. Without a `self_key` the mask starts empty.
    pub fn new(roster_publics: Arc<[PublicKey]>, self_key: Option<&PublicKey>) -> Result<Self, MaskError> {
        let len = roster_publics.len();
        let mut mask = Self {
            publics: roster_publics,
            bits: bitvec![u8, Lsb0; 0; len],
            aggregate: None,
        };
        if let Some(key) = self_key {
            let index = mask
                .publics
                .iter()
                .position(|p| p == key)
                .ok_or(MaskError::KeyNotInRoster)?;
            mask.set_bit(index, true)?;
        }
        Ok(mask)
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn count_total(&self) -> usize {
        self.len()
    }

    pub fn count_enabled(&self) -> usize {
        self.bits.count_ones()
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bits.get(index).map(|b| *b).unwrap_or(false)
    }

    /// Aggregate public key of the currently enabled positions, or `None`
    /// when no position is enabled (the identity element of G2).
    pub fn aggregate_public(&self) -> Option<&PublicKey> {
        self.aggregate.as_ref()
    }

    /// Set or clear bit `index`. Idempotent: setting an already-set bit (or
    /// clearing an already-clear one) is a no-op that skips recomputing the
    /// aggregate.
    pub fn set_bit(&mut self, index: usize, on: bool) -> Result<(), MaskError> {
        if index >= self.bits.len() {
            return Err(MaskError::BitIndexOutOfRange {
                index,
                len: self.bits.len(),
            });
        }
        if self.bits[index] == on {
            return Ok(());
        }
        self.bits.set(index, on);
        self.recompute_aggregate()?;
        Ok(())
    }

    /// Little-endian packed bytes, `ceil(len/8)` of them, trailing bits zero.
    pub fn bytes(&self) -> Vec<u8> {
        self.bits.as_raw_slice().to_vec()
    }

    /// Overwrite the bits from a packed byte slice and recompute the
    /// aggregate from scratch — the cached aggregate of whoever produced
    /// `bytes` is never trusted.
    pub fn set_from_bytes(&mut self, bytes: &[u8]) -> Result<(), MaskError> {
        let expected = self.packed_len();
        if bytes.len() != expected {
            return Err(MaskError::LengthMismatch {
                expected,
                got: bytes.len(),
            });
        }
        let mut bits: BitVec<u8, Lsb0> = BitVec::from_slice(bytes);
        bits.truncate(self.publics.len());
        self.bits = bits;
        self.recompute_aggregate()?;
        Ok(())
    }

    /// Bitwise OR with `other`, which must share this mask's length. The
    /// aggregate is recomputed from the combined bits.
    pub fn or_with(&mut self, other: &Mask) -> Result<(), MaskError> {
        if self.len() != other.len() {
            return Err(MaskError::LengthMismatch {
                expected: self.len(),
                got: other.len(),
            });
        }
        self.bits |= other.bits.clone();
        self.recompute_aggregate()?;
        Ok(())
    }

    fn packed_len(&self) -> usize {
        (self.publics.len() + 7) / 8
    }

    /// Recompute `aggregate` from the current bits and roster. Never an
    /// incremental point update: the façade only exposes the high-level
    /// "aggregate a slice of keys" operation, so this walks the enabled set
    /// each time. See DESIGN.md for why that trade was made.
    fn recompute_aggregate(&mut self) -> Result<(), MaskError> {
        let enabled: Vec<&PublicKey> = self
            .publics
            .iter()
            .enumerate()
            .filter(|(i, _)| self.bits[*i])
            .map(|(_, p)| p)
            .collect();
        self.aggregate = if enabled.is_empty() {
            None
        } else {
            Some(crypto::aggregate_public_keys(&enabled)?)
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn roster(n: usize) -> Arc<[PublicKey]> {
        let mut r = ChaCha20Rng::seed_from_u64(7);
        (0..n)
            .map(|_| crypto::key_pair(&mut r).1)
            .collect::<Vec<_>>()
            .into()
    }

    #[test]
    fn new_without_self_key_is_empty() {
        let mask = Mask::new(roster(4), None).unwrap();
        assert_eq!(mask.count_enabled(), 0);
        assert!(mask.aggregate_public().is_none());
    }

    #[test]
    fn self_key_not_in_roster_fails() {
        let publics = roster(4);
        let mut other = ChaCha20Rng::seed_from_u64(99);
        let (_, foreign) = crypto::key_pair(&mut other);
        assert!(matches!(
            Mask::new(publics, Some(&foreign)),
            Err(MaskError::KeyNotInRoster)
        ));
    }

    #[test]
    fn set_bit_updates_aggregate_consistently() {
        let publics = roster(3);
        let mut mask = Mask::new(publics.clone(), None).unwrap();
        mask.set_bit(0, true).unwrap();
        mask.set_bit(2, true).unwrap();

        let expected = crypto::aggregate_public_keys(&[&publics[0], &publics[2]]).unwrap();
        assert_eq!(mask.aggregate_public(), Some(&expected));
        assert_eq!(mask.count_enabled(), 2);
    }

    #[test]
    fn set_bit_is_idempotent() {
        let publics = roster(3);
        let mut mask = Mask::new(publics, None).unwrap();
        mask.set_bit(1, true).unwrap();
        let bytes_before = mask.bytes();
        mask.set_bit(1, true).unwrap();
        assert_eq!(mask.bytes(), bytes_before);
    }

    #[test]
    fn bytes_round_trip_preserves_aggregate() {
        let publics = roster(13);
        let mut mask = Mask::new(publics.clone(), None).unwrap();
        for i in [0, 3, 5, 12] {
            mask.set_bit(i, true).unwrap();
        }
        let bytes = mask.bytes();
        assert_eq!(bytes.len(), 2); // ceil(13/8)

        let mut restored = Mask::new(publics, None).unwrap();
        restored.set_from_bytes(&bytes).unwrap();
        assert_eq!(restored.aggregate_public(), mask.aggregate_public());
        assert_eq!(restored.count_enabled(), 4);
    }

    #[test]
    fn or_with_combines_disjoint_bits() {
        let publics = roster(5);
        let mut a = Mask::new(publics.clone(), None).unwrap();
        a.set_bit(0, true).unwrap();
        let mut b = Mask::new(publics, None).unwrap();
        b.set_bit(1, true).unwrap();

        a.or_with(&b).unwrap();
        assert_eq!(a.count_enabled(), 2);
        assert!(a.is_set(0) && a.is_set(1));
    }

    #[test]
    fn set_from_bytes_rejects_wrong_length() {
        let mut mask = Mask::new(roster(9), None).unwrap();
        assert!(matches!(
            mask.set_from_bytes(&[0u8; 1]),
            Err(MaskError::LengthMismatch { .. })
        ));
    }
}
