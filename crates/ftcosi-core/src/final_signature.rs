//! Wire format for a round's finished aggregate signature: a marshalled G1
//! point followed by the raw mask bytes, in that order (§3/§6). A verifier
//! needs nothing beyond the suite's fixed point length and the roster size
//! to split this buffer back into its two parts.

use thiserror::Error;

use crate::crypto::{SignaturePoint, POINT_LEN_G1};

#[derive(Debug, Error)]
pub enum FinalSignatureError {
    #[error("final signature bytes do not decode to a valid {expected}-byte G1 point: got {got}")]
    MalformedSignature { expected: usize, got: usize },
}

/// `marshal_point_G1(signature) ‖ mask_bytes`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalSignature {
    pub signature: SignaturePoint,
    pub mask_bytes: Vec<u8>,
}

impl FinalSignature {
    pub fn new(signature: SignaturePoint, mask_bytes: Vec<u8>) -> Self {
        Self { signature, mask_bytes }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(POINT_LEN_G1 + self.mask_bytes.len());
        out.extend_from_slice(&self.signature.0);
        out.extend_from_slice(&self.mask_bytes);
        out
    }

    /// Split on the suite's fixed point length; everything past it is mask
    /// bytes, whatever their length turns out to be.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FinalSignatureError> {
        if bytes.len() < POINT_LEN_G1 {
            return Err(FinalSignatureError::MalformedSignature {
                expected: POINT_LEN_G1,
                got: bytes.len(),
            });
        }
        let (sig_bytes, mask_bytes) = bytes.split_at(POINT_LEN_G1);
        let signature = SignaturePoint::from_bytes(sig_bytes).map_err(|_| FinalSignatureError::MalformedSignature {
            expected: POINT_LEN_G1,
            got: sig_bytes.len(),
        })?;
        // A correctly-sized buffer can still fail to decode as a point on the
        // curve (off-curve, wrong subgroup, bad compression flag); catch that
        // here rather than letting it surface from the pairing check later.
        signature.to_blst().map_err(|_| FinalSignatureError::MalformedSignature {
            expected: POINT_LEN_G1,
            got: sig_bytes.len(),
        })?;
        Ok(Self { signature, mask_bytes: mask_bytes.to_vec() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::key_pair;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn round_trips_through_bytes() {
        let mut r = ChaCha20Rng::seed_from_u64(5);
        let (sk, _) = key_pair(&mut r);
        let sig = sk.sign(b"dedis");
        let fs = FinalSignature::new(sig.clone(), vec![0x01]);
        let bytes = fs.to_bytes();
        assert_eq!(bytes.len(), POINT_LEN_G1 + 1);

        let back = FinalSignature::from_bytes(&bytes).unwrap();
        assert_eq!(back.signature, sig);
        assert_eq!(back.mask_bytes, vec![0x01]);
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let err = FinalSignature::from_bytes(&[0u8; POINT_LEN_G1 - 1]).unwrap_err();
        assert!(matches!(err, FinalSignatureError::MalformedSignature { .. }));
    }

    #[test]
    fn right_length_but_off_curve_point_is_malformed() {
        // All-zero bytes are the right length for a compressed G1 point but
        // do not decode to a point on the curve.
        let err = FinalSignature::from_bytes(&[0u8; POINT_LEN_G1]).unwrap_err();
        assert!(matches!(err, FinalSignatureError::MalformedSignature { .. }));
    }
}
