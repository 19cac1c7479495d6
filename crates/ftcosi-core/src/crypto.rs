//! BLS12-381 signing façade.
//!
//! Signatures live in G1 (48-byte compressed points), public keys in G2
//! (96-byte compressed points) — the "min-sig" parameter choice, which keeps
//! signatures small since they are the thing fanned out and aggregated most.
//! Everything here is deterministic hash-to-curve BLS: no per-message
//! randomness is consumed by signing.

use std::fmt;

use blst::min_sig::{
    AggregatePublicKey, AggregateSignature, PublicKey as BlstPublicKey, SecretKey as BlstSecretKey,
    Signature as BlstSignature,
};
use blst::BLST_ERROR;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length in bytes of a compressed G1 point (signatures).
pub const POINT_LEN_G1: usize = 48;
/// Length in bytes of a compressed G2 point (public keys).
pub const POINT_LEN_G2: usize = 96;

/// Domain separation tag for the signature scheme used by this crate.
const DST: &[u8] = b"FTCOSI_BLS12381G1_XMD:SHA-256_SSWU_RO_POP_";

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("expected a {expected}-byte point, got {got}")]
    WrongLength { expected: usize, got: usize },
    #[error("blst operation failed: {0:?}")]
    Blst(BLST_ERROR),
    #[error("key generation failed: ikm must be at least 32 bytes")]
    KeyGen,
}

fn check(result: BLST_ERROR) -> Result<(), CryptoError> {
    if result == BLST_ERROR::BLST_SUCCESS {
        Ok(())
    } else {
        Err(CryptoError::Blst(result))
    }
}

/// A scalar private key. Never implements `Serialize`/`Debug` with its bytes exposed.
#[derive(Clone)]
pub struct PrivateKey(BlstSecretKey);

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

impl PrivateKey {
    /// Sign `message`, producing a G1 point.
    pub fn sign(&self, message: &[u8]) -> SignaturePoint {
        SignaturePoint(self.0.sign(message, DST, &[]).to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.sk_to_pk().to_bytes())
    }
}

/// A G2 public key.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(pub [u8; POINT_LEN_G2]);

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.0))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(&s)).map_err(serde::de::Error::custom)?;
        Self::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != POINT_LEN_G2 {
            return Err(CryptoError::WrongLength {
                expected: POINT_LEN_G2,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; POINT_LEN_G2];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub(crate) fn to_blst(&self) -> Result<BlstPublicKey, CryptoError> {
        BlstPublicKey::from_bytes(&self.0).map_err(CryptoError::Blst)
    }
}

/// A G1 signature point — either an individual signature or an aggregate of several.
#[derive(Clone, PartialEq, Eq)]
pub struct SignaturePoint(pub [u8; POINT_LEN_G1]);

impl fmt::Debug for SignaturePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignaturePoint({})", hex::encode(self.0))
    }
}

impl SignaturePoint {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != POINT_LEN_G1 {
            return Err(CryptoError::WrongLength {
                expected: POINT_LEN_G1,
                got: bytes.len(),
            });
        }
        let mut arr = [0u8; POINT_LEN_G1];
        arr.copy_from_slice(bytes);
        Ok(Self(arr))
    }

    pub(crate) fn to_blst(&self) -> Result<BlstSignature, CryptoError> {
        BlstSignature::from_bytes(&self.0).map_err(CryptoError::Blst)
    }
}

/// Generate a fresh key pair from caller-supplied entropy.
///
/// The façade never reads from the OS RNG directly — callers (including
/// tests, which want determinism) decide where the entropy comes from.
pub fn key_pair(rng: &mut (impl RngCore + CryptoRng)) -> (PrivateKey, PublicKey) {
    let mut ikm = [0u8; 32];
    rng.fill_bytes(&mut ikm);
    let sk = BlstSecretKey::key_gen(&ikm, &[]).expect("32 bytes of ikm is always sufficient");
    let pk = PublicKey(sk.sk_to_pk().to_bytes());
    (PrivateKey(sk), pk)
}

/// Check the pairing equation `e(sig, G2) = e(H(msg), pk)` for a single signer.
pub fn verify_single(pk: &PublicKey, message: &[u8], sig: &SignaturePoint) -> Result<bool, CryptoError> {
    let blst_pk = pk.to_blst()?;
    let blst_sig = sig.to_blst()?;
    let result = blst_sig.verify(true, message, DST, &[], &blst_pk, true);
    Ok(result == BLST_ERROR::BLST_SUCCESS)
}

/// Sum a set of G2 public keys into their aggregate.
pub fn aggregate_public_keys(keys: &[&PublicKey]) -> Result<PublicKey, CryptoError> {
    let blst_keys = keys.iter().map(|k| k.to_blst()).collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&BlstPublicKey> = blst_keys.iter().collect();
    let agg = AggregatePublicKey::aggregate(&refs, false).map_err(CryptoError::Blst)?;
    Ok(PublicKey(agg.to_public_key().to_bytes()))
}

/// Sum a set of G1 signature points into their aggregate.
pub fn aggregate_signatures(sigs: &[&SignaturePoint]) -> Result<SignaturePoint, CryptoError> {
    let blst_sigs = sigs.iter().map(|s| s.to_blst()).collect::<Result<Vec<_>, _>>()?;
    let refs: Vec<&BlstSignature> = blst_sigs.iter().collect();
    let agg = AggregateSignature::aggregate(&refs, false).map_err(CryptoError::Blst)?;
    Ok(SignaturePoint(agg.to_signature().to_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let (sk, pk) = key_pair(&mut rng());
        let sig = sk.sign(b"dedis");
        assert!(verify_single(&pk, b"dedis", &sig).unwrap());
    }

    #[test]
    fn verify_rejects_wrong_message() {
        let (sk, pk) = key_pair(&mut rng());
        let sig = sk.sign(b"dedis");
        assert!(!verify_single(&pk, b"not dedis", &sig).unwrap());
    }

    #[test]
    fn aggregate_signature_verifies_under_aggregate_key() {
        let mut r = rng();
        let (sk1, pk1) = key_pair(&mut r);
        let (sk2, pk2) = key_pair(&mut r);
        let msg = b"aggregate me";
        let sig1 = sk1.sign(msg);
        let sig2 = sk2.sign(msg);

        let agg_sig = aggregate_signatures(&[&sig1, &sig2]).unwrap();
        let agg_pk = aggregate_public_keys(&[&pk1, &pk2]).unwrap();
        assert!(verify_single(&agg_pk, msg, &agg_sig).unwrap());
    }

    #[test]
    fn public_key_hex_round_trips_through_serde() {
        let (_, pk) = key_pair(&mut rng());
        let json = serde_json::to_string(&pk).unwrap();
        let back: PublicKey = serde_json::from_str(&json).unwrap();
        assert_eq!(pk, back);
    }
}
