//! BLS signatures over the BN254 pairing-friendly curve.
//!
//! Operators sign batch header hashes with a secret scalar; signatures are
//! points on G1 and are aggregatable by plain point addition. Verification of
//! an (aggregated) signature uses the matching (aggregated) G2 public key:
//!
//! `e(sigma, g2) == e(H(m), apk_g2)`
//!
//! Messages are hashed to G1 with the try-and-increment method over the
//! keccak256 digest, which keeps the mapping compatible with on-chain
//! verifiers.

use std::fmt;

use ark_bn254::{Bn254, Fq, Fr, G1Affine, G1Projective, G2Affine, G2Projective};
use ark_ec::{pairing::Pairing, AffineRepr, CurveGroup};
use ark_ff::{Field, One, PrimeField, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};

#[derive(Debug, thiserror::Error)]
pub enum BlsError {
    #[error("point is not a valid curve element")]
    InvalidPoint,
    #[error("invalid hex encoding")]
    InvalidHex,
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Computes the keccak256 digest of `data`.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Maps a 32-byte digest onto G1 by try-and-increment: interpret the digest
/// as an `Fq` element and walk the x coordinate upwards until `x^3 + 3` has a
/// square root. BN254's G1 cofactor is one, so every on-curve point is in the
/// prime-order subgroup.
pub fn hash_to_g1(digest: &[u8; 32]) -> G1Affine {
    let mut x = Fq::from_be_bytes_mod_order(digest);
    loop {
        let y_squared = x * x * x + Fq::from(3u64);
        if let Some(y) = y_squared.sqrt() {
            return G1Affine::new_unchecked(x, y);
        }
        x += Fq::one();
    }
}

/// Secret signing scalar of an operator.
#[derive(Clone)]
pub struct PrivateKey(Fr);

impl PrivateKey {
    pub fn random(rng: &mut impl rand::RngCore) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(Fr::from_le_bytes_mod_order(&bytes))
    }

    pub fn sign(&self, digest: &[u8; 32]) -> Signature {
        let point = G1Projective::from(hash_to_g1(digest)) * self.0;
        Signature(point.into_affine())
    }
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The scalar itself must never end up in logs.
        f.write_str("PrivateKey(_)")
    }
}

/// G1 component of an operator public key. Aggregated per quorum into the
/// quorum APK that on-chain verifiers reconstruct.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyG1(pub(crate) G1Affine);

/// G2 component of an operator public key. Used in the pairing check.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct PublicKeyG2(pub(crate) G2Affine);

/// A BLS signature: a point on G1.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub(crate) G1Affine);

/// An operator key pair carrying both public key components.
#[derive(Debug, Clone)]
pub struct BlsKeyPair {
    private_key: PrivateKey,
    public_key_g1: PublicKeyG1,
    public_key_g2: PublicKeyG2,
}

impl BlsKeyPair {
    pub fn random(rng: &mut impl rand::RngCore) -> Self {
        let private_key = PrivateKey::random(rng);
        let g1 = G1Projective::from(G1Affine::generator()) * private_key.0;
        let g2 = G2Projective::from(G2Affine::generator()) * private_key.0;
        Self {
            private_key,
            public_key_g1: PublicKeyG1(g1.into_affine()),
            public_key_g2: PublicKeyG2(g2.into_affine()),
        }
    }

    pub fn sign(&self, digest: &[u8; 32]) -> Signature {
        self.private_key.sign(digest)
    }

    pub fn public_key_g1(&self) -> PublicKeyG1 {
        self.public_key_g1
    }

    pub fn public_key_g2(&self) -> PublicKeyG2 {
        self.public_key_g2
    }
}

impl Signature {
    /// Verifies the signature over `digest` against a (possibly aggregated)
    /// G2 public key.
    pub fn verify(&self, digest: &[u8; 32], public_key: &PublicKeyG2) -> bool {
        let message_point = hash_to_g1(digest);
        Bn254::pairing(self.0, G2Affine::generator())
            == Bn254::pairing(message_point, public_key.0)
    }

    /// Aggregates signatures by point addition. Returns `None` for an empty
    /// input: there is no meaningful signature over zero signers.
    pub fn aggregate<'a>(signatures: impl IntoIterator<Item = &'a Signature>) -> Option<Signature> {
        let mut sum = G1Projective::zero();
        let mut any = false;
        for signature in signatures {
            sum += G1Projective::from(signature.0);
            any = true;
        }
        any.then(|| Signature(sum.into_affine()))
    }
}

impl PublicKeyG1 {
    pub fn aggregate<'a>(keys: impl IntoIterator<Item = &'a PublicKeyG1>) -> Option<PublicKeyG1> {
        let mut sum = G1Projective::zero();
        let mut any = false;
        for key in keys {
            sum += G1Projective::from(key.0);
            any = true;
        }
        any.then(|| PublicKeyG1(sum.into_affine()))
    }
}

impl PublicKeyG2 {
    pub fn aggregate<'a>(keys: impl IntoIterator<Item = &'a PublicKeyG2>) -> Option<PublicKeyG2> {
        let mut sum = G2Projective::zero();
        let mut any = false;
        for key in keys {
            sum += G2Projective::from(key.0);
            any = true;
        }
        any.then(|| PublicKeyG2(sum.into_affine()))
    }
}

fn to_compressed_bytes<T: CanonicalSerialize>(point: &T) -> Result<Vec<u8>, BlsError> {
    let mut bytes = Vec::new();
    point
        .serialize_compressed(&mut bytes)
        .map_err(|err| BlsError::Serialization(err.to_string()))?;
    Ok(bytes)
}

fn from_compressed_bytes<T: CanonicalDeserialize>(bytes: &[u8]) -> Result<T, BlsError> {
    T::deserialize_compressed(bytes).map_err(|_| BlsError::InvalidPoint)
}

macro_rules! impl_point_codec {
    ($ty:ident, $inner:ty) => {
        impl $ty {
            pub fn to_bytes(&self) -> Vec<u8> {
                to_compressed_bytes(&self.0).expect("compressed encoding of a valid point")
            }

            pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
                Ok(Self(from_compressed_bytes::<$inner>(bytes)?))
            }
        }

        impl fmt::Debug for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($ty), "({})"), hex::encode(self.to_bytes()))
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.to_bytes()))
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.to_bytes()))
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = String::deserialize(deserializer)?;
                let bytes = hex::decode(&encoded).map_err(de::Error::custom)?;
                Self::from_bytes(&bytes).map_err(de::Error::custom)
            }
        }
    };
}

impl_point_codec!(Signature, G1Affine);
impl_point_codec!(PublicKeyG1, G1Affine);
impl_point_codec!(PublicKeyG2, G2Affine);
