// Copyright 2025 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Keypair generation, signing, and peer identity.
//!
//! A [`PeerId`] names a network participant by its public key and a stable
//! hash of that key, used throughout the routing table as the XOR-distance
//! metric. A [`Keypair`] is the matching private material; it never needs to
//! leave the process that generated it.

#![warn(missing_docs)]
#![warn(clippy::unwrap_used)]

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length in bytes of a public key.
pub const PUBLIC_KEY_LEN: usize = 32;
/// Length in bytes of the combined seed+public-key private material.
pub const PRIVATE_KEY_LEN: usize = 64;
/// Length in bytes of an address hash.
pub const HASH_LEN: usize = 32;
/// Length in bytes of a signature.
pub const SIGNATURE_LEN: usize = 64;

/// Errors returned by identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A byte slice was not a valid public key or private keypair encoding.
    #[error("invalid public key")]
    InvalidPublicKey,
}

/// An Ed25519 keypair.
///
/// Private material is held only in memory for the life of the node and is
/// never serialized as part of any wire message.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut rng = rand::rngs::OsRng;
        Self {
            signing_key: SigningKey::generate(&mut rng),
        }
    }

    /// Reconstruct a keypair from its 64-byte private material (32-byte seed
    /// followed by the 32-byte public key, matching the common Ed25519
    /// "secret key" convention).
    pub fn from_private_bytes(bytes: &[u8; PRIVATE_KEY_LEN]) -> Result<Self, IdentityError> {
        let signing_key =
            SigningKey::from_keypair_bytes(bytes).map_err(|_| IdentityError::InvalidPublicKey)?;
        Ok(Self { signing_key })
    }

    /// The 64-byte private material (seed || public key).
    pub fn private_bytes(&self) -> [u8; PRIVATE_KEY_LEN] {
        self.signing_key.to_keypair_bytes()
    }

    /// The 32-byte public key.
    pub fn public_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Sign a message with this keypair's private key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing_key.sign(message).to_bytes()
    }

    /// Derive this keypair's [`PeerId`] given a dial-string address.
    pub fn peer_id(&self, address: impl Into<String>) -> PeerId {
        PeerId::new(self.public_bytes(), address.into())
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("public", &hex::encode(self.public_bytes()))
            .finish_non_exhaustive()
    }
}

/// Verify a signature over `message` under the given 32-byte public key.
///
/// Returns `false` (never an error) for a malformed public key or signature,
/// matching the determinism required of `verify`.
pub fn verify(public_key: &[u8; PUBLIC_KEY_LEN], message: &[u8], signature: &[u8; SIGNATURE_LEN]) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(public_key) else {
        return false;
    };
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}

/// Derive the stable 32-byte address hash for a public key.
///
/// This is the hash used as the XOR-distance metric throughout the routing
/// table; it must be computed the same way everywhere so two independently
/// constructed `PeerId`s for the same public key compare equal.
pub fn id_from_public(public_key: &[u8; PUBLIC_KEY_LEN]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(public_key);
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest);
    out
}

/// A peer's public identity: public key, dial-string address, and the
/// derived hash used for XOR distance.
///
/// Two `PeerId`s are equal iff their public keys are equal; `hash` is cached
/// at construction rather than recomputed on every comparison.
#[derive(Clone, Serialize, Deserialize)]
pub struct PeerId {
    public_key: [u8; PUBLIC_KEY_LEN],
    address: String,
    hash: [u8; HASH_LEN],
}

impl PeerId {
    /// Construct a `PeerId`, deriving and caching its hash.
    pub fn new(public_key: [u8; PUBLIC_KEY_LEN], address: String) -> Self {
        let hash = id_from_public(&public_key);
        Self {
            public_key,
            address,
            hash,
        }
    }

    /// This peer's public key.
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    /// This peer's dial-string address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// This peer's cached address hash, used for XOR distance.
    pub fn hash(&self) -> &[u8; HASH_LEN] {
        &self.hash
    }

    /// Verify that `hash` is in fact the hash of `public_key`, as required
    /// during the handshake.
    pub fn hash_matches_public_key(&self) -> bool {
        self.hash == id_from_public(&self.public_key)
    }

    /// XOR distance between this peer's hash and another hash.
    pub fn distance(&self, other: &[u8; HASH_LEN]) -> [u8; HASH_LEN] {
        xor(&self.hash, other)
    }
}

impl PartialEq for PeerId {
    fn eq(&self, other: &Self) -> bool {
        self.public_key == other.public_key
    }
}

impl Eq for PeerId {}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerId")
            .field("address", &self.address)
            .field("hash", &hex::encode(self.hash))
            .finish_non_exhaustive()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// XOR two 32-byte hashes.
pub fn xor(a: &[u8; HASH_LEN], b: &[u8; HASH_LEN]) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    for i in 0..HASH_LEN {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Index of the highest set bit in `hash`, counting from the most
/// significant bit of byte 0 as bit `8 * HASH_LEN - 1`, down to the least
/// significant bit of the last byte as bit `0`.
///
/// Returns `None` for an all-zero hash (the distance-to-self case), which
/// the routing table treats as "never bucket the local id".
pub fn highest_set_bit(hash: &[u8; HASH_LEN]) -> Option<usize> {
    for (byte_idx, byte) in hash.iter().enumerate() {
        if *byte != 0 {
            let bit_in_byte = 7 - byte.leading_zeros() as usize;
            return Some((HASH_LEN - 1 - byte_idx) * 8 + bit_in_byte);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_valid_signature_and_rejects_tampering() {
        let keys = Keypair::generate();
        let message = b"hello network";
        let sig = keys.sign(message);

        assert!(verify(&keys.public_bytes(), message, &sig));
        assert!(!verify(&keys.public_bytes(), b"hello net work", &sig));
    }

    #[test]
    fn verify_rejects_malformed_public_key() {
        let bad_key = [0xffu8; PUBLIC_KEY_LEN];
        let sig = [0u8; SIGNATURE_LEN];
        assert!(!verify(&bad_key, b"anything", &sig));
    }

    #[test]
    fn peer_id_equality_is_by_public_key_only() {
        let keys = Keypair::generate();
        let a = keys.peer_id("tcp://127.0.0.1:1");
        let b = keys.peer_id("tcp://127.0.0.1:2");
        assert_eq!(a, b);
    }

    #[test]
    fn peer_id_hash_matches_public_key_by_construction() {
        let keys = Keypair::generate();
        let id = keys.peer_id("tcp://127.0.0.1:1");
        assert!(id.hash_matches_public_key());
    }

    #[test]
    fn distance_to_self_is_zero() {
        let keys = Keypair::generate();
        let id = keys.peer_id("tcp://127.0.0.1:1");
        assert_eq!(id.distance(id.hash()), [0u8; HASH_LEN]);
        assert_eq!(highest_set_bit(&id.distance(id.hash())), None);
    }

    #[test]
    fn highest_set_bit_of_distance_one_is_zero() {
        let mut hash = [0u8; HASH_LEN];
        hash[HASH_LEN - 1] = 1;
        assert_eq!(highest_set_bit(&hash), Some(0));
    }

    #[test]
    fn highest_set_bit_of_top_bit_is_max() {
        let mut hash = [0u8; HASH_LEN];
        hash[0] = 0x80;
        assert_eq!(highest_set_bit(&hash), Some(8 * HASH_LEN - 1));
    }

    #[test]
    fn keypair_roundtrips_through_private_bytes() {
        let keys = Keypair::generate();
        let bytes = keys.private_bytes();
        let restored = Keypair::from_private_bytes(&bytes).expect("valid keypair bytes");
        assert_eq!(keys.public_bytes(), restored.public_bytes());
    }
}
