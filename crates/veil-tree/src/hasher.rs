//! node hash functions
//!
//! the tree is generic over its two-to-one hash. a restored tree must use
//! the same hasher it was built with; nothing in the serialized form records
//! which one that was.

use sha2::{Digest, Sha256};

use crate::Hash;

/// domain separator for blake3 node hashing
pub const MERKLE_DOMAIN: &[u8] = b"veil.commitment-tree.node.v1";

/// two-to-one compression used for every interior node
pub trait TreeHasher: Clone + Send + Sync {
    fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash;
}

/// plain sha256(left || right)
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Sha256Hasher;

impl TreeHasher for Sha256Hasher {
    fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(left);
        hasher.update(right);
        hasher.finalize().into()
    }
}

/// domain-separated blake3
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Blake3Hasher;

impl TreeHasher for Blake3Hasher {
    fn hash_pair(&self, left: &Hash, right: &Hash) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(MERKLE_DOMAIN);
        hasher.update(left);
        hasher.update(right);
        *hasher.finalize().as_bytes()
    }
}

/// per-level zero values: `zeros[0] = zero_element`, each next level hashes
/// the previous one with itself. returns `levels + 1` entries.
pub fn zero_values<H: TreeHasher>(hasher: &H, levels: usize, zero_element: Hash) -> Vec<Hash> {
    let mut zeros = Vec::with_capacity(levels + 1);
    zeros.push(zero_element);
    for level in 1..=levels {
        let below = zeros[level - 1];
        zeros.push(hasher.hash_pair(&below, &below));
    }
    zeros
}
