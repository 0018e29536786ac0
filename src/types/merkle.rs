//! Leaf hashes and Merkle inclusion proofs.
//!
//! ## Truncation rule
//!
//! Under `sha256_31` a hash is the SHA-256 digest truncated to its high 248
//! bits: the first 31 digest bytes, stored right-aligned in a 32-byte word
//! with a zero leading byte. This keeps every hash a valid BN254 field
//! element, so a proving-field backend can adopt the same tree shape
//! without re-hashing. The rule applies identically to leaves and internal
//! nodes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::LeafHashAlgorithm;

/// A 32-byte hash in the Merkle tree (leaf or internal node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeafHash(pub [u8; 32]);

impl LeafHash {
    /// The sentinel zero leaf used to pad the tree to a power of two.
    pub const ZERO: LeafHash = LeafHash([0u8; 32]);

    /// Hex form.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl std::fmt::Display for LeafHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for LeafHash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for LeafHash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).ok_or_else(|| serde::de::Error::custom("invalid hash hex"))
    }
}

fn truncate_248(digest: &[u8]) -> LeafHash {
    let mut out = [0u8; 32];
    out[1..].copy_from_slice(&digest[..31]);
    LeafHash(out)
}

/// Hash canonical district bytes into a leaf.
pub fn hash_leaf(algorithm: LeafHashAlgorithm, canonical_bytes: &[u8]) -> LeafHash {
    match algorithm {
        LeafHashAlgorithm::Sha256_31 => {
            let digest = Sha256::digest(canonical_bytes);
            truncate_248(&digest)
        }
        // Refused at configuration time; unreachable at runtime.
        LeafHashAlgorithm::Poseidon2Bn254 => {
            unreachable!("poseidon2_bn254 is rejected by AtlasConfig::validate")
        }
    }
}

/// Hash two child nodes into their parent, fixed left/right order.
pub fn hash_node(algorithm: LeafHashAlgorithm, left: &LeafHash, right: &LeafHash) -> LeafHash {
    match algorithm {
        LeafHashAlgorithm::Sha256_31 => {
            let mut hasher = Sha256::new();
            hasher.update(left.0);
            hasher.update(right.0);
            truncate_248(&hasher.finalize())
        }
        LeafHashAlgorithm::Poseidon2Bn254 => {
            unreachable!("poseidon2_bn254 is rejected by AtlasConfig::validate")
        }
    }
}

/// Sibling path from one leaf to the committed root.
///
/// `siblings` is ordered root-ward: entry 0 is the sibling at the leaf
/// level. `path_indices[i]` is 0 when the running node is the left child at
/// level `i`, 1 when it is the right child.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The leaf being proven.
    pub leaf_hash: LeafHash,
    /// Position of the leaf in canonical order.
    pub leaf_index: u32,
    /// Sibling hashes, leaf level first.
    pub siblings: Vec<LeafHash>,
    /// 0 = left child, 1 = right child, per level.
    pub path_indices: Vec<u8>,
    /// Tree depth (number of levels above the leaves).
    pub depth: u32,
    /// The committed root this proof reconstructs.
    pub merkle_root: LeafHash,
}

impl MerkleProof {
    /// Recompute the root from the leaf and sibling path.
    pub fn verify(&self, algorithm: LeafHashAlgorithm) -> bool {
        if self.siblings.len() != self.depth as usize
            || self.path_indices.len() != self.depth as usize
        {
            return false;
        }
        let mut node = self.leaf_hash;
        for (sibling, side) in self.siblings.iter().zip(&self.path_indices) {
            node = match side {
                0 => hash_node(algorithm, &node, sibling),
                _ => hash_node(algorithm, sibling, &node),
            };
        }
        node == self.merkle_root
    }
}
