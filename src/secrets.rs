//! Secret vault and Merkle-backed partial-fill scheme
//!
//! Each admitted order gets N+1 randomly generated secrets for N fill parts.
//! Their keccak256 hashes form the leaves of a Merkle tree whose root is
//! published with the order at announcement, so the maker can verify any
//! later-disclosed secret without trusting the engine. Secrets never leave
//! the vault until explicitly revealed; disclosure is append-only and
//! idempotent per index.

use crate::error::{RelayerError, RelayerResult};

use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use uuid::Uuid;

/// A disclosed secret plus the Merkle path proving membership in the
/// committed root.
#[derive(Debug, Clone, PartialEq)]
pub struct RevealedSecret {
    pub index: usize,
    pub secret: [u8; 32],
    pub leaf: [u8; 32],
    /// Sibling hashes from leaf to root
    pub proof: Vec<[u8; 32]>,
}

/// Map a fill percentage to the secret index for an order with `parts` parts.
///
/// Step function: 0 maps to index 0, otherwise `ceil(pct * parts / 100) - 1`,
/// clamped to `parts - 1`. Index `parts` is reserved for the full/overflow
/// completion case and is never selected by percentage.
pub fn secret_index_for_fill(fill_pct: u8, parts: usize) -> usize {
    debug_assert!(parts >= 1);
    if fill_pct == 0 {
        return 0;
    }
    let pct = fill_pct.min(100) as usize;
    let idx = (pct * parts).div_ceil(100) - 1;
    idx.min(parts - 1)
}

fn keccak(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

fn hash_pair(a: &[u8; 32], b: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Binary Merkle tree over secret hashes. An odd node at any level is paired
/// with itself.
#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] = leaves, last level = [root]
    levels: Vec<Vec<[u8; 32]>>,
}

impl MerkleTree {
    pub fn from_leaves(leaves: Vec<[u8; 32]>) -> Self {
        assert!(!leaves.is_empty(), "merkle tree needs at least one leaf");

        let mut levels = vec![leaves];
        while levels.last().unwrap().len() > 1 {
            let prev = levels.last().unwrap();
            let mut next = Vec::with_capacity(prev.len().div_ceil(2));
            for pair in prev.chunks(2) {
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(hash_pair(&pair[0], right));
            }
            levels.push(next);
        }

        Self { levels }
    }

    pub fn root(&self) -> [u8; 32] {
        self.levels.last().unwrap()[0]
    }

    /// Sibling path from leaf `index` to the root
    pub fn proof(&self, index: usize) -> Vec<[u8; 32]> {
        let mut proof = Vec::new();
        let mut idx = index;

        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = if idx % 2 == 0 {
                *level.get(idx + 1).unwrap_or(&level[idx])
            } else {
                level[idx - 1]
            };
            proof.push(sibling);
            idx /= 2;
        }

        proof
    }

    /// Verify a leaf and sibling path against a root
    pub fn verify(root: &[u8; 32], leaf: &[u8; 32], index: usize, proof: &[[u8; 32]]) -> bool {
        let mut hash = *leaf;
        let mut idx = index;

        for sibling in proof {
            hash = if idx % 2 == 0 {
                hash_pair(&hash, sibling)
            } else {
                hash_pair(sibling, &hash)
            };
            idx /= 2;
        }

        hash == *root
    }
}

/// The secret set bound to one order
struct SecretSet {
    secrets: Vec<[u8; 32]>,
    tree: MerkleTree,
    disclosed: Vec<bool>,
}

/// Generates, stores and discloses the secret sets of all active orders.
///
/// The vault is the sole writer of disclosure flags. Secret sets live until
/// their order reaches a terminal state and is evicted.
pub struct SecretVault {
    sets: DashMap<Uuid, SecretSet>,
}

impl SecretVault {
    pub fn new() -> Self {
        Self {
            sets: DashMap::new(),
        }
    }

    /// Generate N+1 secrets for an order with `parts` fill parts and return
    /// the Merkle root committed at announcement.
    pub fn generate(&self, order_id: Uuid, parts: usize) -> [u8; 32] {
        let count = parts + 1;
        let mut secrets = Vec::with_capacity(count);
        for _ in 0..count {
            let mut secret = [0u8; 32];
            OsRng.fill_bytes(&mut secret);
            secrets.push(secret);
        }

        let leaves: Vec<[u8; 32]> = secrets.iter().map(|s| keccak(s)).collect();
        let tree = MerkleTree::from_leaves(leaves);
        let root = tree.root();

        self.sets.insert(
            order_id,
            SecretSet {
                secrets,
                tree,
                disclosed: vec![false; count],
            },
        );

        root
    }

    /// Reveal the secret at `index` for an order.
    ///
    /// Re-disclosing an already-revealed index is a no-op returning the
    /// identical secret and proof: concurrent completion-retry paths may
    /// legitimately request it twice.
    pub fn reveal(&self, order_id: &Uuid, index: usize) -> RelayerResult<RevealedSecret> {
        let mut set = self
            .sets
            .get_mut(order_id)
            .ok_or_else(|| RelayerError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        if index >= set.secrets.len() {
            return Err(RelayerError::Internal(format!(
                "secret index {} out of range for order {}",
                index, order_id
            )));
        }

        set.disclosed[index] = true;

        let secret = set.secrets[index];
        Ok(RevealedSecret {
            index,
            secret,
            leaf: keccak(&secret),
            proof: set.tree.proof(index),
        })
    }

    /// Check whether an index has been disclosed
    pub fn is_disclosed(&self, order_id: &Uuid, index: usize) -> bool {
        self.sets
            .get(order_id)
            .map(|s| s.disclosed.get(index).copied().unwrap_or(false))
            .unwrap_or(false)
    }

    /// Merkle root for an order's secret set
    pub fn root(&self, order_id: &Uuid) -> Option<[u8; 32]> {
        self.sets.get(order_id).map(|s| s.tree.root())
    }

    /// Drop the secret set of a terminal order
    pub fn evict(&self, order_id: &Uuid) {
        self.sets.remove(order_id);
    }
}

impl Default for SecretVault {
    fn default() -> Self {
        Self::new()
    }
}
