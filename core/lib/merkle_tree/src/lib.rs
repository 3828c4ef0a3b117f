//! Binary Merkle tree with keccak256 node hashing.
//!
//! The tree is built over pre-hashed 32-byte leaves (certificate hashes) and
//! padded on the right to the next power of two with cached empty-subtree
//! hashes. Leaf order is significant: a batch's blob indices are exactly the
//! leaf indices of this tree.

use sha3::{Digest, Keccak256};

pub type Hash = [u8; 32];

fn hash_node(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Hashes of empty subtrees for each level, starting from the empty leaf.
fn empty_hashes(depth: usize) -> Vec<Hash> {
    let mut hashes = Vec::with_capacity(depth + 1);
    hashes.push([0u8; 32]);
    for level in 0..depth {
        let child = hashes[level];
        hashes.push(hash_node(&child, &child));
    }
    hashes
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// `levels[0]` are the leaves; the last level is the root alone.
    levels: Vec<Vec<Hash>>,
    empty: Vec<Hash>,
}

impl MerkleTree {
    /// Builds the tree from leaf hashes. Panics on an empty input; callers
    /// never construct batches with zero certificates.
    pub fn new(leaves: Vec<Hash>) -> Self {
        assert!(!leaves.is_empty(), "cannot build a Merkle tree without leaves");

        let depth = leaves.len().next_power_of_two().trailing_zeros() as usize;
        let empty = empty_hashes(depth);

        let mut levels = vec![leaves];
        for level in 0..depth {
            let current = &levels[level];
            let next: Vec<Hash> = current
                .chunks(2)
                .map(|pair| match pair {
                    [left, right] => hash_node(left, right),
                    [left] => hash_node(left, &empty[level]),
                    _ => unreachable!(),
                })
                .collect();
            levels.push(next);
        }

        Self { levels, empty }
    }

    pub fn root(&self) -> Hash {
        self.levels.last().expect("non-empty tree")[0]
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    /// Returns the sibling path for the leaf at `index`, ordered from the
    /// leaf level upwards.
    pub fn merkle_path(&self, index: usize) -> Vec<Hash> {
        assert!(index < self.leaf_count(), "leaf index out of bounds");

        let mut path = Vec::with_capacity(self.levels.len() - 1);
        let mut position = index;
        for (level, nodes) in self.levels[..self.levels.len() - 1].iter().enumerate() {
            let sibling = position ^ 1;
            let hash = nodes.get(sibling).copied().unwrap_or(self.empty[level]);
            path.push(hash);
            position >>= 1;
        }
        path
    }
}

/// Recomputes the root from a leaf and its sibling path.
pub fn verify_merkle_path(leaf: &Hash, index: usize, path: &[Hash], root: &Hash) -> bool {
    let mut hash = *leaf;
    let mut position = index;
    for sibling in path {
        hash = if position & 1 == 0 {
            hash_node(&hash, sibling)
        } else {
            hash_node(sibling, &hash)
        };
        position >>= 1;
    }
    hash == *root
}
