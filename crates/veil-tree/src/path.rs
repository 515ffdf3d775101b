//! authentication paths

use serde::{Deserialize, Serialize};

use crate::{Hash, TreeHasher};

/// sibling hashes from leaf to root, plus the side the path node sits on at
/// each level. this is the witness a withdrawal proof consumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerklePath {
    /// position of the leaf
    pub leaf_index: u64,
    /// sibling hash at every level, leaf first
    pub siblings: Vec<Hash>,
    /// true where the path node is the right child
    pub path_indices: Vec<bool>,
    /// root the path was extracted against
    pub root: Hash,
}

impl MerklePath {
    /// hash `leaf` up the path
    pub fn compute_root<H: TreeHasher>(&self, leaf: &Hash, hasher: &H) -> Hash {
        let mut current = *leaf;
        for (sibling, is_right) in self.siblings.iter().zip(&self.path_indices) {
            current = if *is_right {
                hasher.hash_pair(sibling, &current)
            } else {
                hasher.hash_pair(&current, sibling)
            };
        }
        current
    }

    /// check that `leaf` sits in a tree with `root`
    pub fn verify<H: TreeHasher>(&self, leaf: &Hash, root: &Hash, hasher: &H) -> bool {
        self.siblings.len() == self.path_indices.len() && &self.compute_root(leaf, hasher) == root
    }

    pub fn depth(&self) -> usize {
        self.siblings.len()
    }
}
