//! the commitment tree itself

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::{Result, TreeError};
use crate::hasher::{zero_values, TreeHasher};
use crate::path::MerklePath;
use crate::{Hash, MAX_LEVELS};

/// fixed-depth append-only merkle tree over commitments
///
/// `layers[0]` holds the leaves in insertion order, `layers[levels]` holds at
/// most the root. each layer is exactly `ceil(len_below / 2)` long; a missing
/// right child reads as the zero value of its level.
#[derive(Clone, Debug)]
pub struct CommitmentTree<H> {
    levels: usize,
    zeros: Vec<Hash>,
    layers: Vec<Vec<Hash>>,
    hasher: H,
}

impl<H: TreeHasher> CommitmentTree<H> {
    /// create an empty tree
    pub fn new(levels: usize, zero_element: Hash, hasher: H) -> Result<Self> {
        if levels == 0 || levels > MAX_LEVELS {
            return Err(TreeError::InvalidLevels(levels));
        }
        let zeros = zero_values(&hasher, levels, zero_element);
        Ok(Self {
            levels,
            zeros,
            layers: vec![Vec::new(); levels + 1],
            hasher,
        })
    }

    /// assemble from already validated parts (used by deserialize)
    pub(crate) fn from_parts(
        levels: usize,
        zeros: Vec<Hash>,
        layers: Vec<Vec<Hash>>,
        hasher: H,
    ) -> Self {
        Self { levels, zeros, layers, hasher }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn capacity(&self) -> u64 {
        1u64 << self.levels
    }

    /// number of inserted leaves
    pub fn len(&self) -> u64 {
        self.layers[0].len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.layers[0].is_empty()
    }

    pub fn zero_element(&self) -> Hash {
        self.zeros[0]
    }

    pub fn zeros(&self) -> &[Hash] {
        &self.zeros
    }

    pub fn layers(&self) -> &[Vec<Hash>] {
        &self.layers
    }

    /// inserted leaves in leaf-index order
    pub fn elements(&self) -> &[Hash] {
        &self.layers[0]
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    /// current root
    pub fn root(&self) -> Hash {
        self.layers[self.levels]
            .first()
            .copied()
            .unwrap_or(self.zeros[self.levels])
    }

    /// leaf index of a commitment, if present
    pub fn index_of(&self, commitment: &Hash) -> Option<u64> {
        self.layers[0]
            .iter()
            .position(|leaf| leaf == commitment)
            .map(|i| i as u64)
    }

    /// append a commitment at the next free index and rehash its path to the
    /// root. returns the assigned leaf index.
    pub fn insert(&mut self, commitment: Hash) -> Result<u64> {
        let index = self.len();
        if index >= self.capacity() {
            return Err(TreeError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        self.layers[0].push(commitment);

        let mut i = index as usize;
        for level in 1..=self.levels {
            i >>= 1;
            let node = self.parent_of(level, i);
            let layer = &mut self.layers[level];
            if i == layer.len() {
                layer.push(node);
            } else {
                layer[i] = node;
            }
        }

        Ok(index)
    }

    /// replace every leaf and rebuild all levels.
    ///
    /// the result is bit-identical to inserting the same commitments one by
    /// one into an empty tree of the same shape. on error the tree is left
    /// untouched.
    pub fn bulk_insert(&mut self, commitments: &[Hash]) -> Result<()> {
        if commitments.len() as u64 > self.capacity() {
            return Err(TreeError::CapacityExceeded {
                capacity: self.capacity(),
            });
        }

        let mut layers = Vec::with_capacity(self.levels + 1);
        layers.push(commitments.to_vec());
        for level in 1..=self.levels {
            let next = hash_layer(&self.hasher, &layers[level - 1], &self.zeros[level - 1]);
            layers.push(next);
        }
        self.layers = layers;

        Ok(())
    }

    /// drop every leaf from `leaf_count` on and rebuild.
    /// used to roll back to a checkpointed prefix before rescanning.
    pub fn truncate(&mut self, leaf_count: u64) -> Result<()> {
        let len = self.len();
        if leaf_count > len {
            return Err(TreeError::IndexOutOfRange { index: leaf_count, len });
        }
        if leaf_count == len {
            return Ok(());
        }
        let prefix = self.layers[0][..leaf_count as usize].to_vec();
        self.bulk_insert(&prefix)
    }

    /// authentication path for an inserted leaf
    pub fn path(&self, leaf_index: u64) -> Result<MerklePath> {
        let len = self.len();
        if leaf_index >= len {
            return Err(TreeError::IndexOutOfRange { index: leaf_index, len });
        }

        let mut siblings = Vec::with_capacity(self.levels);
        let mut path_indices = Vec::with_capacity(self.levels);
        let mut i = leaf_index as usize;

        for level in 0..self.levels {
            siblings.push(
                self.layers[level]
                    .get(i ^ 1)
                    .copied()
                    .unwrap_or(self.zeros[level]),
            );
            path_indices.push(i & 1 == 1);
            i >>= 1;
        }

        Ok(MerklePath {
            leaf_index,
            siblings,
            path_indices,
            root: self.root(),
        })
    }

    /// hash node `i` of `level` from its two children
    fn parent_of(&self, level: usize, i: usize) -> Hash {
        let below = &self.layers[level - 1];
        let left = below[2 * i];
        let right = below.get(2 * i + 1).copied().unwrap_or(self.zeros[level - 1]);
        self.hasher.hash_pair(&left, &right)
    }
}

/// hash one layer into the next, zero-filling an odd tail
fn hash_layer<H: TreeHasher>(hasher: &H, below: &[Hash], zero: &Hash) -> Vec<Hash> {
    let pair = |chunk: &[Hash]| hasher.hash_pair(&chunk[0], chunk.get(1).unwrap_or(zero));

    #[cfg(feature = "parallel")]
    {
        if below.len() >= crate::PARALLEL_THRESHOLD {
            return below.par_chunks(2).map(pair).collect();
        }
    }

    below.chunks(2).map(pair).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Blake3Hasher, Sha256Hasher};
    use proptest::prelude::*;

    fn leaf(i: u8) -> Hash {
        [i; 32]
    }

    #[test]
    fn test_empty_tree_root_is_top_zero() {
        let tree = CommitmentTree::new(3, [0u8; 32], Sha256Hasher).unwrap();
        assert!(tree.is_empty());
        assert_eq!(tree.capacity(), 8);
        assert_eq!(tree.root(), tree.zeros()[3]);
    }

    #[test]
    fn test_invalid_levels() {
        assert_eq!(
            CommitmentTree::new(0, [0u8; 32], Sha256Hasher).unwrap_err(),
            TreeError::InvalidLevels(0)
        );
        assert!(CommitmentTree::new(33, [0u8; 32], Sha256Hasher).is_err());
    }

    #[test]
    fn test_depth3_incremental_matches_bulk() {
        let (a, b, c) = (leaf(0xa), leaf(0xb), leaf(0xc));

        let mut incremental = CommitmentTree::new(3, [0u8; 32], Sha256Hasher).unwrap();
        assert_eq!(incremental.insert(a).unwrap(), 0);
        assert_eq!(incremental.insert(b).unwrap(), 1);
        assert_eq!(incremental.insert(c).unwrap(), 2);

        let mut bulk = CommitmentTree::new(3, [0u8; 32], Sha256Hasher).unwrap();
        bulk.bulk_insert(&[a, b, c]).unwrap();

        assert_eq!(incremental.root(), bulk.root());
        assert_eq!(incremental.layers(), bulk.layers());
    }

    #[test]
    fn test_root_by_hand() {
        let h = Sha256Hasher;
        let (a, b, c) = (leaf(1), leaf(2), leaf(3));
        let mut tree = CommitmentTree::new(2, [0u8; 32], h).unwrap();
        tree.insert(a).unwrap();
        tree.insert(b).unwrap();
        tree.insert(c).unwrap();

        let zero = [0u8; 32];
        let expected = h.hash_pair(&h.hash_pair(&a, &b), &h.hash_pair(&c, &zero));
        assert_eq!(tree.root(), expected);
    }

    #[test]
    fn test_capacity_exceeded() {
        let mut tree = CommitmentTree::new(2, [0u8; 32], Sha256Hasher).unwrap();
        for i in 0..4 {
            tree.insert(leaf(i)).unwrap();
        }
        assert_eq!(
            tree.insert(leaf(9)).unwrap_err(),
            TreeError::CapacityExceeded { capacity: 4 }
        );
        assert_eq!(tree.len(), 4);

        let mut fresh = CommitmentTree::new(2, [0u8; 32], Sha256Hasher).unwrap();
        let too_many: Vec<Hash> = (0..5).map(leaf).collect();
        assert!(fresh.bulk_insert(&too_many).is_err());
        assert!(fresh.is_empty());
    }

    #[test]
    fn test_path_out_of_range() {
        let mut tree = CommitmentTree::new(4, [0u8; 32], Sha256Hasher).unwrap();
        tree.insert(leaf(1)).unwrap();
        assert_eq!(
            tree.path(1).unwrap_err(),
            TreeError::IndexOutOfRange { index: 1, len: 1 }
        );
    }

    #[test]
    fn test_paths_reach_root() {
        let mut tree = CommitmentTree::new(5, [7u8; 32], Blake3Hasher).unwrap();
        for i in 0..11 {
            tree.insert(leaf(i)).unwrap();
        }
        let root = tree.root();
        for i in 0..11u64 {
            let path = tree.path(i).unwrap();
            assert_eq!(path.depth(), 5);
            assert!(path.verify(&leaf(i as u8), &root, &Blake3Hasher));
            assert!(!path.verify(&leaf(200), &root, &Blake3Hasher));
        }
    }

    #[test]
    fn test_index_of_and_truncate() {
        let mut tree = CommitmentTree::new(4, [0u8; 32], Sha256Hasher).unwrap();
        for i in 0..6 {
            tree.insert(leaf(i)).unwrap();
        }
        assert_eq!(tree.index_of(&leaf(4)), Some(4));
        assert_eq!(tree.index_of(&leaf(99)), None);

        let mut expected = CommitmentTree::new(4, [0u8; 32], Sha256Hasher).unwrap();
        for i in 0..3 {
            expected.insert(leaf(i)).unwrap();
        }
        tree.truncate(3).unwrap();
        assert_eq!(tree.root(), expected.root());
        assert!(tree.truncate(10).is_err());
    }

    #[test]
    fn test_parallel_layers_match_incremental() {
        // wide enough to hit the parallel path
        let leaves: Vec<Hash> = (0..300u32)
            .map(|i| {
                let mut h = [0u8; 32];
                h[..4].copy_from_slice(&i.to_le_bytes());
                h
            })
            .collect();

        let mut incremental = CommitmentTree::new(10, [0u8; 32], Sha256Hasher).unwrap();
        for l in &leaves {
            incremental.insert(*l).unwrap();
        }
        let mut bulk = CommitmentTree::new(10, [0u8; 32], Sha256Hasher).unwrap();
        bulk.bulk_insert(&leaves).unwrap();
        assert_eq!(incremental.root(), bulk.root());
    }

    proptest! {
        #[test]
        fn prop_rebuild_equivalence(
            leaves in prop::collection::vec(any::<[u8; 32]>(), 0..64),
            zero in any::<[u8; 32]>(),
        ) {
            let mut incremental = CommitmentTree::new(6, zero, Sha256Hasher).unwrap();
            for l in &leaves {
                incremental.insert(*l).unwrap();
            }
            let mut bulk = CommitmentTree::new(6, zero, Sha256Hasher).unwrap();
            bulk.bulk_insert(&leaves).unwrap();

            prop_assert_eq!(incremental.root(), bulk.root());
            prop_assert_eq!(incremental.layers(), bulk.layers());
        }

        #[test]
        fn prop_every_path_reaches_root(leaves in prop::collection::vec(any::<[u8; 32]>(), 1..40)) {
            let mut tree = CommitmentTree::new(6, [0u8; 32], Blake3Hasher).unwrap();
            tree.bulk_insert(&leaves).unwrap();
            let root = tree.root();
            for (i, l) in leaves.iter().enumerate() {
                let path = tree.path(i as u64).unwrap();
                prop_assert_eq!(path.compute_root(l, &Blake3Hasher), root);
            }
        }
    }
}
