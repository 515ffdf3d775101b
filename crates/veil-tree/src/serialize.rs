//! tree snapshots
//!
//! a snapshot stores every layer, so restoring is a structural check rather
//! than a rehash. the hasher is not part of the snapshot: passing a different
//! one to [`CommitmentTree::deserialize`] yields a tree that looks fine and
//! computes wrong roots for every later insert. callers must pair snapshots
//! with the hasher that produced them.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TreeError};
use crate::{CommitmentTree, Hash, TreeHasher, MAX_LEVELS};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedTree {
    pub levels: usize,
    /// per-level zero values, `levels + 1` entries
    pub zeros: Vec<Hash>,
    /// every layer, leaves first
    pub layers: Vec<Vec<Hash>>,
}

impl<H: TreeHasher> CommitmentTree<H> {
    pub fn serialize(&self) -> SerializedTree {
        SerializedTree {
            levels: self.levels(),
            zeros: self.zeros().to_vec(),
            layers: self.layers().to_vec(),
        }
    }

    /// restore a snapshot without recomputing any node.
    ///
    /// fails with `TreeCorruption` if the layer shapes do not describe a
    /// valid tree; node values are trusted as-is.
    pub fn deserialize(data: SerializedTree, hasher: H) -> Result<Self> {
        let SerializedTree { levels, zeros, layers } = data;

        if levels == 0 || levels > MAX_LEVELS {
            return Err(TreeError::InvalidLevels(levels));
        }
        if zeros.len() != levels + 1 {
            return Err(TreeError::TreeCorruption(format!(
                "expected {} zero values, found {}",
                levels + 1,
                zeros.len()
            )));
        }
        if layers.len() != levels + 1 {
            return Err(TreeError::TreeCorruption(format!(
                "expected {} layers, found {}",
                levels + 1,
                layers.len()
            )));
        }

        let capacity = 1u64 << levels;
        if layers[0].len() as u64 > capacity {
            return Err(TreeError::TreeCorruption(format!(
                "{} leaves exceed capacity {}",
                layers[0].len(),
                capacity
            )));
        }

        for level in 1..=levels {
            let expected = (layers[level - 1].len() + 1) / 2;
            if layers[level].len() != expected {
                return Err(TreeError::TreeCorruption(format!(
                    "layer {} has {} nodes, expected {}",
                    level,
                    layers[level].len(),
                    expected
                )));
            }
        }

        Ok(CommitmentTree::from_parts(levels, zeros, layers, hasher))
    }

    /// bincode encoding of [`serialize`](Self::serialize)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(&self.serialize()).map_err(|e| TreeError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8], hasher: H) -> Result<Self> {
        let data: SerializedTree =
            bincode::deserialize(bytes).map_err(|e| TreeError::Serialization(e.to_string()))?;
        Self::deserialize(data, hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Blake3Hasher, Sha256Hasher};
    use proptest::prelude::*;

    fn filled(n: u8) -> CommitmentTree<Sha256Hasher> {
        let mut tree = CommitmentTree::new(5, [3u8; 32], Sha256Hasher).unwrap();
        for i in 0..n {
            tree.insert([i; 32]).unwrap();
        }
        tree
    }

    #[test]
    fn test_roundtrip_preserves_root_and_paths() {
        let tree = filled(13);
        let restored = CommitmentTree::from_bytes(&tree.to_bytes().unwrap(), Sha256Hasher).unwrap();

        assert_eq!(restored.root(), tree.root());
        assert_eq!(restored.zero_element(), [3u8; 32]);
        for i in 0..13 {
            assert_eq!(restored.path(i).unwrap(), tree.path(i).unwrap());
        }
    }

    #[test]
    fn test_restored_tree_keeps_growing() {
        let mut original = filled(6);
        let mut restored = CommitmentTree::deserialize(original.serialize(), Sha256Hasher).unwrap();
        original.insert([99u8; 32]).unwrap();
        restored.insert([99u8; 32]).unwrap();
        assert_eq!(original.root(), restored.root());
    }

    #[test]
    fn test_wrong_hasher_is_not_detected() {
        // documented sharp edge: shape is valid, later roots diverge
        let original = filled(4);
        let mut wrong = CommitmentTree::deserialize(original.serialize(), Blake3Hasher).unwrap();
        assert_eq!(wrong.root(), original.root());

        let mut right = original.clone();
        right.insert([50u8; 32]).unwrap();
        wrong.insert([50u8; 32]).unwrap();
        assert_ne!(wrong.root(), right.root());
    }

    #[test]
    fn test_corrupt_layer_length_is_fatal() {
        let mut data = filled(5).serialize();
        data.layers[2].push([0u8; 32]);
        assert!(matches!(
            CommitmentTree::deserialize(data, Sha256Hasher),
            Err(TreeError::TreeCorruption(_))
        ));
    }

    #[test]
    fn test_missing_zero_values_is_fatal() {
        let mut data = filled(2).serialize();
        data.zeros.pop();
        assert!(matches!(
            CommitmentTree::deserialize(data, Sha256Hasher),
            Err(TreeError::TreeCorruption(_))
        ));
    }

    #[test]
    fn test_garbage_bytes() {
        assert!(matches!(
            CommitmentTree::from_bytes(&[1, 2, 3], Sha256Hasher),
            Err(TreeError::Serialization(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(leaves in prop::collection::vec(any::<[u8; 32]>(), 0..32)) {
            let mut tree = CommitmentTree::new(5, [0u8; 32], Blake3Hasher).unwrap();
            tree.bulk_insert(&leaves).unwrap();
            let restored = CommitmentTree::deserialize(tree.serialize(), Blake3Hasher).unwrap();
            prop_assert_eq!(restored.root(), tree.root());
            for i in 0..leaves.len() as u64 {
                prop_assert_eq!(restored.path(i).unwrap(), tree.path(i).unwrap());
            }
        }
    }
}
