//! veil commitment tree
//!
//! fixed-depth, append-only binary merkle tree mirroring a privacy pool's
//! on-chain commitment tree.
//!
//! ```text
//!   level 2          root
//!                  /      \
//!   level 1     h01        h2z
//!              /   \      /   \
//!   level 0   c0   c1    c2   zeros[0]
//! ```
//!
//! positions past the last inserted leaf are filled with per-level zero
//! values (`zeros[0] = zero_element`, `zeros[i] = H(zeros[i-1], zeros[i-1])`),
//! so a partially filled tree has the same root as the contract computes.
//!
//! two ways to build a tree, which must always agree:
//! - [`CommitmentTree::insert`]: one leaf, O(levels) rehash (normal operation)
//! - [`CommitmentTree::bulk_insert`]: replace all leaves, rehash every level
//!   (reconstruction)

pub mod error;
pub mod hasher;
pub mod path;
pub mod serialize;
pub mod tree;

pub use error::{Result, TreeError};
pub use hasher::{Blake3Hasher, Sha256Hasher, TreeHasher};
pub use path::MerklePath;
pub use serialize::SerializedTree;
pub use tree::CommitmentTree;

/// 32-byte tree node
pub type Hash = [u8; 32];

/// depth used by the pool contracts (2^20 deposits per pool)
pub const DEFAULT_LEVELS: usize = 20;

/// deepest supported tree
pub const MAX_LEVELS: usize = 32;

/// layers at least this wide are hashed in parallel
pub const PARALLEL_THRESHOLD: usize = 128;

/// hex helper for log lines (first 8 bytes)
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..8])
}
