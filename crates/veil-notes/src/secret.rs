//! note key material and backup strings
//!
//! a note is two random 31-byte values. the commitment binds both, the
//! nullifier hash binds only the nullifier, so revealing it at withdrawal
//! does not reveal which commitment is being spent.
//!
//! backup format: `veil-<currency>-<denomination>-<chain id>-0x<124 hex chars>`
//! where the hex is `nullifier || secret`.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{NoteError, Result};
use crate::note::{Commitment, NullifierHash};
use crate::pool::PoolId;
use crate::{BACKUP_PREFIX, NOTE_DOMAIN, NULLIFIER_DOMAIN};

pub const SECRET_LEN: usize = 31;

#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteSecret {
    pub nullifier: [u8; SECRET_LEN],
    pub secret: [u8; SECRET_LEN],
}

impl NoteSecret {
    pub fn new(nullifier: [u8; SECRET_LEN], secret: [u8; SECRET_LEN]) -> Self {
        Self { nullifier, secret }
    }

    pub fn random<R: RngCore>(rng: &mut R) -> Self {
        let mut nullifier = [0u8; SECRET_LEN];
        let mut secret = [0u8; SECRET_LEN];
        rng.fill_bytes(&mut nullifier);
        rng.fill_bytes(&mut secret);
        Self { nullifier, secret }
    }

    pub fn commitment(&self) -> Commitment {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NOTE_DOMAIN);
        hasher.update(&self.nullifier);
        hasher.update(&self.secret);
        Commitment(*hasher.finalize().as_bytes())
    }

    pub fn nullifier_hash(&self) -> NullifierHash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(NULLIFIER_DOMAIN);
        hasher.update(&self.nullifier);
        NullifierHash(*hasher.finalize().as_bytes())
    }

    /// encode as a backup string for `pool`
    pub fn to_backup(&self, pool: &PoolId) -> String {
        let mut preimage = Vec::with_capacity(2 * SECRET_LEN);
        preimage.extend_from_slice(&self.nullifier);
        preimage.extend_from_slice(&self.secret);
        format!(
            "{}-{}-{}-{}-0x{}",
            BACKUP_PREFIX,
            pool.currency,
            pool.denomination,
            pool.chain_id,
            hex::encode(preimage)
        )
    }

    /// parse a backup string into its pool and key material
    pub fn from_backup(s: &str) -> Result<(PoolId, Self)> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        let [prefix, currency, denomination, chain_id, payload] = parts.as_slice() else {
            return Err(NoteError::InvalidNote(format!(
                "expected 5 dash-separated fields, found {}",
                parts.len()
            )));
        };

        if *prefix != BACKUP_PREFIX {
            return Err(NoteError::InvalidNote(format!("unknown prefix {prefix:?}")));
        }
        let chain_id: u64 = chain_id
            .parse()
            .map_err(|_| NoteError::InvalidNote(format!("bad chain id {chain_id:?}")))?;

        let hex_payload = payload
            .strip_prefix("0x")
            .ok_or_else(|| NoteError::InvalidNote("payload must start with 0x".into()))?;
        let bytes = hex::decode(hex_payload)
            .map_err(|e| NoteError::InvalidNote(format!("payload hex: {e}")))?;
        if bytes.len() != 2 * SECRET_LEN {
            return Err(NoteError::InvalidNote(format!(
                "payload is {} bytes, expected {}",
                bytes.len(),
                2 * SECRET_LEN
            )));
        }

        let mut nullifier = [0u8; SECRET_LEN];
        let mut secret = [0u8; SECRET_LEN];
        nullifier.copy_from_slice(&bytes[..SECRET_LEN]);
        secret.copy_from_slice(&bytes[SECRET_LEN..]);

        Ok((
            PoolId::new(chain_id, currency, denomination),
            Self { nullifier, secret },
        ))
    }
}

impl std::fmt::Debug for NoteSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.debug_struct("NoteSecret")
            .field("commitment", &self.commitment().to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    #[test]
    fn test_derivations_are_deterministic() {
        let s = NoteSecret::new([1u8; 31], [2u8; 31]);
        assert_eq!(s.commitment(), NoteSecret::new([1u8; 31], [2u8; 31]).commitment());

        // secret changes the commitment but not the nullifier hash
        let t = NoteSecret::new([1u8; 31], [3u8; 31]);
        assert_ne!(s.commitment(), t.commitment());
        assert_eq!(s.nullifier_hash(), t.nullifier_hash());
    }

    #[test]
    fn test_backup_string() {
        let mut rng = ChaCha20Rng::seed_from_u64(7);
        let secret = NoteSecret::random(&mut rng);
        let pool = PoolId::new(1, "ETH", "0.1");

        let backup = secret.to_backup(&pool);
        assert!(backup.starts_with("veil-eth-0.1-1-0x"));

        let (parsed_pool, parsed) = NoteSecret::from_backup(&backup).unwrap();
        assert_eq!(parsed_pool, pool);
        assert_eq!(parsed, secret);
    }

    #[test]
    fn test_backup_rejects_garbage() {
        assert!(NoteSecret::from_backup("veil-eth-0.1-1").is_err());
        assert!(NoteSecret::from_backup("tornado-eth-0.1-1-0x00").is_err());
        assert!(NoteSecret::from_backup("veil-eth-0.1-x-0x00").is_err());
        assert!(NoteSecret::from_backup("veil-eth-0.1-1-0x00ff").is_err());
        assert!(NoteSecret::from_backup("veil-eth-0.1-1-abcd").is_err());
    }

    #[test]
    fn test_debug_hides_material() {
        let s = NoteSecret::new([0x11; 31], [0x22; 31]);
        let printed = format!("{:?}", s);
        assert!(printed.contains("commitment"));
        assert!(!printed.contains(&hex::encode([0x11u8; 31])));
        assert!(!printed.contains(&hex::encode([0x22u8; 31])));
    }
}
