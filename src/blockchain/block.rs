use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{CANCEL_POLL_INTERVAL, GENESIS_PREVIOUS_HASH};

/// A single block in the ledger holding an opaque payload.
///
/// The payload shape is decided at the application boundary (votes,
/// registrations, ...); hashing and storage never branch on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub index: u64,
    pub timestamp: i64, // Unix timestamp (UTC, seconds)
    pub data: Value,
    pub previous_hash: String,
    pub nonce: u64,   // Proof-of-Work nonce
    pub hash: String, // Cached hash of the block
}

impl Block {
    /// Create the genesis block (first block in the chain).
    /// Not mined yet; the chain mines it to its difficulty on construction.
    pub fn genesis() -> Self {
        Self::new(
            0,
            GENESIS_PREVIOUS_HASH.to_string(),
            serde_json::json!({ "message": "Genesis Block" }),
        )
    }

    /// Create a new block (not mined yet). Call `mine()` to perform PoW.
    pub fn new(index: u64, previous_hash: String, data: Value) -> Self {
        Self::new_with_timestamp(index, previous_hash, data, Utc::now().timestamp())
    }

    /// Create a block with an explicit timestamp (deterministic construction).
    pub fn new_with_timestamp(
        index: u64,
        previous_hash: String,
        data: Value,
        timestamp: i64,
    ) -> Self {
        let mut block = Self {
            index,
            timestamp,
            data,
            previous_hash,
            nonce: 0,
            hash: String::new(),
        };
        block.hash = block.compute_hash();
        block
    }

    /// Compute the SHA-256 hash of this block over its fields (excluding the
    /// `hash` field itself). The preimage is a canonical JSON object: keys
    /// sorted, compact separators, so the digest is stable across processes.
    pub fn compute_hash(&self) -> String {
        let preimage = serde_json::json!({
            "index": self.index,
            "timestamp": self.timestamp,
            "data": self.data,
            "previous_hash": self.previous_hash,
            "nonce": self.nonce,
        });
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&preimage).expect("serialize preimage"));
        hex::encode(hasher.finalize())
    }

    /// Perform Proof-of-Work by finding a nonce that yields a hash starting
    /// with `difficulty` leading zeros (in hex). Exhaustive scan from the
    /// current nonce; expected cost is about 16^difficulty hash evaluations.
    pub fn mine(&mut self, difficulty: u32) {
        let target_prefix = "0".repeat(difficulty as usize);
        loop {
            self.hash = self.compute_hash();
            if self.hash.starts_with(&target_prefix) {
                break;
            }
            self.nonce = self.nonce.wrapping_add(1);
        }
    }

    /// Same search as `mine`, but polls `cancel` every `CANCEL_POLL_INTERVAL`
    /// attempts. Returns false if cancelled before a solution was found; the
    /// block is then partially advanced and must be discarded by the caller.
    pub fn mine_with_cancel(&mut self, difficulty: u32, cancel: &AtomicBool) -> bool {
        let target_prefix = "0".repeat(difficulty as usize);
        let mut attempts: u64 = 0;
        loop {
            self.hash = self.compute_hash();
            if self.hash.starts_with(&target_prefix) {
                return true;
            }
            self.nonce = self.nonce.wrapping_add(1);
            attempts += 1;
            if attempts % CANCEL_POLL_INTERVAL == 0 && cancel.load(Ordering::Relaxed) {
                return false;
            }
        }
    }

    /// Validate that the block's cached `hash` matches its content.
    /// (Does NOT validate chain linkage or difficulty.)
    pub fn is_valid(&self) -> bool {
        self.hash == self.compute_hash()
    }

    /// Count of leading `'0'` hex characters in the cached hash.
    pub fn leading_zeros(&self) -> u32 {
        self.hash.chars().take_while(|c| *c == '0').count() as u32
    }

    /// True when the cached hash satisfies the PoW difficulty target.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zeros() >= difficulty
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use super::Block;
    use crate::blockchain::GENESIS_PREVIOUS_HASH;

    #[test]
    fn genesis_has_sentinel_previous_hash() {
        let b = Block::genesis();
        assert_eq!(b.index, 0);
        assert_eq!(b.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(b.hash, b.compute_hash());
    }

    #[test]
    fn mining_produces_leading_zeros() {
        let mut b = Block::new(1, "prev".into(), serde_json::json!({ "v": 1 }));
        b.mine(2);
        assert!(b.hash.starts_with("00"));
        assert!(b.is_valid());
        assert!(b.meets_difficulty(2));
        assert!(b.leading_zeros() >= 2);
    }

    #[test]
    fn mining_search_is_deterministic() {
        let data = serde_json::json!({ "voter_id": "v-1", "vote": "A" });
        let mut a = Block::new_with_timestamp(3, "prev".into(), data.clone(), 1_700_000_000);
        let mut b = Block::new_with_timestamp(3, "prev".into(), data, 1_700_000_000);
        a.mine(2);
        b.mine(2);
        assert_eq!(a.nonce, b.nonce);
        assert_eq!(a.hash, b.hash);
    }

    #[test]
    fn invalid_when_mutated() {
        let mut b = Block::new(2, "prev".into(), serde_json::json!({ "v": 1 }));
        b.mine(2);
        let old_hash = b.hash.clone();

        // Tamper with the payload without re-mining
        b.data = serde_json::json!({ "v": 2 });

        assert_ne!(old_hash, b.compute_hash());
        assert!(!b.is_valid());
    }

    #[test]
    fn round_trip_preserves_stored_hash() {
        let mut b = Block::new(5, "prev".into(), serde_json::json!({ "v": 1 }));
        b.mine(1);
        // Tampered stored hash must survive a round trip verbatim
        b.hash = "deadbeef".into();

        let json = serde_json::to_string(&b).unwrap();
        let back: Block = serde_json::from_str(&json).unwrap();
        assert_eq!(back.hash, "deadbeef");
        assert_eq!(back.index, b.index);
        assert_eq!(back.timestamp, b.timestamp);
        assert_eq!(back.nonce, b.nonce);
        assert_eq!(back.data, b.data);
        assert!(!back.is_valid());
    }

    #[test]
    fn deserialization_rejects_missing_fields() {
        // No silent defaults for required fields
        let res: Result<Block, _> =
            serde_json::from_str(r#"{"index":0,"timestamp":1,"data":null,"nonce":0}"#);
        assert!(res.is_err());
    }

    #[test]
    fn cancelled_search_reports_no_solution() {
        let cancel = AtomicBool::new(true);
        let mut b = Block::new(1, "prev".into(), serde_json::json!({ "v": 1 }));
        // Difficulty far beyond what the poll interval could reach by luck
        assert!(!b.mine_with_cancel(16, &cancel));
    }
}
