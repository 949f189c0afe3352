use std::collections::HashMap;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use super::{Block, Blockchain, GENESIS_PREVIOUS_HASH};

/// Detects and resolves forks for one ledger against externally supplied
/// candidate chains. Stateless; every call operates on caller snapshots.
pub struct ForkHandler<'a> {
    blockchain: &'a mut Blockchain,
}

/// Classification of a single received block.
#[derive(Debug, Clone, Serialize)]
pub struct ForkAssessment {
    pub fork_detected: bool,
    pub reason: String,
    pub needs_full_sync: bool,
}

/// An identity recorded with conflicting values across two branches
/// (a double vote, in the voting application's terms).
#[derive(Debug, Clone, Serialize)]
pub struct RecordConflict {
    pub identity: String,
    pub local_value: Value,
    pub local_block_index: u64,
    pub candidate_value: Value,
    pub candidate_block_index: u64,
}

impl<'a> ForkHandler<'a> {
    pub fn new(blockchain: &'a mut Blockchain) -> Self {
        Self { blockchain }
    }

    /// Classify a received block: same three regimes as the chain's own
    /// reconciliation, but stricter — an invalid would-be next block is
    /// treated as a possible fork needing full sync, not a plain rejection.
    pub fn detect_fork(&self, received: &Block) -> ForkAssessment {
        let len = self.blockchain.len() as u64;

        if received.index > len {
            return ForkAssessment {
                fork_detected: true,
                reason: format!("peer is ahead by {} blocks", received.index - len),
                needs_full_sync: true,
            };
        }

        if received.index < len {
            let existing = &self.blockchain.chain[received.index as usize];
            return if existing.hash == received.hash {
                ForkAssessment {
                    fork_detected: false,
                    reason: "block already in chain".to_string(),
                    needs_full_sync: false,
                }
            } else {
                ForkAssessment {
                    fork_detected: true,
                    reason: format!("fork detected at index {}", received.index),
                    needs_full_sync: true,
                }
            };
        }

        // received.index == len: might be the next block
        let latest = self.blockchain.last_block();
        if received.previous_hash == latest.hash {
            if self.blockchain.is_valid_block(received, latest) {
                ForkAssessment {
                    fork_detected: false,
                    reason: "valid next block".to_string(),
                    needs_full_sync: false,
                }
            } else {
                ForkAssessment {
                    fork_detected: true,
                    reason: "invalid next block, possible fork".to_string(),
                    needs_full_sync: true,
                }
            }
        } else {
            ForkAssessment {
                fork_detected: true,
                reason: "fork detected: different previous hash".to_string(),
                needs_full_sync: true,
            }
        }
    }

    /// Resolve a fork by the longest valid chain rule. Returns true iff the
    /// local chain was replaced. Candidates of equal length never win; among
    /// multiple strictly-longer valid candidates of the same length, the
    /// first encountered wins.
    pub fn resolve_fork(&mut self, competing_chains: &[Vec<Block>]) -> bool {
        info!(
            "resolving fork between {} chains",
            competing_chains.len() + 1
        );

        let mut best: Option<&Vec<Block>> = None;
        let mut best_len = self.blockchain.len();

        for candidate in competing_chains {
            if candidate.len() <= best_len {
                continue;
            }
            if !self.is_valid_candidate(candidate) {
                continue;
            }
            info!("found longer valid chain: {} blocks", candidate.len());
            best_len = candidate.len();
            best = Some(candidate);
        }

        match best {
            Some(chain) => {
                let old_len = self.blockchain.len();
                self.blockchain.chain = chain.clone();
                info!("chain replaced: {} blocks -> {} blocks", old_len, chain.len());
                true
            }
            None => {
                info!("our chain is the longest valid chain");
                false
            }
        }
    }

    /// Validate a candidate chain from scratch: genesis shape, then every
    /// block against its predecessor within the candidate.
    fn is_valid_candidate(&self, candidate: &[Block]) -> bool {
        let Some(genesis) = candidate.first() else {
            return false;
        };
        if genesis.index != 0 || genesis.previous_hash != GENESIS_PREVIOUS_HASH {
            warn!("invalid genesis block in candidate chain");
            return false;
        }
        for i in 1..candidate.len() {
            if !self.blockchain.is_valid_block(&candidate[i], &candidate[i - 1]) {
                warn!("invalid block at index {i} in candidate chain");
                return false;
            }
        }
        true
    }

    /// Position-by-position hash comparison from genesis over the overlap.
    /// `None` when even the genesis blocks differ; the last matching index
    /// before the first mismatch otherwise; `min(len) - 1` when one chain is
    /// a prefix of the other.
    pub fn find_common_ancestor(&self, competing_chain: &[Block]) -> Option<usize> {
        let min_length = self.blockchain.len().min(competing_chain.len());

        for i in 0..min_length {
            if self.blockchain.chain[i].hash != competing_chain[i].hash {
                return if i == 0 { None } else { Some(i - 1) };
            }
        }

        min_length.checked_sub(1)
    }

    /// The local blocks strictly after a fork point (empty when the point is
    /// the head or out of range).
    pub fn blocks_after_fork(&self, fork_point: usize) -> &[Block] {
        if fork_point + 1 >= self.blockchain.len() {
            &[]
        } else {
            &self.blockchain.chain[fork_point + 1..]
        }
    }

    /// Bring the local chain up to date from a competing chain.
    ///
    /// Past the local head this appends block by block, validating each
    /// against the growing local chain and rolling back fully on the first
    /// invalid one. Within the overlap it finds the common ancestor and keeps
    /// whichever suffix carries strictly more accumulated work.
    pub fn sync_missing_blocks(
        &mut self,
        competing_chain: &[Block],
        sync_from_index: usize,
    ) -> (bool, String) {
        if sync_from_index >= competing_chain.len() {
            return (false, "invalid sync index".to_string());
        }

        let entry_len = self.blockchain.len();
        if sync_from_index >= entry_len {
            for (i, block) in competing_chain.iter().enumerate().skip(sync_from_index) {
                let valid = self
                    .blockchain
                    .is_valid_block(block, self.blockchain.last_block());
                if !valid {
                    warn!("invalid block found during sync at index {i}");
                    self.blockchain.chain.truncate(entry_len);
                    return (false, format!("invalid block at index {i} during sync"));
                }
                self.blockchain.chain.push(block.clone());
            }
            let synced = competing_chain.len() - sync_from_index;
            info!("synced {synced} blocks");
            return (true, format!("synced {synced} blocks"));
        }

        // The competing chain diverges inside our history: arbitrate by work
        let Some(ancestor) = self.find_common_ancestor(&competing_chain[..=sync_from_index])
        else {
            return (false, "no common ancestor found".to_string());
        };

        let local_work = chain_work(&self.blockchain.chain[ancestor + 1..]);
        let competing_work = chain_work(&competing_chain[ancestor + 1..]);

        if competing_work > local_work {
            self.blockchain.chain.truncate(ancestor + 1);
            self.blockchain
                .chain
                .extend_from_slice(&competing_chain[ancestor + 1..]);
            info!("chain replaced after fork at index {ancestor}");
            (true, format!("chain replaced after fork at index {ancestor}"))
        } else {
            info!("our chain has more work, keeping it after fork at index {ancestor}");
            (false, "our chain has more work".to_string())
        }
    }

    /// Scan a competing chain for identities already recorded locally with a
    /// different value. Key names are caller-supplied; the core never
    /// interprets them. Identities must serialize as JSON strings.
    pub fn detect_conflicting_records(
        &self,
        competing_chain: &[Block],
        identity_key: &str,
        value_key: &str,
    ) -> Vec<RecordConflict> {
        // First-seen value per identity across our own chain
        let mut first_seen: HashMap<String, (Value, u64)> = HashMap::new();
        for block in &self.blockchain.chain {
            for (identity, value) in transaction_records(block, identity_key, value_key) {
                first_seen.entry(identity).or_insert((value, block.index));
            }
        }

        let mut conflicts = Vec::new();
        for block in competing_chain {
            for (identity, value) in transaction_records(block, identity_key, value_key) {
                if let Some((local_value, local_index)) = first_seen.get(&identity) {
                    if *local_value != value {
                        conflicts.push(RecordConflict {
                            identity,
                            local_value: local_value.clone(),
                            local_block_index: *local_index,
                            candidate_value: value,
                            candidate_block_index: block.index,
                        });
                    }
                }
            }
        }

        if !conflicts.is_empty() {
            warn!("detected {} conflicting records", conflicts.len());
        }
        conflicts
    }
}

/// Cumulative work proxy for a chain segment: 16^(leading hex zeros) per
/// block, rewarding hashes that exceed the minimum difficulty.
pub fn chain_work(segment: &[Block]) -> u128 {
    segment.iter().fold(0u128, |acc, b| {
        acc.saturating_add(16u128.saturating_pow(b.leading_zeros()))
    })
}

/// Extract (identity, value) pairs from a block's transaction-shaped payload.
/// Blocks without a `transactions` array contribute nothing.
fn transaction_records(block: &Block, identity_key: &str, value_key: &str) -> Vec<(String, Value)> {
    let Some(txs) = block.data.get("transactions").and_then(Value::as_array) else {
        return Vec::new();
    };
    txs.iter()
        .filter_map(|tx| {
            let identity = tx.get(identity_key)?.as_str()?;
            let value = tx.get(value_key)?;
            Some((identity.to_string(), value.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ForkHandler, chain_work};
    use crate::blockchain::{Block, Blockchain};

    fn next_block(prev: &Block, data: serde_json::Value, difficulty: u32) -> Block {
        let mut b = Block::new(prev.index + 1, prev.hash.clone(), data);
        b.mine(difficulty);
        b
    }

    /// Genesis + one mined block at difficulty 1.
    fn two_block_chain() -> Blockchain {
        let mut bc = Blockchain::new(1);
        bc.add_data(json!({ "voter_id": "v-1", "vote": "A" }));
        bc.mine_pending_data("local-miner").unwrap();
        bc
    }

    #[test]
    fn detect_fork_classifies_all_regimes() {
        let mut bc = two_block_chain();
        let known = bc.chain[1].clone();
        let genesis = bc.chain[0].clone();

        let handler = ForkHandler::new(&mut bc);

        // Peer way ahead
        let mut ahead = known.clone();
        ahead.index = 9;
        let a = handler.detect_fork(&ahead);
        assert!(a.fork_detected);
        assert!(a.needs_full_sync);

        // Already known block
        let a = handler.detect_fork(&known);
        assert!(!a.fork_detected);
        assert!(!a.needs_full_sync);

        // Different block at a known index
        let rival = next_block(&genesis, json!({ "v": "rival" }), 1);
        let a = handler.detect_fork(&rival);
        assert!(a.fork_detected);
        assert!(a.needs_full_sync);

        // Valid next block
        let next = next_block(&known, json!({ "v": 2 }), 1);
        let a = handler.detect_fork(&next);
        assert!(!a.fork_detected);
        assert!(!a.needs_full_sync);

        // Would-be next block with broken linkage
        let mut detached = next_block(&known, json!({ "v": 3 }), 1);
        detached.previous_hash = "f".repeat(64);
        detached.hash = detached.compute_hash();
        let a = handler.detect_fork(&detached);
        assert!(a.fork_detected);
        assert!(a.needs_full_sync);

        // Linked next block that fails validation: possible fork, stricter
        // than the chain's plain rejection
        let mut invalid_next = next.clone();
        invalid_next.data = json!({ "v": "tampered" });
        let a = handler.detect_fork(&invalid_next);
        assert!(a.fork_detected);
        assert!(a.needs_full_sync);
    }

    #[test]
    fn resolve_fork_ignores_equal_length_candidates() {
        let mut bc = two_block_chain();
        let genesis = bc.chain[0].clone();
        let head_hash = bc.last_block().hash.clone();

        let fork1 = vec![genesis.clone(), next_block(&genesis, json!({ "v": "f1" }), 1)];
        let fork2 = vec![genesis.clone(), next_block(&genesis, json!({ "v": "f2" }), 1)];

        let mut handler = ForkHandler::new(&mut bc);
        assert!(!handler.resolve_fork(&[fork1, fork2]));
        assert_eq!(bc.len(), 2);
        assert_eq!(bc.last_block().hash, head_hash);
    }

    #[test]
    fn resolve_fork_adopts_the_longest_valid_candidate() {
        let mut bc = two_block_chain();
        let genesis = bc.chain[0].clone();

        // fork1: local length + 1, fork2: local length + 2
        let f1b1 = next_block(&genesis, json!({ "v": "f1-1" }), 1);
        let f1b2 = next_block(&f1b1, json!({ "v": "f1-2" }), 1);
        let fork1 = vec![genesis.clone(), f1b1, f1b2];

        let f2b1 = next_block(&genesis, json!({ "v": "f2-1" }), 1);
        let f2b2 = next_block(&f2b1, json!({ "v": "f2-2" }), 1);
        let f2b3 = next_block(&f2b2, json!({ "v": "f2-3" }), 1);
        let fork2 = vec![genesis, f2b1, f2b2, f2b3];

        let mut handler = ForkHandler::new(&mut bc);
        assert!(handler.resolve_fork(&[fork1, fork2.clone()]));
        assert_eq!(bc.len(), 4);
        assert_eq!(bc.last_block().hash, fork2[3].hash);
    }

    #[test]
    fn resolve_fork_rejects_invalid_candidates_regardless_of_length() {
        let mut bc = two_block_chain();
        let genesis = bc.chain[0].clone();

        let b1 = next_block(&genesis, json!({ "v": 1 }), 1);
        let b2 = next_block(&b1, json!({ "v": 2 }), 1);
        let mut tampered = vec![genesis, b1, b2];
        tampered[1].data = json!({ "v": "rewritten" });

        let mut handler = ForkHandler::new(&mut bc);
        assert!(!handler.resolve_fork(&[tampered]));
        assert_eq!(bc.len(), 2);
    }

    #[test]
    fn common_ancestor_at_the_divergence_point() {
        // Local: genesis + blocks 1..=3; candidate re-mines block 3 only
        let mut bc = Blockchain::new(1);
        for i in 1..=3 {
            bc.add_data(json!({ "v": i }));
            bc.mine_pending_data("m").unwrap();
        }
        let mut candidate = bc.chain.clone();
        candidate[3] = next_block(&candidate[2], json!({ "v": "other" }), 1);

        let handler = ForkHandler::new(&mut bc);
        assert_eq!(handler.find_common_ancestor(&candidate), Some(2));
    }

    #[test]
    fn common_ancestor_prefix_and_disjoint_cases() {
        let mut bc = two_block_chain();
        let prefix = vec![bc.chain[0].clone()];
        let mut foreign_genesis = Block::genesis();
        foreign_genesis.data = json!({ "message": "other network" });
        foreign_genesis.mine(1);

        let handler = ForkHandler::new(&mut bc);
        // One chain is a prefix of the other
        assert_eq!(handler.find_common_ancestor(&prefix), Some(0));
        // Different genesis blocks share nothing
        assert_eq!(handler.find_common_ancestor(&[foreign_genesis]), None);
        // Empty candidate shares nothing either
        assert_eq!(handler.find_common_ancestor(&[]), None);
    }

    #[test]
    fn blocks_after_fork_returns_the_local_suffix() {
        let mut bc = Blockchain::new(1);
        for i in 1..=3 {
            bc.add_data(json!({ "v": i }));
            bc.mine_pending_data("m").unwrap();
        }

        let handler = ForkHandler::new(&mut bc);
        let suffix = handler.blocks_after_fork(1);
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].index, 2);
        assert!(handler.blocks_after_fork(3).is_empty());
        assert!(handler.blocks_after_fork(10).is_empty());
    }

    #[test]
    fn chain_work_rewards_extra_leading_zeros() {
        let mut low = Block::new(1, "prev".into(), json!({ "v": 1 }));
        low.hash = format!("1{}", "a".repeat(63));
        let mut high = low.clone();
        high.hash = format!("000{}", "a".repeat(61));

        assert_eq!(chain_work(&[low.clone()]), 1);
        assert_eq!(chain_work(&[high.clone()]), 16u128.pow(3));
        assert!(chain_work(&[high]) > chain_work(&[low]));
    }

    #[test]
    fn sync_appends_missing_blocks_past_the_head() {
        let mut bc = two_block_chain();
        let mut competing = bc.chain.clone();
        let b2 = next_block(&competing[1], json!({ "v": 2 }), 1);
        let b3 = next_block(&b2, json!({ "v": 3 }), 1);
        competing.push(b2);
        competing.push(b3);

        let mut handler = ForkHandler::new(&mut bc);
        let (ok, reason) = handler.sync_missing_blocks(&competing, 2);
        assert!(ok, "{reason}");
        assert_eq!(bc.len(), 4);
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn sync_rolls_back_fully_on_an_invalid_block() {
        let mut bc = two_block_chain();
        let mut competing = bc.chain.clone();
        let b2 = next_block(&competing[1], json!({ "v": 2 }), 1);
        let mut b3 = next_block(&b2, json!({ "v": 3 }), 1);
        b3.data = json!({ "v": "tampered" });
        competing.push(b2);
        competing.push(b3);

        let mut handler = ForkHandler::new(&mut bc);
        let (ok, reason) = handler.sync_missing_blocks(&competing, 2);
        assert!(!ok);
        assert!(reason.contains("invalid block at index 3"));
        // No partial extension survives
        assert_eq!(bc.len(), 2);
    }

    #[test]
    fn sync_rejects_an_out_of_range_index() {
        let mut bc = two_block_chain();
        let competing = bc.chain.clone();
        let mut handler = ForkHandler::new(&mut bc);
        let (ok, reason) = handler.sync_missing_blocks(&competing, 5);
        assert!(!ok);
        assert_eq!(reason, "invalid sync index");
    }

    #[test]
    fn sync_arbitrates_overlapping_forks_by_work() {
        // Work comparison reads hashes only, so fabricate them precisely
        let genesis = Block::genesis();

        let mut weak = Block::new(1, genesis.hash.clone(), json!({ "v": "weak" }));
        weak.hash = format!("1{}", "b".repeat(63)); // 16^0 = 1

        let mut strong = Block::new(1, genesis.hash.clone(), json!({ "v": "strong" }));
        strong.hash = format!("00{}", "c".repeat(62)); // 16^2 = 256

        let mut bc = Blockchain::from_blocks(vec![genesis.clone(), weak.clone()], 1);
        let competing = vec![genesis.clone(), strong.clone()];

        let mut handler = ForkHandler::new(&mut bc);
        let (replaced, _) = handler.sync_missing_blocks(&competing, 1);
        assert!(replaced);
        assert_eq!(bc.last_block().hash, strong.hash);

        // The weaker branch never displaces the stronger one
        let mut handler = ForkHandler::new(&mut bc);
        let (replaced, reason) = handler.sync_missing_blocks(&[genesis, weak], 1);
        assert!(!replaced);
        assert_eq!(reason, "our chain has more work");
        assert_eq!(bc.last_block().hash, strong.hash);
    }

    #[test]
    fn conflicting_records_are_flagged_across_branches() {
        let mut bc = Blockchain::new(1);
        bc.add_data(json!({ "voter_id": "v-1", "vote": "A" }));
        bc.add_data(json!({ "voter_id": "v-2", "vote": "B" }));
        bc.mine_pending_data("local-miner").unwrap();

        let genesis = bc.chain[0].clone();
        let rival = next_block(
            &genesis,
            json!({
                "transactions": [
                    { "voter_id": "v-1", "vote": "C" },
                    { "voter_id": "v-3", "vote": "D" },
                ],
                "miner": "rival-miner",
            }),
            1,
        );
        let competing = vec![genesis.clone(), rival];

        let handler = ForkHandler::new(&mut bc);
        let conflicts = handler.detect_conflicting_records(&competing, "voter_id", "vote");
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].identity, "v-1");
        assert_eq!(conflicts[0].local_value, json!("A"));
        assert_eq!(conflicts[0].candidate_value, json!("C"));
        assert_eq!(conflicts[0].local_block_index, 1);
        assert_eq!(conflicts[0].candidate_block_index, 1);

        // An identical record on both branches is not a conflict
        let same = next_block(
            &genesis,
            json!({
                "transactions": [{ "voter_id": "v-1", "vote": "A" }],
                "miner": "rival-miner",
            }),
            1,
        );
        let handler = ForkHandler::new(&mut bc);
        assert!(
            handler
                .detect_conflicting_records(&[genesis, same], "voter_id", "vote")
                .is_empty()
        );
    }
}
