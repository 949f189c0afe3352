use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::{Block, GENESIS_PREVIOUS_HASH};

/// In-memory append-only ledger with Proof-of-Work.
#[derive(Debug)]
pub struct Blockchain {
    pub chain: Vec<Block>,
    pub difficulty: u32,
    pub pending_data: Vec<Value>,
}

/// Lightweight chain summary exposed to collaborators.
#[derive(Debug, Clone, Serialize)]
pub struct ChainInfo {
    pub length: usize,
    pub difficulty: u32,
    pub latest_hash: String,
}

/// Outcome of reconciling a single received block against the local chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockOutcome {
    /// Valid next block, appended to the chain.
    Appended,
    /// Identical block already present at that position.
    AlreadyPresent,
    /// Peer is ahead of us; nothing can be decided from one block.
    NeedSync,
    /// Competing block that links to our chain; full comparison required.
    ForkDetected,
    /// Competing genesis; the local chain is kept unconditionally.
    GenesisConflict,
    /// Next block failed validation.
    InvalidNext,
    /// Block at a known position that does not link to our chain.
    Unlinked,
}

impl BlockOutcome {
    /// Whether the local chain was mutated.
    pub fn mutated(&self) -> bool {
        matches!(self, BlockOutcome::Appended)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            BlockOutcome::Appended => "block added to chain",
            BlockOutcome::AlreadyPresent => "block already exists in our chain",
            BlockOutcome::NeedSync => "need to sync blocks",
            BlockOutcome::ForkDetected => "fork detected, need full chain comparison",
            BlockOutcome::GenesisConflict => "genesis block conflict, keeping our chain",
            BlockOutcome::InvalidNext => "invalid next block",
            BlockOutcome::Unlinked => "block does not link to our chain",
        }
    }
}

impl Blockchain {
    /// Initialize a new ledger with a mined genesis block.
    pub fn new(difficulty: u32) -> Self {
        let mut genesis = Block::genesis();
        genesis.mine(difficulty);
        info!("genesis block created: {}", genesis.hash);
        Self {
            chain: vec![genesis],
            difficulty,
            pending_data: Vec::new(),
        }
    }

    /// Rebuild a ledger from persisted block records. Stored hashes are kept
    /// verbatim; the caller checks `is_valid_chain` explicitly.
    pub fn from_blocks(blocks: Vec<Block>, difficulty: u32) -> Self {
        Self {
            chain: blocks,
            difficulty,
            pending_data: Vec::new(),
        }
    }

    /// Return the last block in the chain.
    pub fn last_block(&self) -> &Block {
        self.chain
            .last()
            .expect("chain should always have at least the genesis block")
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// Queue a payload for inclusion in the next mined block.
    /// No hashing, no chain mutation.
    pub fn add_data(&mut self, data: Value) {
        debug!("data added to pending pool: {data}");
        self.pending_data.push(data);
    }

    /// Mine a new block from the pending queue and append it.
    ///
    /// Returns `None` without mutating anything when the queue is empty.
    /// All-or-nothing: the queue is cleared only once the block is appended.
    pub fn mine_pending_data(&mut self, miner_address: &str) -> Option<Block> {
        if self.pending_data.is_empty() {
            debug!("no pending data to mine");
            return None;
        }

        let snapshot = self.pending_data.clone();
        let mut block = Block::new(
            self.chain.len() as u64,
            self.last_block().hash.clone(),
            serde_json::json!({
                "transactions": snapshot,
                "miner": miner_address,
            }),
        );

        info!("mining block #{}...", block.index);
        let started = Instant::now();
        block.mine(self.difficulty);
        info!(
            "block #{} mined in {:.2}s with hash: {}",
            block.index,
            started.elapsed().as_secs_f64(),
            block.hash
        );

        self.chain.push(block.clone());
        self.pending_data.clear();
        Some(block)
    }

    /// Append an already mined block after validating it against the head.
    /// The chain is unchanged on failure.
    pub fn add_block(&mut self, block: Block) -> bool {
        if !self.is_valid_block(&block, self.last_block()) {
            warn!("invalid block received: {}", block.index);
            return false;
        }
        info!("block #{} added to chain with hash: {}", block.index, block.hash);
        self.chain.push(block);
        true
    }

    /// Check a block against its predecessor: index succession, hash linkage,
    /// hash integrity and the PoW difficulty target.
    pub fn is_valid_block(&self, block: &Block, previous: &Block) -> bool {
        if block.index != previous.index + 1 {
            warn!(
                "block has invalid index: {} (expected {})",
                block.index,
                previous.index + 1
            );
            return false;
        }
        if block.previous_hash != previous.hash {
            warn!(
                "block #{} has invalid previous hash: {} (expected {})",
                block.index, block.previous_hash, previous.hash
            );
            return false;
        }
        if block.hash != block.compute_hash() {
            warn!("block #{} hash is invalid: {}", block.index, block.hash);
            return false;
        }
        if !block.meets_difficulty(self.difficulty) {
            warn!(
                "block #{} hash does not meet difficulty requirement: {}",
                block.index, block.hash
            );
            return false;
        }
        true
    }

    /// Validate this instance's chain.
    pub fn is_valid_chain(&self) -> bool {
        self.is_valid_blocks(&self.chain)
    }

    /// Validate an arbitrary block sequence: genesis integrity (no predecessor
    /// check), then every adjacent pair.
    pub fn is_valid_blocks(&self, chain: &[Block]) -> bool {
        let Some(genesis) = chain.first() else {
            warn!("chain has no genesis block");
            return false;
        };
        if genesis.index != 0
            || genesis.previous_hash != GENESIS_PREVIOUS_HASH
            || genesis.hash != genesis.compute_hash()
        {
            warn!("genesis block fails integrity check");
            return false;
        }
        chain
            .windows(2)
            .all(|pair| self.is_valid_block(&pair[1], &pair[0]))
    }

    /// Replace the chain with a longer valid one (longest chain rule).
    /// No-op otherwise; either fully replaced or fully unchanged.
    pub fn replace_chain(&mut self, new_chain: Vec<Block>) -> bool {
        if new_chain.len() <= self.chain.len() {
            info!("received chain is not longer than the current chain");
            return false;
        }
        if !self.is_valid_blocks(&new_chain) {
            warn!("received chain is not valid");
            return false;
        }
        info!("chain replaced with new chain of length {}", new_chain.len());
        self.chain = new_chain;
        true
    }

    /// Reconcile a single block received from a peer against the local chain.
    pub fn fork_detection_and_resolution(&mut self, received: Block) -> BlockOutcome {
        let len = self.chain.len() as u64;

        if received.index < len {
            let existing = &self.chain[received.index as usize];
            if existing.hash == received.hash {
                return BlockOutcome::AlreadyPresent;
            }
            warn!("fork detected at index {}", received.index);
            if received.index == 0 {
                return BlockOutcome::GenesisConflict;
            }
            if received.previous_hash == self.chain[received.index as usize - 1].hash {
                info!("valid fork detected, requesting complete chain from peer");
                return BlockOutcome::ForkDetected;
            }
            return BlockOutcome::Unlinked;
        }

        if received.index == len {
            return if self.is_valid_block(&received, self.last_block()) {
                info!("added block #{} to chain", received.index);
                self.chain.push(received);
                BlockOutcome::Appended
            } else {
                BlockOutcome::InvalidNext
            };
        }

        info!("peer chain is ahead by {} blocks", received.index - len);
        BlockOutcome::NeedSync
    }

    /// Chain summary: length, difficulty and the head hash.
    pub fn info(&self) -> ChainInfo {
        ChainInfo {
            length: self.chain.len(),
            difficulty: self.difficulty,
            latest_hash: self.last_block().hash.clone(),
        }
    }

    /// Bounds-checked block lookup by position.
    pub fn block_by_index(&self, index: usize) -> Option<&Block> {
        self.chain.get(index)
    }

    /// Block lookup by hash (linear scan).
    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.chain.iter().find(|b| b.hash == hash)
    }
}
