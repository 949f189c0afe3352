use std::sync::{Arc, Mutex};

use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::blockchain::{Block, BlockOutcome, Blockchain, Miner, RecordConflict};

/// Shared application state: the in-memory ledger plus its background miner.
pub struct AppState {
    pub blockchain: Arc<Mutex<Blockchain>>,
    pub miner: Mutex<Miner>,
}

impl AppState {
    pub fn new(difficulty: u32, miner_address: String) -> Self {
        let blockchain = Arc::new(Mutex::new(Blockchain::new(difficulty)));
        let miner = Miner::new(Arc::clone(&blockchain), miner_address).with_block_callback(
            |block| info!("background miner sealed block #{} ({})", block.index, block.hash),
        );
        Self {
            blockchain,
            miner: Mutex::new(miner),
        }
    }
}

/* ---------- Chain API Models ---------- */

#[derive(Serialize)]
pub struct ChainResponse<'a> {
    pub length: usize,
    pub difficulty: u32,
    pub chain: &'a [Block],
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub length: usize,
    pub difficulty: u32,
}

/* ---------- Data API Models ---------- */

#[derive(Serialize)]
pub struct SubmitDataResponse {
    pub submission_id: String,
    pub pending: usize,
}

#[derive(Serialize)]
pub struct PendingResponse<'a> {
    pub size: usize,
    pub pending: &'a [Value],
}

/* ---------- Mining API Models ---------- */

#[derive(Deserialize)]
pub struct MineRequest {
    pub miner_address: String,
}

#[derive(Serialize)]
pub struct MineResponse {
    pub mined: bool,
    pub mined_index: Option<u64>,
    pub hash: Option<String>,
    pub nonce: Option<u64>,
    pub difficulty: u32,
}

#[derive(Serialize)]
pub struct MinerStatusResponse {
    pub mining: bool,
    pub miner_address: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_blocks: usize,
    pub difficulty: u32,
    pub average_mining_time: f64,
    pub estimated_hashrate: f64,
    pub pending_data: usize,
}

/* ---------- Sync API Models ---------- */

#[derive(Serialize)]
pub struct ReceiveBlockResponse {
    pub updated: bool,
    pub outcome: BlockOutcome,
    pub reason: &'static str,
}

#[derive(Deserialize)]
pub struct ChainsRequest {
    pub chains: Vec<Vec<Block>>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub replaced: bool,
    pub length: usize,
}

#[derive(Deserialize)]
pub struct SyncMissingRequest {
    pub chain: Vec<Block>,
    pub from_index: usize,
}

#[derive(Serialize)]
pub struct SyncMissingResponse {
    pub success: bool,
    pub reason: String,
    pub length: usize,
}

#[derive(Deserialize)]
pub struct AncestorRequest {
    pub chain: Vec<Block>,
}

#[derive(Serialize)]
pub struct AncestorResponse {
    pub ancestor: Option<usize>,
}

#[derive(Deserialize)]
pub struct ConflictsRequest {
    pub chain: Vec<Block>,
    pub identity_key: Option<String>,
    pub value_key: Option<String>,
}

#[derive(Serialize)]
pub struct ConflictsResponse {
    pub count: usize,
    pub conflicts: Vec<RecordConflict>,
}
