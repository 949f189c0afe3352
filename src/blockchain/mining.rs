use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

use super::{Block, Blockchain, MINER_IDLE_BACKOFF_MS};

type BlockCallback = Arc<dyn Fn(&Block) + Send + Sync>;

/// A prepared candidate block plus the number of queue entries it commits.
struct MiningJob {
    block: Block,
    drained: usize,
}

/// Drives the Proof-of-Work search over a shared ledger, either once
/// (blocking) or continuously on a cancellable background thread.
pub struct Miner {
    blockchain: Arc<Mutex<Blockchain>>,
    miner_address: String,
    difficulty: u32,
    on_block_mined: Option<BlockCallback>,
    stop_flag: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl Miner {
    /// Create a miner bound to a shared ledger and a reward address.
    /// Difficulty defaults to the ledger's.
    pub fn new(blockchain: Arc<Mutex<Blockchain>>, miner_address: impl Into<String>) -> Self {
        let difficulty = blockchain.lock().expect("mutex poisoned").difficulty();
        Self {
            blockchain,
            miner_address: miner_address.into(),
            difficulty,
            on_block_mined: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Override the ledger's difficulty for blocks mined by this miner.
    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    /// Register a hook invoked for every successfully mined block.
    pub fn with_block_callback(mut self, callback: impl Fn(&Block) + Send + Sync + 'static) -> Self {
        self.on_block_mined = Some(Arc::new(callback));
        self
    }

    pub fn miner_address(&self) -> &str {
        &self.miner_address
    }

    /// Snapshot the queue and head under the lock and build a candidate
    /// block. `None` when the queue is empty (a normal absent result).
    fn prepare_job(bc: &Blockchain, miner_address: &str) -> Option<MiningJob> {
        if bc.pending_data.is_empty() {
            return None;
        }
        let snapshot = bc.pending_data.clone();
        let drained = snapshot.len();
        let block = Block::new(
            bc.len() as u64,
            bc.last_block().hash.clone(),
            serde_json::json!({
                "transactions": snapshot,
                "miner": miner_address,
            }),
        );
        Some(MiningJob { block, drained })
    }

    /// Commit a mined block: append it and drain exactly the snapshotted
    /// queue prefix, so entries enqueued during the search survive. Discards
    /// the block when the head moved while the lock was released.
    fn commit(bc: &mut Blockchain, block: &Block, drained: usize) -> bool {
        if block.index != bc.len() as u64 || block.previous_hash != bc.last_block().hash {
            warn!("chain head moved while mining block #{}, discarding", block.index);
            return false;
        }
        bc.chain.push(block.clone());
        bc.pending_data.drain(..drained);
        true
    }

    /// Mine one block from the pending queue, blocking until found.
    ///
    /// `None` when there is nothing to mine or the head moved mid-search;
    /// the queue is left untouched in both cases.
    pub fn mine_single_block(&self) -> Option<Block> {
        let job = {
            let bc = self.blockchain.lock().expect("mutex poisoned");
            Self::prepare_job(&bc, &self.miner_address)
        };
        let Some(MiningJob { mut block, drained }) = job else {
            debug!("no pending data to mine");
            return None;
        };

        info!("mining a single block #{}...", block.index);
        let started = Instant::now();
        block.mine(self.difficulty);
        info!(
            "block #{} mined in {:.2}s with hash: {}",
            block.index,
            started.elapsed().as_secs_f64(),
            block.hash
        );

        let committed = {
            let mut bc = self.blockchain.lock().expect("mutex poisoned");
            Self::commit(&mut bc, &block, drained)
        };
        if !committed {
            return None;
        }
        if let Some(callback) = &self.on_block_mined {
            callback(&block);
        }
        Some(block)
    }

    /// Start the continuous mining loop on a dedicated background thread.
    pub fn start(&mut self) {
        if self.is_mining() {
            warn!("mining is already in progress");
            return;
        }
        self.stop_flag.store(false, Ordering::Relaxed);

        let blockchain = Arc::clone(&self.blockchain);
        let miner_address = self.miner_address.clone();
        let difficulty = self.difficulty;
        let stop = Arc::clone(&self.stop_flag);
        let callback = self.on_block_mined.clone();

        self.worker = Some(thread::spawn(move || {
            mining_loop(blockchain, miner_address, difficulty, stop, callback);
        }));
        info!("mining process started");
    }

    /// Signal the mining loop to stop and wait for the worker to exit.
    /// Cancellation latency is bounded by the in-search poll interval.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("mining worker panicked");
            }
            info!("mining process stopped");
        }
    }

    pub fn is_mining(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

fn mining_loop(
    blockchain: Arc<Mutex<Blockchain>>,
    miner_address: String,
    difficulty: u32,
    stop: Arc<AtomicBool>,
    callback: Option<BlockCallback>,
) {
    while !stop.load(Ordering::Relaxed) {
        let job = {
            let bc = blockchain.lock().expect("mutex poisoned");
            Miner::prepare_job(&bc, &miner_address)
        };
        let Some(MiningJob { mut block, drained }) = job else {
            thread::sleep(Duration::from_millis(MINER_IDLE_BACKOFF_MS));
            continue;
        };

        info!("mining block #{}...", block.index);
        let started = Instant::now();
        if !block.mine_with_cancel(difficulty, &stop) {
            // Cancelled mid-search: the partial block is dropped and the
            // pending queue stays as it was.
            debug!("mining of block #{} cancelled", block.index);
            continue;
        }

        let committed = {
            let mut bc = blockchain.lock().expect("mutex poisoned");
            Miner::commit(&mut bc, &block, drained)
        };
        if committed {
            info!(
                "block #{} mined in {:.2}s with hash: {}",
                block.index,
                started.elapsed().as_secs_f64(),
                block.hash
            );
            if let Some(callback) = &callback {
                callback(&block);
            }
        }
    }
}

/// Mining statistics derived from block timestamps.
#[derive(Debug, Clone, Serialize)]
pub struct MiningStats {
    pub total_blocks: usize,
    pub average_mining_time: f64,
    pub difficulty: u32,
    pub estimated_hashrate: f64,
}

/// Average inter-block interval and a rough hashrate estimate: finding a hash
/// with n leading zeros takes about 16^n attempts.
pub fn mining_stats(bc: &Blockchain) -> MiningStats {
    if bc.len() <= 1 {
        return MiningStats {
            total_blocks: bc.len(),
            average_mining_time: 0.0,
            difficulty: bc.difficulty(),
            estimated_hashrate: 0.0,
        };
    }

    let intervals: Vec<i64> = bc
        .chain
        .windows(2)
        .map(|pair| pair[1].timestamp - pair[0].timestamp)
        .collect();
    let avg = intervals.iter().sum::<i64>() as f64 / intervals.len() as f64;

    let estimated_attempts = 16f64.powi(bc.difficulty() as i32);
    let estimated_hashrate = if avg > 0.0 {
        estimated_attempts / avg
    } else {
        0.0
    };

    MiningStats {
        total_blocks: bc.len(),
        average_mining_time: avg,
        difficulty: bc.difficulty(),
        estimated_hashrate,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::{Duration, Instant};

    use super::{Miner, mining_stats};
    use crate::blockchain::Blockchain;

    fn shared_chain(difficulty: u32) -> Arc<Mutex<Blockchain>> {
        Arc::new(Mutex::new(Blockchain::new(difficulty)))
    }

    #[test]
    fn mine_single_block_commits_queue_and_fires_callback() {
        let chain = shared_chain(1);
        let mined_count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&mined_count);

        let miner = Miner::new(Arc::clone(&chain), "miner-1")
            .with_block_callback(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        chain
            .lock()
            .unwrap()
            .add_data(serde_json::json!({ "voter_id": "v-1", "vote": "A" }));

        let block = miner.mine_single_block().expect("block mined");
        assert_eq!(block.index, 1);
        assert_eq!(block.data["miner"], "miner-1");
        assert_eq!(mined_count.load(Ordering::SeqCst), 1);

        let bc = chain.lock().unwrap();
        assert_eq!(bc.len(), 2);
        assert!(bc.pending_data.is_empty());
        assert!(bc.is_valid_chain());
    }

    #[test]
    fn mine_single_block_with_empty_queue_returns_none() {
        let chain = shared_chain(1);
        let miner = Miner::new(Arc::clone(&chain), "miner-1");
        assert!(miner.mine_single_block().is_none());
        assert_eq!(chain.lock().unwrap().len(), 1);
    }

    #[test]
    fn background_miner_drains_the_queue() {
        let chain = shared_chain(1);
        {
            let mut bc = chain.lock().unwrap();
            bc.add_data(serde_json::json!({ "voter_id": "v-1", "vote": "A" }));
            bc.add_data(serde_json::json!({ "voter_id": "v-2", "vote": "B" }));
        }

        let mut miner = Miner::new(Arc::clone(&chain), "miner-1");
        miner.start();
        assert!(miner.is_mining());

        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            {
                let bc = chain.lock().unwrap();
                if bc.len() >= 2 && bc.pending_data.is_empty() {
                    break;
                }
            }
            assert!(Instant::now() < deadline, "miner never produced a block");
            std::thread::sleep(Duration::from_millis(20));
        }

        miner.stop();
        assert!(!miner.is_mining());
        let bc = chain.lock().unwrap();
        assert!(bc.is_valid_chain());
        assert_eq!(bc.last_block().data["transactions"][1]["voter_id"], "v-2");
    }

    #[test]
    fn cancellation_discards_partial_block_and_keeps_queue() {
        let chain = shared_chain(1);
        chain
            .lock()
            .unwrap()
            .add_data(serde_json::json!({ "voter_id": "v-1", "vote": "A" }));

        // Difficulty no realistic search will reach before the stop signal
        let mut miner = Miner::new(Arc::clone(&chain), "miner-1").with_difficulty(12);
        miner.start();
        std::thread::sleep(Duration::from_millis(300));
        miner.stop();

        let bc = chain.lock().unwrap();
        assert_eq!(bc.len(), 1, "no block should have been committed");
        assert_eq!(bc.pending_data.len(), 1, "queue must survive cancellation");
    }

    #[test]
    fn stats_reflect_chain_length_and_difficulty() {
        let mut bc = Blockchain::new(1);
        let empty = mining_stats(&bc);
        assert_eq!(empty.total_blocks, 1);
        assert_eq!(empty.estimated_hashrate, 0.0);

        bc.add_data(serde_json::json!({ "v": 1 }));
        bc.mine_pending_data("m").unwrap();
        bc.add_data(serde_json::json!({ "v": 2 }));
        bc.mine_pending_data("m").unwrap();

        let stats = mining_stats(&bc);
        assert_eq!(stats.total_blocks, 3);
        assert_eq!(stats.difficulty, 1);
        assert!(stats.average_mining_time >= 0.0);
    }
}
