pub mod block;
pub mod fork;
pub mod mining;
pub mod model;

pub use block::Block;
pub use fork::{ForkAssessment, ForkHandler, RecordConflict, chain_work};
pub use mining::{Miner, MiningStats, mining_stats};
pub use model::{BlockOutcome, Blockchain, ChainInfo};

/// Default Proof-of-Work difficulty (number of leading hex zeros).
pub const DEFAULT_DIFFICULTY: u32 = 4;

/// Sentinel previous-hash carried by the genesis block (64 ASCII zeros).
pub const GENESIS_PREVIOUS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

/// How often the PoW loop polls the cancellation flag (in hash attempts).
pub const CANCEL_POLL_INTERVAL: u64 = 10_000;

/// Background miner backoff while the pending queue is empty.
pub const MINER_IDLE_BACKOFF_MS: u64 = 1_000;
