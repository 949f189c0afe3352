mod chain;
mod data;
mod health;
mod mining;
pub mod models;
mod stats;
mod sync;

use actix_web::web::{self, ServiceConfig};

pub use models::AppState;

pub fn init_routes(cfg: &mut ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(health::health_check)
            .service(chain::get_chain)
            .service(chain::get_info)
            .service(chain::validate_chain)
            .service(chain::get_block_by_index)
            .service(chain::get_block_by_hash)
            .service(data::submit_data)
            .service(data::get_pending)
            .service(mining::mine_block)
            .service(mining::start_miner)
            .service(mining::stop_miner)
            .service(mining::miner_status)
            .service(stats::get_stats)
            .service(sync::receive_block)
            .service(sync::detect_fork)
            .service(sync::resolve_fork)
            .service(sync::sync_missing)
            .service(sync::find_ancestor)
            .service(sync::detect_conflicts),
    );
}
