use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, StatsResponse};
use crate::blockchain::mining_stats;

#[get("/stats/")]
pub async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let stats = mining_stats(&bc);

    HttpResponse::Ok().json(StatsResponse {
        total_blocks: stats.total_blocks,
        difficulty: stats.difficulty,
        average_mining_time: stats.average_mining_time,
        estimated_hashrate: stats.estimated_hashrate,
        pending_data: bc.pending_data.len(),
    })
}
