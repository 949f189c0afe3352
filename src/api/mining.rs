use actix_web::{HttpResponse, Responder, get, post, web};
use log::info;

use super::models::{AppState, MineRequest, MineResponse, MinerStatusResponse};

/// Mine one block from the pending queue, blocking until sealed.
/// An empty queue is a normal outcome, not an error.
#[post("/mine/")]
pub async fn mine_block(state: web::Data<AppState>, req: web::Json<MineRequest>) -> impl Responder {
    let miner_address = req.miner_address.trim();
    if miner_address.is_empty() {
        return HttpResponse::BadRequest().body("miner_address required");
    }

    // segura o lock durante o PoW: o minerador de fundo descarta o bloco dele
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let resp = match bc.mine_pending_data(miner_address) {
        Some(block) => {
            info!(
                "MINER - sealed block #{} (hash={}, nonce={})",
                block.index, block.hash, block.nonce
            );
            MineResponse {
                mined: true,
                mined_index: Some(block.index),
                hash: Some(block.hash),
                nonce: Some(block.nonce),
                difficulty: bc.difficulty(),
            }
        }
        None => MineResponse {
            mined: false,
            mined_index: None,
            hash: None,
            nonce: None,
            difficulty: bc.difficulty(),
        },
    };
    HttpResponse::Ok().json(resp)
}

/// Start the continuous background miner.
#[post("/miner/start/")]
pub async fn start_miner(state: web::Data<AppState>) -> impl Responder {
    let mut miner = state.miner.lock().expect("mutex poisoned");
    miner.start();
    HttpResponse::Ok().json(MinerStatusResponse {
        mining: miner.is_mining(),
        miner_address: miner.miner_address().to_string(),
    })
}

/// Stop the background miner; an in-flight search is cancelled, its partial
/// block dropped and the pending queue kept.
#[post("/miner/stop/")]
pub async fn stop_miner(state: web::Data<AppState>) -> impl Responder {
    let mut miner = state.miner.lock().expect("mutex poisoned");
    miner.stop();
    HttpResponse::Ok().json(MinerStatusResponse {
        mining: miner.is_mining(),
        miner_address: miner.miner_address().to_string(),
    })
}

#[get("/miner/status/")]
pub async fn miner_status(state: web::Data<AppState>) -> impl Responder {
    let miner = state.miner.lock().expect("mutex poisoned");
    HttpResponse::Ok().json(MinerStatusResponse {
        mining: miner.is_mining(),
        miner_address: miner.miner_address().to_string(),
    })
}
