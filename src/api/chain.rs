use actix_web::{HttpResponse, Responder, get, web};

use super::models::{AppState, ChainResponse, ValidateResponse};

/// Get the full ledger, genesis first.
#[get("/chain/")]
pub async fn get_chain(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let resp = ChainResponse {
        length: bc.len(),
        difficulty: bc.difficulty(),
        chain: &bc.chain,
    };
    HttpResponse::Ok().json(resp)
}

/// Chain summary: length, difficulty and head hash.
#[get("/chain/info/")]
pub async fn get_info(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    HttpResponse::Ok().json(bc.info())
}

/// Validate the whole chain.
#[get("/chain/validate/")]
pub async fn validate_chain(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    let resp = ValidateResponse {
        valid: bc.is_valid_chain(),
        length: bc.len(),
        difficulty: bc.difficulty(),
    };
    HttpResponse::Ok().json(resp)
}

/// Bounds-checked block lookup by position.
#[get("/block/index/{index}/")]
pub async fn get_block_by_index(
    state: web::Data<AppState>,
    path: web::Path<(usize,)>,
) -> impl Responder {
    let index = path.into_inner().0;
    let bc = state.blockchain.lock().expect("mutex poisoned");
    match bc.block_by_index(index) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body("block not found"),
    }
}

/// Block lookup by hash (linear scan).
#[get("/block/hash/{hash}/")]
pub async fn get_block_by_hash(
    state: web::Data<AppState>,
    path: web::Path<(String,)>,
) -> impl Responder {
    let hash = path.into_inner().0;
    let bc = state.blockchain.lock().expect("mutex poisoned");
    match bc.block_by_hash(&hash) {
        Some(block) => HttpResponse::Ok().json(block),
        None => HttpResponse::NotFound().body("block not found"),
    }
}
