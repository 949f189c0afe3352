use actix_web::{HttpResponse, Responder, post, web};
use log::debug;

use super::models::{
    AncestorRequest, AncestorResponse, AppState, ChainsRequest, ConflictsRequest,
    ConflictsResponse, ReceiveBlockResponse, ResolveResponse, SyncMissingRequest,
    SyncMissingResponse,
};
use crate::blockchain::{Block, ForkHandler};
use crate::records;

/// Reconcile a single block announced by a peer.
#[post("/sync/block/")]
pub async fn receive_block(state: web::Data<AppState>, body: web::Json<Block>) -> impl Responder {
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let outcome = bc.fork_detection_and_resolution(body.into_inner());
    HttpResponse::Ok().json(ReceiveBlockResponse {
        updated: outcome.mutated(),
        outcome,
        reason: outcome.reason(),
    })
}

/// Classify a received block without mutating the chain.
#[post("/sync/detect/")]
pub async fn detect_fork(state: web::Data<AppState>, body: web::Json<Block>) -> impl Responder {
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let assessment = ForkHandler::new(&mut bc).detect_fork(&body);
    HttpResponse::Ok().json(assessment)
}

/// Resolve a fork across competing full chains (longest valid chain rule).
#[post("/sync/chains/")]
pub async fn resolve_fork(
    state: web::Data<AppState>,
    body: web::Json<ChainsRequest>,
) -> impl Responder {
    debug!("SYNC - resolving fork across {} candidate chains", body.chains.len());
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let replaced = ForkHandler::new(&mut bc).resolve_fork(&body.chains);
    HttpResponse::Ok().json(ResolveResponse {
        replaced,
        length: bc.len(),
    })
}

/// Pull missing blocks from a peer's chain starting at `from_index`.
#[post("/sync/missing/")]
pub async fn sync_missing(
    state: web::Data<AppState>,
    body: web::Json<SyncMissingRequest>,
) -> impl Responder {
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let (success, reason) =
        ForkHandler::new(&mut bc).sync_missing_blocks(&body.chain, body.from_index);
    HttpResponse::Ok().json(SyncMissingResponse {
        success,
        reason,
        length: bc.len(),
    })
}

/// Last block index shared with a competing chain, if any.
#[post("/sync/ancestor/")]
pub async fn find_ancestor(
    state: web::Data<AppState>,
    body: web::Json<AncestorRequest>,
) -> impl Responder {
    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let ancestor = ForkHandler::new(&mut bc).find_common_ancestor(&body.chain);
    HttpResponse::Ok().json(AncestorResponse { ancestor })
}

/// Flag identities recorded with conflicting values across branches.
/// Key names default to the voting shape at this boundary.
#[post("/sync/conflicts/")]
pub async fn detect_conflicts(
    state: web::Data<AppState>,
    body: web::Json<ConflictsRequest>,
) -> impl Responder {
    let identity_key = body
        .identity_key
        .as_deref()
        .unwrap_or(records::IDENTITY_KEY);
    let value_key = body.value_key.as_deref().unwrap_or(records::VALUE_KEY);

    let mut bc = state.blockchain.lock().expect("mutex poisoned");
    let conflicts =
        ForkHandler::new(&mut bc).detect_conflicting_records(&body.chain, identity_key, value_key);
    HttpResponse::Ok().json(ConflictsResponse {
        count: conflicts.len(),
        conflicts,
    })
}
