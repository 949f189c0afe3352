use actix_web::{HttpResponse, Responder, get, post, web};
use log::debug;
use uuid::Uuid;

use super::models::{AppState, PendingResponse, SubmitDataResponse};
use crate::records::RecordPayload;

/// Queue a payload for the next mined block. The tagged payload is flattened
/// to opaque JSON here; the ledger never sees the type again.
#[post("/data/")]
pub async fn submit_data(
    state: web::Data<AppState>,
    body: web::Json<RecordPayload>,
) -> impl Responder {
    let submission_id = Uuid::new_v4().to_string();
    let pending = {
        let mut bc = state.blockchain.lock().expect("mutex poisoned");
        bc.add_data(body.into_inner().into_value());
        bc.pending_data.len()
    };
    debug!("DATA - submission {submission_id} queued (pending: {pending})");

    HttpResponse::Ok().json(SubmitDataResponse {
        submission_id,
        pending,
    })
}

/// List payloads waiting to be committed into a block.
#[get("/data/pending/")]
pub async fn get_pending(state: web::Data<AppState>) -> impl Responder {
    let bc = state.blockchain.lock().expect("mutex poisoned");
    HttpResponse::Ok().json(PendingResponse {
        size: bc.pending_data.len(),
        pending: &bc.pending_data,
    })
}
