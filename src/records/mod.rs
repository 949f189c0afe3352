use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identity key under which voting payloads record who acted.
pub const IDENTITY_KEY: &str = "voter_id";

/// Value key under which voting payloads record the choice made.
pub const VALUE_KEY: &str = "candidate";

/// Payload shapes accepted at the application boundary.
///
/// The ledger core stores and hashes opaque JSON and never branches on
/// shape; this enum is the one place where shapes are named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordPayload {
    Vote {
        voter_id: String,
        candidate: String,
        election_id: String,
    },
    ElectionRegistration {
        election_id: String,
        title: String,
        candidates: Vec<String>,
    },
    ElectionEnd {
        election_id: String,
    },
}

impl RecordPayload {
    /// The opaque JSON form handed to the ledger.
    pub fn into_value(self) -> Value {
        serde_json::to_value(self).expect("serialize record payload")
    }
}
