use super::mock::MockResponse;
use crate::ids::Fingerprint;
use crate::server::Context;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A request as seen by the mock server, stamped with its arrival time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub body: Value,
    /// Milliseconds since the UNIX epoch
    pub datetime: u64,
}

impl RecordedRequest {
    /// Materialize `ctx`, reading its body.
    pub async fn capture(ctx: &Context, datetime: u64) -> Self {
        Self {
            method: ctx.method().to_string(),
            headers: ctx.headers().clone(),
            path: ctx.path().to_string(),
            query: ctx.query().clone(),
            body: ctx.body().await,
            datetime,
        }
    }
}

/// Most recent request for one fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: Fingerprint,
    pub request: RecordedRequest,
}

/// A request that matched a registered mock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub mock_id: Fingerprint,
    pub request: RecordedRequest,
    /// The mock's response definition at the time of the request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MockResponse>,
}
