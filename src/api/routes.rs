use crate::store::CommitmentRepository;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Deserialize)]
pub struct SeedQuery {
    #[serde(default)]
    pub hash: String,
}

/// Response envelope: `error` carries "200" or "500" as a string.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SeedResponse {
    pub error: String,
    pub err_msg: String,
    pub data: Option<String>,
}

impl SeedResponse {
    fn found(seed: H256) -> Self {
        Self {
            error: "200".to_string(),
            err_msg: "ok".to_string(),
            data: Some(hex::encode(seed.as_bytes())),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            error: "500".to_string(),
            err_msg: message.into(),
            data: None,
        }
    }
}

pub fn router(repo: CommitmentRepository) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/robot/api/getseed", get(get_seed))
        .with_state(repo)
}

async fn health() -> &'static str {
    "ok"
}

fn parse_hash(raw: &str) -> Option<H256> {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    let bytes = hex::decode(raw).ok()?;
    (bytes.len() == 32).then(|| H256::from_slice(&bytes))
}

/// Seed stored for a commitment hash
pub async fn get_seed(
    State(repo): State<CommitmentRepository>,
    Query(query): Query<SeedQuery>,
) -> Json<SeedResponse> {
    let Some(hash) = parse_hash(&query.hash) else {
        return Json(SeedResponse::failed("invalid hash"));
    };
    match repo.seed(hash) {
        Ok(Some(seed)) => Json(SeedResponse::found(seed)),
        Ok(None) => Json(SeedResponse::failed("not found seed")),
        Err(e) => {
            warn!("Seed lookup failed: {}", e);
            Json(SeedResponse::failed("not found seed"))
        }
    }
}
