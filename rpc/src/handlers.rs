//! Request handlers.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use provote_admission::{AdmissionEngine, AdmissionStore, CastVoteRequest, VoteOutcome};
use provote_types::{IdempotencyKey, OptionId, PollId, VoteRecord};

use crate::extract::{idempotency_key, ClientContext};
use crate::RpcError;

/// Shared state behind every route.
pub struct RpcState<S> {
    pub engine: Arc<AdmissionEngine<S>>,
}

// ── Cast vote ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CastVoteBody {
    pub poll_id: u64,
    #[serde(alias = "choice_id")]
    pub option_id: u64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Browser-side device token, used as the fingerprint when present.
    #[serde(default)]
    pub client_token: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CastVoteResponse {
    pub vote_id: u64,
    pub poll_id: u64,
    pub option_id: u64,
    pub voter: String,
    /// Unix epoch milliseconds.
    pub created_at: u64,
    /// True when the vote already existed and nothing was written.
    pub idempotent: bool,
}

impl CastVoteResponse {
    fn new(vote: &VoteRecord, idempotent: bool) -> Self {
        Self {
            vote_id: vote.id.get(),
            poll_id: vote.poll.get(),
            option_id: vote.option.get(),
            voter: vote.voter.to_string(),
            created_at: vote.created_at.as_millis(),
            idempotent,
        }
    }
}

pub async fn cast_vote<S: AdmissionStore + 'static>(
    State(state): State<Arc<RpcState<S>>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: Result<Json<CastVoteBody>, JsonRejection>,
) -> Result<impl IntoResponse, RpcError> {
    let Json(body) = body.map_err(|e| RpcError::BadRequest(e.body_text()))?;

    let ctx = ClientContext::from_request(
        &headers,
        peer.map(|ConnectInfo(addr)| addr),
        body.client_token.as_deref(),
    );
    let voter = ctx.voter(&headers)?;
    let poll = PollId::new(body.poll_id);
    let option = OptionId::new(body.option_id);
    let key = match idempotency_key(&headers, body.idempotency_key.as_deref())? {
        Some(key) => key,
        None => IdempotencyKey::derive(&voter, poll, option),
    };

    let request = CastVoteRequest::new(voter, poll, option, ctx.ip)
        .with_key(key)
        .with_fingerprint(ctx.fingerprint)
        .with_signals(ctx.signals);

    match state.engine.cast_vote(request).await {
        Ok(VoteOutcome::Created(vote)) => Ok((
            StatusCode::CREATED,
            Json(CastVoteResponse::new(&vote, false)),
        )),
        Ok(VoteOutcome::Idempotent(vote)) => {
            Ok((StatusCode::OK, Json(CastVoteResponse::new(&vote, true))))
        }
        Err(e) => Err(RpcError::rejected(e, state.engine.now())),
    }
}

// ── Operations ───────────────────────────────────────────────────────────

pub async fn metrics<S: AdmissionStore + 'static>(
    State(state): State<Arc<RpcState<S>>>,
) -> Result<impl IntoResponse, RpcError> {
    let text = state
        .engine
        .metrics()
        .encode_text()
        .map_err(|e| RpcError::Server(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    ))
}

pub async fn healthz() -> &'static str {
    "ok"
}
