//! HTTP boundary for the provote admission engine.
//!
//! Endpoints:
//! - `POST /api/v1/votes/cast`: cast a vote
//! - `GET /metrics`: Prometheus text exposition
//! - `GET /healthz`: liveness

pub mod error;
pub mod extract;
pub mod handlers;
pub mod server;

pub use error::RpcError;
pub use server::{router, RpcServer, CAST_VOTE_PATH};
