#![deny(missing_docs)]
//! LLM client abstraction for the Map and Reduce stages (spec §4.2, §4.3,
//! §6), plus the shared retry/backoff policy both stages run their calls
//! through (spec §5).
//!
//! [`LlmClient`] uses return-position `impl Trait in traits` (RPITIT) and is
//! intentionally not object-safe, mirroring `neuron_turn::Provider` — the
//! object-safe boundary, if one is ever needed, belongs one layer up.

mod error;
mod http;
mod retry;
mod types;

pub use error::LlmError;
pub use http::HttpLlmClient;
pub use retry::{retry_with_backoff, BackoffPolicy};
pub use types::{
    MapShardRequest, MapShardResponse, RawIncident, RawTimelineEntry, ReduceRequest,
    ReduceResponse, TitleForPrompt,
};

use std::future::Future;

/// LLM chat-completion interface used by the Map and Reduce stages.
///
/// Implementations: [`HttpLlmClient`] (the production reqwest-based client)
/// and any test double. Both prompts embed the closed `theater`/`event_type`
/// vocabularies verbatim (spec §6).
pub trait LlmClient: Send + Sync {
    /// Issue one Map-stage shard call: propose incident clusters for a shard
    /// of titles (spec §4.2 step 2).
    fn map_shard(
        &self,
        request: MapShardRequest,
    ) -> impl Future<Output = Result<MapShardResponse, LlmError>> + Send;

    /// Issue one Reduce-stage call: classify and summarize one incident's
    /// (or singleton's) titles into Event Family fields (spec §4.3 step 1).
    fn reduce_incident(
        &self,
        request: ReduceRequest,
    ) -> impl Future<Output = Result<ReduceResponse, LlmError>> + Send;
}
