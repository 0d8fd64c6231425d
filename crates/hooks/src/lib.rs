//! Hooks and guardrails.
//!
//! A [`ProviderHook`] intercepts provider calls before and after the wire;
//! hooks that also implement [`ChunkInterceptor`] can abort mid-stream. The
//! registry runs hooks in registration order and short-circuits a phase on
//! the first deny.

pub mod guardrails;
pub mod registry;

pub use guardrails::{BannedWordsHook, LengthHook, MaxSentencesHook, RequiredFieldsHook};
pub use registry::HookRegistry;

use pk_domain::stream::StreamChunk;
use pk_providers::{PredictionRequest, PredictionResponse};

/// Verdict of a hook phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny { reason: String },
}

impl Decision {
    pub fn deny(reason: impl Into<String>) -> Self {
        Self::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_deny(&self) -> bool {
        matches!(self, Self::Deny { .. })
    }
}

/// Chunk-level interception for streaming responses. `accumulated` is the
/// text appended so far (not including `chunk`), so running counts and
/// boundary-spanning matches need no interior state.
pub trait ChunkInterceptor: Send + Sync {
    fn on_chunk(&self, accumulated: &str, chunk: &StreamChunk) -> Decision;
}

/// A guardrail around provider calls.
///
/// Both phases default to allow, so a hook only implements the side it
/// cares about. A hook that wants streaming abort returns itself from
/// [`ProviderHook::chunk_interceptor`].
#[async_trait::async_trait]
pub trait ProviderHook: Send + Sync {
    fn name(&self) -> &str;

    async fn before_call(&self, _req: &PredictionRequest) -> Decision {
        Decision::Allow
    }

    async fn after_call(&self, _req: &PredictionRequest, _resp: &PredictionResponse) -> Decision {
        Decision::Allow
    }

    fn chunk_interceptor(&self) -> Option<&dyn ChunkInterceptor> {
        None
    }
}
