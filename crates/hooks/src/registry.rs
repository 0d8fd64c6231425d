use std::sync::Arc;

use pk_domain::stream::StreamChunk;
use pk_providers::{PredictionRequest, PredictionResponse};

use crate::{Decision, ProviderHook};

/// Names the hook whose deny sealed the turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeniedBy {
    pub hook: String,
    pub reason: String,
}

/// Ordered hook collection. Registration is additive; within a phase hooks
/// run in registration order and the first deny short-circuits the rest.
#[derive(Default, Clone)]
pub struct HookRegistry {
    hooks: Vec<Arc<dyn ProviderHook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, hook: Arc<dyn ProviderHook>) {
        self.hooks.push(hook);
    }

    pub fn with(mut self, hook: Arc<dyn ProviderHook>) -> Self {
        self.register(hook);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn run_before(&self, req: &PredictionRequest) -> Option<DeniedBy> {
        for hook in &self.hooks {
            if let Decision::Deny { reason } = hook.before_call(req).await {
                tracing::info!(hook = hook.name(), %reason, "hook denied request");
                return Some(DeniedBy {
                    hook: hook.name().to_string(),
                    reason,
                });
            }
        }
        None
    }

    pub async fn run_after(
        &self,
        req: &PredictionRequest,
        resp: &PredictionResponse,
    ) -> Option<DeniedBy> {
        for hook in &self.hooks {
            if let Decision::Deny { reason } = hook.after_call(req, resp).await {
                tracing::info!(hook = hook.name(), %reason, "hook denied response");
                return Some(DeniedBy {
                    hook: hook.name().to_string(),
                    reason,
                });
            }
        }
        None
    }

    /// Run all chunk interceptors against one streaming delta.
    pub fn intercept_chunk(&self, accumulated: &str, chunk: &StreamChunk) -> Option<DeniedBy> {
        for hook in &self.hooks {
            if let Some(interceptor) = hook.chunk_interceptor() {
                if let Decision::Deny { reason } = interceptor.on_chunk(accumulated, chunk) {
                    tracing::info!(hook = hook.name(), %reason, "hook aborted stream");
                    return Some(DeniedBy {
                        hook: hook.name().to_string(),
                        reason,
                    });
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BannedWordsHook, MaxSentencesHook};
    use pk_domain::cost::{CostInfo, TokenUsage};
    use pk_domain::message::Message;
    use pk_domain::stream::FinishReason;

    fn response(text: &str) -> PredictionResponse {
        PredictionResponse {
            message: Message::assistant(text),
            finish_reason: FinishReason::Stop,
            usage: TokenUsage::default(),
            cost: CostInfo::default(),
            model: "mock-1".into(),
        }
    }

    #[tokio::test]
    async fn first_deny_names_the_hook() {
        let registry = HookRegistry::new()
            .with(Arc::new(MaxSentencesHook::new(100)))
            .with(Arc::new(BannedWordsHook::new(vec!["hack".into()])));

        let denied = registry
            .run_after(&PredictionRequest::default(), &response("try to hack it"))
            .await
            .unwrap();
        assert_eq!(denied.hook, "banned_words");
        assert!(denied.reason.contains("hack"));
    }

    #[tokio::test]
    async fn registration_order_decides_who_denies_first() {
        let registry = HookRegistry::new()
            .with(Arc::new(BannedWordsHook::new(vec!["one".into()])))
            .with(Arc::new(BannedWordsHook::new(vec!["two".into()])));

        // Both hooks would deny; the first registered wins.
        let denied = registry
            .run_after(&PredictionRequest::default(), &response("one two"))
            .await
            .unwrap();
        assert!(denied.reason.contains("one"));
    }

    #[tokio::test]
    async fn empty_registry_allows_everything() {
        let registry = HookRegistry::new();
        assert!(registry
            .run_before(&PredictionRequest::default())
            .await
            .is_none());
        assert!(registry
            .run_after(&PredictionRequest::default(), &response("anything"))
            .await
            .is_none());
        assert!(registry
            .intercept_chunk(
                "text",
                &StreamChunk::TextDelta { text: "more".into() }
            )
            .is_none());
    }

    #[test]
    fn only_interceptor_hooks_see_chunks() {
        let registry = HookRegistry::new()
            .with(Arc::new(MaxSentencesHook::new(1))) // not an interceptor
            .with(Arc::new(BannedWordsHook::new(vec!["hack".into()])));

        let denied = registry.intercept_chunk(
            "you should ",
            &StreamChunk::TextDelta { text: "hack".into() },
        );
        assert_eq!(denied.unwrap().hook, "banned_words");

        let allowed = registry.intercept_chunk(
            "first. second. third.",
            &StreamChunk::TextDelta { text: " more".into() },
        );
        assert!(allowed.is_none());
    }
}
