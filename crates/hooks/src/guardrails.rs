//! Built-in guardrails.

use regex::RegexBuilder;

use pk_context::{TokenEstimator, WordCountEstimator};
use pk_domain::stream::StreamChunk;
use pk_providers::{PredictionRequest, PredictionResponse};

use crate::{ChunkInterceptor, Decision, ProviderHook};

fn chunk_text(chunk: &StreamChunk) -> Option<&str> {
    match chunk {
        StreamChunk::TextDelta { text } => Some(text),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BannedWords
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Denies responses containing any banned word. Case-insensitive, word
/// boundaries, stream-abortable: the chunk check runs against the
/// accumulated text plus the incoming delta so boundary-spanning words are
/// caught.
pub struct BannedWordsHook {
    /// `None` when the word list is empty (nothing to match).
    pattern: Option<regex::Regex>,
}

impl BannedWordsHook {
    pub fn new(words: Vec<String>) -> Self {
        let pattern = if words.is_empty() {
            None
        } else {
            let alternatives: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
            RegexBuilder::new(&format!(r"\b(?:{})\b", alternatives.join("|")))
                .case_insensitive(true)
                .build()
                .ok()
        };
        Self { pattern }
    }

    fn check_text(&self, text: &str) -> Decision {
        match self.pattern.as_ref().and_then(|p| p.find(text)) {
            Some(found) => Decision::deny(format!("banned word {:?} detected", found.as_str())),
            None => Decision::Allow,
        }
    }
}

#[async_trait::async_trait]
impl ProviderHook for BannedWordsHook {
    fn name(&self) -> &str {
        "banned_words"
    }

    async fn before_call(&self, req: &PredictionRequest) -> Decision {
        // Screen the outgoing user input as well as the reply.
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| m.role == pk_domain::message::Role::User);
        match last_user {
            Some(msg) => self.check_text(&msg.get_content()),
            None => Decision::Allow,
        }
    }

    async fn after_call(&self, _req: &PredictionRequest, resp: &PredictionResponse) -> Decision {
        self.check_text(&resp.message.get_content())
    }

    fn chunk_interceptor(&self) -> Option<&dyn ChunkInterceptor> {
        Some(self)
    }
}

impl ChunkInterceptor for BannedWordsHook {
    fn on_chunk(&self, accumulated: &str, chunk: &StreamChunk) -> Decision {
        let Some(delta) = chunk_text(chunk) else {
            return Decision::Allow;
        };
        let mut combined = String::with_capacity(accumulated.len() + delta.len());
        combined.push_str(accumulated);
        combined.push_str(delta);
        self.check_text(&combined)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Length
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caps response size by characters and/or estimated tokens. Either limit
/// may be zero (disabled). Stream-abortable via running counts.
pub struct LengthHook {
    max_chars: usize,
    max_tokens: u32,
    estimator: WordCountEstimator,
}

impl LengthHook {
    pub fn new(max_chars: usize, max_tokens: u32) -> Self {
        Self {
            max_chars,
            max_tokens,
            estimator: WordCountEstimator::default(),
        }
    }

    fn check_text(&self, text: &str) -> Decision {
        if self.max_chars > 0 && text.chars().count() > self.max_chars {
            return Decision::deny(format!(
                "response exceeds {} characters",
                self.max_chars
            ));
        }
        if self.max_tokens > 0 && self.estimator.estimate(text) > self.max_tokens {
            return Decision::deny(format!(
                "response exceeds estimated {} tokens",
                self.max_tokens
            ));
        }
        Decision::Allow
    }
}

#[async_trait::async_trait]
impl ProviderHook for LengthHook {
    fn name(&self) -> &str {
        "length"
    }

    async fn after_call(&self, _req: &PredictionRequest, resp: &PredictionResponse) -> Decision {
        self.check_text(&resp.message.get_content())
    }

    fn chunk_interceptor(&self) -> Option<&dyn ChunkInterceptor> {
        Some(self)
    }
}

impl ChunkInterceptor for LengthHook {
    fn on_chunk(&self, accumulated: &str, chunk: &StreamChunk) -> Decision {
        let Some(delta) = chunk_text(chunk) else {
            return Decision::Allow;
        };
        let mut combined = String::with_capacity(accumulated.len() + delta.len());
        combined.push_str(accumulated);
        combined.push_str(delta);
        self.check_text(&combined)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MaxSentences
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Caps the number of sentences. Post-completion only: sentence counts on
/// partial text would misfire on abbreviations split across chunks.
pub struct MaxSentencesHook {
    max: usize,
}

impl MaxSentencesHook {
    pub fn new(max: usize) -> Self {
        Self { max }
    }

    fn count_sentences(text: &str) -> usize {
        let mut count = 0;
        let mut in_terminator = false;
        for c in text.chars() {
            let terminal = matches!(c, '.' | '!' | '?');
            if terminal && !in_terminator {
                count += 1;
            }
            in_terminator = terminal;
        }
        count
    }
}

#[async_trait::async_trait]
impl ProviderHook for MaxSentencesHook {
    fn name(&self) -> &str {
        "max_sentences"
    }

    async fn after_call(&self, _req: &PredictionRequest, resp: &PredictionResponse) -> Decision {
        let count = Self::count_sentences(&resp.message.get_content());
        if count > self.max {
            Decision::deny(format!("response has {count} sentences, max {}", self.max))
        } else {
            Decision::Allow
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RequiredFields
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Requires every listed string to appear in the completed response.
/// Post-completion only by nature.
pub struct RequiredFieldsHook {
    fields: Vec<String>,
}

impl RequiredFieldsHook {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }
}

#[async_trait::async_trait]
impl ProviderHook for RequiredFieldsHook {
    fn name(&self) -> &str {
        "required_fields"
    }

    async fn after_call(&self, _req: &PredictionRequest, resp: &PredictionResponse) -> Decision {
        let text = resp.message.get_content();
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !text.contains(f.as_str()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            Decision::Allow
        } else {
            Decision::deny(format!("missing required fields: {}", missing.join(", ")))
        }
    }
}
