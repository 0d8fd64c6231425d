use crate::capability::Feature;

/// Classification of provider-reported failures, used to decide retry
/// eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    RateLimit,
    Timeout,
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimit | Self::Timeout | Self::Transient)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RateLimit => "rate_limit",
            Self::Timeout => "timeout",
            Self::Transient => "transient",
            Self::Permanent => "permanent",
        };
        f.write_str(s)
    }
}

/// Shared error type used across all PromptKit Arena crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("config: {0}")]
    Config(String),

    #[error("provider {provider} does not support {feature}")]
    Unsupported { provider: String, feature: Feature },

    #[error("provider {provider} ({class}): {message}")]
    Provider {
        provider: String,
        class: ErrorClass,
        message: String,
    },

    #[error("context budget exceeded: have {have} tokens, budget {budget}")]
    BudgetExceeded { have: u32, budget: u32 },

    #[error("hook {hook} denied request: {reason}")]
    HookDenied { hook: String, reason: String },

    #[error("tool loop limit reached after {calls} calls")]
    ToolLoop { calls: u32 },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Whether the runner may retry the failed provider call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Provider { class, .. } => class.is_retryable(),
            Error::Timeout(_) => true,
            _ => false,
        }
    }

    /// Whether this error ends the whole run rather than a single turn.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::Provider { class, .. } if class.is_retryable())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
