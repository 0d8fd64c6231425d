//! Lazy credential resolution.
//!
//! A [`CredentialSpec`] names where a key lives (`env`, `file`, or
//! `inline`); nothing is read until a request is about to be built. The
//! resolved secret never reaches a run result, and [`mask`] scrubs anything
//! key-shaped from error messages before they are logged or persisted.

use pk_domain::config::CredentialSpec;
use pk_domain::{Error, Result};

/// Resolve the API key for a provider. Resolution order: `inline`, `env`,
/// `file`; an empty spec resolves to an empty key (some local endpoints
/// need none).
pub fn resolve(spec: &CredentialSpec) -> Result<String> {
    if let Some(inline) = &spec.inline {
        return Ok(inline.clone());
    }
    if let Some(var) = &spec.env {
        return std::env::var(var)
            .map_err(|_| Error::Config(format!("credential env var {var} is not set")));
    }
    if let Some(path) = &spec.file {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("credential file {}: {e}", path.display()))
        })?;
        return Ok(raw.trim().to_string());
    }
    Ok(String::new())
}

/// Mask substrings that look like API keys or bearer tokens so raw secrets
/// never leak into logs or result files.
pub fn mask(message: &str) -> String {
    let mut result = message.to_string();
    for word in message.split(|c: char| c.is_whitespace() || c == '\'' || c == '"' || c == ',') {
        let trimmed = word.trim();
        if trimmed.len() >= 20
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            let masked = format!("{}...{}", &trimmed[..4], &trimmed[trimmed.len() - 4..]);
            result = result.replace(trimmed, &masked);
        }
    }
    result
}
