//! Text-content assertion kinds.

use serde::Deserialize;

use pk_domain::validation::{ValidationResult, Violation};

use crate::{Assertion, Subject};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// content_includes / content_not_includes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct PatternsParams {
    pub patterns: Vec<String>,
}

/// Passes when every pattern appears (case-insensitive substring match).
pub struct ContentIncludes {
    pub patterns: Vec<String>,
}

#[async_trait::async_trait]
impl Assertion for ContentIncludes {
    fn kind(&self) -> &str {
        "content_includes"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let haystack = subject.text().to_lowercase();
        let missing: Vec<&String> = self
            .patterns
            .iter()
            .filter(|p| !haystack.contains(&p.to_lowercase()))
            .collect();

        if missing.is_empty() {
            ValidationResult::pass(self.kind())
        } else {
            let mut result = ValidationResult::fail(
                self.kind(),
                format!("{} expected pattern(s) missing", missing.len()),
            );
            for pattern in missing {
                result = result.with_violation(Violation::new(format!(
                    "pattern {pattern:?} not found"
                )));
            }
            result
        }
    }
}

/// Passes when no pattern appears (case-insensitive).
pub struct ContentNotIncludes {
    pub patterns: Vec<String>,
}

#[async_trait::async_trait]
impl Assertion for ContentNotIncludes {
    fn kind(&self) -> &str {
        "content_not_includes"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let haystack = subject.text().to_lowercase();
        let found: Vec<&String> = self
            .patterns
            .iter()
            .filter(|p| haystack.contains(&p.to_lowercase()))
            .collect();

        if found.is_empty() {
            ValidationResult::pass(self.kind())
        } else {
            let mut result = ValidationResult::fail(
                self.kind(),
                format!("{} forbidden pattern(s) present", found.len()),
            );
            for pattern in found {
                result = result
                    .with_violation(Violation::new(format!("pattern {pattern:?} found")));
            }
            result
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// content_matches
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct RegexParams {
    pub regex: String,
}

/// Passes when the regex matches somewhere in the text. The pattern is
/// compiled once at registry-build time; an invalid pattern is a
/// configuration error.
pub struct ContentMatches {
    pub pattern: regex::Regex,
}

#[async_trait::async_trait]
impl Assertion for ContentMatches {
    fn kind(&self) -> &str {
        "content_matches"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        if self.pattern.is_match(&subject.text()) {
            ValidationResult::pass(self.kind())
        } else {
            ValidationResult::fail(
                self.kind(),
                format!("regex {:?} did not match", self.pattern.as_str()),
            )
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// max_length / min_length
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct LengthParams {
    pub chars: usize,
}

pub struct MaxLength {
    pub chars: usize,
}

#[async_trait::async_trait]
impl Assertion for MaxLength {
    fn kind(&self) -> &str {
        "max_length"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let len = subject.text().chars().count();
        if len <= self.chars {
            ValidationResult::pass(self.kind())
        } else {
            ValidationResult::fail(
                self.kind(),
                format!("content is {len} chars, max {}", self.chars),
            )
            .with_detail("length", serde_json::json!(len))
        }
    }
}

pub struct MinLength {
    pub chars: usize,
}

#[async_trait::async_trait]
impl Assertion for MinLength {
    fn kind(&self) -> &str {
        "min_length"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let len = subject.text().chars().count();
        if len >= self.chars {
            ValidationResult::pass(self.kind())
        } else {
            ValidationResult::fail(
                self.kind(),
                format!("content is {len} chars, min {}", self.chars),
            )
            .with_detail("length", serde_json::json!(len))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pk_domain::message::Message;

    fn turn(text: &str) -> Message {
        Message::assistant(text)
    }

    #[tokio::test]
    async fn includes_is_case_insensitive_and_lists_missing() {
        let assertion = ContentIncludes {
            patterns: vec!["Hello".into(), "order".into()],
        };
        let msg = turn("HELLO there");
        let result = assertion.check(Subject::turn(&msg)).await;
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
        assert!(result.violations[0].message.contains("order"));

        let msg = turn("hello, your ORDER shipped");
        assert!(assertion.check(Subject::turn(&msg)).await.passed);
    }

    #[tokio::test]
    async fn not_includes_flags_found_patterns() {
        let assertion = ContentNotIncludes {
            patterns: vec!["password".into()],
        };
        let clean = turn("nothing to see");
        assert!(assertion.check(Subject::turn(&clean)).await.passed);

        let dirty = turn("your PassWord is hunter2");
        let result = assertion.check(Subject::turn(&dirty)).await;
        assert!(!result.passed);
        assert_eq!(result.violations.len(), 1);
    }

    #[tokio::test]
    async fn matches_uses_the_compiled_regex() {
        let assertion = ContentMatches {
            pattern: regex::Regex::new(r"order \d+").unwrap(),
        };
        let hit = turn("order 42 is shipped");
        assert!(assertion.check(Subject::turn(&hit)).await.passed);
        let miss = turn("no numbers here");
        assert!(!assertion.check(Subject::turn(&miss)).await.passed);
    }

    #[tokio::test]
    async fn length_bounds() {
        let msg = turn("12345");
        assert!(MaxLength { chars: 5 }.check(Subject::turn(&msg)).await.passed);
        assert!(!MaxLength { chars: 4 }.check(Subject::turn(&msg)).await.passed);
        assert!(MinLength { chars: 5 }.check(Subject::turn(&msg)).await.passed);
        let short = MinLength { chars: 6 }.check(Subject::turn(&msg)).await;
        assert!(!short.passed);
        assert_eq!(short.details["length"], serde_json::json!(5));
    }
}
