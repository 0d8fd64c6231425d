//! JSON assertion kinds: validity, JSON-Schema, and JMESPath field checks.

use serde::Deserialize;
use serde_json::Value;

use pk_domain::validation::{ValidationResult, Violation};

use crate::{Assertion, Subject};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payload extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pull a JSON payload out of a model response.
///
/// Tries the raw (trimmed) text first. With `extract`, markdown code fences
/// are unwrapped. With `allow_wrapped`, the first balanced JSON object or
/// array inside surrounding prose is taken.
pub fn extract_json_payload(text: &str, allow_wrapped: bool, extract: bool) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if extract {
        if let Some(inner) = fenced_block(trimmed) {
            if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
                return Some(value);
            }
        }
    }

    if allow_wrapped || extract {
        if let Some(candidate) = balanced_json(trimmed) {
            if let Ok(value) = serde_json::from_str::<Value>(candidate) {
                return Some(value);
            }
        }
    }

    None
}

/// The body of the first ``` fence (with or without a language tag).
fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The first balanced `{...}` or `[...]` region, honouring string escapes.
fn balanced_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[start];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            _ if in_string => {}
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// is_valid_json
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct JsonParams {
    #[serde(default)]
    pub allow_wrapped: bool,
    #[serde(default)]
    pub extract_json: bool,
}

pub struct IsValidJson {
    pub allow_wrapped: bool,
    pub extract_json: bool,
}

#[async_trait::async_trait]
impl Assertion for IsValidJson {
    fn kind(&self) -> &str {
        "is_valid_json"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        match extract_json_payload(&subject.text(), self.allow_wrapped, self.extract_json) {
            Some(_) => ValidationResult::pass(self.kind()),
            None => ValidationResult::fail(self.kind(), "content is not valid JSON"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// json_schema
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct JsonSchemaParams {
    pub schema: Value,
    #[serde(default)]
    pub allow_wrapped: bool,
    #[serde(default)]
    pub extract_json: bool,
}

/// Validates the extracted payload against a JSON Schema compiled at
/// registry-build time.
pub struct JsonSchemaAssertion {
    pub schema: jsonschema::JSONSchema,
    pub allow_wrapped: bool,
    pub extract_json: bool,
}

#[async_trait::async_trait]
impl Assertion for JsonSchemaAssertion {
    fn kind(&self) -> &str {
        "json_schema"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let Some(payload) =
            extract_json_payload(&subject.text(), self.allow_wrapped, self.extract_json)
        else {
            return ValidationResult::fail(self.kind(), "content is not valid JSON");
        };

        let violations: Vec<Violation> = match self.schema.validate(&payload) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| {
                    Violation::new(format!("{} (at {})", e, e.instance_path))
                })
                .collect(),
        };

        if violations.is_empty() {
            ValidationResult::pass(self.kind())
        } else {
            let mut result = ValidationResult::fail(
                self.kind(),
                format!("{} schema violation(s)", violations.len()),
            );
            for violation in violations {
                result = result.with_violation(violation);
            }
            result
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// json_path
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct JsonPathParams {
    /// Canonical param name; `expression` is the accepted legacy alias.
    #[serde(default)]
    pub jmespath_expression: Option<String>,
    #[serde(default)]
    pub expression: Option<String>,
    #[serde(default)]
    pub expected: Option<Value>,
    #[serde(default)]
    pub allow_wrapped: bool,
    #[serde(default)]
    pub extract_json: bool,
}

impl JsonPathParams {
    pub fn expression(&self) -> Option<&str> {
        self.jmespath_expression
            .as_deref()
            .or(self.expression.as_deref())
    }
}

/// Evaluates a JMESPath expression against the extracted payload. With
/// `expected`, the search result must equal it; otherwise the result only
/// has to exist (non-null).
pub struct JsonPathAssertion {
    pub expression: String,
    pub expected: Option<Value>,
    pub allow_wrapped: bool,
    pub extract_json: bool,
}

#[async_trait::async_trait]
impl Assertion for JsonPathAssertion {
    fn kind(&self) -> &str {
        "json_path"
    }

    async fn check(&self, subject: Subject<'_>) -> ValidationResult {
        let Some(payload) =
            extract_json_payload(&subject.text(), self.allow_wrapped, self.extract_json)
        else {
            return ValidationResult::fail(self.kind(), "content is not valid JSON");
        };

        let compiled = match jmespatch::compile(&self.expression) {
            Ok(expr) => expr,
            Err(e) => {
                return ValidationResult::fail(
                    self.kind(),
                    format!("invalid JMESPath expression {:?}: {e}", self.expression),
                )
            }
        };
        let found = match compiled.search(payload.clone()) {
            Ok(found) => found,
            Err(e) => {
                return ValidationResult::fail(self.kind(), format!("search failed: {e}"))
            }
        };
        let found_value = serde_json::to_value(found.as_ref()).unwrap_or(Value::Null);

        match &self.expected {
            Some(expected) if &found_value == expected => ValidationResult::pass(self.kind())
                .with_detail("jmespath_expression", Value::String(self.expression.clone())),
            Some(expected) => ValidationResult::fail(
                self.kind(),
                format!("expected {expected}, found {found_value}"),
            )
            .with_detail("jmespath_expression", Value::String(self.expression.clone()))
            .with_detail("found", found_value),
            None if !found_value.is_null() => ValidationResult::pass(self.kind())
                .with_detail("jmespath_expression", Value::String(self.expression.clone())),
            None => ValidationResult::fail(
                self.kind(),
                format!("expression {:?} matched nothing", self.expression),
            )
            .with_detail("jmespath_expression", Value::String(self.expression.clone())),
        }
    }
}
