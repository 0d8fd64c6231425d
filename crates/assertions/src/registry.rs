//! Assertion registry: `type` string -> factory dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use pk_domain::clock::{Clock, SystemClock};
use pk_domain::config::AssertionSpec;
use pk_domain::{Error, Result};
use pk_providers::Provider;

use crate::content::{
    ContentIncludes, ContentMatches, ContentNotIncludes, LengthParams, MaxLength, MinLength,
    PatternsParams, RegexParams,
};
use crate::json::{
    IsValidJson, JsonParams, JsonPathAssertion, JsonPathParams, JsonSchemaAssertion,
    JsonSchemaParams,
};
use crate::judge::{LlmJudgeAssertion, LlmJudgeParams};
use crate::tools::{ToolNamesParams, ToolsCalled, ToolsNotCalled};
use crate::Assertion;

/// Resolves the judge provider for `llm_judge` assertions. `None` asks for
/// the suite's default judge.
pub type JudgeResolver =
    Arc<dyn Fn(Option<&str>) -> Result<Arc<dyn Provider>> + Send + Sync>;

type Factory = Arc<dyn Fn(&AssertionSpec) -> Result<Arc<dyn Assertion>> + Send + Sync>;

/// Deserialize an assertion's flattened params into its typed record.
fn params<T: DeserializeOwned>(spec: &AssertionSpec) -> Result<T> {
    let object: serde_json::Map<String, Value> = spec
        .params
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    serde_json::from_value(Value::Object(object))
        .map_err(|e| Error::Config(format!("assertion {:?}: {e}", spec.kind)))
}

/// Builds [`Assertion`] instances from declarative specs. New kinds are
/// added with [`AssertionRegistry::register`]; nothing dispatches on
/// concrete types.
#[derive(Clone)]
pub struct AssertionRegistry {
    factories: HashMap<String, Factory>,
}

impl AssertionRegistry {
    /// Registry with every built-in kind except `llm_judge` (which needs a
    /// judge provider; see [`AssertionRegistry::with_judge`]).
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };

        registry.register("content_includes", |spec| {
            let p: PatternsParams = params(spec)?;
            Ok(Arc::new(ContentIncludes { patterns: p.patterns }))
        });
        registry.register("content_not_includes", |spec| {
            let p: PatternsParams = params(spec)?;
            Ok(Arc::new(ContentNotIncludes { patterns: p.patterns }))
        });
        registry.register("content_matches", |spec| {
            let p: RegexParams = params(spec)?;
            let pattern = regex::Regex::new(&p.regex)
                .map_err(|e| Error::Config(format!("content_matches: invalid regex: {e}")))?;
            Ok(Arc::new(ContentMatches { pattern }))
        });
        registry.register("max_length", |spec| {
            let p: LengthParams = params(spec)?;
            Ok(Arc::new(MaxLength { chars: p.chars }))
        });
        registry.register("min_length", |spec| {
            let p: LengthParams = params(spec)?;
            Ok(Arc::new(MinLength { chars: p.chars }))
        });
        registry.register("tools_called", |spec| {
            let p: ToolNamesParams = params(spec)?;
            Ok(Arc::new(ToolsCalled { names: p.names }))
        });
        registry.register("tools_not_called", |spec| {
            let p: ToolNamesParams = params(spec)?;
            Ok(Arc::new(ToolsNotCalled { names: p.names }))
        });
        registry.register("is_valid_json", |spec| {
            let p: JsonParams = params(spec)?;
            Ok(Arc::new(IsValidJson {
                allow_wrapped: p.allow_wrapped,
                extract_json: p.extract_json,
            }))
        });
        registry.register("json_schema", |spec| {
            let p: JsonSchemaParams = params(spec)?;
            let schema = jsonschema::JSONSchema::compile(&p.schema)
                .map_err(|e| Error::Config(format!("json_schema: invalid schema: {e}")))?;
            Ok(Arc::new(JsonSchemaAssertion {
                schema,
                allow_wrapped: p.allow_wrapped,
                extract_json: p.extract_json,
            }))
        });
        registry.register("json_path", |spec| {
            let p: JsonPathParams = params(spec)?;
            let expression = p
                .expression()
                .ok_or_else(|| {
                    Error::Config("json_path requires jmespath_expression".into())
                })?
                .to_string();
            // Compile once now to surface syntax errors at load time.
            jmespatch::compile(&expression)
                .map_err(|e| Error::Config(format!("json_path: invalid expression: {e}")))?;
            Ok(Arc::new(JsonPathAssertion {
                expression,
                expected: p.expected,
                allow_wrapped: p.allow_wrapped,
                extract_json: p.extract_json,
            }))
        });

        registry
    }

    /// Add the `llm_judge` kind, backed by the given provider resolver.
    pub fn with_judge(mut self, resolver: JudgeResolver, clock: Arc<dyn Clock>) -> Self {
        self.register("llm_judge", move |spec| {
            let p: LlmJudgeParams = params(spec)?;
            let provider = resolver(p.judge_provider.as_deref())?;
            Ok(Arc::new(LlmJudgeAssertion {
                rubric: p.rubric,
                threshold: p.threshold,
                provider,
                clock: clock.clone(),
            }))
        });
        self
    }

    /// Convenience for a single fixed judge provider.
    pub fn with_default_judge(self, judge: Arc<dyn Provider>) -> Self {
        let resolver: JudgeResolver = Arc::new(move |_| Ok(judge.clone()));
        self.with_judge(resolver, Arc::new(SystemClock))
    }

    /// Register (or replace) a kind.
    pub fn register<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&AssertionSpec) -> Result<Arc<dyn Assertion>> + Send + Sync + 'static,
    {
        self.factories.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn build(&self, spec: &AssertionSpec) -> Result<Arc<dyn Assertion>> {
        let factory = self
            .factories
            .get(&spec.kind)
            .ok_or_else(|| Error::Config(format!("unknown assertion type: {}", spec.kind)))?;
        factory(spec)
    }

    pub fn build_all(&self, specs: &[AssertionSpec]) -> Result<Vec<Arc<dyn Assertion>>> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }
}
