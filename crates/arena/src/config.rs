//! Arena suite loading: parse the three YAML kinds, resolve `file:`
//! references, and validate before anything is scheduled.
//!
//! Every problem found here is a configuration error (CLI exit code 2);
//! nothing network-facing happens during loading.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use pk_domain::config::{
    ArenaDefaults, ArenaSpec, Document, Entry, PromptConfig, ProviderSpec, ScenarioSpec,
    resolve_variables,
};
use pk_domain::{Error, Result};

/// A fully resolved, validated suite.
#[derive(Debug, Clone)]
pub struct LoadedSuite {
    pub name: String,
    pub vars: BTreeMap<String, String>,
    pub prompt_configs: Vec<PromptConfig>,
    pub providers: Vec<ProviderSpec>,
    pub scenarios: Vec<ScenarioSpec>,
    pub defaults: ArenaDefaults,
}

impl LoadedSuite {
    /// The system prompt under test (the first prompt config), untemplated.
    pub fn system_prompt(&self) -> Option<&str> {
        self.prompt_configs
            .first()
            .map(|cfg| cfg.system_prompt.as_str())
    }

    /// Resolve the variable map for one scenario, honouring the priority
    /// order arena vars > prompt-config defaults > scenario context.
    pub fn variables_for(&self, scenario: &ScenarioSpec) -> Result<BTreeMap<String, String>> {
        resolve_variables(&self.vars, self.prompt_configs.first(), &scenario.context)
    }

    /// Drop scenarios/providers outside the CLI filters.
    pub fn filter(&mut self, scenario: Option<&str>, provider: Option<&str>) -> Result<()> {
        if let Some(id) = scenario {
            self.scenarios.retain(|s| s.id == id);
            if self.scenarios.is_empty() {
                return Err(Error::Config(format!("unknown scenario: {id}")));
            }
        }
        if let Some(id) = provider {
            self.providers.retain(|p| p.id == id);
            if self.providers.is_empty() {
                return Err(Error::Config(format!("unknown provider: {id}")));
            }
        }
        Ok(())
    }
}

fn read_yaml<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_yaml::from_str(&raw)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn resolve_entry<T: serde::de::DeserializeOwned>(
    entry: &Entry<T>,
    base_dir: &Path,
    kind: &str,
) -> Result<T>
where
    T: Clone,
{
    match entry {
        Entry::Inline(spec) => Ok(spec.clone()),
        Entry::File { file } => {
            let path = base_dir.join(file);
            let doc: Document<T> = read_yaml(&path)?;
            doc.check_kind(kind)?;
            Ok(doc.spec)
        }
    }
}

/// Load and validate an `Arena` file and everything it references.
pub fn load_suite(path: &Path) -> Result<LoadedSuite> {
    let doc: Document<ArenaSpec> = read_yaml(path)?;
    doc.check_kind("Arena")?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let providers: Vec<ProviderSpec> = doc
        .spec
        .providers
        .iter()
        .map(|entry| resolve_entry(entry, base_dir, "Provider"))
        .collect::<Result<_>>()?;
    let scenarios: Vec<ScenarioSpec> = doc
        .spec
        .scenarios
        .iter()
        .map(|entry| resolve_entry(entry, base_dir, "Scenario"))
        .collect::<Result<_>>()?;

    let suite = LoadedSuite {
        name: doc.metadata.name,
        vars: doc.spec.vars,
        prompt_configs: doc.spec.prompt_configs,
        providers,
        scenarios,
        defaults: doc.spec.defaults.resolve(),
    };
    validate_suite(&suite)?;
    Ok(suite)
}

/// Registry used only to validate assertion specs at load time; the judge
/// slot is filled with a mock so `llm_judge` entries parse without
/// touching a real provider.
fn assertion_check_registry() -> pk_assertions::AssertionRegistry {
    pk_assertions::AssertionRegistry::builtin()
        .with_default_judge(std::sync::Arc::new(pk_providers::MockProvider::new("validate")))
}

/// Structural validation: ids are present and unique, the matrix is
/// non-empty, required variables resolve, assertion specs build, and
/// formats are known.
pub fn validate_suite(suite: &LoadedSuite) -> Result<()> {
    if suite.providers.is_empty() {
        return Err(Error::Config("arena defines no providers".into()));
    }
    if suite.scenarios.is_empty() {
        return Err(Error::Config("arena defines no scenarios".into()));
    }

    let mut seen = BTreeSet::new();
    for provider in &suite.providers {
        if !seen.insert(provider.id.as_str()) {
            return Err(Error::Config(format!("duplicate provider id: {}", provider.id)));
        }
    }
    seen.clear();
    for scenario in &suite.scenarios {
        if !seen.insert(scenario.id.as_str()) {
            return Err(Error::Config(format!("duplicate scenario id: {}", scenario.id)));
        }
        if scenario.turns.is_empty() {
            return Err(Error::Config(format!(
                "scenario {} has no turns",
                scenario.id
            )));
        }
        // Fails loading when a required variable is missing.
        suite.variables_for(scenario)?;
    }

    // Assertion specs compile now (regexes, schemas, JMESPath) so a typo
    // fails `arena validate` instead of a run.
    let registry = assertion_check_registry();
    for scenario in &suite.scenarios {
        for turn in &scenario.turns {
            registry.build_all(&turn.assertions).map_err(|e| {
                Error::Config(format!("scenario {}: {e}", scenario.id))
            })?;
        }
        registry
            .build_all(&scenario.conversation_assertions)
            .map_err(|e| Error::Config(format!("scenario {}: {e}", scenario.id)))?;
    }

    for format in &suite.defaults.formats {
        if !matches!(format.as_str(), "json" | "markdown" | "junit" | "html") {
            return Err(Error::Config(format!("unknown result format: {format}")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write(dir: &Path, name: &str, contents: &str) {
        let mut f = std::fs::File::create(dir.join(name)).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    const ARENA: &str = r#"
apiVersion: promptkit/v1
kind: Arena
metadata:
  name: support-suite
spec:
  vars:
    product: Acme
  prompt_configs:
    - name: default
      system_prompt: "You support {{product}}."
      variables:
        product:
          required: true
  providers:
    - id: mock
      type: mock
      model: mock-1
    - file: claude.yaml
  scenarios:
    - file: greet.yaml
  defaults:
    concurrency: 2
    formats: [json, junit]
"#;

    const PROVIDER: &str = r#"
apiVersion: promptkit/v1
kind: Provider
metadata:
  name: claude
spec:
  id: claude
  type: anthropic
  model: claude-sonnet-4-5
  credential:
    env: ANTHROPIC_API_KEY
"#;

    const SCENARIO: &str = r#"
apiVersion: promptkit/v1
kind: Scenario
metadata:
  name: greet
spec:
  id: greet
  turns:
    - role: user
      content: "Say hi"
"#;

    #[test]
    fn loads_inline_and_file_entries() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "arena.yaml", ARENA);
        write(dir.path(), "claude.yaml", PROVIDER);
        write(dir.path(), "greet.yaml", SCENARIO);

        let suite = load_suite(&dir.path().join("arena.yaml")).unwrap();
        assert_eq!(suite.name, "support-suite");
        assert_eq!(suite.providers.len(), 2);
        assert_eq!(suite.scenarios.len(), 1);
        assert_eq!(suite.defaults.concurrency, 2);
        assert_eq!(suite.system_prompt(), Some("You support {{product}}."));

        let vars = suite.variables_for(&suite.scenarios[0]).unwrap();
        assert_eq!(vars["product"], "Acme");
    }

    #[test]
    fn missing_required_variable_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        // Arena without vars; prompt config requires `product`.
        let arena = ARENA.replace("  vars:\n    product: Acme\n", "");
        write(dir.path(), "arena.yaml", &arena);
        write(dir.path(), "claude.yaml", PROVIDER);
        write(dir.path(), "greet.yaml", SCENARIO);

        let err = load_suite(&dir.path().join("arena.yaml")).unwrap_err();
        assert!(err.to_string().contains("product"));
    }

    #[test]
    fn wrong_kind_in_reference_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "arena.yaml", ARENA);
        write(dir.path(), "claude.yaml", SCENARIO); // wrong kind
        write(dir.path(), "greet.yaml", SCENARIO);

        let err = load_suite(&dir.path().join("arena.yaml")).unwrap_err();
        assert!(err.to_string().contains("Provider"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let arena = ARENA.replace("    - file: claude.yaml\n", "    - id: mock\n      type: mock\n      model: mock-2\n");
        write(dir.path(), "arena.yaml", &arena);
        write(dir.path(), "greet.yaml", SCENARIO);

        let err = load_suite(&dir.path().join("arena.yaml")).unwrap_err();
        assert!(err.to_string().contains("duplicate provider"));
    }

    #[test]
    fn filter_narrows_the_matrix() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "arena.yaml", ARENA);
        write(dir.path(), "claude.yaml", PROVIDER);
        write(dir.path(), "greet.yaml", SCENARIO);

        let mut suite = load_suite(&dir.path().join("arena.yaml")).unwrap();
        suite.filter(None, Some("mock")).unwrap();
        assert_eq!(suite.providers.len(), 1);

        assert!(suite.filter(Some("nope"), None).is_err());
    }

    #[test]
    fn unknown_assertion_type_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "arena.yaml", ARENA);
        write(dir.path(), "claude.yaml", PROVIDER);
        let scenario = SCENARIO.replace(
            "      content: \"Say hi\"\n",
            "      content: \"Say hi\"\n      assertions:\n        - type: telepathy\n",
        );
        write(dir.path(), "greet.yaml", &scenario);

        let err = load_suite(&dir.path().join("arena.yaml")).unwrap_err();
        assert!(err.to_string().contains("telepathy"));
    }

    #[test]
    fn unknown_format_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let arena = ARENA.replace("formats: [json, junit]", "formats: [json, pdf]");
        write(dir.path(), "arena.yaml", &arena);
        write(dir.path(), "claude.yaml", PROVIDER);
        write(dir.path(), "greet.yaml", SCENARIO);

        let err = load_suite(&dir.path().join("arena.yaml")).unwrap_err();
        assert!(err.to_string().contains("pdf"));
    }
}
