use std::collections::BTreeMap;

use crate::config::PromptConfig;
use crate::{Error, Result};

/// Resolve the variable map for one scenario run.
///
/// Priority order: arena-level `vars` > prompt-config defaults > scenario
/// context. Resolution happens at configuration-load time; a `required`
/// variable still missing after all three layers is a configuration error,
/// never a template-expansion-time surprise.
pub fn resolve_variables(
    arena_vars: &BTreeMap<String, String>,
    prompt_config: Option<&PromptConfig>,
    scenario_context: &BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut resolved = scenario_context.clone();

    if let Some(cfg) = prompt_config {
        for (name, var) in &cfg.variables {
            if let Some(default) = &var.default {
                resolved.insert(name.clone(), default.clone());
            }
        }
    }

    for (name, value) in arena_vars {
        resolved.insert(name.clone(), value.clone());
    }

    if let Some(cfg) = prompt_config {
        let missing: Vec<&str> = cfg
            .variables
            .iter()
            .filter(|(name, var)| var.required && !resolved.contains_key(*name))
            .map(|(name, _)| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::Config(format!(
                "prompt config {:?} is missing required variables: {}",
                cfg.name,
                missing.join(", ")
            )));
        }
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VariableSpec;

    fn prompt_config(vars: &[(&str, Option<&str>, bool)]) -> PromptConfig {
        PromptConfig {
            name: "default".into(),
            system_prompt: "You support {{product}}.".into(),
            variables: vars
                .iter()
                .map(|(name, default, required)| {
                    (
                        name.to_string(),
                        VariableSpec {
                            default: default.map(String::from),
                            required: *required,
                            description: None,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn arena_vars_win_over_defaults_and_context() {
        let arena = BTreeMap::from([("product".to_string(), "FromArena".to_string())]);
        let cfg = prompt_config(&[("product", Some("FromDefault"), false)]);
        let context = BTreeMap::from([("product".to_string(), "FromScenario".to_string())]);

        let resolved = resolve_variables(&arena, Some(&cfg), &context).unwrap();
        assert_eq!(resolved["product"], "FromArena");
    }

    #[test]
    fn prompt_defaults_win_over_scenario_context() {
        let arena = BTreeMap::new();
        let cfg = prompt_config(&[("tone", Some("friendly"), false)]);
        let context = BTreeMap::from([
            ("tone".to_string(), "curt".to_string()),
            ("locale".to_string(), "en-GB".to_string()),
        ]);

        let resolved = resolve_variables(&arena, Some(&cfg), &context).unwrap();
        assert_eq!(resolved["tone"], "friendly");
        assert_eq!(resolved["locale"], "en-GB");
    }

    #[test]
    fn missing_required_variable_fails_loading() {
        let err = resolve_variables(
            &BTreeMap::new(),
            Some(&prompt_config(&[("product", None, true)])),
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("product"));
    }

    #[test]
    fn required_satisfied_by_any_layer() {
        let context = BTreeMap::from([("product".to_string(), "Acme".to_string())]);
        let resolved = resolve_variables(
            &BTreeMap::new(),
            Some(&prompt_config(&[("product", None, true)])),
            &context,
        )
        .unwrap();
        assert_eq!(resolved["product"], "Acme");
    }
}
