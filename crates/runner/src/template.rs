//! `{{var}}` template expansion for system prompts.
//!
//! The variable map is resolved and validated at configuration-load time,
//! so expansion is mechanical: known placeholders substitute, unknown ones
//! stay verbatim and are reported for logging.

use std::collections::BTreeMap;

/// Substitute `{{name}}` placeholders. Returns the expanded string and any
/// placeholder names that had no binding.
pub fn expand(template: &str, vars: &BTreeMap<String, String>) -> (String, Vec<String>) {
    let mut out = String::with_capacity(template.len());
    let mut unknown = Vec::new();
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = after[..end].trim();
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        out.push_str(&rest[start..start + 2 + end + 2]);
                        unknown.push(name.to_string());
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                // Unterminated braces are literal text.
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    (out, unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn substitutes_known_placeholders() {
        let (out, unknown) = expand(
            "You support {{product}} in {{locale}}.",
            &vars(&[("product", "Acme"), ("locale", "en-GB")]),
        );
        assert_eq!(out, "You support Acme in en-GB.");
        assert!(unknown.is_empty());
    }

    #[test]
    fn unknown_placeholders_stay_verbatim() {
        let (out, unknown) = expand("Hello {{name}}!", &vars(&[]));
        assert_eq!(out, "Hello {{name}}!");
        assert_eq!(unknown, vec!["name"]);
    }

    #[test]
    fn whitespace_inside_braces_is_tolerated() {
        let (out, _) = expand("{{ product }}", &vars(&[("product", "Acme")]));
        assert_eq!(out, "Acme");
    }

    #[test]
    fn unterminated_braces_are_literal() {
        let (out, unknown) = expand("broken {{tail", &vars(&[]));
        assert_eq!(out, "broken {{tail");
        assert!(unknown.is_empty());
    }

    #[test]
    fn no_placeholders_is_identity() {
        let (out, _) = expand("plain text", &vars(&[("a", "b")]));
        assert_eq!(out, "plain text");
    }
}
