//! Build-argument resolution.

use std::collections::BTreeMap;

use stratum_common::error::{Result, StratumError};
use stratum_recipe::{BuildStep, Recipe};

/// Resolved value of every argument the recipe declares.
///
/// Built once before planning and immutable for the rest of the build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildContext {
    values: BTreeMap<String, String>,
    ignored: Vec<String>,
}

impl BuildContext {
    /// Resolves each declared argument from `overrides`, then its default,
    /// then the empty string.
    ///
    /// Overrides naming arguments the recipe never declares are ignored
    /// with a warning.
    #[must_use]
    pub fn resolve(recipe: &Recipe, overrides: &BTreeMap<String, String>) -> Self {
        let mut values = BTreeMap::new();
        collect(&recipe.steps, overrides, &mut values);

        let ignored: Vec<String> = overrides
            .keys()
            .filter(|name| !values.contains_key(*name))
            .cloned()
            .collect();
        for name in &ignored {
            tracing::warn!(arg = %name, "ignoring override for undeclared argument");
        }
        Self { values, ignored }
    }

    /// Resolved value of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// All resolved arguments in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overrides that matched no declaration.
    #[must_use]
    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }
}

fn collect(
    steps: &[BuildStep],
    overrides: &BTreeMap<String, String>,
    values: &mut BTreeMap<String, String>,
) {
    for step in steps {
        match step {
            BuildStep::DeclareArg { name, default } => {
                let value = overrides
                    .get(name)
                    .or(default.as_ref())
                    .cloned()
                    .unwrap_or_default();
                let _ = values.insert(name.clone(), value);
            }
            BuildStep::Branch {
                then_steps,
                else_steps,
                ..
            } => {
                collect(then_steps, overrides, values);
                collect(else_steps, overrides, values);
            }
            _ => {}
        }
    }
}

/// Parses a `NAME=VALUE` override as given on the command line.
///
/// # Errors
///
/// Returns `StratumError::Config` if there is no `=` or the name is empty.
pub fn parse_assignment(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_owned(), value.to_owned()))
        }
        _ => Err(StratumError::Config {
            message: format!("expected NAME=VALUE, got {raw:?}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use stratum_recipe::{Condition, RecipeBuilder};

    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[test]
    fn override_beats_default() {
        let recipe = RecipeBuilder::new().arg("DEV", "false").build_unchecked();
        let ctx = BuildContext::resolve(&recipe, &overrides(&[("DEV", "true")]));
        assert_eq!(ctx.get("DEV"), Some("true"));
    }

    #[test]
    fn missing_default_resolves_to_empty() {
        let recipe = RecipeBuilder::new().required_arg("TOKEN").build_unchecked();
        let ctx = BuildContext::resolve(&recipe, &BTreeMap::new());
        assert_eq!(ctx.get("TOKEN"), Some(""));
    }

    #[test]
    fn undeclared_overrides_are_ignored() {
        let recipe = RecipeBuilder::new().arg("DEV", "false").build_unchecked();
        let ctx = BuildContext::resolve(&recipe, &overrides(&[("NOPE", "1")]));
        assert_eq!(ctx.get("NOPE"), None);
        assert_eq!(ctx.ignored(), ["NOPE".to_owned()]);
    }

    #[test]
    fn declarations_inside_branches_are_resolved() {
        let recipe = RecipeBuilder::new()
            .arg("MODE", "a")
            .when(Condition::equals("MODE", "a"), |b| b.arg("INNER", "x"))
            .build_unchecked();
        let ctx = BuildContext::resolve(&recipe, &BTreeMap::new());
        let names: Vec<_> = ctx.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["INNER", "MODE"]);
    }

    #[test]
    fn parse_assignment_splits_on_first_equals() {
        assert_eq!(
            parse_assignment("URL=a=b").expect("parse"),
            ("URL".to_owned(), "a=b".to_owned())
        );
        assert_eq!(
            parse_assignment("EMPTY=").expect("parse"),
            ("EMPTY".to_owned(), String::new())
        );
        assert!(parse_assignment("novalue").is_err());
        assert!(parse_assignment("=x").is_err());
    }
}
