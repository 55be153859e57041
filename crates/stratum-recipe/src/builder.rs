//! Fluent API for assembling recipes in code.

use stratum_common::error::Result;

use crate::parser::ast::{BuildStep, Condition, Recipe};
use crate::parser::validator;

/// Builder for a [`Recipe`], validated on [`RecipeBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct RecipeBuilder {
    steps: Vec<BuildStep>,
}

impl RecipeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a build argument with a default value.
    #[must_use]
    pub fn arg(mut self, name: impl Into<String>, default: impl Into<String>) -> Self {
        self.steps.push(BuildStep::DeclareArg {
            name: name.into(),
            default: Some(default.into()),
        });
        self
    }

    /// Declares a build argument the caller is expected to supply.
    #[must_use]
    pub fn required_arg(mut self, name: impl Into<String>) -> Self {
        self.steps.push(BuildStep::DeclareArg {
            name: name.into(),
            default: None,
        });
        self
    }

    /// Runs a command in exec form.
    #[must_use]
    pub fn run<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(BuildStep::RunCommand {
            argv: argv.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Copies a path from the source directory into the image.
    #[must_use]
    pub fn copy(mut self, src: impl Into<String>, dst: impl Into<String>) -> Self {
        self.steps.push(BuildStep::CopyFiles {
            src: src.into(),
            dst: dst.into(),
        });
        self
    }

    /// Sets an environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.steps.push(BuildStep::SetEnv {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Changes the working directory.
    #[must_use]
    pub fn workdir(mut self, path: impl Into<String>) -> Self {
        self.steps.push(BuildStep::SetWorkdir { path: path.into() });
        self
    }

    /// Exposes a port.
    #[must_use]
    pub fn expose(mut self, port: u16) -> Self {
        self.steps.push(BuildStep::ExposePort { port });
        self
    }

    /// Sets the entrypoint in exec form.
    #[must_use]
    pub fn entrypoint<I, S>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps.push(BuildStep::SetEntrypoint {
            argv: argv.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Adds a branch with no `ELSE` arm.
    #[must_use]
    pub fn when(self, condition: Condition, then: impl FnOnce(Self) -> Self) -> Self {
        self.when_else(condition, then, |b| b)
    }

    /// Adds a branch with both arms.
    #[must_use]
    pub fn when_else(
        mut self,
        condition: Condition,
        then: impl FnOnce(Self) -> Self,
        otherwise: impl FnOnce(Self) -> Self,
    ) -> Self {
        self.steps.push(BuildStep::Branch {
            condition,
            then_steps: then(Self::new()).steps,
            else_steps: otherwise(Self::new()).steps,
        });
        self
    }

    /// Validates and returns the recipe.
    ///
    /// # Errors
    ///
    /// Returns the same errors as parsing the equivalent recipe text.
    pub fn build(self) -> Result<Recipe> {
        let recipe = Recipe::new(self.steps);
        validator::validate(&recipe)?;
        Ok(recipe)
    }

    /// Returns the recipe without validating it.
    #[must_use]
    pub fn build_unchecked(self) -> Recipe {
        Recipe::new(self.steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_recipe;

    #[test]
    fn builder_matches_parsed_recipe() {
        let built = RecipeBuilder::new()
            .arg("DEV", "false")
            .run(["pip", "install", "-r", "requirements.txt"])
            .when(Condition::equals("DEV", "true"), |b| {
                b.run(["pip", "install", "-r", "requirements.dev.txt"])
            })
            .build()
            .expect("valid");
        let parsed = parse_recipe(
            r#"
ARG DEV = "false"
RUN ["pip", "install", "-r", "requirements.txt"]
IF DEV == "true" {
    RUN ["pip", "install", "-r", "requirements.dev.txt"]
}
"#,
        )
        .expect("parse");
        assert_eq!(built, parsed);
    }

    #[test]
    fn build_rejects_undeclared_reference() {
        let result = RecipeBuilder::new().run(["echo", "${DEV}"]).build();
        assert!(result.is_err());
    }

    #[test]
    fn build_unchecked_skips_validation() {
        let recipe = RecipeBuilder::new().run(["echo", "${DEV}"]).build_unchecked();
        assert_eq!(recipe.steps.len(), 1);
    }

    #[test]
    fn when_else_populates_both_arms() {
        let recipe = RecipeBuilder::new()
            .required_arg("MODE")
            .when_else(
                Condition::equals("MODE", "a"),
                |b| b.expose(1),
                |b| b.expose(2).expose(3),
            )
            .build()
            .expect("valid");
        assert_eq!(recipe.step_count(), 5);
    }
}
