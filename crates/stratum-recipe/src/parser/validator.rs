//! Static analysis and validation of the parsed AST.
//!
//! Checks argument references, duplicate declarations, and malformed
//! step operands before anything is planned or executed.

use std::collections::HashSet;

use stratum_common::error::{Result, StratumError};

use super::ast::{BuildStep, Recipe};
use crate::interpolate;

/// Validates a recipe for semantic correctness.
///
/// # Checks performed
///
/// 1. Every `${name}` in `RUN`, `COPY` and `WORKDIR`, and every branch
///    condition, refers to an argument declared earlier in scope. A
///    declaration inside a branch arm is visible only within that arm.
/// 2. No argument is declared twice anywhere in the recipe.
/// 3. `RUN`/`ENTRYPOINT` argv, `COPY` paths and `WORKDIR` are non-empty.
/// 4. Exposed ports are non-zero.
///
/// # Errors
///
/// Returns the first failing check; argument errors carry the step ordinal.
pub fn validate(recipe: &Recipe) -> Result<()> {
    tracing::debug!("validating recipe");
    let mut walker = Walker {
        ordinal: 0,
        all_declared: HashSet::new(),
    };
    walker.walk(&recipe.steps, &mut HashSet::new())
}

struct Walker<'r> {
    ordinal: usize,
    all_declared: HashSet<&'r str>,
}

impl<'r> Walker<'r> {
    fn walk(&mut self, steps: &'r [BuildStep], scope: &mut HashSet<&'r str>) -> Result<()> {
        for step in steps {
            let step_no = self.ordinal;
            self.ordinal += 1;
            match step {
                BuildStep::DeclareArg { name, .. } => {
                    if !self.all_declared.insert(name.as_str()) {
                        return Err(invalid(step_no, format!("argument {name} is declared twice")));
                    }
                    let _ = scope.insert(name.as_str());
                }
                BuildStep::RunCommand { argv } | BuildStep::SetEntrypoint { argv } => {
                    if argv.is_empty() || argv[0].is_empty() {
                        return Err(invalid(step_no, format!("{} needs a command", step.keyword())));
                    }
                    if matches!(step, BuildStep::RunCommand { .. }) {
                        for arg in argv {
                            check_references(arg, scope, step_no)?;
                        }
                    }
                }
                BuildStep::CopyFiles { src, dst } => {
                    if src.is_empty() || dst.is_empty() {
                        return Err(invalid(step_no, "COPY needs a source and a destination".into()));
                    }
                    check_references(src, scope, step_no)?;
                    check_references(dst, scope, step_no)?;
                }
                BuildStep::SetWorkdir { path } => {
                    if path.is_empty() {
                        return Err(invalid(step_no, "WORKDIR needs a path".into()));
                    }
                    check_references(path, scope, step_no)?;
                }
                BuildStep::SetEnv { key, .. } => {
                    if key.is_empty() {
                        return Err(invalid(step_no, "ENV needs a key".into()));
                    }
                }
                BuildStep::ExposePort { port } => {
                    if *port == 0 {
                        return Err(invalid(step_no, "EXPOSE 0 is not a valid port".into()));
                    }
                }
                BuildStep::Branch {
                    condition,
                    then_steps,
                    else_steps,
                } => {
                    if !scope.contains(condition.arg.as_str()) {
                        return Err(StratumError::UndeclaredArgument {
                            name: condition.arg.clone(),
                            step: step_no,
                        });
                    }
                    self.walk(then_steps, &mut scope.clone())?;
                    self.walk(else_steps, &mut scope.clone())?;
                }
            }
        }
        Ok(())
    }
}

fn check_references(template: &str, scope: &HashSet<&str>, step: usize) -> Result<()> {
    let names = interpolate::references(template).map_err(|e| invalid(step, e.to_string()))?;
    match names.into_iter().find(|name| !scope.contains(name)) {
        Some(name) => Err(StratumError::UndeclaredArgument {
            name: name.to_owned(),
            step,
        }),
        None => Ok(()),
    }
}

fn invalid(step: usize, message: String) -> StratumError {
    StratumError::Config {
        message: format!("step {step}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Condition;

    fn arg(name: &str) -> BuildStep {
        BuildStep::DeclareArg {
            name: name.into(),
            default: None,
        }
    }

    fn run(args: &[&str]) -> BuildStep {
        BuildStep::RunCommand {
            argv: args.iter().map(|s| (*s).to_owned()).collect(),
        }
    }

    #[test]
    fn valid_recipe_passes() {
        let recipe = Recipe::new(vec![
            arg("DEV"),
            run(&["echo", "${DEV}"]),
            BuildStep::Branch {
                condition: Condition::equals("DEV", "true"),
                then_steps: vec![run(&["true"])],
                else_steps: Vec::new(),
            },
        ]);
        assert!(validate(&recipe).is_ok());
    }

    #[test]
    fn reference_before_declaration_is_undeclared() {
        let recipe = Recipe::new(vec![run(&["echo", "${DEV}"]), arg("DEV")]);
        let err = validate(&recipe).expect_err("should fail");
        assert!(
            matches!(err, StratumError::UndeclaredArgument { ref name, step: 0 } if name == "DEV"),
            "{err}"
        );
    }

    #[test]
    fn undeclared_condition_argument_is_rejected() {
        let recipe = Recipe::new(vec![BuildStep::Branch {
            condition: Condition::equals("DEV", "true"),
            then_steps: Vec::new(),
            else_steps: Vec::new(),
        }]);
        assert!(matches!(
            validate(&recipe),
            Err(StratumError::UndeclaredArgument { step: 0, .. })
        ));
    }

    #[test]
    fn untaken_arm_is_still_checked() {
        let recipe = Recipe::new(vec![
            arg("DEV"),
            BuildStep::Branch {
                condition: Condition::equals("DEV", "never"),
                then_steps: vec![run(&["echo", "ok"]), run(&["echo", "${MISSING}"])],
                else_steps: Vec::new(),
            },
        ]);
        assert!(matches!(
            validate(&recipe),
            Err(StratumError::UndeclaredArgument { step: 3, .. })
        ));
    }

    #[test]
    fn branch_scoped_declaration_is_invisible_afterwards() {
        let recipe = Recipe::new(vec![
            arg("DEV"),
            BuildStep::Branch {
                condition: Condition::equals("DEV", "true"),
                then_steps: vec![arg("EXTRA"), run(&["echo", "${EXTRA}"])],
                else_steps: Vec::new(),
            },
            run(&["echo", "${EXTRA}"]),
        ]);
        assert!(matches!(
            validate(&recipe),
            Err(StratumError::UndeclaredArgument { step: 4, .. })
        ));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let recipe = Recipe::new(vec![arg("DEV"), arg("DEV")]);
        assert!(matches!(validate(&recipe), Err(StratumError::Config { .. })));
    }

    #[test]
    fn empty_operands_are_rejected() {
        assert!(validate(&Recipe::new(vec![run(&[])])).is_err());
        assert!(validate(&Recipe::new(vec![BuildStep::ExposePort { port: 0 }])).is_err());
        assert!(
            validate(&Recipe::new(vec![BuildStep::CopyFiles {
                src: String::new(),
                dst: "/app".into(),
            }]))
            .is_err()
        );
    }

    #[test]
    fn copy_references_are_checked() {
        let recipe = Recipe::new(vec![BuildStep::CopyFiles {
            src: "${SRC}".into(),
            dst: "/app".into(),
        }]);
        assert!(matches!(
            validate(&recipe),
            Err(StratumError::UndeclaredArgument { .. })
        ));
    }

    #[test]
    fn malformed_reference_is_config_error() {
        let recipe = Recipe::new(vec![run(&["echo", "${OPEN"])]);
        assert!(matches!(validate(&recipe), Err(StratumError::Config { .. })));
    }
}
