//! Abstract Syntax Tree for Stratum recipes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root node of a parsed recipe: the ordered top-level steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recipe {
    /// Steps in declaration order.
    pub steps: Vec<BuildStep>,
}

impl Recipe {
    /// Creates a recipe from a list of steps.
    #[must_use]
    pub const fn new(steps: Vec<BuildStep>) -> Self {
        Self { steps }
    }

    /// Total number of steps, counting every step nested inside branches.
    #[must_use]
    pub fn step_count(&self) -> usize {
        count_steps(&self.steps)
    }
}

/// Counts `steps` depth-first, including branch arms.
#[must_use]
pub fn count_steps(steps: &[BuildStep]) -> usize {
    steps
        .iter()
        .map(|step| match step {
            BuildStep::Branch {
                then_steps,
                else_steps,
                ..
            } => 1 + count_steps(then_steps) + count_steps(else_steps),
            _ => 1,
        })
        .sum()
}

/// A single declarative build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStep {
    /// `COPY "<src>" "<dst>"`: copy from the source directory into the image.
    CopyFiles {
        /// Path relative to the build source directory.
        src: String,
        /// Destination inside the image.
        dst: String,
    },
    /// `RUN [...]` or `RUN "<shell>"`.
    RunCommand {
        /// Program and arguments.
        argv: Vec<String>,
    },
    /// `ENV <key> = "<value>"`
    SetEnv {
        /// Variable name.
        key: String,
        /// Variable value.
        value: String,
    },
    /// `WORKDIR "<path>"`
    SetWorkdir {
        /// New working directory, absolute or relative to the current one.
        path: String,
    },
    /// `ARG <name> [= "<default>"]`
    DeclareArg {
        /// Argument name.
        name: String,
        /// Value used when the caller supplies no override.
        default: Option<String>,
    },
    /// `EXPOSE <port>`
    ExposePort {
        /// TCP port number.
        port: u16,
    },
    /// `ENTRYPOINT [...]` or `ENTRYPOINT "<shell>"`.
    SetEntrypoint {
        /// Program and arguments.
        argv: Vec<String>,
    },
    /// `IF <arg> ==|!= "<value>" { ... } [ELSE { ... }]`
    ///
    /// Resolved once at plan time; only the selected arm produces layers.
    Branch {
        /// Selection predicate over a build argument.
        condition: Condition,
        /// Steps used when the condition holds.
        then_steps: Vec<BuildStep>,
        /// Steps used otherwise.
        else_steps: Vec<BuildStep>,
    },
}

impl BuildStep {
    /// Recipe keyword introducing this step.
    #[must_use]
    pub const fn keyword(&self) -> &'static str {
        match self {
            Self::CopyFiles { .. } => "COPY",
            Self::RunCommand { .. } => "RUN",
            Self::SetEnv { .. } => "ENV",
            Self::SetWorkdir { .. } => "WORKDIR",
            Self::DeclareArg { .. } => "ARG",
            Self::ExposePort { .. } => "EXPOSE",
            Self::SetEntrypoint { .. } => "ENTRYPOINT",
            Self::Branch { .. } => "IF",
        }
    }

    /// Whether the step can change the filesystem.
    #[must_use]
    pub const fn touches_filesystem(&self) -> bool {
        matches!(self, Self::CopyFiles { .. } | Self::RunCommand { .. })
    }
}

impl fmt::Display for BuildStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CopyFiles { src, dst } => write!(f, "COPY {src:?} {dst:?}"),
            Self::RunCommand { argv } => write!(f, "RUN {argv:?}"),
            Self::SetEnv { key, value } => write!(f, "ENV {key} = {value:?}"),
            Self::SetWorkdir { path } => write!(f, "WORKDIR {path:?}"),
            Self::DeclareArg {
                name,
                default: Some(default),
            } => write!(f, "ARG {name} = {default:?}"),
            Self::DeclareArg {
                name,
                default: None,
            } => write!(f, "ARG {name}"),
            Self::ExposePort { port } => write!(f, "EXPOSE {port}"),
            Self::SetEntrypoint { argv } => write!(f, "ENTRYPOINT {argv:?}"),
            Self::Branch { condition, .. } => write!(f, "IF {condition}"),
        }
    }
}

/// Comparison operator of a branch condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

/// Predicate comparing a build argument with a literal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Argument whose resolved value is compared.
    pub arg: String,
    /// Comparison operator.
    pub op: CompareOp,
    /// Literal compared against.
    pub value: String,
}

impl Condition {
    /// `arg == value`
    #[must_use]
    pub fn equals(arg: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            op: CompareOp::Eq,
            value: value.into(),
        }
    }

    /// `arg != value`
    #[must_use]
    pub fn not_equals(arg: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            arg: arg.into(),
            op: CompareOp::Ne,
            value: value.into(),
        }
    }

    /// Evaluates the predicate against the argument's resolved value.
    #[must_use]
    pub fn evaluate(&self, actual: &str) -> bool {
        match self.op {
            CompareOp::Eq => actual == self.value,
            CompareOp::Ne => actual != self.value,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.op {
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        };
        write!(f, "{} {op} {:?}", self.arg, self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_evaluates_both_operators() {
        assert!(Condition::equals("DEV", "true").evaluate("true"));
        assert!(!Condition::equals("DEV", "true").evaluate("false"));
        assert!(Condition::not_equals("DEV", "true").evaluate("false"));
    }

    #[test]
    fn step_count_includes_both_branch_arms() {
        let recipe = Recipe::new(vec![
            BuildStep::DeclareArg {
                name: "DEV".into(),
                default: None,
            },
            BuildStep::Branch {
                condition: Condition::equals("DEV", "true"),
                then_steps: vec![BuildStep::ExposePort { port: 1 }],
                else_steps: vec![
                    BuildStep::ExposePort { port: 2 },
                    BuildStep::ExposePort { port: 3 },
                ],
            },
        ]);
        assert_eq!(recipe.step_count(), 5);
    }

    #[test]
    fn display_renders_recipe_syntax() {
        let step = BuildStep::RunCommand {
            argv: vec!["pip".into(), "install".into()],
        };
        assert_eq!(step.to_string(), r#"RUN ["pip", "install"]"#);
        let arg = BuildStep::DeclareArg {
            name: "DEV".into(),
            default: Some("false".into()),
        };
        assert_eq!(arg.to_string(), r#"ARG DEV = "false""#);
    }
}
