//! Unified error types for the Stratum workspace.
//!
//! Build failures always carry the ordinal of the step that failed. Step
//! ordinals number the recipe depth-first from zero, so a branch and every
//! step inside either of its arms each have their own ordinal.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StratumError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The recipe text is malformed.
    #[error("recipe syntax error on line {line}: {message}")]
    Parse {
        /// 1-based source line.
        line: usize,
        /// Description of the syntax error.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// A step referenced a build argument that was not declared before it.
    #[error("step {step}: argument \"{name}\" is used before it is declared")]
    UndeclaredArgument {
        /// Name of the referenced argument.
        name: String,
        /// Ordinal of the referencing step.
        step: usize,
    },

    /// A `RUN` step exited with a non-zero status.
    #[error("step {step}: command exited with status {exit_code}")]
    StepExecutionFailed {
        /// Ordinal of the failing step.
        step: usize,
        /// Exit status reported by the executor (`-1` when killed by a signal).
        exit_code: i32,
    },

    /// A step failed for a reason other than its command's exit status,
    /// such as a program that could not be started.
    #[error("step {step}: {source}")]
    StepFailed {
        /// Ordinal of the failing step.
        step: usize,
        /// Underlying failure.
        source: Box<StratumError>,
    },

    /// A cached layer no longer matches the digest recorded for it.
    #[error("step {step}: cache entry {key} is corrupt: expected {expected}, got {actual}")]
    CacheCorruption {
        /// Ordinal of the step whose cache entry was read.
        step: usize,
        /// Cache key of the entry.
        key: String,
        /// Digest recorded in the index.
        expected: String,
        /// Digest of the stored content (or `missing`).
        actual: String,
    },

    /// A hash validation failed.
    #[error("hash mismatch for {resource}: expected {expected}, got {actual}")]
    HashMismatch {
        /// Resource that failed validation.
        resource: String,
        /// Expected hash value.
        expected: String,
        /// Actual computed hash value.
        actual: String,
    },

    /// The build was aborted between two layers.
    #[error("build aborted before step {step}")]
    Aborted {
        /// Ordinal of the first step that did not run.
        step: usize,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl StratumError {
    /// Returns the ordinal of the step this error is attributed to, if any.
    #[must_use]
    pub const fn step(&self) -> Option<usize> {
        match self {
            Self::UndeclaredArgument { step, .. }
            | Self::StepExecutionFailed { step, .. }
            | Self::StepFailed { step, .. }
            | Self::CacheCorruption { step, .. }
            | Self::Aborted { step } => Some(*step),
            _ => None,
        }
    }

    /// Attributes this error to `step` unless it already names one.
    #[must_use]
    pub fn at_step(self, step: usize) -> Self {
        if self.step().is_some() {
            self
        } else {
            Self::StepFailed {
                step,
                source: Box::new(self),
            }
        }
    }

    /// Shorthand for an [`StratumError::Io`] at `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StratumError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_is_reported_for_build_failures() {
        let err = StratumError::StepExecutionFailed {
            step: 3,
            exit_code: 1,
        };
        assert_eq!(err.step(), Some(3));
        assert_eq!(err.to_string(), "step 3: command exited with status 1");
    }

    #[test]
    fn step_is_absent_for_ambient_errors() {
        let err = StratumError::Config {
            message: "bad".into(),
        };
        assert_eq!(err.step(), None);
    }

    #[test]
    fn at_step_wraps_only_unattributed_errors() {
        let io = StratumError::io("pip", std::io::Error::from(std::io::ErrorKind::NotFound));
        let wrapped = io.at_step(2);
        assert_eq!(wrapped.step(), Some(2));
        assert!(wrapped.to_string().starts_with("step 2: I/O error at pip"));

        let failed = StratumError::StepExecutionFailed {
            step: 4,
            exit_code: 1,
        };
        assert!(matches!(
            failed.at_step(2),
            StratumError::StepExecutionFailed { step: 4, .. }
        ));
    }

    #[test]
    fn undeclared_argument_names_the_argument() {
        let err = StratumError::UndeclaredArgument {
            name: "DEV".into(),
            step: 0,
        };
        assert!(err.to_string().contains("\"DEV\""));
    }
}
