//! # stratum-recipe
//!
//! The Stratum recipe language.
//!
//! Handles:
//! - **Parser**: Lexing, AST construction, and validation of recipe files.
//! - **Interpolation**: `${name}` build-argument references.
//! - **Builder**: Assembling recipes programmatically.
//!
//! # Example
//!
//! ```rust
//! use stratum_recipe::parser::parse_recipe;
//!
//! let recipe = parse_recipe(r#"
//! ARG DEV = "false"
//! RUN ["pip", "install", "-r", "requirements.txt"]
//! IF DEV == "true" {
//!     RUN ["pip", "install", "-r", "requirements.dev.txt"]
//! }
//! "#).unwrap();
//! assert_eq!(recipe.step_count(), 4);
//! ```

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod builder;
pub mod interpolate;
pub mod parser;

pub use builder::RecipeBuilder;
pub use parser::ast::{BuildStep, CompareOp, Condition, Recipe};
