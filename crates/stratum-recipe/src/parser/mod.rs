//! Recipe parser built on `nom`.
//!
//! Transforms raw recipe text into a validated AST through
//! lexing, parsing, and static analysis phases.

pub mod ast;
pub mod lexer;
pub mod validator;

use stratum_common::constants::SHELL;
use stratum_common::error::{Result, StratumError};

use self::ast::{BuildStep, Condition, Recipe};
use self::lexer::{Spanned, Token};

/// Cursor into a token stream for recursive-descent parsing.
struct TokenCursor<'a> {
    tokens: &'a [Spanned],
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    const fn new(tokens: &'a [Spanned]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos).map(|s| &s.token);
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Line of the next token, or of the last token at end of input.
    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map_or(1, |s| s.line)
    }

    fn error(&self, message: String) -> StratumError {
        StratumError::Parse {
            line: self.line(),
            message,
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        let line = self.line();
        match self.advance() {
            Some(Token::Identifier(s)) => Ok(s.clone()),
            other => Err(parse_err(line, format!("expected identifier, got {other:?}"))),
        }
    }

    fn expect_token(&mut self, expected: &Token) -> Result<()> {
        let line = self.line();
        match self.advance() {
            Some(tok) if tok == expected => Ok(()),
            other => Err(parse_err(
                line,
                format!("expected {expected:?}, got {other:?}"),
            )),
        }
    }

    fn expect_string(&mut self) -> Result<String> {
        let line = self.line();
        match self.advance() {
            Some(Token::StringLiteral(s)) => Ok(s.clone()),
            other => Err(parse_err(
                line,
                format!("expected string literal, got {other:?}"),
            )),
        }
    }

    /// A string literal, or an integer rendered as its decimal text.
    fn expect_scalar(&mut self) -> Result<String> {
        let line = self.line();
        match self.advance() {
            Some(Token::StringLiteral(s)) => Ok(s.clone()),
            Some(Token::Integer(n)) => Ok(n.to_string()),
            other => Err(parse_err(
                line,
                format!("expected string or integer, got {other:?}"),
            )),
        }
    }

    fn expect_integer(&mut self) -> Result<i64> {
        let line = self.line();
        match self.advance() {
            Some(Token::Integer(n)) => Ok(*n),
            other => Err(parse_err(line, format!("expected integer, got {other:?}"))),
        }
    }

    const fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }
}

const fn parse_err(line: usize, message: String) -> StratumError {
    StratumError::Parse { line, message }
}

fn skip_optional_comma(cursor: &mut TokenCursor<'_>) {
    if cursor.peek() == Some(&Token::Comma) {
        let _ = cursor.advance();
    }
}

/// Parses a recipe from its source text.
///
/// # Errors
///
/// Returns an error if the input contains syntax errors or fails validation.
pub fn parse_recipe(input: &str) -> Result<Recipe> {
    tracing::debug!(bytes = input.len(), "parsing recipe");
    let tokens = lexer::tokenize(input)?;
    let mut cursor = TokenCursor::new(&tokens);
    let mut steps = Vec::new();
    while !cursor.at_end() {
        steps.push(parse_step(&mut cursor)?);
    }
    let recipe = Recipe::new(steps);
    validator::validate(&recipe)?;
    tracing::info!(steps = recipe.step_count(), "parsed recipe");
    Ok(recipe)
}

/// Reads and parses a recipe file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not parse.
pub fn parse_recipe_file(path: &std::path::Path) -> Result<Recipe> {
    let content = std::fs::read_to_string(path).map_err(|e| StratumError::io(path, e))?;
    parse_recipe(&content)
}

fn parse_step(cursor: &mut TokenCursor<'_>) -> Result<BuildStep> {
    let line = cursor.line();
    let Some(keyword) = cursor.advance().cloned() else {
        return Err(parse_err(line, "unexpected end of input".into()));
    };

    match keyword {
        Token::Arg => {
            let name = cursor.expect_identifier()?;
            let default = if cursor.peek() == Some(&Token::Equals) {
                let _ = cursor.advance();
                Some(cursor.expect_scalar()?)
            } else {
                None
            };
            Ok(BuildStep::DeclareArg { name, default })
        }
        Token::Copy => {
            let src = cursor.expect_string()?;
            let dst = cursor.expect_string()?;
            Ok(BuildStep::CopyFiles { src, dst })
        }
        Token::Run => Ok(BuildStep::RunCommand {
            argv: parse_command(cursor)?,
        }),
        Token::Env => {
            let key = cursor.expect_identifier()?;
            cursor.expect_token(&Token::Equals)?;
            let value = cursor.expect_scalar()?;
            Ok(BuildStep::SetEnv { key, value })
        }
        Token::Workdir => Ok(BuildStep::SetWorkdir {
            path: cursor.expect_string()?,
        }),
        Token::Expose => {
            let val = cursor.expect_integer()?;
            let port = u16::try_from(val)
                .map_err(|_| parse_err(line, format!("port value out of range: {val}")))?;
            Ok(BuildStep::ExposePort { port })
        }
        Token::Entrypoint => Ok(BuildStep::SetEntrypoint {
            argv: parse_command(cursor)?,
        }),
        Token::If => parse_branch(cursor),
        other => Err(parse_err(
            line,
            format!("expected a step keyword (ARG, COPY, RUN, ENV, WORKDIR, EXPOSE, ENTRYPOINT, IF), got {other:?}"),
        )),
    }
}

/// Parses the exec form (`["a", "b"]`) or the shell form (`"a b"`).
fn parse_command(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>> {
    if cursor.peek() == Some(&Token::BracketOpen) {
        return parse_string_list(cursor);
    }
    let script = cursor.expect_string()?;
    Ok(SHELL
        .iter()
        .map(|s| (*s).to_owned())
        .chain(std::iter::once(script))
        .collect())
}

fn parse_string_list(cursor: &mut TokenCursor<'_>) -> Result<Vec<String>> {
    cursor.expect_token(&Token::BracketOpen)?;
    let mut items = Vec::new();

    while cursor.peek() != Some(&Token::BracketClose) {
        if cursor.at_end() {
            return Err(cursor.error("unexpected end of input inside list".into()));
        }
        items.push(cursor.expect_string()?);
        skip_optional_comma(cursor);
    }

    cursor.expect_token(&Token::BracketClose)?;
    Ok(items)
}

/// Parses the remainder of an `IF` (the keyword is already consumed).
fn parse_branch(cursor: &mut TokenCursor<'_>) -> Result<BuildStep> {
    let arg = cursor.expect_identifier()?;
    let line = cursor.line();
    let op = cursor.advance().cloned();
    let condition = match op {
        Some(Token::EqualsEquals) => Condition::equals(arg, cursor.expect_scalar()?),
        Some(Token::NotEquals) => Condition::not_equals(arg, cursor.expect_scalar()?),
        other => {
            return Err(parse_err(line, format!("expected == or !=, got {other:?}")));
        }
    };
    let then_steps = parse_block(cursor)?;

    let else_steps = if cursor.peek() == Some(&Token::Else) {
        let _ = cursor.advance();
        if cursor.peek() == Some(&Token::If) {
            let _ = cursor.advance();
            vec![parse_branch(cursor)?]
        } else {
            parse_block(cursor)?
        }
    } else {
        Vec::new()
    };

    Ok(BuildStep::Branch {
        condition,
        then_steps,
        else_steps,
    })
}

fn parse_block(cursor: &mut TokenCursor<'_>) -> Result<Vec<BuildStep>> {
    cursor.expect_token(&Token::BraceOpen)?;
    let mut steps = Vec::new();

    while cursor.peek() != Some(&Token::BraceClose) {
        if cursor.at_end() {
            return Err(cursor.error("unexpected end of input inside IF block".into()));
        }
        steps.push(parse_step(cursor)?);
    }

    cursor.expect_token(&Token::BraceClose)?;
    Ok(steps)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_input() {
        let recipe = parse_recipe("").expect("should parse empty input");
        assert!(recipe.steps.is_empty());
    }

    #[test]
    fn parse_arg_with_and_without_default() {
        let recipe = parse_recipe("ARG DEV = \"false\"\nARG TAG\nARG N = 3").expect("should parse");
        assert_eq!(
            recipe.steps,
            vec![
                BuildStep::DeclareArg {
                    name: "DEV".into(),
                    default: Some("false".into()),
                },
                BuildStep::DeclareArg {
                    name: "TAG".into(),
                    default: None,
                },
                BuildStep::DeclareArg {
                    name: "N".into(),
                    default: Some("3".into()),
                },
            ]
        );
    }

    #[test]
    fn parse_run_exec_form() {
        let recipe =
            parse_recipe(r#"RUN ["pip", "install", "-r", "requirements.txt"]"#).expect("parse");
        assert_eq!(
            recipe.steps,
            vec![BuildStep::RunCommand {
                argv: vec![
                    "pip".into(),
                    "install".into(),
                    "-r".into(),
                    "requirements.txt".into()
                ],
            }]
        );
    }

    #[test]
    fn parse_run_shell_form_wraps_in_shell() {
        let recipe = parse_recipe(r#"RUN "apk add --update postgresql-client""#).expect("parse");
        assert_eq!(
            recipe.steps,
            vec![BuildStep::RunCommand {
                argv: vec![
                    "/bin/sh".into(),
                    "-c".into(),
                    "apk add --update postgresql-client".into()
                ],
            }]
        );
    }

    #[test]
    fn parse_metadata_steps() {
        let input = r#"
WORKDIR "/app"
ENV PATH = "/py/bin:$PATH"
EXPOSE 8000
ENTRYPOINT ["/py/bin/python", "manage.py"]
COPY "./app" "/app"
"#;
        let recipe = parse_recipe(input).expect("parse");
        assert_eq!(recipe.steps.len(), 5);
        assert_eq!(
            recipe.steps[1],
            BuildStep::SetEnv {
                key: "PATH".into(),
                value: "/py/bin:$PATH".into(),
            }
        );
        assert_eq!(recipe.steps[2], BuildStep::ExposePort { port: 8000 });
        assert_eq!(
            recipe.steps[4],
            BuildStep::CopyFiles {
                src: "./app".into(),
                dst: "/app".into(),
            }
        );
    }

    #[test]
    fn parse_branch_with_else_if_chain() {
        let input = r#"
ARG DEV = "false"
IF DEV == "true" {
    RUN ["pip", "install", "-r", "requirements.dev.txt"]
} ELSE IF DEV != "false" {
    RUN ["false"]
} ELSE {
    EXPOSE 80
}
"#;
        let recipe = parse_recipe(input).expect("parse");
        assert_eq!(recipe.step_count(), 7);
        let BuildStep::Branch {
            condition,
            then_steps,
            else_steps,
        } = &recipe.steps[1]
        else {
            panic!("expected branch, got {:?}", recipe.steps[1]);
        };
        assert_eq!(*condition, Condition::equals("DEV", "true"));
        assert_eq!(then_steps.len(), 1);
        assert!(matches!(else_steps.as_slice(), [BuildStep::Branch { .. }]));
    }

    #[test]
    fn parse_error_unknown_keyword_reports_line() {
        let err = parse_recipe("ARG A\nFROM \"alpine\"").expect_err("should fail");
        assert!(matches!(err, StratumError::Parse { line: 2, .. }), "{err}");
    }

    #[test]
    fn parse_error_missing_brace() {
        let input = "ARG DEV\nIF DEV == \"1\" {\n    EXPOSE 1\n";
        assert!(parse_recipe(input).is_err());
    }

    #[test]
    fn parse_error_port_out_of_range() {
        assert!(parse_recipe("EXPOSE 70000").is_err());
    }

    #[test]
    fn parse_runs_validation() {
        let err = parse_recipe(r#"RUN ["echo", "${DEV}"]"#).expect_err("should fail");
        assert!(matches!(err, StratumError::UndeclaredArgument { .. }), "{err}");
    }

    #[test]
    fn parse_comments_ignored() {
        let input = "# Stratumfile\nARG DEV # toggles dev deps\n";
        let recipe = parse_recipe(input).expect("parse");
        assert_eq!(recipe.steps.len(), 1);
    }

    #[test]
    fn parse_recipe_file_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("Stratumfile");
        std::fs::write(&path, "EXPOSE 8080\n").expect("write");
        let recipe = parse_recipe_file(&path).expect("parse");
        assert_eq!(recipe.steps, vec![BuildStep::ExposePort { port: 8080 }]);
        assert!(parse_recipe_file(&dir.path().join("missing")).is_err());
    }
}
