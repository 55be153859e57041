//! Tokenization of recipe source text using `nom`.
//!
//! Produces a stream of [`Spanned`] tokens from raw input for the parser to
//! consume. Whitespace and `#` line comments are discarded between tokens.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace1, not_line_ending},
    combinator::value,
    multi::many0,
    sequence::preceded,
};
use stratum_common::error::{Result, StratumError};

/// A token in the recipe language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// `ARG` keyword.
    Arg,
    /// `COPY` keyword.
    Copy,
    /// `RUN` keyword.
    Run,
    /// `ENV` keyword.
    Env,
    /// `WORKDIR` keyword.
    Workdir,
    /// `EXPOSE` keyword.
    Expose,
    /// `ENTRYPOINT` keyword.
    Entrypoint,
    /// `IF` keyword.
    If,
    /// `ELSE` keyword.
    Else,
    /// An identifier (argument or variable name).
    Identifier(String),
    /// A double-quoted string literal.
    StringLiteral(String),
    /// An integer literal.
    Integer(i64),
    /// `{` opening brace.
    BraceOpen,
    /// `}` closing brace.
    BraceClose,
    /// `[` opening bracket.
    BracketOpen,
    /// `]` closing bracket.
    BracketClose,
    /// `==` comparison.
    EqualsEquals,
    /// `!=` comparison.
    NotEquals,
    /// `=` assignment.
    Equals,
    /// `,` comma separator.
    Comma,
}

/// A token together with the 1-based line it starts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Source line of the token's first character.
    pub line: usize,
}

/// Skippable items: whitespace or `#` line comments.
fn skip_trivia(input: &str) -> IResult<&str, ()> {
    let comment = value((), preceded(tag("#"), not_line_ending));
    let ws = value((), multispace1);
    let (input, _) = many0(alt((ws, comment))).parse(input)?;
    Ok((input, ()))
}

/// Parses a double-quoted string literal with basic escape support.
fn string_literal(input: &str) -> IResult<&str, Token> {
    let (input, _) = char('"')(input)?;
    let mut result = String::new();
    let mut chars = input.char_indices();
    loop {
        match chars.next() {
            Some((idx, '"')) => {
                let remaining = &input[idx + 1..];
                return Ok((remaining, Token::StringLiteral(result)));
            }
            Some((_, '\\')) => match chars.next() {
                Some((_, 'n')) => result.push('\n'),
                Some((_, 't')) => result.push('\t'),
                Some((_, '\\')) => result.push('\\'),
                Some((_, '"')) => result.push('"'),
                Some((_, c)) => {
                    result.push('\\');
                    result.push(c);
                }
                None => {
                    return Err(nom::Err::Failure(nom::error::Error::new(
                        input,
                        nom::error::ErrorKind::Char,
                    )));
                }
            },
            Some((_, c)) => result.push(c),
            None => {
                return Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Char,
                )));
            }
        }
    }
}

/// Parses an integer literal (sequence of digits).
fn integer_literal(input: &str) -> IResult<&str, Token> {
    let (input, digits) = digit1(input)?;
    let val: i64 = digits.parse().map_err(|_| {
        nom::Err::Error(nom::error::Error::new(input, nom::error::ErrorKind::Digit))
    })?;
    Ok((input, Token::Integer(val)))
}

const fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

const fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Parses an identifier or keyword.
fn identifier_or_keyword(input: &str) -> IResult<&str, Token> {
    let (input, first) = take_while1(is_ident_start)(input)?;
    let (input, rest) = take_while(is_ident_continue)(input)?;
    let word = format!("{first}{rest}");
    let token = match word.as_str() {
        "ARG" => Token::Arg,
        "COPY" => Token::Copy,
        "RUN" => Token::Run,
        "ENV" => Token::Env,
        "WORKDIR" => Token::Workdir,
        "EXPOSE" => Token::Expose,
        "ENTRYPOINT" => Token::Entrypoint,
        "IF" => Token::If,
        "ELSE" => Token::Else,
        _ => Token::Identifier(word),
    };
    Ok((input, token))
}

/// Parses a symbol token.
fn symbol(input: &str) -> IResult<&str, Token> {
    alt((
        value(Token::EqualsEquals, tag("==")),
        value(Token::NotEquals, tag("!=")),
        value(Token::BraceOpen, char('{')),
        value(Token::BraceClose, char('}')),
        value(Token::BracketOpen, char('[')),
        value(Token::BracketClose, char(']')),
        value(Token::Equals, char('=')),
        value(Token::Comma, char(',')),
    ))
    .parse(input)
}

/// Parses a single token (after trivia has been skipped).
fn single_token(input: &str) -> IResult<&str, Token> {
    alt((
        string_literal,
        symbol,
        integer_literal,
        identifier_or_keyword,
    ))
    .parse(input)
}

/// Tokenizes recipe source text into line-annotated tokens.
///
/// # Errors
///
/// Returns [`StratumError::Parse`] if the input contains characters that
/// cannot be tokenized or an unterminated string literal.
pub fn tokenize(input: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut remaining = input;
    let mut line = 1;

    loop {
        let (rest, ()) = skip_trivia(remaining).map_err(|e| StratumError::Parse {
            line,
            message: format!("lexer error skipping whitespace: {e}"),
        })?;
        line += newlines_between(remaining, rest);
        remaining = rest;

        if remaining.is_empty() {
            break;
        }

        let (rest, token) = single_token(remaining).map_err(|e| StratumError::Parse {
            line,
            message: format!(
                "unexpected input at: \"{}\" ({e})",
                remaining.chars().take(20).collect::<String>()
            ),
        })?;
        tokens.push(Spanned { token, line });
        line += newlines_between(remaining, rest);
        remaining = rest;
    }

    Ok(tokens)
}

/// Counts the newlines in the prefix of `before` that `after` no longer has.
fn newlines_between(before: &str, after: &str) -> usize {
    before[..before.len() - after.len()].matches('\n').count()
}
