//! `${name}` build-argument interpolation.
//!
//! Only the braced form is recognized; a bare `$PATH` is left untouched so
//! it reaches the shell at execution time. `$${` produces a literal `${`.

use thiserror::Error;

/// Failure to scan or expand a template string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InterpolationError {
    /// `${` without a closing `}`.
    #[error("unterminated ${{ at byte {offset}")]
    Unterminated {
        /// Byte offset of the `$`.
        offset: usize,
    },
    /// The text between the braces is not an argument name.
    #[error("invalid argument reference ${{{name}}}")]
    InvalidName {
        /// Text found between the braces.
        name: String,
    },
    /// The lookup did not know the referenced argument.
    #[error("undefined argument {name}")]
    Undefined {
        /// Name of the argument.
        name: String,
    },
}

enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn segments(template: &str) -> Result<Vec<Segment<'_>>, InterpolationError> {
    let mut out = Vec::new();
    let mut rest = template;
    let mut consumed = 0;

    while let Some(pos) = rest.find('$') {
        let after = &rest[pos..];
        if after.starts_with("$${") {
            out.push(Segment::Literal(&rest[..pos]));
            out.push(Segment::Literal("${"));
            rest = &after[3..];
            consumed += pos + 3;
        } else if let Some(body) = after.strip_prefix("${") {
            let close = body.find('}').ok_or(InterpolationError::Unterminated {
                offset: consumed + pos,
            })?;
            let name = &body[..close];
            if !is_valid_name(name) {
                return Err(InterpolationError::InvalidName { name: name.into() });
            }
            out.push(Segment::Literal(&rest[..pos]));
            out.push(Segment::Reference(name));
            rest = &body[close + 1..];
            consumed += pos + close + 3;
        } else {
            out.push(Segment::Literal(&rest[..=pos]));
            rest = &after[1..];
            consumed += pos + 1;
        }
    }
    out.push(Segment::Literal(rest));
    Ok(out)
}

/// Lists the argument names referenced by `template`, in order of appearance.
///
/// # Errors
///
/// Returns an error if a reference is unterminated or malformed.
pub fn references(template: &str) -> Result<Vec<&str>, InterpolationError> {
    Ok(segments(template)?
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Expands every `${name}` in `template` using `lookup`.
///
/// # Errors
///
/// Returns [`InterpolationError::Undefined`] for the first name `lookup`
/// does not resolve, or a scan error for malformed references.
pub fn substitute<F>(template: &str, mut lookup: F) -> Result<String, InterpolationError>
where
    F: FnMut(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    for segment in segments(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(name) => {
                let value = lookup(name).ok_or_else(|| InterpolationError::Undefined {
                    name: name.to_owned(),
                })?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}
