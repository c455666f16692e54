//! Output parser for model responses
//!
//! Turns raw model text into a [`ParsedResponse`]. The grammar has three
//! marker pairs, each allowed at most once:
//!
//! ```text
//! <think> reasoning </think>      always present (may be empty)
//! <python> code </python>         present when the model acts
//! <reply> answer </reply>         present when the model answers
//! ```
//!
//! Exactly one of code/reply must carry non-whitespace content.

pub mod scanner;

use serde::{Deserialize, Serialize};

pub use scanner::Tag;

/// Structural problems with the markers themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagFault {
    /// A marker was opened but never closed
    Unterminated(Tag),
    /// A marker pair appeared twice
    Duplicated(Tag),
    /// A required marker pair never appeared
    Missing(Tag),
    /// A closing marker without a matching opening marker
    Unopened(Tag),
    /// A marker inside another open segment
    Nested { outer: Tag, inner: Tag },
}

impl std::fmt::Display for TagFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagFault::Unterminated(tag) => write!(f, "{} is never closed with {}", tag, tag.close()),
            TagFault::Duplicated(tag) => write!(f, "{} appears more than once", tag),
            TagFault::Missing(tag) => write!(f, "{} is missing", tag),
            TagFault::Unopened(tag) => write!(f, "{} closes a segment that was never opened", tag.close()),
            TagFault::Nested { outer, inner } => {
                write!(f, "{} marker found inside the {} segment", inner.name(), outer)
            }
        }
    }
}

/// Which way the code/reply exclusivity was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    Both,
    Neither,
}

impl std::fmt::Display for Ambiguity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ambiguity::Both => write!(f, "both <python> and <reply> have content"),
            Ambiguity::Neither => write!(f, "neither <python> nor <reply> has content"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("malformed tags: {0}")]
    MalformedTags(TagFault),

    #[error("ambiguous output: {0}")]
    AmbiguousOutput(Ambiguity),
}

/// A successfully parsed model response.
///
/// Invariant: exactly one of `code` and `reply` is `Some`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedResponse {
    pub reasoning: String,
    pub code: Option<String>,
    pub reply: Option<String>,
}

impl ParsedResponse {
    pub fn is_reply(&self) -> bool {
        self.reply.is_some()
    }
}

/// Parse raw model text. Pure; no side effects.
pub fn parse_response(text: &str) -> Result<ParsedResponse, ParseError> {
    let mut segments = scanner::scan(text).map_err(ParseError::MalformedTags)?;

    let Some(reasoning) = segments.take(Tag::Think) else {
        return Err(ParseError::MalformedTags(TagFault::Missing(Tag::Think)));
    };

    let code = segments.take(Tag::Python).and_then(|c| normalize_code(&c));
    let reply = segments
        .take(Tag::Reply)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());

    match (&code, &reply) {
        (Some(_), Some(_)) => Err(ParseError::AmbiguousOutput(Ambiguity::Both)),
        (None, None) => Err(ParseError::AmbiguousOutput(Ambiguity::Neither)),
        _ => Ok(ParsedResponse {
            reasoning: reasoning.trim().to_string(),
            code,
            reply,
        }),
    }
}

/// Drop leading blank lines and trailing whitespace, then remove the common
/// indentation. Whitespace-only code is absent.
fn normalize_code(raw: &str) -> Option<String> {
    if raw.trim().is_empty() {
        return None;
    }

    let lines: Vec<&str> = raw
        .trim_end()
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .collect();

    let leading = |line: &str| line.len() - line.trim_start_matches([' ', '\t']).len();

    let indent = lines
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| leading(line))
        .min()
        .unwrap_or(0);

    let dedented: Vec<&str> = lines
        .iter()
        .map(|line| if leading(line) >= indent { &line[indent..] } else { "" })
        .collect();

    Some(dedented.join("\n"))
}
