//! Tokenizer for the snippet language
//!
//! Produces Python-style logical lines: `Newline` ends a statement, `Indent`
//! and `Dedent` bracket blocks, and newlines inside brackets are joined.

use super::ScriptError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// f-string body with escapes already processed
    FStr(String),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

/// Operators, longest first so that greedy matching works.
const OPERATORS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "->", "+", "-", "*", "/", "%",
    "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";",
];

pub fn tokenize(src: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer::new(src).run()
}

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
}

impl Lexer {
    fn new(src: &str) -> Self {
        Self {
            chars: src.chars().collect(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: vec![0],
            tokens: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token { tok, line: self.line });
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        ScriptError::syntax(message, self.line)
    }

    fn run(mut self) -> Result<Vec<Token>, ScriptError> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                at_line_start = false;
                if self.handle_indentation()? {
                    continue;
                }
            }

            let Some(c) = self.peek() else { break };

            match c {
                '\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.line += 1;
                }
                ' ' | '\t' | '\r' => self.pos += 1,
                '#' => self.skip_comment(),
                '\\' if self.peek_at(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '0'..='9' => self.number()?,
                '.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                '"' | '\'' => {
                    let body = self.string(false)?;
                    self.push(Tok::Str(body));
                }
                c if c.is_alphabetic() || c == '_' => self.name_or_prefixed_string()?,
                _ => self.operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(self.tokens)
    }

    fn push_newline(&mut self) {
        let redundant = matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline) | Some(Tok::Indent) | Some(Tok::Dedent)
        );
        if !redundant {
            self.push(Tok::Newline);
        }
    }

    /// Measure leading whitespace; returns true when the line is blank or a
    /// comment (and was consumed).
    fn handle_indentation(&mut self) -> Result<bool, ScriptError> {
        let mut width = 0;
        while let Some(c) = self.peek() {
            match c {
                ' ' => width += 1,
                '\t' => width += 8 - (width % 8),
                '\r' => {}
                _ => break,
            }
            self.pos += 1;
        }

        match self.peek() {
            None => return Ok(true),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(true);
            }
            Some('#') => {
                self.skip_comment();
                if self.peek() == Some('\n') {
                    self.pos += 1;
                    self.line += 1;
                }
                return Ok(true);
            }
            _ => {}
        }

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.push(Tok::Indent);
        } else {
            while width < *self.indents.last().unwrap_or(&0) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            if width != *self.indents.last().unwrap_or(&0) {
                return Err(self.error("unindent does not match any outer indentation level"));
            }
        }
        Ok(false)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn number(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        let mut is_float = false;

        while let Some(c) = self.peek() {
            if c.is_ascii_digit() || c == '_' {
                self.pos += 1;
            } else if c == '.' && !is_float {
                is_float = true;
                self.pos += 1;
            } else if (c == 'e' || c == 'E')
                && self
                    .peek_at(1)
                    .is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+')
            {
                is_float = true;
                self.pos += 2;
            } else {
                break;
            }
        }

        let text: String = self.chars[start..self.pos].iter().filter(|&&c| c != '_').collect();
        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| self.error(format!("invalid number literal '{}'", text)))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| self.error(format!("integer literal too large '{}'", text)))?,
            )
        };
        self.push(tok);
        Ok(())
    }

    fn name_or_prefixed_string(&mut self) -> Result<(), ScriptError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(), Some('"') | Some('\'')) {
            let lower = name.to_ascii_lowercase();
            match lower.as_str() {
                "f" => {
                    let body = self.string(false)?;
                    self.push(Tok::FStr(body));
                    return Ok(());
                }
                "r" => {
                    let body = self.string(true)?;
                    self.push(Tok::Str(body));
                    return Ok(());
                }
                "rf" | "fr" => {
                    let body = self.string(true)?;
                    self.push(Tok::FStr(body));
                    return Ok(());
                }
                "b" | "u" => {
                    let body = self.string(false)?;
                    self.push(Tok::Str(body));
                    return Ok(());
                }
                _ => {}
            }
        }

        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String, ScriptError> {
        let Some(quote) = self.peek() else {
            return Err(self.error("expected string"));
        };
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let start_line = self.line;
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(ScriptError::syntax("unterminated string literal", start_line));
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(ScriptError::syntax("unterminated string literal", start_line));
                }
                self.line += 1;
            }

            if c == '\\' && !raw {
                self.pos += 1;
                let Some(esc) = self.peek() else {
                    return Err(ScriptError::syntax("unterminated string literal", start_line));
                };
                self.pos += 1;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    'u' => out.push(self.unicode_escape()?),
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            if c == '\\' && raw && self.peek_at(1) == Some(quote) {
                out.push('\\');
                out.push(quote);
                self.pos += 2;
                continue;
            }

            out.push(c);
            self.pos += 1;
        }
    }

    fn unicode_escape(&mut self) -> Result<char, ScriptError> {
        let digits: String = (0..4).filter_map(|i| self.peek_at(i)).collect();
        if digits.len() != 4 {
            return Err(self.error("truncated \\uXXXX escape"));
        }
        self.pos += 4;
        u32::from_str_radix(&digits, 16)
            .ok()
            .and_then(char::from_u32)
            .ok_or_else(|| self.error(format!("invalid unicode escape \\u{}", digits)))
    }

    fn operator(&mut self) -> Result<(), ScriptError> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek_at(i) == Some(ch));
            if matches {
                self.pos += len;
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.push(Tok::Op(op));
                return Ok(());
            }
        }

        let c = self.peek().unwrap_or('?');
        Err(self.error(format!("invalid character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(
            toks("x = 1 + 2.5"),
            vec![
                Tok::Name("x".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Op("+"),
                Tok::Float(2.5),
                Tok::Newline,
                Tok::Eof
            ]
        );
    }

    #[test]
    fn test_indentation_blocks() {
        let t = toks("if x:\n    y = 1\nz = 2\n");
        assert!(t.contains(&Tok::Indent));
        assert!(t.contains(&Tok::Dedent));
    }

    #[test]
    fn test_brackets_join_lines() {
        let t = toks("x = [1,\n     2]\n");
        assert_eq!(t.iter().filter(|t| **t == Tok::Newline).count(), 1);
    }

    #[test]
    fn test_strings_and_escapes() {
        assert_eq!(toks("'a\\nb'")[0], Tok::Str("a\nb".into()));
        assert_eq!(toks("r'a\\nb'")[0], Tok::Str("a\\nb".into()));
        assert_eq!(toks("\"\"\"multi\nline\"\"\"")[0], Tok::Str("multi\nline".into()));
        assert_eq!(toks("f'{x}!'")[0], Tok::FStr("{x}!".into()));
    }

    #[test]
    fn test_comments_and_blank_lines() {
        let t = toks("# comment\n\nx = 1  # trailing\n\n");
        assert_eq!(t, vec![Tok::Name("x".into()), Tok::Op("="), Tok::Int(1), Tok::Newline, Tok::Eof]);
    }

    #[test]
    fn test_bad_dedent() {
        assert!(tokenize("if x:\n    y = 1\n  z = 2\n").is_err());
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("x = 'abc").unwrap_err();
        assert_eq!(err.kind, "SyntaxError");
    }
}
