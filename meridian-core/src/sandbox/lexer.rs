//! Tokenizer with significant indentation.
//!
//! Emits `Indent`/`Dedent` tokens from leading whitespace the way Python does,
//! ignores line breaks inside brackets, and treats `;` as a line break.

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(String),
    Int(i64),
    Float(f64),
    Str(String),
    /// Body of an f-string with escapes already applied
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

const OPERATORS: &[&str] = &[
    "**=", "//=", "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "+", "-", "*",
    "/", "%", "<", ">", "=", "(", ")", "[", "]", "{", "}", ",", ":", ".",
];

const TAB_WIDTH: usize = 8;

struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    depth: usize,
    /// Open indentation levels as (columns with 8-wide tabs, columns with 1-wide tabs)
    indents: Vec<(usize, usize)>,
    tokens: Vec<Token>,
}

/// Tokenize `source`.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut lexer = Lexer {
        chars: source.chars().filter(|c| *c != '\r').collect(),
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![(0, 0)],
        tokens: Vec::new(),
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

fn inconsistent_indent(line: usize) -> Error {
    Error::syntax(line, "inconsistent use of tabs and spaces in indentation")
}

impl Lexer {
    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn push_newline(&mut self) {
        match self.tokens.last() {
            None => {}
            Some(t) if matches!(t.tok, Tok::Newline | Tok::Indent | Tok::Dedent) => {}
            _ => self.push(Tok::Newline),
        }
    }

    fn run(&mut self) -> Result<()> {
        let mut at_line_start = true;

        while self.pos < self.chars.len() {
            if at_line_start && self.depth == 0 {
                if !self.indentation()? {
                    continue;
                }
                at_line_start = false;
            }

            let Some(c) = self.peek(0) else { break };
            match c {
                '\n' => {
                    if self.depth == 0 {
                        self.push_newline();
                        at_line_start = true;
                    }
                    self.pos += 1;
                    self.line += 1;
                }
                ' ' | '\t' => self.pos += 1,
                '\\' if self.peek(1) == Some('\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                '#' => self.skip_comment(),
                ';' => {
                    if self.depth > 0 {
                        return Err(Error::syntax(self.line, "';' inside brackets"));
                    }
                    self.push_newline();
                    self.pos += 1;
                }
                '"' | '\'' => {
                    let s = self.string(false)?;
                    self.push(Tok::Str(s));
                }
                c if c.is_ascii_digit() => self.number()?,
                '.' if self.peek(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                c if c.is_alphabetic() || c == '_' => self.word()?,
                _ => self.operator()?,
            }
        }

        self.push_newline();
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    /// Measure leading whitespace. Returns false for blank or comment-only lines.
    fn indentation(&mut self) -> Result<bool> {
        let mut col = 0;
        let mut narrow = 0;
        while let Some(c) = self.peek(0) {
            match c {
                ' ' => col += 1,
                '\t' => col = (col / TAB_WIDTH + 1) * TAB_WIDTH,
                _ => break,
            }
            narrow += 1;
            self.pos += 1;
        }

        match self.peek(0) {
            None => return Ok(false),
            Some('\n') => {
                self.pos += 1;
                self.line += 1;
                return Ok(false);
            }
            Some('#') => {
                self.skip_comment();
                return Ok(false);
            }
            _ => {}
        }

        // Both measures must order the levels the same way, whatever the tab width.
        let (current, current_narrow) = self.indents.last().copied().unwrap_or((0, 0));
        if col > current {
            if narrow <= current_narrow {
                return Err(inconsistent_indent(self.line));
            }
            self.indents.push((col, narrow));
            self.push(Tok::Indent);
        } else if col < current {
            while self.indents.last().is_some_and(|(level, _)| *level > col) {
                self.indents.pop();
                self.push(Tok::Dedent);
            }
            let (level, level_narrow) = self.indents.last().copied().unwrap_or((0, 0));
            if level != col {
                return Err(Error::syntax(
                    self.line,
                    "unindent does not match any outer indentation level",
                ));
            }
            if level_narrow != narrow {
                return Err(inconsistent_indent(self.line));
            }
        } else if narrow != current_narrow {
            return Err(inconsistent_indent(self.line));
        }
        Ok(true)
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek(0) {
            if c == '\n' {
                break;
            }
            self.pos += 1;
        }
    }

    fn word(&mut self) -> Result<()> {
        let start = self.pos;
        while self
            .peek(0)
            .is_some_and(|c| c.is_alphanumeric() || c == '_')
        {
            self.pos += 1;
        }
        let word: String = self.chars[start..self.pos].iter().collect();

        if matches!(self.peek(0), Some('"') | Some('\'')) {
            match word.to_ascii_lowercase().as_str() {
                "f" => {
                    let s = self.string(false)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "r" => {
                    let s = self.string(true)?;
                    self.push(Tok::Str(s));
                    return Ok(());
                }
                "fr" | "rf" => {
                    let s = self.string(true)?;
                    self.push(Tok::FStr(s));
                    return Ok(());
                }
                "b" | "rb" | "br" | "u" => {
                    return Err(Error::syntax(
                        self.line,
                        format!("string prefix '{}' is not supported", word),
                    ));
                }
                _ => {}
            }
        }

        self.push(Tok::Name(word));
        Ok(())
    }

    fn number(&mut self) -> Result<()> {
        let start = self.pos;
        let mut is_float = false;

        while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
            self.pos += 1;
        }
        if self.peek(0) == Some('.') && self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek(0).is_some_and(|c| c.is_ascii_digit() || c == '_') {
                self.pos += 1;
            }
        }
        if matches!(self.peek(0), Some('e') | Some('E')) {
            let sign = usize::from(matches!(self.peek(1), Some('+') | Some('-')));
            if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                self.pos += 1 + sign;
                while self.peek(0).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text: String = self.chars[start..self.pos]
            .iter()
            .filter(|c| **c != '_')
            .collect();
        let tok = if is_float {
            Tok::Float(
                text.parse()
                    .map_err(|_| Error::syntax(self.line, format!("invalid number '{}'", text)))?,
            )
        } else {
            Tok::Int(
                text.parse()
                    .map_err(|_| Error::syntax(self.line, format!("integer too large '{}'", text)))?,
            )
        };
        self.push(tok);
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<String> {
        let start_line = self.line;
        let Some(quote) = self.peek(0) else {
            return Err(Error::syntax(self.line, "expected string"));
        };
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek(0) else {
                return Err(Error::syntax(start_line, "unterminated string literal"));
            };

            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Ok(out);
                }
                if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                    self.pos += 3;
                    return Ok(out);
                }
            }

            if c == '\n' {
                if !triple {
                    return Err(Error::syntax(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }

            if c == '\\' {
                let Some(next) = self.peek(1) else {
                    return Err(Error::syntax(start_line, "unterminated string literal"));
                };
                self.pos += 2;
                if raw {
                    out.push('\\');
                    out.push(next);
                    if next == '\n' {
                        self.line += 1;
                    }
                    continue;
                }
                match next {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' => out.push('\\'),
                    '\'' => out.push('\''),
                    '"' => out.push('"'),
                    '\n' => self.line += 1,
                    other => {
                        out.push('\\');
                        out.push(other);
                    }
                }
                continue;
            }

            out.push(c);
            self.pos += 1;
        }
    }

    fn operator(&mut self) -> Result<()> {
        for op in OPERATORS {
            let len = op.chars().count();
            let matches = op
                .chars()
                .enumerate()
                .all(|(i, ch)| self.peek(i) == Some(ch));
            if matches {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += len;
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let c = self.peek(0).unwrap_or(' ');
        Err(Error::syntax(self.line, format!("unexpected character '{}'", c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<Tok> {
        tokenize(src).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_simple_expression() {
        assert_eq!(
            kinds("len(x) + 1.5"),
            vec![
                Tok::Name("len".into()),
                Tok::Op("("),
                Tok::Name("x".into()),
                Tok::Op(")"),
                Tok::Op("+"),
                Tok::Float(1.5),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_indent_dedent() {
        let toks = kinds("if x:\n    y = 1\n\n    # note\nz = 2\n");
        assert_eq!(
            toks,
            vec![
                Tok::Name("if".into()),
                Tok::Name("x".into()),
                Tok::Op(":"),
                Tok::Newline,
                Tok::Indent,
                Tok::Name("y".into()),
                Tok::Op("="),
                Tok::Int(1),
                Tok::Newline,
                Tok::Dedent,
                Tok::Name("z".into()),
                Tok::Op("="),
                Tok::Int(2),
                Tok::Newline,
                Tok::Eof,
            ]
        );
    }

    #[test]
    fn test_brackets_join_lines() {
        let toks = kinds("x = [1,\n     2]\n");
        assert!(!toks[..toks.len() - 2].contains(&Tok::Newline));
    }

    #[test]
    fn test_strings() {
        assert_eq!(kinds(r#"'a\nb'"#)[0], Tok::Str("a\nb".into()));
        assert_eq!(kinds(r#"r'a\nb'"#)[0], Tok::Str("a\\nb".into()));
        assert_eq!(kinds("f\"{x}!\"")[0], Tok::FStr("{x}!".into()));
        assert_eq!(kinds("\"\"\"two\nlines\"\"\"")[0], Tok::Str("two\nlines".into()));
        assert!(tokenize("'open").is_err());
    }

    #[test]
    fn test_bad_dedent() {
        let err = tokenize("if x:\n    y = 1\n  z = 2\n").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 3, .. }));
    }

    #[test]
    fn test_mixed_tabs_and_spaces() {
        let err = tokenize("if x:\n\ty = 1\n        z = 2\n").unwrap_err();
        assert!(matches!(err, Error::Syntax { line: 3, .. }), "{}", err);
        assert!(err.to_string().contains("inconsistent use of tabs"));

        assert!(tokenize("if x:\n        y = 1\n\tz = 2\n").is_err());
        assert!(tokenize("if x:\n\ty = 1\n\tz = 2\n").is_ok());
    }

    #[test]
    fn test_semicolons_and_numbers() {
        let toks = kinds("a = 1_000; b = 2e3");
        assert!(toks.contains(&Tok::Int(1000)));
        assert!(toks.contains(&Tok::Float(2000.0)));
        assert_eq!(toks.iter().filter(|t| **t == Tok::Newline).count(), 2);
    }
}
