//! Characters to tokens, one pass, branching on the current character.

use crate::diagnostics::CompileError;
use crate::token::{Literal, Token, TokenKind};

pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
        }
    }

    pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
        Lexer::new(source).run()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        Some(c)
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::lexical(self.line, message)
    }

    fn run(mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            let Some(c) = self.peek() else {
                tokens.push(Token::new(TokenKind::End, self.line, Literal::None));
                break;
            };
            let line = self.line;
            let tok = if c.is_ascii_digit() {
                self.lex_number(line)?
            } else if c.is_alphabetic() || c == '_' {
                self.lex_ident_or_keyword(line)
            } else if c == '\'' {
                self.lex_char(line)?
            } else if c == '"' {
                self.lex_string(line)?
            } else {
                self.lex_operator_or_delim(line)?
            };
            tokens.push(tok);
        }
        Ok(tokens)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') => {
                    self.advance();
                }
                Some('\r') => {
                    self.advance();
                    if self.peek() == Some('\n') {
                        self.advance();
                    }
                    self.line += 1;
                }
                Some('\n') => {
                    self.advance();
                    self.line += 1;
                }
                Some('/') if self.peek_at(1) == Some('/') => {
                    while !matches!(self.peek(), None | Some('\n') | Some('\r')) {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_ident_or_keyword(&mut self, line: u32) -> Token {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let word: String = self.chars[start..self.pos].iter().collect();
        match TokenKind::keyword(&word) {
            Some(kind) => Token::new(kind, line, Literal::None),
            None => Token::new(TokenKind::Id, line, Literal::Id(word)),
        }
    }

    /// Digits, then either a `DOUBLE` tail (`.` digit, or `e`/`E` [sign] digits)
    /// or nothing (an `INT`). See spec.md §9's DOT-vs-double-literal note.
    fn lex_number(&mut self, line: u32) -> Result<Token, CompileError> {
        let start = self.pos;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.advance();
        }

        let mut is_double = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_double = true;
            self.advance(); // '.'
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.advance();
            }
        }
        if matches!(self.peek(), Some('e') | Some('E')) {
            let mut look = 1;
            if matches!(self.peek_at(look), Some('+') | Some('-')) {
                look += 1;
            }
            if matches!(self.peek_at(look), Some(c) if c.is_ascii_digit()) {
                is_double = true;
                self.advance(); // e/E
                if matches!(self.peek(), Some('+') | Some('-')) {
                    self.advance();
                }
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }

        let text: String = self.chars[start..self.pos].iter().collect();
        if is_double {
            let v: f64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid double literal '{text}'")))?;
            Ok(Token::new(TokenKind::Double, line, Literal::Double(v)))
        } else {
            let v: i64 = text
                .parse()
                .map_err(|_| self.err(format!("invalid int literal '{text}'")))?;
            Ok(Token::new(TokenKind::Int, line, Literal::Int(v)))
        }
    }

    fn decode_escape(&mut self) -> Result<char, CompileError> {
        match self.advance() {
            Some('n') => Ok('\n'),
            Some('r') => Ok('\r'),
            Some('t') => Ok('\t'),
            Some('\\') => Ok('\\'),
            Some('\'') => Ok('\''),
            Some('"') => Ok('"'),
            Some(other) => Err(self.err(format!("unrecognized escape '\\{other}'"))),
            None => Err(self.err("unterminated escape sequence")),
        }
    }

    fn lex_char(&mut self, line: u32) -> Result<Token, CompileError> {
        self.advance(); // opening '
        let c = match self.advance() {
            Some('\\') => self.decode_escape()?,
            Some('\'') | None => return Err(self.err("malformed character literal")),
            Some(c) => c,
        };
        if self.advance() != Some('\'') {
            return Err(self.err("unterminated character literal"));
        }
        Ok(Token::new(TokenKind::Char, line, Literal::Char(c)))
    }

    fn lex_string(&mut self, line: u32) -> Result<Token, CompileError> {
        self.advance(); // opening "
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => s.push(self.decode_escape()?),
                Some('\n') | Some('\r') | None => {
                    return Err(self.err("unterminated string literal"))
                }
                Some(c) => s.push(c),
            }
        }
        Ok(Token::new(TokenKind::String, line, Literal::Str(s)))
    }

    fn lex_operator_or_delim(&mut self, line: u32) -> Result<Token, CompileError> {
        let c = self.advance().unwrap();
        let kind = match c {
            ',' => TokenKind::Comma,
            ';' => TokenKind::Semicolon,
            '(' => TokenKind::LPar,
            ')' => TokenKind::RPar,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '{' => TokenKind::LAcc,
            '}' => TokenKind::RAcc,
            '+' => TokenKind::Add,
            '-' => TokenKind::Sub,
            '*' => TokenKind::Mul,
            '!' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::NotEq
                } else {
                    TokenKind::Not
                }
            }
            '/' => TokenKind::Div,
            '.' => {
                if matches!(self.peek(), Some(c) if c.is_alphabetic() || c == '_') {
                    TokenKind::Dot
                } else {
                    return Err(self.err("'.' must be followed by an identifier"));
                }
            }
            '&' => {
                if self.peek() == Some('&') {
                    self.advance();
                    TokenKind::And
                } else {
                    return Err(self.err("expected '&&', found a lone '&'"));
                }
            }
            '|' => {
                if self.peek() == Some('|') {
                    self.advance();
                    TokenKind::Or
                } else {
                    return Err(self.err("expected '||', found a lone '|'"));
                }
            }
            '=' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::Equal
                } else {
                    TokenKind::Assign
                }
            }
            '<' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::LessEq
                } else {
                    TokenKind::Less
                }
            }
            '>' => {
                if self.peek() == Some('=') {
                    self.advance();
                    TokenKind::GreaterEq
                } else {
                    TokenKind::Greater
                }
            }
            other => return Err(self.err(format!("unexpected character '{other}'"))),
        };
        Ok(Token::new(kind, line, Literal::None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lex_basic_program() {
        let src = "int a; int main() { a = 1 + 2; return a; }";
        let expected = vec![
            TokenKind::TypeInt,
            TokenKind::Id,
            TokenKind::Semicolon,
            TokenKind::TypeInt,
            TokenKind::Id,
            TokenKind::LPar,
            TokenKind::RPar,
            TokenKind::LAcc,
            TokenKind::Id,
            TokenKind::Assign,
            TokenKind::Int,
            TokenKind::Add,
            TokenKind::Int,
            TokenKind::Semicolon,
            TokenKind::Return,
            TokenKind::Id,
            TokenKind::Semicolon,
            TokenKind::RAcc,
            TokenKind::End,
        ];
        assert_eq!(kinds(src), expected);
    }

    #[test]
    fn ends_with_exactly_one_end_and_nondecreasing_lines() {
        let toks = Lexer::tokenize("int a;\nint b;\n").unwrap();
        assert_eq!(toks.last().unwrap().kind, TokenKind::End);
        assert_eq!(toks.iter().filter(|t| t.kind == TokenKind::End).count(), 1);
        let mut last_line = 0;
        for t in &toks {
            assert!(t.line >= last_line);
            last_line = t.line;
        }
    }

    #[test]
    fn double_literal_vs_dot() {
        let toks = Lexer::tokenize("3.14 a.b 1e10 2.5e-3").unwrap();
        assert_eq!(toks[0].kind, TokenKind::Double);
        assert_eq!(toks[1].kind, TokenKind::Id);
        assert_eq!(toks[2].kind, TokenKind::Dot);
        assert_eq!(toks[3].kind, TokenKind::Id);
        assert_eq!(toks[4].kind, TokenKind::Double);
        assert_eq!(toks[5].kind, TokenKind::Double);
    }

    #[test]
    fn bare_ampersand_is_fatal() {
        assert!(Lexer::tokenize("a & b").is_err());
    }

    #[test]
    fn string_and_char_escapes() {
        let toks = Lexer::tokenize(r#" 'x' '\n' "hi\tthere" "#).unwrap();
        assert_eq!(toks[0].literal, Literal::Char('x'));
        assert_eq!(toks[1].literal, Literal::Char('\n'));
        assert_eq!(toks[2].literal, Literal::Str("hi\tthere".to_string()));
    }

    #[test]
    fn unterminated_string_is_fatal() {
        assert!(Lexer::tokenize("\"abc").is_err());
    }

    #[test]
    fn line_comment_is_skipped() {
        let toks = Lexer::tokenize("int a; // trailing\nint b;").unwrap();
        assert_eq!(toks[0].line, 1);
        assert_eq!(toks[3].line, 2);
    }
}
