//! Tokenizer for the expression language.

use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Number(f64),
    Str(String),
    Ident(String),
    Punct(&'static str),
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

/// Longest first so `===` wins over `==` and `=`.
const PUNCTUATORS: &[&str] = &[
    "===", "!==", "...", "==", "!=", "<=", ">=", "&&", "||", "??", "?.", "+", "-", "*", "/", "%",
    "<", ">", "!", "?", ":", ".", ",", "(", ")", "[", "]", "{", "}",
];

pub fn tokenize(source: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let bytes = source.as_bytes();
    let mut pos = 0;

    while pos < source.len() {
        let rest = &source[pos..];
        let Some(ch) = rest.chars().next() else {
            break;
        };

        if ch.is_whitespace() {
            pos += ch.len_utf8();
            continue;
        }

        let start = pos;
        if ch.is_ascii_digit() || (ch == '.' && bytes.get(pos + 1).is_some_and(u8::is_ascii_digit))
        {
            let (value, len) = scan_number(rest).ok_or_else(|| {
                ExprError::syntax(format!("invalid number '{}'", take_word(rest)), start)
            })?;
            pos += len;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                start,
                end: pos,
            });
        } else if matches!(ch, '"' | '\'' | '`') {
            let (value, len) = scan_string(rest, ch)
                .ok_or_else(|| ExprError::syntax("unterminated string literal", start))?;
            pos += len;
            tokens.push(Token {
                kind: TokenKind::Str(value),
                start,
                end: pos,
            });
        } else if is_ident_start(ch) {
            let len = rest
                .char_indices()
                .find(|(_, c)| !is_ident_continue(*c))
                .map_or(rest.len(), |(i, _)| i);
            pos += len;
            tokens.push(Token {
                kind: TokenKind::Ident(rest[..len].to_string()),
                start,
                end: pos,
            });
        } else {
            let punct = PUNCTUATORS
                .iter()
                .find(|p| rest.starts_with(**p))
                // `a?.5:1` is a conditional, not optional chaining.
                .filter(|p| !(**p == "?." && bytes.get(pos + 2).is_some_and(u8::is_ascii_digit)))
                .copied()
                .or_else(|| (ch == '?').then_some("?"))
                .ok_or_else(|| ExprError::syntax(format!("unexpected character '{ch}'"), start))?;
            pos += punct.len();
            tokens.push(Token {
                kind: TokenKind::Punct(punct),
                start,
                end: pos,
            });
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        start: source.len(),
        end: source.len(),
    });
    Ok(tokens)
}

fn scan_number(rest: &str) -> Option<(f64, usize)> {
    let bytes = rest.as_bytes();
    let mut len = 0;
    while len < bytes.len() && (bytes[len].is_ascii_digit() || bytes[len] == b'_') {
        len += 1;
    }
    if bytes.get(len) == Some(&b'.') {
        len += 1;
        while len < bytes.len() && bytes[len].is_ascii_digit() {
            len += 1;
        }
    }
    if matches!(bytes.get(len), Some(b'e') | Some(b'E')) {
        let mut exp = len + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            len = exp;
            while len < bytes.len() && bytes[len].is_ascii_digit() {
                len += 1;
            }
        }
    }
    let text: String = rest[..len].chars().filter(|c| *c != '_').collect();
    text.parse().ok().map(|value| (value, len))
}

fn scan_string(rest: &str, quote: char) -> Option<(String, usize)> {
    let mut value = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, ch)) = chars.next() {
        if ch == quote {
            return Some((value, i + ch.len_utf8()));
        }
        if ch != '\\' {
            value.push(ch);
            continue;
        }
        let (_, escaped) = chars.next()?;
        match escaped {
            'n' => value.push('\n'),
            't' => value.push('\t'),
            'r' => value.push('\r'),
            '0' => value.push('\0'),
            'u' => {
                let hex: String = chars.by_ref().take(4).map(|(_, c)| c).collect();
                let code = u32::from_str_radix(&hex, 16).ok()?;
                value.push(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
            }
            '\n' => {}
            other => value.push(other),
        }
    }
    None
}

fn take_word(rest: &str) -> &str {
    let end = rest
        .char_indices()
        .find(|(_, c)| c.is_whitespace())
        .map_or(rest.len(), |(i, _)| i);
    &rest[..end]
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || ch == '$'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}
