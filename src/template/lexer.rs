//! Splits template source into text and action segments and tokenizes the
//! inside of each action.

use super::error::{Result, TemplateError};

pub const DEFAULT_LEFT_DELIMITER: &str = "{{";
pub const DEFAULT_RIGHT_DELIMITER: &str = "}}";

/// Action delimiters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delimiters {
    pub left: String,
    pub right: String,
}

impl Default for Delimiters {
    fn default() -> Self {
        Self::new(DEFAULT_LEFT_DELIMITER, DEFAULT_RIGHT_DELIMITER)
    }
}

impl Delimiters {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self { left: left.into(), right: right.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Segment {
    Text(String),
    Action { line: usize, tokens: Vec<Token> },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Dot,
    Field(Vec<String>),
    /// Variable name including the leading `$`, plus any field chain.
    Var(String, Vec<String>),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Pipe,
    LeftParen,
    RightParen,
    Comma,
    Declare,
}

fn is_space(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|b| *b == b'\n').count()
}

/// Splits `source` into segments. Comments are dropped and trim markers are
/// applied to the neighbouring text.
pub(crate) fn scan(source: &str, delims: &Delimiters) -> Result<Vec<Segment>> {
    if delims.left.is_empty() || delims.right.is_empty() {
        return Err(TemplateError::parse(1, "delimiters cannot be empty"));
    }

    let mut segments = Vec::new();
    let mut pos = 0;
    let mut line = 1;
    let mut trim_next = false;

    while pos < source.len() {
        let Some(offset) = source[pos..].find(&delims.left) else {
            push_text(&mut segments, &source[pos..], trim_next, false);
            break;
        };

        let start = pos + offset;
        let mut body_start = start + delims.left.len();
        let trim_left = has_left_trim_marker(&source[body_start..]);
        if trim_left {
            body_start += 1;
        }

        push_text(&mut segments, &source[pos..start], trim_next, trim_left);
        line += count_newlines(&source[pos..start]);
        let action_line = line;

        let end = if is_comment(&source[body_start..]) {
            find_comment_end(source, body_start, &delims.right, action_line)?
        } else {
            let end = find_action_end(source, body_start, &delims.right, action_line)?;
            let tokens = tokenize(&source[body_start..end.body_end], action_line)?;
            segments.push(Segment::Action { line: action_line, tokens });
            end
        };

        let after = end.delim_start + delims.right.len();
        line += count_newlines(&source[start..after]);
        pos = after;
        trim_next = end.trim_right;
    }

    Ok(segments)
}

fn push_text(segments: &mut Vec<Segment>, text: &str, trim_start: bool, trim_end: bool) {
    let mut text = text;
    if trim_start {
        text = text.trim_start_matches(is_space);
    }
    if trim_end {
        text = text.trim_end_matches(is_space);
    }
    if !text.is_empty() {
        segments.push(Segment::Text(text.to_string()));
    }
}

fn has_left_trim_marker(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('-') && chars.next().is_some_and(is_space)
}

fn is_comment(s: &str) -> bool {
    s.trim_start_matches(is_space).starts_with("/*")
}

struct ActionEnd {
    body_end: usize,
    delim_start: usize,
    trim_right: bool,
}

fn find_comment_end(
    source: &str,
    body_start: usize,
    right: &str,
    line: usize,
) -> Result<ActionEnd> {
    let body = &source[body_start..];
    let open = body_start + (body.len() - body.trim_start_matches(is_space).len());
    let close = source[open + 2..]
        .find("*/")
        .ok_or_else(|| TemplateError::parse(line, "unclosed comment"))?;
    let after_comment = open + 2 + close + 2;

    let rest = &source[after_comment..];
    let spaces = rest.len() - rest.trim_start_matches(is_space).len();
    let tail = &rest[spaces..];

    if tail.starts_with(right) {
        let delim_start = after_comment + spaces;
        return Ok(ActionEnd { body_end: delim_start, delim_start, trim_right: false });
    }
    if spaces > 0 && tail.starts_with('-') && tail[1..].starts_with(right) {
        let delim_start = after_comment + spaces + 1;
        return Ok(ActionEnd { body_end: delim_start - 1, delim_start, trim_right: true });
    }
    Err(TemplateError::parse(line, "comment ends before closing delimiter"))
}

fn find_action_end(source: &str, body_start: usize, right: &str, line: usize) -> Result<ActionEnd> {
    enum State {
        Code,
        Quoted { escaped: bool },
        Raw,
    }

    let body = &source[body_start..];
    let mut state = State::Code;
    for (i, c) in body.char_indices() {
        state = match state {
            State::Code => {
                if body[i..].starts_with(right) {
                    let delim_start = body_start + i;
                    let inner = &body[..i];
                    let trim_right = inner.ends_with('-')
                        && inner[..inner.len() - 1].chars().next_back().is_some_and(is_space);
                    let body_end = if trim_right { delim_start - 1 } else { delim_start };
                    return Ok(ActionEnd { body_end, delim_start, trim_right });
                }
                match c {
                    '"' => State::Quoted { escaped: false },
                    '`' => State::Raw,
                    _ => State::Code,
                }
            }
            State::Quoted { escaped: true } => State::Quoted { escaped: false },
            State::Quoted { escaped: false } => match c {
                '\\' => State::Quoted { escaped: true },
                '"' => State::Code,
                '\n' => return Err(TemplateError::parse(line, "unterminated quoted string")),
                _ => State::Quoted { escaped: false },
            },
            State::Raw => match c {
                '`' => State::Code,
                _ => State::Raw,
            },
        };
    }

    Err(TemplateError::parse(line, "unclosed action"))
}

/// Tokenizes the inside of one action.
pub(crate) fn tokenize(body: &str, line: usize) -> Result<Vec<Token>> {
    let chars: Vec<char> = body.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            c if is_space(c) => i += 1,
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LeftParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RightParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if next == Some('=') => {
                tokens.push(Token::Declare);
                i += 2;
            }
            '"' => {
                let (value, end) = lex_quoted(&chars, i + 1, line)?;
                tokens.push(Token::Str(value));
                i = end;
            }
            '`' => {
                let close = chars[i + 1..]
                    .iter()
                    .position(|c| *c == '`')
                    .ok_or_else(|| TemplateError::parse(line, "unterminated raw quoted string"))?;
                tokens.push(Token::Str(chars[i + 1..i + 1 + close].iter().collect()));
                i += close + 2;
            }
            '.' if next.is_some_and(is_ident_start) => {
                tokens.push(Token::Field(lex_fields(&chars, &mut i)));
            }
            '.' if next.is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(lex_number(&chars, &mut i, line)?);
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '$' => {
                let start = i;
                i += 1;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                tokens.push(Token::Var(name, lex_fields(&chars, &mut i)));
            }
            c if c.is_ascii_digit() => tokens.push(lex_number(&chars, &mut i, line)?),
            '-' | '+' if next.is_some_and(|n| n.is_ascii_digit() || n == '.') => {
                tokens.push(lex_number(&chars, &mut i, line)?)
            }
            c if is_ident_start(c) => {
                let start = i;
                while i < chars.len() && is_ident_char(chars[i]) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "true" => Token::Bool(true),
                    "false" => Token::Bool(false),
                    "nil" => Token::Nil,
                    _ => Token::Ident(word),
                });
            }
            other => {
                return Err(TemplateError::parse(line, format!("unexpected {:?} in action", other)))
            }
        }
    }

    Ok(tokens)
}

/// Reads a `.A.B` chain starting at `*i`.
fn lex_fields(chars: &[char], i: &mut usize) -> Vec<String> {
    let mut fields = Vec::new();
    while *i < chars.len()
        && chars[*i] == '.'
        && chars.get(*i + 1).copied().is_some_and(is_ident_start)
    {
        *i += 1;
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        fields.push(chars[start..*i].iter().collect());
    }
    fields
}

fn lex_number(chars: &[char], i: &mut usize, line: usize) -> Result<Token> {
    let start = *i;
    if matches!(chars[*i], '-' | '+') {
        *i += 1;
    }
    while *i < chars.len() {
        let c = chars[*i];
        let exponent_sign = matches!(c, '+' | '-') && matches!(chars[*i - 1], 'e' | 'E');
        if c.is_ascii_alphanumeric() || c == '.' || c == '_' || exponent_sign {
            *i += 1;
        } else {
            break;
        }
    }

    let text: String = chars[start..*i].iter().filter(|c| **c != '_').collect();
    parse_number(&text)
        .ok_or_else(|| TemplateError::parse(line, format!("bad number syntax: {:?}", text)))
}

fn parse_number(text: &str) -> Option<Token> {
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };

    let radix = match unsigned.get(..2) {
        Some("0x") | Some("0X") => Some(16),
        Some("0o") | Some("0O") => Some(8),
        Some("0b") | Some("0B") => Some(2),
        _ => None,
    };
    if let Some(radix) = radix {
        let value = i64::from_str_radix(&unsigned[2..], radix).ok()?;
        return Some(Token::Int(if negative { -value } else { value }));
    }

    if let Ok(value) = text.parse::<i64>() {
        return Some(Token::Int(value));
    }
    let value = text.parse::<f64>().ok()?;
    value.is_finite().then_some(Token::Float(value))
}

fn lex_quoted(chars: &[char], start: usize, line: usize) -> Result<(String, usize)> {
    let unterminated = || TemplateError::parse(line, "unterminated quoted string");
    let mut out = String::new();
    let mut j = start;

    loop {
        match chars.get(j).copied() {
            None | Some('\n') => return Err(unterminated()),
            Some('"') => return Ok((out, j + 1)),
            Some('\\') => {
                j += 1;
                let escaped = chars.get(j).copied().ok_or_else(unterminated)?;
                let decoded = match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '\\' => '\\',
                    '"' => '"',
                    '\'' => '\'',
                    'a' => '\x07',
                    'b' => '\x08',
                    'f' => '\x0c',
                    'v' => '\x0b',
                    'x' | 'u' | 'U' => {
                        let width = match escaped {
                            'x' => 2,
                            'u' => 4,
                            _ => 8,
                        };
                        let digits: String = chars
                            .get(j + 1..j + 1 + width)
                            .ok_or_else(unterminated)?
                            .iter()
                            .collect();
                        j += width;
                        u32::from_str_radix(&digits, 16)
                            .ok()
                            .and_then(char::from_u32)
                            .ok_or_else(|| {
                                let message = format!("invalid escape \\{}{}", escaped, digits);
                                TemplateError::parse(line, message)
                            })?
                    }
                    other => {
                        let message = format!("unknown escape sequence \\{}", other);
                        return Err(TemplateError::parse(line, message));
                    }
                };
                out.push(decoded);
                j += 1;
            }
            Some(c) => {
                out.push(c);
                j += 1;
            }
        }
    }
}
