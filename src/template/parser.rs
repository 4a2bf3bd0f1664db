//! Builds the node tree from scanned segments.

use std::iter::Peekable;
use std::vec::IntoIter;

use super::error::{Result, TemplateError};
use super::lexer::{Segment, Token};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Node {
    Text(String),
    Action { line: usize, pipe: Pipeline },
    If { line: usize, branches: Vec<(Pipeline, Vec<Node>)>, otherwise: Vec<Node> },
    Range { line: usize, pipe: Pipeline, body: Vec<Node>, otherwise: Vec<Node> },
    With { line: usize, pipe: Pipeline, body: Vec<Node>, otherwise: Vec<Node> },
}

/// `$a, $b := cmd | cmd | ...`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Pipeline {
    pub line: usize,
    pub decl: Vec<String>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Command {
    pub args: Vec<Arg>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Arg {
    Dot,
    Field(Vec<String>),
    Var(String, Vec<String>),
    Func(String),
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Nil,
    Pipe(Box<Pipeline>),
}

/// What ended a list of nodes.
enum Stop {
    Eof,
    End { line: usize },
    Else { line: usize, rest: Vec<Token> },
}

pub(crate) fn parse(segments: Vec<Segment>) -> Result<Vec<Node>> {
    let mut parser = Parser { segments: segments.into_iter().peekable() };
    let (nodes, stop) = parser.parse_list()?;
    match stop {
        Stop::Eof => Ok(nodes),
        Stop::End { line } => Err(TemplateError::parse(line, "unexpected {{end}}")),
        Stop::Else { line, .. } => Err(TemplateError::parse(line, "unexpected {{else}}")),
    }
}

struct Parser {
    segments: Peekable<IntoIter<Segment>>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Stop)> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.next() {
            let (line, tokens) = match segment {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Segment::Action { line, tokens } => (line, tokens),
            };

            let keyword = match tokens.first() {
                Some(Token::Ident(word)) => word.as_str(),
                _ => "",
            };
            match keyword {
                "end" => {
                    if tokens.len() > 1 {
                        return Err(TemplateError::parse(line, "unexpected tokens after end"));
                    }
                    return Ok((nodes, Stop::End { line }));
                }
                "else" => {
                    return Ok((nodes, Stop::Else { line, rest: tokens[1..].to_vec() }));
                }
                "if" => nodes.push(self.parse_if(line, &tokens[1..])?),
                "range" => {
                    let pipe = parse_pipeline(&tokens[1..], line, 2)?;
                    let (body, otherwise) = self.parse_body("range", line)?;
                    nodes.push(Node::Range { line, pipe, body, otherwise });
                }
                "with" => {
                    let pipe = parse_pipeline(&tokens[1..], line, 1)?;
                    let (body, otherwise) = self.parse_body("with", line)?;
                    nodes.push(Node::With { line, pipe, body, otherwise });
                }
                "define" | "template" | "block" | "break" | "continue" => {
                    return Err(TemplateError::parse(
                        line,
                        format!("{{{{{}}}}} is not supported", keyword),
                    ));
                }
                _ => nodes.push(Node::Action { line, pipe: parse_pipeline(&tokens, line, 1)? }),
            }
        }
        Ok((nodes, Stop::Eof))
    }

    fn expect_end(&mut self, keyword: &str, line: usize) -> Result<Vec<Node>> {
        let (nodes, stop) = self.parse_list()?;
        match stop {
            Stop::End { .. } => Ok(nodes),
            Stop::Eof => Err(TemplateError::parse(line, format!("unexpected EOF in {}", keyword))),
            Stop::Else { line, .. } => {
                Err(TemplateError::parse(line, format!("expected end; found else in {}", keyword)))
            }
        }
    }

    /// Body plus optional `{{else}}` branch of `range` and `with`.
    fn parse_body(&mut self, keyword: &str, line: usize) -> Result<(Vec<Node>, Vec<Node>)> {
        let (body, stop) = self.parse_list()?;
        match stop {
            Stop::End { .. } => Ok((body, Vec::new())),
            Stop::Else { line: else_line, rest } => {
                if !rest.is_empty() {
                    let message = format!("unexpected tokens after else in {}", keyword);
                    return Err(TemplateError::parse(else_line, message));
                }
                Ok((body, self.expect_end(keyword, line)?))
            }
            Stop::Eof => Err(TemplateError::parse(line, format!("unexpected EOF in {}", keyword))),
        }
    }

    fn parse_if(&mut self, line: usize, condition: &[Token]) -> Result<Node> {
        let mut branches = Vec::new();
        let mut condition = parse_pipeline(condition, line, 1)?;

        loop {
            let (body, stop) = self.parse_list()?;
            match stop {
                Stop::End { .. } => {
                    branches.push((condition, body));
                    return Ok(Node::If { line, branches, otherwise: Vec::new() });
                }
                Stop::Else { rest, .. } if rest.is_empty() => {
                    branches.push((condition, body));
                    let otherwise = self.expect_end("if", line)?;
                    return Ok(Node::If { line, branches, otherwise });
                }
                Stop::Else { line: else_line, rest } => {
                    if rest.first() != Some(&Token::Ident("if".to_string())) {
                        return Err(TemplateError::parse(else_line, "expected if after else"));
                    }
                    branches.push((condition, body));
                    condition = parse_pipeline(&rest[1..], else_line, 1)?;
                }
                Stop::Eof => return Err(TemplateError::parse(line, "unexpected EOF in if")),
            }
        }
    }
}

/// Parses a pipeline. `max_decl` bounds the number of declared variables.
fn parse_pipeline(tokens: &[Token], line: usize, max_decl: usize) -> Result<Pipeline> {
    let mut decl = Vec::new();
    let mut rest = tokens;

    if let Some(position) = tokens.iter().position(|t| *t == Token::Declare) {
        for (i, token) in tokens[..position].iter().enumerate() {
            match (i % 2, token) {
                (0, Token::Var(name, fields)) if fields.is_empty() => decl.push(name.clone()),
                (1, Token::Comma) => {}
                _ => return Err(TemplateError::parse(line, "malformed variable declaration")),
            }
        }
        if decl.is_empty() || decl.len() > max_decl || position % 2 == 0 {
            return Err(TemplateError::parse(line, "too many declarations in command"));
        }
        rest = &tokens[position + 1..];
    }

    let mut cursor = 0;
    let pipe = parse_commands(rest, &mut cursor, line, decl)?;
    if cursor < rest.len() {
        return Err(TemplateError::parse(line, format!("unexpected {:?} in operand", rest[cursor])));
    }
    Ok(pipe)
}

/// Parses commands until the end of input or an unmatched `)`.
fn parse_commands(
    tokens: &[Token],
    cursor: &mut usize,
    line: usize,
    decl: Vec<String>,
) -> Result<Pipeline> {
    let mut commands = Vec::new();
    let mut args = Vec::new();

    while *cursor < tokens.len() {
        let token = &tokens[*cursor];
        match token {
            Token::RightParen => break,
            Token::Pipe => {
                if args.is_empty() {
                    return Err(TemplateError::parse(line, "missing command in pipeline"));
                }
                commands.push(Command { args: std::mem::take(&mut args) });
                *cursor += 1;
            }
            Token::LeftParen => {
                *cursor += 1;
                let inner = parse_commands(tokens, cursor, line, Vec::new())?;
                if tokens.get(*cursor) != Some(&Token::RightParen) {
                    return Err(TemplateError::parse(line, "unclosed left paren"));
                }
                *cursor += 1;
                args.push(Arg::Pipe(Box::new(inner)));
            }
            Token::Ident(name) => {
                if matches!(name.as_str(), "if" | "else" | "end" | "range" | "with") {
                    return Err(TemplateError::parse(line, format!("unexpected keyword {}", name)));
                }
                args.push(Arg::Func(name.clone()));
                *cursor += 1;
            }
            Token::Dot => {
                args.push(Arg::Dot);
                *cursor += 1;
            }
            Token::Field(fields) => {
                args.push(Arg::Field(fields.clone()));
                *cursor += 1;
            }
            Token::Var(name, fields) => {
                args.push(Arg::Var(name.clone(), fields.clone()));
                *cursor += 1;
            }
            Token::Str(s) => {
                args.push(Arg::Str(s.clone()));
                *cursor += 1;
            }
            Token::Int(n) => {
                args.push(Arg::Int(*n));
                *cursor += 1;
            }
            Token::Float(f) => {
                args.push(Arg::Float(*f));
                *cursor += 1;
            }
            Token::Bool(b) => {
                args.push(Arg::Bool(*b));
                *cursor += 1;
            }
            Token::Nil => {
                args.push(Arg::Nil);
                *cursor += 1;
            }
            Token::Comma | Token::Declare => {
                let message = format!("unexpected {:?} in operand", token);
                return Err(TemplateError::parse(line, message));
            }
        }
    }

    if args.is_empty() {
        return Err(TemplateError::parse(line, "missing value for command"));
    }
    commands.push(Command { args });
    Ok(Pipeline { line, decl, commands })
}
