//! Builds the node tree from lexed items.

use serde_json::Value;

use super::TemplateError;
use super::funcs::is_function;
use super::lex::{Item, Tok, Token, tokenize};

/// Maximum depth of nested `if`/`range`/`with` blocks.
const MAX_NESTING: usize = 64;

/// Maximum depth of parenthesised sub-pipelines, checked while parsing and
/// again while executing.
pub(super) const MAX_PAREN_DEPTH: usize = 64;

const KEYWORDS: &[&str] = &["if", "else", "end", "range", "with"];
const UNSUPPORTED: &[&str] = &["define", "template", "block", "break", "continue"];

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    Text(String),
    Output(Pipeline),
    If {
        branches: Vec<(Pipeline, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Pipeline {
    /// Variables declared with `:=`, or the single variable assigned with `=`.
    pub decl: Vec<String>,
    pub assign: bool,
    pub commands: Vec<Command>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) struct Command {
    pub operands: Vec<Operand>,
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    Field(Vec<String>),
    Var(String, Vec<String>),
    Func(String),
    Literal(Value),
    Sub(Pipeline),
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Decl {
    None,
    Single,
    Range,
}

enum Stop {
    Eof,
    End,
    Else(Vec<Token>, usize),
}

pub(super) struct Parser<'s> {
    source: &'s str,
    items: std::vec::IntoIter<Item>,
    vars: Vec<String>,
    depth: usize,
    paren_depth: usize,
}

impl<'s> Parser<'s> {
    pub(super) fn new(source: &'s str, items: Vec<Item>) -> Self {
        Self {
            source,
            items: items.into_iter(),
            vars: vec!["$".to_owned()],
            depth: 0,
            paren_depth: 0,
        }
    }

    pub(super) fn parse(mut self) -> Result<Vec<Node>, TemplateError> {
        let (nodes, stop) = self.list()?;
        match stop {
            Stop::Eof => Ok(nodes),
            Stop::End => Err(self.error_at_end("unexpected {{end}}")),
            Stop::Else(_, offset) => Err(TemplateError::syntax(self.source, offset, "unexpected {{else}}")),
        }
    }

    fn error_at_end(&self, message: &str) -> TemplateError {
        TemplateError::syntax(self.source, self.source.len(), message)
    }

    fn err(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::syntax(self.source, offset, message)
    }

    /// Parse nodes until `{{end}}`, `{{else}}` or end of input. Variables
    /// declared inside the list go out of scope when it ends.
    fn list(&mut self) -> Result<(Vec<Node>, Stop), TemplateError> {
        let mark = self.vars.len();
        let mut nodes = Vec::new();
        let stop = loop {
            let Some(item) = self.items.next() else {
                break Stop::Eof;
            };
            let (body, offset) = match item {
                Item::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Item::Action { body, offset } => (body, offset),
            };
            let tokens = tokenize(&body, offset + 2)
                .map_err(|(at, message)| TemplateError::syntax(self.source, at, message))?;
            let Some(first) = tokens.first() else {
                return Err(self.err(offset, "missing value for command"));
            };

            match &first.tok {
                Tok::Ident(kw) if kw == "end" => {
                    if tokens.len() > 1 {
                        return Err(self.err(offset, "unexpected tokens after end"));
                    }
                    break Stop::End;
                }
                Tok::Ident(kw) if kw == "else" => break Stop::Else(tokens[1..].to_vec(), offset),
                Tok::Ident(kw) if kw == "if" => {
                    let node = self.nested(|p| p.if_block(&tokens[1..], offset))?;
                    nodes.push(node);
                }
                Tok::Ident(kw) if kw == "range" => {
                    let node = self.nested(|p| p.range_block(&tokens[1..], offset))?;
                    nodes.push(node);
                }
                Tok::Ident(kw) if kw == "with" => {
                    let node = self.nested(|p| p.with_block(&tokens[1..], offset))?;
                    nodes.push(node);
                }
                Tok::Ident(kw) if UNSUPPORTED.contains(&kw.as_str()) => {
                    return Err(self.err(offset, format!("{{{{{kw}}}}} is not supported")));
                }
                _ => {
                    let pipe = self.pipeline(&tokens, offset, Decl::Single)?;
                    nodes.push(Node::Output(pipe));
                }
            }
        };
        self.vars.truncate(mark);
        Ok((nodes, stop))
    }

    fn nested(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<Node, TemplateError>,
    ) -> Result<Node, TemplateError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error_at_end(&format!("blocks nested deeper than {MAX_NESTING}")));
        }
        let mark = self.vars.len();
        let node = f(self);
        self.vars.truncate(mark);
        self.depth -= 1;
        node
    }

    fn expect_end(&self, stop: Stop, what: &str, offset: usize) -> Result<(), TemplateError> {
        match stop {
            Stop::End => Ok(()),
            Stop::Eof => Err(self.err(offset, format!("unexpected EOF: {what} is missing {{{{end}}}}"))),
            Stop::Else(_, at) => Err(self.err(at, format!("unexpected {{{{else}}}} in {what}"))),
        }
    }

    fn if_block(&mut self, tokens: &[Token], offset: usize) -> Result<Node, TemplateError> {
        let cond = self.pipeline(tokens, offset, Decl::Single)?;
        let (body, mut stop) = self.list()?;
        let mut branches = vec![(cond, body)];
        let mut otherwise = Vec::new();

        loop {
            match stop {
                Stop::End => break,
                Stop::Eof => return Err(self.err(offset, "unexpected EOF: if is missing {{end}}")),
                Stop::Else(rest, at) if rest.is_empty() => {
                    let (nodes, next) = self.list()?;
                    self.expect_end(next, "if", at)?;
                    otherwise = nodes;
                    break;
                }
                Stop::Else(rest, at) => match rest.first().map(|t| &t.tok) {
                    Some(Tok::Ident(kw)) if kw == "if" => {
                        let cond = self.pipeline(&rest[1..], at, Decl::Single)?;
                        let (body, next) = self.list()?;
                        branches.push((cond, body));
                        stop = next;
                    }
                    _ => return Err(self.err(at, "expected {{else}} or {{else if}}")),
                },
            }
        }
        Ok(Node::If {
            branches,
            otherwise,
        })
    }

    fn else_or_end(&mut self, stop: Stop, what: &str, offset: usize) -> Result<Vec<Node>, TemplateError> {
        match stop {
            Stop::Else(rest, at) => {
                if !rest.is_empty() {
                    return Err(self.err(at, format!("unexpected tokens after else in {what}")));
                }
                let (nodes, next) = self.list()?;
                self.expect_end(next, what, at)?;
                Ok(nodes)
            }
            other => {
                self.expect_end(other, what, offset)?;
                Ok(Vec::new())
            }
        }
    }

    fn range_block(&mut self, tokens: &[Token], offset: usize) -> Result<Node, TemplateError> {
        let pipe = self.pipeline(tokens, offset, Decl::Range)?;
        let (body, stop) = self.list()?;
        let otherwise = self.else_or_end(stop, "range", offset)?;
        Ok(Node::Range {
            pipe,
            body,
            otherwise,
        })
    }

    fn with_block(&mut self, tokens: &[Token], offset: usize) -> Result<Node, TemplateError> {
        let pipe = self.pipeline(tokens, offset, Decl::Single)?;
        let (body, stop) = self.list()?;
        let otherwise = self.else_or_end(stop, "with", offset)?;
        Ok(Node::With {
            pipe,
            body,
            otherwise,
        })
    }

    fn pipeline(&mut self, tokens: &[Token], offset: usize, mode: Decl) -> Result<Pipeline, TemplateError> {
        let mut decl = Vec::new();
        let mut assign = false;
        let mut rest = tokens;

        let var_name = |t: Option<&Token>| match t.map(|t| &t.tok) {
            Some(Tok::Var(name, fields)) if fields.is_empty() => Some(name.clone()),
            _ => None,
        };
        let tok_at = |i: usize| tokens.get(i).map(|t| &t.tok);

        if mode != Decl::None {
            if let Some(name) = var_name(tokens.first()) {
                match tok_at(1) {
                    Some(Tok::Declare) => {
                        decl.push(name);
                        rest = &tokens[2..];
                    }
                    Some(Tok::Assign) if mode == Decl::Single => {
                        if !self.vars.contains(&name) {
                            return Err(self.err(tokens[0].offset, format!("undefined variable: {name}")));
                        }
                        decl.push(name);
                        assign = true;
                        rest = &tokens[2..];
                    }
                    Some(Tok::Comma) if mode == Decl::Range => {
                        let second = var_name(tokens.get(2))
                            .ok_or_else(|| self.err(tokens[0].offset, "expected a second range variable"))?;
                        if tok_at(3) != Some(&Tok::Declare) {
                            return Err(self.err(tokens[0].offset, "expected := after range variables"));
                        }
                        decl.push(name);
                        decl.push(second);
                        rest = &tokens[4..];
                    }
                    _ => {}
                }
            }
        }

        let mut commands = Vec::new();
        for (stage, slice) in split_pipes(rest).into_iter().enumerate() {
            let Some(first) = slice.first() else {
                return Err(self.err(offset, "missing value for command"));
            };
            let cmd_offset = first.offset;
            let operands = self.operands(slice)?;
            if stage > 0 && !matches!(operands.first(), Some(Operand::Func(_))) {
                return Err(self.err(cmd_offset, format!("non executable command in pipeline stage {}", stage + 1)));
            }
            commands.push(Command {
                operands,
                offset: cmd_offset,
            });
        }
        if commands.is_empty() {
            return Err(self.err(offset, "missing value for command"));
        }

        if !assign {
            self.vars.extend(decl.iter().cloned());
        }

        Ok(Pipeline {
            decl,
            assign,
            commands,
            offset,
        })
    }

    fn operands(&mut self, tokens: &[Token]) -> Result<Vec<Operand>, TemplateError> {
        let mut operands = Vec::new();
        let mut i = 0;
        while i < tokens.len() {
            let token = &tokens[i];
            let operand = match &token.tok {
                Tok::Field(path) => Operand::Field(path.clone()),
                Tok::Var(name, path) => {
                    if !self.vars.contains(name) {
                        return Err(self.err(token.offset, format!("undefined variable: {name}")));
                    }
                    Operand::Var(name.clone(), path.clone())
                }
                Tok::Literal(value) => Operand::Literal(value.clone()),
                Tok::Ident(name) if KEYWORDS.contains(&name.as_str()) => {
                    return Err(self.err(token.offset, format!("unexpected keyword {name}")));
                }
                Tok::Ident(name) => {
                    if !is_function(name) {
                        return Err(TemplateError::unknown_function(self.source, token.offset, name));
                    }
                    Operand::Func(name.clone())
                }
                Tok::LParen => {
                    let close = matching_paren(tokens, i)
                        .ok_or_else(|| self.err(token.offset, "unclosed left paren"))?;
                    if self.paren_depth >= MAX_PAREN_DEPTH {
                        return Err(self.err(
                            token.offset,
                            format!("parentheses nested deeper than {MAX_PAREN_DEPTH}"),
                        ));
                    }
                    let inner = &tokens[i + 1..close];
                    self.paren_depth += 1;
                    let pipe = self.pipeline(inner, token.offset, Decl::None);
                    self.paren_depth -= 1;
                    let pipe = pipe?;
                    i = close;
                    Operand::Sub(pipe)
                }
                Tok::RParen => return Err(self.err(token.offset, "unexpected right paren")),
                Tok::Pipe | Tok::Declare | Tok::Assign | Tok::Comma => {
                    return Err(self.err(token.offset, "unexpected token in operand"));
                }
            };
            operands.push(operand);
            i += 1;
        }
        Ok(operands)
    }
}

/// Split on `|` outside parentheses.
fn split_pipes(tokens: &[Token]) -> Vec<&[Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, t) in tokens.iter().enumerate() {
        match t.tok {
            Tok::LParen => depth += 1,
            Tok::RParen => depth = depth.saturating_sub(1),
            Tok::Pipe if depth == 0 => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < tokens.len() || !parts.is_empty() {
        parts.push(&tokens[start..]);
    }
    parts
}

fn matching_paren(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, t) in tokens.iter().enumerate().skip(open) {
        match t.tok {
            Tok::LParen => depth += 1,
            Tok::RParen => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}
