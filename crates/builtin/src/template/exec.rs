//! Evaluates a parsed template against JSON data.

use std::fmt::Write as _;

use serde_json::Value;

use super::TemplateError;
use super::funcs::{call, type_name};
use super::parse::{Command, MAX_PAREN_DEPTH, Node, Operand, Pipeline};

/// Go-template truthiness: false, zero, nil and empty collections are false.
pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Text form of a value as it appears in rendered output. Missing values
/// render as the empty string.
pub(crate) fn display(v: &Value) -> String {
    let mut out = String::new();
    write_value(&mut out, v);
    out
}

fn write_value(out: &mut String, v: &Value) {
    match v {
        Value::Null => {}
        Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        Value::Number(n) => match (n.as_i64(), n.as_u64(), n.as_f64()) {
            (Some(i), _, _) => {
                let _ = write!(out, "{i}");
            }
            (None, Some(u), _) => {
                let _ = write!(out, "{u}");
            }
            (None, None, Some(f)) => {
                let _ = write!(out, "{f}");
            }
            _ => {}
        },
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push_str("map[");
            for (i, (k, item)) in map.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(k);
                out.push(':');
                write_value(out, item);
            }
            out.push(']');
        }
    }
}

pub(super) struct Exec<'a> {
    source: &'a str,
    vars: Vec<(String, Value)>,
    out: String,
    sub_depth: usize,
}

impl<'a> Exec<'a> {
    pub(super) fn new(source: &'a str, root: &Value) -> Self {
        Self {
            source,
            vars: vec![("$".to_owned(), root.clone())],
            out: String::new(),
            sub_depth: 0,
        }
    }

    pub(super) fn run(mut self, nodes: &[Node], root: &Value) -> Result<String, TemplateError> {
        self.walk(root, nodes)?;
        Ok(self.out)
    }

    fn err(&self, offset: usize, message: impl Into<String>) -> TemplateError {
        TemplateError::exec(self.source, offset, message)
    }

    fn walk(&mut self, dot: &Value, nodes: &[Node]) -> Result<(), TemplateError> {
        let mark = self.vars.len();
        for node in nodes {
            match node {
                Node::Text(text) => self.out.push_str(text),
                Node::Output(pipe) => {
                    let value = self.pipeline(dot, pipe)?;
                    if pipe.decl.is_empty() {
                        write_value(&mut self.out, &value);
                    }
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let inner = self.vars.len();
                    let mut taken = false;
                    for (cond, body) in branches {
                        let value = self.pipeline(dot, cond)?;
                        if truthy(&value) {
                            self.walk(dot, body)?;
                            taken = true;
                            break;
                        }
                    }
                    if !taken {
                        self.walk(dot, otherwise)?;
                    }
                    self.vars.truncate(inner);
                }
                Node::Range {
                    pipe,
                    body,
                    otherwise,
                } => self.range(dot, pipe, body, otherwise)?,
                Node::With {
                    pipe,
                    body,
                    otherwise,
                } => {
                    let inner = self.vars.len();
                    let value = self.pipeline(dot, pipe)?;
                    if truthy(&value) {
                        self.walk(&value, body)?;
                    } else {
                        self.walk(dot, otherwise)?;
                    }
                    self.vars.truncate(inner);
                }
            }
        }
        self.vars.truncate(mark);
        Ok(())
    }

    fn range(
        &mut self,
        dot: &Value,
        pipe: &Pipeline,
        body: &[Node],
        otherwise: &[Node],
    ) -> Result<(), TemplateError> {
        let value = self.commands(dot, pipe)?;
        let entries: Vec<(Value, Value)> = match value {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::from(i), v))
                .collect(),
            Value::Object(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(self.err(
                    pipe.offset,
                    format!("range can't iterate over {}", type_name(&other)),
                ));
            }
        };

        if entries.is_empty() {
            return self.walk(dot, otherwise);
        }

        let mark = self.vars.len();
        for (key, elem) in entries {
            self.vars.truncate(mark);
            match pipe.decl.as_slice() {
                [value_var] => self.vars.push((value_var.clone(), elem.clone())),
                [key_var, value_var] => {
                    self.vars.push((key_var.clone(), key));
                    self.vars.push((value_var.clone(), elem.clone()));
                }
                _ => {}
            }
            self.walk(&elem, body)?;
        }
        self.vars.truncate(mark);
        Ok(())
    }

    /// Evaluate a pipeline and bind its declared or assigned variable.
    fn pipeline(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, TemplateError> {
        let value = self.commands(dot, pipe)?;
        if let Some(name) = pipe.decl.first() {
            if pipe.assign {
                if let Some(slot) = self.vars.iter_mut().rev().find(|(n, _)| n == name) {
                    slot.1 = value.clone();
                }
            } else {
                self.vars.push((name.clone(), value.clone()));
            }
        }
        Ok(value)
    }

    fn commands(&mut self, dot: &Value, pipe: &Pipeline) -> Result<Value, TemplateError> {
        let mut piped: Option<Value> = None;
        for command in &pipe.commands {
            piped = Some(self.command(dot, command, piped)?);
        }
        Ok(piped.unwrap_or(Value::Null))
    }

    fn command(
        &mut self,
        dot: &Value,
        command: &Command,
        piped: Option<Value>,
    ) -> Result<Value, TemplateError> {
        match command.operands.as_slice() {
            [Operand::Func(name), rest @ ..] => {
                let mut args = rest
                    .iter()
                    .map(|op| self.operand(dot, op, command.offset))
                    .collect::<Result<Vec<_>, _>>()?;
                args.extend(piped);
                call(name, args).map_err(|m| self.err(command.offset, format!("error calling {name}: {m}")))
            }
            [single] if piped.is_none() => self.operand(dot, single, command.offset),
            _ => Err(self.err(command.offset, "can't give argument to non-function")),
        }
    }

    fn operand(&mut self, dot: &Value, operand: &Operand, offset: usize) -> Result<Value, TemplateError> {
        match operand {
            Operand::Field(path) => self.walk_fields(dot, path, offset),
            Operand::Var(name, path) => {
                let base = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| self.err(offset, format!("undefined variable: {name}")))?;
                self.walk_fields(&base, path, offset)
            }
            Operand::Func(name) => call(name, Vec::new())
                .map_err(|m| self.err(offset, format!("error calling {name}: {m}"))),
            Operand::Literal(value) => Ok(value.clone()),
            Operand::Sub(pipe) => {
                if self.sub_depth >= MAX_PAREN_DEPTH {
                    return Err(self.err(
                        offset,
                        format!("parentheses nested deeper than {MAX_PAREN_DEPTH}"),
                    ));
                }
                self.sub_depth += 1;
                let value = self.commands(dot, pipe);
                self.sub_depth -= 1;
                value
            }
        }
    }

    fn walk_fields(&self, base: &Value, path: &[String], offset: usize) -> Result<Value, TemplateError> {
        let mut current = base;
        for key in path {
            current = match current {
                Value::Object(map) => match map.get(key) {
                    Some(v) => v,
                    None => return Ok(Value::Null),
                },
                Value::Null => return Ok(Value::Null),
                other => {
                    return Err(self.err(
                        offset,
                        format!("can't evaluate field {key} in type {}", type_name(other)),
                    ));
                }
            };
        }
        Ok(current.clone())
    }
}
