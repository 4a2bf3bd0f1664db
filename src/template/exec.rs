//! Walks the node tree against a JSON data value.

use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;

use super::error::{Result, TemplateError};
use super::funcs::FunctionRegistry;
use super::parser::{Arg, Command, Node, Pipeline};

/// Template truthiness: null, false, zero and empty values are false.
pub fn is_true(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Textual form of a value in rendered output.
pub fn print_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Checks that every function the nodes call is registered.
pub(crate) fn check_functions(nodes: &[Node], funcs: &FunctionRegistry) -> Result<()> {
    for node in nodes {
        match node {
            Node::Text(_) => {}
            Node::Action { pipe, .. } => check_pipeline(pipe, funcs)?,
            Node::If { branches, otherwise, .. } => {
                for (condition, body) in branches {
                    check_pipeline(condition, funcs)?;
                    check_functions(body, funcs)?;
                }
                check_functions(otherwise, funcs)?;
            }
            Node::Range { pipe, body, otherwise, .. }
            | Node::With { pipe, body, otherwise, .. } => {
                check_pipeline(pipe, funcs)?;
                check_functions(body, funcs)?;
                check_functions(otherwise, funcs)?;
            }
        }
    }
    Ok(())
}

fn check_pipeline(pipe: &Pipeline, funcs: &FunctionRegistry) -> Result<()> {
    for arg in pipe.commands.iter().flat_map(|command| command.args.iter()) {
        match arg {
            Arg::Func(name) if !funcs.contains(name) => {
                return Err(TemplateError::UnknownFunction { line: pipe.line, name: name.clone() });
            }
            Arg::Pipe(inner) => check_pipeline(inner, funcs)?,
            _ => {}
        }
    }
    Ok(())
}

pub(crate) struct Executor<'f> {
    funcs: &'f FunctionRegistry,
    vars: Vec<(String, Value)>,
    out: String,
}

impl<'f> Executor<'f> {
    pub(crate) fn new(funcs: &'f FunctionRegistry, root: &Value) -> Self {
        Self { funcs, vars: vec![("$".to_string(), root.clone())], out: String::new() }
    }

    pub(crate) fn into_output(self) -> String {
        self.out
    }

    pub(crate) fn walk<'s>(
        &'s mut self,
        dot: &'s Value,
        nodes: &'s [Node],
    ) -> BoxFuture<'s, Result<()>> {
        async move {
            for node in nodes {
                match node {
                    Node::Text(text) => self.out.push_str(text),
                    Node::Action { pipe, .. } => {
                        let value = self.eval_pipeline(dot, pipe).await?;
                        if pipe.decl.is_empty() {
                            self.out.push_str(&print_value(&value));
                        }
                    }
                    Node::If { branches, otherwise, .. } => {
                        let mark = self.vars.len();
                        let mut taken = None;
                        for (condition, body) in branches {
                            if is_true(&self.eval_pipeline(dot, condition).await?) {
                                taken = Some(body);
                                break;
                            }
                        }
                        self.walk(dot, taken.unwrap_or(otherwise)).await?;
                        self.vars.truncate(mark);
                    }
                    Node::With { pipe, body, otherwise, .. } => {
                        let mark = self.vars.len();
                        let value = self.eval_pipeline(dot, pipe).await?;
                        if is_true(&value) {
                            self.walk(&value, body).await?;
                        } else {
                            self.walk(dot, otherwise).await?;
                        }
                        self.vars.truncate(mark);
                    }
                    Node::Range { line, pipe, body, otherwise } => {
                        self.walk_range(dot, *line, pipe, body, otherwise).await?;
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn walk_range(
        &mut self,
        dot: &Value,
        line: usize,
        pipe: &Pipeline,
        body: &[Node],
        otherwise: &[Node],
    ) -> Result<()> {
        let undeclared =
            Pipeline { line: pipe.line, decl: Vec::new(), commands: pipe.commands.clone() };
        let value = self.eval_pipeline(dot, &undeclared).await?;

        let items: Vec<(Value, Value)> = match value {
            Value::Null => Vec::new(),
            Value::Array(items) => {
                items.into_iter().enumerate().map(|(i, item)| (Value::from(i), item)).collect()
            }
            Value::Object(map) => {
                let mut entries: Vec<_> = map.into_iter().collect();
                entries.sort_by(|a, b| a.0.cmp(&b.0));
                entries.into_iter().map(|(k, v)| (Value::String(k), v)).collect()
            }
            Value::Number(n) => {
                let count = n.as_u64().ok_or_else(|| {
                    TemplateError::exec(line, format!("range can't iterate over {}", n))
                })?;
                (0..count).map(|i| (Value::from(i), Value::from(i))).collect()
            }
            other => {
                return Err(TemplateError::exec(
                    line,
                    format!("range can't iterate over {}", print_value(&other)),
                ))
            }
        };

        if items.is_empty() {
            return self.walk(dot, otherwise).await;
        }

        for (key, item) in items {
            let mark = self.vars.len();
            match pipe.decl.as_slice() {
                [value_var] => self.vars.push((value_var.clone(), item.clone())),
                [key_var, value_var] => {
                    self.vars.push((key_var.clone(), key));
                    self.vars.push((value_var.clone(), item.clone()));
                }
                _ => {}
            }
            self.walk(&item, body).await?;
            self.vars.truncate(mark);
        }
        Ok(())
    }

    fn eval_pipeline<'s>(
        &'s mut self,
        dot: &'s Value,
        pipe: &'s Pipeline,
    ) -> BoxFuture<'s, Result<Value>> {
        async move {
            let mut value = None;
            for command in &pipe.commands {
                value = Some(self.eval_command(dot, command, pipe.line, value).await?);
            }
            let value = value.unwrap_or(Value::Null);

            for name in &pipe.decl {
                self.vars.push((name.clone(), value.clone()));
            }
            Ok(value)
        }
        .boxed()
    }

    async fn eval_command(
        &mut self,
        dot: &Value,
        command: &Command,
        line: usize,
        piped: Option<Value>,
    ) -> Result<Value> {
        let (first, rest) = match command.args.split_first() {
            Some(split) => split,
            None => return Err(TemplateError::exec(line, "empty command")),
        };

        let Arg::Func(name) = first else {
            if !rest.is_empty() || piped.is_some() {
                return Err(TemplateError::exec(line, "can't give argument to non-function"));
            }
            return self.eval_arg(dot, first, line).await;
        };

        let mut args = Vec::with_capacity(rest.len() + 1);
        for arg in rest {
            args.push(self.eval_arg(dot, arg, line).await?);
        }
        args.extend(piped);
        self.call(name, args, line).await
    }

    async fn call(&self, name: &str, args: Vec<Value>, line: usize) -> Result<Value> {
        let function = self
            .funcs
            .get(name)
            .ok_or_else(|| TemplateError::UnknownFunction { line, name: name.to_string() })?;
        function.call(args).await.map_err(|source| TemplateError::function(line, name, source))
    }

    async fn eval_arg(&mut self, dot: &Value, arg: &Arg, line: usize) -> Result<Value> {
        match arg {
            Arg::Dot => Ok(dot.clone()),
            Arg::Field(fields) => field_chain(dot, fields, line),
            Arg::Var(name, fields) => {
                let value = self
                    .vars
                    .iter()
                    .rev()
                    .find(|(var, _)| var == name)
                    .map(|(_, value)| value.clone())
                    .ok_or_else(|| {
                        TemplateError::exec(line, format!("undefined variable: {}", name))
                    })?;
                field_chain(&value, fields, line)
            }
            Arg::Func(name) => self.call(name, Vec::new(), line).await,
            Arg::Str(s) => Ok(Value::String(s.clone())),
            Arg::Int(n) => Ok(Value::from(*n)),
            Arg::Float(f) => {
                Ok(serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number))
            }
            Arg::Bool(b) => Ok(Value::Bool(*b)),
            Arg::Nil => Ok(Value::Null),
            Arg::Pipe(inner) => self.eval_pipeline(dot, inner).await,
        }
    }
}

fn field_chain(value: &Value, fields: &[String], line: usize) -> Result<Value> {
    let mut current = value;
    for field in fields {
        current = match current {
            Value::Object(map) => match map.get(field) {
                Some(next) => next,
                None => return Ok(Value::Null),
            },
            Value::Null => return Ok(Value::Null),
            other => {
                return Err(TemplateError::exec(
                    line,
                    format!("can't evaluate field {} in type {}", field, type_name(other)),
                ))
            }
        };
    }
    Ok(current.clone())
}
