//! A small text template engine in the style of Go's `text/template`.
//!
//! Templates are parsed once into a node tree and rendered against a
//! `serde_json::Value`. Functions are looked up in a [`FunctionRegistry`] and
//! may be async, so a template can fetch secrets while it renders.
//!
//! Supported syntax:
//! - `{{ pipeline }}` actions, `{{/* comments */}}`, `{{-` / `-}}` trim markers
//! - operands: `.`, `.A.B`, `$`, `$x.A`, string / raw string / number /
//!   `true` / `false` / `nil` literals and `( sub pipelines )`
//! - `name arg...` calls and `a | f b` pipelines (piped value goes last)
//! - `$x := pipeline` declarations
//! - `if` / `else if` / `else`, `range` (with `$k, $v :=`) / `else`, `with` / `else`
//!
//! Rendering writes into a buffer; if anything fails the error is returned and
//! no partial output escapes.

pub mod error;
pub mod exec;
pub mod funcs;
pub mod lexer;
pub mod parser;

use serde_json::Value;
use tracing::debug;

pub use error::{BoxError, Result, TemplateError};
pub use exec::{is_true, print_value};
pub use funcs::{expect_args, values_equal, FunctionRegistry, TemplateFunction};
pub use lexer::{Delimiters, DEFAULT_LEFT_DELIMITER, DEFAULT_RIGHT_DELIMITER};

use exec::Executor;
use parser::Node;

/// A parsed template.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<Node>,
}

impl Template {
    /// Parses `source` with the default `{{` / `}}` delimiters.
    pub fn parse(source: &str) -> Result<Self> {
        Self::parse_with_delimiters(source, &Delimiters::default())
    }

    pub fn parse_with_delimiters(source: &str, delimiters: &Delimiters) -> Result<Self> {
        let segments = lexer::scan(source, delimiters)?;
        let nodes = parser::parse(segments)?;
        debug!(nodes = nodes.len(), "Parsed template");
        Ok(Self { nodes })
    }

    /// Fails if the template calls a function `funcs` does not define.
    pub fn check_functions(&self, funcs: &FunctionRegistry) -> Result<()> {
        exec::check_functions(&self.nodes, funcs)
    }

    /// Renders the template against `data`.
    pub async fn render(&self, data: &Value, funcs: &FunctionRegistry) -> Result<String> {
        self.check_functions(funcs)?;

        let mut executor = Executor::new(funcs, data);
        executor.walk(data, &self.nodes).await?;
        Ok(executor.into_output())
    }
}
