//! Template parse and execution errors.

use thiserror::Error;

/// Error type returned by template functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for template operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

#[derive(Error, Debug)]
pub enum TemplateError {
    /// The template source is malformed.
    #[error("template: line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Evaluation failed outside of a function call.
    #[error("template: line {line}: {message}")]
    Exec { line: usize, message: String },

    /// A function returned an error.
    #[error("template: line {line}: error calling {name}: {source}")]
    Function {
        line: usize,
        name: String,
        #[source]
        source: BoxError,
    },

    /// The template calls a function that is not registered.
    #[error("template: line {line}: function \"{name}\" not defined")]
    UnknownFunction { line: usize, name: String },
}

impl TemplateError {
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse { line, message: message.into() }
    }

    pub fn exec(line: usize, message: impl Into<String>) -> Self {
        Self::Exec { line, message: message.into() }
    }

    pub fn function(line: usize, name: impl Into<String>, source: BoxError) -> Self {
        Self::Function { line, name: name.into(), source }
    }

    /// Line of the template the error refers to.
    pub fn line(&self) -> usize {
        match self {
            Self::Parse { line, .. }
            | Self::Exec { line, .. }
            | Self::Function { line, .. }
            | Self::UnknownFunction { line, .. } => *line,
        }
    }
}
