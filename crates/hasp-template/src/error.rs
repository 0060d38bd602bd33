//! Template failures

use thiserror::Error;

pub type TemplateResult<T> = Result<T, TemplateError>;

#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template does not parse; caught when a plate is built
    #[error("syntax error{}: {message}", at_line(.line))]
    Syntax { line: Option<usize>, message: String },

    #[error("undefined value: {0}")]
    Undefined(String),

    #[error("render failed: {0}")]
    Render(String),
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|line| format!(" on line {line}")).unwrap_or_default()
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        let message = err
            .detail()
            .map(str::to_string)
            .unwrap_or_else(|| err.to_string());
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateError::Syntax {
                line: err.line(),
                message,
            },
            minijinja::ErrorKind::UndefinedError => TemplateError::Undefined(message),
            _ => TemplateError::Render(message),
        }
    }
}
