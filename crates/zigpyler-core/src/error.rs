use std::fmt;
use thiserror::Error;

/// Source location information for error reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Categories of backend failure.
///
/// Only `InvariantBreach` and `Parse` abort a module. Unsupported
/// constructs lower to a safe fallback with a warning in the generated
/// file's comment stream; rename collisions resolve themselves with a
/// disambiguator; annotation conflicts let the annotation win.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("Python parse error")]
    Parse,

    #[error("unsupported source construct: {0}")]
    UnsupportedConstruct(String),

    #[error("type inference error: {0}")]
    TypeInference(String),

    #[error("code generation error: {0}")]
    CodeGeneration(String),

    #[error("internal invariant breach: {0}")]
    InvariantBreach(String),
}

/// Context-aware transpilation error.
#[derive(Debug, Error)]
pub struct TranspileError {
    pub kind: ErrorKind,
    pub location: Option<SourceLocation>,
    pub context: Vec<String>,
}

impl TranspileError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            location: None,
            context: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }
}

impl fmt::Display for TranspileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(loc) = &self.location {
            write!(f, " at {loc}")?;
        }
        if !self.context.is_empty() {
            write!(f, "\n\nContext:")?;
            for (i, ctx) in self.context.iter().enumerate() {
                write!(f, "\n  {}. {}", i + 1, ctx)?;
            }
        }
        Ok(())
    }
}

pub type TranspileResult<T> = Result<T, TranspileError>;

impl From<anyhow::Error> for TranspileError {
    fn from(err: anyhow::Error) -> Self {
        TranspileError::new(ErrorKind::InvariantBreach(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_location_and_context() {
        let err = TranspileError::new(ErrorKind::UnsupportedConstruct("eval".to_string()))
            .with_location(SourceLocation {
                file: "mod.py".to_string(),
                line: 12,
                column: 4,
            })
            .with_context("in function 'run'");
        let rendered = err.to_string();
        assert!(rendered.contains("unsupported source construct: eval"));
        assert!(rendered.contains("mod.py:12:4"));
        assert!(rendered.contains("in function 'run'"));
    }

    #[test]
    fn anyhow_errors_become_invariant_breaches() {
        let err: TranspileError = anyhow::anyhow!("table inconsistency").into();
        assert!(matches!(err.kind, ErrorKind::InvariantBreach(_)));
    }
}
