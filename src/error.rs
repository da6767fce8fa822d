use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the template engine.
///
/// Parse errors are only produced while compiling a template; every other
/// variant is an evaluation error surfaced from the render API.
#[derive(Error, Debug)]
pub enum Error {
    #[error("parse error at offset {offset}: {message}")]
    Parse { message: String, offset: usize },

    #[error("unknown filter: {0}")]
    MissingFilter(String),

    #[error("filter '{filter}': {message}")]
    FilterArgument { filter: String, message: String },

    #[error("template loader error: {0}")]
    Loader(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("include recursion limit of {0} exceeded")]
    RecursionLimit(usize),

    #[error("cyclic include detected: {0}")]
    CyclicInclude(String),

    #[error("render step limit of {0} exceeded")]
    StepLimit(usize),

    #[error("loop iteration limit of {0} exceeded")]
    IterationLimit(usize),

    #[error("output size limit of {0} bytes exceeded")]
    OutputLimit(usize),

    #[error("render cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn parse(message: impl Into<String>, offset: usize) -> Self {
        Self::Parse {
            message: message.into(),
            offset,
        }
    }

    pub fn loader(message: impl Into<String>) -> Self {
        Self::Loader(message.into())
    }

    pub fn filter_argument(filter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::FilterArgument {
            filter: filter.into(),
            message: message.into(),
        }
    }

    /// True when the error came out of the parser rather than a render.
    pub fn is_parse_error(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }

    /// Stable code for logging and API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "E_PARSE",
            Error::MissingFilter(_) => "E_MISSING_FILTER",
            Error::FilterArgument { .. } => "E_FILTER_ARGUMENT",
            Error::Loader(_) => "E_LOADER",
            Error::TemplateNotFound(_) => "E_TEMPLATE_NOT_FOUND",
            Error::RecursionLimit(_) => "E_RECURSION_LIMIT",
            Error::CyclicInclude(_) => "E_CYCLIC_INCLUDE",
            Error::StepLimit(_) => "E_STEP_LIMIT",
            Error::IterationLimit(_) => "E_ITERATION_LIMIT",
            Error::OutputLimit(_) => "E_OUTPUT_LIMIT",
            Error::Cancelled => "E_CANCELLED",
            Error::Io(_) => "E_IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_carries_offset() {
        let err = Error::parse("expected '%}'", 42);
        assert!(err.is_parse_error());
        assert_eq!(err.to_string(), "parse error at offset 42: expected '%}'");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MissingFilter("nope".into()).error_code(), "E_MISSING_FILTER");
        assert_eq!(Error::Cancelled.error_code(), "E_CANCELLED");
    }
}
