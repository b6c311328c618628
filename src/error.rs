use thiserror::Error;

/// Everything that can go wrong between template text and rendered output.
///
/// The variants mirror the pipeline stage that gave up: `Syntax` for the
/// lexer (and a few structural checks), `Parser` for grammar violations,
/// `Runtime` for operations a well-formed template performs on values that
/// do not support them, and `NotSupported` for language features that are
/// recognized but deliberately left out.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("syntax error: {0}")]
    Syntax(String),

    #[error("parser error: {0}")]
    Parser(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("not supported: {0}")]
    NotSupported(String),
}

impl Error {
    pub(crate) fn syntax(msg: impl Into<String>) -> Self {
        Error::Syntax(msg.into())
    }

    pub(crate) fn parser(msg: impl Into<String>) -> Self {
        Error::Parser(msg.into())
    }

    pub(crate) fn runtime(msg: impl Into<String>) -> Self {
        Error::Runtime(msg.into())
    }

    pub(crate) fn not_supported(msg: impl Into<String>) -> Self {
        Error::NotSupported(msg.into())
    }

    /// The bare message, without the stage prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            Error::Syntax(m) | Error::Parser(m) | Error::Runtime(m) | Error::NotSupported(m) => m,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
