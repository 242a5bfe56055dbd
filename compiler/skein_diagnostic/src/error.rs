use skein_ir::LineInfo;
use thiserror::Error;

/// Fatal trace failures.
///
/// These abort the whole trace; no partial graph is considered valid. The
/// enumeration is deliberately short; anything recoverable goes through the
/// [`DiagnosticSink`](crate::DiagnosticSink) instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceError {
    #[error("variadic parameters (*args/**kwargs) are not supported at {line}")]
    VariadicParams { line: LineInfo },

    #[error("unsupported assignment target at {line}")]
    UnsupportedTarget { line: LineInfo },

    #[error("loop unrolling was requested for a non-constant sequence at {line}")]
    UnrollNonConstant { line: LineInfo },

    #[error("trace directive called with non-constant arguments at {line}")]
    NonConstantDirective { line: LineInfo },

    #[error("internal consistency violation: {message} at {line}")]
    Internal { message: String, line: LineInfo },
}

impl TraceError {
    pub fn internal(message: impl Into<String>, line: LineInfo) -> Self {
        TraceError::Internal {
            message: message.into(),
            line,
        }
    }

    pub fn line(&self) -> LineInfo {
        match self {
            TraceError::VariadicParams { line }
            | TraceError::UnsupportedTarget { line }
            | TraceError::UnrollNonConstant { line }
            | TraceError::NonConstantDirective { line }
            | TraceError::Internal { line, .. } => *line,
        }
    }
}

pub type TraceResult<T> = Result<T, TraceError>;
