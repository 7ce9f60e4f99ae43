use std::{error::Error as StdError, time::Duration};

use catmandu_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    UrlParse(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] McpTransportError),
    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },
    #[error("the {transport} transport is not supported by this build")]
    UnsupportedTransport { transport: &'static str },
    #[error("{message}")]
    Message { message: String },
    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn external<E>(context: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message { message }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

catmandu_common::impl_context!();

/// Failures of a single JSON-RPC exchange, independent of the transport.
#[derive(Debug, thiserror::Error)]
pub enum McpTransportError {
    #[error("request '{method}' got no response within {timeout:?}")]
    RequestTimeout { method: String, timeout: Duration },
    #[error("connection closed while waiting for '{method}'")]
    Closed { method: String },
    #[error("server returned error on '{method}': code={code} message={message}")]
    Rpc {
        method: String,
        code: i64,
        message: String,
    },
    #[error("server returned HTTP {status} for '{method}': {body}")]
    HttpStatus {
        method: String,
        status: u16,
        body: String,
    },
}

/// Whether the orchestrator may try an invocation again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Retryable,
    Terminal,
}

/// Outcome of a failed handler invocation.
///
/// `Timeout` and `Transport` describe a single failed attempt and are
/// retryable. Once retries run out they are wrapped in `Execution`.
#[derive(Debug, thiserror::Error)]
pub enum InvocationError {
    #[error("handler '{handler}' uses the {transport} transport, which this build does not support")]
    TransportUnsupported {
        handler: String,
        transport: &'static str,
    },
    #[error("handler '{handler}' did not answer '{tool}' within {timeout:?}")]
    Timeout {
        handler: String,
        tool: String,
        timeout: Duration,
    },
    #[error("handler '{handler}' failed on '{tool}': {source}")]
    Transport {
        handler: String,
        tool: String,
        #[source]
        source: Error,
    },
    #[error("handler '{handler}' returned a malformed response for '{tool}': {detail}")]
    ResponseFormat {
        handler: String,
        tool: String,
        detail: String,
    },
    #[error("handler '{handler}' rejected the input for '{tool}': {detail}")]
    Validation {
        handler: String,
        tool: String,
        detail: String,
    },
    #[error("handler '{handler}' gave up on '{tool}' after {attempts} attempt(s): {last}")]
    Execution {
        handler: String,
        tool: String,
        attempts: u32,
        #[source]
        last: Box<InvocationError>,
    },
}

impl InvocationError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => ErrorClass::Retryable,
            Self::TransportUnsupported { .. }
            | Self::ResponseFormat { .. }
            | Self::Validation { .. }
            | Self::Execution { .. } => ErrorClass::Terminal,
        }
    }

    /// True for a timeout, or an exhausted retry loop whose last attempt timed out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Execution { last, .. } => last.is_timeout(),
            _ => false,
        }
    }

    #[must_use]
    pub fn handler(&self) -> &str {
        match self {
            Self::TransportUnsupported { handler, .. }
            | Self::Timeout { handler, .. }
            | Self::Transport { handler, .. }
            | Self::ResponseFormat { handler, .. }
            | Self::Validation { handler, .. }
            | Self::Execution { handler, .. } => handler,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn timeout() -> InvocationError {
        InvocationError::Timeout {
            handler: "echo".into(),
            tool: "echo".into(),
            timeout: Duration::from_secs(1),
        }
    }

    #[test]
    fn per_attempt_failures_are_retryable() {
        assert_eq!(timeout().class(), ErrorClass::Retryable);
        let transport = InvocationError::Transport {
            handler: "echo".into(),
            tool: "echo".into(),
            source: Error::message("broken pipe"),
        };
        assert_eq!(transport.class(), ErrorClass::Retryable);
    }

    #[test]
    fn exhausted_timeout_keeps_its_flavor() {
        let err = InvocationError::Execution {
            handler: "echo".into(),
            tool: "echo".into(),
            attempts: 2,
            last: Box::new(timeout()),
        };
        assert_eq!(err.class(), ErrorClass::Terminal);
        assert!(err.is_timeout());
        assert_eq!(err.handler(), "echo");
        assert!(err.to_string().contains("after 2 attempt(s)"));
    }
}
