use std::fmt::Display;

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error("invalid chat id '{0}': expected a signed integer")]
    InvalidChatId(String),
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can be built from a plain message string.
///
/// Crates implement this for their own `Error` and call [`impl_context!`]
/// next to it.
pub trait FromMessage: Sized {
    fn from_message(message: String) -> Self;

    /// `"<context>: <cause>"`, or just the context when there is no cause.
    fn from_context(context: impl Into<String>, cause: Option<&dyn Display>) -> Self {
        let context = context.into();
        match cause {
            Some(cause) => Self::from_message(format!("{context}: {cause}")),
            None => Self::from_message(context),
        }
    }
}

/// Generate a crate-local `Context` trait giving `Result` and `Option`
/// `.context()` and `.with_context()`, converting into the crate's `Error`.
///
/// Expects `Error: FromMessage` and a `Result<T>` alias in scope.
#[macro_export]
macro_rules! impl_context {
    () => {
        pub trait Context<T>: Sized {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C;

            fn context(self, context: impl Into<String>) -> Result<T> {
                self.with_context(|| context)
            }
        }

        impl<T, E: std::fmt::Display> Context<T> for std::result::Result<T, E> {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.map_err(|cause| {
                    <Error as $crate::FromMessage>::from_context(f(), Some(&cause))
                })
            }
        }

        impl<T> Context<T> for Option<T> {
            fn with_context<C, F>(self, f: F) -> Result<T>
            where
                C: Into<String>,
                F: FnOnce() -> C,
            {
                self.ok_or_else(|| <Error as $crate::FromMessage>::from_context(f(), None))
            }
        }
    };
}
