//! Error primitives shared across the workspace.
//!
//! Library code defines its own typed errors (via `snafu`) for anything a caller is expected to match on. Glue code,
//! such as the process entrypoint or configuration bootstrapping, only needs to report what went wrong, and uses
//! [`GenericError`] for that.
#![deny(warnings)]
#![deny(missing_docs)]

use std::fmt::Display;

/// A type-erased error with an attached chain of context.
pub type GenericError = anyhow::Error;

#[doc(hidden)]
pub use anyhow::anyhow as __generic_error_inner;

/// Constructs a [`GenericError`].
///
/// Accepts a string literal, a format string followed by its arguments, or any value that implements both `Debug` and
/// `Display`. When given an existing `std::error::Error`, its source chain is preserved.
#[macro_export]
macro_rules! generic_error {
    ($msg:literal $(,)?) => { $crate::__generic_error_inner!($msg) };
    ($err:expr $(,)?) => { $crate::__generic_error_inner!($err) };
    ($fmt:expr, $($arg:tt)*) => { $crate::__generic_error_inner!($fmt, $($arg)*) };
}

mod sealed {
    pub trait Sealed {}

    impl<T, E> Sealed for Result<T, E> {}
}

/// Extension methods for attaching context to fallible results.
///
/// This mirrors `anyhow::Context`, but under different method names so that it can be imported alongside
/// `snafu::ResultExt` without the two colliding.
pub trait ErrorContext<T, E>: sealed::Sealed {
    /// Wraps the error, if any, with the given context.
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static;

    /// Wraps the error, if any, with context that is only built when an error actually occurred.
    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ErrorContext<T, E> for Result<T, E>
where
    Result<T, E>: anyhow::Context<T, E>,
{
    fn error_context<C>(self, context: C) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
    {
        anyhow::Context::context(self, context)
    }

    fn with_error_context<C, F>(self, f: F) -> Result<T, GenericError>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        anyhow::Context::with_context(self, f)
    }
}
