// Copyright 2025 The kmesh Authors
//
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//

//! Crate-agnostic error type shared by the orion crates.
//!
//! [`Error`] wraps any `std::error::Error + Send + Sync` (as well as plain string
//! messages) and can be decorated with context messages through the [`Context`]
//! extension trait:
//!
//! ```rust
//! use orion_error::{Context, Result};
//!
//! fn read() -> Result<String> {
//!     std::fs::read_to_string("/does/not/exist").context("failed to read runtime layer")
//! }
//! assert!(read().is_err());
//! ```

use std::{borrow::Cow, error::Error as ErrorTrait, fmt};

pub type BoxedError = Box<dyn ErrorTrait + Send + Sync + 'static>;
pub type Result<T> = ::core::result::Result<T, Error>;

pub struct Error {
    repr: Repr,
}

enum Repr {
    Boxed(BoxedError),
    Context { msg: Cow<'static, str>, source: Box<Error> },
}

impl Error {
    /// Wraps this error with an additional context message.
    #[must_use]
    pub fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Self {
        Error { repr: Repr::Context { msg: msg.into(), source: Box::new(self) } }
    }

    /// The innermost error, stripped of all context messages.
    pub fn root_cause(&self) -> &(dyn ErrorTrait + Send + Sync + 'static) {
        match &self.repr {
            Repr::Boxed(err) => err.as_ref(),
            Repr::Context { source, .. } => source.root_cause(),
        }
    }

    /// Searches the root cause and its `source()` chain for an error of type `E`.
    pub fn downcast_ref<E: ErrorTrait + 'static>(&self) -> Option<&E> {
        let mut err: &(dyn ErrorTrait + 'static) = self.root_cause();
        loop {
            if let Some(found) = err.downcast_ref::<E>() {
                return Some(found);
            }
            err = err.source()?;
        }
    }

    /// Context messages from the outermost to the innermost.
    pub fn contexts(&self) -> Vec<&str> {
        let mut out = Vec::new();
        let mut current = self;
        while let Repr::Context { msg, source } = &current.repr {
            out.push(msg.as_ref());
            current = source;
        }
        out
    }
}

impl<E> From<E> for Error
where
    E: Into<BoxedError>,
{
    fn from(err: E) -> Self {
        Error { repr: Repr::Boxed(err.into()) }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Boxed(err) => write!(f, "{err}"),
            Repr::Context { msg, source } => write!(f, "{msg}: {source}"),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Boxed(err) => {
                write!(f, "{err:?}")?;
                let mut source = err.source();
                while let Some(cause) = source {
                    write!(f, "\n  caused by: {cause}")?;
                    source = cause.source();
                }
                Ok(())
            },
            Repr::Context { msg, source } => write!(f, "{msg}\n  caused by: {source:?}"),
        }
    }
}

pub trait Context<T> {
    fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T>;

    fn with_context_msg<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T>;

    fn with_context<M, F>(self, f: F) -> Result<T>
    where
        M: Into<Cow<'static, str>>,
        F: FnOnce() -> M;
}

impl<T, E> Context<T> for ::core::result::Result<T, E>
where
    E: Into<Error>,
{
    fn context<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        self.map_err(|e| e.into().context(msg))
    }

    fn with_context_msg<M: Into<Cow<'static, str>>>(self, msg: M) -> Result<T> {
        self.context(msg)
    }

    fn with_context<M, F>(self, f: F) -> Result<T>
    where
        M: Into<Cow<'static, str>>,
        F: FnOnce() -> M,
    {
        self.map_err(|e| e.into().context(f()))
    }
}
