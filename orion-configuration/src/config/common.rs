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

use std::borrow::Cow;

pub use orion_error::BoxedError;

pub(crate) fn is_default<T: Default + PartialEq>(value: &T) -> bool {
    *value == T::default()
}

/// Configuration error, optionally annotated with the path of the offending node.
#[derive(Debug, thiserror::Error)]
pub enum GenericError {
    #[error("{0}")]
    Message(Cow<'static, str>),
    #[error("{0}: {1}")]
    MessageWithCause(Cow<'static, str>, #[source] BoxedError),
    #[error("{}: {source}", .path.join("."))]
    Traced {
        path: Vec<String>,
        #[source]
        source: Box<GenericError>,
    },
}

impl GenericError {
    pub fn from_msg<M: Into<Cow<'static, str>>>(msg: M) -> Self {
        Self::Message(msg.into())
    }

    pub fn from_msg_with_cause<M, E>(msg: M, cause: E) -> Self
    where
        M: Into<Cow<'static, str>>,
        E: Into<BoxedError>,
    {
        Self::MessageWithCause(msg.into(), cause.into())
    }

    /// Prepends `node` to the path of this error.
    #[must_use]
    pub fn with_node<N: Into<String>>(self, node: N) -> Self {
        match self {
            Self::Traced { mut path, source } => {
                path.insert(0, node.into());
                Self::Traced { path, source }
            },
            other => Self::Traced { path: vec![node.into()], source: Box::new(other) },
        }
    }

    pub fn node_path(&self) -> Option<String> {
        match self {
            Self::Traced { path, .. } => Some(path.join(".")),
            _ => None,
        }
    }
}

pub trait WithNodeOnResult<T> {
    fn with_node<N: Into<String>>(self, node: N) -> Result<T, GenericError>;
}

impl<T, E: Into<GenericError>> WithNodeOnResult<T> for Result<T, E> {
    fn with_node<N: Into<String>>(self, node: N) -> Result<T, GenericError> {
        self.map_err(|e| e.into().with_node(node))
    }
}
