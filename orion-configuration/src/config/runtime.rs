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

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, env::var, fmt::Display, path::PathBuf};

use super::{common::GenericError, deserialize_yaml};

/// Runtime flag layers.
///
/// Runtime flags are hot-reloadable values read by key at request time (for example
/// `fault.http.abort.abort_percent`). The static layer is part of the configuration file,
/// the optional override layer is a flat YAML map stored in a separate file that can be
/// re-read while the proxy is running. Keys in the override layer win.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct RuntimeLayer {
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub static_layer: BTreeMap<CompactString, RuntimeValue>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub override_layer: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone)]
#[serde(untagged)]
pub enum RuntimeValue {
    Bool(bool),
    Integer(u64),
    String(CompactString),
}

impl RuntimeValue {
    /// Integer view of the value. Strings holding a decimal number are accepted,
    /// mirroring how flags are written by hand into layer files.
    pub fn as_integer(&self) -> Option<u64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::String(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::String(s) => s.trim().parse().ok(),
            Self::Integer(_) => None,
        }
    }
}

impl Display for RuntimeValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl RuntimeLayer {
    #[must_use]
    pub fn update_from_env(self) -> Self {
        RuntimeLayer {
            override_layer: var("ORION_RUNTIME_OVERRIDE_LAYER").ok().map(PathBuf::from).or(self.override_layer),
            static_layer: self.static_layer,
        }
    }

    /// Merges the static layer with the override layer file, if any.
    pub fn load_values(&self) -> Result<BTreeMap<CompactString, RuntimeValue>, GenericError> {
        let mut values = self.static_layer.clone();
        if let Some(path) = &self.override_layer {
            let overrides: BTreeMap<CompactString, RuntimeValue> =
                deserialize_yaml(path).map_err(|e| e.with_node("override_layer"))?;
            tracing::debug!("loaded {} runtime overrides from {}", overrides.len(), path.display());
            values.extend(overrides);
        }
        Ok(values)
    }
}
