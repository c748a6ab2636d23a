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

pub mod common;
pub mod network_filters;
pub mod runtime;

pub use common::GenericError;
pub use network_filters::http_connection_manager::HttpConnectionManager;
pub use runtime::RuntimeLayer;

use common::is_default;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path};

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(skip_serializing_if = "is_default", default)]
    pub runtime: RuntimeLayer,
    #[serde(skip_serializing_if = "is_default", default)]
    pub http_connection_manager: HttpConnectionManager,
}

pub fn deserialize_yaml<T: DeserializeOwned>(path: &Path) -> Result<T, GenericError> {
    let file = File::open(path).map_err(|e| {
        GenericError::from_msg_with_cause(format!("failed to open config file \"{}\"", path.display()), e)
    })?;
    let deserializer = serde_yaml::Deserializer::from_reader(BufReader::new(file));
    serde_path_to_error::deserialize(deserializer).map_err(|e| {
        let node = e.path().to_string();
        GenericError::from_msg_with_cause(format!("failed to deserialize \"{}\" at {node}", path.display()), e.into_inner())
    })
}

pub fn deserialize_json_value<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, GenericError> {
    serde_path_to_error::deserialize(value).map_err(|e| {
        let node = e.path().to_string();
        GenericError::from_msg_with_cause(format!("invalid value at {node}"), e.into_inner())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_error_reports_the_node() {
        let value = serde_json::json!({ "runtime": { "static_layer": { "a": [1, 2] } } });
        let err = deserialize_json_value::<Config>(value).unwrap_err();
        assert!(err.to_string().contains("runtime.static_layer"), "{err}");
    }

    #[test]
    fn empty_config_is_default() {
        let cfg: Config = deserialize_json_value(serde_json::json!({})).unwrap();
        assert_eq!(cfg, Config::default());
    }
}
