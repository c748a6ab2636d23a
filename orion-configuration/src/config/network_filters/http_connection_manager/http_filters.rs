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

pub mod fault;

use compact_str::CompactString;
use serde::{Deserialize, Serialize};

use super::is_default;

/// One entry of the HTTP filter list.
///
/// `config` is kept as raw JSON: it is handed to the factory registered under `name`,
/// which owns the schema of its filter.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct HttpFilter {
    pub name: CompactString,
    #[serde(rename = "type")]
    pub kind: HttpFilterKind,
    #[serde(skip_serializing_if = "is_default", default)]
    pub disabled: bool,
    #[serde(skip_serializing_if = "serde_json::Value::is_null", default)]
    pub config: serde_json::Value,
}

/// The direction(s) a filter is installed in.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HttpFilterKind {
    Decoder,
    Encoder,
    Both,
}

impl std::fmt::Display for HttpFilterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Decoder => "decoder",
            Self::Encoder => "encoder",
            Self::Both => "both",
        })
    }
}
