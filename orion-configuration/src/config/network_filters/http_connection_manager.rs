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

pub mod header_matcher;
pub mod http_filters;

use compact_str::CompactString;
use http_filters::HttpFilter;
use serde::{Deserialize, Serialize};

pub(crate) use super::super::common::is_default;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct HttpConnectionManager {
    /// Prefix of every stat emitted by the filters of this connection manager, e.g. `ingress_http.`
    #[serde(skip_serializing_if = "CompactString::is_empty", default)]
    pub stat_prefix: CompactString,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub http_filters: Vec<HttpFilter>,
}
