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

use std::{collections::BTreeSet, time::Duration};

use compact_str::CompactString;
use http::StatusCode;
use serde::{Deserialize, Serialize};

use super::super::header_matcher::HeaderMatcher;
use crate::config::{
    common::{GenericError, WithNodeOnResult},
    deserialize_json_value,
};

/// Configuration of the fault injection filter.
///
/// At least one of `abort` and `delay` must be present, see [`FaultFilter::validate`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct FaultFilter {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub abort: Option<FaultAbort>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub delay: Option<FaultDelay>,
    /// All matchers must match for the filter to act.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub headers: Vec<HeaderMatcher>,
    /// Only act when the request is routed to this cluster.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub upstream_cluster: Option<CompactString>,
    /// Only act when the request comes from one of these downstream nodes.
    #[serde(skip_serializing_if = "BTreeSet::is_empty", default)]
    pub downstream_nodes: BTreeSet<CompactString>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FaultAbort {
    #[serde(default)]
    pub abort_percent: Percent,
    #[serde(with = "http_serde_ext::status_code")]
    pub http_status: StatusCode,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FaultDelay {
    #[serde(rename = "type")]
    pub delay_type: DelayType,
    #[serde(default)]
    pub fixed_delay_percent: Percent,
    #[serde(default)]
    pub fixed_duration_ms: u64,
}

impl FaultDelay {
    pub fn fixed_duration(&self) -> Duration {
        Duration::from_millis(self.fixed_duration_ms)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelayType {
    Fixed,
}

/// An integer percentage in `[0, 100]`.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[serde(try_from = "u64", into = "u64")]
pub struct Percent(u64);

impl Percent {
    pub const MAX: Percent = Percent(100);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for Percent {
    type Error = GenericError;
    fn try_from(value: u64) -> Result<Self, Self::Error> {
        if value > 100 {
            return Err(GenericError::from_msg(format!("percentage {value} is out of range [0, 100]")));
        }
        Ok(Percent(value))
    }
}

impl From<Percent> for u64 {
    fn from(value: Percent) -> Self {
        value.0
    }
}

impl FaultFilter {
    /// Parses and validates the raw JSON handed to the filter factory.
    pub fn from_json(value: serde_json::Value) -> Result<Self, GenericError> {
        let config: Self = deserialize_json_value(value)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GenericError> {
        if self.abort.is_none() && self.delay.is_none() {
            return Err(GenericError::from_msg(
                "fault filter must have at least abort or delay specified in the config.",
            ));
        }
        if let Some(abort) = &self.abort {
            if abort.http_status.is_informational() {
                return Err(GenericError::from_msg(format!("{} is not a valid abort status", abort.http_status)))
                    .with_node("http_status")
                    .with_node("abort");
            }
        }
        Ok(())
    }

    /// Target cluster, if the filter is restricted to one. An empty name means no restriction.
    pub fn upstream_cluster(&self) -> Option<&str> {
        self.upstream_cluster.as_deref().filter(|c| !c.is_empty())
    }
}
