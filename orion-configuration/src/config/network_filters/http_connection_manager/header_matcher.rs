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
use http::{HeaderMap, HeaderName};
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::is_default;
use crate::config::common::GenericError;

/// Matches a single request header.
///
/// The wire form is `{ name, value?, regex?, invert_match? }`. Without a value the matcher
/// only checks that the header is present. With `regex: true` the value is a regular
/// expression that must match the whole header value.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "HeaderMatcherSpec", into = "HeaderMatcherSpec")]
pub struct HeaderMatcher {
    pub name: HeaderName,
    pub specifier: HeaderMatchSpecifier,
    pub invert_match: bool,
}

#[derive(Debug, Clone)]
pub enum HeaderMatchSpecifier {
    Present,
    Exact(CompactString),
    Regex { pattern: CompactString, regex: Regex },
}

impl PartialEq for HeaderMatchSpecifier {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Present, Self::Present) => true,
            (Self::Exact(a), Self::Exact(b)) => a == b,
            (Self::Regex { pattern: a, .. }, Self::Regex { pattern: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Eq for HeaderMatchSpecifier {}

impl HeaderMatcher {
    pub fn present(name: HeaderName) -> Self {
        Self { name, specifier: HeaderMatchSpecifier::Present, invert_match: false }
    }

    pub fn exact(name: HeaderName, value: impl Into<CompactString>) -> Self {
        Self { name, specifier: HeaderMatchSpecifier::Exact(value.into()), invert_match: false }
    }

    pub fn regex(name: HeaderName, pattern: &str) -> Result<Self, GenericError> {
        Ok(Self { name, specifier: compile_regex(pattern)?, invert_match: false })
    }

    #[must_use]
    pub fn inverted(self) -> Self {
        Self { invert_match: !self.invert_match, ..self }
    }

    pub fn matches(&self, headers: &HeaderMap) -> bool {
        let matched = headers.get(&self.name).is_some_and(|value| match &self.specifier {
            HeaderMatchSpecifier::Present => true,
            HeaderMatchSpecifier::Exact(expected) => value.as_bytes() == expected.as_bytes(),
            HeaderMatchSpecifier::Regex { regex, .. } => value.to_str().is_ok_and(|v| regex.is_match(v)),
        });
        matched != self.invert_match
    }
}

/// True when every matcher matches. An empty list always matches.
pub fn matches_all(headers: &HeaderMap, matchers: &[HeaderMatcher]) -> bool {
    matchers.iter().all(|m| m.matches(headers))
}

fn compile_regex(pattern: &str) -> Result<HeaderMatchSpecifier, GenericError> {
    let regex = Regex::new(&format!("^(?:{pattern})$"))
        .map_err(|e| GenericError::from_msg_with_cause(format!("invalid header regex \"{pattern}\""), e))?;
    Ok(HeaderMatchSpecifier::Regex { pattern: pattern.into(), regex })
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct HeaderMatcherSpec {
    #[serde(with = "http_serde_ext::header_name")]
    name: HeaderName,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    value: Option<CompactString>,
    #[serde(skip_serializing_if = "is_default", default)]
    regex: bool,
    #[serde(skip_serializing_if = "is_default", default)]
    invert_match: bool,
}

impl TryFrom<HeaderMatcherSpec> for HeaderMatcher {
    type Error = GenericError;
    fn try_from(spec: HeaderMatcherSpec) -> Result<Self, Self::Error> {
        let HeaderMatcherSpec { name, value, regex, invert_match } = spec;
        let specifier = match value.filter(|v| !v.is_empty()) {
            None if regex => {
                return Err(GenericError::from_msg(format!("header matcher for \"{name}\" has regex set but no value")))
            },
            None => HeaderMatchSpecifier::Present,
            Some(pattern) if regex => compile_regex(&pattern)?,
            Some(value) => HeaderMatchSpecifier::Exact(value),
        };
        Ok(Self { name, specifier, invert_match })
    }
}

impl From<HeaderMatcher> for HeaderMatcherSpec {
    fn from(matcher: HeaderMatcher) -> Self {
        let HeaderMatcher { name, specifier, invert_match } = matcher;
        let (value, regex) = match specifier {
            HeaderMatchSpecifier::Present => (None, false),
            HeaderMatchSpecifier::Exact(value) => (Some(value), false),
            HeaderMatchSpecifier::Regex { pattern, .. } => (Some(pattern), true),
        };
        Self { name, value, regex, invert_match }
    }
}
