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

use std::{collections::HashMap, fmt, sync::Arc};

use compact_str::CompactString;
use orion_configuration::config::network_filters::http_connection_manager::http_filters::HttpFilterKind;
use tracing::debug;

use super::{fault::FaultFilterFactory, FilterChainBuilder};
use crate::{runtime::Loader, stats::Store, Result};

/// Installs the filters of one factory into a new stream's chain.
pub type FilterFactoryCb = Arc<dyn Fn(&mut FilterChainBuilder) + Send + Sync>;

/// Shared services handed to filter factories.
#[derive(Clone)]
pub struct FactoryContext {
    pub runtime: Arc<dyn Loader>,
    pub stats: Store,
}

impl fmt::Debug for FactoryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactoryContext").field("stats", &self.stats).finish_non_exhaustive()
    }
}

pub trait NamedHttpFilterConfigFactory: Send + Sync {
    fn name(&self) -> &'static str;

    /// Validates `config` and returns the callback that installs the filter into each new stream.
    fn create_filter_factory(
        &self,
        kind: HttpFilterKind,
        config: &serde_json::Value,
        stats_prefix: &str,
        context: &FactoryContext,
    ) -> Result<FilterFactoryCb>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("http filter {0} is already registered")]
    Duplicate(CompactString),
    #[error("unknown http filter {0}")]
    Unknown(CompactString),
    #[error("{name} http filter must be configured as a {expected} filter.")]
    WrongKind { name: CompactString, expected: HttpFilterKind },
}

/// The HTTP filters known to this process, by name.
#[derive(Default)]
pub struct HttpFilterRegistry {
    factories: HashMap<CompactString, Arc<dyn NamedHttpFilterConfigFactory>>,
}

impl fmt::Debug for HttpFilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFilterRegistry").field("filters", &self.names()).finish()
    }
}

impl HttpFilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the filters built into orion.
    pub fn with_default_filters() -> Self {
        let builtin: [Arc<dyn NamedHttpFilterConfigFactory>; 1] = [Arc::new(FaultFilterFactory)];
        Self { factories: builtin.into_iter().map(|f| (CompactString::from(f.name()), f)).collect() }
    }

    pub fn register(&mut self, factory: Arc<dyn NamedHttpFilterConfigFactory>) -> std::result::Result<(), RegistryError> {
        let name = CompactString::from(factory.name());
        if self.factories.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!("registered http filter {name}");
        self.factories.insert(name, factory);
        Ok(())
    }

    pub fn get(&self, name: &str) -> std::result::Result<&dyn NamedHttpFilterConfigFactory, RegistryError> {
        self.factories.get(name).map(AsRef::as_ref).ok_or_else(|| RegistryError::Unknown(name.into()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.factories.keys().map(CompactString::as_str).collect();
        names.sort_unstable();
        names
    }
}
