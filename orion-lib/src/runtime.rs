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

//! Runtime flags: hot-reloadable values read by key at request time.

use std::{collections::BTreeMap, fmt, sync::Arc};

use arc_swap::ArcSwap;
use compact_str::CompactString;
use orion_configuration::config::{runtime::RuntimeValue, RuntimeLayer};
use orion_error::Context;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::Result;

/// Source of randomness used by [`Snapshot::feature_enabled`].
pub trait RandomGenerator: Send + Sync {
    fn random(&self) -> u64;
}

/// Thread local RNG of the `rand` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomGenerator for ThreadRandom {
    fn random(&self) -> u64 {
        rand::random()
    }
}

/// An immutable view of the runtime flags.
pub trait Snapshot: Send + Sync {
    /// Samples the feature: true for `percent` out of 100 calls on average, where `percent` is
    /// the integer stored under `key`, or `default_percent` when the key is unset.
    fn feature_enabled(&self, key: &str, default_percent: u64) -> bool;

    fn get_integer(&self, key: &str, default: u64) -> u64;

    fn get_bool(&self, key: &str, default: bool) -> bool;

    fn get(&self, key: &str) -> Option<&RuntimeValue>;
}

pub trait Loader: Send + Sync {
    fn snapshot(&self) -> Arc<dyn Snapshot>;
}

pub struct RuntimeSnapshot {
    values: BTreeMap<CompactString, RuntimeValue>,
    random: Arc<dyn RandomGenerator>,
}

impl fmt::Debug for RuntimeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeSnapshot").field("values", &self.values).finish_non_exhaustive()
    }
}

impl RuntimeSnapshot {
    pub fn new(values: BTreeMap<CompactString, RuntimeValue>, random: Arc<dyn RandomGenerator>) -> Self {
        Self { values, random }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Snapshot for RuntimeSnapshot {
    fn feature_enabled(&self, key: &str, default_percent: u64) -> bool {
        self.random.random() % 100 < self.get_integer(key, default_percent)
    }

    fn get_integer(&self, key: &str, default: u64) -> u64 {
        self.get(key).and_then(RuntimeValue::as_integer).unwrap_or(default)
    }

    fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(RuntimeValue::as_bool).unwrap_or(default)
    }

    fn get(&self, key: &str) -> Option<&RuntimeValue> {
        self.values.get(key)
    }
}

/// Owns the current runtime snapshot and publishes new ones on reload.
///
/// Readers call [`Loader::snapshot`] and keep the returned `Arc` for as long as they need a
/// consistent view; a concurrent [`RuntimeLoader::update`] never blocks them.
pub struct RuntimeLoader {
    layer: Mutex<RuntimeLayer>,
    current: ArcSwap<RuntimeSnapshot>,
    random: Arc<dyn RandomGenerator>,
}

impl fmt::Debug for RuntimeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeLoader").field("layer", &*self.layer.lock()).finish_non_exhaustive()
    }
}

impl RuntimeLoader {
    pub fn new(layer: RuntimeLayer) -> Result<Self> {
        Self::with_random(layer, Arc::new(ThreadRandom))
    }

    pub fn with_random(layer: RuntimeLayer, random: Arc<dyn RandomGenerator>) -> Result<Self> {
        let values = layer.load_values().context("failed to load runtime layers")?;
        debug!("runtime loaded with {} values", values.len());
        let current = ArcSwap::from_pointee(RuntimeSnapshot::new(values, Arc::clone(&random)));
        Ok(Self { layer: Mutex::new(layer), current, random })
    }

    /// Replaces the runtime layers and publishes a new snapshot.
    ///
    /// On error the previous snapshot stays in place.
    pub fn update(&self, layer: RuntimeLayer) -> Result<()> {
        let values = layer.load_values().context("failed to load runtime layers")?;
        info!("publishing runtime snapshot with {} values", values.len());
        self.current.store(Arc::new(RuntimeSnapshot::new(values, Arc::clone(&self.random))));
        *self.layer.lock() = layer;
        Ok(())
    }

    /// Re-reads the override layer file of the current layers.
    pub fn reload(&self) -> Result<()> {
        let layer = self.layer.lock().clone();
        self.update(layer)
    }
}

impl Loader for RuntimeLoader {
    fn snapshot(&self) -> Arc<dyn Snapshot> {
        self.current.load_full()
    }
}
