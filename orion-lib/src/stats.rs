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

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use compact_str::CompactString;
use dashmap::DashMap;

/// A monotonic counter. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn inc(&self) {
        self.add(1);
    }

    pub fn add(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Registry of named counters, shared by every worker.
#[derive(Debug, Clone, Default)]
pub struct Store {
    counters: Arc<DashMap<CompactString, Counter>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter registered under `name`, creating it on first use.
    pub fn counter(&self, name: &str) -> Counter {
        if let Some(counter) = self.counters.get(name) {
            return counter.value().clone();
        }
        self.counters.entry(CompactString::from(name)).or_default().value().clone()
    }

    pub fn counter_value(&self, name: &str) -> Option<u64> {
        self.counters.get(name).map(|entry| entry.value().value())
    }

    /// All counters, sorted by name.
    pub fn counters(&self) -> Vec<(CompactString, u64)> {
        let mut all: Vec<_> = self.counters.iter().map(|entry| (entry.key().clone(), entry.value().value())).collect();
        all.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_shared_by_name() {
        let store = Store::new();
        let a = store.counter("ingress_http.fault.aborts_injected");
        let b = store.counter("ingress_http.fault.aborts_injected");
        a.inc();
        b.add(2);
        assert_eq!(store.counter_value("ingress_http.fault.aborts_injected"), Some(3));
        assert_eq!(store.counter_value("ingress_http.fault.delays_injected"), None);
    }

    #[test]
    fn listing_is_sorted() {
        let store = Store::new();
        store.counter("b").inc();
        store.counter("a").add(5);
        assert_eq!(store.counters(), vec![("a".into(), 5), ("b".into(), 1)]);
    }

    #[test]
    fn concurrent_increments() {
        let store = Store::new();
        std::thread::scope(|s| {
            for _ in 0..8 {
                let store = store.clone();
                s.spawn(move || {
                    for i in 0..1000 {
                        store.counter("fault.delays_injected").inc();
                        store.counter(&format!("fault.cluster{}.delays_injected", i % 4)).inc();
                    }
                });
            }
        });
        assert_eq!(store.counter_value("fault.delays_injected"), Some(8000));
        assert_eq!(store.counter_value("fault.cluster3.delays_injected"), Some(2000));
    }
}
