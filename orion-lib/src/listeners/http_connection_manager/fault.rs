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

//! Fault injection: delays and aborts requests with a configurable probability.
//!
//! The percentages, delay duration and abort status come from the filter configuration and
//! can be overridden at request time by runtime flags, globally (`fault.http.*`) or for one
//! calling service (`fault.http.<downstream cluster>.*`).

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use compact_str::CompactString;
use http::{request::Parts, HeaderMap, StatusCode};
use orion_configuration::config::{
    deserialize_json_value,
    network_filters::http_connection_manager::{
        header_matcher::{matches_all, HeaderMatcher},
        http_filters::{fault::FaultFilter as FaultConfig, HttpFilterKind},
    },
    GenericError,
};
use orion_http_header::{X_ENVOY_DOWNSTREAM_SERVICE_CLUSTER, X_ENVOY_DOWNSTREAM_SERVICE_NODE};
use tracing::{debug, trace, warn};

use super::{
    filter::{DecoderFilterCallbacks, FilterHeadersStatus, StreamDecoderFilter},
    filter_registry::{FactoryContext, FilterFactoryCb, NamedHttpFilterConfigFactory, RegistryError},
    FilterChainBuilder,
};
use crate::{
    dispatcher::{Timer, TimerId},
    response_flags::ResponseFlags,
    runtime::{Loader, Snapshot},
    stats::{Counter, Store},
    Result,
};

const DELAY_PERCENT_KEY: &str = "fault.http.delay.fixed_delay_percent";
const ABORT_PERCENT_KEY: &str = "fault.http.abort.abort_percent";
const DELAY_DURATION_KEY: &str = "fault.http.delay.fixed_duration_ms";
const ABORT_HTTP_STATUS_KEY: &str = "fault.http.abort.http_status";

pub struct FaultFilterFactory;

impl NamedHttpFilterConfigFactory for FaultFilterFactory {
    fn name(&self) -> &'static str {
        "fault"
    }

    fn create_filter_factory(
        &self,
        kind: HttpFilterKind,
        config: &serde_json::Value,
        stats_prefix: &str,
        context: &FactoryContext,
    ) -> Result<FilterFactoryCb> {
        if kind != HttpFilterKind::Decoder {
            return Err(RegistryError::WrongKind { name: self.name().into(), expected: HttpFilterKind::Decoder }.into());
        }
        let config: FaultConfig = deserialize_json_value(config.clone())?;
        let config = Arc::new(FaultFilterConfig::new(config, Arc::clone(&context.runtime), stats_prefix, &context.stats)?);
        Ok(Arc::new(move |chain: &mut FilterChainBuilder| {
            chain.add_stream_decoder_filter(Box::new(FaultFilter::new(Arc::clone(&config))));
        }))
    }
}

#[derive(Debug, Clone)]
pub struct FaultFilterStats {
    pub delays_injected: Counter,
    pub aborts_injected: Counter,
}

impl FaultFilterStats {
    fn new(prefix: &str, store: &Store) -> Self {
        Self {
            delays_injected: store.counter(&format!("{prefix}fault.delays_injected")),
            aborts_injected: store.counter(&format!("{prefix}fault.aborts_injected")),
        }
    }
}

/// Fault filter settings shared by all the requests of a filter chain.
pub struct FaultFilterConfig {
    abort_percent: u64,
    abort_status: Option<StatusCode>,
    delay_percent: u64,
    delay_duration_ms: u64,
    headers: Vec<HeaderMatcher>,
    upstream_cluster: Option<CompactString>,
    downstream_nodes: BTreeSet<CompactString>,
    runtime: Arc<dyn Loader>,
    stats: FaultFilterStats,
    stats_prefix: CompactString,
    store: Store,
}

impl FaultFilterConfig {
    /// Validates `config` and registers the global counters under `stats_prefix`.
    pub fn new(
        config: FaultConfig,
        runtime: Arc<dyn Loader>,
        stats_prefix: &str,
        store: &Store,
    ) -> std::result::Result<Self, GenericError> {
        config.validate()?;
        let upstream_cluster = config.upstream_cluster().map(CompactString::from);
        Ok(Self {
            abort_percent: config.abort.as_ref().map_or(0, |a| a.abort_percent.get()),
            abort_status: config.abort.as_ref().map(|a| a.http_status),
            delay_percent: config.delay.as_ref().map_or(0, |d| d.fixed_delay_percent.get()),
            delay_duration_ms: config.delay.as_ref().map_or(0, |d| d.fixed_duration_ms),
            headers: config.headers,
            upstream_cluster,
            downstream_nodes: config.downstream_nodes,
            runtime,
            stats: FaultFilterStats::new(stats_prefix, store),
            stats_prefix: stats_prefix.into(),
            store: store.clone(),
        })
    }

    pub fn stats(&self) -> &FaultFilterStats {
        &self.stats
    }

    fn record_delay(&self, downstream: Option<&DownstreamKeys>) {
        if let Some(downstream) = downstream {
            self.store.counter(&format!("{}fault.{}.delays_injected", self.stats_prefix, downstream.cluster)).inc();
        }
        self.stats.delays_injected.inc();
    }

    fn record_abort(&self, downstream: Option<&DownstreamKeys>) {
        if let Some(downstream) = downstream {
            self.store.counter(&format!("{}fault.{}.aborts_injected", self.stats_prefix, downstream.cluster)).inc();
        }
        self.stats.aborts_injected.inc();
    }
}

/// Runtime keys scoped to the calling service.
#[derive(Debug)]
struct DownstreamKeys {
    cluster: CompactString,
    delay_percent: String,
    abort_percent: String,
    delay_duration: String,
    abort_http_status: String,
}

impl DownstreamKeys {
    fn new(cluster: &str) -> Self {
        Self {
            cluster: cluster.into(),
            delay_percent: format!("fault.http.{cluster}.delay.fixed_delay_percent"),
            abort_percent: format!("fault.http.{cluster}.abort.abort_percent"),
            delay_duration: format!("fault.http.{cluster}.delay.fixed_duration_ms"),
            abort_http_status: format!("fault.http.{cluster}.abort.http_status"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultState {
    Idle,
    PassThrough,
    DelayArmed,
    AbortedImmediately,
    ResumedWithoutAbort,
    AbortedAfterDelay,
}

/// Per-request fault filter.
pub struct FaultFilter {
    config: Arc<FaultFilterConfig>,
    downstream: Option<DownstreamKeys>,
    delay_timer: Option<Timer>,
    state: FaultState,
}

impl FaultFilter {
    pub fn new(config: Arc<FaultFilterConfig>) -> Self {
        Self { config, downstream: None, delay_timer: None, state: FaultState::Idle }
    }

    pub fn state(&self) -> FaultState {
        self.state
    }

    fn matches_upstream_cluster(&self, callbacks: &dyn DecoderFilterCallbacks) -> bool {
        match &self.config.upstream_cluster {
            None => true,
            Some(cluster) => callbacks.route().is_some_and(|route| route.cluster_name == *cluster),
        }
    }

    fn matches_downstream_nodes(&self, headers: &HeaderMap) -> bool {
        if self.config.downstream_nodes.is_empty() {
            return true;
        }
        headers
            .get(X_ENVOY_DOWNSTREAM_SERVICE_NODE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|node| self.config.downstream_nodes.contains(node))
    }

    // Both samples are always drawn, so a downstream override adds to the global rate.
    fn is_delay_enabled(&self, snapshot: &dyn Snapshot) -> bool {
        let mut enabled = snapshot.feature_enabled(DELAY_PERCENT_KEY, self.config.delay_percent);
        if let Some(downstream) = &self.downstream {
            enabled |= snapshot.feature_enabled(&downstream.delay_percent, self.config.delay_percent);
        }
        enabled
    }

    fn is_abort_enabled(&self, snapshot: &dyn Snapshot) -> bool {
        let mut enabled = snapshot.feature_enabled(ABORT_PERCENT_KEY, self.config.abort_percent);
        if let Some(downstream) = &self.downstream {
            enabled |= snapshot.feature_enabled(&downstream.abort_percent, self.config.abort_percent);
        }
        enabled
    }

    /// `None` when the delay is not enabled for this request or its duration is zero.
    fn delay_duration(&self, snapshot: &dyn Snapshot) -> Option<Duration> {
        if !self.is_delay_enabled(snapshot) {
            return None;
        }
        let mut duration_ms = snapshot.get_integer(DELAY_DURATION_KEY, self.config.delay_duration_ms);
        if let Some(downstream) = &self.downstream {
            duration_ms = snapshot.get_integer(&downstream.delay_duration, duration_ms);
        }
        (duration_ms > 0).then(|| Duration::from_millis(duration_ms))
    }

    fn abort_status(&self, snapshot: &dyn Snapshot) -> Option<StatusCode> {
        let configured = self.config.abort_status;
        let mut status = snapshot.get_integer(ABORT_HTTP_STATUS_KEY, configured.map_or(0, |s| u64::from(s.as_u16())));
        if let Some(downstream) = &self.downstream {
            status = snapshot.get_integer(&downstream.abort_http_status, status);
        }
        match u16::try_from(status).ok().and_then(|s| StatusCode::from_u16(s).ok()) {
            Some(status) if !status.is_informational() => Some(status),
            _ => {
                warn!("invalid abort status {status} in runtime, using {configured:?}");
                configured
            },
        }
    }

    /// Resolves the abort decision. Returns true when a local reply was sent.
    fn maybe_abort(&self, snapshot: &dyn Snapshot, callbacks: &mut dyn DecoderFilterCallbacks) -> bool {
        if !self.is_abort_enabled(snapshot) {
            return false;
        }
        let Some(status) = self.abort_status(snapshot) else {
            return false;
        };
        debug!(stream_id = callbacks.stream_id().0, status = status.as_u16(), "injecting abort");
        callbacks.send_local_reply(status);
        self.config.record_abort(self.downstream.as_ref());
        callbacks.set_response_flag(ResponseFlags::FAULT_INJECTED);
        true
    }

    fn reset_timer_state(&mut self) {
        if let Some(timer) = self.delay_timer.take() {
            timer.disable();
        }
    }
}

impl StreamDecoderFilter for FaultFilter {
    fn name(&self) -> &str {
        "fault"
    }

    // A delay and an abort are independent: when a delay is injected, the abort decision is
    // taken once the delay has elapsed.
    fn decode_headers(
        &mut self,
        head: &mut Parts,
        _end_stream: bool,
        callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterHeadersStatus {
        if !self.matches_upstream_cluster(callbacks)
            || !self.matches_downstream_nodes(&head.headers)
            || !matches_all(&head.headers, &self.config.headers)
        {
            trace!(stream_id = callbacks.stream_id().0, "request does not match the fault filter");
            self.state = FaultState::PassThrough;
            return FilterHeadersStatus::Continue;
        }

        self.downstream = head
            .headers
            .get(X_ENVOY_DOWNSTREAM_SERVICE_CLUSTER)
            .and_then(|value| value.to_str().ok())
            .filter(|cluster| !cluster.is_empty())
            .map(DownstreamKeys::new);

        let snapshot = self.config.runtime.snapshot();
        if let Some(duration) = self.delay_duration(snapshot.as_ref()) {
            match callbacks.create_timer(duration) {
                Ok(timer) => {
                    debug!(stream_id = callbacks.stream_id().0, duration_ms = duration.as_millis(), "injecting delay");
                    self.delay_timer = Some(timer);
                    self.config.record_delay(self.downstream.as_ref());
                    callbacks.set_response_flag(ResponseFlags::DELAY_INJECTED);
                    self.state = FaultState::DelayArmed;
                    return FilterHeadersStatus::StopIteration;
                },
                Err(e) => warn!(stream_id = callbacks.stream_id().0, "unable to inject delay: {e}"),
            }
        }

        if self.maybe_abort(snapshot.as_ref(), callbacks) {
            self.state = FaultState::AbortedImmediately;
            return FilterHeadersStatus::StopIteration;
        }

        self.state = FaultState::PassThrough;
        FilterHeadersStatus::Continue
    }

    fn on_timer(&mut self, timer: TimerId, callbacks: &mut dyn DecoderFilterCallbacks) {
        if self.delay_timer.as_ref().map(Timer::id) != Some(timer) {
            trace!(stream_id = callbacks.stream_id().0, "ignoring stale timer {timer:?}");
            return;
        }
        self.reset_timer_state();

        let snapshot = self.config.runtime.snapshot();
        if self.maybe_abort(snapshot.as_ref(), callbacks) {
            self.state = FaultState::AbortedAfterDelay;
        } else {
            debug!(stream_id = callbacks.stream_id().0, "delay elapsed, resuming request");
            self.state = FaultState::ResumedWithoutAbort;
            callbacks.continue_decoding();
        }
    }

    fn on_destroy(&mut self) {
        if self.delay_timer.is_some() {
            debug!("request destroyed while delayed, disarming the delay timer");
        }
        self.reset_timer_state();
    }
}

#[cfg(test)]
mod tests;
