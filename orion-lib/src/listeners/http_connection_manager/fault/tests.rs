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

use std::sync::atomic::Ordering;

use bytes::Bytes;
use orion_configuration::config::{
    network_filters::http_connection_manager::http_filters::HttpFilter, runtime::RuntimeValue,
    HttpConnectionManager as HttpConnectionManagerConfig, RuntimeLayer,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing_test::traced_test;

use super::*;
use crate::{
    dispatcher::{Dispatcher, TimerEvent, TimerTarget},
    listeners::http_connection_manager::{
        filter_registry::HttpFilterRegistry,
        tests::{request_head, route_to},
        FilterChainFactory, HttpConnection, RequestInfo, RouteEntry, StreamId, StreamOutcome,
    },
    runtime::{
        tests::{layer, CountingRandom, FixedRandom},
        RandomGenerator, RuntimeLoader,
    },
    DispatcherError,
};

const PREFIX: &str = "prefix.";

struct Harness {
    conn: HttpConnection,
    store: Store,
    runtime: Arc<RuntimeLoader>,
}

impl Harness {
    fn new(config: Value) -> Self {
        Self::with_runtime(config, &[], Arc::new(FixedRandom(0)))
    }

    fn with_runtime(config: Value, values: &[(&str, RuntimeValue)], random: Arc<dyn RandomGenerator>) -> Self {
        let runtime = Arc::new(RuntimeLoader::with_random(layer(values), random).unwrap());
        let store = Store::new();
        let context = FactoryContext { runtime: runtime.clone(), stats: store.clone() };
        let hcm = HttpConnectionManagerConfig {
            stat_prefix: PREFIX.into(),
            http_filters: vec![HttpFilter { name: "fault".into(), kind: HttpFilterKind::Decoder, disabled: false, config }],
        };
        let chain = FilterChainFactory::new(&hcm, &HttpFilterRegistry::with_default_filters(), &context).unwrap();
        Self { conn: HttpConnection::new(Arc::new(chain), route_to("www1")), store, runtime }
    }

    fn request(&mut self, headers: &[(&str, &str)]) -> StreamId {
        let id = self.conn.new_stream();
        self.conn.decode_headers(id, request_head("/", headers), true).unwrap();
        id
    }

    fn counter(&self, name: &str) -> u64 {
        self.store.counter_value(&format!("{PREFIX}{name}")).unwrap_or(0)
    }

    fn flags(&self, id: StreamId) -> ResponseFlags {
        self.conn.stream(id).unwrap().request_info().response_flags()
    }

    fn reply_status(&self, id: StreamId) -> Option<StatusCode> {
        self.conn.stream(id).unwrap().local_reply().map(http::Response::status)
    }

    fn forwarded(&self, id: StreamId) -> bool {
        self.conn.stream(id).unwrap().forwarded().end_stream
    }
}

fn abort_config(percent: u64, status: u16) -> Value {
    json!({ "abort": { "abort_percent": percent, "http_status": status } })
}

fn delay_config(percent: u64, duration_ms: u64) -> Value {
    json!({ "delay": { "type": "fixed", "fixed_delay_percent": percent, "fixed_duration_ms": duration_ms } })
}

#[derive(Default)]
struct MockCallbacks {
    route: Option<Arc<RouteEntry>>,
    info: RequestInfo,
    replies: Vec<StatusCode>,
    continued: usize,
    dispatcher: Option<(Dispatcher, mpsc::UnboundedReceiver<TimerEvent>)>,
}

impl MockCallbacks {
    fn with_dispatcher() -> Self {
        Self { dispatcher: Some(Dispatcher::new()), ..Default::default() }
    }
}

impl DecoderFilterCallbacks for MockCallbacks {
    fn stream_id(&self) -> StreamId {
        StreamId(7)
    }

    fn route(&self) -> Option<Arc<RouteEntry>> {
        self.route.clone()
    }

    fn create_timer(&mut self, duration: Duration) -> std::result::Result<Timer, DispatcherError> {
        let (dispatcher, _) = self.dispatcher.as_ref().ok_or(DispatcherError::NoReactor)?;
        dispatcher.create_timer(TimerTarget { stream_id: StreamId(7), filter_index: 0 }, duration)
    }

    fn continue_decoding(&mut self) {
        self.continued += 1;
    }

    fn send_local_reply(&mut self, status: StatusCode) {
        self.replies.push(status);
    }

    fn set_response_flag(&mut self, flag: ResponseFlags) {
        self.info.set_response_flag(flag);
    }

    fn request_info(&self) -> &RequestInfo {
        &self.info
    }
}

fn filter(config: Value, values: &[(&str, RuntimeValue)]) -> (FaultFilter, Store) {
    let runtime = Arc::new(RuntimeLoader::with_random(layer(values), Arc::new(FixedRandom(0))).unwrap());
    let store = Store::new();
    let config = FaultConfig::from_json(config).unwrap();
    let config = FaultFilterConfig::new(config, runtime, PREFIX, &store).unwrap();
    (FaultFilter::new(Arc::new(config)), store)
}

#[test]
fn config_without_abort_or_delay_is_rejected() {
    let runtime = Arc::new(RuntimeLoader::new(RuntimeLayer::default()).unwrap());
    let err = FaultFilterConfig::new(FaultConfig::default(), runtime, PREFIX, &Store::new()).err().unwrap();
    assert_eq!(err.to_string(), "fault filter must have at least abort or delay specified in the config.");
}

#[test]
fn stats_are_registered_with_the_prefix() {
    let (filter, store) = filter(abort_config(0, 503), &[]);
    assert_eq!(filter.config.stats().aborts_injected.value(), 0);
    let names: Vec<_> = store.counters().into_iter().map(|(name, _)| name).collect();
    assert_eq!(names, ["prefix.fault.aborts_injected", "prefix.fault.delays_injected"]);
}

#[tokio::test(start_paused = true)]
async fn fixed_delay_then_resume() {
    let mut h = Harness::new(delay_config(100, 5000));
    let start = tokio::time::Instant::now();
    let id = h.request(&[]);

    assert_eq!(h.conn.stream(id).unwrap().stopped_at(), Some(0));
    assert_eq!(h.flags(id), ResponseFlags::DELAY_INJECTED);
    assert_eq!(h.counter("fault.delays_injected"), 1);
    assert!(!h.forwarded(id));

    h.conn.next_event().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(5000));
    assert!(h.forwarded(id));
    assert_eq!(h.reply_status(id), None);
    assert_eq!(h.counter("fault.delays_injected"), 1);
    assert_eq!(h.counter("fault.aborts_injected"), 0);
    assert_eq!(h.flags(id), ResponseFlags::DELAY_INJECTED);
}

#[tokio::test(start_paused = true)]
async fn zero_duration_aborts_immediately() {
    let config = json!({
        "abort": { "abort_percent": 100, "http_status": 503 },
        "delay": { "type": "fixed", "fixed_delay_percent": 100, "fixed_duration_ms": 0 }
    });
    let mut h = Harness::new(config);
    let start = tokio::time::Instant::now();
    let id = h.request(&[]);

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(h.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(h.flags(id), ResponseFlags::FAULT_INJECTED);
    assert_eq!(h.counter("fault.delays_injected"), 0);
    assert_eq!(h.counter("fault.aborts_injected"), 1);
}

#[tokio::test]
async fn abort_sends_local_reply() {
    let mut h = Harness::new(abort_config(100, 503));
    let id = h.request(&[]);

    assert_eq!(h.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(h.flags(id), ResponseFlags::FAULT_INJECTED);
    assert_eq!(h.counter("fault.aborts_injected"), 1);
    assert!(h.conn.stream(id).unwrap().forwarded().head.is_none());

    let completed = h.conn.take_completed();
    assert!(matches!(&completed[0].outcome, StreamOutcome::LocalReply(r) if r.status() == 503));
    assert_eq!(completed[0].request_info.response_code(), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test(start_paused = true)]
async fn delay_followed_by_abort() {
    let config = json!({
        "abort": { "abort_percent": 100, "http_status": 429 },
        "delay": { "type": "fixed", "fixed_delay_percent": 100, "fixed_duration_ms": 200 }
    });
    let mut h = Harness::new(config);
    let id = h.conn.new_stream();
    h.conn.decode_headers(id, request_head("/", &[]), false).unwrap();
    h.conn.decode_data(id, Bytes::from_static(b"payload"), true).unwrap();
    assert_eq!(h.reply_status(id), None);
    assert_eq!(h.conn.stream(id).unwrap().buffered_frames(), 1);

    h.conn.next_event().await.unwrap();
    assert_eq!(h.reply_status(id), Some(StatusCode::TOO_MANY_REQUESTS));
    assert_eq!(h.flags(id), ResponseFlags::DELAY_INJECTED | ResponseFlags::FAULT_INJECTED);
    assert_eq!(h.counter("fault.delays_injected"), 1);
    assert_eq!(h.counter("fault.aborts_injected"), 1);
    let stream = h.conn.stream(id).unwrap();
    assert_eq!(stream.buffered_frames(), 0);
    assert!(stream.forwarded().body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn body_received_during_delay_is_forwarded() {
    let mut h = Harness::new(delay_config(100, 1000));
    let id = h.conn.new_stream();
    h.conn.decode_headers(id, request_head("/", &[]), false).unwrap();
    h.conn.decode_data(id, Bytes::from_static(b"abc"), false).unwrap();
    let mut trailers = http::HeaderMap::new();
    trailers.insert("x-checksum", "1".parse().unwrap());
    h.conn.decode_trailers(id, trailers).unwrap();
    assert_eq!(h.conn.stream(id).unwrap().buffered_frames(), 2);

    h.conn.next_event().await.unwrap();
    let forwarded = h.conn.stream(id).unwrap().forwarded();
    assert_eq!(&forwarded.body[..], b"abc");
    assert!(forwarded.trailers.is_some());
    assert!(forwarded.end_stream);
}

#[tokio::test]
async fn upstream_cluster_gate() {
    let mut config = abort_config(100, 503);
    config["upstream_cluster"] = json!("other");
    let mut h = Harness::new(config);
    let id = h.request(&[]);
    assert!(h.forwarded(id));
    assert_eq!(h.flags(id), ResponseFlags::empty());
    assert_eq!(h.counter("fault.aborts_injected"), 0);

    let mut config = abort_config(100, 503);
    config["upstream_cluster"] = json!("www1");
    let mut h = Harness::new(config);
    let id = h.request(&[]);
    assert_eq!(h.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[test]
fn upstream_cluster_gate_without_route() {
    let mut config = abort_config(100, 503);
    config["upstream_cluster"] = json!("www1");
    let (mut filter, store) = filter(config, &[]);
    let mut callbacks = MockCallbacks::default();
    let status = filter.decode_headers(&mut request_head("/", &[]), true, &mut callbacks);
    assert_eq!(status, FilterHeadersStatus::Continue);
    assert_eq!(filter.state(), FaultState::PassThrough);
    assert!(callbacks.replies.is_empty());
    assert_eq!(store.counter_value("prefix.fault.aborts_injected"), Some(0));
}

#[tokio::test]
async fn downstream_nodes_gate() {
    let mut config = abort_config(100, 503);
    config["downstream_nodes"] = json!(["canary", "blue"]);
    let mut h = Harness::new(config);

    let missing = h.request(&[]);
    let other = h.request(&[("x-envoy-downstream-service-node", "green")]);
    let listed = h.request(&[("x-envoy-downstream-service-node", "blue")]);

    assert!(h.forwarded(missing));
    assert!(h.forwarded(other));
    assert_eq!(h.flags(missing) | h.flags(other), ResponseFlags::empty());
    assert_eq!(h.reply_status(listed), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(h.counter("fault.aborts_injected"), 1);
}

#[tokio::test]
async fn header_matchers_gate() {
    let mut config = abort_config(100, 503);
    config["headers"] = json!([
        { "name": "x-user", "value": "tester" },
        { "name": "x-build", "regex": true, "value": "v[0-9]+" }
    ]);
    let mut h = Harness::new(config);

    let partial = h.request(&[("x-user", "tester")]);
    let wrong = h.request(&[("x-user", "tester"), ("x-build", "beta")]);
    let all = h.request(&[("x-user", "tester"), ("x-build", "v42")]);

    assert!(h.forwarded(partial));
    assert!(h.forwarded(wrong));
    assert_eq!(h.reply_status(all), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(h.counter("fault.aborts_injected"), 1);
}

#[tokio::test]
async fn downstream_cluster_override() {
    let values = [("fault.http.foo.abort.abort_percent", RuntimeValue::Integer(100))];
    let mut h = Harness::with_runtime(abort_config(0, 503), &values, Arc::new(FixedRandom(0)));

    let global = h.request(&[]);
    let other = h.request(&[("x-envoy-downstream-service-cluster", "bar")]);
    let foo = h.request(&[("x-envoy-downstream-service-cluster", "foo")]);

    assert!(h.forwarded(global));
    assert!(h.forwarded(other));
    assert_eq!(h.reply_status(foo), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert_eq!(h.counter("fault.aborts_injected"), 1);
    assert_eq!(h.counter("fault.foo.aborts_injected"), 1);
    assert_eq!(h.counter("fault.bar.aborts_injected"), 0);
}

#[tokio::test(start_paused = true)]
async fn downstream_cluster_stats_and_duration() {
    let values = [
        ("fault.http.delay.fixed_duration_ms", RuntimeValue::Integer(300)),
        ("fault.http.foo.delay.fixed_duration_ms", RuntimeValue::Integer(700)),
    ];
    let mut h = Harness::with_runtime(delay_config(100, 5000), &values, Arc::new(FixedRandom(0)));

    let start = tokio::time::Instant::now();
    let plain = h.request(&[]);
    let foo = h.request(&[("x-envoy-downstream-service-cluster", "foo")]);
    assert_eq!(h.counter("fault.delays_injected"), 2);
    assert_eq!(h.counter("fault.foo.delays_injected"), 1);

    h.conn.next_event().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(300));
    assert!(start.elapsed() < Duration::from_millis(700));
    assert!(h.forwarded(plain));
    assert!(!h.forwarded(foo));

    h.conn.next_event().await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(700));
    assert!(h.forwarded(foo));
}

#[tokio::test]
async fn both_samples_are_always_drawn() {
    let random = Arc::new(CountingRandom { value: 0, ..Default::default() });
    let mut h = Harness::with_runtime(abort_config(100, 503), &[], random.clone());

    h.request(&[]);
    // delay (global only) + abort (global only)
    assert_eq!(random.calls.swap(0, Ordering::Relaxed), 2);

    let id = h.request(&[("x-envoy-downstream-service-cluster", "foo")]);
    // the global abort sample already enabled the abort, the downstream one is drawn anyway
    assert_eq!(random.calls.load(Ordering::Relaxed), 4);
    assert_eq!(h.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[tokio::test]
async fn runtime_abort_status() {
    let values = [
        ("fault.http.abort.http_status", RuntimeValue::Integer(502)),
        ("fault.http.foo.abort.http_status", RuntimeValue::Integer(504)),
    ];
    let mut h = Harness::with_runtime(abort_config(100, 503), &values, Arc::new(FixedRandom(0)));
    let global = h.request(&[]);
    let foo = h.request(&[("x-envoy-downstream-service-cluster", "foo")]);
    assert_eq!(h.reply_status(global), Some(StatusCode::BAD_GATEWAY));
    assert_eq!(h.reply_status(foo), Some(StatusCode::GATEWAY_TIMEOUT));
}

#[traced_test]
#[tokio::test]
async fn invalid_runtime_status_falls_back_to_config() {
    let values = [("fault.http.abort.http_status", RuntimeValue::Integer(1200))];
    let mut h = Harness::with_runtime(abort_config(100, 503), &values, Arc::new(FixedRandom(0)));
    let id = h.request(&[]);
    assert_eq!(h.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
    assert!(logs_contain("invalid abort status 1200"));
}

#[tokio::test]
async fn runtime_enabled_abort_without_status_passes_through() {
    let values = [("fault.http.abort.abort_percent", RuntimeValue::Integer(100))];
    let mut h = Harness::with_runtime(delay_config(0, 10), &values, Arc::new(FixedRandom(0)));
    let id = h.request(&[]);
    assert!(h.forwarded(id));
    assert_eq!(h.counter("fault.aborts_injected"), 0);
}

#[tokio::test]
async fn runtime_reload_changes_behavior() {
    let mut h = Harness::new(abort_config(0, 503));
    let before = h.request(&[]);
    assert!(h.forwarded(before));

    h.runtime.update(layer(&[("fault.http.abort.abort_percent", RuntimeValue::Integer(100))])).unwrap();
    let after = h.request(&[]);
    assert_eq!(h.reply_status(after), Some(StatusCode::SERVICE_UNAVAILABLE));
}

#[traced_test]
#[tokio::test(start_paused = true)]
async fn teardown_while_delayed() {
    let config = json!({
        "abort": { "abort_percent": 100, "http_status": 503 },
        "delay": { "type": "fixed", "fixed_delay_percent": 100, "fixed_duration_ms": 5000 }
    });
    let mut h = Harness::new(config);
    let id = h.request(&[]);
    assert_eq!(h.counter("fault.delays_injected"), 1);

    h.conn.reset_stream(id).unwrap();
    assert!(logs_contain("disarming the delay timer"));
    let waited = tokio::time::timeout(Duration::from_secs(60), h.conn.next_event()).await;
    assert!(waited.is_err());
    assert_eq!(h.counter("fault.aborts_injected"), 0);
    assert_eq!(h.conn.active_streams(), 0);
}

#[tokio::test]
async fn outcome_is_deterministic() {
    let mut pass = Harness::new(abort_config(0, 503));
    let mut act = Harness::new(abort_config(100, 503));
    for _ in 0..10 {
        let id = pass.request(&[]);
        assert!(pass.forwarded(id));
        let id = act.request(&[]);
        assert_eq!(act.reply_status(id), Some(StatusCode::SERVICE_UNAVAILABLE));
    }
    assert_eq!(pass.counter("fault.aborts_injected"), 0);
    assert_eq!(act.counter("fault.aborts_injected"), 10);
}

#[tokio::test(start_paused = true)]
async fn stale_timer_is_ignored() {
    let (mut filter, _store) = filter(delay_config(100, 50), &[]);
    let mut callbacks = MockCallbacks::with_dispatcher();
    let status = filter.decode_headers(&mut request_head("/", &[]), true, &mut callbacks);
    assert_eq!(status, FilterHeadersStatus::StopIteration);
    assert_eq!(filter.state(), FaultState::DelayArmed);

    let stale = {
        let (dispatcher, _) = callbacks.dispatcher.as_ref().unwrap();
        dispatcher.create_timer(TimerTarget { stream_id: StreamId(7), filter_index: 0 }, Duration::ZERO).unwrap().id()
    };
    filter.on_timer(stale, &mut callbacks);
    assert_eq!(filter.state(), FaultState::DelayArmed);
    assert_eq!(callbacks.continued, 0);

    let event = callbacks.dispatcher.as_mut().unwrap().1.recv().await.unwrap();
    filter.on_timer(event.timer_id, &mut callbacks);
    assert_eq!(filter.state(), FaultState::ResumedWithoutAbort);
    assert_eq!(callbacks.continued, 1);

    filter.on_timer(event.timer_id, &mut callbacks);
    assert_eq!(callbacks.continued, 1);
}

#[traced_test]
#[test]
fn delay_without_reactor_falls_back_to_abort() {
    let config = json!({
        "abort": { "abort_percent": 100, "http_status": 500 },
        "delay": { "type": "fixed", "fixed_delay_percent": 100, "fixed_duration_ms": 100 }
    });
    let (mut filter, store) = filter(config, &[]);
    let mut callbacks = MockCallbacks::default();
    let status = filter.decode_headers(&mut request_head("/", &[]), true, &mut callbacks);
    assert_eq!(status, FilterHeadersStatus::StopIteration);
    assert_eq!(filter.state(), FaultState::AbortedImmediately);
    assert_eq!(callbacks.replies, [StatusCode::INTERNAL_SERVER_ERROR]);
    assert!(callbacks.info.has_response_flag(ResponseFlags::FAULT_INJECTED));
    assert!(!callbacks.info.has_response_flag(ResponseFlags::DELAY_INJECTED));
    assert_eq!(store.counter_value("prefix.fault.delays_injected"), Some(0));
    assert!(logs_contain("unable to inject delay"));
}

#[test]
fn data_and_trailers_always_continue() {
    let (mut filter, _store) = filter(abort_config(100, 503), &[]);
    let mut callbacks = MockCallbacks::default();
    let mut data = Bytes::from_static(b"x");
    assert_eq!(filter.decode_data(&mut data, false, &mut callbacks), super::super::filter::FilterDataStatus::Continue);
    assert_eq!(
        filter.decode_trailers(&mut http::HeaderMap::new(), &mut callbacks),
        super::super::filter::FilterTrailersStatus::Continue
    );
    assert_eq!(filter.state(), FaultState::Idle);
}

#[test]
fn factory_validates_config() {
    let runtime = Arc::new(RuntimeLoader::new(RuntimeLayer::default()).unwrap());
    let context = FactoryContext { runtime, stats: Store::new() };
    let err = FaultFilterFactory.create_filter_factory(HttpFilterKind::Decoder, &json!({}), PREFIX, &context).err().unwrap();
    assert_eq!(err.to_string(), "fault filter must have at least abort or delay specified in the config.");

    let bad_status = json!({ "abort": { "http_status": "teapot" } });
    let err = FaultFilterFactory.create_filter_factory(HttpFilterKind::Decoder, &bad_status, PREFIX, &context).err().unwrap();
    assert!(err.to_string().contains("abort.http_status"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn downstream_cluster_delay_percent_override() {
    let values = [("fault.http.foo.delay.fixed_delay_percent", RuntimeValue::Integer(100))];
    let mut h = Harness::with_runtime(delay_config(0, 200), &values, Arc::new(FixedRandom(0)));

    let plain = h.request(&[]);
    let foo = h.request(&[("x-envoy-downstream-service-cluster", "foo")]);
    assert!(h.forwarded(plain));
    assert_eq!(h.flags(plain), ResponseFlags::empty());
    assert!(!h.forwarded(foo));
    assert_eq!(h.flags(foo), ResponseFlags::DELAY_INJECTED);
    assert_eq!(h.counter("fault.delays_injected"), 1);
    assert_eq!(h.counter("fault.foo.delays_injected"), 1);

    h.conn.next_event().await.unwrap();
    assert!(h.forwarded(foo));
    assert_eq!(h.reply_status(foo), None);
}

struct ReplyAfter {
    after: Duration,
    timer: Option<Timer>,
}

impl StreamDecoderFilter for ReplyAfter {
    fn name(&self) -> &str {
        "reply-after"
    }

    fn decode_headers(
        &mut self,
        _head: &mut Parts,
        _end_stream: bool,
        callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterHeadersStatus {
        self.timer = callbacks.create_timer(self.after).ok();
        FilterHeadersStatus::Continue
    }

    fn on_timer(&mut self, timer: TimerId, callbacks: &mut dyn DecoderFilterCallbacks) {
        if self.timer.as_ref().map(Timer::id) == Some(timer) {
            self.timer = None;
            callbacks.send_local_reply(StatusCode::FORBIDDEN);
        }
    }

    fn on_destroy(&mut self) {
        self.timer = None;
    }
}

#[tokio::test(start_paused = true)]
async fn local_reply_from_another_filter_cancels_pending_fault() {
    let runtime = Arc::new(RuntimeLoader::with_random(layer(&[]), Arc::new(FixedRandom(0))).unwrap());
    let store = Store::new();
    let context = FactoryContext { runtime, stats: store.clone() };
    let config = json!({
        "abort": { "abort_percent": 100, "http_status": 503 },
        "delay": { "type": "fixed", "fixed_delay_percent": 100, "fixed_duration_ms": 100 }
    });
    let fault = FaultFilterFactory.create_filter_factory(HttpFilterKind::Decoder, &config, PREFIX, &context).unwrap();
    let reply_after: FilterFactoryCb = Arc::new(|chain: &mut FilterChainBuilder| {
        chain.add_stream_decoder_filter(Box::new(ReplyAfter { after: Duration::from_millis(10), timer: None }));
    });
    let chain = FilterChainFactory::from_factories(vec![("reply-after".into(), reply_after), ("fault".into(), fault)]);
    let mut conn = HttpConnection::new(Arc::new(chain), route_to("www1"));

    let id = conn.new_stream();
    conn.decode_headers(id, request_head("/", &[]), true).unwrap();
    assert_eq!(conn.stream(id).unwrap().stopped_at(), Some(1));

    conn.next_event().await.unwrap();
    let waited = tokio::time::timeout(Duration::from_secs(1), conn.next_event()).await;
    assert!(waited.is_err());

    let stream = conn.stream(id).unwrap();
    assert_eq!(stream.local_reply().unwrap().status(), StatusCode::FORBIDDEN);
    assert_eq!(stream.request_info().response_flags(), ResponseFlags::DELAY_INJECTED);
    assert_eq!(store.counter_value("prefix.fault.delays_injected"), Some(1));
    assert_eq!(store.counter_value("prefix.fault.aborts_injected"), Some(0));
}
