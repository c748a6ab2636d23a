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

//! Decoder side of the HTTP connection manager.
//!
//! Every request gets an [`ActiveStream`] holding one instance of each configured decoder filter.
//! Request headers, body chunks and trailers travel through the filters in order. A filter may
//! pause the chain by returning `StopIteration`; frames that arrive meanwhile are buffered and
//! replayed once the same filter calls `continue_decoding`. A local reply ends decoding and
//! discards whatever was buffered. Frames that make it past the last filter are forwarded to
//! the upstream side, which is outside of this module.

pub mod fault;
pub mod filter;
pub mod filter_registry;

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    sync::Arc,
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use compact_str::CompactString;
use http::{request::Parts, HeaderMap, Response, StatusCode};
use orion_configuration::config::HttpConnectionManager as HttpConnectionManagerConfig;
use orion_error::Context;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use self::{
    filter::{
        DecoderFilterCallbacks, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus, StreamDecoderFilter,
    },
    filter_registry::{FactoryContext, FilterFactoryCb, HttpFilterRegistry},
};
use crate::{
    dispatcher::{Dispatcher, DispatcherError, Timer, TimerEvent, TimerId, TimerTarget},
    response_flags::ResponseFlags,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteEntry {
    pub cluster_name: CompactString,
}

impl RouteEntry {
    pub fn new(cluster_name: impl Into<CompactString>) -> Self {
        Self { cluster_name: cluster_name.into() }
    }
}

/// Selects the route of a request from its head.
pub trait RouteResolver: Send + Sync {
    fn resolve(&self, head: &Parts) -> Option<Arc<RouteEntry>>;
}

impl<F> RouteResolver for F
where
    F: Fn(&Parts) -> Option<Arc<RouteEntry>> + Send + Sync,
{
    fn resolve(&self, head: &Parts) -> Option<Arc<RouteEntry>> {
        self(head)
    }
}

/// Observability record of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestInfo {
    response_flags: ResponseFlags,
    response_code: Option<StatusCode>,
}

impl RequestInfo {
    pub fn set_response_flag(&mut self, flag: ResponseFlags) {
        self.response_flags |= flag;
    }

    pub fn has_response_flag(&self, flag: ResponseFlags) -> bool {
        self.response_flags.contains(flag)
    }

    pub fn response_flags(&self) -> ResponseFlags {
        self.response_flags
    }

    pub fn response_code(&self) -> Option<StatusCode> {
        self.response_code
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("stream {0} does not exist")]
    UnknownStream(StreamId),
    #[error("stream {0} already received the request headers")]
    DuplicateHeaders(StreamId),
    #[error("stream {0} has not received the request headers yet")]
    MissingHeaders(StreamId),
    #[error("stream {0} already received the end of the request")]
    EndOfStream(StreamId),
}

/// Collects the filters of a new stream.
#[derive(Default)]
pub struct FilterChainBuilder {
    filters: Vec<Box<dyn StreamDecoderFilter>>,
}

impl FilterChainBuilder {
    pub fn add_stream_decoder_filter(&mut self, filter: Box<dyn StreamDecoderFilter>) {
        self.filters.push(filter);
    }
}

/// The configured HTTP filters of a connection manager, ready to be instantiated per stream.
pub struct FilterChainFactory {
    factories: Vec<(CompactString, FilterFactoryCb)>,
}

impl fmt::Debug for FilterChainFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.factories.iter().map(|(name, _)| name)).finish()
    }
}

impl FilterChainFactory {
    pub fn new(
        config: &HttpConnectionManagerConfig,
        registry: &HttpFilterRegistry,
        context: &FactoryContext,
    ) -> Result<Self> {
        let mut factories = Vec::with_capacity(config.http_filters.len());
        for filter in &config.http_filters {
            if filter.disabled {
                debug!("skipping disabled http filter {}", filter.name);
                continue;
            }
            let factory = registry.get(&filter.name)?;
            let cb = factory
                .create_filter_factory(filter.kind, &filter.config, &config.stat_prefix, context)
                .with_context(|| format!("failed to create http filter {}", filter.name))?;
            factories.push((filter.name.clone(), cb));
        }
        Ok(Self { factories })
    }

    pub fn from_factories(factories: Vec<(CompactString, FilterFactoryCb)>) -> Self {
        Self { factories }
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.factories.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn create_filter_chain(&self) -> Vec<Box<dyn StreamDecoderFilter>> {
        let mut builder = FilterChainBuilder::default();
        for (_, cb) in &self.factories {
            cb(&mut builder);
        }
        builder.filters
    }
}

/// Whatever went past the last decoder filter.
#[derive(Debug, Default)]
pub struct ForwardedRequest {
    pub head: Option<Parts>,
    pub body: BytesMut,
    pub trailers: Option<HeaderMap>,
    pub end_stream: bool,
}

#[derive(Debug)]
pub enum StreamOutcome {
    LocalReply(Response<()>),
    Forwarded(ForwardedRequest),
}

#[derive(Debug)]
pub struct CompletedStream {
    pub id: StreamId,
    pub request_info: RequestInfo,
    pub outcome: StreamOutcome,
}

enum Frame {
    Headers { head: Parts, end_stream: bool },
    Data { data: Bytes, end_stream: bool },
    Trailers(HeaderMap),
}

impl Frame {
    fn kind(&self) -> &'static str {
        match self {
            Frame::Headers { .. } => "headers",
            Frame::Data { .. } => "data",
            Frame::Trailers(_) => "trailers",
        }
    }
}

enum DecodeState {
    Iterating,
    Stopped { frame: Frame, filter_index: usize },
    LocalReply,
    Forwarded,
}

struct StreamCallbacks<'a> {
    stream_id: StreamId,
    filter_index: usize,
    dispatcher: &'a Dispatcher,
    route: Option<&'a Arc<RouteEntry>>,
    request_info: &'a mut RequestInfo,
    local_reply: &'a mut Option<Response<()>>,
    continue_requested: bool,
}

impl DecoderFilterCallbacks for StreamCallbacks<'_> {
    fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    fn route(&self) -> Option<Arc<RouteEntry>> {
        self.route.cloned()
    }

    fn create_timer(&mut self, duration: Duration) -> std::result::Result<Timer, DispatcherError> {
        self.dispatcher.create_timer(TimerTarget { stream_id: self.stream_id, filter_index: self.filter_index }, duration)
    }

    fn continue_decoding(&mut self) {
        self.continue_requested = true;
    }

    fn send_local_reply(&mut self, status: StatusCode) {
        if let Some(sent) = self.local_reply.as_ref() {
            warn!(stream_id = self.stream_id.0, "local reply {} already sent, ignoring {status}", sent.status());
            return;
        }
        let mut response = Response::new(());
        *response.status_mut() = status;
        self.request_info.response_code = Some(status);
        *self.local_reply = Some(response);
    }

    fn set_response_flag(&mut self, flag: ResponseFlags) {
        self.request_info.set_response_flag(flag);
    }

    fn request_info(&self) -> &RequestInfo {
        &*self.request_info
    }
}

/// One request and the decoder filters processing it.
pub struct ActiveStream {
    id: StreamId,
    filters: Vec<Box<dyn StreamDecoderFilter>>,
    dispatcher: Dispatcher,
    state: DecodeState,
    buffered: VecDeque<Frame>,
    route: Option<Arc<RouteEntry>>,
    request_info: RequestInfo,
    local_reply: Option<Response<()>>,
    forwarded: ForwardedRequest,
    headers_received: bool,
    end_stream_received: bool,
    filters_destroyed: bool,
}

impl ActiveStream {
    fn new(id: StreamId, filters: Vec<Box<dyn StreamDecoderFilter>>, dispatcher: Dispatcher) -> Self {
        Self {
            id,
            filters,
            dispatcher,
            state: DecodeState::Iterating,
            buffered: VecDeque::new(),
            route: None,
            request_info: RequestInfo::default(),
            local_reply: None,
            forwarded: ForwardedRequest::default(),
            headers_received: false,
            end_stream_received: false,
            filters_destroyed: false,
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.request_info
    }

    pub fn route(&self) -> Option<&Arc<RouteEntry>> {
        self.route.as_ref()
    }

    pub fn local_reply(&self) -> Option<&Response<()>> {
        self.local_reply.as_ref()
    }

    pub fn forwarded(&self) -> &ForwardedRequest {
        &self.forwarded
    }

    /// Index of the filter that paused the chain, if any.
    pub fn stopped_at(&self) -> Option<usize> {
        match &self.state {
            DecodeState::Stopped { filter_index, .. } => Some(*filter_index),
            _ => None,
        }
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffered.len()
    }

    /// Decoding is over: a local reply was sent or the whole request was forwarded.
    pub fn is_complete(&self) -> bool {
        matches!(self.state, DecodeState::LocalReply | DecodeState::Forwarded)
    }

    fn decode_headers(
        &mut self,
        head: Parts,
        end_stream: bool,
        router: &dyn RouteResolver,
    ) -> std::result::Result<(), StreamError> {
        if self.headers_received {
            return Err(StreamError::DuplicateHeaders(self.id));
        }
        self.headers_received = true;
        self.end_stream_received = end_stream;
        self.route = router.resolve(&head);
        trace!(stream_id = self.id.0, "request {} {} routed to {:?}", head.method, head.uri, self.route);
        self.process(Frame::Headers { head, end_stream });
        Ok(())
    }

    fn decode_data(&mut self, data: Bytes, end_stream: bool) -> std::result::Result<(), StreamError> {
        self.check_open()?;
        self.end_stream_received = end_stream;
        self.process(Frame::Data { data, end_stream });
        Ok(())
    }

    fn decode_trailers(&mut self, trailers: HeaderMap) -> std::result::Result<(), StreamError> {
        self.check_open()?;
        self.end_stream_received = true;
        self.process(Frame::Trailers(trailers));
        Ok(())
    }

    fn check_open(&self) -> std::result::Result<(), StreamError> {
        if !self.headers_received {
            return Err(StreamError::MissingHeaders(self.id));
        }
        if self.end_stream_received {
            return Err(StreamError::EndOfStream(self.id));
        }
        Ok(())
    }

    fn process(&mut self, frame: Frame) {
        match self.state {
            DecodeState::Iterating => self.run_frame(frame, 0),
            DecodeState::Stopped { .. } => {
                trace!(stream_id = self.id.0, "chain stopped, buffering {}", frame.kind());
                self.buffered.push_back(frame);
            },
            DecodeState::LocalReply | DecodeState::Forwarded => {
                trace!(stream_id = self.id.0, "decoding is over, discarding {}", frame.kind());
            },
        }
    }

    fn call_filter<R>(
        &mut self,
        filter_index: usize,
        call: impl FnOnce(&mut dyn StreamDecoderFilter, &mut dyn DecoderFilterCallbacks) -> R,
    ) -> Option<(R, bool)> {
        let filter = self.filters.get_mut(filter_index)?;
        let mut callbacks = StreamCallbacks {
            stream_id: self.id,
            filter_index,
            dispatcher: &self.dispatcher,
            route: self.route.as_ref(),
            request_info: &mut self.request_info,
            local_reply: &mut self.local_reply,
            continue_requested: false,
        };
        let result = call(filter.as_mut(), &mut callbacks);
        Some((result, callbacks.continue_requested))
    }

    fn run_frame(&mut self, mut frame: Frame, start: usize) {
        for filter_index in start..self.filters.len() {
            let Some((stop, continue_requested)) = self.call_filter(filter_index, |filter, callbacks| match &mut frame {
                Frame::Headers { head, end_stream } => {
                    filter.decode_headers(head, *end_stream, callbacks) == FilterHeadersStatus::StopIteration
                },
                Frame::Data { data, end_stream } => {
                    filter.decode_data(data, *end_stream, callbacks) == FilterDataStatus::StopIteration
                },
                Frame::Trailers(trailers) => {
                    filter.decode_trailers(trailers, callbacks) == FilterTrailersStatus::StopIteration
                },
            }) else {
                break;
            };

            if self.local_reply.is_some() {
                self.finish_with_local_reply(filter_index);
                return;
            }
            if stop && !continue_requested {
                trace!(
                    stream_id = self.id.0,
                    filter = self.filters[filter_index].name(),
                    "{} iteration stopped",
                    frame.kind()
                );
                self.state = DecodeState::Stopped { frame, filter_index };
                return;
            }
            if !stop && continue_requested {
                warn!(
                    stream_id = self.id.0,
                    filter = self.filters[filter_index].name(),
                    "ignoring continue_decoding from a filter that did not stop the chain"
                );
            }
        }
        self.forward(frame);
    }

    fn forward(&mut self, frame: Frame) {
        let end_stream = match frame {
            Frame::Headers { head, end_stream } => {
                self.forwarded.head = Some(head);
                end_stream
            },
            Frame::Data { data, end_stream } => {
                self.forwarded.body.extend_from_slice(&data);
                end_stream
            },
            Frame::Trailers(trailers) => {
                self.forwarded.trailers = Some(trailers);
                true
            },
        };
        if end_stream {
            self.forwarded.end_stream = true;
            self.state = DecodeState::Forwarded;
            debug!(
                stream_id = self.id.0,
                "request forwarded upstream to {}",
                self.route.as_ref().map_or("<no route>", |r| r.cluster_name.as_str())
            );
            self.destroy_filters();
        }
    }

    fn finish_with_local_reply(&mut self, filter_index: usize) {
        let discarded = self.buffered.len();
        self.buffered.clear();
        self.state = DecodeState::LocalReply;
        debug!(
            stream_id = self.id.0,
            filter = self.filters.get(filter_index).map_or("", |f| f.name()),
            "local reply {:?} sent, {discarded} buffered frames discarded",
            self.request_info.response_code
        );
        self.destroy_filters();
    }

    /// Runs `on_destroy` once on every filter, disarming whatever timers they still hold.
    fn destroy_filters(&mut self) {
        if std::mem::replace(&mut self.filters_destroyed, true) {
            return;
        }
        for filter in &mut self.filters {
            filter.on_destroy();
        }
    }

    fn continue_decoding(&mut self, filter_index: usize) {
        match std::mem::replace(&mut self.state, DecodeState::Iterating) {
            DecodeState::Stopped { frame, filter_index: stopped } if stopped == filter_index => {
                trace!(stream_id = self.id.0, "resuming {} iteration after filter {filter_index}", frame.kind());
                self.run_frame(frame, filter_index + 1);
                while matches!(self.state, DecodeState::Iterating) {
                    let Some(frame) = self.buffered.pop_front() else {
                        break;
                    };
                    self.run_frame(frame, 0);
                }
            },
            state => {
                self.state = state;
                warn!(
                    stream_id = self.id.0,
                    filter = self.filters.get(filter_index).map_or("", |f| f.name()),
                    "ignoring continue_decoding from a filter that did not stop the chain"
                );
            },
        }
    }

    fn on_timer(&mut self, filter_index: usize, timer_id: TimerId) {
        if self.is_complete() {
            trace!(stream_id = self.id.0, "decoding is over, dropping timer {timer_id:?} of filter {filter_index}");
            return;
        }
        let replied = self.local_reply.is_some();
        let Some(((), continue_requested)) =
            self.call_filter(filter_index, |filter, callbacks| filter.on_timer(timer_id, callbacks))
        else {
            trace!(stream_id = self.id.0, "no filter {filter_index} for timer {timer_id:?}");
            return;
        };
        if !replied && self.local_reply.is_some() {
            self.finish_with_local_reply(filter_index);
        } else if continue_requested {
            self.continue_decoding(filter_index);
        }
    }

    fn into_completed(mut self) -> Option<CompletedStream> {
        let outcome = match self.state {
            DecodeState::LocalReply => StreamOutcome::LocalReply(self.local_reply.take()?),
            DecodeState::Forwarded => StreamOutcome::Forwarded(std::mem::take(&mut self.forwarded)),
            DecodeState::Iterating | DecodeState::Stopped { .. } => return None,
        };
        Some(CompletedStream { id: self.id, request_info: self.request_info.clone(), outcome })
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.destroy_filters();
        trace!(stream_id = self.id.0, "stream destroyed");
    }
}

/// The streams of one downstream connection.
///
/// Timers armed by filters post their expiry on the connection's event queue; the task driving
/// the connection calls [`HttpConnection::next_event`] to deliver them.
pub struct HttpConnection {
    chain: Arc<FilterChainFactory>,
    router: Arc<dyn RouteResolver>,
    dispatcher: Dispatcher,
    events: mpsc::UnboundedReceiver<TimerEvent>,
    streams: BTreeMap<StreamId, ActiveStream>,
    next_stream_id: u64,
}

impl HttpConnection {
    pub fn new(chain: Arc<FilterChainFactory>, router: Arc<dyn RouteResolver>) -> Self {
        let (dispatcher, events) = Dispatcher::new();
        Self { chain, router, dispatcher, events, streams: BTreeMap::new(), next_stream_id: 1 }
    }

    pub fn new_stream(&mut self) -> StreamId {
        let id = StreamId(self.next_stream_id);
        self.next_stream_id += 1;
        let filters = self.chain.create_filter_chain();
        trace!(stream_id = id.0, "new stream with {} decoder filters", filters.len());
        self.streams.insert(id, ActiveStream::new(id, filters, self.dispatcher.clone()));
        id
    }

    pub fn stream(&self, id: StreamId) -> Option<&ActiveStream> {
        self.streams.get(&id)
    }

    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    fn stream_mut(&mut self, id: StreamId) -> std::result::Result<&mut ActiveStream, StreamError> {
        self.streams.get_mut(&id).ok_or(StreamError::UnknownStream(id))
    }

    pub fn decode_headers(
        &mut self,
        id: StreamId,
        head: Parts,
        end_stream: bool,
    ) -> std::result::Result<(), StreamError> {
        let router = Arc::clone(&self.router);
        self.stream_mut(id)?.decode_headers(head, end_stream, router.as_ref())
    }

    pub fn decode_data(&mut self, id: StreamId, data: Bytes, end_stream: bool) -> std::result::Result<(), StreamError> {
        self.stream_mut(id)?.decode_data(data, end_stream)
    }

    pub fn decode_trailers(&mut self, id: StreamId, trailers: HeaderMap) -> std::result::Result<(), StreamError> {
        self.stream_mut(id)?.decode_trailers(trailers)
    }

    /// Destroys the stream, e.g. when the downstream disconnects. Pending timers are cancelled.
    pub fn reset_stream(&mut self, id: StreamId) -> std::result::Result<(), StreamError> {
        let stream = self.streams.remove(&id).ok_or(StreamError::UnknownStream(id))?;
        debug!(stream_id = id.0, "stream reset, stopped at {:?}", stream.stopped_at());
        Ok(())
    }

    /// Waits for the next timer to expire and delivers it to the filter that armed it.
    pub async fn next_event(&mut self) -> Option<TimerEvent> {
        let event = self.events.recv().await?;
        self.dispatch(event);
        Some(event)
    }

    fn dispatch(&mut self, event: TimerEvent) {
        match self.streams.get_mut(&event.target.stream_id) {
            Some(stream) => stream.on_timer(event.target.filter_index, event.timer_id),
            None => trace!(stream_id = event.target.stream_id.0, "dropping timer event of a destroyed stream"),
        }
    }

    /// Removes and destroys the streams whose decoding is over.
    pub fn take_completed(&mut self) -> Vec<CompletedStream> {
        let done: Vec<_> = self.streams.iter().filter(|(_, s)| s.is_complete()).map(|(id, _)| *id).collect();
        done.into_iter().filter_map(|id| self.streams.remove(&id)).filter_map(ActiveStream::into_completed).collect()
    }
}
