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

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{request::Parts, HeaderMap, StatusCode};

use super::{RequestInfo, RouteEntry, StreamId};
use crate::{
    dispatcher::{DispatcherError, Timer, TimerId},
    response_flags::ResponseFlags,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterHeadersStatus {
    Continue,
    /// Pause the chain after this filter until it calls [`DecoderFilterCallbacks::continue_decoding`].
    StopIteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDataStatus {
    Continue,
    StopIteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTrailersStatus {
    Continue,
    StopIteration,
}

/// What a decoder filter may ask of the stream it is attached to.
///
/// Callbacks are only valid for the duration of the filter call they are passed to.
pub trait DecoderFilterCallbacks {
    fn stream_id(&self) -> StreamId;

    /// The route selected for the request when its headers arrived.
    fn route(&self) -> Option<Arc<RouteEntry>>;

    /// Arms a timer owned by the calling filter. On expiry the filter's
    /// [`StreamDecoderFilter::on_timer`] is invoked with the id of the returned timer.
    fn create_timer(&mut self, duration: Duration) -> Result<Timer, DispatcherError>;

    /// Resumes a chain stopped by the calling filter.
    fn continue_decoding(&mut self);

    /// Answers the request with a header-only response and ends decoding.
    fn send_local_reply(&mut self, status: StatusCode);

    fn set_response_flag(&mut self, flag: ResponseFlags);

    fn request_info(&self) -> &RequestInfo;
}

pub trait StreamDecoderFilter: Send {
    fn name(&self) -> &str;

    fn decode_headers(
        &mut self,
        head: &mut Parts,
        end_stream: bool,
        callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterHeadersStatus;

    fn decode_data(
        &mut self,
        _data: &mut Bytes,
        _end_stream: bool,
        _callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterDataStatus {
        FilterDataStatus::Continue
    }

    fn decode_trailers(
        &mut self,
        _trailers: &mut HeaderMap,
        _callbacks: &mut dyn DecoderFilterCallbacks,
    ) -> FilterTrailersStatus {
        FilterTrailersStatus::Continue
    }

    fn on_timer(&mut self, _timer: TimerId, _callbacks: &mut dyn DecoderFilterCallbacks) {}

    /// Called once before the filter is dropped, whatever the outcome of the request.
    fn on_destroy(&mut self) {}
}
