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

pub mod dispatcher;
pub mod listeners;
pub mod response_flags;
pub mod runtime;
pub mod stats;

pub use dispatcher::{Dispatcher, DispatcherError, Timer, TimerEvent, TimerId};
pub use listeners::http_connection_manager::{
    fault::{FaultFilter, FaultFilterConfig, FaultFilterFactory},
    filter::{
        DecoderFilterCallbacks, FilterDataStatus, FilterHeadersStatus, FilterTrailersStatus, StreamDecoderFilter,
    },
    filter_registry::{FactoryContext, FilterFactoryCb, HttpFilterRegistry, NamedHttpFilterConfigFactory, RegistryError},
    FilterChainFactory, HttpConnection, RequestInfo, RouteEntry, RouteResolver, StreamError, StreamId,
};
pub use response_flags::ResponseFlags;
pub use runtime::{Loader, RandomGenerator, RuntimeLoader, Snapshot};
pub use stats::{Counter, Store};

pub type Error = orion_error::Error;
pub type Result<T> = ::core::result::Result<T, Error>;
