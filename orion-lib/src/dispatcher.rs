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

//! Per-connection event loop plumbing.
//!
//! A [`Dispatcher`] hands out [`Timer`]s bound to the tokio runtime the connection is driven
//! on. An expired timer never calls back into a filter directly: it posts a [`TimerEvent`] on
//! the connection's event queue and the connection delivers it to the owning filter from its
//! own task.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use abort_on_drop::ChildTask;
use tokio::{runtime::Handle, sync::mpsc, time::Instant};
use tracing::trace;

use crate::listeners::http_connection_manager::StreamId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TimerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The filter a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTarget {
    pub stream_id: StreamId,
    pub filter_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerEvent {
    pub target: TimerTarget,
    pub timer_id: TimerId,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("no reactor is running on this thread")]
    NoReactor,
    #[error("the event queue of the connection is closed")]
    Closed,
    #[error("timer duration {0:?} is out of range")]
    OutOfRange(Duration),
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    events: mpsc::UnboundedSender<TimerEvent>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events }, rx)
    }

    /// Arms a one-shot timer that posts a [`TimerEvent`] for `target` once `duration` has elapsed.
    pub fn create_timer(&self, target: TimerTarget, duration: Duration) -> Result<Timer, DispatcherError> {
        let handle = Handle::try_current().map_err(|_| DispatcherError::NoReactor)?;
        if self.events.is_closed() {
            return Err(DispatcherError::Closed);
        }
        let timer_id = TimerId::next();
        let events = self.events.clone();
        let deadline = Instant::now().checked_add(duration).ok_or(DispatcherError::OutOfRange(duration))?;
        let task = handle.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if events.send(TimerEvent { target, timer_id }).is_err() {
                trace!("event queue closed before timer {timer_id:?} fired");
            }
        });
        trace!(stream_id = target.stream_id.0, filter = target.filter_index, "armed timer {timer_id:?} for {duration:?}");
        Ok(Timer { id: timer_id, duration, _task: task.into() })
    }
}

/// A one-shot timer. Dropping it cancels the pending expiry.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    duration: Duration,
    _task: ChildTask<()>,
}

impl Timer {
    pub fn id(&self) -> TimerId {
        self.id
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn disable(self) {
        trace!("disabled timer {:?}", self.id);
    }
}
