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

use std::fmt;

use bitflags::bitflags;

bitflags! {
    /// Proxy-internal decisions attached to the access log record of a request.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ResponseFlags: u32 {
        const FAILED_LOCAL_HEALTH_CHECK       = 0x0001;
        const NO_HEALTHY_UPSTREAM             = 0x0002;
        const UPSTREAM_REQUEST_TIMEOUT        = 0x0004;
        const LOCAL_RESET                     = 0x0008;
        const UPSTREAM_REMOTE_RESET           = 0x0010;
        const UPSTREAM_CONNECTION_FAILURE     = 0x0020;
        const UPSTREAM_CONNECTION_TERMINATION = 0x0040;
        const UPSTREAM_OVERFLOW               = 0x0080;
        const NO_ROUTE_FOUND                  = 0x0100;
        /// The request was delayed by the fault filter.
        const DELAY_INJECTED                  = 0x0200;
        /// The request was aborted by the fault filter.
        const FAULT_INJECTED                  = 0x0400;
        const RATE_LIMITED                    = 0x0800;
    }
}

const SHORT_NAMES: [(ResponseFlags, &str); 12] = [
    (ResponseFlags::FAILED_LOCAL_HEALTH_CHECK, "LH"),
    (ResponseFlags::NO_HEALTHY_UPSTREAM, "UH"),
    (ResponseFlags::UPSTREAM_REQUEST_TIMEOUT, "UT"),
    (ResponseFlags::LOCAL_RESET, "LR"),
    (ResponseFlags::UPSTREAM_REMOTE_RESET, "UR"),
    (ResponseFlags::UPSTREAM_CONNECTION_FAILURE, "UF"),
    (ResponseFlags::UPSTREAM_CONNECTION_TERMINATION, "UC"),
    (ResponseFlags::UPSTREAM_OVERFLOW, "UO"),
    (ResponseFlags::NO_ROUTE_FOUND, "NR"),
    (ResponseFlags::DELAY_INJECTED, "DI"),
    (ResponseFlags::FAULT_INJECTED, "FI"),
    (ResponseFlags::RATE_LIMITED, "RL"),
];

/// Access log rendering: comma separated short names, `-` when no flag is set.
impl fmt::Display for ResponseFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (flag, name) in SHORT_NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str(",")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(ResponseFlags::empty().to_string(), "-");
        assert_eq!(ResponseFlags::FAULT_INJECTED.to_string(), "FI");
        assert_eq!((ResponseFlags::DELAY_INJECTED | ResponseFlags::FAULT_INJECTED).to_string(), "DI,FI");
    }
}
