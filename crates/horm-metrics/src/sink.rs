// Copyright 2025 horm Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::{Counter, CounterRegistry};
use std::sync::{Arc, LazyLock};

/// Destination of the transport core's counters.
///
/// Implementations are called on the hot path of every call and must not
/// block.
pub trait MetricsSink: Send + Sync {
    /// Increments `counter` by one.
    fn incr(&self, counter: Counter);
}

impl MetricsSink for CounterRegistry {
    fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }
}

/// Sink that drops every counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn incr(&self, _counter: Counter) {}
}

static GLOBAL: LazyLock<Arc<CounterRegistry>> = LazyLock::new(|| Arc::new(CounterRegistry::new()));

/// Process-wide default registry, used by clients and pools built without an
/// explicit sink.
pub fn global() -> Arc<CounterRegistry> {
    Arc::clone(&GLOBAL)
}
