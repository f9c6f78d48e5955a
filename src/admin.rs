// Copyright Istio Authors
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

//! `/debug/requests` and `/debug/events`, the Rust stand-in for the
//! `golang.org/x/net/trace` facility referenced in
//! `original_source/command.go`, gated by `EnableRequestTracing`. Mounted
//! directly on the gateway's HTTP listener (`main.rs`'s `GatewayService`)
//! rather than served from a separate `Router`.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use serde::Serialize;

const RING_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct CompletedCall {
	pub method: String,
	pub endpoint: String,
	pub outcome: String,
	pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
	pub message: String,
}

#[derive(Default)]
struct Inner {
	requests: VecDeque<CompletedCall>,
	events: VecDeque<Event>,
}

#[derive(Clone, Default)]
pub struct RequestLog {
	inner: Arc<RwLock<Inner>>,
}

impl RequestLog {
	pub fn record_call(&self, call: CompletedCall) {
		let mut inner = self.inner.write().unwrap();
		if inner.requests.len() >= RING_CAPACITY {
			inner.requests.pop_front();
		}
		inner.requests.push_back(call);
	}

	pub fn record_event(&self, message: impl Into<String>) {
		let mut inner = self.inner.write().unwrap();
		if inner.events.len() >= RING_CAPACITY {
			inner.events.pop_front();
		}
		inner.events.push_back(Event { message: message.into() });
	}

	/// Snapshot of the completed-call ring buffer, most-recently-evicted-first.
	pub fn requests_snapshot(&self) -> Vec<CompletedCall> {
		self.inner.read().unwrap().requests.iter().cloned().collect()
	}

	/// Snapshot of the event ring buffer.
	pub fn events_snapshot(&self) -> Vec<Event> {
		self.inner.read().unwrap().events.iter().cloned().collect()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ring_buffer_evicts_oldest() {
		let log = RequestLog::default();
		for i in 0..(RING_CAPACITY + 10) {
			log.record_call(CompletedCall {
				method: format!("/a.b.Svc/M{i}"),
				endpoint: "a.b".to_string(),
				outcome: "ok".to_string(),
				duration_ms: 1,
			});
		}
		let inner = log.inner.read().unwrap();
		assert_eq!(inner.requests.len(), RING_CAPACITY);
		assert_eq!(inner.requests.front().unwrap().method, "/a.b.Svc/M10");
	}
}
