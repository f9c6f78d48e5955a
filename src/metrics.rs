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

use std::mem;

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tracing::error;

/// Creates a metrics sub registry for this gateway.
pub fn sub_registry(registry: &mut Registry) -> &mut Registry {
	registry.sub_registry_with_prefix("grpc_fanout_gateway")
}

pub struct Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	param: &'a T,
	deferred_fn: Option<F>,
}

impl<'a, F, T> Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	pub fn new(param: &'a T, deferred_fn: F) -> Self {
		Self {
			param,
			deferred_fn: Some(deferred_fn),
		}
	}
}

impl<'a, F, T> Drop for Deferred<'a, F, T>
where
	F: FnOnce(&'a T),
	T: ?Sized,
{
	fn drop(&mut self) {
		if let Some(deferred_fn) = mem::take(&mut self.deferred_fn) {
			(deferred_fn)(self.param);
		} else {
			error!("defer deferred record failed, event is gone");
		}
	}
}

pub trait DeferRecorder {
	#[must_use = "metric will be dropped (and thus recorded) immediately if not assigned"]
	/// Perform a record operation on this object when the returned [Deferred] object is dropped.
	fn defer_record<'a, F>(&'a self, record: F) -> Deferred<'a, F, Self>
	where
		F: FnOnce(&'a Self),
	{
		Deferred::new(self, record)
	}
}

pub trait Recorder<E, T> {
	/// Record the given event
	fn record(&self, event: &E, meta: T);
}

pub trait IncrementRecorder<E>: Recorder<E, u64> {
	/// Record the given event by incrementing the counter by count
	fn increment(&self, event: &E);
}

impl<E, R> IncrementRecorder<E> for R
where
	R: Recorder<E, u64>,
{
	fn increment(&self, event: &E) {
		self.record(event, 1);
	}
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EndpointLabel {
	pub endpoint: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabel {
	pub endpoint: String,
	pub outcome: String,
}

/// A dial attempt against `endpoint`, recorded before the outcome is known.
pub struct DialAttempted<'a>(pub &'a str);

/// A dial that failed against `endpoint`.
pub struct DialFailed<'a>(pub &'a str);

/// One backend queried during a reflection fan-out.
pub struct ReflectionFanout<'a>(pub &'a str);

/// A completed director call, labeled by its resolved endpoint and outcome.
pub struct DirectorCall<'a> {
	pub endpoint: &'a str,
	pub outcome: &'static str,
}

/// Gateway-specific counters: dials attempted/failed per endpoint, pool size
/// per endpoint, reflection fan-outs per backend, director calls by outcome.
#[derive(Clone, Default)]
pub struct GatewayMetrics {
	pub dials_total: Family<EndpointLabel, Counter>,
	pub dial_failures_total: Family<EndpointLabel, Counter>,
	pub pool_size: Family<EndpointLabel, Gauge>,
	pub reflection_fanouts_total: Family<EndpointLabel, Counter>,
	pub director_calls_total: Family<OutcomeLabel, Counter>,
}

impl Recorder<DialAttempted<'_>, u64> for GatewayMetrics {
	fn record(&self, event: &DialAttempted<'_>, count: u64) {
		self.dials_total
			.get_or_create(&EndpointLabel { endpoint: event.0.to_string() })
			.inc_by(count);
	}
}

impl Recorder<DialFailed<'_>, u64> for GatewayMetrics {
	fn record(&self, event: &DialFailed<'_>, count: u64) {
		self.dial_failures_total
			.get_or_create(&EndpointLabel { endpoint: event.0.to_string() })
			.inc_by(count);
	}
}

impl Recorder<ReflectionFanout<'_>, u64> for GatewayMetrics {
	fn record(&self, event: &ReflectionFanout<'_>, count: u64) {
		self.reflection_fanouts_total
			.get_or_create(&EndpointLabel { endpoint: event.0.to_string() })
			.inc_by(count);
	}
}

impl Recorder<DirectorCall<'_>, u64> for GatewayMetrics {
	fn record(&self, event: &DirectorCall<'_>, count: u64) {
		self.director_calls_total
			.get_or_create(&OutcomeLabel {
				endpoint: event.endpoint.to_string(),
				outcome: event.outcome.to_string(),
			})
			.inc_by(count);
	}
}

impl GatewayMetrics {
	/// Sets the current pooled-connection count for `endpoint` (a gauge, not
	/// an event to increment).
	pub fn set_pool_size(&self, endpoint: &str, size: i64) {
		self.pool_size
			.get_or_create(&EndpointLabel { endpoint: endpoint.to_string() })
			.set(size);
	}

	pub fn register(registry: &mut Registry) -> Self {
		let metrics = Self::default();
		registry.register(
			"dials",
			"Total number of backend dial attempts per endpoint",
			metrics.dials_total.clone(),
		);
		registry.register(
			"dial_failures",
			"Total number of failed backend dial attempts per endpoint",
			metrics.dial_failures_total.clone(),
		);
		registry.register(
			"pool_size",
			"Current number of pooled connections per endpoint",
			metrics.pool_size.clone(),
		);
		registry.register(
			"reflection_fanouts",
			"Total number of reflection fan-out calls per backend",
			metrics.reflection_fanouts_total.clone(),
		);
		registry.register(
			"director_calls",
			"Total number of director calls by outcome",
			metrics.director_calls_total.clone(),
		);
		metrics
	}
}

/// Renders `registry` in the Prometheus text exposition format, for mounting
/// at `/metrics` on the gateway's HTTP listener (`main.rs`'s `GatewayService`).
pub fn render(registry: &Registry) -> String {
	let mut buffer = String::new();
	encode(&mut buffer, registry).expect("prometheus text encoding is infallible for this registry");
	buffer
}
