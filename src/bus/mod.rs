use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::RunStatus;
use crate::observability;

/// Queue depth per subscriber. A subscriber that falls further behind than
/// this loses the oldest events (at-most-once delivery).
const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
	Job,
	Batch,
}

/// A single progress update published under a job or batch key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
	pub kind: EventKind,
	pub status: RunStatus,
	pub progress: u8,
	pub current_step: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub extra: Option<serde_json::Value>,
}

/// Process-local publish/subscribe channel keyed by entity id.
///
/// Delivery is best-effort and in-order per key. Publishing never blocks;
/// slow subscribers drop events rather than backpressuring pipelines. Late
/// subscribers read prior state from the entity store, not from the bus.
pub struct ProgressBus {
	channels: Mutex<HashMap<Uuid, broadcast::Sender<ProgressEvent>>>,
}

impl ProgressBus {
	pub fn new() -> Self {
		Self {
			channels: Mutex::new(HashMap::new()),
		}
	}

	/// Publish an event under `key`. Events sent with no subscribers are
	/// silently discarded.
	pub fn publish(&self, key: Uuid, event: ProgressEvent) {
		observability::record_progress_event();
		let sender = {
			let mut channels = self.channels.lock().expect("progress bus lock poisoned");
			channels
				.entry(key)
				.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
				.clone()
		};
		let _ = sender.send(event);
	}

	/// Subscribe to subsequent events under `key`.
	pub fn subscribe(&self, key: Uuid) -> broadcast::Receiver<ProgressEvent> {
		let mut channels = self.channels.lock().expect("progress bus lock poisoned");
		channels
			.entry(key)
			.or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
			.subscribe()
	}

	/// Drop the channel for `key` once the entity is terminal. Existing
	/// receivers observe a closed stream after draining buffered events.
	pub fn retire(&self, key: Uuid) {
		let mut channels = self.channels.lock().expect("progress bus lock poisoned");
		channels.remove(&key);
	}

	/// Number of live channels, for diagnostics.
	pub fn len(&self) -> usize {
		self.channels.lock().expect("progress bus lock poisoned").len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl Default for ProgressBus {
	fn default() -> Self {
		Self::new()
	}
}

impl ProgressEvent {
	pub fn job(status: RunStatus, progress: u8, step: impl Into<String>) -> Self {
		Self {
			kind: EventKind::Job,
			status,
			progress,
			current_step: Some(step.into()),
			extra: None,
		}
	}

	pub fn batch(status: RunStatus, progress: u8, step: impl Into<String>) -> Self {
		Self {
			kind: EventKind::Batch,
			status,
			progress,
			current_step: Some(step.into()),
			extra: None,
		}
	}

	pub fn with_extra(mut self, extra: serde_json::Value) -> Self {
		self.extra = Some(extra);
		self
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[tokio::test]
	async fn events_delivered_in_order_per_key() {
		let bus = ProgressBus::new();
		let key = Uuid::new_v4();
		let mut rx = bus.subscribe(key);

		for p in [10u8, 30, 60, 90, 100] {
			bus.publish(key, ProgressEvent::job(RunStatus::Processing, p, "step"));
		}

		let mut seen = Vec::new();
		for _ in 0..5 {
			seen.push(rx.recv().await.unwrap().progress);
		}
		assert_eq!(seen, vec![10, 30, 60, 90, 100]);
	}

	#[tokio::test]
	async fn publish_without_subscribers_does_not_block() {
		let bus = ProgressBus::new();
		let key = Uuid::new_v4();
		// No subscriber; send is discarded.
		bus.publish(key, ProgressEvent::job(RunStatus::Processing, 10, "step"));
		assert_eq!(bus.len(), 1);
	}

	#[tokio::test]
	async fn slow_subscriber_drops_oldest_events() {
		let bus = ProgressBus::new();
		let key = Uuid::new_v4();
		let mut rx = bus.subscribe(key);

		// Overflow the per-subscriber queue.
		for p in 0..(CHANNEL_CAPACITY as u32 + 8) {
			bus.publish(
				key,
				ProgressEvent::job(RunStatus::Processing, (p % 100) as u8, "step"),
			);
		}

		// First recv reports the lag, subsequent recvs continue in order.
		match rx.recv().await {
			Err(broadcast::error::RecvError::Lagged(n)) => assert!(n >= 8),
			other => panic!("expected lag, got {:?}", other),
		}
		assert!(rx.recv().await.is_ok());
	}

	#[tokio::test]
	async fn retire_closes_the_stream() {
		let bus = ProgressBus::new();
		let key = Uuid::new_v4();
		let mut rx = bus.subscribe(key);
		bus.publish(key, ProgressEvent::job(RunStatus::Completed, 100, "done"));
		bus.retire(key);

		assert_eq!(rx.recv().await.unwrap().progress, 100);
		assert!(matches!(
			rx.recv().await,
			Err(broadcast::error::RecvError::Closed)
		));
	}

	#[tokio::test]
	async fn keys_are_independent() {
		let bus = ProgressBus::new();
		let a = Uuid::new_v4();
		let b = Uuid::new_v4();
		let mut rx_a = bus.subscribe(a);
		let _rx_b = bus.subscribe(b);

		bus.publish(b, ProgressEvent::batch(RunStatus::Processing, 50, "half"));
		bus.publish(a, ProgressEvent::job(RunStatus::Processing, 10, "start"));

		assert_eq!(rx_a.recv().await.unwrap().progress, 10);
	}
}
