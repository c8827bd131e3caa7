//! Pending-request queue registry
//!
//! Requests are queued per *composite* key (the sorted pool-set a node
//! advertises), so an idle connection can claim work by its node's
//! composite alone. Because pool-sets overlap, one request lives in every
//! queue that can serve its pool; `queue_map` is the reverse index from
//! pool name to those queues. All mutations keep the two views consistent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{ClusterError, Result};
use crate::ordered_index::OrderedIndex;
use crate::request::ConnectionRequest;

pub(crate) struct QueueEntry {
	pub node_count: usize,
	pub requests: OrderedIndex<u64, Arc<ConnectionRequest>>,
}

/// Outcome of claiming the oldest request for a composite.
pub(crate) struct ClaimOutcome {
	pub request: Arc<ConnectionRequest>,
	/// Queues whose last pending request just left
	pub drained: Vec<Arc<str>>,
}

/// Outcome of a TTL sweep.
#[derive(Default)]
pub(crate) struct ExpireOutcome {
	pub expired: Vec<Arc<ConnectionRequest>>,
	pub drained: Vec<Arc<str>>,
}

#[derive(Default)]
pub(crate) struct QueueRegistry {
	queues: HashMap<Arc<str>, QueueEntry>,
	queue_map: HashMap<String, HashSet<Arc<str>>>,
	/// Distinct pending requests (each counted once, however many queues
	/// it sits in)
	pending: usize,
}

impl QueueRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Count a node in for its composite queue and reverse-index entries.
	pub fn register(&mut self, pools: &[String], composite: &Arc<str>) {
		let entry = self
			.queues
			.entry(Arc::clone(composite))
			.or_insert_with(|| QueueEntry {
				node_count: 0,
				requests: OrderedIndex::new(),
			});
		entry.node_count += 1;

		for pool in pools {
			self.queue_map
				.entry(pool.clone())
				.or_default()
				.insert(Arc::clone(composite));
		}
	}

	/// Place a request in every queue that serves its pool.
	pub fn enqueue(&mut self, request: &Arc<ConnectionRequest>) -> Result<()> {
		let serving = match self.queue_map.get(request.pool()) {
			Some(set) if !set.is_empty() => set,
			_ => return Err(ClusterError::NoServer(request.pool().to_string())),
		};
		for composite in serving {
			match self.queues.get_mut(composite) {
				Some(entry) => {
					entry.requests.push(request.id(), Arc::clone(request));
				}
				None => {
					tracing::error!(
						composite = composite.as_ref(),
						"queue map references a missing queue"
					);
				}
			}
		}
		self.pending += 1;
		Ok(())
	}

	/// Hand the oldest request in the composite's queue to the caller,
	/// removing it from every sibling queue.
	pub fn claim_for_composite(&mut self, composite: &str) -> Option<ClaimOutcome> {
		let entry = self.queues.get_mut(composite)?;
		let request = entry.requests.shift()?;
		self.pending -= 1;

		let mut drained = remove_everywhere(&mut self.queues, &self.queue_map, &request);
		if let Some((key, entry)) = self.queues.get_key_value(composite) {
			if entry.requests.is_empty() && !drained.contains(key) {
				drained.push(Arc::clone(key));
			}
		}
		Some(ClaimOutcome { request, drained })
	}

	/// Count a node out of its composite queue.
	///
	/// When the last node behind a queue goes, requests that no other queue
	/// can serve are returned as orphans (the caller aborts them) and the
	/// queue plus its reverse-index entries are dropped.
	pub fn unregister(&mut self, pools: &[String], composite: &str) -> Vec<Arc<ConnectionRequest>> {
		let entry = match self.queues.get_mut(composite) {
			Some(entry) => entry,
			None => {
				tracing::error!(composite, "unregister for an unknown queue");
				return Vec::new();
			}
		};
		entry.node_count = entry.node_count.saturating_sub(1);
		if entry.node_count > 0 {
			return Vec::new();
		}

		let entry = self
			.queues
			.remove(composite)
			.expect("queue entry checked above");

		let mut orphans = Vec::new();
		for request in entry.requests.iter() {
			let served_elsewhere = self
				.queue_map
				.get(request.pool())
				.is_some_and(|set| set.len() > 1);
			if !served_elsewhere {
				orphans.push(Arc::clone(request));
			}
		}
		self.pending -= orphans.len();

		for pool in pools {
			if let Some(set) = self.queue_map.get_mut(pool) {
				set.retain(|key| key.as_ref() != composite);
				if set.is_empty() {
					self.queue_map.remove(pool);
				}
			}
		}
		orphans
	}

	/// Expire overdue requests, walking each queue from its head.
	pub fn expire(&mut self, ttl: Duration) -> ExpireOutcome {
		let composites: Vec<Arc<str>> = self.queues.keys().cloned().collect();
		let mut outcome = ExpireOutcome::default();

		for composite in composites {
			loop {
				let request = match self
					.queues
					.get(&composite)
					.and_then(|entry| entry.requests.front())
				{
					Some(request) if request.is_expired(ttl) => Arc::clone(request),
					_ => break,
				};
				let drained = remove_everywhere(&mut self.queues, &self.queue_map, &request);
				outcome.drained.extend(drained);
				self.pending -= 1;
				outcome.expired.push(request);
			}
		}
		outcome
	}

	/// Remove every pending request from every queue.
	pub fn drain_all(&mut self) -> Vec<Arc<ConnectionRequest>> {
		let mut requests: HashMap<u64, Arc<ConnectionRequest>> = HashMap::new();
		for entry in self.queues.values_mut() {
			while let Some(request) = entry.requests.shift() {
				requests.entry(request.id()).or_insert(request);
			}
		}
		self.pending = 0;
		requests.into_values().collect()
	}

	/// Sum of queue lengths.
	///
	/// Over-counts requests sitting in several queues; this matches the
	/// documented backpressure signal.
	pub fn total_len(&self) -> usize {
		self.queues.values().map(|entry| entry.requests.len()).sum()
	}

	/// Distinct pending requests.
	pub fn pending(&self) -> usize {
		self.pending
	}

	/// Number of queues currently serving the named pool.
	pub fn serving(&self, pool: &str) -> usize {
		self.queue_map.get(pool).map_or(0, HashSet::len)
	}

	#[cfg(test)]
	pub fn queue_len(&self, composite: &str) -> usize {
		self.queues
			.get(composite)
			.map_or(0, |entry| entry.requests.len())
	}

	/// Number of queues a request currently sits in.
	#[cfg(test)]
	pub fn request_presence(&self, request_id: u64) -> usize {
		self.queues
			.values()
			.filter(|entry| entry.requests.has(&request_id))
			.count()
	}
}

/// Remove a request from every queue serving its pool, reporting queues
/// that became empty.
fn remove_everywhere(
	queues: &mut HashMap<Arc<str>, QueueEntry>,
	queue_map: &HashMap<String, HashSet<Arc<str>>>,
	request: &ConnectionRequest,
) -> Vec<Arc<str>> {
	let mut drained = Vec::new();
	if let Some(serving) = queue_map.get(request.pool()) {
		for composite in serving {
			if let Some(entry) = queues.get_mut(composite) {
				let removed = entry.requests.remove(&request.id()).is_some();
				if removed && entry.requests.is_empty() {
					drained.push(Arc::clone(composite));
				}
			}
		}
	}
	drained
}
