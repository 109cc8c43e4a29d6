// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The process-wide store of what past payment attempts taught us about nodes and channels.
//!
//! [`MissionControl`] keeps, per node and per channel direction, a penalty in msats built up from
//! reported failures. Penalties decay exponentially: a penalty reads back at half its value once
//! one half-life has elapsed without further failures, and a reported success clears it.
//!
//! Decay is applied lazily on every read, so no background task is needed for correctness.
//! [`MissionControl::commit_decay`] should nonetheless be called periodically to drop entries
//! which no longer carry any penalty and so bound memory usage.
//!
//! A single [`MissionControl`] is meant to be constructed at startup and shared by reference (or
//! `Arc`) with every [`PaymentSession`]. All operations take `&self` and may be called from any
//! number of threads concurrently.
//!
//! [`PaymentSession`]: crate::routing::payment_session::PaymentSession

use crate::routing::graph::{EdgeKey, GraphView, NodeId};
use crate::routing::payment_session::PaymentSession;
use crate::routing::router::{Route, RouteParameters};
use crate::util::config::{MissionControlConfig, PaymentSessionConfig, ScoringParameters};
use crate::util::errors::PaymentError;
use crate::util::logger::{Logger, WithContext};

use crate::prelude::*;
use crate::sync::{FairRwLock, Mutex, PoisonError};
use core::{cmp, fmt};
use core::ops::Deref;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use core::time::Duration;

/// Why an attempt could not be forwarded past some point of its route.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
	/// The channel could not forward the amount right now, eg `temporary_channel_failure`.
	TemporaryChannel,
	/// The channel refused the HTLC for policy reasons, eg `fee_insufficient`,
	/// `channel_disabled` or `unknown_next_peer`.
	PermanentChannel,
	/// The node reported itself temporarily unable to forward.
	TemporaryNode,
	/// The node is unreachable or misbehaving.
	PermanentNode,
	/// The attempt timed out or its failure could not be decoded. This may be our own fault.
	Ambiguous,
}

impl FailureKind {
	/// Whether this failure is held against a node rather than a channel.
	pub fn is_node_failure(&self) -> bool {
		match self {
			FailureKind::TemporaryNode | FailureKind::PermanentNode => true,
			_ => false,
		}
	}

	fn class(&self) -> PenaltyClass {
		match self {
			FailureKind::TemporaryChannel | FailureKind::TemporaryNode => PenaltyClass::Temporary,
			FailureKind::PermanentChannel | FailureKind::PermanentNode => PenaltyClass::Permanent,
			FailureKind::Ambiguous => PenaltyClass::Ambiguous,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PenaltyClass {
	Temporary,
	Permanent,
	Ambiguous,
}

/// A point of the network the reliability store holds penalties against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReliabilityKey {
	/// A node, regardless of which channel was used to reach it.
	Node(NodeId),
	/// One direction of a channel.
	Channel(EdgeKey),
}

impl ReliabilityKey {
	fn log_context(&self) -> (Option<NodeId>, Option<u64>) {
		match self {
			ReliabilityKey::Node(node_id) => (Some(*node_id), None),
			ReliabilityKey::Channel(edge) => (Some(edge.source), Some(edge.short_channel_id)),
		}
	}
}

impl fmt::Display for ReliabilityKey {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			ReliabilityKey::Node(node_id) => write!(f, "node {}", node_id),
			ReliabilityKey::Channel(edge) => write!(f, "channel {}", edge),
		}
	}
}

/// Works out which node or channel direction a failed attempt should be blamed on.
///
/// `failing_hop` indexes [`Route::hops`]. A channel failure at hop `i` is held against the
/// channel of that hop in the direction leaving the previous node (or us), while a node failure
/// is held against `hops[i].node_id`. A failure without a hop index cannot be attributed and is
/// treated as an [`FailureKind::Ambiguous`] failure of our first hop.
///
/// Returns `None` if `failing_hop` is past the end of the route.
pub fn attribute_failure(
	route: &Route, failing_hop: Option<usize>, kind: FailureKind,
) -> Option<(ReliabilityKey, FailureKind)> {
	let (index, kind) = match failing_hop {
		Some(index) => (index, kind),
		None => (0, FailureKind::Ambiguous),
	};
	if kind.is_node_failure() {
		route.hops.get(index).map(|hop| (ReliabilityKey::Node(hop.node_id), kind))
	} else {
		route.edge_key(index).map(|edge| (ReliabilityKey::Channel(edge), kind))
	}
}

/// Exponential decay: `penalty * 0.5 ^ (elapsed / half_life)`, rounded down.
fn decayed_penalty_msat(undecayed_penalty_msat: u64, elapsed: Duration, half_life: Duration) -> u64 {
	if undecayed_penalty_msat == 0 || elapsed == Duration::ZERO {
		return undecayed_penalty_msat;
	}
	if half_life == Duration::ZERO {
		return 0;
	}
	let half_lives = elapsed.as_secs_f64() / half_life.as_secs_f64();
	(undecayed_penalty_msat as f64 * 0.5f64.powf(half_lives)) as u64
}

#[derive(Clone, Copy)]
struct HalfLives {
	temporary: Duration,
	permanent: Duration,
	ambiguous: Duration,
}

impl HalfLives {
	fn of(&self, class: PenaltyClass) -> Duration {
		match class {
			PenaltyClass::Temporary => self.temporary,
			PenaltyClass::Permanent => self.permanent,
			PenaltyClass::Ambiguous => self.ambiguous,
		}
	}
}

/// Accounting for penalties against a node or channel direction.
///
/// Each failure class accumulates in its own component so that it decays at its own rate.
struct PenaltyRecord {
	/// Accumulated penalties in msats as of `last_updated`.
	temporary_penalty_msat: u64,
	permanent_penalty_msat: u64,
	ambiguous_penalty_msat: u64,
	/// Time of the latest report folded into this record, as a duration since the UNIX epoch.
	last_updated: Duration,
}

impl PenaltyRecord {
	fn new(last_updated: Duration) -> Self {
		Self {
			temporary_penalty_msat: 0,
			permanent_penalty_msat: 0,
			ambiguous_penalty_msat: 0,
			last_updated,
		}
	}

	fn component_mut(&mut self, class: PenaltyClass) -> &mut u64 {
		match class {
			PenaltyClass::Temporary => &mut self.temporary_penalty_msat,
			PenaltyClass::Permanent => &mut self.permanent_penalty_msat,
			PenaltyClass::Ambiguous => &mut self.ambiguous_penalty_msat,
		}
	}

	fn penalty_msat(&self, now: Duration, half_lives: &HalfLives) -> u64 {
		let elapsed = now.saturating_sub(self.last_updated);
		decayed_penalty_msat(self.temporary_penalty_msat, elapsed, half_lives.temporary)
			.saturating_add(decayed_penalty_msat(self.permanent_penalty_msat, elapsed, half_lives.permanent))
			.saturating_add(decayed_penalty_msat(self.ambiguous_penalty_msat, elapsed, half_lives.ambiguous))
	}

	fn decay_to(&mut self, now: Duration, half_lives: &HalfLives) {
		if now <= self.last_updated {
			return;
		}
		let elapsed = now - self.last_updated;
		self.temporary_penalty_msat =
			decayed_penalty_msat(self.temporary_penalty_msat, elapsed, half_lives.temporary);
		self.permanent_penalty_msat =
			decayed_penalty_msat(self.permanent_penalty_msat, elapsed, half_lives.permanent);
		self.ambiguous_penalty_msat =
			decayed_penalty_msat(self.ambiguous_penalty_msat, elapsed, half_lives.ambiguous);
		self.last_updated = now;
	}

	/// Folds a failure observed at `at` into the record.
	///
	/// A failure older than the latest report is decayed forward to it first, so a late-arriving
	/// report never counts for more than it would have had it arrived in order.
	fn add_failure(
		&mut self, class: PenaltyClass, penalty_msat: u64, at: Duration, half_lives: &HalfLives,
		max_penalty_msat: u64,
	) {
		let penalty_msat = if at < self.last_updated {
			decayed_penalty_msat(penalty_msat, self.last_updated - at, half_lives.of(class))
		} else {
			self.decay_to(at, half_lives);
			penalty_msat
		};
		let component = self.component_mut(class);
		*component = cmp::min(component.saturating_add(penalty_msat), max_penalty_msat);
	}

	/// Clears the record for a success observed at `at`. A success older than the latest report
	/// is ignored and `false` returned.
	fn clear(&mut self, at: Duration) -> bool {
		if at < self.last_updated {
			return false;
		}
		self.temporary_penalty_msat = 0;
		self.permanent_penalty_msat = 0;
		self.ambiguous_penalty_msat = 0;
		self.last_updated = at;
		true
	}
}

/// A decay-adjusted copy of every non-zero penalty in a [`MissionControl`] at one point in time.
///
/// Path finding scores edges against a snapshot so that it neither holds any lock on the store
/// for its duration nor sees penalties change mid-search.
#[derive(Clone, Debug, Default)]
pub struct PenaltySnapshot {
	penalties: HashMap<ReliabilityKey, u64>,
	taken_at: Duration,
}

impl PenaltySnapshot {
	/// The penalty in msats held against `key` when the snapshot was taken.
	pub fn penalty(&self, key: &ReliabilityKey) -> u64 {
		self.penalties.get(key).copied().unwrap_or(0)
	}

	/// The time the snapshot's penalties were decayed to, as a duration since the UNIX epoch.
	pub fn taken_at(&self) -> Duration {
		self.taken_at
	}

	/// The number of nodes and channel directions carrying a penalty.
	pub fn len(&self) -> usize {
		self.penalties.len()
	}

	/// Whether no node or channel direction carries a penalty.
	pub fn is_empty(&self) -> bool {
		self.penalties.is_empty()
	}
}

/// The reliability store.
///
/// Entries are kept in a map of individually locked records: reports and reads against known
/// keys only take the map's read lock plus the record's own mutex, so unrelated keys never
/// contend. The map's write lock is taken to insert a never-seen key and by
/// [`Self::commit_decay`] to evict stale ones.
///
/// Times passed in are durations since the UNIX epoch. The store tracks the latest time it has
/// been told about and uses it for [`Self::penalty`] and [`Self::snapshot`], so it never reads
/// the wall clock itself.
pub struct MissionControl<L: Deref> where L::Target: Logger {
	config: MissionControlConfig,
	records: FairRwLock<HashMap<ReliabilityKey, Mutex<PenaltyRecord>>>,
	/// Milliseconds since the UNIX epoch of the latest time reported to us. Only ever increases.
	current_time_ms: AtomicU64,
	best_block_height: AtomicU32,
	pub(crate) logger: L,
}

impl<L: Deref> MissionControl<L> where L::Target: Logger {
	/// Creates an empty store penalizing failures as configured.
	pub fn new(config: MissionControlConfig, logger: L) -> Self {
		Self {
			config,
			records: FairRwLock::new(new_hash_map()),
			current_time_ms: AtomicU64::new(0),
			best_block_height: AtomicU32::new(0),
			logger,
		}
	}

	/// The configuration penalties are applied with.
	pub fn config(&self) -> &MissionControlConfig {
		&self.config
	}

	/// The latest time reported to the store, as a duration since the UNIX epoch.
	pub fn current_time(&self) -> Duration {
		Duration::from_millis(self.current_time_ms.load(Ordering::Acquire))
	}

	/// The best block height passed to [`Self::commit_decay_at_height`], or `0` if none was.
	pub fn best_block_height(&self) -> u32 {
		self.best_block_height.load(Ordering::Acquire)
	}

	/// The number of nodes and channel directions currently tracked, including ones whose penalty
	/// has decayed away but which have not yet been evicted.
	pub fn tracked_entries(&self) -> usize {
		self.records.read().unwrap_or_else(PoisonError::into_inner).len()
	}

	fn advance_clock(&self, now: Duration) {
		let now_ms = cmp::min(now.as_millis(), u64::max_value() as u128) as u64;
		self.current_time_ms.fetch_max(now_ms, Ordering::AcqRel);
	}

	fn half_lives(&self, key: &ReliabilityKey) -> HalfLives {
		let (temporary, permanent) = match key {
			ReliabilityKey::Node(_) => (
				self.config.temporary_node_failure_half_life,
				self.config.permanent_node_failure_half_life,
			),
			ReliabilityKey::Channel(_) => (
				self.config.temporary_channel_failure_half_life,
				self.config.permanent_channel_failure_half_life,
			),
		};
		HalfLives { temporary, permanent, ambiguous: self.config.ambiguous_failure_half_life }
	}

	fn failure_penalty_msat(&self, key: &ReliabilityKey, class: PenaltyClass) -> u64 {
		match (key, class) {
			(_, PenaltyClass::Ambiguous) => self.config.ambiguous_failure_penalty_msat,
			(ReliabilityKey::Node(_), PenaltyClass::Temporary) => self.config.temporary_node_failure_penalty_msat,
			(ReliabilityKey::Node(_), PenaltyClass::Permanent) => self.config.permanent_node_failure_penalty_msat,
			(ReliabilityKey::Channel(_), PenaltyClass::Temporary) => self.config.temporary_channel_failure_penalty_msat,
			(ReliabilityKey::Channel(_), PenaltyClass::Permanent) => self.config.permanent_channel_failure_penalty_msat,
		}
	}

	/// Returns the penalty in msats held against `key`, decayed to [`Self::current_time`].
	///
	/// Unknown keys carry no penalty.
	pub fn penalty(&self, key: &ReliabilityKey) -> u64 {
		self.penalty_at(key, self.current_time())
	}

	/// Returns the penalty in msats held against `key`, decayed to `now`.
	pub fn penalty_at(&self, key: &ReliabilityKey, now: Duration) -> u64 {
		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		match records.get(key) {
			Some(record) => {
				let record = record.lock().unwrap_or_else(PoisonError::into_inner);
				record.penalty_msat(now, &self.half_lives(key))
			},
			None => 0,
		}
	}

	/// Records that a forward of `amount_msat` succeeded at `key`, clearing any penalty held
	/// against it.
	///
	/// A success older than the latest report for `key` is ignored, so that it cannot erase a
	/// failure observed after it.
	pub fn report_success(&self, key: &ReliabilityKey, amount_msat: u64, duration_since_epoch: Duration) {
		self.advance_clock(duration_since_epoch);
		let (node_id, short_channel_id) = key.log_context();
		let logger = WithContext::from(&self.logger, node_id, short_channel_id);

		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		let record = match records.get(key) {
			Some(record) => record,
			// Nothing to clear, and no need to start tracking a key which never failed.
			None => return,
		};
		let mut record = record.lock().unwrap_or_else(PoisonError::into_inner);
		if record.clear(duration_since_epoch) {
			log_trace!(logger, "Cleared penalty of {} after forwarding {} msat", key, amount_msat);
		} else {
			log_trace!(logger, "Ignoring stale success of {} reported for {:?}, last updated at {:?}",
				key, duration_since_epoch, record.last_updated);
		}
	}

	/// Records that a forward of `amount_msat` failed at `key`, increasing the penalty held
	/// against it by the amount configured for `kind`.
	pub fn report_failure(
		&self, key: &ReliabilityKey, amount_msat: u64, kind: FailureKind, duration_since_epoch: Duration,
	) {
		self.advance_clock(duration_since_epoch);
		let class = kind.class();
		let half_lives = self.half_lives(key);
		let penalty_msat = self.failure_penalty_msat(key, class);
		let max_penalty_msat = self.config.max_penalty_msat;
		let (node_id, short_channel_id) = key.log_context();
		let logger = WithContext::from(&self.logger, node_id, short_channel_id);

		let apply = |record: &mut PenaltyRecord| {
			record.add_failure(class, penalty_msat, duration_since_epoch, &half_lives, max_penalty_msat);
			log_debug!(logger, "Penalized {} by {} msat for {:?} failure forwarding {} msat, now {} msat",
				key, penalty_msat, kind, amount_msat, record.penalty_msat(record.last_updated, &half_lives));
		};

		{
			let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
			if let Some(record) = records.get(key) {
				apply(&mut *record.lock().unwrap_or_else(PoisonError::into_inner));
				return;
			}
		}

		let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
		let record = records.entry(*key)
			.or_insert_with(|| Mutex::new(PenaltyRecord::new(duration_since_epoch)));
		apply(record.get_mut().unwrap_or_else(PoisonError::into_inner));
	}

	/// Records that `route` delivered its payment, clearing penalties against every channel
	/// direction and node along it.
	pub fn report_route_success(&self, route: &Route, duration_since_epoch: Duration) {
		log_trace!(self.logger, "Payment of {} msat succeeded over {} hops", route.final_value_msat, route.hops.len());
		for (index, hop) in route.hops.iter().enumerate() {
			if let Some(edge) = route.edge_key(index) {
				self.report_success(&ReliabilityKey::Channel(edge), hop.amount_msat, duration_since_epoch);
			}
			self.report_success(&ReliabilityKey::Node(hop.node_id), hop.amount_msat, duration_since_epoch);
		}
	}

	/// Records that an attempt over `route` failed, and returns what was blamed for it.
	///
	/// The failure is attributed as described in [`attribute_failure`]. Unless the failure is
	/// ambiguous, the channels before the failing point evidently forwarded the payment and are
	/// credited with a success.
	///
	/// Returns `None`, and records nothing, if `failing_hop` is past the end of the route.
	pub fn report_route_failure(
		&self, route: &Route, failing_hop: Option<usize>, kind: FailureKind, duration_since_epoch: Duration,
	) -> Option<ReliabilityKey> {
		let (key, kind) = match attribute_failure(route, failing_hop, kind) {
			Some(attribution) => attribution,
			None => {
				log_warn!(self.logger, "Ignoring failure at hop {:?} of a {}-hop route", failing_hop, route.hops.len());
				return None;
			},
		};
		let index = failing_hop.unwrap_or(0);
		let amount_msat = route.hops.get(index).map_or(route.final_value_msat, |hop| hop.amount_msat);

		if kind != FailureKind::Ambiguous {
			let forwarded_hops = if kind.is_node_failure() { index + 1 } else { index };
			for (prior_index, hop) in route.hops.iter().enumerate().take(forwarded_hops) {
				if let Some(edge) = route.edge_key(prior_index) {
					self.report_success(&ReliabilityKey::Channel(edge), hop.amount_msat, duration_since_epoch);
				}
			}
		}
		self.report_failure(&key, amount_msat, kind, duration_since_epoch);
		Some(key)
	}

	/// Advances the store's clock to `now` and evicts every entry whose penalty has decayed below
	/// [`MissionControlConfig::eviction_threshold_msat`].
	///
	/// Penalties are decayed lazily on read, so calling this only bounds memory usage and never
	/// changes an observable penalty.
	pub fn commit_decay(&self, now: Duration) {
		self.advance_clock(now);
		let now = self.current_time();
		let threshold_msat = self.config.eviction_threshold_msat;
		let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
		let tracked = records.len();
		records.retain(|key, record| {
			let half_lives = self.half_lives(key);
			// Records keep the time of their latest report, which the ordering of later reports
			// is checked against, so the sweep only reads them.
			let record = record.get_mut().unwrap_or_else(PoisonError::into_inner);
			record.penalty_msat(now, &half_lives) >= threshold_msat
		});
		log_debug!(self.logger, "Committed decay to {:?}, evicted {} of {} entries",
			now, tracked - records.len(), tracked);
	}

	/// As [`Self::commit_decay`], also recording `best_block_height` for stamping absolute
	/// time-locks on the routes sessions hand out.
	pub fn commit_decay_at_height(&self, now: Duration, best_block_height: u32) {
		self.best_block_height.fetch_max(best_block_height, Ordering::AcqRel);
		self.commit_decay(now);
	}

	/// As [`Self::commit_decay`], using the system clock.
	#[cfg(feature = "std")]
	pub fn commit_decay_now(&self) {
		use std::time::{SystemTime, UNIX_EPOCH};
		let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
		self.commit_decay(now);
	}

	/// Returns a copy of every non-zero penalty decayed to [`Self::current_time`].
	pub fn snapshot(&self) -> PenaltySnapshot {
		self.snapshot_at(self.current_time())
	}

	/// Returns a copy of every non-zero penalty decayed to `now`.
	pub fn snapshot_at(&self, now: Duration) -> PenaltySnapshot {
		let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
		let mut penalties = hash_map_with_capacity(records.len());
		for (key, record) in records.iter() {
			let record = record.lock().unwrap_or_else(PoisonError::into_inner);
			let penalty_msat = record.penalty_msat(now, &self.half_lives(key));
			if penalty_msat > 0 {
				penalties.insert(*key, penalty_msat);
			}
		}
		PenaltySnapshot { penalties, taken_at: now }
	}

	/// Starts a [`PaymentSession`] for `params` which learns from, and reports into, this store.
	///
	/// See [`PaymentSession::new`].
	pub fn new_payment_session<G: GraphView>(
		&self, our_node_id: NodeId, graph: G, params: RouteParameters, config: PaymentSessionConfig,
		scoring_params: ScoringParameters,
	) -> Result<PaymentSession<'_, G, L>, PaymentError> {
		PaymentSession::new(self, our_node_id, graph, params, config, scoring_params)
	}
}
