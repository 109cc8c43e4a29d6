// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Utilities for scoring payment channels.
//!
//! Path finding ranks edges by a single cost in msats: the fee the edge charges, a penalty for
//! the time our funds would be locked up by its CLTV delta, a fixed per-hop penalty and whatever
//! a [`ScoreLookUp`] holds against the edge or the node it leads to. Reliability penalties are
//! thus treated as an extra fee we are willing to pay to avoid a hop.
//!
//! [`PenaltySnapshot`] is the [`ScoreLookUp`] path finding uses, so that penalties stay stable
//! for the duration of a search.

use crate::routing::graph::DirectedChannel;
use crate::routing::mission_control::{MissionControl, PenaltySnapshot, ReliabilityKey};
use crate::util::config::ScoringParameters;
use crate::util::logger::Logger;

use core::ops::Deref;

/// An interface used to score payment channels for path finding.
///
/// Scoring is in terms of fees willing to be paid in order to avoid routing through a channel.
pub trait ScoreLookUp {
	/// Returns the fee in msats willing to be paid to avoid routing `amount_msat` through the
	/// given channel in the direction from its source to its target.
	///
	/// For channels from route hints the capacity is [`EffectiveCapacity::Infinite`], so
	/// implementations should be overflow-safe.
	///
	/// [`EffectiveCapacity::Infinite`]: crate::routing::graph::EffectiveCapacity::Infinite
	fn channel_penalty_msat(
		&self, channel: &DirectedChannel, amount_msat: u64, params: &ScoringParameters,
	) -> u64;
}

impl<S: ScoreLookUp + ?Sized, T: Deref<Target = S>> ScoreLookUp for T {
	fn channel_penalty_msat(
		&self, channel: &DirectedChannel, amount_msat: u64, params: &ScoringParameters,
	) -> u64 {
		self.deref().channel_penalty_msat(channel, amount_msat, params)
	}
}

/// Applies [`ScoringParameters::reliability_multiplier_pct`] to the penalties held against a
/// channel direction and the node it leads to.
fn weighted_penalty_msat(channel_penalty_msat: u64, node_penalty_msat: u64, params: &ScoringParameters) -> u64 {
	let penalty_msat = channel_penalty_msat.saturating_add(node_penalty_msat);
	let weighted = penalty_msat as u128 * params.reliability_multiplier_pct as u128 / 100;
	if weighted > u64::max_value() as u128 { u64::max_value() } else { weighted as u64 }
}

impl ScoreLookUp for PenaltySnapshot {
	fn channel_penalty_msat(
		&self, channel: &DirectedChannel, _amount_msat: u64, params: &ScoringParameters,
	) -> u64 {
		weighted_penalty_msat(
			self.penalty(&ReliabilityKey::Channel(channel.key())),
			self.penalty(&ReliabilityKey::Node(channel.target)),
			params,
		)
	}
}

/// Scores against the live store rather than a snapshot. Each lookup takes the store's locks
/// briefly, and penalties may change between two lookups.
impl<L: Deref> ScoreLookUp for MissionControl<L> where L::Target: Logger {
	fn channel_penalty_msat(
		&self, channel: &DirectedChannel, _amount_msat: u64, params: &ScoringParameters,
	) -> u64 {
		weighted_penalty_msat(
			self.penalty(&ReliabilityKey::Channel(channel.key())),
			self.penalty(&ReliabilityKey::Node(channel.target)),
			params,
		)
	}
}

/// [`ScoreLookUp`] implementation that uses a fixed penalty.
pub struct FixedPenaltyScorer {
	penalty_msat: u64,
}

impl FixedPenaltyScorer {
	/// Creates a new scorer using `penalty_msat`.
	pub fn with_penalty(penalty_msat: u64) -> Self {
		Self { penalty_msat }
	}
}

impl ScoreLookUp for FixedPenaltyScorer {
	fn channel_penalty_msat(&self, _: &DirectedChannel, _: u64, _: &ScoringParameters) -> u64 {
		self.penalty_msat
	}
}

/// The breakdown of what routing an amount over one edge costs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EdgeCost {
	/// The fee the edge's source charges for forwarding the amount.
	pub fee_msat: u64,
	/// The penalty for the blocks of CLTV delta the edge adds.
	pub time_lock_penalty_msat: u64,
	/// [`ScoringParameters::base_penalty_msat`].
	pub base_penalty_msat: u64,
	/// The penalty returned by the [`ScoreLookUp`].
	pub reliability_penalty_msat: u64,
	/// The sum of all of the above.
	pub total_msat: u64,
}

/// Returns the cost of routing `amount_msat` over `channel`, or `None` if the fee overflows.
///
/// `amount_msat` is the amount the channel must carry, ie what the next hop receives. If
/// `is_first_hop`, the channel is our own and neither fees nor time-lock risk apply to it.
pub fn edge_cost<S: ScoreLookUp + ?Sized>(
	channel: &DirectedChannel, amount_msat: u64, is_first_hop: bool, scorer: &S,
	params: &ScoringParameters,
) -> Option<EdgeCost> {
	let (fee_msat, time_lock_penalty_msat) = if is_first_hop {
		(0, 0)
	} else {
		let fee_msat = channel.fees.compute_fee(amount_msat)?;
		let time_lock_penalty = amount_msat as u128 * channel.cltv_expiry_delta as u128
			* params.cltv_penalty_ppb as u128 / 1_000_000_000;
		let time_lock_penalty_msat =
			if time_lock_penalty > u64::max_value() as u128 { u64::max_value() } else { time_lock_penalty as u64 };
		(fee_msat, time_lock_penalty_msat)
	};
	let reliability_penalty_msat = scorer.channel_penalty_msat(channel, amount_msat, params);
	let total_msat = fee_msat
		.saturating_add(time_lock_penalty_msat)
		.saturating_add(params.base_penalty_msat)
		.saturating_add(reliability_penalty_msat);
	Some(EdgeCost {
		fee_msat,
		time_lock_penalty_msat,
		base_penalty_msat: params.base_penalty_msat,
		reliability_penalty_msat,
		total_msat,
	})
}
