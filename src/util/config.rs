// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Various user-configurable penalties, decay rates and retry limits which [`MissionControl`],
//! the path finder and [`PaymentSession`] apply for you.
//!
//! [`MissionControl`]: crate::routing::mission_control::MissionControl
//! [`PaymentSession`]: crate::routing::payment_session::PaymentSession

use core::time::Duration;

/// How hard, and for how long, the reliability store holds a failure against a node or channel.
///
/// Each failure class accumulates separately and decays with its own half-life: after one
/// half-life without further failures, the class's penalty reads back at half its value.
///
/// `Default::default()` provides sane defaults.
#[derive(Copy, Clone, Debug)]
pub struct MissionControlConfig {
	/// Penalty in msats applied to a channel which could not forward for liquidity reasons, eg
	/// `temporary_channel_failure`.
	///
	/// Default value: 500_000 msat.
	pub temporary_channel_failure_penalty_msat: u64,
	/// Time after which an accumulated temporary channel penalty is cut in half.
	///
	/// Liquidity moves quickly, so this should be short.
	///
	/// Default value: 10 minutes.
	pub temporary_channel_failure_half_life: Duration,
	/// Penalty in msats applied to a channel which refused to forward for policy reasons, eg
	/// `fee_insufficient` or `channel_disabled`.
	///
	/// Default value: 2_000_000 msat.
	pub permanent_channel_failure_penalty_msat: u64,
	/// Time after which an accumulated permanent channel penalty is cut in half.
	///
	/// Default value: 1 hour.
	pub permanent_channel_failure_half_life: Duration,
	/// Penalty in msats applied to a node which reported itself temporarily unable to forward.
	///
	/// Default value: 1_000_000 msat.
	pub temporary_node_failure_penalty_msat: u64,
	/// Time after which an accumulated temporary node penalty is cut in half.
	///
	/// Default value: 30 minutes.
	pub temporary_node_failure_half_life: Duration,
	/// Penalty in msats applied to a node which is unreachable or misbehaving.
	///
	/// Default value: 4_000_000 msat.
	pub permanent_node_failure_penalty_msat: u64,
	/// Time after which an accumulated permanent node penalty is cut in half.
	///
	/// Default value: 1 hour.
	pub permanent_node_failure_half_life: Duration,
	/// Penalty in msats applied when an attempt timed out or came back unreadable. Such evidence
	/// may well be our own fault, so this is the smallest penalty and the fastest decay.
	///
	/// Default value: 100_000 msat.
	pub ambiguous_failure_penalty_msat: u64,
	/// Time after which an accumulated ambiguous-failure penalty is cut in half.
	///
	/// Default value: 5 minutes.
	pub ambiguous_failure_half_life: Duration,
	/// Upper bound on the undecayed penalty any single failure class may accumulate for one
	/// node or channel, so a burst of failures cannot blacklist it for days.
	///
	/// Default value: 100_000_000 msat.
	pub max_penalty_msat: u64,
	/// Entries whose decayed penalty has fallen below this value are dropped by
	/// [`MissionControl::commit_decay`].
	///
	/// Default value: 1 msat.
	///
	/// [`MissionControl::commit_decay`]: crate::routing::mission_control::MissionControl::commit_decay
	pub eviction_threshold_msat: u64,
}

impl Default for MissionControlConfig {
	fn default() -> Self {
		MissionControlConfig {
			temporary_channel_failure_penalty_msat: 500_000,
			temporary_channel_failure_half_life: Duration::from_secs(10 * 60),
			permanent_channel_failure_penalty_msat: 2_000_000,
			permanent_channel_failure_half_life: Duration::from_secs(60 * 60),
			temporary_node_failure_penalty_msat: 1_000_000,
			temporary_node_failure_half_life: Duration::from_secs(30 * 60),
			permanent_node_failure_penalty_msat: 4_000_000,
			permanent_node_failure_half_life: Duration::from_secs(60 * 60),
			ambiguous_failure_penalty_msat: 100_000,
			ambiguous_failure_half_life: Duration::from_secs(5 * 60),
			max_penalty_msat: 100_000_000,
			eviction_threshold_msat: 1,
		}
	}
}

/// Parameters for turning an edge into a single comparable cost during path finding.
///
/// All costs are expressed in msats, so reliability penalties act as a fee we are willing to pay
/// to avoid a hop.
#[derive(Copy, Clone, Debug)]
pub struct ScoringParameters {
	/// A fixed penalty in msats to apply to each hop, thus avoiding long paths when shorter paths
	/// with slightly higher fees are available.
	///
	/// Default value: 500 msat.
	pub base_penalty_msat: u64,
	/// Time-lock risk: the penalty, in parts per billion of the amount forwarded over a channel,
	/// for every block of CLTV delta that channel adds. Funds locked in a long-lived HTLC are
	/// funds we cannot use.
	///
	/// Default value: 15.
	pub cltv_penalty_ppb: u64,
	/// Percentage applied to the reliability store's penalties before they are added to an
	/// edge's cost. `0` disables reliability scoring, `200` doubles its weight.
	///
	/// Default value: 100.
	pub reliability_multiplier_pct: u64,
}

impl Default for ScoringParameters {
	fn default() -> Self {
		ScoringParameters {
			base_penalty_msat: 500,
			cltv_penalty_ppb: 15,
			reliability_multiplier_pct: 100,
		}
	}
}

/// Limits applied by a [`PaymentSession`] while retrying a single payment.
///
/// [`PaymentSession`]: crate::routing::payment_session::PaymentSession
#[derive(Copy, Clone, Debug)]
pub struct PaymentSessionConfig {
	/// The maximum number of attempts a session will hand out before giving up.
	///
	/// Default value: 20.
	pub max_attempts: u32,
	/// The maximum number of parts the remaining amount may be split into when no single route
	/// can carry it. `1` disables splitting.
	///
	/// Default value: 8.
	pub max_parts: u32,
	/// Splitting stops once a part would fall below this amount.
	///
	/// Default value: 10_000 msat.
	pub min_part_msat: u64,
}

impl Default for PaymentSessionConfig {
	fn default() -> Self {
		PaymentSessionConfig {
			max_attempts: 20,
			max_parts: 8,
			min_part_msat: 10_000,
		}
	}
}

/// Top-level config which holds all the other configuration structs used by this crate.
///
/// `Default::default()` provides sane defaults for most configurations.
#[derive(Copy, Clone, Debug, Default)]
pub struct RoutingConfig {
	/// Penalties and decay applied by the reliability store.
	pub mission_control: MissionControlConfig,
	/// Cost weighting used by the path finder.
	pub scoring: ScoringParameters,
	/// Retry and splitting limits for each payment.
	pub payment_session: PaymentSessionConfig,
}
