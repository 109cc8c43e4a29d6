// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Drives the attempts of a single payment.
//!
//! A [`PaymentSession`] hands out one [`Route`] at a time via [`PaymentSession::next_route`].
//! The caller forwards it and reports back what happened via
//! [`PaymentSession::report_outcome`]. Outcomes are pushed into the shared [`MissionControl`]
//! and whatever failed is excluded for the rest of the payment, until the amount has been
//! delivered or no route is left.
//!
//! ```text
//!              next_route             report_outcome(Success)
//!  Searching ------------> AttemptPending ----------------------> Complete
//!     ^   |                      |
//!     |   | no route             | report_outcome(Failed)
//!     |   v                      |
//!     | Exhausted                |
//!     +--------------------------+
//! ```
//!
//! [`PaymentSession::abandon`] moves any non-terminal session to `Abandoned`.

use crate::routing::graph::{DirectedChannel, GraphView, NodeId};
use crate::routing::mission_control::{FailureKind, MissionControl, ReliabilityKey};
use crate::routing::router::{ExclusionSet, Route, RouteParameters, SessionGraph, find_route};
use crate::routing::scoring::{EdgeCost, edge_cost};
use crate::util::config::{PaymentSessionConfig, ScoringParameters};
use crate::util::errors::{PaymentError, RoutingError};
use crate::util::logger::Logger;

use crate::prelude::*;
use core::ops::Deref;
use core::time::Duration;

/// Where a [`PaymentSession`] stands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
	/// Waiting for [`PaymentSession::next_route`] to compute the next attempt.
	Searching,
	/// A route has been handed out and its outcome has not been reported yet.
	AttemptPending,
	/// The whole amount has been delivered.
	Complete,
	/// No route honoring the payment's limits and the session's exclusions is left, or the
	/// session ran out of attempts.
	Exhausted,
	/// The caller gave up on the payment.
	Abandoned,
}

impl SessionState {
	/// Whether the session can make no further progress.
	pub fn is_terminal(&self) -> bool {
		match self {
			SessionState::Complete | SessionState::Exhausted | SessionState::Abandoned => true,
			SessionState::Searching | SessionState::AttemptPending => false,
		}
	}
}

/// What happened to an attempt, as reported by whatever forwarded it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttemptResult {
	/// The payee received the attempt's amount.
	Success,
	/// The attempt failed.
	Failed {
		/// The index into [`Route::hops`] the failure originated at, if known.
		failing_hop: Option<usize>,
		/// Why the attempt failed. Ignored, and treated as [`FailureKind::Ambiguous`], if
		/// `failing_hop` is `None`.
		kind: FailureKind,
	},
}

fn prorate_msat(total_msat: u64, part_msat: u64, whole_msat: u64) -> u64 {
	if whole_msat == 0 {
		return 0;
	}
	(total_msat as u128 * part_msat as u128 / whole_msat as u128) as u64
}

/// The state of one logical payment across its attempts.
///
/// The session exclusively owns its [`ExclusionSet`] and the amount left to deliver, while the
/// [`MissionControl`] it reports to is shared with every other session.
///
/// Only one attempt is ever pending per session. To send parts of a payment concurrently, carve
/// out sub-sessions with [`Self::split_off`].
pub struct PaymentSession<'a, G: GraphView, L: Deref> where L::Target: Logger {
	mission_control: &'a MissionControl<L>,
	graph: G,
	our_node_id: NodeId,
	params: RouteParameters,
	hint_channels: Vec<DirectedChannel>,
	config: PaymentSessionConfig,
	scoring_params: ScoringParameters,
	exclusions: ExclusionSet,
	state: SessionState,
	pending_route: Option<Route>,
	remaining_msat: u64,
	delivered_msat: u64,
	/// What is left of `params.max_total_fee_msat` after fees paid by delivered parts.
	fee_budget_msat: Option<u64>,
	attempts: u32,
	parts_delivered: u32,
}

impl<'a, G: GraphView, L: Deref> PaymentSession<'a, G, L> where L::Target: Logger {
	/// Creates a session for delivering `params.final_value_msat` to `params.payee` over `graph`.
	///
	/// Fails if the parameters could never be routed, eg because they ask us to pay ourselves.
	pub fn new(
		mission_control: &'a MissionControl<L>, our_node_id: NodeId, graph: G, params: RouteParameters,
		config: PaymentSessionConfig, scoring_params: ScoringParameters,
	) -> Result<Self, PaymentError> {
		params.validate(&our_node_id)?;
		log_debug!(mission_control.logger, "Starting payment session for {} msat to {}",
			params.final_value_msat, params.payee);
		Ok(Self {
			mission_control,
			graph,
			our_node_id,
			hint_channels: params.hint_channels(),
			remaining_msat: params.final_value_msat,
			fee_budget_msat: params.max_total_fee_msat,
			params,
			config,
			scoring_params,
			exclusions: ExclusionSet::new(),
			state: SessionState::Searching,
			pending_route: None,
			delivered_msat: 0,
			attempts: 0,
			parts_delivered: 0,
		})
	}

	/// Creates a session and computes its first route in one go.
	///
	/// Anything in `exclusions` is avoided from the first attempt on.
	pub fn begin(
		mission_control: &'a MissionControl<L>, our_node_id: NodeId, graph: G, params: RouteParameters,
		exclusions: ExclusionSet, config: PaymentSessionConfig, scoring_params: ScoringParameters,
		duration_since_epoch: Duration,
	) -> Result<(Self, Route), PaymentError> {
		let mut session = Self::new(mission_control, our_node_id, graph, params, config, scoring_params)?;
		session.exclusions = exclusions;
		let route = session.next_route(duration_since_epoch)?;
		Ok((session, route))
	}

	/// The session's current state.
	pub fn state(&self) -> SessionState {
		self.state
	}

	/// The parameters the session was created with.
	pub fn params(&self) -> &RouteParameters {
		&self.params
	}

	/// The amount not yet delivered, including that of a pending attempt.
	pub fn remaining_msat(&self) -> u64 {
		self.remaining_msat
	}

	/// The amount delivered so far.
	pub fn delivered_msat(&self) -> u64 {
		self.delivered_msat
	}

	/// The number of routes handed out so far.
	pub fn attempts(&self) -> u32 {
		self.attempts
	}

	/// The nodes and channel directions this session no longer routes over.
	pub fn exclusions(&self) -> &ExclusionSet {
		&self.exclusions
	}

	/// The route awaiting an outcome, if any.
	pub fn pending_route(&self) -> Option<&Route> {
		self.pending_route.as_ref()
	}

	/// The graph this session routes over: the shared graph plus the payee's route hints, minus
	/// everything excluded so far.
	pub fn graph_view(&self) -> SessionGraph<'_, G> {
		SessionGraph::new(&self.graph, &self.hint_channels, &self.exclusions)
	}

	/// The cost path finding would currently assign to routing `amount_msat` over `channel`,
	/// scored against the live reliability store.
	pub fn edge_score(&self, channel: &DirectedChannel, amount_msat: u64) -> Option<EdgeCost> {
		let is_first_hop = channel.source == self.our_node_id;
		edge_cost(channel, amount_msat, is_first_hop, self.mission_control, &self.scoring_params)
	}

	fn part_parameters(&self, amount_msat: u64) -> RouteParameters {
		RouteParameters {
			final_value_msat: amount_msat,
			max_total_fee_msat: self.fee_budget_msat
				.map(|budget_msat| prorate_msat(budget_msat, amount_msat, self.remaining_msat)),
			..self.params.clone()
		}
	}

	fn can_split_to(&self, part_msat: u64) -> bool {
		if part_msat == 0 || part_msat < self.config.min_part_msat {
			return false;
		}
		let parts_needed = (self.remaining_msat + part_msat - 1) / part_msat;
		self.parts_delivered as u64 + parts_needed <= self.config.max_parts as u64
	}

	/// Computes the next route to attempt and moves to [`SessionState::AttemptPending`].
	///
	/// The whole remaining amount is tried first. If no route can carry it, ever smaller parts
	/// are tried as far as [`PaymentSessionConfig::max_parts`] and
	/// [`PaymentSessionConfig::min_part_msat`] allow.
	///
	/// Moves to [`SessionState::Exhausted`], returning [`PaymentError::Exhausted`], if no route is
	/// left or the session has run out of attempts.
	pub fn next_route(&mut self, duration_since_epoch: Duration) -> Result<Route, PaymentError> {
		if self.state != SessionState::Searching {
			return Err(PaymentError::InvalidState {
				err: format!("Cannot search for a route while {:?}", self.state),
			});
		}
		let logger = &*self.mission_control.logger;
		if self.attempts >= self.config.max_attempts {
			log_info!(logger, "Giving up on payment to {} after {} attempts", self.params.payee, self.attempts);
			self.state = SessionState::Exhausted;
			return Err(PaymentError::Exhausted { err: "Reached the maximum number of attempts".to_owned() });
		}

		let snapshot = self.mission_control.snapshot_at(duration_since_epoch);
		let mut amount_msat = self.remaining_msat;
		loop {
			let params = self.part_parameters(amount_msat);
			match find_route(&self.our_node_id, &params, &self.graph, &self.exclusions, &snapshot,
				&self.scoring_params, logger)
			{
				Ok(route) => {
					let best_block_height = self.mission_control.best_block_height();
					let route = if best_block_height != 0 { route.with_block_height(best_block_height) } else { route };
					self.attempts += 1;
					self.pending_route = Some(route.clone());
					self.state = SessionState::AttemptPending;
					return Ok(route);
				},
				Err(RoutingError::NoRouteFound { err }) => {
					let part_msat = amount_msat / 2;
					if self.can_split_to(part_msat) {
						log_debug!(logger, "No route for {} msat to {}, trying a part of {} msat",
							amount_msat, self.params.payee, part_msat);
						amount_msat = part_msat;
						continue;
					}
					log_info!(logger, "No route left for {} msat to {}: {}", amount_msat, self.params.payee, err);
					self.state = SessionState::Exhausted;
					return Err(PaymentError::Exhausted { err });
				},
				Err(e) => {
					self.state = SessionState::Exhausted;
					return Err(e.into());
				},
			}
		}
	}

	/// Reports the outcome of the pending attempt over `route`.
	///
	/// The outcome is always applied to the reliability store, even if the session has been
	/// abandoned in the meantime. On failure, whatever the failure is attributed to is excluded
	/// for the rest of the payment: the failing channel direction (both directions for
	/// [`FailureKind::PermanentChannel`]) or the failing node.
	///
	/// Returns the state the session moved to.
	pub fn report_outcome(
		&mut self, route: &Route, result: AttemptResult, duration_since_epoch: Duration,
	) -> Result<SessionState, PaymentError> {
		match self.pending_route {
			Some(ref pending) if pending == route => {},
			_ => return Err(PaymentError::InvalidState {
				err: "Outcome reported for a route which is not pending".to_owned(),
			}),
		}
		if let AttemptResult::Failed { failing_hop: Some(index), .. } = result {
			if index >= route.hops.len() {
				return Err(PaymentError::InvalidOutcome {
					err: format!("Failing hop {} is past the end of a {}-hop route", index, route.hops.len()),
				});
			}
		}
		self.pending_route = None;

		match result {
			AttemptResult::Success => {
				self.mission_control.report_route_success(route, duration_since_epoch);
				if self.state == SessionState::Abandoned {
					return Ok(self.state);
				}
				self.delivered_msat += route.final_value_msat;
				self.remaining_msat = self.remaining_msat.saturating_sub(route.final_value_msat);
				self.fee_budget_msat = self.fee_budget_msat
					.map(|budget_msat| budget_msat.saturating_sub(route.get_total_fees()));
				self.parts_delivered += 1;
				self.state = if self.remaining_msat == 0 { SessionState::Complete } else { SessionState::Searching };
				log_debug!(self.mission_control.logger, "Delivered {} msat to {}, {} msat remaining",
					route.final_value_msat, self.params.payee, self.remaining_msat);
			},
			AttemptResult::Failed { failing_hop, kind } => {
				let blamed = self.mission_control.report_route_failure(route, failing_hop, kind, duration_since_epoch);
				if self.state == SessionState::Abandoned {
					return Ok(self.state);
				}
				match blamed {
					Some(ReliabilityKey::Node(node_id)) => self.exclusions.exclude_node(node_id),
					Some(ReliabilityKey::Channel(edge)) => {
						let counterparty = failing_hop.and_then(|index| route.hops.get(index)).map(|hop| hop.node_id);
						match (kind, counterparty) {
							(FailureKind::PermanentChannel, Some(counterparty)) => self.exclusions
								.exclude_channel_both_directions(edge.short_channel_id, edge.source, counterparty),
							_ => self.exclusions.exclude_channel(edge),
						}
					},
					None => {},
				}
				self.state = SessionState::Searching;
				log_debug!(self.mission_control.logger, "Attempt {} to {} failed at hop {:?}, excluding {} nodes and channels",
					self.attempts, self.params.payee, failing_hop, self.exclusions.len());
			},
		}
		Ok(self.state)
	}

	/// Gives up on the payment.
	///
	/// The session's exclusions are released immediately. An outcome for an attempt still in
	/// flight may be reported afterwards and is applied to the reliability store. Has no effect
	/// on a session which already completed or was exhausted.
	pub fn abandon(&mut self) {
		match self.state {
			SessionState::Complete | SessionState::Exhausted | SessionState::Abandoned => return,
			SessionState::Searching | SessionState::AttemptPending => {},
		}
		log_debug!(self.mission_control.logger, "Abandoning payment to {} with {} msat undelivered",
			self.params.payee, self.remaining_msat);
		self.state = SessionState::Abandoned;
		self.exclusions = ExclusionSet::new();
		self.hint_channels = Vec::new();
	}
}

impl<'a, G: GraphView + Clone, L: Deref> PaymentSession<'a, G, L> where L::Target: Logger {
	/// Carves `amount_msat` out of the amount this session still has to deliver into a new,
	/// independent session.
	///
	/// The new session starts with a copy of this session's exclusions and a prorated share of
	/// its remaining fee budget, and reports into the same [`MissionControl`]. Exclusions added
	/// by either session afterwards do not affect the other.
	///
	/// `amount_msat` must be less than the remaining amount not already pending.
	pub fn split_off(&mut self, amount_msat: u64) -> Result<PaymentSession<'a, G, L>, PaymentError> {
		if self.state.is_terminal() {
			return Err(PaymentError::InvalidState {
				err: format!("Cannot split a session which is {:?}", self.state),
			});
		}
		let pending_msat = self.pending_route.as_ref().map_or(0, |route| route.final_value_msat);
		let available_msat = self.remaining_msat.saturating_sub(pending_msat);
		if amount_msat == 0 || amount_msat >= available_msat {
			return Err(PaymentError::InvalidState {
				err: format!("Cannot split off {} msat with {} msat available", amount_msat, available_msat),
			});
		}

		let fee_budget_msat = self.fee_budget_msat
			.map(|budget_msat| prorate_msat(budget_msat, amount_msat, self.remaining_msat));
		if let (Some(budget_msat), Some(split_msat)) = (self.fee_budget_msat.as_mut(), fee_budget_msat) {
			*budget_msat -= split_msat;
		}
		self.remaining_msat -= amount_msat;
		log_debug!(self.mission_control.logger, "Split {} msat off payment to {}, {} msat remaining",
			amount_msat, self.params.payee, self.remaining_msat);

		Ok(PaymentSession {
			mission_control: self.mission_control,
			graph: self.graph.clone(),
			our_node_id: self.our_node_id,
			params: RouteParameters {
				final_value_msat: amount_msat,
				max_total_fee_msat: fee_budget_msat,
				..self.params.clone()
			},
			hint_channels: self.hint_channels.clone(),
			config: self.config,
			scoring_params: self.scoring_params,
			exclusions: self.exclusions.clone(),
			state: SessionState::Searching,
			pending_route: None,
			remaining_msat: amount_msat,
			delivered_msat: 0,
			fee_budget_msat,
			attempts: 0,
			parts_delivered: 0,
		})
	}
}

#[cfg(test)]
mod tests {
	use crate::routing::graph::{EdgeKey, GraphView, NetworkGraph, RoutingFees};
	use crate::routing::mission_control::{FailureKind, MissionControl, ReliabilityKey};
	use crate::routing::payment_session::{AttemptResult, PaymentSession, SessionState};
	use crate::routing::router::{ExclusionSet, RouteParameters};
	use crate::util::config::{MissionControlConfig, PaymentSessionConfig, RoutingConfig, ScoringParameters};
	use crate::util::errors::PaymentError;
	use crate::util::test_utils::{TestLogger, add_channel, channel_update, node_id};

	use core::time::Duration;

	const T0: Duration = Duration::from_secs(1_700_000_000);

	fn no_fees() -> RoutingFees {
		RoutingFees { base_msat: 0, proportional_millionths: 0 }
	}

	fn scids(route: &crate::routing::router::Route) -> Vec<u64> {
		route.hops.iter().map(|hop| hop.short_channel_id).collect()
	}

	// Node 1 is us, node 4 the payee. 1 -(1)-> 2 -(3)-> 4 and 1 -(2)-> 3 -(4)-> 4, with the
	// payee-side channels limited to `max_msat`.
	fn diamond_graph(logger: &TestLogger, max_msat: u64) -> NetworkGraph<&TestLogger> {
		let graph = NetworkGraph::new(logger);
		let mut limited = channel_update(no_fees(), 40);
		limited.htlc_maximum_msat = max_msat;
		add_channel(&graph, 1, 1, 2, channel_update(no_fees(), 40));
		add_channel(&graph, 2, 1, 3, channel_update(no_fees(), 40));
		add_channel(&graph, 3, 2, 4, limited.clone());
		add_channel(&graph, 4, 3, 4, limited);
		graph
	}

	#[test]
	fn single_path_liquidity_failure_exhausts() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		add_channel(&graph, 1, 1, 2, channel_update(no_fees(), 40));
		add_channel(&graph, 2, 2, 3, channel_update(no_fees(), 40));
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);

		let (mut session, route) = PaymentSession::begin(&mission_control, node_id(1), &view,
			RouteParameters::from_payee(node_id(3), 100_000, 18), ExclusionSet::new(),
			PaymentSessionConfig::default(), ScoringParameters::default(), T0).unwrap();
		assert_eq!(session.state(), SessionState::AttemptPending);
		assert_eq!(scids(&route), vec![1, 2]);

		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
		assert_eq!(session.report_outcome(&route, failure, T0).unwrap(), SessionState::Searching);
		let failed_edge = EdgeKey { short_channel_id: 2, source: node_id(2) };
		assert!(session.exclusions().is_channel_excluded(&failed_edge));
		assert!(mission_control.penalty(&ReliabilityKey::Channel(failed_edge)) > 0);

		match session.next_route(T0) {
			Err(PaymentError::Exhausted { .. }) => {},
			res => panic!("Unexpected result {:?}", res),
		}
		assert_eq!(session.state(), SessionState::Exhausted);
		assert_eq!(session.delivered_msat(), 0);
	}

	#[test]
	fn retries_around_failed_channel() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		assert_eq!(scids(&route), vec![1, 3]);
		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
		session.report_outcome(&route, failure, T0).unwrap();

		let route = session.next_route(T0).unwrap();
		assert_eq!(scids(&route), vec![2, 4]);
		assert_eq!(session.report_outcome(&route, AttemptResult::Success, T0).unwrap(), SessionState::Complete);
		assert_eq!(session.attempts(), 2);
		assert_eq!(session.delivered_msat(), 100_000);
		assert_eq!(session.remaining_msat(), 0);

		// The successful route is cleared of any penalty while the failed channel keeps its own.
		assert_eq!(mission_control.penalty(&ReliabilityKey::Channel(route.edge_key(1).unwrap())), 0);
		assert!(mission_control.penalty(&ReliabilityKey::Channel(EdgeKey { short_channel_id: 3, source: node_id(2) })) > 0);
		assert!(matches!(session.next_route(T0), Err(PaymentError::InvalidState { .. })));
	}

	#[test]
	fn node_failure_excludes_node() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		let failure = AttemptResult::Failed { failing_hop: Some(0), kind: FailureKind::PermanentNode };
		session.report_outcome(&route, failure, T0).unwrap();
		assert!(session.exclusions().is_node_excluded(&node_id(2)));
		assert!(session.graph_view().channels_to(&node_id(4)).all(|chan| chan.source != node_id(2)));

		let route = session.next_route(T0).unwrap();
		assert!(route.hops.iter().all(|hop| hop.node_id != node_id(2)));
	}

	#[test]
	fn unattributed_failure_is_ambiguous() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let config = MissionControlConfig::default();
		let mission_control = MissionControl::new(config, &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		let failure = AttemptResult::Failed { failing_hop: None, kind: FailureKind::PermanentNode };
		session.report_outcome(&route, failure, T0).unwrap();

		let first_hop = route.edge_key(0).unwrap();
		assert!(session.exclusions().is_channel_excluded(&first_hop));
		assert!(!session.exclusions().is_node_excluded(&node_id(2)));
		assert_eq!(mission_control.penalty(&ReliabilityKey::Channel(first_hop)), config.ambiguous_failure_penalty_msat);
	}

	#[test]
	fn permanent_channel_failure_excludes_both_directions() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::PermanentChannel };
		session.report_outcome(&route, failure, T0).unwrap();
		assert!(session.exclusions().is_channel_excluded(&EdgeKey { short_channel_id: 3, source: node_id(2) }));
		assert!(session.exclusions().is_channel_excluded(&EdgeKey { short_channel_id: 3, source: node_id(4) }));
	}

	#[test]
	fn gives_up_after_max_attempts() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let config = PaymentSessionConfig { max_attempts: 1, ..PaymentSessionConfig::default() };
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), config, ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
		session.report_outcome(&route, failure, T0).unwrap();
		match session.next_route(T0) {
			Err(PaymentError::Exhausted { err }) => assert_eq!(err, "Reached the maximum number of attempts"),
			res => panic!("Unexpected result {:?}", res),
		}
		assert_eq!(session.state(), SessionState::Exhausted);
	}

	#[test]
	fn rejects_mismatched_outcomes() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		assert!(matches!(session.next_route(T0), Err(PaymentError::InvalidState { .. })));

		let mut other = route.clone();
		other.final_value_msat += 1;
		assert!(matches!(session.report_outcome(&other, AttemptResult::Success, T0),
			Err(PaymentError::InvalidState { .. })));

		let failure = AttemptResult::Failed { failing_hop: Some(2), kind: FailureKind::TemporaryChannel };
		assert!(matches!(session.report_outcome(&route, failure, T0), Err(PaymentError::InvalidOutcome { .. })));
		assert_eq!(session.state(), SessionState::AttemptPending);
		assert_eq!(mission_control.tracked_entries(), 0);

		assert!(matches!(
			PaymentSession::new(&mission_control, node_id(1), &view, RouteParameters::from_payee(node_id(1), 1_000, 18),
				PaymentSessionConfig::default(), ScoringParameters::default()),
			Err(PaymentError::Routing(_))));
	}

	#[test]
	fn abandoned_session_still_reports() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		session.abandon();
		assert_eq!(session.state(), SessionState::Abandoned);

		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
		assert_eq!(session.report_outcome(&route, failure, T0).unwrap(), SessionState::Abandoned);
		assert!(mission_control.penalty(&ReliabilityKey::Channel(route.edge_key(1).unwrap())) > 0);
		assert!(session.exclusions().is_empty());
		assert!(matches!(session.next_route(T0), Err(PaymentError::InvalidState { .. })));
	}

	#[test]
	fn splits_amount_no_single_route_can_carry() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 60_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
			ScoringParameters::default()).unwrap();

		let route = session.next_route(T0).unwrap();
		assert_eq!(route.final_value_msat, 50_000);
		assert_eq!(session.report_outcome(&route, AttemptResult::Success, T0).unwrap(), SessionState::Searching);
		assert_eq!(session.remaining_msat(), 50_000);

		let route = session.next_route(T0).unwrap();
		assert_eq!(route.final_value_msat, 50_000);
		assert_eq!(session.report_outcome(&route, AttemptResult::Success, T0).unwrap(), SessionState::Complete);
		assert_eq!(session.delivered_msat(), 100_000);

		let config = PaymentSessionConfig { max_parts: 1, ..PaymentSessionConfig::default() };
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), config, ScoringParameters::default()).unwrap();
		assert!(matches!(session.next_route(T0), Err(PaymentError::Exhausted { .. })));
	}

	#[test]
	fn split_parts_share_fee_ceiling() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let mut limited = channel_update(RoutingFees { base_msat: 100, proportional_millionths: 1_000 }, 40);
		limited.htlc_maximum_msat = 60_000;
		add_channel(&graph, 1, 1, 2, channel_update(no_fees(), 40));
		add_channel(&graph, 2, 1, 3, channel_update(no_fees(), 40));
		add_channel(&graph, 3, 2, 4, limited.clone());
		add_channel(&graph, 4, 3, 4, limited);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);

		// Each 50_000 msat part pays 100 + 50 msat to its intermediate hop.
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18).with_max_total_fee_msat(400),
			PaymentSessionConfig::default(), ScoringParameters::default()).unwrap();
		let mut fees_paid_msat = 0;
		while session.state() != SessionState::Complete {
			let route = session.next_route(T0).unwrap();
			assert_eq!(route.final_value_msat, 50_000);
			assert_eq!(route.get_total_fees(), 150);
			fees_paid_msat += route.get_total_fees();
			session.report_outcome(&route, AttemptResult::Success, T0).unwrap();
		}
		assert_eq!(session.delivered_msat(), 100_000);
		assert!(fees_paid_msat <= 400);

		// 125 msat per half is less than a part costs, and smaller parts cost proportionally more.
		let mut session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18).with_max_total_fee_msat(250),
			PaymentSessionConfig::default(), ScoringParameters::default()).unwrap();
		assert!(matches!(session.next_route(T0), Err(PaymentError::Exhausted { .. })));
		assert_eq!(session.state(), SessionState::Exhausted);
	}

	#[test]
	fn split_off_sessions_are_independent() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		mission_control.commit_decay_at_height(T0, 800_000);
		let mut parent = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18).with_max_total_fee_msat(1_000),
			PaymentSessionConfig::default(), ScoringParameters::default()).unwrap();

		let mut child = parent.split_off(40_000).unwrap();
		assert_eq!(parent.remaining_msat(), 60_000);
		assert_eq!(child.remaining_msat(), 40_000);
		assert_eq!(child.params().max_total_fee_msat, Some(400));
		assert!(parent.split_off(60_000).is_err());

		let child_route = child.next_route(T0).unwrap();
		assert_eq!(child_route.final_value_msat, 40_000);
		assert_eq!(child_route.hops[1].cltv_expiry, Some(800_018));
		let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
		child.report_outcome(&child_route, failure, T0).unwrap();
		assert_eq!(child.exclusions().len(), 1);
		assert!(parent.exclusions().is_empty());

		// The parent learns of the child's failure through the shared store.
		let parent_route = parent.next_route(T0).unwrap();
		assert_eq!(scids(&parent_route), vec![2, 4]);
		assert_eq!(parent_route.final_value_msat, 60_000);
	}

	#[test]
	fn edge_score_uses_live_penalties() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let config = RoutingConfig::default();
		let mission_control = MissionControl::new(config.mission_control, &logger);
		let session = mission_control.new_payment_session(node_id(1), &view,
			RouteParameters::from_payee(node_id(4), 100_000, 18), config.payment_session, config.scoring).unwrap();

		let channel = view.channels_to(&node_id(4)).find(|chan| chan.short_channel_id == 3).unwrap();
		let before = session.edge_score(&channel, 100_000).unwrap();
		assert_eq!(before.reliability_penalty_msat, 0);
		mission_control.report_failure(&ReliabilityKey::Channel(channel.key()), 100_000, FailureKind::TemporaryChannel, T0);
		let after = session.edge_score(&channel, 100_000).unwrap();
		assert!(after.total_msat > before.total_msat);
	}

	#[test]
	fn concurrent_sessions_share_reliability_store() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, 1_000_000);
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);

		std::thread::scope(|s| {
			for _ in 0..4 {
				s.spawn(|| {
					let mut session = mission_control.new_payment_session(node_id(1), &view,
						RouteParameters::from_payee(node_id(4), 100_000, 18), PaymentSessionConfig::default(),
						ScoringParameters::default()).unwrap();
					let route = session.next_route(T0).unwrap();
					let failure = AttemptResult::Failed { failing_hop: Some(1), kind: FailureKind::TemporaryChannel };
					session.report_outcome(&route, failure, T0).unwrap();

					// Whichever path failed is excluded, so the other one carries the payment.
					let retry = session.next_route(T0).unwrap();
					assert_ne!(scids(&retry), scids(&route));
					assert_eq!(session.report_outcome(&retry, AttemptResult::Success, T0).unwrap(), SessionState::Complete);
				});
			}
		});
		assert!(mission_control.tracked_entries() > 0);
	}
}
