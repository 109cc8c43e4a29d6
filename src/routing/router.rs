// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The path finding logic lives here.
//!
//! [`find_route`] computes the single cheapest path from us to a payee over a [`GraphView`],
//! honoring the payment's fee and CLTV limits and skipping anything in an [`ExclusionSet`].

use crate::routing::graph::{DirectedChannel, EdgeKey, EffectiveCapacity, GraphView, NodeId, RoutingFees};
use crate::routing::scoring::{ScoreLookUp, edge_cost};
use crate::util::config::ScoringParameters;
use crate::util::errors::RoutingError;
use crate::util::logger::Logger;

use crate::prelude::*;
use alloc::collections::BinaryHeap;
use core::cmp;
use core::ops::Deref;

/// The maximum value of a payment, in msats: all bitcoin which will ever exist.
pub const MAX_VALUE_MSAT: u64 = 21_000_000_0000_0000_000;

/// The maximum number of hops a route may have. Onion packets cannot carry more.
pub const MAX_PATH_LENGTH: u8 = 20;

/// The default maximum total CLTV delta a route may add, about a week of blocks.
pub const DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA: u32 = 1008;

/// A hop in a route
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct RouteHop {
	/// The node_id of the node at this hop.
	pub node_id: NodeId,
	/// The channel that should be used from the previous hop to reach this node.
	pub short_channel_id: u64,
	/// The amount the HTLC sent over [`Self::short_channel_id`] carries, ie the amount this node
	/// forwards plus its fee. For the last hop this is the value delivered to the payee.
	pub amount_msat: u64,
	/// The fee taken on this hop (for paying for the use of the *next* channel in the path).
	/// Zero for the last hop.
	pub fee_msat: u64,
	/// The CLTV delta added for this hop. For the last hop, this is the CLTV delta the payee
	/// requires.
	pub cltv_expiry_delta: u32,
	/// The absolute CLTV expiry of the HTLC sent over [`Self::short_channel_id`], once the route
	/// has been stamped via [`Route::with_block_height`].
	pub cltv_expiry: Option<u32>,
}

/// A route directs a payment from the sender (us) to the recipient.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct Route {
	/// The node the route starts at, ie us.
	pub payer: NodeId,
	/// The hops of the route, NOT INCLUDING our own, where the last hop is the payee. Thus, this
	/// is always at least length one.
	pub hops: Vec<RouteHop>,
	/// The amount delivered to the payee.
	pub final_value_msat: u64,
}

impl Route {
	/// Returns the total amount of fees paid on this [`Route`].
	pub fn get_total_fees(&self) -> u64 {
		self.hops.iter().map(|hop| hop.fee_msat).sum()
	}

	/// Returns the total amount sent over this [`Route`], including fees.
	pub fn get_total_amount(&self) -> u64 {
		self.hops.first().map_or(0, |hop| hop.amount_msat)
	}

	/// Returns the total CLTV delta of this route, including the payee's.
	pub fn total_cltv_expiry_delta(&self) -> u32 {
		self.hops.iter().map(|hop| hop.cltv_expiry_delta).sum()
	}

	/// Returns the node forwarding over the channel of hop `index`.
	pub fn hop_source(&self, index: usize) -> Option<NodeId> {
		if index >= self.hops.len() {
			None
		} else if index == 0 {
			Some(self.payer)
		} else {
			Some(self.hops[index - 1].node_id)
		}
	}

	/// Returns the channel direction used to reach hop `index`.
	pub fn edge_key(&self, index: usize) -> Option<EdgeKey> {
		let source = self.hop_source(index)?;
		Some(EdgeKey { short_channel_id: self.hops[index].short_channel_id, source })
	}

	/// Fills in the absolute CLTV expiry of every hop for a payment sent at `best_block_height`.
	pub fn with_block_height(mut self, best_block_height: u32) -> Self {
		let mut cltv_expiry = best_block_height;
		for hop in self.hops.iter_mut().rev() {
			cltv_expiry = cltv_expiry.saturating_add(hop.cltv_expiry_delta);
			hop.cltv_expiry = Some(cltv_expiry);
		}
		self
	}
}

/// A channel descriptor for a hop along a payment path, eg a private channel the payee told us
/// about.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct RouteHintHop {
	/// The node_id of the non-target end of the route
	pub src_node_id: NodeId,
	/// The short_channel_id of this channel
	pub short_channel_id: u64,
	/// The fees which must be paid to use this channel
	pub fees: RoutingFees,
	/// The difference in CLTV values between this node and the next node.
	pub cltv_expiry_delta: u16,
	/// The minimum value, in msat, which must be relayed to the next hop.
	pub htlc_minimum_msat: Option<u64>,
	/// The maximum value in msat available for routing with a single HTLC.
	pub htlc_maximum_msat: Option<u64>,
}

/// A list of hops along a payment path terminating with a channel to the recipient.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct RouteHint(pub Vec<RouteHintHop>);

impl RouteHint {
	/// Converts the hint into directed channels, each hop leading to the next hop's source and
	/// the last one to `payee`.
	fn directed_channels(&self, payee: &NodeId) -> impl Iterator<Item = DirectedChannel> + '_ {
		let payee = *payee;
		self.0.iter().enumerate().map(move |(index, hop)| {
			let target = self.0.get(index + 1).map_or(payee, |next| next.src_node_id);
			let capacity = match hop.htlc_maximum_msat {
				Some(amount_msat) => EffectiveCapacity::MaximumHTLC { amount_msat },
				None => EffectiveCapacity::Infinite,
			};
			DirectedChannel {
				short_channel_id: hop.short_channel_id,
				source: hop.src_node_id,
				target,
				fees: hop.fees,
				cltv_expiry_delta: hop.cltv_expiry_delta,
				htlc_minimum_msat: hop.htlc_minimum_msat.unwrap_or(0),
				htlc_maximum_msat: hop.htlc_maximum_msat.unwrap_or(u64::max_value()),
				capacity,
			}
		})
	}
}

/// Parameters needed to find a [`Route`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteParameters {
	/// The node id of the payee.
	pub payee: NodeId,
	/// The amount in msats to deliver to the payee.
	pub final_value_msat: u64,
	/// The CLTV delta the payee requires on the final hop.
	pub final_cltv_expiry_delta: u32,
	/// The maximum total fees, in millisatoshi, that may accrue during route finding. `None`
	/// means fees are only limited by the cost of the route.
	pub max_total_fee_msat: Option<u64>,
	/// The maximum total CLTV delta, including the payee's, a route may impose.
	///
	/// Defaults to [`DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA`].
	pub max_total_cltv_expiry_delta: u32,
	/// Hints for routing to the payee, containing channels connecting the payee to public nodes.
	pub route_hints: Vec<RouteHint>,
}

impl RouteParameters {
	/// Creates parameters for delivering `final_value_msat` to `payee`, with no fee limit and
	/// the default CLTV limit.
	pub fn from_payee(payee: NodeId, final_value_msat: u64, final_cltv_expiry_delta: u32) -> Self {
		Self {
			payee,
			final_value_msat,
			final_cltv_expiry_delta,
			max_total_fee_msat: None,
			max_total_cltv_expiry_delta: DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA,
			route_hints: vec![],
		}
	}

	/// Includes hints for routing to the payee.
	pub fn with_route_hints(self, route_hints: Vec<RouteHint>) -> Self {
		Self { route_hints, ..self }
	}

	/// Limits the total fees a route may charge.
	pub fn with_max_total_fee_msat(self, max_total_fee_msat: u64) -> Self {
		Self { max_total_fee_msat: Some(max_total_fee_msat), ..self }
	}

	/// Limits the total CLTV delta a route may impose.
	pub fn with_max_total_cltv_expiry_delta(self, max_total_cltv_expiry_delta: u32) -> Self {
		Self { max_total_cltv_expiry_delta, ..self }
	}

	/// Checks the parameters describe a payment we could ever route.
	pub fn validate(&self, our_node_id: &NodeId) -> Result<(), RoutingError> {
		if self.payee == *our_node_id {
			return Err(RoutingError::InvalidParameters { err: "Cannot generate a route to ourselves".to_owned() });
		}
		if self.final_value_msat > MAX_VALUE_MSAT {
			return Err(RoutingError::InvalidParameters { err: "Cannot generate a route of more value than all existing satoshis".to_owned() });
		}
		if self.final_value_msat == 0 {
			return Err(RoutingError::InvalidParameters { err: "Cannot send a payment of 0 msat".to_owned() });
		}
		for hint in self.route_hints.iter() {
			for hop in hint.0.iter() {
				if hop.src_node_id == self.payee {
					return Err(RoutingError::InvalidParameters { err: "Route hint cannot have the payee as the source.".to_owned() });
				}
			}
		}
		Ok(())
	}

	/// Returns the channels described by [`Self::route_hints`].
	pub fn hint_channels(&self) -> Vec<DirectedChannel> {
		self.route_hints.iter().flat_map(|hint| hint.directed_channels(&self.payee)).collect()
	}
}

/// Nodes and channel directions path finding must not use.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExclusionSet {
	nodes: HashSet<NodeId>,
	channels: HashSet<EdgeKey>,
}

impl ExclusionSet {
	/// Creates an empty set.
	pub fn new() -> Self {
		Self { nodes: new_hash_set(), channels: new_hash_set() }
	}

	/// Excludes every channel from or to `node_id`.
	pub fn exclude_node(&mut self, node_id: NodeId) {
		self.nodes.insert(node_id);
	}

	/// Excludes one direction of a channel.
	pub fn exclude_channel(&mut self, edge: EdgeKey) {
		self.channels.insert(edge);
	}

	/// Excludes both directions of the channel `short_channel_id` between `node_a` and `node_b`.
	pub fn exclude_channel_both_directions(&mut self, short_channel_id: u64, node_a: NodeId, node_b: NodeId) {
		self.channels.insert(EdgeKey { short_channel_id, source: node_a });
		self.channels.insert(EdgeKey { short_channel_id, source: node_b });
	}

	/// Whether `node_id` is excluded.
	pub fn is_node_excluded(&self, node_id: &NodeId) -> bool {
		self.nodes.contains(node_id)
	}

	/// Whether the channel direction `edge` is excluded.
	pub fn is_channel_excluded(&self, edge: &EdgeKey) -> bool {
		self.channels.contains(edge)
	}

	/// Whether `channel` may not be used, either itself or because one of its ends is excluded.
	pub fn excludes(&self, channel: &DirectedChannel) -> bool {
		self.is_node_excluded(&channel.source) || self.is_node_excluded(&channel.target)
			|| self.is_channel_excluded(&channel.key())
	}

	/// Clears the set.
	pub fn clear(&mut self) {
		self.nodes.clear();
		self.channels.clear();
	}

	/// The number of excluded nodes and channel directions.
	pub fn len(&self) -> usize {
		self.nodes.len() + self.channels.len()
	}

	/// Whether nothing is excluded.
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty() && self.channels.is_empty()
	}
}

/// A [`GraphView`] over a base graph plus extra channels, minus an [`ExclusionSet`].
///
/// This is the graph a single payment is routed over: the shared graph, the payee's private
/// channel hints and whatever failed during earlier attempts of the same payment.
pub struct SessionGraph<'a, G: GraphView + ?Sized> {
	graph: &'a G,
	extra_channels: &'a [DirectedChannel],
	exclusions: &'a ExclusionSet,
}

impl<'a, G: GraphView + ?Sized> SessionGraph<'a, G> {
	/// Overlays `extra_channels` and `exclusions` on `graph`.
	pub fn new(graph: &'a G, extra_channels: &'a [DirectedChannel], exclusions: &'a ExclusionSet) -> Self {
		Self { graph, extra_channels, exclusions }
	}
}

impl<'a, G: GraphView + ?Sized> GraphView for SessionGraph<'a, G> {
	fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
		let mut extra_nodes: Vec<NodeId> = self.extra_channels.iter()
			.flat_map(|chan| [chan.source, chan.target])
			.collect();
		extra_nodes.sort_unstable();
		extra_nodes.dedup();
		let exclusions = self.exclusions;
		let base_nodes = self.graph.nodes();
		Box::new(extra_nodes.clone().into_iter()
			.chain(base_nodes.filter(move |node_id| extra_nodes.binary_search(node_id).is_err()))
			.filter(move |node_id| !exclusions.is_node_excluded(node_id)))
	}

	fn channels_to(&self, target: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		let target = *target;
		let exclusions = self.exclusions;
		Box::new(self.graph.channels_to(&target)
			.chain(self.extra_channels.iter().filter(move |chan| chan.target == target).copied())
			.filter(move |chan| !exclusions.excludes(chan)))
	}

	fn channels_from(&self, source: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		let source = *source;
		let exclusions = self.exclusions;
		Box::new(self.graph.channels_from(&source)
			.chain(self.extra_channels.iter().filter(move |chan| chan.source == source).copied())
			.filter(move |chan| !exclusions.excludes(chan)))
	}
}

/// The best known way from a node to the payee.
#[derive(Clone, Copy)]
struct PathBuildingHop {
	/// Total cost, in msats, of the path from this node to the payee.
	cost_msat: u64,
	hop_count: u8,
	/// The amount which must reach this node: what it forwards plus its fee.
	inbound_amount_msat: u64,
	/// The CLTV delta from this node to the payee, including the payee's final delta.
	cltv_expiry_delta: u32,
	/// The channel leaving this node towards the payee. `None` for the payee itself.
	next_channel: Option<DirectedChannel>,
	was_processed: bool,
}

impl PathBuildingHop {
	/// Lower cost wins, then fewer hops, then the lower short channel id.
	fn is_better_than(&self, other: &PathBuildingHop) -> bool {
		let scid = |hop: &PathBuildingHop| hop.next_channel.map_or(0, |chan| chan.short_channel_id);
		(self.cost_msat, self.hop_count, scid(self)) < (other.cost_msat, other.hop_count, scid(other))
	}
}

#[derive(Eq, PartialEq)]
struct RouteGraphNode {
	node_id: NodeId,
	cost_msat: u64,
	hop_count: u8,
}

impl cmp::Ord for RouteGraphNode {
	fn cmp(&self, other: &RouteGraphNode) -> cmp::Ordering {
		// BinaryHeap is a max-heap, so the cheapest node must compare greatest.
		other.cost_msat.cmp(&self.cost_msat)
			.then_with(|| other.hop_count.cmp(&self.hop_count))
			.then_with(|| other.node_id.cmp(&self.node_id))
	}
}

impl cmp::PartialOrd for RouteGraphNode {
	fn partial_cmp(&self, other: &RouteGraphNode) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

/// Finds a route from us (payer) to the given target node (payee).
///
/// The search walks `graph`, plus the channels in `params.route_hints`, backwards from the payee
/// so that the amount each hop must carry is known when the hop is considered. Every channel
/// direction or node in `exclusions` is skipped. Edges are ranked by [`edge_cost`] using
/// `scorer`.
///
/// The fees on channels from us to the next hop are ignored as they are our own.
///
/// Nothing is cached between calls, so a route may be recomputed after extending `exclusions`
/// or reporting outcomes to the scorer's source.
///
/// # Note
///
/// Each node keeps only its cheapest path to the payee. A more expensive path to a node which
/// would have left room under the fee or CLTV limits further upstream is not considered, so in
/// rare cases a route within the limits exists but is not found.
pub fn find_route<G: GraphView + ?Sized, S: ScoreLookUp + ?Sized, L: Deref>(
	our_node_id: &NodeId, params: &RouteParameters, graph: &G, exclusions: &ExclusionSet,
	scorer: &S, scoring_params: &ScoringParameters, logger: L,
) -> Result<Route, RoutingError>
where L::Target: Logger {
	params.validate(our_node_id)?;
	let hint_channels = params.hint_channels();
	let session_graph = SessionGraph::new(graph, &hint_channels, exclusions);
	get_route(our_node_id, params, &session_graph, scorer, scoring_params, logger)
}

fn get_route<G: GraphView + ?Sized, S: ScoreLookUp + ?Sized, L: Deref>(
	our_node_id: &NodeId, params: &RouteParameters, graph: &G, scorer: &S,
	scoring_params: &ScoringParameters, logger: L,
) -> Result<Route, RoutingError>
where L::Target: Logger {
	let payee_node_id = params.payee;
	let final_value_msat = params.final_value_msat;
	let max_total_fee_msat = params.max_total_fee_msat.unwrap_or(u64::max_value());
	let max_total_cltv_expiry_delta = params.max_total_cltv_expiry_delta;

	log_trace!(logger, "Searching for a route from payer {} to payee {} for {} msat", our_node_id,
		payee_node_id, final_value_msat);

	if params.final_cltv_expiry_delta > max_total_cltv_expiry_delta {
		return Err(RoutingError::NoRouteFound {
			err: "The payee's final CLTV delta exceeds the maximum total CLTV delta".to_owned(),
		});
	}

	// The main heap containing all candidate next-hops sorted by their cost. Entries are not
	// removed when a cheaper path to their node is found; stale ones are skipped when popped.
	let mut targets = BinaryHeap::new();

	// Map from node_id to information about the best current path from it to the payee.
	let mut dist: HashMap<NodeId, PathBuildingHop> = new_hash_map();

	dist.insert(payee_node_id, PathBuildingHop {
		cost_msat: 0,
		hop_count: 0,
		inbound_amount_msat: final_value_msat,
		cltv_expiry_delta: params.final_cltv_expiry_delta,
		next_channel: None,
		was_processed: false,
	});
	targets.push(RouteGraphNode { node_id: payee_node_id, cost_msat: 0, hop_count: 0 });

	let mut found_route = false;
	while let Some(RouteGraphNode { node_id, cost_msat, hop_count }) = targets.pop() {
		let node = match dist.get_mut(&node_id) {
			Some(node) => node,
			None => continue,
		};
		if node.was_processed || node.cost_msat != cost_msat || node.hop_count != hop_count {
			continue;
		}
		node.was_processed = true;
		let node = *node;

		if node_id == *our_node_id {
			found_route = true;
			break;
		}
		if node.hop_count >= MAX_PATH_LENGTH {
			continue;
		}

		for channel in graph.channels_to(&node_id) {
			let src_node_id = channel.source;
			if src_node_id == node_id {
				continue;
			}
			let amount_to_transfer_over_msat = node.inbound_amount_msat;
			if !channel.can_forward(amount_to_transfer_over_msat) {
				log_gossip!(logger, "Ignoring channel {} from {} as it cannot carry {} msat",
					channel.short_channel_id, src_node_id, amount_to_transfer_over_msat);
				continue;
			}

			let is_first_hop = src_node_id == *our_node_id;
			let cost = match edge_cost(&channel, amount_to_transfer_over_msat, is_first_hop, scorer, scoring_params) {
				Some(cost) => cost,
				None => continue,
			};
			let (inbound_amount_msat, cltv_expiry_delta) = if is_first_hop {
				(amount_to_transfer_over_msat, node.cltv_expiry_delta)
			} else {
				match (
					amount_to_transfer_over_msat.checked_add(cost.fee_msat),
					node.cltv_expiry_delta.checked_add(channel.cltv_expiry_delta as u32),
				) {
					(Some(amount_msat), Some(cltv_expiry_delta)) => (amount_msat, cltv_expiry_delta),
					_ => continue,
				}
			};
			if inbound_amount_msat > MAX_VALUE_MSAT
				|| inbound_amount_msat - final_value_msat > max_total_fee_msat
				|| cltv_expiry_delta > max_total_cltv_expiry_delta
			{
				continue;
			}

			let candidate = PathBuildingHop {
				cost_msat: node.cost_msat.saturating_add(cost.total_msat),
				hop_count: node.hop_count + 1,
				inbound_amount_msat,
				cltv_expiry_delta,
				next_channel: Some(channel),
				was_processed: false,
			};
			match dist.entry(src_node_id) {
				hash_map::Entry::Occupied(mut entry) => {
					let existing = entry.get_mut();
					if existing.was_processed || !candidate.is_better_than(existing) {
						continue;
					}
					*existing = candidate;
				},
				hash_map::Entry::Vacant(entry) => {
					entry.insert(candidate);
				},
			}
			targets.push(RouteGraphNode {
				node_id: src_node_id,
				cost_msat: candidate.cost_msat,
				hop_count: candidate.hop_count,
			});
		}
	}

	if !found_route {
		log_trace!(logger, "Failed to find a path to {} for {} msat", payee_node_id, final_value_msat);
		return Err(RoutingError::NoRouteFound { err: "Failed to find a path to the given destination".to_owned() });
	}

	let mut hops = Vec::new();
	let mut current = dist.get(our_node_id).and_then(|hop| hop.next_channel);
	while let Some(channel) = current {
		let target = dist.get(&channel.target).ok_or_else(|| RoutingError::NoRouteFound {
			err: "Lost track of a hop while building the route".to_owned(),
		})?;
		let (fee_msat, cltv_expiry_delta) = match target.next_channel {
			Some(next_channel) => {
				let next_amount_msat = dist.get(&next_channel.target).map_or(0, |next| next.inbound_amount_msat);
				(target.inbound_amount_msat - next_amount_msat, next_channel.cltv_expiry_delta as u32)
			},
			None => (0, params.final_cltv_expiry_delta),
		};
		hops.push(RouteHop {
			node_id: channel.target,
			short_channel_id: channel.short_channel_id,
			amount_msat: target.inbound_amount_msat,
			fee_msat,
			cltv_expiry_delta,
			cltv_expiry: None,
		});
		current = target.next_channel;
	}

	let route = Route { payer: *our_node_id, hops, final_value_msat };
	log_info!(logger, "Got route: {}", log_route!(route));
	Ok(route)
}

#[cfg(test)]
mod tests {
	use crate::routing::graph::{EdgeKey, GraphView, NetworkGraph, RoutingFees};
	use crate::routing::mission_control::{FailureKind, MissionControl, ReliabilityKey};
	use crate::routing::router::{DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA, ExclusionSet, MAX_VALUE_MSAT, RouteHint, RouteHintHop, RouteParameters, SessionGraph, find_route};
	use crate::routing::scoring::FixedPenaltyScorer;
	use crate::util::config::{MissionControlConfig, ScoringParameters};
	use crate::util::errors::RoutingError;
	use crate::util::test_utils::{TestLogger, add_channel, channel_update, node_id};

	use crate::prelude::*;
	use core::time::Duration;

	fn fees(base_msat: u32, proportional_millionths: u32) -> RoutingFees {
		RoutingFees { base_msat, proportional_millionths }
	}

	// Node 1 is us, node 4 the payee. 1 -(1)-> 2 -(3)-> 4 and 1 -(2)-> 3 -(4)-> 4.
	fn diamond_graph(logger: &TestLogger, fees_via_2: RoutingFees, fees_via_3: RoutingFees) -> NetworkGraph<&TestLogger> {
		let graph = NetworkGraph::new(logger);
		add_channel(&graph, 1, 1, 2, channel_update(fees(0, 0), 40));
		add_channel(&graph, 2, 1, 3, channel_update(fees(0, 0), 40));
		add_channel(&graph, 3, 2, 4, channel_update(fees_via_2, 40));
		add_channel(&graph, 4, 3, 4, channel_update(fees_via_3, 40));
		graph
	}

	fn scids(route: &crate::routing::router::Route) -> Vec<u64> {
		route.hops.iter().map(|hop| hop.short_channel_id).collect()
	}

	#[test]
	fn rejects_invalid_parameters() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, fees(0, 0), fees(0, 0));
		let view = graph.read_only();
		let scorer = FixedPenaltyScorer::with_penalty(0);
		let params = ScoringParameters::default();
		let exclusions = ExclusionSet::new();

		let to_self = RouteParameters::from_payee(node_id(1), 1_000, 18);
		match find_route(&node_id(1), &to_self, &view, &exclusions, &scorer, &params, &logger) {
			Err(RoutingError::InvalidParameters { err }) => assert_eq!(err, "Cannot generate a route to ourselves"),
			res => panic!("Unexpected result {:?}", res),
		}

		let zero = RouteParameters::from_payee(node_id(4), 0, 18);
		match find_route(&node_id(1), &zero, &view, &exclusions, &scorer, &params, &logger) {
			Err(RoutingError::InvalidParameters { err }) => assert_eq!(err, "Cannot send a payment of 0 msat"),
			res => panic!("Unexpected result {:?}", res),
		}

		let too_much = RouteParameters::from_payee(node_id(4), MAX_VALUE_MSAT + 1, 18);
		assert!(matches!(find_route(&node_id(1), &too_much, &view, &exclusions, &scorer, &params, &logger),
			Err(RoutingError::InvalidParameters { .. })));

		let bad_hint = RouteParameters::from_payee(node_id(4), 1_000, 18)
			.with_route_hints(vec![RouteHint(vec![RouteHintHop {
				src_node_id: node_id(4), short_channel_id: 99, fees: fees(0, 0), cltv_expiry_delta: 40,
				htlc_minimum_msat: None, htlc_maximum_msat: None,
			}])]);
		assert!(matches!(find_route(&node_id(1), &bad_hint, &view, &exclusions, &scorer, &params, &logger),
			Err(RoutingError::InvalidParameters { .. })));
	}

	#[test]
	fn prefers_cheaper_path_and_computes_amounts() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, fees(1_000, 0), fees(100, 1_000));
		let view = graph.read_only();
		let params = RouteParameters::from_payee(node_id(4), 100_000, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&FixedPenaltyScorer::with_penalty(0), &ScoringParameters::default(), &logger).unwrap();

		// Via 3: 100 + 100_000 / 1000 = 200 msat, cheaper than 1_000 via 2.
		assert_eq!(scids(&route), vec![2, 4]);
		assert_eq!(route.hops[0].node_id, node_id(3));
		assert_eq!(route.hops[0].amount_msat, 100_200);
		assert_eq!(route.hops[0].fee_msat, 200);
		assert_eq!(route.hops[0].cltv_expiry_delta, 40);
		assert_eq!(route.hops[1].amount_msat, 100_000);
		assert_eq!(route.hops[1].fee_msat, 0);
		assert_eq!(route.hops[1].cltv_expiry_delta, 18);
		assert_eq!(route.get_total_fees(), 200);
		assert_eq!(route.get_total_amount(), 100_200);
		assert_eq!(route.total_cltv_expiry_delta(), 58);

		let stamped = route.with_block_height(800_000);
		assert_eq!(stamped.hops[0].cltv_expiry, Some(800_058));
		assert_eq!(stamped.hops[1].cltv_expiry, Some(800_018));
		logger.assert_log_contains("lightning_mission_control::routing::router", "Got route", 1);
	}

	#[test]
	fn first_hop_fees_are_ignored() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		add_channel(&graph, 1, 1, 2, channel_update(fees(1_000_000, 0), 40));
		add_channel(&graph, 2, 2, 3, channel_update(fees(10, 0), 40));
		let view = graph.read_only();
		let params = RouteParameters::from_payee(node_id(3), 5_000, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&FixedPenaltyScorer::with_penalty(0), &ScoringParameters::default(), &logger).unwrap();
		assert_eq!(route.get_total_fees(), 10);
		assert_eq!(route.total_cltv_expiry_delta(), 58);
	}

	#[test]
	fn avoids_penalized_node() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, fees(100, 0), fees(100, 0));
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let params = RouteParameters::from_payee(node_id(4), 100_000, 18);
		let scoring = ScoringParameters::default();

		// With equal fees the tie is broken on the short channel id.
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&mission_control.snapshot(), &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 3]);

		let now = Duration::from_secs(1_700_000_000);
		for _ in 0..5 {
			mission_control.report_failure(&ReliabilityKey::Node(node_id(2)), 100_000, FailureKind::TemporaryNode, now);
		}
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&mission_control.snapshot(), &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![2, 4]);
	}

	#[test]
	fn never_uses_excluded_nodes_or_channels() {
		let logger = TestLogger::new();
		let graph = diamond_graph(&logger, fees(0, 0), fees(1_000, 0));
		let view = graph.read_only();
		let scorer = FixedPenaltyScorer::with_penalty(0);
		let scoring = ScoringParameters::default();
		let params = RouteParameters::from_payee(node_id(4), 100_000, 18);

		let mut exclusions = ExclusionSet::new();
		exclusions.exclude_node(node_id(2));
		let route = find_route(&node_id(1), &params, &view, &exclusions, &scorer, &scoring, &logger).unwrap();
		assert!(route.hops.iter().all(|hop| hop.node_id != node_id(2)));

		let mut exclusions = ExclusionSet::new();
		exclusions.exclude_channel(EdgeKey { short_channel_id: 3, source: node_id(2) });
		let route = find_route(&node_id(1), &params, &view, &exclusions, &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![2, 4]);

		// Excluding the other direction does not matter.
		let mut exclusions = ExclusionSet::new();
		exclusions.exclude_channel(EdgeKey { short_channel_id: 3, source: node_id(4) });
		let route = find_route(&node_id(1), &params, &view, &exclusions, &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 3]);

		exclusions.exclude_channel_both_directions(4, node_id(3), node_id(4));
		exclusions.exclude_node(node_id(2));
		assert!(matches!(find_route(&node_id(1), &params, &view, &exclusions, &scorer, &scoring, &logger),
			Err(RoutingError::NoRouteFound { .. })));
	}

	#[test]
	fn honors_fee_and_cltv_limits() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		// Cheap but slow via 2, expensive but fast via 3.
		add_channel(&graph, 1, 1, 2, channel_update(fees(0, 0), 40));
		add_channel(&graph, 2, 1, 3, channel_update(fees(0, 0), 40));
		add_channel(&graph, 3, 2, 4, channel_update(fees(10, 0), 500));
		add_channel(&graph, 4, 3, 4, channel_update(fees(5_000, 0), 20));
		let view = graph.read_only();
		let scorer = FixedPenaltyScorer::with_penalty(0);
		let scoring = ScoringParameters { cltv_penalty_ppb: 0, ..ScoringParameters::default() };

		let params = RouteParameters::from_payee(node_id(4), 10_000, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 3]);

		let params = params.with_max_total_cltv_expiry_delta(100);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![2, 4]);
		assert!(route.total_cltv_expiry_delta() <= 100);

		let params = params.with_max_total_fee_msat(1_000);
		assert!(matches!(find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger),
			Err(RoutingError::NoRouteFound { .. })));

		let params = RouteParameters::from_payee(node_id(4), 10_000, 18).with_max_total_fee_msat(5_000);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert!(route.get_total_fees() <= 5_000);
		assert_eq!(DEFAULT_MAX_TOTAL_CLTV_EXPIRY_DELTA, params.max_total_cltv_expiry_delta);
	}

	#[test]
	fn never_exceeds_htlc_maximum() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let mut small = channel_update(fees(0, 0), 40);
		small.htlc_maximum_msat = 50_000;
		add_channel(&graph, 1, 1, 2, channel_update(fees(0, 0), 40));
		add_channel(&graph, 2, 1, 3, channel_update(fees(0, 0), 40));
		add_channel(&graph, 3, 2, 4, small);
		add_channel(&graph, 4, 3, 4, channel_update(fees(2_000, 0), 40));
		let view = graph.read_only();
		let scorer = FixedPenaltyScorer::with_penalty(0);
		let scoring = ScoringParameters::default();

		let params = RouteParameters::from_payee(node_id(4), 50_000, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 3]);

		let params = RouteParameters::from_payee(node_id(4), 50_001, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert_eq!(scids(&route), vec![2, 4]);
	}

	#[test]
	fn respects_htlc_minimum() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		let mut large = channel_update(fees(0, 0), 40);
		large.htlc_minimum_msat = 1_000_000;
		add_channel(&graph, 1, 1, 2, channel_update(fees(0, 0), 40));
		add_channel(&graph, 2, 2, 3, large);
		let view = graph.read_only();
		let params = RouteParameters::from_payee(node_id(3), 999_999, 18);
		assert!(find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&FixedPenaltyScorer::with_penalty(0), &ScoringParameters::default(), &logger).is_err());
	}

	#[test]
	fn uses_route_hints() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		add_channel(&graph, 1, 1, 2, channel_update(fees(0, 0), 40));
		let view = graph.read_only();
		let payee = node_id(9);
		let params = RouteParameters::from_payee(payee, 10_000, 18)
			.with_route_hints(vec![RouteHint(vec![RouteHintHop {
				src_node_id: node_id(2), short_channel_id: 42, fees: fees(1, 0), cltv_expiry_delta: 144,
				htlc_minimum_msat: None, htlc_maximum_msat: None,
			}])]);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(),
			&FixedPenaltyScorer::with_penalty(0), &ScoringParameters::default(), &logger).unwrap();
		assert_eq!(scids(&route), vec![1, 42]);
		assert_eq!(route.hops[1].node_id, payee);
		assert_eq!(route.get_total_fees(), 1);

		let hints = params.hint_channels();
		let exclusions = ExclusionSet::new();
		let session_graph = SessionGraph::new(&view, &hints, &exclusions);
		assert_eq!(session_graph.channels_to(&payee).count(), 1);
		assert_eq!(session_graph.nodes().count(), 3);
	}

	#[test]
	fn limits_path_length() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		for i in 1..=21u8 {
			add_channel(&graph, i as u64, i, i + 1, channel_update(fees(0, 0), 10));
		}
		let view = graph.read_only();
		let scorer = FixedPenaltyScorer::with_penalty(0);
		let scoring = ScoringParameters::default();

		let params = RouteParameters::from_payee(node_id(21), 1_000, 18);
		let route = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger).unwrap();
		assert_eq!(route.hops.len(), 20);

		let params = RouteParameters::from_payee(node_id(22), 1_000, 18);
		assert!(matches!(find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &scorer, &scoring, &logger),
			Err(RoutingError::NoRouteFound { .. })));
	}

	#[test]
	fn is_deterministic() {
		let logger = TestLogger::new();
		let graph = NetworkGraph::new(&logger);
		// Many equal-cost parallel paths through nodes 10..30.
		for i in 10..30u8 {
			add_channel(&graph, 1000 + i as u64, 1, i, channel_update(fees(0, 0), 40));
			add_channel(&graph, 2000 + i as u64, i, 2, channel_update(fees(100, 10), 40));
		}
		let view = graph.read_only();
		let mission_control = MissionControl::new(MissionControlConfig::default(), &logger);
		let snapshot = mission_control.snapshot();
		let params = RouteParameters::from_payee(node_id(2), 100_000, 18);
		let scoring = ScoringParameters::default();

		let first = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &snapshot, &scoring, &logger).unwrap();
		for _ in 0..10 {
			let again = find_route(&node_id(1), &params, &view, &ExclusionSet::new(), &snapshot, &scoring, &logger).unwrap();
			assert_eq!(first, again);
		}
		assert_eq!(scids(&first), vec![1010, 2010]);
	}
}
