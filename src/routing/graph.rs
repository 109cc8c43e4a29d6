// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! The read-only view of the channel graph which path finding walks lives here.
//!
//! The path finder only ever consumes a [`GraphView`]: a lazy, restartable traversal over nodes
//! and the directed channels touching them. Hosts with their own graph store implement it
//! directly; [`NetworkGraph`] is a simple in-memory store which does so as well.

use bitcoin::secp256k1::constants::PUBLIC_KEY_SIZE;
use bitcoin::secp256k1::PublicKey;
use bitcoin::secp256k1;

use crate::util::errors::GraphError;
use crate::util::logger::Logger;

use crate::prelude::*;
use crate::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use alloc::collections::btree_map::{BTreeMap, Entry as BtreeEntry};
use core::{cmp, fmt};
use core::ops::Deref;

/// Represents the compressed public key of a node
#[derive(Clone, Copy)]
pub struct NodeId([u8; PUBLIC_KEY_SIZE]);

impl NodeId {
	/// Create a new NodeId from a public key
	pub fn from_pubkey(pubkey: &PublicKey) -> Self {
		NodeId(pubkey.serialize())
	}

	/// Create a new NodeId from a slice of bytes, without checking that it is a valid point.
	pub fn from_slice(bytes: &[u8]) -> Result<Self, GraphError> {
		if bytes.len() != PUBLIC_KEY_SIZE {
			return Err(GraphError { err: format!("Node id must be {} bytes", PUBLIC_KEY_SIZE) });
		}
		let mut data = [0; PUBLIC_KEY_SIZE];
		data.copy_from_slice(bytes);
		Ok(NodeId(data))
	}

	/// Get the public key slice from this NodeId
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Get the public key from this NodeId
	pub fn as_pubkey(&self) -> Result<PublicKey, secp256k1::Error> {
		PublicKey::from_slice(&self.0)
	}
}

impl fmt::Debug for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "NodeId({})", log_bytes!(self.0))
	}
}
impl fmt::Display for NodeId {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", log_bytes!(self.0))
	}
}

impl core::hash::Hash for NodeId {
	fn hash<H: core::hash::Hasher>(&self, hasher: &mut H) {
		self.0.hash(hasher);
	}
}

impl Eq for NodeId {}

impl PartialEq for NodeId {
	fn eq(&self, other: &Self) -> bool {
		self.0[..] == other.0[..]
	}
}

impl cmp::PartialOrd for NodeId {
	fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for NodeId {
	fn cmp(&self, other: &Self) -> cmp::Ordering {
		self.0[..].cmp(&other.0[..])
	}
}

/// Fees for routing via a given channel or a node
#[derive(Eq, PartialEq, Copy, Clone, Debug, Hash)]
pub struct RoutingFees {
	/// Flat routing fee in millisatoshis.
	pub base_msat: u32,
	/// Liquidity-based routing fee in millionths of a routed amount.
	/// In other words, 10000 is 1%.
	pub proportional_millionths: u32,
}

impl RoutingFees {
	/// Returns the fee charged for forwarding `amount_msat`, or `None` on overflow.
	///
	/// The proportional part is rounded down, as forwarding nodes do.
	pub fn compute_fee(&self, amount_msat: u64) -> Option<u64> {
		amount_msat.checked_mul(self.proportional_millionths as u64)
			.and_then(|part| (self.base_msat as u64).checked_add(part / 1_000_000))
	}
}

/// The effective capacity of a channel for routing purposes.
///
/// While this may be smaller than the actual channel capacity, amounts greater than
/// [`Self::as_msat`] should not be routed through the channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EffectiveCapacity {
	/// The available liquidity in the channel known from being a channel counterparty, and thus a
	/// direct hop.
	ExactLiquidity {
		/// Either the inbound or outbound liquidity depending on the direction, denominated in
		/// millisatoshi.
		liquidity_msat: u64,
	},
	/// The maximum HTLC amount in one direction as advertised, used when the funding amount of
	/// the channel is not known.
	MaximumHTLC {
		/// The maximum HTLC amount denominated in millisatoshi.
		amount_msat: u64,
	},
	/// The total capacity of the channel as determined by the funding transaction.
	Total {
		/// The funding amount denominated in millisatoshi.
		capacity_msat: u64,
	},
	/// A capacity sufficient to route any payment, typically used for private channels provided by
	/// an invoice.
	Infinite,
	/// A capacity that is unknown possibly because the chain state is unavailable to know the
	/// total capacity.
	Unknown,
}

/// The presumed channel capacity denominated in millisatoshi for [`EffectiveCapacity::Unknown`] to
/// use when making routing decisions.
pub const UNKNOWN_CHANNEL_CAPACITY_MSAT: u64 = 250_000 * 1000;

impl EffectiveCapacity {
	/// Returns the effective capacity denominated in millisatoshi.
	pub fn as_msat(&self) -> u64 {
		match self {
			EffectiveCapacity::ExactLiquidity { liquidity_msat } => *liquidity_msat,
			EffectiveCapacity::MaximumHTLC { amount_msat } => *amount_msat,
			EffectiveCapacity::Total { capacity_msat } => *capacity_msat,
			EffectiveCapacity::Infinite => u64::max_value(),
			EffectiveCapacity::Unknown => UNKNOWN_CHANNEL_CAPACITY_MSAT,
		}
	}
}

/// Identifies one direction of a channel: the channel together with the node forwarding over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
	/// The short channel id of the channel.
	pub short_channel_id: u64,
	/// The node which forwards over the channel in this direction.
	pub source: NodeId,
}

impl fmt::Display for EdgeKey {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{} from {}", self.short_channel_id, self.source)
	}
}

/// One direction of a channel, as handed to the path finder.
///
/// This is an owned snapshot of the forwarding policy `source` advertises for sending over the
/// channel towards `target`, together with our estimate of what it can currently carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirectedChannel {
	/// The short channel id of the channel.
	pub short_channel_id: u64,
	/// The node which forwards over this channel, and which charges [`Self::fees`] for doing so.
	pub source: NodeId,
	/// The node on the receiving end of this direction.
	pub target: NodeId,
	/// Fees `source` charges for forwarding over this channel.
	pub fees: RoutingFees,
	/// The difference in CLTV values `source` requires between the HTLC it receives and the one
	/// it sends over this channel.
	pub cltv_expiry_delta: u16,
	/// The minimum value which may be relayed over this direction.
	pub htlc_minimum_msat: u64,
	/// The maximum value which may be relayed over this direction in a single HTLC.
	pub htlc_maximum_msat: u64,
	/// Our estimate of the outbound liquidity available in this direction.
	pub capacity: EffectiveCapacity,
}

impl DirectedChannel {
	/// The key identifying this direction of the channel.
	pub fn key(&self) -> EdgeKey {
		EdgeKey { short_channel_id: self.short_channel_id, source: self.source }
	}

	/// The largest amount this direction can be expected to forward: the lower of the advertised
	/// HTLC maximum and the estimated available bandwidth.
	pub fn max_forwardable_msat(&self) -> u64 {
		cmp::min(self.htlc_maximum_msat, self.capacity.as_msat())
	}

	/// Whether an HTLC of `amount_msat` fits within this direction's minimum and maximum.
	pub fn can_forward(&self, amount_msat: u64) -> bool {
		amount_msat >= self.htlc_minimum_msat && amount_msat <= self.max_forwardable_msat()
	}
}

/// A lazy view over the channel graph.
///
/// Iterators are produced on demand so that implementations backed by a database need not load
/// the whole graph. Dropping an iterator early stops the traversal; calling the method again
/// starts it over.
///
/// Implementations must only yield directions which are currently usable for forwarding (ie not
/// disabled).
pub trait GraphView {
	/// Returns every node known to the graph.
	fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_>;

	/// Returns every usable channel direction whose [`DirectedChannel::target`] is `target`.
	///
	/// This is what the payee-to-payer search walks.
	fn channels_to(&self, target: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_>;

	/// Returns every usable channel direction whose [`DirectedChannel::source`] is `source`.
	fn channels_from(&self, source: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_>;
}

impl<G: GraphView + ?Sized> GraphView for &G {
	fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
		(**self).nodes()
	}

	fn channels_to(&self, target: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		(**self).channels_to(target)
	}

	fn channels_from(&self, source: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		(**self).channels_from(source)
	}
}

impl<G: GraphView + ?Sized> GraphView for Arc<G> {
	fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
		(**self).nodes()
	}

	fn channels_to(&self, target: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		(**self).channels_to(target)
	}

	fn channels_from(&self, source: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		(**self).channels_from(source)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Details about one direction of a channel as last advertised by its source.
pub struct ChannelUpdateInfo {
	/// When the last update to the channel direction was issued.
	/// Value is opaque, as set in the announcement.
	pub last_update: u32,
	/// Whether the channel can be currently used for payments (in this one direction).
	pub enabled: bool,
	/// The difference in CLTV values that you must have when routing through this channel.
	pub cltv_expiry_delta: u16,
	/// The minimum value, which must be relayed to the next hop via the channel
	pub htlc_minimum_msat: u64,
	/// The maximum value which may be relayed to the next hop via the channel.
	pub htlc_maximum_msat: u64,
	/// Fees charged when the channel is used for routing
	pub fees: RoutingFees,
	/// Outbound liquidity we know to be available in this direction, if we are the source.
	pub outbound_liquidity_msat: Option<u64>,
}

impl fmt::Display for ChannelUpdateInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "last_update {}, enabled {}, cltv_expiry_delta {}, htlc_minimum_msat {}, htlc_maximum_msat {}, fees {:?}",
			self.last_update, self.enabled, self.cltv_expiry_delta, self.htlc_minimum_msat, self.htlc_maximum_msat, self.fees)?;
		Ok(())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Details about a channel (both directions).
pub struct ChannelInfo {
	/// Source node of the first direction of a channel
	pub node_one: NodeId,
	/// Details about the first direction of a channel
	pub one_to_two: Option<ChannelUpdateInfo>,
	/// Source node of the second direction of a channel
	pub node_two: NodeId,
	/// Details about the second direction of a channel
	pub two_to_one: Option<ChannelUpdateInfo>,
	/// The channel capacity as seen on-chain, if chain lookup is available.
	pub capacity_sats: Option<u64>,
}

impl ChannelInfo {
	/// Returns a [`DirectedChannel`] for the channel directed to the given `target`, or `None` if
	/// `target` is not one of the channel's counterparties or the direction is unknown or disabled.
	pub fn as_directed_to(&self, short_channel_id: u64, target: &NodeId) -> Option<DirectedChannel> {
		let (direction, source) = {
			if target == &self.node_one {
				(self.two_to_one.as_ref(), &self.node_two)
			} else if target == &self.node_two {
				(self.one_to_two.as_ref(), &self.node_one)
			} else {
				return None;
			}
		};
		direction.filter(|dir| dir.enabled)
			.map(|dir| self.directed(short_channel_id, dir, *source, *target))
	}

	/// Returns a [`DirectedChannel`] for the channel directed from the given `source`, or `None`
	/// if `source` is not one of the channel's counterparties or the direction is unknown or
	/// disabled.
	pub fn as_directed_from(&self, short_channel_id: u64, source: &NodeId) -> Option<DirectedChannel> {
		let (direction, target) = {
			if source == &self.node_one {
				(self.one_to_two.as_ref(), &self.node_two)
			} else if source == &self.node_two {
				(self.two_to_one.as_ref(), &self.node_one)
			} else {
				return None;
			}
		};
		direction.filter(|dir| dir.enabled)
			.map(|dir| self.directed(short_channel_id, dir, *source, *target))
	}

	fn directed(
		&self, short_channel_id: u64, direction: &ChannelUpdateInfo, source: NodeId, target: NodeId,
	) -> DirectedChannel {
		let capacity = match (direction.outbound_liquidity_msat, self.capacity_sats) {
			(Some(liquidity_msat), _) => EffectiveCapacity::ExactLiquidity { liquidity_msat },
			(None, Some(capacity_sats)) =>
				EffectiveCapacity::Total { capacity_msat: capacity_sats.saturating_mul(1000) },
			(None, None) if direction.htlc_maximum_msat != u64::max_value() =>
				EffectiveCapacity::MaximumHTLC { amount_msat: direction.htlc_maximum_msat },
			(None, None) => EffectiveCapacity::Unknown,
		};
		DirectedChannel {
			short_channel_id,
			source,
			target,
			fees: direction.fees,
			cltv_expiry_delta: direction.cltv_expiry_delta,
			htlc_minimum_msat: direction.htlc_minimum_msat,
			htlc_maximum_msat: direction.htlc_maximum_msat,
			capacity,
		}
	}
}

impl fmt::Display for ChannelInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, "node_one: {}, one_to_two: {:?}, node_two: {}, two_to_one: {:?}",
			self.node_one, self.one_to_two, self.node_two, self.two_to_one)?;
		Ok(())
	}
}

/// A user-defined name for a node, which may be used when displaying the node in a graph.
///
/// Since node aliases are provided by third parties, they are a potential avenue for injection
/// attacks. Care must be taken when processing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeAlias(pub [u8; 32]);

impl fmt::Display for NodeAlias {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		let first_null = self.0.iter().position(|b| *b == 0).unwrap_or(self.0.len());
		let bytes = self.0.split_at(first_null).0;
		for c in bytes.iter().map(|b| *b as char) {
			// Display printable ASCII characters only
			let c = if c >= '\x20' && c <= '\x7e' { c } else { core::char::REPLACEMENT_CHARACTER };
			fmt::Write::write_char(f, c)?;
		}
		Ok(())
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Details about a node in the network.
pub struct NodeInfo {
	/// All valid channels a node has announced
	pub channels: Vec<u64>,
	/// The node's self-chosen name, informational only.
	pub alias: Option<NodeAlias>,
}

impl fmt::Display for NodeInfo {
	fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
		write!(f, " channels: {:?}, alias: {:?}", &self.channels[..], self.alias)?;
		Ok(())
	}
}

/// Represents the network as nodes and channels between them.
///
/// This is a straightforward in-memory graph store. It is updated by whatever keeps the host's
/// view of the network current; path finding only ever reads it through [`Self::read_only`].
pub struct NetworkGraph<L: Deref> where L::Target: Logger {
	logger: L,
	channels: RwLock<BTreeMap<u64, ChannelInfo>>,
	nodes: RwLock<BTreeMap<NodeId, NodeInfo>>,
}

/// A read-only view of [`NetworkGraph`].
///
/// Holds the graph's read locks for as long as it lives, so it should be dropped as soon as the
/// search using it completes.
pub struct ReadOnlyNetworkGraph<'a> {
	channels: RwLockReadGuard<'a, BTreeMap<u64, ChannelInfo>>,
	nodes: RwLockReadGuard<'a, BTreeMap<NodeId, NodeInfo>>,
}

impl<L: Deref> NetworkGraph<L> where L::Target: Logger {
	/// Creates a new, empty, network graph.
	pub fn new(logger: L) -> NetworkGraph<L> {
		Self {
			logger,
			channels: RwLock::new(BTreeMap::new()),
			nodes: RwLock::new(BTreeMap::new()),
		}
	}

	/// Returns a read-only view of the network graph.
	pub fn read_only(&'_ self) -> ReadOnlyNetworkGraph<'_> {
		let channels = self.channels.read().unwrap_or_else(PoisonError::into_inner);
		let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
		ReadOnlyNetworkGraph {
			channels,
			nodes,
		}
	}

	/// Adds a node with no channels yet. Returns an error if the node is already known.
	pub fn add_node(&self, node_id: NodeId, alias: Option<NodeAlias>) -> Result<(), GraphError> {
		let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
		match nodes.entry(node_id) {
			BtreeEntry::Occupied(_) => Err(GraphError { err: "Already have knowledge of node".to_owned() }),
			BtreeEntry::Vacant(entry) => {
				entry.insert(NodeInfo { channels: Vec::new(), alias });
				log_gossip!(self.logger, "Added node {}", node_id);
				Ok(())
			},
		}
	}

	/// Sets the informational alias of a node already present in the graph.
	pub fn set_node_alias(&self, node_id: &NodeId, alias: NodeAlias) -> Result<(), GraphError> {
		let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
		match nodes.get_mut(node_id) {
			Some(node) => {
				node.alias = Some(alias);
				Ok(())
			},
			None => Err(GraphError { err: "No existing channels for node".to_owned() }),
		}
	}

	/// Adds a channel between two nodes, with neither direction known yet.
	///
	/// Nodes are added to the graph as a side-effect of their first channel.
	pub fn add_channel(
		&self, short_channel_id: u64, node_one: NodeId, node_two: NodeId, capacity_sats: Option<u64>,
	) -> Result<(), GraphError> {
		if node_one == node_two {
			return Err(GraphError { err: "Channel announcement node had a channel with itself".to_owned() });
		}

		let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
		let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);

		match channels.entry(short_channel_id) {
			BtreeEntry::Occupied(_) => {
				return Err(GraphError { err: "Already have knowledge of channel".to_owned() });
			},
			BtreeEntry::Vacant(entry) => {
				entry.insert(ChannelInfo {
					node_one, one_to_two: None, node_two, two_to_one: None, capacity_sats,
				});
			},
		};

		for current_node_id in [node_one, node_two].iter() {
			match nodes.entry(*current_node_id) {
				BtreeEntry::Occupied(node_entry) => {
					node_entry.into_mut().channels.push(short_channel_id);
				},
				BtreeEntry::Vacant(node_entry) => {
					node_entry.insert(NodeInfo { channels: vec!(short_channel_id), alias: None });
				},
			};
		}

		log_gossip!(self.logger, "Added channel {} between {} and {}", short_channel_id, node_one, node_two);
		Ok(())
	}

	/// Sets the forwarding policy of the direction of `short_channel_id` whose source is
	/// `source`.
	///
	/// Updates older than the one already known (by `last_update`) are rejected.
	pub fn update_channel_direction(
		&self, short_channel_id: u64, source: &NodeId, update: ChannelUpdateInfo,
	) -> Result<(), GraphError> {
		let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
		let channel = match channels.get_mut(&short_channel_id) {
			Some(channel) => channel,
			None => return Err(GraphError { err: "Couldn't find channel for update".to_owned() }),
		};
		let direction = if source == &channel.node_one {
			&mut channel.one_to_two
		} else if source == &channel.node_two {
			&mut channel.two_to_one
		} else {
			return Err(GraphError { err: "Update source is not a channel counterparty".to_owned() });
		};
		if let Some(existing) = direction.as_ref() {
			if existing.last_update > update.last_update {
				return Err(GraphError { err: "Update older than last processed update".to_owned() });
			}
		}
		if update.htlc_minimum_msat > update.htlc_maximum_msat {
			return Err(GraphError { err: "htlc_minimum_msat exceeds htlc_maximum_msat".to_owned() });
		}
		log_gossip!(self.logger, "Updating channel {} from {}: {}", short_channel_id, source, update);
		*direction = Some(update);
		Ok(())
	}

	/// Removes a channel, and any node left without channels, from the graph.
	pub fn remove_channel(&self, short_channel_id: u64) {
		let mut channels = self.channels.write().unwrap_or_else(PoisonError::into_inner);
		if let Some(chan) = channels.remove(&short_channel_id) {
			let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
			Self::remove_channel_in_nodes(&mut nodes, &chan, short_channel_id);
			log_gossip!(self.logger, "Removed channel {}", short_channel_id);
		}
	}

	fn remove_channel_in_nodes(nodes: &mut BTreeMap<NodeId, NodeInfo>, chan: &ChannelInfo, short_channel_id: u64) {
		for node_id in [chan.node_one, chan.node_two].iter() {
			if let BtreeEntry::Occupied(mut entry) = nodes.entry(*node_id) {
				entry.get_mut().channels.retain(|chan_id| short_channel_id != *chan_id);
				if entry.get().channels.is_empty() {
					entry.remove_entry();
				}
			}
		}
	}
}

impl ReadOnlyNetworkGraph<'_> {
	/// Returns information on a channel with the given id.
	pub fn channel(&self, short_channel_id: u64) -> Option<&ChannelInfo> {
		self.channels.get(&short_channel_id)
	}

	/// Returns information on a node with the given id.
	pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
		self.nodes.get(node_id)
	}

	/// Returns the number of channels in the graph.
	pub fn channel_count(&self) -> usize {
		self.channels.len()
	}
}

impl GraphView for ReadOnlyNetworkGraph<'_> {
	fn nodes(&self) -> Box<dyn Iterator<Item = NodeId> + '_> {
		Box::new(self.nodes.keys().copied())
	}

	fn channels_to(&self, target: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		let target = *target;
		match self.nodes.get(&target) {
			Some(node) => Box::new(node.channels.iter().filter_map(move |scid| {
				self.channels.get(scid).and_then(|chan| chan.as_directed_to(*scid, &target))
			})),
			None => Box::new(core::iter::empty()),
		}
	}

	fn channels_from(&self, source: &NodeId) -> Box<dyn Iterator<Item = DirectedChannel> + '_> {
		let source = *source;
		match self.nodes.get(&source) {
			Some(node) => Box::new(node.channels.iter().filter_map(move |scid| {
				self.channels.get(scid).and_then(|chan| chan.as_directed_from(*scid, &source))
			})),
			None => Box::new(core::iter::empty()),
		}
	}
}
