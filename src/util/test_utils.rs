// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![allow(missing_docs)]

use crate::routing::graph::{ChannelUpdateInfo, NetworkGraph, NodeId, RoutingFees};
use crate::util::logger::{Level, Logger, Record};

use bitcoin::secp256k1::{PublicKey, Secp256k1, SecretKey};

use crate::prelude::*;
use crate::sync::Mutex;
use core::ops::Deref;

pub struct TestLogger {
	level: Level,
	id: String,
	pub lines: Mutex<HashMap<(String, String), usize>>,
	pub context: Mutex<HashMap<(String, Option<NodeId>, Option<u64>), usize>>,
}

impl TestLogger {
	pub fn new() -> TestLogger {
		Self::with_id("".to_owned())
	}
	pub fn with_id(id: String) -> TestLogger {
		TestLogger {
			level: Level::Trace,
			id,
			lines: Mutex::new(new_hash_map()),
			context: Mutex::new(new_hash_map()),
		}
	}
	pub fn enable(&mut self, level: Level) {
		self.level = level;
	}
	pub fn assert_log(&self, module: &str, line: String, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		assert_eq!(log_entries.get(&(module.to_string(), line)), Some(&count));
	}

	/// Search for the number of occurrence of the logged lines which
	/// 1. belongs to the specified module and
	/// 2. contains `line` in it.
	/// And asserts if the number of occurrences is the same with the given `count`
	pub fn assert_log_contains(&self, module: &str, line: &str, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter()
			.filter(|&(&(ref m, ref l), _c)| *m == module && l.contains(line))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}

	/// Search for the number of occurrences of logged lines which
	/// 1. belong to the specified module and
	/// 2. match the given regex pattern.
	/// Assert that the number of occurrences equals the given `count`
	pub fn assert_log_regex(&self, module: &str, pattern: regex::Regex, count: usize) {
		let log_entries = self.lines.lock().unwrap();
		let l: usize = log_entries.iter()
			.filter(|&(&(ref m, ref l), _c)| *m == module && pattern.is_match(&l))
			.map(|(_, c)| c)
			.sum();
		assert_eq!(l, count)
	}

	/// Counts the records logged from `module` carrying the given node id and short channel id.
	pub fn assert_log_context_contains(
		&self, module: &str, node_id: Option<NodeId>, short_channel_id: Option<u64>, count: usize,
	) {
		let context_entries = self.context.lock().unwrap();
		let l = context_entries.get(&(module.to_string(), node_id, short_channel_id)).copied().unwrap_or(0);
		assert_eq!(l, count)
	}
}

impl Logger for TestLogger {
	fn log(&self, record: Record) {
		let context = format!("{} {} [{}:{}]", self.id, record.level, record.module_path, record.line);
		let s = format!("{:<55} {}", context, record.args);
		*self.lines.lock().unwrap().entry((record.module_path.to_string(), format!("{}", record.args))).or_insert(0) += 1;
		*self.context.lock().unwrap().entry((record.module_path.to_string(), record.node_id, record.short_channel_id)).or_insert(0) += 1;
		if record.level >= self.level {
			println!("{}", s);
		}
	}
}

/// Returns the public key derived from the secret key `[n; 32]`. `n` must not be zero.
pub fn pubkey(n: u8) -> PublicKey {
	let secp_ctx = Secp256k1::signing_only();
	PublicKey::from_secret_key(&secp_ctx, &SecretKey::from_slice(&[n; 32]).unwrap())
}

pub fn node_id(n: u8) -> NodeId {
	NodeId::from_pubkey(&pubkey(n))
}

/// An enabled direction forwarding anything up to 1 BTC.
pub fn channel_update(fees: RoutingFees, cltv_expiry_delta: u16) -> ChannelUpdateInfo {
	ChannelUpdateInfo {
		last_update: 1,
		enabled: true,
		cltv_expiry_delta,
		htlc_minimum_msat: 0,
		htlc_maximum_msat: 100_000_000_000,
		fees,
		outbound_liquidity_msat: None,
	}
}

/// Adds a channel between the nodes derived from `node_one` and `node_two`, with both directions
/// set to `update`.
pub fn add_channel<L: Deref>(
	graph: &NetworkGraph<L>, short_channel_id: u64, node_one: u8, node_two: u8, update: ChannelUpdateInfo,
) where L::Target: Logger {
	let (one, two) = (node_id(node_one), node_id(node_two));
	graph.add_channel(short_channel_id, one, two, None).unwrap();
	graph.update_channel_direction(short_channel_id, &one, update.clone()).unwrap();
	graph.update_channel_direction(short_channel_id, &two, update).unwrap();
}
