// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

#![crate_name = "lightning_mission_control"]

//! Route selection for a Lightning node.
//!
//! This crate turns "send `amount` to `destination`" into an ordered sequence of candidate paths
//! and learns from the outcome of every attempt. It is made up of:
//!
//!  * [`routing::graph`], a read-only view over the channel graph which the path finder walks
//!    lazily,
//!  * [`routing::mission_control`], a process-wide store of per-node and per-channel failure
//!    penalties which decay over time,
//!  * [`routing::scoring`], which folds fees, time-lock risk and reliability into a single cost,
//!  * [`routing::router`], a payee-to-payer Dijkstra search honoring fee and CLTV limits, and
//!  * [`routing::payment_session`], which drives retries for a single payment.
//!
//! Nothing here sends messages or touches the chain; the caller forwards the routes it is handed
//! and reports back what happened.

#![cfg_attr(not(test), deny(missing_docs))]
#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

extern crate alloc;
extern crate bitcoin;
extern crate hashbrown;

#[macro_use]
pub mod util;
pub mod routing;

mod sync;

mod prelude {
	#![allow(unused_imports)]

	pub use alloc::{boxed::Box, string::String, vec, vec::Vec};

	pub use alloc::borrow::ToOwned;
	pub use alloc::string::ToString;

	pub use crate::util::hash_tables::*;
}
