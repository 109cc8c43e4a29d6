// This file is Copyright its original authors, visible in version control
// history.
//
// This file is licensed under the Apache License, Version 2.0 <LICENSE-APACHE
// or http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// You may not use this file except in accordance with one or both of these
// licenses.

//! Error types live here.

#[allow(unused_imports)]
use crate::prelude::*;

use core::fmt;

/// Indicates that no route could be computed for the requested payment.
#[derive(Clone, PartialEq, Eq)]
pub enum RoutingError {
	/// No path from us to the payee satisfies the amount, fee and CLTV limits given the current
	/// graph and the exclusions in effect. Retrying with the same inputs will not help.
	NoRouteFound {
		/// A human-readable error message
		err: String,
	},
	/// The routing request itself was malformed, eg we were asked to pay ourselves, to send
	/// nothing, or to send more than all existing bitcoin.
	InvalidParameters {
		/// A human-readable error message
		err: String,
	},
}

impl fmt::Debug for RoutingError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			RoutingError::NoRouteFound { ref err } => write!(f, "No route found: {}", err),
			RoutingError::InvalidParameters { ref err } => write!(f, "Invalid routing parameters: {}", err),
		}
	}
}

impl fmt::Display for RoutingError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl std::error::Error for RoutingError {}

/// Indicates an error driving a [`PaymentSession`].
///
/// [`PaymentSession`]: crate::routing::payment_session::PaymentSession
#[derive(Clone, PartialEq, Eq)]
pub enum PaymentError {
	/// The routing request was malformed and no attempt could be made at all.
	Routing(RoutingError),
	/// Every route honoring the payment's limits and the session's exclusions has been tried, or
	/// the session ran out of attempts. This is final for the remaining amount.
	Exhausted {
		/// A human-readable error message
		err: String,
	},
	/// The operation is not legal in the session's current state, eg an outcome was reported
	/// while no attempt was pending or for a route other than the pending one.
	InvalidState {
		/// A human-readable error message
		err: String,
	},
	/// The reported outcome does not match the route it was reported for, eg the failing hop
	/// index is past the end of the route.
	InvalidOutcome {
		/// A human-readable error message
		err: String,
	},
}

impl fmt::Debug for PaymentError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match *self {
			PaymentError::Routing(ref e) => write!(f, "{:?}", e),
			PaymentError::Exhausted { ref err } => write!(f, "Payment exhausted: {}", err),
			PaymentError::InvalidState { ref err } => write!(f, "Invalid session state: {}", err),
			PaymentError::InvalidOutcome { ref err } => write!(f, "Invalid outcome: {}", err),
		}
	}
}

impl fmt::Display for PaymentError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

impl std::error::Error for PaymentError {}

impl From<RoutingError> for PaymentError {
	fn from(e: RoutingError) -> Self {
		PaymentError::Routing(e)
	}
}

/// An error in updating a [`NetworkGraph`], eg a channel to ourselves or a duplicate
/// announcement.
///
/// [`NetworkGraph`]: crate::routing::graph::NetworkGraph
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphError {
	/// A human-readable message describing the error
	pub err: String,
}

impl fmt::Display for GraphError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Graph update rejected: {}", self.err)
	}
}

impl std::error::Error for GraphError {}
