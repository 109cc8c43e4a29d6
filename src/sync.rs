//! Locking primitives used by the reliability store.

pub use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::LockResult;

/// Rust libstd's RwLock does not provide any fairness guarantees (and, in fact, when used on
/// Linux with pthreads under the hood, readers trivially and completely starve writers).
///
/// Payment sessions take the read side of the reliability store for every report and snapshot,
/// while inserting a never-before-seen node or channel needs the write side. Under heavy payment
/// load the inserting writer could otherwise wait forever, so readers block whenever a writer is
/// queued.
pub struct FairRwLock<T> {
	lock: RwLock<T>,
	waiting_writers: AtomicUsize,
}

impl<T> FairRwLock<T> {
	pub fn new(t: T) -> Self {
		Self { lock: RwLock::new(t), waiting_writers: AtomicUsize::new(0) }
	}

	// All atomic accesses are relaxed, the underlying RwLock provides ordering of the protected
	// memory.
	pub fn write(&self) -> LockResult<RwLockWriteGuard<T>> {
		self.waiting_writers.fetch_add(1, Ordering::Relaxed);
		let res = self.lock.write();
		self.waiting_writers.fetch_sub(1, Ordering::Relaxed);
		res
	}

	pub fn read(&self) -> LockResult<RwLockReadGuard<T>> {
		if self.waiting_writers.load(Ordering::Relaxed) != 0 {
			let _write_queue_lock = self.lock.write();
		}
		self.lock.read()
	}
}
