// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of Parity.

// Parity is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// Parity is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with Parity.  If not, see <http://www.gnu.org/licenses/>.

//! Reference counters and the partition completion latch (spec §3.4, §5,
//! re-architecture guidance §9): `partCounter`/`columnCounter` as atomic
//! integers with `fetch_sub` returning the prior value, the "I am the last"
//! branch being `prior == 1`; the completion latch's single-signal contract
//! enforced by construction rather than by caller discipline.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically-decreasing, never-reused counter (`partCounter` or
/// `columnCounter`, spec §3.4).
pub struct RefCount {
	remaining: AtomicU64,
}

impl RefCount {
	pub fn new(initial: u64) -> RefCount {
		RefCount { remaining: AtomicU64::new(initial) }
	}

	/// Decrements the counter, returning `true` if this call observed it
	/// reach zero (i.e. the caller is the last outstanding task).
	pub fn dec_is_last(&self) -> bool {
		let prior = self.remaining.fetch_sub(1, Ordering::AcqRel);
		debug_assert!(prior > 0, "reference counter decremented past zero");
		prior == 1
	}

	pub fn get(&self) -> u64 {
		self.remaining.load(Ordering::Acquire)
	}
}

/// A count-down latch signalled exactly once per partition, when
/// `columnCounter` reaches zero (spec §5 ordering guarantee (iv)). Built so
/// a double-signal is a programmer error caught immediately rather than a
/// silent double-notify.
pub struct CompletionLatch {
	state: Mutex<bool>,
	signalled_once: std::sync::atomic::AtomicBool,
	condvar: Condvar,
}

impl CompletionLatch {
	pub fn new() -> CompletionLatch {
		CompletionLatch {
			state: Mutex::new(false),
			signalled_once: std::sync::atomic::AtomicBool::new(false),
			condvar: Condvar::new(),
		}
	}

	/// Signals completion. Panics in debug builds if called more than once
	/// for the same latch; the spec's ordering guarantee (iv) promises this
	/// never happens in practice.
	pub fn signal(&self) {
		let already = self.signalled_once.swap(true, Ordering::AcqRel);
		debug_assert!(!already, "completion latch signalled more than once");
		let mut done = self.state.lock();
		*done = true;
		self.condvar.notify_all();
	}

	pub fn is_signalled(&self) -> bool {
		*self.state.lock()
	}

	/// Blocks the calling thread until [`CompletionLatch::signal`] has run.
	/// Used by tests and by synchronous callers of the otherwise
	/// fire-and-forget worker pool.
	pub fn wait(&self) {
		let mut done = self.state.lock();
		while !*done {
			self.condvar.wait(&mut done);
		}
	}
}

impl Default for CompletionLatch {
	fn default() -> CompletionLatch {
		CompletionLatch::new()
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn dec_is_last_fires_once() {
		let rc = RefCount::new(3);
		assert!(!rc.dec_is_last());
		assert!(!rc.dec_is_last());
		assert!(rc.dec_is_last());
	}

	#[test]
	fn latch_signals_and_unblocks_waiters() {
		let latch = CompletionLatch::new();
		assert!(!latch.is_signalled());
		latch.signal();
		assert!(latch.is_signalled());
		latch.wait();
	}

	#[test]
	#[should_panic(expected = "signalled more than once")]
	fn latch_panics_on_double_signal_in_debug() {
		let latch = CompletionLatch::new();
		latch.signal();
		latch.signal();
	}
}
