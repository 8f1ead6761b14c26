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

//! Job-queue contract (spec §6.3): `get(cursor) -> TaskRef`, `done(cursor)`.
//! The production worker-pool / ring-buffer substrate is an external
//! collaborator (spec §1); this module only defines the trait the copy job
//! consumes plus a `VecRing` test double sufficient to drive it in tests.

use std::collections::VecDeque;
use parking_lot::Mutex;

/// A single-consumer source of copy tasks. Producers handle backpressure;
/// `get` never blocks on publication (spec §6.3).
pub trait CopyTaskSource<T> {
	/// Claims the next task, if any is published. Returns `(cursor, task)`.
	fn get(&self) -> Option<(u64, T)>;
	/// Releases the ring slot for `cursor`, allowing the producer to reuse
	/// it. Spec §4.3 step 2 / §5 ordering guarantee (i): this must be
	/// called before the task's copy work runs.
	fn done(&self, cursor: u64);
}

/// A `Mutex<VecDeque<T>>`-backed single-consumer ring, standing in for the
/// out-of-scope production SPSC ring in tests and examples.
pub struct VecRing<T> {
	queue: Mutex<VecDeque<T>>,
	next_cursor: std::sync::atomic::AtomicU64,
}

impl<T> VecRing<T> {
	pub fn new() -> VecRing<T> {
		VecRing { queue: Mutex::new(VecDeque::new()), next_cursor: std::sync::atomic::AtomicU64::new(0) }
	}

	pub fn push(&self, task: T) {
		self.queue.lock().push_back(task);
	}

	pub fn len(&self) -> usize {
		self.queue.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.queue.lock().is_empty()
	}
}

impl<T> Default for VecRing<T> {
	fn default() -> VecRing<T> {
		VecRing::new()
	}
}

impl<T> CopyTaskSource<T> for VecRing<T> {
	fn get(&self) -> Option<(u64, T)> {
		let mut queue = self.queue.lock();
		let task = queue.pop_front()?;
		let cursor = self.next_cursor.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		Some((cursor, task))
	}

	fn done(&self, _cursor: u64) {
		// The VecDeque slot was already reclaimed by `pop_front` in `get`;
		// a real cursor-reservation ring would release the slot here.
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn fifo_order_preserved() {
		let ring: VecRing<u32> = VecRing::new();
		ring.push(1);
		ring.push(2);
		ring.push(3);
		let (c0, v0) = ring.get().unwrap();
		ring.done(c0);
		assert_eq!(v0, 1);
		let (_, v1) = ring.get().unwrap();
		assert_eq!(v1, 2);
		assert_eq!(ring.len(), 1);
	}

	#[test]
	fn empty_ring_returns_none() {
		let ring: VecRing<u32> = VecRing::new();
		assert!(ring.get().is_none());
	}
}
