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

//! The merge index (spec §3.2): a dense array of packed 64-bit entries, one
//! per output row, produced by an upstream sort+merge pass and read-only to
//! this engine. Per the REDESIGN FLAGS (§9), the top-bit/row encoding never
//! escapes as a raw `u64` — callers only ever see `MergeEntry::side()` /
//! `MergeEntry::row()`.

const ROW_MASK: u64 = (1u64 << 63) - 1;

/// Which side of the merge an entry's row index refers to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Side {
	/// The incoming out-of-order batch.
	OutOfOrder,
	/// The existing on-disk partition.
	OnDisk,
}

/// One packed merge-index entry: bit 63 selects the side, bits 0..62 are the
/// row index on that side.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MergeEntry(u64);

impl MergeEntry {
	pub fn new(side: Side, row: u64) -> MergeEntry {
		debug_assert!(row <= ROW_MASK, "row index overflows 63 bits");
		let bit = match side {
			Side::OutOfOrder => 0u64,
			Side::OnDisk => 1u64,
		};
		MergeEntry((bit << 63) | (row & ROW_MASK))
	}

	pub fn side(self) -> Side {
		if self.0 >> 63 == 0 {
			Side::OutOfOrder
		} else {
			Side::OnDisk
		}
	}

	pub fn row(self) -> u64 {
		self.0 & ROW_MASK
	}

	/// Raw packed representation, for on-disk/wire interop only.
	pub fn from_raw(raw: u64) -> MergeEntry {
		MergeEntry(raw)
	}

	pub fn to_raw(self) -> u64 {
		self.0
	}
}

/// Owning handle over the merge index allocation. Shared via `Arc` by the
/// columns/copy tasks of a single partition; the allocation is released (the
/// `freeMergedIndex` of the source) when the last `Arc` is dropped.
pub struct MergeIndex {
	entries: Box<[MergeEntry]>,
}

impl MergeIndex {
	pub fn from_raw(raw: Vec<u64>) -> MergeIndex {
		MergeIndex {
			entries: raw.into_iter().map(MergeEntry::from_raw).collect(),
		}
	}

	pub fn from_entries(entries: Vec<MergeEntry>) -> MergeIndex {
		MergeIndex { entries: entries.into_boxed_slice() }
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn entries(&self) -> &[MergeEntry] {
		&self.entries
	}

	pub fn get(&self, row_count_index: usize) -> MergeEntry {
		self.entries[row_count_index]
	}
}

impl Drop for MergeIndex {
	fn drop(&mut self) {
		log::trace!(target: "o3", "Freeing merge index of {} entries", self.entries.len());
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn encodes_side_and_row() {
		let oo = MergeEntry::new(Side::OutOfOrder, 42);
		let disk = MergeEntry::new(Side::OnDisk, 42);
		assert_eq!(oo.side(), Side::OutOfOrder);
		assert_eq!(oo.row(), 42);
		assert_eq!(disk.side(), Side::OnDisk);
		assert_eq!(disk.row(), 42);
		assert_ne!(oo.to_raw(), disk.to_raw());
	}

	#[test]
	fn matches_boundary_scenario_2() {
		// spec §8 boundary scenario 2: on-disk row 0, then O3 row 0.
		let idx = MergeIndex::from_raw(vec![0x8000000000000000, 0x0000000000000000]);
		assert_eq!(idx.get(0).side(), Side::OnDisk);
		assert_eq!(idx.get(0).row(), 0);
		assert_eq!(idx.get(1).side(), Side::OutOfOrder);
		assert_eq!(idx.get(1).row(), 0);
	}
}
