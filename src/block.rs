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

//! Block type (spec §3.3): partitions a partition's output column into
//! OO-only, DATA-only and MERGE interleaved slices.

/// Provenance of the slice a copy task writes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockType {
	/// Slice originates entirely from the out-of-order batch.
	Oo,
	/// Slice originates entirely from the existing on-disk partition.
	Data,
	/// The two sides interleave; the merge index governs row order.
	Merge,
}
