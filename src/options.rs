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

//! Ambient configuration, the counterpart of the teacher's (unvendored)
//! `options::ColumnOptions` - small, explicit structs constructed with
//! `::new`/`Default` rather than a builder, matching `ValueTable::open`'s
//! `&Options` parameter convention.

use crate::error::{Error, Result};

/// Configuration for one [`crate::bitmap::BitmapIndexWriter`] instance.
#[derive(Clone, Copy, Debug)]
pub struct BitmapIndexOptions {
	/// Number of 8-byte values per value block. Must be a power of two
	/// (spec §3.5).
	pub block_value_count: u32,
}

impl BitmapIndexOptions {
	pub fn new(block_value_count: u32) -> Result<BitmapIndexOptions> {
		if block_value_count == 0 || !block_value_count.is_power_of_two() {
			return Err(Error::InvalidArgument(format!(
				"block_value_count must be a nonzero power of two, got {}",
				block_value_count
			)));
		}
		Ok(BitmapIndexOptions { block_value_count })
	}
}

impl Default for BitmapIndexOptions {
	fn default() -> BitmapIndexOptions {
		// 256 values (2KiB) per block: a reasonable default run length.
		BitmapIndexOptions { block_value_count: 256 }
	}
}

/// Per-column configuration consumed by the O3 copy job (spec §4.3): whether
/// the column feeds a bitmap index once materialized.
#[derive(Clone, Copy, Debug, Default)]
pub struct O3ColumnOptions {
	pub indexed: bool,
}

impl O3ColumnOptions {
	pub fn new(indexed: bool) -> O3ColumnOptions {
		O3ColumnOptions { indexed }
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn rejects_non_power_of_two_block_size() {
		assert!(BitmapIndexOptions::new(0).is_err());
		assert!(BitmapIndexOptions::new(3).is_err());
		assert!(BitmapIndexOptions::new(4).is_ok());
	}
}
