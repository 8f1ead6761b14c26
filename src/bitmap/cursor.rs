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

//! Read-only bitmap index cursor. Not named in the distilled specification;
//! added so the commit protocol it implements (spec §4.4.3, §7) can be
//! exercised end to end in tests rather than only inspected byte-by-byte.

use super::header::{KeyEntry, KeyFileHeader, ValueBlock, KEY_ENTRY_SIZE, KEY_FILE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::fs::Files;
use std::path::Path;

const COMMIT_RETRY_COUNT: u32 = 16;

fn key_file_name(index_name: &str) -> String {
	format!("{}.k", index_name)
}

fn value_file_name(index_name: &str) -> String {
	format!("{}.v", index_name)
}

/// A read-only view over a committed bitmap index, honoring the reader side
/// of the sequence/sequence-check and count/count-check protocol: retry a
/// bounded number of times on an in-progress write, then fail with
/// [`Error::CorruptIndex`] rather than return a torn read.
pub struct BitmapIndexCursor {
	key_region: crate::mmap::ColumnRegion,
	value_region: crate::mmap::ColumnRegion,
	block_value_count: u32,
	key_count: u64,
}

impl BitmapIndexCursor {
	pub fn open(files: &dyn Files, dir: &Path, index_name: &str) -> Result<BitmapIndexCursor> {
		let key_path = dir.join(key_file_name(index_name));
		let value_path = dir.join(value_file_name(index_name));

		let key_file = files.open(&key_path)?;
		let key_len = key_file.metadata()?.len();
		if key_len < KEY_FILE_HEADER_SIZE as u64 {
			return Err(Error::CorruptIndex(format!("key file {:?} shorter than header", key_path)));
		}
		let key_region = files.mmap_read_only(&key_file, key_len as usize)?;

		let (block_value_count, key_count) = Self::read_committed_header(key_region.as_slice())?;

		let value_file = files.open(&value_path)?;
		let value_len = value_file.metadata()?.len();
		let value_region = files.mmap_read_only(&value_file, value_len as usize)?;

		Ok(BitmapIndexCursor { key_region, value_region, block_value_count, key_count })
	}

	fn read_committed_header(buf: &[u8]) -> Result<(u32, u64)> {
		if KeyFileHeader::signature(buf) != super::header::SIGNATURE {
			return Err(Error::CorruptIndex("bad key file signature".into()));
		}
		for _ in 0..COMMIT_RETRY_COUNT {
			if KeyFileHeader::is_committed(buf) {
				return Ok((KeyFileHeader::block_value_count(buf), KeyFileHeader::key_count(buf)));
			}
			std::hint::spin_loop();
		}
		Err(Error::CorruptIndex("key file header never settled (S != S')".into()))
	}

	fn read_committed_entry(&self, key: u64) -> Result<(u64, u64, u64)> {
		let off = KeyEntry::byte_offset(key);
		let buf = self.key_region.as_slice();
		let entry = &buf[off..off + KEY_ENTRY_SIZE];
		for _ in 0..COMMIT_RETRY_COUNT {
			if KeyEntry::is_committed(entry) {
				return Ok((
					KeyEntry::value_count(entry),
					KeyEntry::first_block_offset(entry),
					KeyEntry::last_block_offset(entry),
				));
			}
			std::hint::spin_loop();
		}
		Err(Error::CorruptIndex(format!("key entry {} never settled (valueCount != valueCountCheck)", key)))
	}

	pub fn key_count(&self) -> u64 {
		self.key_count
	}

	/// All values ever added under `key`, in insertion order (spec §3.5
	/// invariant: append-only, so this doubles as row-id order for a
	/// timestamp-sorted column).
	pub fn values_for(&self, key: u64) -> Result<Vec<u64>> {
		if key >= self.key_count {
			return Ok(Vec::new());
		}
		let (value_count, first_block_offset, last_block_offset) = self.read_committed_entry(key)?;
		if value_count == 0 {
			return Ok(Vec::new());
		}

		let mut block_offsets = vec![last_block_offset];
		let mut cursor = last_block_offset;
		let mut guard = 0u64;
		while cursor != first_block_offset {
			let prev = self.read_prev_link(cursor)?;
			block_offsets.push(prev);
			cursor = prev;
			guard += 1;
			if guard > value_count {
				return Err(Error::CorruptIndex(format!("block chain for key {} does not terminate at firstBlockOffset", key)));
			}
		}
		block_offsets.reverse();

		let b = self.block_value_count as u64;
		let last_count = ((value_count - 1) % b) + 1;
		let mut values = Vec::with_capacity(value_count as usize);
		let num_blocks = block_offsets.len();
		for (i, offset) in block_offsets.into_iter().enumerate() {
			let take = if i + 1 == num_blocks { last_count } else { b };
			for cell in 0..take {
				let off = offset as usize + ValueBlock::value_offset(cell as u32);
				let bytes = &self.value_region.as_slice()[off..off + 8];
				values.push(u64::from_le_bytes(bytes.try_into().unwrap()));
			}
		}
		Ok(values)
	}

	fn read_prev_link(&self, block_offset: u64) -> Result<u64> {
		let off = block_offset as usize + ValueBlock::prev_offset(self.block_value_count);
		let buf = self.value_region.as_slice();
		if off + 8 > buf.len() {
			return Err(Error::CorruptIndex(format!("prev-link offset {} out of range", off)));
		}
		Ok(u64::from_le_bytes(buf[off..off + 8].try_into().unwrap()))
	}
}
