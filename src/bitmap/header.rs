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

//! On-disk layouts for the bitmap index's key file header and per-key
//! entries (spec §3.5, §6.1).

pub const KEY_FILE_HEADER_SIZE: usize = 64;
pub const KEY_ENTRY_SIZE: usize = 32;
pub const SIGNATURE: u8 = 0xfa;

const SIG_OFF: usize = 0;
const SEQ_OFF: usize = 8;
const VALUE_SIZE_OFF: usize = 16;
const BLOCK_COUNT_OFF: usize = 24;
const KEY_COUNT_OFF: usize = 32;
const SEQ_CHECK_OFF: usize = 40;

/// A 64-byte key-file header view (spec §6.1): 1-byte signature, sequence
/// `S`, value-memory-size `V`, block value count `B`, key count `K`,
/// sequence-check `S'`. `S == S'` indicates a committed header.
pub struct KeyFileHeader;

impl KeyFileHeader {
	pub fn init(buf: &mut [u8], block_value_count: u32) {
		debug_assert!(buf.len() >= KEY_FILE_HEADER_SIZE);
		buf[..KEY_FILE_HEADER_SIZE].fill(0);
		buf[SIG_OFF] = SIGNATURE;
		Self::write_u64(buf, SEQ_OFF, 1);
		Self::write_u64(buf, VALUE_SIZE_OFF, 0);
		buf[BLOCK_COUNT_OFF..BLOCK_COUNT_OFF + 4].copy_from_slice(&block_value_count.to_le_bytes());
		Self::write_u64(buf, KEY_COUNT_OFF, 0);
		Self::write_u64(buf, SEQ_CHECK_OFF, 1);
	}

	pub fn signature(buf: &[u8]) -> u8 {
		buf[SIG_OFF]
	}

	pub fn sequence(buf: &[u8]) -> u64 {
		Self::read_u64(buf, SEQ_OFF)
	}

	pub fn set_sequence(buf: &mut [u8], value: u64) {
		Self::write_u64(buf, SEQ_OFF, value);
	}

	pub fn value_size(buf: &[u8]) -> u64 {
		Self::read_u64(buf, VALUE_SIZE_OFF)
	}

	pub fn set_value_size(buf: &mut [u8], value: u64) {
		Self::write_u64(buf, VALUE_SIZE_OFF, value);
	}

	pub fn block_value_count(buf: &[u8]) -> u32 {
		u32::from_le_bytes(buf[BLOCK_COUNT_OFF..BLOCK_COUNT_OFF + 4].try_into().unwrap())
	}

	pub fn key_count(buf: &[u8]) -> u64 {
		Self::read_u64(buf, KEY_COUNT_OFF)
	}

	pub fn set_key_count(buf: &mut [u8], value: u64) {
		Self::write_u64(buf, KEY_COUNT_OFF, value);
	}

	pub fn sequence_check(buf: &[u8]) -> u64 {
		Self::read_u64(buf, SEQ_CHECK_OFF)
	}

	pub fn set_sequence_check(buf: &mut [u8], value: u64) {
		Self::write_u64(buf, SEQ_CHECK_OFF, value);
	}

	pub fn is_committed(buf: &[u8]) -> bool {
		Self::sequence(buf) == Self::sequence_check(buf)
	}

	fn read_u64(buf: &[u8], off: usize) -> u64 {
		u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
	}

	fn write_u64(buf: &mut [u8], off: usize, value: u64) {
		buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
	}
}

const VALUE_COUNT_OFF: usize = 0;
const FIRST_BLOCK_OFF: usize = 8;
const LAST_BLOCK_OFF: usize = 16;
const VALUE_COUNT_CHECK_OFF: usize = 24;

/// A 32-byte per-key entry view (spec §3.5, §6.1).
pub struct KeyEntry;

impl KeyEntry {
	pub fn byte_offset(key: u64) -> usize {
		KEY_FILE_HEADER_SIZE + key as usize * KEY_ENTRY_SIZE
	}

	pub fn value_count(entry: &[u8]) -> u64 {
		Self::read_u64(entry, VALUE_COUNT_OFF)
	}

	pub fn set_value_count(entry: &mut [u8], value: u64) {
		Self::write_u64(entry, VALUE_COUNT_OFF, value);
	}

	pub fn first_block_offset(entry: &[u8]) -> u64 {
		Self::read_u64(entry, FIRST_BLOCK_OFF)
	}

	pub fn set_first_block_offset(entry: &mut [u8], value: u64) {
		Self::write_u64(entry, FIRST_BLOCK_OFF, value);
	}

	pub fn last_block_offset(entry: &[u8]) -> u64 {
		Self::read_u64(entry, LAST_BLOCK_OFF)
	}

	pub fn set_last_block_offset(entry: &mut [u8], value: u64) {
		Self::write_u64(entry, LAST_BLOCK_OFF, value);
	}

	pub fn value_count_check(entry: &[u8]) -> u64 {
		Self::read_u64(entry, VALUE_COUNT_CHECK_OFF)
	}

	pub fn set_value_count_check(entry: &mut [u8], value: u64) {
		Self::write_u64(entry, VALUE_COUNT_CHECK_OFF, value);
	}

	pub fn is_committed(entry: &[u8]) -> bool {
		Self::value_count(entry) == Self::value_count_check(entry)
	}

	fn read_u64(buf: &[u8], off: usize) -> u64 {
		u64::from_le_bytes(buf[off..off + 8].try_into().unwrap())
	}

	fn write_u64(buf: &mut [u8], off: usize, value: u64) {
		buf[off..off + 8].copy_from_slice(&value.to_le_bytes());
	}
}

/// Value block layout (spec §3.5, §6.1): `B` 8-byte values followed by two
/// 8-byte links (previous-block-offset, next-block-offset).
pub struct ValueBlock;

impl ValueBlock {
	pub fn capacity(block_value_count: u32) -> u64 {
		block_value_count as u64 * 8 + 16
	}

	pub fn value_offset(cell_index: u32) -> usize {
		cell_index as usize * 8
	}

	pub fn prev_offset(block_value_count: u32) -> usize {
		block_value_count as usize * 8
	}

	pub fn next_offset(block_value_count: u32) -> usize {
		block_value_count as usize * 8 + 8
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn header_init_is_committed() {
		let mut buf = [0u8; KEY_FILE_HEADER_SIZE];
		KeyFileHeader::init(&mut buf, 256);
		assert_eq!(KeyFileHeader::signature(&buf), SIGNATURE);
		assert!(KeyFileHeader::is_committed(&buf));
		assert_eq!(KeyFileHeader::block_value_count(&buf), 256);
		assert_eq!(KeyFileHeader::key_count(&buf), 0);
	}

	#[test]
	fn key_entry_commit_detection() {
		let mut entry = [0u8; KEY_ENTRY_SIZE];
		KeyEntry::set_value_count(&mut entry, 3);
		assert!(!KeyEntry::is_committed(&entry));
		KeyEntry::set_value_count_check(&mut entry, 3);
		assert!(KeyEntry::is_committed(&entry));
	}

	#[test]
	fn value_block_layout() {
		assert_eq!(ValueBlock::capacity(4), 4 * 8 + 16);
		assert_eq!(ValueBlock::prev_offset(4), 32);
		assert_eq!(ValueBlock::next_offset(4), 40);
	}
}
