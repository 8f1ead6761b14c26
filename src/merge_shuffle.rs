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

//! MergeShuffle (spec §4.2): for a `MERGE` block, interleave the two sides
//! of a column according to the merge index. `shuffle8`/`16`/`32`/`64`
//! cover fixed-width columns; string and binary columns get their own
//! length-prefixed merges (§4.2.1, §4.2.2); timestamp-with-row-index columns
//! shuffle only the timestamp half of each 16-byte source pair.

use crate::error::{Error, Result};
use crate::merge_index::{MergeEntry, MergeIndex, Side};
use crate::size_class::SizeClass;

fn side_slice<'a>(entry: MergeEntry, oo: &'a [u8], disk: &'a [u8]) -> &'a [u8] {
	match entry.side() {
		Side::OutOfOrder => oo,
		Side::OnDisk => disk,
	}
}

/// `shuffle8`/`shuffle16`/`shuffle32`/`shuffle64`: for each merge-index entry
/// in order, copy one fixed-width row from the side/row the entry selects
/// into the next destination slot.
pub fn shuffle_fixed(
	index: &MergeIndex,
	oo_src: &[u8],
	disk_src: &[u8],
	dst: &mut [u8],
	size_class: SizeClass,
) -> Result<()> {
	let width = size_class.row_width();
	require(dst.len() >= index.len() * width, "shuffle_fixed dst too small")?;
	for (i, entry) in index.entries().iter().enumerate() {
		let src = side_slice(*entry, oo_src, disk_src);
		let row = entry.row() as usize;
		let src_off = row * width;
		require(src.len() >= src_off + width, "shuffle_fixed src out of bounds")?;
		let dst_off = i * width;
		dst[dst_off..dst_off + width].copy_from_slice(&src[src_off..src_off + width]);
	}
	Ok(())
}

/// Timestamp-with-row-index variant: source rows are 16-byte `(timestamp,
/// rowId)` pairs; only the 8-byte timestamp half is shuffled out.
pub fn shuffle_timestamp_with_row_id(
	index: &MergeIndex,
	oo_src: &[u8],
	disk_src: &[u8],
	dst: &mut [u8],
) -> Result<()> {
	const PAIR_WIDTH: usize = 16;
	require(dst.len() >= index.len() * 8, "shuffle_timestamp dst too small")?;
	for (i, entry) in index.entries().iter().enumerate() {
		let src = side_slice(*entry, oo_src, disk_src);
		let row = entry.row() as usize;
		let src_off = row * PAIR_WIDTH;
		require(src.len() >= src_off + 8, "shuffle_timestamp src out of bounds")?;
		let dst_off = i * 8;
		dst[dst_off..dst_off + 8].copy_from_slice(&src[src_off..src_off + 8]);
	}
	Ok(())
}

/// §4.2.1 string merge: 4-byte length prefix, `2 * max(0, len)` UTF-16
/// payload bytes. Returns the final `destVarOffset`.
pub fn merge_string(
	index: &MergeIndex,
	oo_fix: &[u8],
	oo_var: &[u8],
	disk_fix: &[u8],
	disk_var: &[u8],
	dst_fix: &mut [u8],
	dst_var: &mut [u8],
) -> Result<u64> {
	let mut dst_var_offset: u64 = 0;
	require(dst_fix.len() >= index.len() * 8, "merge_string dst_fix too small")?;
	for (i, entry) in index.entries().iter().enumerate() {
		let (src_fix, src_var) = match entry.side() {
			Side::OutOfOrder => (oo_fix, oo_var),
			Side::OnDisk => (disk_fix, disk_var),
		};
		let row = entry.row() as usize;
		dst_fix[i * 8..i * 8 + 8].copy_from_slice(&dst_var_offset.to_le_bytes());

		let src_offset = read_u64(src_fix, row * 8)?;
		let addr = src_offset as usize;
		let len = read_i32(src_var, addr)?;
		write_slice(dst_var, dst_var_offset as usize, &len.to_le_bytes())?;
		let payload_len = (len.max(0) as usize) * 2;
		if payload_len > 0 {
			let src_payload = slice_at(src_var, addr + 4, payload_len)?;
			write_slice_bytes(dst_var, dst_var_offset as usize + 4, src_payload)?;
		}
		dst_var_offset += 4 + payload_len as u64;
	}
	Ok(dst_var_offset)
}

/// §4.2.2 binary merge: 8-byte length word, `max(0, len)` raw payload bytes.
pub fn merge_binary(
	index: &MergeIndex,
	oo_fix: &[u8],
	oo_var: &[u8],
	disk_fix: &[u8],
	disk_var: &[u8],
	dst_fix: &mut [u8],
	dst_var: &mut [u8],
) -> Result<u64> {
	let mut dst_var_offset: u64 = 0;
	require(dst_fix.len() >= index.len() * 8, "merge_binary dst_fix too small")?;
	for (i, entry) in index.entries().iter().enumerate() {
		let (src_fix, src_var) = match entry.side() {
			Side::OutOfOrder => (oo_fix, oo_var),
			Side::OnDisk => (disk_fix, disk_var),
		};
		let row = entry.row() as usize;
		dst_fix[i * 8..i * 8 + 8].copy_from_slice(&dst_var_offset.to_le_bytes());

		let src_offset = read_u64(src_fix, row * 8)?;
		let addr = src_offset as usize;
		let len = read_i64(src_var, addr)?;
		let payload_len = len.max(0) as usize;
		// length + payload copied contiguously when len > 0, per §4.2.2.
		let total = 8 + payload_len;
		let src_block = slice_at(src_var, addr, total)?;
		write_slice_bytes(dst_var, dst_var_offset as usize, src_block)?;
		dst_var_offset += total as u64;
	}
	Ok(dst_var_offset)
}

fn require(cond: bool, what: &str) -> Result<()> {
	if !cond {
		return Err(Error::InvariantViolation(what.to_string()));
	}
	Ok(())
}

fn slice_at(buf: &[u8], offset: usize, len: usize) -> Result<&[u8]> {
	require(offset.checked_add(len).map_or(false, |end| end <= buf.len()), "merge_shuffle slice out of bounds")?;
	Ok(&buf[offset..offset + len])
}

fn write_slice_bytes(buf: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
	require(offset.checked_add(data.len()).map_or(false, |end| end <= buf.len()), "merge_shuffle write out of bounds")?;
	buf[offset..offset + data.len()].copy_from_slice(data);
	Ok(())
}

fn write_slice(buf: &mut [u8], offset: usize, data: &[u8]) -> Result<()> {
	write_slice_bytes(buf, offset, data)
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
	Ok(u64::from_le_bytes(slice_at(buf, offset, 8)?.try_into().unwrap()))
}

fn read_i32(buf: &[u8], offset: usize) -> Result<i32> {
	Ok(i32::from_le_bytes(slice_at(buf, offset, 4)?.try_into().unwrap()))
}

fn read_i64(buf: &[u8], offset: usize) -> Result<i64> {
	Ok(i64::from_le_bytes(slice_at(buf, offset, 8)?.try_into().unwrap()))
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::merge_index::{MergeEntry, Side};

	#[test]
	fn shuffle64_matches_spec_invariant_3() {
		let oo: Vec<u8> = (0u64..4).flat_map(|v| v.to_le_bytes()).collect();
		let disk: Vec<u8> = (100u64..104).flat_map(|v| v.to_le_bytes()).collect();
		let idx = MergeIndex::from_entries(vec![
			MergeEntry::new(Side::OnDisk, 0),
			MergeEntry::new(Side::OutOfOrder, 0),
			MergeEntry::new(Side::OnDisk, 1),
			MergeEntry::new(Side::OutOfOrder, 1),
		]);
		let mut dst = vec![0u8; 32];
		shuffle_fixed(&idx, &oo, &disk, &mut dst, SizeClass::Long).unwrap();
		let want: Vec<u64> = vec![100, 0, 101, 1];
		let got: Vec<u64> = dst.chunks(8).map(|c| u64::from_le_bytes(c.try_into().unwrap())).collect();
		assert_eq!(got, want);
	}

	#[test]
	fn string_merge_matches_boundary_scenario_2() {
		// spec §8 boundary scenario 2.
		let idx = MergeIndex::from_raw(vec![0x8000000000000000, 0x0000000000000000]);

		let oo_fix = 0u64.to_le_bytes().to_vec();
		let mut oo_var = vec![0x01, 0x00, 0x00, 0x00];
		oo_var.extend_from_slice(&[b'a', 0x00]);

		let disk_fix = 0u64.to_le_bytes().to_vec();
		let mut disk_var = vec![0x02, 0x00, 0x00, 0x00];
		disk_var.extend_from_slice(&[b'b', 0x00, b'b', 0x00]);

		let mut dst_fix = vec![0u8; 16];
		let mut dst_var = vec![0u8; 14];
		let end = merge_string(&idx, &oo_fix, &oo_var, &disk_fix, &disk_var, &mut dst_fix, &mut dst_var).unwrap();
		assert_eq!(end, 14);

		let fix0 = u64::from_le_bytes(dst_fix[0..8].try_into().unwrap());
		let fix1 = u64::from_le_bytes(dst_fix[8..16].try_into().unwrap());
		assert_eq!(fix0, 0);
		assert_eq!(fix1, 10);

		let mut want_var = vec![0x02, 0, 0, 0];
		want_var.extend_from_slice(&[b'b', 0, b'b', 0]);
		want_var.extend_from_slice(&[0x01, 0, 0, 0]);
		want_var.extend_from_slice(&[b'a', 0]);
		assert_eq!(dst_var, want_var);
	}

	#[test]
	fn string_merge_propagates_null() {
		let idx = MergeIndex::from_entries(vec![MergeEntry::new(Side::OutOfOrder, 0)]);
		let oo_fix = 0u64.to_le_bytes().to_vec();
		let oo_var = (-1i32).to_le_bytes().to_vec();
		let disk_fix: Vec<u8> = vec![];
		let disk_var: Vec<u8> = vec![];

		let mut dst_fix = vec![0u8; 8];
		let mut dst_var = vec![0u8; 4];
		let end = merge_string(&idx, &oo_fix, &oo_var, &disk_fix, &disk_var, &mut dst_fix, &mut dst_var).unwrap();
		assert_eq!(end, 4);
		assert_eq!(dst_var, oo_var);
	}

	#[test]
	fn binary_merge_copies_length_and_payload_contiguously() {
		let idx = MergeIndex::from_entries(vec![MergeEntry::new(Side::OnDisk, 0)]);
		let disk_fix = 0u64.to_le_bytes().to_vec();
		let mut disk_var = 3i64.to_le_bytes().to_vec();
		disk_var.extend_from_slice(&[9, 9, 9]);
		let oo_fix: Vec<u8> = vec![];
		let oo_var: Vec<u8> = vec![];

		let mut dst_fix = vec![0u8; 8];
		let mut dst_var = vec![0u8; 11];
		let end = merge_binary(&idx, &oo_fix, &oo_var, &disk_fix, &disk_var, &mut dst_fix, &mut dst_var).unwrap();
		assert_eq!(end, 11);
		assert_eq!(dst_var, disk_var);
	}
}
