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

//! Column Copier (spec §4.1): copies a contiguous slice of one source
//! column into a destination offset. Operates on plain slices - the unsafe
//! bridge from shared mmap regions to disjoint `&mut [u8]` windows lives in
//! [`crate::mmap`], one layer up in [`crate::copy_job`].

use crate::error::{Error, Result};
use crate::size_class::SizeClass;

/// §4.1.1 fixed-width copy: copy exactly `(srcHi - srcLo + 1) << k` bytes
/// from `src[srcLo << k ..]` to `dst[dstOffset ..]`. No reinterpretation, no
/// endian conversion.
pub fn copy_fixed_size(
	src: &[u8],
	src_lo: u64,
	src_hi: u64,
	dst: &mut [u8],
	dst_offset: usize,
	size_class: SizeClass,
) -> Result<()> {
	if src_hi < src_lo {
		// spec §8 boundary scenario 1: empty range copies zero bytes.
		return Ok(());
	}
	let shift = size_class.shift();
	let row_count = src_hi - src_lo + 1;
	let len = (row_count << shift) as usize;
	let src_start = (src_lo << shift) as usize;
	check_bounds(src.len(), src_start, len, "column_copier::copy_fixed_size src")?;
	check_bounds(dst.len(), dst_offset, len, "column_copier::copy_fixed_size dst")?;
	dst[dst_offset..dst_offset + len].copy_from_slice(&src[src_start..src_start + len]);
	Ok(())
}

/// §4.1.3 timestamp-with-row-index copy: the source fixed file holds 16-byte
/// `(timestamp, rowId)` pairs; only the 8-byte timestamp half is written to
/// the destination, yielding a standard 8-byte timestamp column.
pub fn copy_timestamp_with_row_id(
	src: &[u8],
	src_lo: u64,
	src_hi: u64,
	dst: &mut [u8],
	dst_offset: usize,
) -> Result<()> {
	if src_hi < src_lo {
		return Ok(());
	}
	const PAIR_WIDTH: usize = 16;
	let row_count = (src_hi - src_lo + 1) as usize;
	check_bounds(src.len(), src_lo as usize * PAIR_WIDTH, row_count * PAIR_WIDTH, "copy_timestamp_with_row_id src")?;
	check_bounds(dst.len(), dst_offset, row_count * 8, "copy_timestamp_with_row_id dst")?;
	for i in 0..row_count {
		let src_off = (src_lo as usize + i) * PAIR_WIDTH;
		let dst_off = dst_offset + i * 8;
		dst[dst_off..dst_off + 8].copy_from_slice(&src[src_off..src_off + 8]);
	}
	Ok(())
}

/// §4.1.2 variable-width copy. `dst_fix_row` is the destination row index at
/// which the rewritten offsets for `[src_lo, src_hi]` are written (i.e. the
/// destination fixed-file byte offset is `dst_fix_row * 8`).
pub fn copy_var_size(
	src_fix: &[u8],
	src_var: &[u8],
	src_lo: u64,
	src_hi: u64,
	dst_fix: &mut [u8],
	dst_fix_row: u64,
	dst_var: &mut [u8],
	dst_var_offset: u64,
) -> Result<()> {
	if src_hi < src_lo {
		return Ok(());
	}
	let lo = read_u64(src_fix, src_lo as usize * 8)?;
	let src_fix_rows = src_fix.len() as u64 / 8;
	let hi = if src_hi + 1 == src_fix_rows {
		src_var.len() as u64
	} else {
		read_u64(src_fix, (src_hi as usize + 1) * 8)?
	};
	if hi < lo {
		return Err(Error::InvariantViolation(format!(
			"variable-width column offsets out of order: lo={} hi={}",
			lo, hi
		)));
	}
	let payload_len = (hi - lo) as usize;
	check_bounds(src_var.len(), lo as usize, payload_len, "copy_var_size src_var")?;
	check_bounds(dst_var.len(), dst_var_offset as usize, payload_len, "copy_var_size dst_var")?;
	dst_var[dst_var_offset as usize..dst_var_offset as usize + payload_len]
		.copy_from_slice(&src_var[lo as usize..lo as usize + payload_len]);

	let row_count = (src_hi - src_lo + 1) as usize;
	check_bounds(dst_fix.len(), dst_fix_row as usize * 8, row_count * 8, "copy_var_size dst_fix")?;
	if lo == dst_var_offset {
		// size-class 3: verbatim, no shift needed.
		let src_start = src_lo as usize * 8;
		let dst_start = dst_fix_row as usize * 8;
		dst_fix[dst_start..dst_start + row_count * 8]
			.copy_from_slice(&src_fix[src_start..src_start + row_count * 8]);
	} else {
		let shift = lo as i64 - dst_var_offset as i64;
		for i in 0..row_count {
			let src_off = read_u64(src_fix, (src_lo as usize + i) * 8)?;
			let new_off = (src_off as i64 - shift) as u64;
			write_u64(dst_fix, (dst_fix_row as usize + i) * 8, new_off);
		}
	}
	Ok(())
}

fn check_bounds(len: usize, offset: usize, size: usize, what: &str) -> Result<()> {
	if offset.checked_add(size).map_or(true, |end| end > len) {
		return Err(Error::InvariantViolation(format!(
			"{} out of bounds: offset={} size={} len={}",
			what, offset, size, len
		)));
	}
	Ok(())
}

fn read_u64(buf: &[u8], offset: usize) -> Result<u64> {
	check_bounds(buf.len(), offset, 8, "column_copier::read_u64")?;
	Ok(u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap()))
}

fn write_u64(buf: &mut [u8], offset: usize, value: u64) {
	buf[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
}
