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

//! Owning handles over memory-mapped column/index files (spec §9 "raw
//! pointer plus offset arithmetic" re-architecture guidance). The source
//! speaks directly to addresses returned by `mmap`; here each region is an
//! owning handle with a known length, and the only unsafe code in the crate
//! lives behind [`ColumnRegion::as_mut_slice`], used exclusively by the copy
//! job (§4.3, §5) to hand each task its disjoint byte window as an ordinary
//! `&mut [u8]`. Everything downstream of that boundary - the column copier
//! and merge shuffle primitives - is safe code operating on slices.

use crate::error::Result;
use memmap2::{Mmap, MmapMut};
use std::fs::File;

/// A memory-mapped region, read-only or read-write. Holds the mapping alive
/// for as long as the handle lives; dropping it unmaps (mirrors the source's
/// explicit `munmap`, but tied to RAII instead of an explicit teardown call).
pub enum ColumnRegion {
	ReadOnly(Mmap),
	ReadWrite(MmapMut),
	/// An empty region: spec §4.3 "Unmap is skipped for a region whose
	/// address or size is zero."
	Empty,
}

impl ColumnRegion {
	pub fn map_read_only(file: &File, len: usize) -> Result<ColumnRegion> {
		if len == 0 {
			return Ok(ColumnRegion::Empty);
		}
		// Safety: the backing file is exclusively owned by the caller for the
		// lifetime of this mapping, per the job-queue contract (spec §5:
		// regions are disjoint and not concurrently resized).
		let mmap = unsafe { Mmap::map(file)? };
		Ok(ColumnRegion::ReadOnly(mmap))
	}

	pub fn map_read_write(file: &File, len: usize) -> Result<ColumnRegion> {
		if len == 0 {
			return Ok(ColumnRegion::Empty);
		}
		let mmap = unsafe { MmapMut::map_mut(file)? };
		Ok(ColumnRegion::ReadWrite(mmap))
	}

	pub fn len(&self) -> usize {
		match self {
			ColumnRegion::ReadOnly(m) => m.len(),
			ColumnRegion::ReadWrite(m) => m.len(),
			ColumnRegion::Empty => 0,
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn as_slice(&self) -> &[u8] {
		match self {
			ColumnRegion::ReadOnly(m) => &m[..],
			ColumnRegion::ReadWrite(m) => &m[..],
			ColumnRegion::Empty => &[],
		}
	}

	/// Exposes the backing mapping as a `&mut [u8]` without requiring `&mut
	/// self`, so two copy tasks on two different workers can each obtain a
	/// (disjoint) mutable slice of the same mapping concurrently.
	///
	/// # Safety
	/// The caller must guarantee that the byte ranges any two concurrent
	/// callers write through this method do not overlap. The O3 copy job
	/// upholds this because the producer computes non-overlapping
	/// `[dstOffset, dstOffset + len)` windows per task (spec §5).
	pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
		match self {
			ColumnRegion::ReadOnly(_) => &mut [],
			ColumnRegion::ReadWrite(m) => {
				let ptr = m.as_ptr() as *mut u8;
				std::slice::from_raw_parts_mut(ptr, m.len())
			}
			ColumnRegion::Empty => &mut [],
		}
	}

	pub fn flush(&self) -> Result<()> {
		if let ColumnRegion::ReadWrite(m) = self {
			m.flush()?;
		}
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use std::io::Write;

	fn temp_file(contents: &[u8]) -> (tempfile_like::TempFile, File) {
		let dir = std::env::temp_dir().join(format!("o3-mmap-test-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let path = dir.join(format!("{}.bin", rand_suffix()));
		let mut f = std::fs::OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&path).unwrap();
		f.write_all(contents).unwrap();
		f.flush().unwrap();
		let reopened = std::fs::OpenOptions::new().read(true).write(true).open(&path).unwrap();
		(tempfile_like::TempFile(path), reopened)
	}

	fn rand_suffix() -> u64 {
		use std::time::{SystemTime, UNIX_EPOCH};
		SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64
	}

	mod tempfile_like {
		pub struct TempFile(pub std::path::PathBuf);
		impl Drop for TempFile {
			fn drop(&mut self) {
				let _ = std::fs::remove_file(&self.0);
			}
		}
	}

	#[test]
	fn empty_region_skips_mapping() {
		let (_tmp, f) = temp_file(&[]);
		let region = ColumnRegion::map_read_write(&f, 0).unwrap();
		assert!(region.is_empty());
		assert_eq!(region.as_slice(), &[] as &[u8]);
	}

	#[test]
	fn read_write_round_trips() {
		let (_tmp, f) = temp_file(&[0u8; 16]);
		let region = ColumnRegion::map_read_write(&f, 16).unwrap();
		unsafe {
			region.as_mut_slice()[0..4].copy_from_slice(&[1, 2, 3, 4]);
		}
		assert_eq!(&region.as_slice()[0..4], &[1, 2, 3, 4]);
	}
}
