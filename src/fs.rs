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

//! File-system facade (spec §6.4): `open`/`close`/`mmap`/`munmap`/
//! `truncate`/`exists`/`getMapPageSize`, out of scope for the engine proper
//! but given a concrete `StdFiles` implementation here so the crate is
//! runnable standalone (`SPEC_FULL.md` §0). `munmap` is not a method on the
//! trait: dropping a [`ColumnRegion`] unmaps it, matching parity-db's RAII
//! treatment of its own mmapped value tables.

use crate::mmap::ColumnRegion;
use crate::error::Result;
use std::fs::File;
use std::path::Path;

pub trait Files {
	fn open(&self, path: &Path) -> Result<File>;
	fn exists(&self, path: &Path) -> bool;
	fn truncate(&self, file: &File, len: u64) -> Result<()>;
	fn mmap_read_only(&self, file: &File, len: usize) -> Result<ColumnRegion>;
	fn mmap_read_write(&self, file: &File, len: usize) -> Result<ColumnRegion>;
	fn map_page_size(&self) -> usize;
}

/// Real file-system facade backed by `std::fs` and `memmap2`.
pub struct StdFiles;

impl Files for StdFiles {
	fn open(&self, path: &Path) -> Result<File> {
		Ok(std::fs::OpenOptions::new().create(true).read(true).write(true).open(path)?)
	}

	fn exists(&self, path: &Path) -> bool {
		path.exists()
	}

	fn truncate(&self, file: &File, len: u64) -> Result<()> {
		Ok(file.set_len(len)?)
	}

	fn mmap_read_only(&self, file: &File, len: usize) -> Result<ColumnRegion> {
		ColumnRegion::map_read_only(file, len)
	}

	fn mmap_read_write(&self, file: &File, len: usize) -> Result<ColumnRegion> {
		ColumnRegion::map_read_write(file, len)
	}

	#[cfg(unix)]
	fn map_page_size(&self) -> usize {
		let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
		if page_size > 0 {
			page_size as usize
		} else {
			4096
		}
	}

	#[cfg(not(unix))]
	fn map_page_size(&self) -> usize {
		4096
	}
}
