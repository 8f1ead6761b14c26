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

//! Bitmap Index Writer (spec §4.4): appends `(key, rowId)` pairs to a
//! two-file bitmap index with atomic visibility to concurrent readers via
//! the sequence/sequence-check and count/count-check double-write protocol
//! (spec §4.4.3, §7, §9).

use super::header::{KeyEntry, KeyFileHeader, ValueBlock, KEY_ENTRY_SIZE, KEY_FILE_HEADER_SIZE};
use crate::error::{Error, Result};
use crate::fs::Files;
use crate::options::BitmapIndexOptions;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

fn key_file_name(index_name: &str) -> String {
	format!("{}.k", index_name)
}

fn value_file_name(index_name: &str) -> String {
	format!("{}.v", index_name)
}

/// An open bitmap index, one key file + one value file. Single-threaded per
/// instance (spec §5): callers must not call `add` concurrently from two
/// threads on the same writer (wrap in a `Mutex` if sharing across workers,
/// as [`crate::task::O3CopyTask`] does).
pub struct BitmapIndexWriter {
	files: Arc<dyn Files + Send + Sync>,
	key_path: PathBuf,
	value_path: PathBuf,
	key_file: File,
	value_file: File,
	key_mmap: crate::mmap::ColumnRegion,
	value_mmap: crate::mmap::ColumnRegion,
	key_capacity: u64,
	value_capacity: u64,
	block_value_count: u32,
	block_value_count_mod: u32,
	block_capacity: u64,
	key_count: u64,
	value_file_size: u64,
}

impl BitmapIndexWriter {
	pub fn open(
		files: Arc<dyn Files + Send + Sync>,
		dir: &Path,
		index_name: &str,
		options: BitmapIndexOptions,
	) -> Result<BitmapIndexWriter> {
		let key_path = dir.join(key_file_name(index_name));
		let value_path = dir.join(value_file_name(index_name));

		let key_file = files.open(&key_path)?;
		let value_file = files.open(&value_path)?;

		let existing_key_len = key_file.metadata()?.len();
		let (key_count, value_file_size, block_value_count) = if existing_key_len == 0 {
			log::debug!(target: "o3::bitmap", "Initializing new bitmap index {:?}", key_path);
			files.truncate(&key_file, KEY_FILE_HEADER_SIZE as u64)?;
			{
				let region = files.mmap_read_write(&key_file, KEY_FILE_HEADER_SIZE)?;
				let buf = unsafe { region.as_mut_slice() };
				KeyFileHeader::init(buf, options.block_value_count);
				region.flush()?;
			}
			files.truncate(&value_file, 0)?;
			(0u64, 0u64, options.block_value_count)
		} else {
			if existing_key_len < KEY_FILE_HEADER_SIZE as u64 {
				return Err(Error::CorruptIndex(format!(
					"key file {:?} shorter than header ({} bytes)",
					key_path, existing_key_len
				)));
			}
			let region = files.mmap_read_only(&key_file, existing_key_len as usize)?;
			let buf = region.as_slice();
			if KeyFileHeader::signature(buf) != super::header::SIGNATURE {
				return Err(Error::CorruptIndex(format!("bad signature in {:?}", key_path)));
			}
			if !KeyFileHeader::is_committed(buf) {
				return Err(Error::CorruptIndex(format!("uncommitted header in {:?}", key_path)));
			}
			let k = KeyFileHeader::key_count(buf);
			let v = KeyFileHeader::value_size(buf);
			let b = KeyFileHeader::block_value_count(buf);
			let expected_key_len = k * KEY_ENTRY_SIZE as u64 + KEY_FILE_HEADER_SIZE as u64;
			if existing_key_len < expected_key_len {
				return Err(Error::CorruptIndex(format!(
					"key file {:?} length {} shorter than K*32+64={}",
					key_path, existing_key_len, expected_key_len
				)));
			}
			let value_len = value_file.metadata()?.len();
			if value_len < v {
				return Err(Error::CorruptIndex(format!(
					"value file {:?} length {} shorter than V={}",
					value_path, value_len, v
				)));
			}
			(k, v, b)
		};

		let key_capacity = key_count * KEY_ENTRY_SIZE as u64 + KEY_FILE_HEADER_SIZE as u64;
		files.truncate(&key_file, key_capacity.max(KEY_FILE_HEADER_SIZE as u64))?;
		let key_mmap = files.mmap_read_write(&key_file, key_capacity.max(KEY_FILE_HEADER_SIZE as u64) as usize)?;

		let value_capacity = value_file_size.max(1);
		files.truncate(&value_file, value_capacity)?;
		let value_mmap = files.mmap_read_write(&value_file, value_capacity as usize)?;

		Ok(BitmapIndexWriter {
			files,
			key_path,
			value_path,
			key_file,
			value_file,
			key_mmap,
			value_mmap,
			key_capacity: key_capacity.max(KEY_FILE_HEADER_SIZE as u64),
			value_capacity,
			block_value_count,
			block_value_count_mod: block_value_count - 1,
			block_capacity: ValueBlock::capacity(block_value_count),
			key_count,
			value_file_size,
		})
	}

	fn header_mut(&self) -> &mut [u8] {
		unsafe { self.key_mmap.as_mut_slice() }
	}

	fn entry_mut(&self, key: u64) -> &mut [u8] {
		let off = KeyEntry::byte_offset(key);
		unsafe { &mut self.key_mmap.as_mut_slice()[off..off + KEY_ENTRY_SIZE] }
	}

	fn ensure_key_capacity(&mut self, key: u64) -> Result<()> {
		let needed = key * KEY_ENTRY_SIZE as u64 + KEY_ENTRY_SIZE as u64 + KEY_FILE_HEADER_SIZE as u64;
		if needed <= self.key_capacity {
			return Ok(());
		}
		log::debug!(target: "o3::bitmap", "Growing key file {:?} to {} bytes", self.key_path, needed);
		self.files.truncate(&self.key_file, needed)?;
		self.key_mmap = self.files.mmap_read_write(&self.key_file, needed as usize)?;
		self.key_capacity = needed;
		Ok(())
	}

	fn ensure_value_capacity(&mut self, needed: u64) -> Result<()> {
		if needed <= self.value_capacity {
			return Ok(());
		}
		log::debug!(target: "o3::bitmap", "Growing value file {:?} to {} bytes", self.value_path, needed);
		self.files.truncate(&self.value_file, needed)?;
		self.value_mmap = self.files.mmap_read_write(&self.value_file, needed as usize)?;
		self.value_capacity = needed;
		Ok(())
	}

	/// §4.4.3: reserve `blockCapacity` bytes at the current `V`, store
	/// `value` at the new block's first cell, and commit the header's `V`
	/// update behind the sequence/sequence-check protocol.
	fn allocate_value_block(&mut self, value: u64) -> Result<u64> {
		let new_offset = self.value_file_size;
		let new_value_size = new_offset + self.block_capacity;
		self.ensure_value_capacity(new_value_size)?;

		let block = unsafe { &mut self.value_mmap.as_mut_slice()[new_offset as usize..new_offset as usize + self.block_capacity as usize] };
		block.fill(0);
		block[0..8].copy_from_slice(&value.to_le_bytes());
		// Block contents must be visible before the header advertises `V`
		// covers them.
		fence(Ordering::Release);

		let header = self.header_mut();
		let s = KeyFileHeader::sequence(header) + 1;
		KeyFileHeader::set_sequence(header, s);
		fence(Ordering::Release);
		KeyFileHeader::set_value_size(header, new_value_size);
		fence(Ordering::Release);
		KeyFileHeader::set_sequence_check(header, s);
		fence(Ordering::Release);

		self.value_file_size = new_value_size;
		Ok(new_offset)
	}

	fn update_key_count(&mut self, new_key_count: u64) -> Result<()> {
		self.ensure_key_capacity(new_key_count.saturating_sub(1))?;
		let header = self.header_mut();
		KeyFileHeader::set_key_count(header, new_key_count);
		fence(Ordering::Release);
		self.key_count = new_key_count;
		Ok(())
	}

	/// §4.4.2 `add(key, value)`.
	pub fn add(&mut self, key: u64, value: u64) -> Result<()> {
		if key >= self.key_count {
			// Scenario 1: brand new key (possibly leaving a sparse run of
			// zero-filled holes behind it, spec §8 boundary scenario 4).
			self.ensure_key_capacity(key)?;
			let new_offset = self.allocate_value_block(value)?;
			let entry = self.entry_mut(key);
			KeyEntry::set_value_count(entry, 1);
			KeyEntry::set_first_block_offset(entry, new_offset);
			KeyEntry::set_last_block_offset(entry, new_offset);
			fence(Ordering::Release);
			KeyEntry::set_value_count_check(entry, 1);
			fence(Ordering::Release);
			self.update_key_count(key + 1)?;
			return Ok(());
		}

		let value_count = {
			let entry = self.entry_mut(key);
			KeyEntry::value_count(entry)
		};

		if value_count == 0 {
			// Scenario 4: sparse hole, same as scenario 1 but K unchanged.
			let new_offset = self.allocate_value_block(value)?;
			let entry = self.entry_mut(key);
			KeyEntry::set_value_count(entry, 1);
			KeyEntry::set_first_block_offset(entry, new_offset);
			KeyEntry::set_last_block_offset(entry, new_offset);
			fence(Ordering::Release);
			KeyEntry::set_value_count_check(entry, 1);
			fence(Ordering::Release);
			return Ok(());
		}

		if value_count & self.block_value_count_mod as u64 != 0 {
			// Scenario 2: the last block has room.
			let cell_index = (value_count & self.block_value_count_mod as u64) as u32;
			let last_block_offset = KeyEntry::last_block_offset(self.entry_mut(key));
			let value_off = last_block_offset as usize + ValueBlock::value_offset(cell_index);
			unsafe {
				self.value_mmap.as_mut_slice()[value_off..value_off + 8].copy_from_slice(&value.to_le_bytes());
			}
			fence(Ordering::Release);
			let entry = self.entry_mut(key);
			let new_count = value_count + 1;
			KeyEntry::set_value_count(entry, new_count);
			fence(Ordering::Release);
			KeyEntry::set_value_count_check(entry, new_count);
			fence(Ordering::Release);
			return Ok(());
		}

		// Scenario 3: last block full, allocate a new one and link it.
		let old_last_block_offset = KeyEntry::last_block_offset(self.entry_mut(key));
		let new_offset = self.allocate_value_block(value)?;

		{
			let b = self.block_value_count;
			let new_block = unsafe {
				&mut self.value_mmap.as_mut_slice()[new_offset as usize..new_offset as usize + self.block_capacity as usize]
			};
			new_block[ValueBlock::prev_offset(b)..ValueBlock::prev_offset(b) + 8]
				.copy_from_slice(&old_last_block_offset.to_le_bytes());
		}
		fence(Ordering::Release);
		{
			let b = self.block_value_count;
			let old_block = unsafe {
				&mut self.value_mmap.as_mut_slice()[old_last_block_offset as usize..old_last_block_offset as usize + self.block_capacity as usize]
			};
			old_block[ValueBlock::next_offset(b)..ValueBlock::next_offset(b) + 8]
				.copy_from_slice(&new_offset.to_le_bytes());
		}
		fence(Ordering::Release);

		let entry = self.entry_mut(key);
		let new_count = value_count + 1;
		KeyEntry::set_value_count(entry, new_count);
		fence(Ordering::Release);
		// first_block_offset is left untouched.
		KeyEntry::set_last_block_offset(entry, new_offset);
		fence(Ordering::Release);
		KeyEntry::set_value_count_check(entry, new_count);
		fence(Ordering::Release);
		Ok(())
	}

	pub fn key_count(&self) -> u64 {
		self.key_count
	}

	pub fn value_file_size(&self) -> u64 {
		self.value_file_size
	}

	/// §4.4.4 `close`: truncate both files to their committed sizes and
	/// release the mappings (done implicitly by dropping `self`).
	pub fn close(mut self) -> Result<()> {
		self.key_mmap.flush()?;
		self.value_mmap.flush()?;
		let key_len = self.key_count * KEY_ENTRY_SIZE as u64 + KEY_FILE_HEADER_SIZE as u64;
		self.files.truncate(&self.key_file, key_len)?;
		self.files.truncate(&self.value_file, self.value_file_size)?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::fs::StdFiles;

	struct TempDir(PathBuf);

	impl TempDir {
		fn new(name: &'static str) -> TempDir {
			env_logger::try_init().ok();
			let mut path = std::env::temp_dir();
			path.push("o3-merge-engine-test");
			path.push("bitmap");
			path.push(name);
			if path.exists() {
				std::fs::remove_dir_all(&path).unwrap();
			}
			std::fs::create_dir_all(&path).unwrap();
			TempDir(path)
		}
	}

	impl Drop for TempDir {
		fn drop(&mut self) {
			let _ = std::fs::remove_dir_all(&self.0);
		}
	}

	#[test]
	fn new_index_header_is_committed() {
		let dir = TempDir::new("new_index");
		let writer = BitmapIndexWriter::open(Arc::new(StdFiles), &dir.0, "idx", BitmapIndexOptions::new(4).unwrap()).unwrap();
		assert_eq!(writer.key_count(), 0);
		assert_eq!(writer.value_file_size(), 0);
	}

	#[test]
	fn sparse_key_leaves_holes() {
		// spec §8 boundary scenario 4.
		let dir = TempDir::new("sparse_key");
		let files: Arc<dyn Files + Send + Sync> = Arc::new(StdFiles);
		let mut writer = BitmapIndexWriter::open(files, &dir.0, "idx", BitmapIndexOptions::new(4).unwrap()).unwrap();
		writer.add(0, 10).unwrap();
		writer.add(5, 20).unwrap();
		writer.add(5, 21).unwrap();
		assert_eq!(writer.key_count(), 6);

		let entry5 = writer.entry_mut(5).to_vec();
		assert_eq!(KeyEntry::value_count(&entry5), 2);
		let last_block = KeyEntry::last_block_offset(&entry5);
		let block = unsafe { &writer.value_mmap.as_mut_slice()[last_block as usize..last_block as usize + 32] };
		assert_eq!(u64::from_le_bytes(block[0..8].try_into().unwrap()), 20);
		assert_eq!(u64::from_le_bytes(block[8..16].try_into().unwrap()), 21);

		for hole_key in 1..=4u64 {
			let entry = writer.entry_mut(hole_key).to_vec();
			assert_eq!(KeyEntry::value_count(&entry), 0);
		}
	}

	#[test]
	fn block_overflow_links_two_blocks() {
		// spec §8 boundary scenario 5.
		let dir = TempDir::new("block_overflow");
		let files: Arc<dyn Files + Send + Sync> = Arc::new(StdFiles);
		let mut writer = BitmapIndexWriter::open(files, &dir.0, "idx", BitmapIndexOptions::new(2).unwrap()).unwrap();
		writer.add(0, 1).unwrap();
		writer.add(0, 2).unwrap();
		writer.add(0, 3).unwrap();

		let entry = writer.entry_mut(0).to_vec();
		assert_eq!(KeyEntry::value_count(&entry), 3);
		let first = KeyEntry::first_block_offset(&entry);
		let last = KeyEntry::last_block_offset(&entry);
		assert_ne!(first, last);

		let b = writer.block_value_count;
		let first_block = unsafe { &writer.value_mmap.as_mut_slice()[first as usize..first as usize + writer.block_capacity as usize] };
		assert_eq!(u64::from_le_bytes(first_block[0..8].try_into().unwrap()), 1);
		assert_eq!(u64::from_le_bytes(first_block[8..16].try_into().unwrap()), 2);
		let next = u64::from_le_bytes(first_block[ValueBlock::next_offset(b)..ValueBlock::next_offset(b) + 8].try_into().unwrap());
		assert_eq!(next, last);

		let last_block = unsafe { &writer.value_mmap.as_mut_slice()[last as usize..last as usize + writer.block_capacity as usize] };
		assert_eq!(u64::from_le_bytes(last_block[0..8].try_into().unwrap()), 3);
		let prev = u64::from_le_bytes(last_block[ValueBlock::prev_offset(b)..ValueBlock::prev_offset(b) + 8].try_into().unwrap());
		assert_eq!(prev, first);
	}

	#[test]
	fn close_truncates_to_committed_sizes() {
		let dir = TempDir::new("close_sizes");
		let files: Arc<dyn Files + Send + Sync> = Arc::new(StdFiles);
		let mut writer = BitmapIndexWriter::open(files, &dir.0, "idx", BitmapIndexOptions::new(4).unwrap()).unwrap();
		writer.add(0, 1).unwrap();
		writer.add(1, 2).unwrap();
		let key_count = writer.key_count();
		writer.close().unwrap();

		let key_len = std::fs::metadata(dir.0.join("idx.k")).unwrap().len();
		assert_eq!(key_count * KEY_ENTRY_SIZE as u64 + KEY_FILE_HEADER_SIZE as u64, key_len);
	}

	#[test]
	fn reopen_validates_committed_header() {
		let dir = TempDir::new("reopen");
		let files: Arc<dyn Files + Send + Sync> = Arc::new(StdFiles);
		{
			let mut writer = BitmapIndexWriter::open(files.clone(), &dir.0, "idx", BitmapIndexOptions::new(4).unwrap()).unwrap();
			writer.add(0, 42).unwrap();
			writer.close().unwrap();
		}
		let writer = BitmapIndexWriter::open(files, &dir.0, "idx", BitmapIndexOptions::new(4).unwrap()).unwrap();
		assert_eq!(writer.key_count(), 1);
	}
}
