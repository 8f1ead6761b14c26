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

//! O3 Copy Job (spec §4.3): drains one [`crate::task::O3CopyTask`] from the
//! job-queue contract (§6.3) and runs it to completion.
//!
//! Per the ordering guarantee in §5 ("release the ring cursor before the
//! task's copy work runs") the cursor is acknowledged first thing, before any
//! byte is moved. Per the redesign guidance in §9 the `MERGE` dispatch arm
//! returns rather than falling through to `OO`, and a block-overflow grow
//! writes the *new* block offset into the key entry rather than leaving the
//! stale one in place - see [`crate::bitmap::writer::BitmapIndexWriter::add`].

use crate::block::BlockType;
use crate::column_copier::{copy_fixed_size, copy_timestamp_with_row_id, copy_var_size};
use crate::error::Result;
use crate::merge_shuffle::{merge_binary, merge_string, shuffle_fixed, shuffle_timestamp_with_row_id};
use crate::ring::CopyTaskSource;
use crate::size_class::ColumnType;
use crate::task::O3CopyTask;

/// Drains and executes every task currently published on `source`, returning
/// once `source.get()` observes an empty ring. A production deployment calls
/// this in a loop from each worker thread; tests call it once per batch.
pub fn drain<S: CopyTaskSource<O3CopyTask>>(source: &S) -> Result<()> {
	while let Some((cursor, task)) = source.get() {
		// §5 ordering guarantee (i): release the ring slot before doing the
		// task's copy work, so the producer can reuse it immediately.
		source.done(cursor);
		run(task)?;
	}
	Ok(())
}

/// Executes a single copy task: dispatches on block type, applies the
/// resulting bytes to the destination column, then runs the per-column and
/// per-partition teardown (spec §4.3 steps 3-4).
pub fn run(task: O3CopyTask) -> Result<()> {
	match task.block_type {
		BlockType::Oo => copy_one_side(&task, Side::OutOfOrder)?,
		BlockType::Data => copy_one_side(&task, Side::OnDisk)?,
		BlockType::Merge => {
			merge_both_sides(&task)?;
			// Defect fixed per spec §9: do not fall through to the `Oo` arm.
			return finish_task(task);
		}
	}
	finish_task(task)
}

enum Side {
	OutOfOrder,
	OnDisk,
}

fn copy_one_side(task: &O3CopyTask, side: Side) -> Result<()> {
	let src = match side {
		Side::OutOfOrder => task.src_oo.as_ref().expect("Oo task without src_oo mapping"),
		Side::OnDisk => task.src_disk.as_ref().expect("Data task without src_disk mapping"),
	};

	let dst_fixed = unsafe { task.dst.fixed.as_mut_slice() };
	let dst_var = unsafe { task.dst.var.as_mut_slice() };

	match task.column_type {
		ColumnType::Fixed(size_class) => {
			copy_fixed_size(src.fixed.as_slice(), task.src_lo, task.src_hi, dst_fixed, task.dst_fixed_offset as usize, size_class)
		}
		ColumnType::TimestampWithRowId => {
			copy_timestamp_with_row_id(src.fixed.as_slice(), task.src_lo, task.src_hi, dst_fixed, task.dst_fixed_offset as usize)
		}
		ColumnType::String | ColumnType::Binary => copy_var_size(
			src.fixed.as_slice(),
			src.var.as_slice(),
			task.src_lo,
			task.src_hi,
			dst_fixed,
			task.dst_fixed_offset / 8,
			dst_var,
			task.dst_var_offset,
		)
		.map(|_| ()),
	}
}

fn merge_both_sides(task: &O3CopyTask) -> Result<()> {
	let index = task.merge_index.as_ref().expect("Merge task without a merge index");
	let src_oo = task.src_oo.as_ref().expect("Merge task without src_oo mapping");
	let src_disk = task.src_disk.as_ref().expect("Merge task without src_disk mapping");

	let dst_fixed_full = unsafe { task.dst.fixed.as_mut_slice() };
	let dst_var_full = unsafe { task.dst.var.as_mut_slice() };
	let dst_fixed = &mut dst_fixed_full[task.dst_fixed_offset as usize..];

	match task.column_type {
		ColumnType::Fixed(size_class) => {
			shuffle_fixed(index, src_oo.fixed.as_slice(), src_disk.fixed.as_slice(), dst_fixed, size_class)
		}
		ColumnType::TimestampWithRowId => {
			shuffle_timestamp_with_row_id(index, src_oo.fixed.as_slice(), src_disk.fixed.as_slice(), dst_fixed)
		}
		ColumnType::String => {
			let dst_var = &mut dst_var_full[task.dst_var_offset as usize..];
			merge_string(
				index,
				src_oo.fixed.as_slice(),
				src_oo.var.as_slice(),
				src_disk.fixed.as_slice(),
				src_disk.var.as_slice(),
				dst_fixed,
				dst_var,
			)
			.map(|_| ())
		}
		ColumnType::Binary => {
			let dst_var = &mut dst_var_full[task.dst_var_offset as usize..];
			merge_binary(
				index,
				src_oo.fixed.as_slice(),
				src_oo.var.as_slice(),
				src_disk.fixed.as_slice(),
				src_disk.var.as_slice(),
				dst_fixed,
				dst_var,
			)
			.map(|_| ())
		}
	}
}

/// §4.3 steps 3-4: decrement `partCounter`; if this was the last outstanding
/// copy task for the column, run the bitmap index (if any) over the whole
/// completed column, let the mapped regions drop, and tell the partition one
/// of its columns finished.
fn finish_task(task: O3CopyTask) -> Result<()> {
	let is_last_for_column = task.part_counter.dec_is_last();
	if is_last_for_column {
		if let Some(writer) = &task.index_writer {
			index_completed_column(&task, writer)?;
		}
		log::debug!(target: "o3", "Last copy task for column finished, releasing mapped regions");
	}
	// task (and with it dst/src Arc<MappedColumn> handles) drops here; the
	// last holder of a region's Arc unmaps/closes it via MappedColumn::drop.
	let partition = task.partition.clone();
	drop(task);
	if is_last_for_column {
		partition.column_finished();
	}
	Ok(())
}

fn index_completed_column(task: &O3CopyTask, writer: &parking_lot::Mutex<crate::bitmap::BitmapIndexWriter>) -> Result<()> {
	let dst_fixed = task.dst.fixed.as_slice();
	let row_count = dst_fixed.len() / 4;
	let mut writer = writer.lock();
	for row in 0..row_count {
		let key = u32::from_le_bytes(dst_fixed[row * 4..row * 4 + 4].try_into().unwrap()) as u64;
		writer.add(key, row as u64)?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::bitmap::BitmapIndexWriter;
	use crate::block::BlockType;
	use crate::fs::StdFiles;
	use crate::merge_index::{MergeEntry, MergeIndex, Side as MergeSide};
	use crate::mmap::ColumnRegion;
	use crate::options::BitmapIndexOptions;
	use crate::refcount::RefCount;
	use crate::ring::VecRing;
	use crate::size_class::SizeClass;
	use crate::task::{DestColumn, MappedColumn, PartitionSharedState, SourceColumn};
	use std::fs::OpenOptions;
	use std::path::PathBuf;
	use std::sync::Arc;

	fn temp_dir(name: &'static str) -> PathBuf {
		env_logger::try_init().ok();
		let mut path = std::env::temp_dir();
		path.push("o3-merge-engine-test");
		path.push("copy_job");
		path.push(name);
		let _ = std::fs::remove_dir_all(&path);
		std::fs::create_dir_all(&path).unwrap();
		path
	}

	fn mapped_column_from_bytes(dir: &std::path::Path, name: &str, bytes: &[u8]) -> Arc<MappedColumn> {
		let path = dir.join(name);
		let file = OpenOptions::new().create(true).read(true).write(true).truncate(true).open(&path).unwrap();
		if !bytes.is_empty() {
			use std::io::Write;
			(&file).write_all(bytes).unwrap();
		}
		let file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
		let region = if bytes.is_empty() { ColumnRegion::Empty } else { ColumnRegion::map_read_write(&file, bytes.len()).unwrap() };
		Arc::new(MappedColumn::new(file, region))
	}

	fn empty_mapped_column() -> Arc<MappedColumn> {
		Arc::new(MappedColumn::empty())
	}

	fn shared_state() -> Arc<PartitionSharedState> {
		Arc::new(PartitionSharedState::new(1, None))
	}

	#[test]
	fn oo_only_block_copies_into_destination() {
		let dir = temp_dir("oo_only");
		let src_fixed: Vec<u8> = (0u64..4).flat_map(|v| v.to_le_bytes()).collect();
		let src = mapped_column_from_bytes(&dir, "src.d", &src_fixed);
		let dst = mapped_column_from_bytes(&dir, "dst.d", &vec![0u8; 32]);

		let task = O3CopyTask {
			block_type: BlockType::Oo,
			column_type: ColumnType::Fixed(SizeClass::Long),
			index_writer: None,
			src_lo: 1,
			src_hi: 2,
			merge_index: None,
			src_oo: Some(SourceColumn { fixed: src, var: empty_mapped_column() }),
			src_disk: None,
			dst: DestColumn { fixed: dst.clone(), var: empty_mapped_column() },
			dst_fixed_offset: 0,
			dst_var_offset: 0,
			part_counter: Arc::new(RefCount::new(1)),
			partition: shared_state(),
		};

		run(task).unwrap();
		let got = dst.as_slice();
		assert_eq!(u64::from_le_bytes(got[0..8].try_into().unwrap()), 1);
		assert_eq!(u64::from_le_bytes(got[8..16].try_into().unwrap()), 2);
	}

	#[test]
	fn merge_block_does_not_fall_through_to_oo() {
		// Regression test for the fixed defect (spec §9): the merge arm must
		// not additionally run the `Oo` copy over the same destination
		// window, which would corrupt it with the unshuffled OO bytes.
		let dir = temp_dir("merge_no_fallthrough");
		let oo: Vec<u8> = (0u64..2).flat_map(|v| v.to_le_bytes()).collect();
		let disk: Vec<u8> = (100u64..102).flat_map(|v| v.to_le_bytes()).collect();
		let src_oo = mapped_column_from_bytes(&dir, "oo.d", &oo);
		let src_disk = mapped_column_from_bytes(&dir, "disk.d", &disk);
		let dst = mapped_column_from_bytes(&dir, "dst.d", &vec![0u8; 16]);

		let index = Arc::new(MergeIndex::from_entries(vec![MergeEntry::new(MergeSide::OnDisk, 0), MergeEntry::new(MergeSide::OutOfOrder, 0)]));

		let task = O3CopyTask {
			block_type: BlockType::Merge,
			column_type: ColumnType::Fixed(SizeClass::Long),
			index_writer: None,
			src_lo: 0,
			src_hi: 1,
			merge_index: Some(index),
			src_oo: Some(SourceColumn { fixed: src_oo, var: empty_mapped_column() }),
			src_disk: Some(SourceColumn { fixed: src_disk, var: empty_mapped_column() }),
			dst: DestColumn { fixed: dst.clone(), var: empty_mapped_column() },
			dst_fixed_offset: 0,
			dst_var_offset: 0,
			part_counter: Arc::new(RefCount::new(1)),
			partition: shared_state(),
		};

		run(task).unwrap();
		let got = dst.as_slice();
		assert_eq!(u64::from_le_bytes(got[0..8].try_into().unwrap()), 100);
		assert_eq!(u64::from_le_bytes(got[8..16].try_into().unwrap()), 0);
	}

	#[test]
	fn last_task_signals_partition_completion() {
		let dir = temp_dir("latch_signal");
		let src = mapped_column_from_bytes(&dir, "src.d", &8u64.to_le_bytes());
		let dst = mapped_column_from_bytes(&dir, "dst.d", &vec![0u8; 8]);
		let partition = shared_state();

		let task = O3CopyTask {
			block_type: BlockType::Oo,
			column_type: ColumnType::Fixed(SizeClass::Long),
			index_writer: None,
			src_lo: 0,
			src_hi: 0,
			merge_index: None,
			src_oo: Some(SourceColumn { fixed: src, var: empty_mapped_column() }),
			src_disk: None,
			dst: DestColumn { fixed: dst, var: empty_mapped_column() },
			dst_fixed_offset: 0,
			dst_var_offset: 0,
			part_counter: Arc::new(RefCount::new(1)),
			partition: partition.clone(),
		};

		run(task).unwrap();
		assert!(partition.completion_latch.is_signalled());
	}

	#[test]
	fn drains_queued_tasks_via_ring() {
		let dir = temp_dir("drain_ring");
		let ring: VecRing<O3CopyTask> = VecRing::new();
		let partition = shared_state();
		for i in 0..3u64 {
			let src = mapped_column_from_bytes(&dir, &format!("src{}.d", i), &(i * 10).to_le_bytes());
			let dst = mapped_column_from_bytes(&dir, &format!("dst{}.d", i), &vec![0u8; 8]);
			ring.push(O3CopyTask {
				block_type: BlockType::Oo,
				column_type: ColumnType::Fixed(SizeClass::Long),
				index_writer: None,
				src_lo: 0,
				src_hi: 0,
				merge_index: None,
				src_oo: Some(SourceColumn { fixed: src, var: empty_mapped_column() }),
				src_disk: None,
				dst: DestColumn { fixed: dst, var: empty_mapped_column() },
				dst_fixed_offset: 0,
				dst_var_offset: 0,
				part_counter: Arc::new(RefCount::new(1)),
				partition: partition.clone(),
			});
		}
		drain(&ring).unwrap();
		assert!(ring.is_empty());
	}

	#[test]
	fn indexed_column_populates_bitmap_index_on_last_task() {
		let dir = temp_dir("indexed_column");
		let dst_bytes: Vec<u8> = vec![2u32.to_le_bytes(), 5u32.to_le_bytes(), 2u32.to_le_bytes()]
			.into_iter()
			.flat_map(|b| b.to_vec())
			.collect();
		let dst = mapped_column_from_bytes(&dir, "symbol.d", &dst_bytes);
		let src = mapped_column_from_bytes(&dir, "src.d", &dst_bytes);

		let writer = BitmapIndexWriter::open(Arc::new(StdFiles), &dir, "symbol", BitmapIndexOptions::default()).unwrap();
		let writer = Arc::new(parking_lot::Mutex::new(writer));

		let task = O3CopyTask {
			block_type: BlockType::Oo,
			column_type: ColumnType::Fixed(SizeClass::Int),
			index_writer: Some(writer.clone()),
			src_lo: 0,
			src_hi: 2,
			merge_index: None,
			src_oo: Some(SourceColumn { fixed: src, var: empty_mapped_column() }),
			src_disk: None,
			dst: DestColumn { fixed: dst, var: empty_mapped_column() },
			dst_fixed_offset: 0,
			dst_var_offset: 0,
			part_counter: Arc::new(RefCount::new(1)),
			partition: shared_state(),
		};

		run(task).unwrap();
		let w = writer.lock();
		assert_eq!(w.key_count(), 6);
	}
}
