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

//! O3 Partition Task Envelope (spec §6.2) and O3 Copy Task, the unit the
//! job-queue contract (§6.3) hands to workers. Both are plain data carriers:
//! mutated only by the producer before publish, read-only to the consumer.

use crate::bitmap::BitmapIndexWriter;
use crate::block::BlockType;
use crate::merge_index::MergeIndex;
use crate::mmap::ColumnRegion;
use crate::refcount::{CompletionLatch, RefCount};
use crate::size_class::ColumnType;
use parking_lot::Mutex;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

/// An owning handle over one memory-mapped column region plus the file it
/// was mapped from. Dropping it closes the fd and unmaps the region;
/// `ColumnRegion::Empty` / `file: None` make both steps no-ops, satisfying
/// §4.3's "unmap/close skipped for a zero-sized/non-positive handle" rule
/// without any extra bookkeeping.
pub struct MappedColumn {
	pub file: Option<File>,
	pub region: ColumnRegion,
}

impl MappedColumn {
	pub fn empty() -> MappedColumn {
		MappedColumn { file: None, region: ColumnRegion::Empty }
	}

	pub fn new(file: File, region: ColumnRegion) -> MappedColumn {
		MappedColumn { file: Some(file), region }
	}

	pub fn len(&self) -> usize {
		self.region.len()
	}

	pub fn is_empty(&self) -> bool {
		self.region.is_empty()
	}

	pub fn as_slice(&self) -> &[u8] {
		self.region.as_slice()
	}

	/// # Safety
	/// See [`ColumnRegion::as_mut_slice`]: the caller must only touch the
	/// disjoint byte window its task was handed.
	pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
		self.region.as_mut_slice()
	}
}

impl Drop for MappedColumn {
	fn drop(&mut self) {
		if !self.region.is_empty() {
			log::trace!(target: "o3", "Unmapping column region of {} bytes", self.region.len());
		}
		if self.file.is_some() {
			log::trace!(target: "o3", "Closing column fd");
		}
	}
}

/// One side (out-of-order or on-disk) of a variable-width or fixed-width
/// column's source mapping.
pub struct SourceColumn {
	pub fixed: Arc<MappedColumn>,
	pub var: Arc<MappedColumn>,
}

/// The destination column mapping a copy task writes into.
pub struct DestColumn {
	pub fixed: Arc<MappedColumn>,
	pub var: Arc<MappedColumn>,
}

/// State shared by every column of one partition: the merge index (freed
/// when the last column completes, spec §3.4) and the partition completion
/// latch (signalled exactly once, spec §5 ordering guarantee (iv)).
pub struct PartitionSharedState {
	merge_index: Mutex<Option<Arc<MergeIndex>>>,
	pub column_counter: RefCount,
	pub completion_latch: Arc<CompletionLatch>,
}

impl PartitionSharedState {
	pub fn new(column_count: u64, merge_index: Option<Arc<MergeIndex>>) -> PartitionSharedState {
		PartitionSharedState {
			merge_index: Mutex::new(merge_index),
			column_counter: RefCount::new(column_count),
			completion_latch: Arc::new(CompletionLatch::new()),
		}
	}

	/// Called when a column's `partCounter` reaches zero. If this was also
	/// the partition's last outstanding column, frees the merge index and
	/// signals the completion latch (spec §4.3 step 4).
	pub fn column_finished(&self) {
		if self.column_counter.dec_is_last() {
			let freed = self.merge_index.lock().take();
			if let Some(index) = freed {
				log::debug!(target: "o3", "Freeing merge index ({} entries) for completed partition", index.len());
				drop(index);
			}
			self.completion_latch.signal();
		}
	}
}

/// A discriminator for how a table is time-partitioned (by day/month/year/
/// none/...). The concrete scheme lives in the out-of-scope partition
/// directory layout (spec §1); this crate only needs to carry it through.
pub type PartitionBy = u32;

/// O3 Partition Task Envelope (spec §6.2): immutable description of one
/// partition's O3 work. Mutated only by the producer before publish.
pub struct O3PartitionTask {
	pub partition_path: PathBuf,
	pub partition_by: PartitionBy,
	pub src_oo_lo: u64,
	pub src_oo_hi: u64,
	pub min_timestamp: i64,
	pub max_timestamp: i64,
	pub partition_timestamp: i64,
	pub current_max_timestamp: i64,
	pub txn: u64,
	pub is_last_partition: bool,
	pub sorted_timestamps: Arc<[i64]>,
	/// Invoked by the table writer when the partition's work completes.
	/// An external collaborator (spec §1); optional so the crate is usable
	/// without one in tests.
	pub on_complete: Option<Arc<dyn Fn() + Send + Sync>>,
	pub shared: Arc<PartitionSharedState>,
}

/// One O3 Copy Task (spec §4.3): one per (column, block type). The unit
/// dispatched through the job-queue contract (§6.3).
pub struct O3CopyTask {
	pub block_type: BlockType,
	pub column_type: ColumnType,
	/// Set when the column is indexed; the copy job invokes this writer over
	/// the whole destination column once the last task for it completes
	/// (spec §4.3 step 4, §4.4). Shared across the column's tasks because
	/// only one of them - whichever observes `part_counter` reach zero -
	/// actually calls it.
	pub index_writer: Option<Arc<Mutex<BitmapIndexWriter>>>,
	pub src_lo: u64,
	pub src_hi: u64,
	pub merge_index: Option<Arc<MergeIndex>>,
	pub src_oo: Option<SourceColumn>,
	pub src_disk: Option<SourceColumn>,
	pub dst: DestColumn,
	pub dst_fixed_offset: u64,
	pub dst_var_offset: u64,
	pub part_counter: Arc<RefCount>,
	pub partition: Arc<PartitionSharedState>,
}
