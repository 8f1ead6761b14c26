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

//! Out-of-order column merge engine and bitmap index writer for a columnar
//! time-series store. See `SPEC_FULL.md` for the module map.

pub mod bitmap;
pub mod block;
pub mod column_copier;
pub mod copy_job;
pub mod error;
pub mod fs;
pub mod merge_index;
pub mod merge_shuffle;
pub mod mmap;
pub mod options;
pub mod refcount;
pub mod ring;
pub mod size_class;
pub mod task;

pub use bitmap::{BitmapIndexCursor, BitmapIndexWriter};
pub use block::BlockType;
pub use error::{Error, Result};
pub use merge_index::{MergeEntry, MergeIndex, Side};
pub use options::{BitmapIndexOptions, O3ColumnOptions};
pub use size_class::{ColumnType, SizeClass};
pub use task::{O3CopyTask, O3PartitionTask, PartitionSharedState};
