// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

pub mod concat;
pub mod constant;
pub mod cursor;
pub mod distinct;
pub mod dml;
pub mod fetch_scan;
pub mod filter;
pub mod impersonate;
pub mod merge_aggregate;
pub mod message;
pub mod metadata_scan;
pub mod offset_fetch;
pub mod partition;
pub mod prefetch;
pub mod project;
pub mod script;
pub mod set_ops;
pub mod sort;
pub mod spool;
pub mod string_split;
pub mod tds_scan;
pub mod window;

#[cfg(test)]
pub(crate) mod test_utils;

pub use concat::ConcatenateNode;
pub use constant::ConstantScanNode;
pub use cursor::{
    CloseCursorNode, DeallocateCursorNode, DeclareCursorNode, FetchCursorNode, OpenCursorNode,
};
pub use distinct::DistinctNode;
pub use dml::{DeleteNode, DmlOptions, InsertNode, MergeNode, UpdateNode};
pub use fetch_scan::{FetchScanNode, ScanOptions};
pub use filter::FilterNode;
pub use impersonate::{ExecuteAsNode, RevertNode};
pub use merge_aggregate::{AggregateDef, AggregateFunction, MergeAggregateNode};
pub use message::ExecuteMessageNode;
pub use metadata_scan::MetadataScanNode;
pub use offset_fetch::OffsetFetchNode;
pub use partition::{
    AdaptiveAggregateScanNode, ParallelPartitionNode, PartitionDescriptor,
    PartitionedAggregateNode, partition_date_range,
};
pub use prefetch::PrefetchNode;
pub use project::{ColumnSource, ProjectColumn, ProjectNode};
pub use script::ScriptNode;
pub use set_ops::{ExceptNode, IntersectNode};
pub use sort::{SortKey, SortNode};
pub use spool::{CreateTempTableNode, CteSpoolScanNode, DropTempTableNode, TempTableScanNode};
pub use string_split::StringSplitNode;
pub use tds_scan::TdsScanNode;
pub use window::{WindowDef, WindowNode};
