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

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Counters shared by every operator of one plan execution. Increments are
/// atomic because partition children run in parallel.
#[derive(Debug)]
pub struct ExecutionStats {
    pages_fetched: AtomicU64,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    backend_calls: AtomicU64,
    retries: AtomicU64,
    partitions_split: AtomicU64,
    /// Total record count reported by an include-count scan, -1 = unknown.
    total_record_count: AtomicI64,
}

impl Default for ExecutionStats {
    fn default() -> Self {
        Self {
            pages_fetched: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            backend_calls: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            partitions_split: AtomicU64::new(0),
            total_record_count: AtomicI64::new(-1),
        }
    }
}

impl ExecutionStats {
    pub fn add_page(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows_read(&self, n: u64) {
        self.rows_read.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_rows_written(&self, n: u64) {
        self.rows_written.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_backend_call(&self) {
        self.backend_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_partition_split(&self) {
        self.partitions_split.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_total_record_count(&self, count: u64) {
        self.total_record_count.store(count as i64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total_record_count.load(Ordering::Relaxed);
        StatsSnapshot {
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            rows_read: self.rows_read.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            backend_calls: self.backend_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            partitions_split: self.partitions_split.load(Ordering::Relaxed),
            total_record_count: (total >= 0).then_some(total as u64),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub pages_fetched: u64,
    pub rows_read: u64,
    pub rows_written: u64,
    pub backend_calls: u64,
    pub retries: u64,
    pub partitions_split: u64,
    pub total_record_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_increments() {
        let stats = ExecutionStats::default();
        stats.add_page();
        stats.add_page();
        stats.add_rows_read(3);
        stats.add_retry();
        let snap = stats.snapshot();
        assert_eq!(snap.pages_fetched, 2);
        assert_eq!(snap.rows_read, 3);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.rows_written, 0);
    }
}
